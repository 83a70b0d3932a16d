//! Bounded-timeout TCP port probes.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Tests whether a TCP port accepts connections.
#[async_trait]
pub trait PortProber: Send + Sync {
    /// Returns true if a connection to `addr` is established within `limit`.
    async fn probe(&self, addr: SocketAddr, limit: Duration) -> bool;
}

/// Probes with a bare TCP connect; the connection is dropped immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProber;

#[async_trait]
impl PortProber for TcpProber {
    async fn probe(&self, addr: SocketAddr, limit: Duration) -> bool {
        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                tracing::trace!("{} closed: {}", addr, e);
                false
            }
            Err(_) => {
                tracing::trace!("{} timed out after {:?}", addr, limit);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port_is_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        assert!(TcpProber.probe(addr, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_closed_port_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(!TcpProber.probe(addr, Duration::from_secs(1)).await);
    }
}
