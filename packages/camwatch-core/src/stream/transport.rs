//! Transport capability: opens stream URLs and reads decoded frames.

use super::frame::Frame;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open stream: {0}")]
    Open(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("stream ended")]
    EndOfStream,
    #[error("transport released")]
    Released,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open connection to one camera stream.
///
/// Owned exclusively by a stream session. `release` may be called from
/// another thread while a read is pending and must make that read fail.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Read the next decoded frame. No timeout is applied by callers.
    async fn read_frame(&self) -> Result<Frame, TransportError>;

    /// Free the underlying resource. Idempotent and non-blocking.
    fn release(&self);
}

/// Opens transports for stream URLs.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Arc<dyn Transport>, TransportError>;
}
