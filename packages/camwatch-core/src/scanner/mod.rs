//! Camera discovery.
//!
//! Probes every host of the configured network ranges for camera-like TCP
//! ports using a fixed-size worker pool. Results arrive as a lazy stream of
//! [`DiscoveryEvent`]s:
//! - `Device` for every host with an open candidate port (first open port wins)
//! - `Progress` after every resolved host, matched or not
//! - `Complete` exactly once, always last
//!
//! Cancellation is cooperative. Workers check the scan's token before taking
//! a new host and before each port probe; probes already in flight finish.

mod ports;
mod probe;
pub mod range;

pub use ports::{DeviceBrand, DEFAULT_PORTS};
pub use probe::{PortProber, TcpProber};
pub use range::{NetworkRange, RangeError};

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default per-probe connect timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// Default number of concurrent probe workers.
pub const DEFAULT_MAX_CONCURRENCY: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no network ranges to scan")]
    NoRanges,
    #[error("candidate port list is empty")]
    NoPorts,
    #[error("max concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Parameters of a single discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub ranges: Vec<NetworkRange>,
    /// Candidate ports in priority order.
    pub ports: Vec<u16>,
    pub probe_timeout: Duration,
    pub max_concurrency: usize,
}

impl DiscoveryRequest {
    pub fn new(ranges: Vec<NetworkRange>) -> Self {
        Self {
            ranges,
            ports: DEFAULT_PORTS.to_vec(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    fn validate(&self) -> Result<(), DiscoveryError> {
        if self.ranges.is_empty() {
            return Err(DiscoveryError::NoRanges);
        }
        if self.ports.is_empty() {
            return Err(DiscoveryError::NoPorts);
        }
        if self.max_concurrency == 0 {
            return Err(DiscoveryError::ZeroConcurrency);
        }
        Ok(())
    }
}

/// A host queued for probing, with its candidate ports in priority order.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub address: IpAddr,
    pub ports: Arc<[u16]>,
}

/// A host that answered on one of the candidate ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub address: IpAddr,
    pub port: u16,
    pub brand: DeviceBrand,
    pub status: String,
}

impl DiscoveredDevice {
    fn open(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            brand: DeviceBrand::from_port(port),
            status: "Online".to_string(),
        }
    }
}

/// Progress after a host resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanProgress {
    pub scanned: u64,
    pub total: u64,
}

impl ScanProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.scanned.min(self.total) * 100) / self.total) as u8
    }
}

/// Final accounting of a discovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub scanned: u64,
    pub total: u64,
    pub devices_found: usize,
    pub cancelled: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Device(DiscoveredDevice),
    Progress(ScanProgress),
    Complete(ScanSummary),
}

/// Devices collected from a finished scan.
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub devices: Vec<DiscoveredDevice>,
    pub summary: ScanSummary,
}

/// Probes network ranges for cameras.
#[derive(Clone)]
pub struct DiscoveryEngine {
    prober: Arc<dyn PortProber>,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryEngine {
    /// Engine probing with real TCP connects.
    pub fn new() -> Self {
        Self::with_prober(Arc::new(TcpProber))
    }

    pub fn with_prober(prober: Arc<dyn PortProber>) -> Self {
        Self { prober }
    }

    /// Start a scan in the background and return its event stream.
    ///
    /// Must be called from within a Tokio runtime. The returned
    /// [`DiscoveryScan`] cancels the scan when dropped.
    pub fn discover(&self, request: DiscoveryRequest) -> Result<DiscoveryScan, DiscoveryError> {
        request.validate()?;

        let total = range::total_hosts(&request.ranges);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        tracing::info!(
            "Discovery starting: {} hosts across {} ranges, ports {:?}, {} workers",
            total,
            request.ranges.len(),
            request.ports,
            request.max_concurrency
        );

        tokio::spawn(run_scan(
            self.prober.clone(),
            request,
            total,
            cancel.clone(),
            tx,
        ));

        Ok(DiscoveryScan {
            events: rx,
            cancel,
            total,
        })
    }
}

/// Handle for cancelling a scan from elsewhere.
#[derive(Debug, Clone)]
pub struct ScanCanceller(CancellationToken);

impl ScanCanceller {
    pub fn cancel(&self) {
        if !self.0.is_cancelled() {
            tracing::info!("Scan cancellation requested");
        }
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// A running discovery. Yields events until `Complete`, then ends.
pub struct DiscoveryScan {
    events: mpsc::UnboundedReceiver<DiscoveryEvent>,
    cancel: CancellationToken,
    total: u64,
}

impl DiscoveryScan {
    /// Progress denominator: the sum of host counts of every range.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub async fn next_event(&mut self) -> Option<DiscoveryEvent> {
        self.events.recv().await
    }

    /// Request cooperative cancellation. A trailing burst of events may follow.
    pub fn cancel(&self) {
        self.canceller().cancel();
    }

    pub fn canceller(&self) -> ScanCanceller {
        ScanCanceller(self.cancel.clone())
    }

    /// Drain the scan, keeping only devices and the summary.
    pub async fn collect(mut self) -> DiscoveryOutcome {
        let started = Instant::now();
        let mut devices = Vec::new();
        let mut scanned = 0;

        while let Some(event) = self.events.recv().await {
            match event {
                DiscoveryEvent::Device(device) => devices.push(device),
                DiscoveryEvent::Progress(progress) => scanned = progress.scanned,
                DiscoveryEvent::Complete(summary) => return DiscoveryOutcome { devices, summary },
            }
        }

        // Driver ended without a summary (runtime shutting down)
        let devices_found = devices.len();
        DiscoveryOutcome {
            devices,
            summary: ScanSummary {
                scanned,
                total: self.total,
                devices_found,
                cancelled: true,
                elapsed: started.elapsed(),
            },
        }
    }
}

impl Stream for DiscoveryScan {
    type Item = DiscoveryEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for DiscoveryScan {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum ProbeOutcome {
    Open(u16),
    Closed,
    Aborted,
}

struct TargetResult {
    address: IpAddr,
    outcome: ProbeOutcome,
}

type TargetQueue = Arc<Mutex<Box<dyn Iterator<Item = ScanTarget> + Send>>>;

async fn run_scan(
    prober: Arc<dyn PortProber>,
    request: DiscoveryRequest,
    total: u64,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<DiscoveryEvent>,
) {
    let started = Instant::now();
    let ports: Arc<[u16]> = request.ports.into();

    let target_ports = ports.clone();
    let targets = request.ranges.into_iter().flat_map(move |range| {
        let ports = target_ports.clone();
        range.hosts().map(move |host| ScanTarget {
            address: IpAddr::V4(host),
            ports: ports.clone(),
        })
    });
    let queue: TargetQueue = Arc::new(Mutex::new(Box::new(targets)));

    let worker_count = usize::try_from(total)
        .unwrap_or(usize::MAX)
        .min(request.max_concurrency);
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let mut workers = JoinSet::new();

    for _ in 0..worker_count {
        workers.spawn(probe_worker(
            prober.clone(),
            queue.clone(),
            request.probe_timeout,
            cancel.clone(),
            result_tx.clone(),
        ));
    }
    drop(result_tx);

    let mut scanned: u64 = 0;
    let mut seen: HashSet<(IpAddr, u16)> = HashSet::new();

    // Ends once every worker has exited and dropped its sender
    while let Some(result) = result_rx.recv().await {
        let port = match result.outcome {
            ProbeOutcome::Aborted => continue,
            ProbeOutcome::Open(port) => Some(port),
            ProbeOutcome::Closed => None,
        };

        scanned += 1;

        if let Some(port) = port {
            if seen.insert((result.address, port)) {
                let device = DiscoveredDevice::open(result.address, port);
                tracing::info!(
                    "Found {} device at {}:{}",
                    device.brand,
                    device.address,
                    device.port
                );
                let _ = events.send(DiscoveryEvent::Device(device));
            } else {
                tracing::debug!("Suppressing repeated device {}:{}", result.address, port);
            }
        }

        let _ = events.send(DiscoveryEvent::Progress(ScanProgress { scanned, total }));
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::warn!("Discovery worker ended abnormally: {}", e);
        }
    }

    let summary = ScanSummary {
        scanned,
        total,
        devices_found: seen.len(),
        cancelled: cancel.is_cancelled() && scanned < total,
        elapsed: started.elapsed(),
    };

    tracing::info!(
        "Discovery {}: {}/{} hosts scanned, {} devices found in {:.1}s",
        if summary.cancelled { "cancelled" } else { "complete" },
        summary.scanned,
        summary.total,
        summary.devices_found,
        summary.elapsed.as_secs_f64()
    );

    let _ = events.send(DiscoveryEvent::Complete(summary));
}

async fn probe_worker(
    prober: Arc<dyn PortProber>,
    queue: TargetQueue,
    probe_timeout: Duration,
    cancel: CancellationToken,
    results: mpsc::UnboundedSender<TargetResult>,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next();
        let Some(target) = next else {
            break;
        };

        let outcome = probe_target(prober.as_ref(), &target, probe_timeout, &cancel).await;
        let result = TargetResult {
            address: target.address,
            outcome,
        };
        if results.send(result).is_err() {
            break;
        }
    }
}

/// Probe ports in priority order; the first open port wins.
async fn probe_target(
    prober: &dyn PortProber,
    target: &ScanTarget,
    probe_timeout: Duration,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    for &port in target.ports.iter() {
        if cancel.is_cancelled() {
            return ProbeOutcome::Aborted;
        }
        if prober
            .probe(SocketAddr::new(target.address, port), probe_timeout)
            .await
        {
            return ProbeOutcome::Open(port);
        }
    }
    ProbeOutcome::Closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Prober with a fixed set of open sockets and a call log.
    #[derive(Default)]
    struct ScriptedProber {
        open: HashSet<SocketAddr>,
        delay: Duration,
        calls: Mutex<Vec<SocketAddr>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedProber {
        fn with_open(open: &[&str]) -> Self {
            Self {
                open: open.iter().map(|s| s.parse().unwrap()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<SocketAddr> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PortProber for ScriptedProber {
        async fn probe(&self, addr: SocketAddr, _limit: Duration) -> bool {
            self.calls.lock().unwrap().push(addr);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.open.contains(&addr)
        }
    }

    fn ranges(list: &[&str]) -> Vec<NetworkRange> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    async fn drain(mut scan: DiscoveryScan) -> Vec<DiscoveryEvent> {
        let mut events = Vec::new();
        while let Some(event) = scan.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_single_open_host_in_slash_30() {
        let prober = Arc::new(ScriptedProber::with_open(&["10.0.0.1:554"]));
        let engine = DiscoveryEngine::with_prober(prober.clone());
        let request = DiscoveryRequest::new(ranges(&["10.0.0.0/30"])).with_ports(vec![554]);

        let scan = engine.discover(request).unwrap();
        assert_eq!(scan.total(), 2);
        let events = drain(scan).await;

        let devices: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DiscoveryEvent::Device(d) => Some(d.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].address, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(devices[0].port, 554);
        assert_eq!(devices[0].brand, DeviceBrand::GenericRtsp);

        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DiscoveryEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(
            progress,
            vec![
                ScanProgress { scanned: 1, total: 2 },
                ScanProgress { scanned: 2, total: 2 },
            ]
        );

        let completions = events
            .iter()
            .filter(|e| matches!(e, DiscoveryEvent::Complete(_)))
            .count();
        assert_eq!(completions, 1);
        assert!(matches!(events.last(), Some(DiscoveryEvent::Complete(s)) if !s.cancelled));
    }

    #[tokio::test]
    async fn test_first_open_port_wins() {
        let prober = Arc::new(ScriptedProber::with_open(&[
            "10.0.0.1:34567",
            "10.0.0.1:554",
        ]));
        let engine = DiscoveryEngine::with_prober(prober.clone());
        let request = DiscoveryRequest::new(ranges(&["10.0.0.1/32"]));

        let outcome = engine.discover(request).unwrap().collect().await;

        assert_eq!(outcome.devices.len(), 1);
        assert_eq!(outcome.devices[0].port, 34567);
        assert_eq!(outcome.devices[0].brand, DeviceBrand::Dahua);
        // 8000 tried first, 554 never tried
        let ports: Vec<u16> = prober.calls().iter().map(|a| a.port()).collect();
        assert_eq!(ports, vec![8000, 34567]);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_reaches_total() {
        let prober = Arc::new(ScriptedProber::with_open(&["192.168.1.20:8000"]));
        let engine = DiscoveryEngine::with_prober(prober);
        let request = DiscoveryRequest::new(ranges(&["192.168.1.0/26", "192.168.2.0/28"]))
            .with_max_concurrency(7);

        let scan = engine.discover(request).unwrap();
        let total = scan.total();
        assert_eq!(total, 62 + 14);

        let events = drain(scan).await;
        let mut last = 0;
        for event in &events {
            if let DiscoveryEvent::Progress(p) = event {
                assert_eq!(p.scanned, last + 1);
                assert_eq!(p.total, total);
                last = p.scanned;
            }
        }
        assert_eq!(last, total);

        let DiscoveryEvent::Complete(summary) = events.last().unwrap() else {
            panic!("scan must end with a completion event");
        };
        assert_eq!(summary.scanned, total);
        assert_eq!(summary.devices_found, 1);
    }

    #[tokio::test]
    async fn test_overlapping_ranges_emit_device_once() {
        let prober = Arc::new(ScriptedProber::with_open(&["10.0.0.2:8000"]));
        let engine = DiscoveryEngine::with_prober(prober);
        let request = DiscoveryRequest::new(ranges(&["10.0.0.0/30", "10.0.0.0/30"]));

        let scan = engine.discover(request).unwrap();
        assert_eq!(scan.total(), 4);
        let outcome = scan.collect().await;

        assert_eq!(outcome.devices.len(), 1);
        assert_eq!(outcome.summary.scanned, 4);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let prober = Arc::new(ScriptedProber {
            delay: Duration::from_millis(5),
            ..Default::default()
        });
        let engine = DiscoveryEngine::with_prober(prober.clone());
        let request = DiscoveryRequest::new(ranges(&["10.1.0.0/26"]))
            .with_ports(vec![554])
            .with_max_concurrency(4);

        let outcome = engine.discover(request).unwrap().collect().await;

        assert!(outcome.devices.is_empty());
        assert_eq!(outcome.summary.scanned, 62);
        assert!(prober.peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn test_cancel_completes_without_probing_remaining_hosts() {
        let prober = Arc::new(ScriptedProber {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let engine = DiscoveryEngine::with_prober(prober.clone());
        let request = DiscoveryRequest::new(ranges(&["10.2.0.0/24"]))
            .with_ports(vec![554])
            .with_max_concurrency(2);

        let mut scan = engine.discover(request).unwrap();
        let canceller = scan.canceller();

        // Wait for the first result, then cancel
        loop {
            match scan.next_event().await {
                Some(DiscoveryEvent::Progress(_)) => break,
                Some(_) => continue,
                None => panic!("scan ended early"),
            }
        }
        canceller.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(DiscoveryEvent::Complete(summary)) = scan.next_event().await {
                    return summary;
                }
            }
        })
        .await
        .expect("completion after cancel");

        assert!(summary.cancelled);
        assert!(summary.scanned < 254);
        // At most the in-flight probes ran after cancellation
        assert!((prober.calls().len() as u64) <= summary.scanned + 2);
        assert!(scan.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_interface_ends_after_complete() {
        let prober = Arc::new(ScriptedProber::with_open(&["10.0.0.1:8000"]));
        let engine = DiscoveryEngine::with_prober(prober);
        let scan = engine
            .discover(DiscoveryRequest::new(ranges(&["10.0.0.0/30"])))
            .unwrap();

        let events: Vec<DiscoveryEvent> = StreamExt::collect(scan).await;
        assert!(matches!(events.last(), Some(DiscoveryEvent::Complete(_))));
        assert_eq!(events.len(), 1 + 2 + 1);
    }

    #[tokio::test]
    async fn test_real_tcp_probe_on_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let engine = DiscoveryEngine::new();
        let request = DiscoveryRequest::new(ranges(&["127.0.0.1/32"]))
            .with_ports(vec![port])
            .with_probe_timeout(Duration::from_secs(1));

        let outcome = engine.discover(request).unwrap().collect().await;
        assert_eq!(outcome.devices.len(), 1);
        assert_eq!(outcome.devices[0].brand, DeviceBrand::from_port(port));
    }

    #[test]
    fn test_invalid_requests_are_rejected() {
        let engine = DiscoveryEngine::new();
        assert!(matches!(
            engine.discover(DiscoveryRequest::new(Vec::new())),
            Err(DiscoveryError::NoRanges)
        ));
        assert!(matches!(
            engine.discover(DiscoveryRequest::new(ranges(&["10.0.0.0/30"])).with_ports(vec![])),
            Err(DiscoveryError::NoPorts)
        ));
        assert!(matches!(
            engine.discover(
                DiscoveryRequest::new(ranges(&["10.0.0.0/30"])).with_max_concurrency(0)
            ),
            Err(DiscoveryError::ZeroConcurrency)
        ));
    }

    #[test]
    fn test_percent() {
        assert_eq!(ScanProgress { scanned: 1, total: 4 }.percent(), 25);
        assert_eq!(ScanProgress { scanned: 0, total: 0 }.percent(), 100);
    }
}
