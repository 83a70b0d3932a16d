//! Per-camera stream sessions.
//!
//! A [`StreamSession`] owns one camera's transport and a background task
//! that connects, pumps frames on a fixed cadence, runs throttled detection
//! and reconnects after failures:
//!
//! ```text
//! Initializing -> Connected <-> Reconnecting
//!        \             |             /
//!         `--------> Closed <-------'   (only via close())
//! ```
//!
//! Retries are unbounded with a constant delay between attempts. Only an
//! explicit [`StreamSession::close`] reaches `Closed`.

mod detector;
mod ffmpeg;
pub mod frame;
mod glyphs;
mod transport;

pub use detector::{Detector, NoopDetector};
pub use ffmpeg::FfmpegConnector;
pub use frame::{AnnotatedFrame, Detection, Frame, GrayFrame, Rect};
pub use transport::{Connector, Transport, TransportError};

use crate::camera::CameraConfig;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const STATUS_INITIALIZING: &str = "Initializing stream...";
pub const STATUS_CONNECTED: &str = "Connected";
pub const STATUS_RECONNECTING: &str = "Reconnecting...";
pub const STATUS_CLOSED: &str = "Closed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Connected,
    Reconnecting,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Initializing => write!(f, "initializing"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time view of a session, published on every change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Human-readable status line for display.
    pub status: String,
    /// Frames read since the session opened, across reconnects.
    pub frames: u64,
    pub reconnect_attempts: u64,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    fn initial() -> Self {
        Self {
            state: SessionState::Initializing,
            status: STATUS_INITIALIZING.to_string(),
            frames: 0,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}

/// Notifications pushed to the registry-wide event channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        camera: String,
        state: SessionState,
        status: String,
    },
    Detections {
        camera: String,
        frame_number: u64,
        detections: Vec<Detection>,
    },
}

/// Timing knobs for a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Cadence of frame reads.
    pub frame_interval: Duration,
    /// Run detection on every Nth frame (minimum 1).
    pub detect_every: u64,
    /// Upper bound for a single connect attempt.
    pub connect_timeout: Duration,
    /// Constant pause between connect attempts.
    pub retry_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(60),
            detect_every: 2,
            connect_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Everything a session needs besides its camera.
#[derive(Clone)]
pub struct SessionContext {
    pub connector: Arc<dyn Connector>,
    pub detector: Arc<dyn Detector>,
    pub settings: SessionSettings,
    pub events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

#[derive(Default)]
struct TransportSlot {
    closed: bool,
    transport: Option<Arc<dyn Transport>>,
}

/// State shared between the session handle, its task and any views.
struct Shared {
    camera: String,
    slot: Mutex<TransportSlot>,
    snapshot: watch::Sender<SessionSnapshot>,
    latest: Mutex<Option<Arc<AnnotatedFrame>>>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Shared {
    /// Apply a state change unless the session is already closed.
    fn set_state(&self, state: SessionState, status: &str, error: Option<String>) {
        let changed = self.snapshot.send_if_modified(|snap| {
            if snap.state == SessionState::Closed {
                return false;
            }
            let changed = snap.state != state || snap.status != status;
            snap.state = state;
            snap.status = status.to_string();
            if error.is_some() {
                snap.last_error = error;
            }
            changed
        });

        if changed {
            tracing::debug!("[{}] {} ({})", self.camera, state, status);
            self.emit(SessionEvent::StateChanged {
                camera: self.camera.clone(),
                state,
                status: status.to_string(),
            });
        }
    }

    fn update(&self, apply: impl FnOnce(&mut SessionSnapshot)) {
        self.snapshot.send_if_modified(|snap| {
            if snap.state == SessionState::Closed {
                return false;
            }
            apply(snap);
            true
        });
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Hand a freshly opened transport to the session.
    ///
    /// If the session closed while the open was in flight, the transport is
    /// released here and `false` is returned.
    fn install(&self, transport: Arc<dyn Transport>) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.closed {
            drop(slot);
            transport.release();
            return false;
        }
        slot.transport = Some(transport);
        true
    }

    /// Release a failed transport, unless `close` already took it.
    fn discard(&self, transport: &Arc<dyn Transport>) {
        let taken = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            let current = slot
                .transport
                .as_ref()
                .is_some_and(|t| Arc::ptr_eq(t, transport));
            if current { slot.transport.take() } else { None }
        };
        if let Some(transport) = taken {
            transport.release();
        }
    }

    /// Mark closed and release the transport. Returns false if already closed.
    fn close(&self) -> bool {
        let transport = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.closed {
                return false;
            }
            slot.closed = true;
            slot.transport.take()
        };
        if let Some(transport) = transport {
            transport.release();
        }
        self.set_state(SessionState::Closed, STATUS_CLOSED, None);
        true
    }

    fn publish(&self, frame: AnnotatedFrame) {
        let frame_number = frame.frame_number;
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(frame));
        self.update(|snap| snap.frames = frame_number);
    }

    fn latest_frame(&self) -> Option<Arc<AnnotatedFrame>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Non-owning handle for observing a session, e.g. from a grid slot.
#[derive(Clone)]
pub struct SessionView {
    shared: Arc<Shared>,
}

impl SessionView {
    pub fn camera(&self) -> &str {
        &self.shared.camera
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.snapshot.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Most recent annotated frame. Survives reconnects.
    pub fn latest_frame(&self) -> Option<Arc<AnnotatedFrame>> {
        self.shared.latest_frame()
    }
}

impl fmt::Debug for SessionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionView")
            .field("camera", &self.shared.camera)
            .field("state", &self.state())
            .finish()
    }
}

/// A live connection to one camera.
pub struct StreamSession {
    config: CameraConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamSession {
    /// Start connecting in the background and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(config: CameraConfig, context: SessionContext) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::initial());
        let shared = Arc::new(Shared {
            camera: config.name.clone(),
            slot: Mutex::new(TransportSlot::default()),
            snapshot,
            latest: Mutex::new(None),
            events: context.events.clone(),
        });
        shared.emit(SessionEvent::StateChanged {
            camera: config.name.clone(),
            state: SessionState::Initializing,
            status: STATUS_INITIALIZING.to_string(),
        });

        tracing::info!("[{}] Opening {}", config.name, config.redacted_url());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_session(
            shared.clone(),
            context,
            config.stream_url(),
            cancel.clone(),
        ));

        Self {
            config,
            shared,
            cancel,
            task,
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.shared.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn latest_frame(&self) -> Option<Arc<AnnotatedFrame>> {
        self.shared.latest_frame()
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            shared: self.shared.clone(),
        }
    }

    /// Close the session from any state.
    ///
    /// Releases the transport before returning and stops the background
    /// task, so no in-flight reconnect can revive the session. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        if self.shared.close() {
            tracing::info!("[{}] Session closed", self.config.name);
        }
        self.task.abort();
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("camera", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Throttled detection with cached results for the frames in between.
struct DetectionPipeline {
    detector: Arc<dyn Detector>,
    every: u64,
    frame_counter: u64,
    cached: Vec<Detection>,
}

impl DetectionPipeline {
    async fn process(&mut self, shared: &Shared, frame: Frame) -> AnnotatedFrame {
        self.frame_counter += 1;
        let frame_number = self.frame_counter;

        if frame_number % self.every == 0 {
            let gray = frame.to_gray();
            let detector = self.detector.clone();
            match tokio::task::spawn_blocking(move || detector.detect(&gray)).await {
                Ok(detections) => {
                    if !detections.is_empty() {
                        shared.emit(SessionEvent::Detections {
                            camera: shared.camera.clone(),
                            frame_number,
                            detections: detections.clone(),
                        });
                    }
                    self.cached = detections;
                }
                Err(e) => {
                    tracing::warn!("[{}] Detector failed on frame {}: {}", shared.camera, frame_number, e);
                }
            }
        }

        let mut frame = frame;
        frame::annotate(&mut frame, &self.cached);
        AnnotatedFrame {
            frame_number,
            frame,
            detections: self.cached.clone(),
        }
    }
}

async fn run_session(
    shared: Arc<Shared>,
    context: SessionContext,
    url: String,
    cancel: CancellationToken,
) {
    let settings = context.settings;
    let mut pipeline = DetectionPipeline {
        detector: context.detector,
        every: settings.detect_every.max(1),
        frame_counter: 0,
        cached: Vec::new(),
    };
    let mut first_attempt = true;

    loop {
        if !first_attempt {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = sleep(settings.retry_delay) => {}
            }
            shared.update(|snap| snap.reconnect_attempts += 1);
        }
        first_attempt = false;

        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            result = timeout(settings.connect_timeout, context.connector.open(&url)) => {
                result.unwrap_or(Err(TransportError::Timeout(settings.connect_timeout)))
            }
        };

        let transport = match opened {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!("[{}] Connection failed: {}", shared.camera, e);
                let reason = e.to_string();
                shared.set_state(
                    SessionState::Reconnecting,
                    &format!("Connection Error: {}", reason),
                    Some(reason),
                );
                continue;
            }
        };

        if !shared.install(transport.clone()) {
            return;
        }
        tracing::info!("[{}] Connected", shared.camera);
        shared.set_state(SessionState::Connected, STATUS_CONNECTED, None);

        let Some(error) = pump(&shared, transport.as_ref(), &mut pipeline, &settings, &cancel).await
        else {
            return;
        };

        tracing::warn!("[{}] Stream read failed: {}", shared.camera, error);
        shared.discard(&transport);
        shared.set_state(
            SessionState::Reconnecting,
            STATUS_RECONNECTING,
            Some(error.to_string()),
        );
    }
}

/// Read frames until the transport fails (`Some`) or the session is cancelled (`None`).
async fn pump(
    shared: &Shared,
    transport: &dyn Transport,
    pipeline: &mut DetectionPipeline,
    settings: &SessionSettings,
    cancel: &CancellationToken,
) -> Option<TransportError> {
    let period = settings.frame_interval.max(Duration::from_millis(1));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = ticker.tick() => {}
        }

        let frame = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = transport.read_frame() => match result {
                Ok(frame) => frame,
                Err(e) => return Some(e),
            },
        };

        let annotated = pipeline.process(shared, frame).await;
        shared.publish(annotated);
    }
}
