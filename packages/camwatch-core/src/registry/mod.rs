//! Active camera sessions and discovery confirmation.
//!
//! The registry owns one [`StreamSession`] per configured camera, in list
//! order. It is the only place the active camera list changes, and it always
//! closes a session before letting go of it.

mod grid;

pub use grid::{GridCompositor, GridError, GridSlot, MAX_GRID_SIZE};

use crate::camera::{CameraConfig, Credentials};
use crate::scanner::DiscoveredDevice;
use crate::stream::{
    Connector, Detector, SessionContext, SessionEvent, SessionSettings, SessionView, StreamSession,
};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("camera '{name}' resolves to the same stream as '{existing}'")]
    DuplicateStream { name: String, existing: String },
    #[error("a camera named '{0}' already exists")]
    DuplicateName(String),
    #[error("device {0} is already configured")]
    DuplicateAddress(String),
    #[error("camera limit of {0} reached")]
    LimitReached(usize),
    #[error("no camera named '{0}'")]
    UnknownCamera(String),
    #[error("invalid camera '{name}': {reason}")]
    InvalidConfig { name: String, reason: &'static str },
}

/// Turn a discovered device into a camera config using operator credentials.
///
/// Rejects devices whose address is already configured; discovery itself
/// never deduplicates against the camera list.
pub fn confirm_discovered<'a>(
    existing: impl IntoIterator<Item = &'a CameraConfig>,
    device: &DiscoveredDevice,
    credentials: Credentials,
) -> Result<CameraConfig, RegistryError> {
    let ip = device.address.to_string();
    if existing.into_iter().any(|camera| camera.has_address(&ip)) {
        return Err(RegistryError::DuplicateAddress(ip));
    }

    let name = credentials
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("{} NVR ({})", device.brand, ip));

    let mut config = CameraConfig::new(name, device.brand.camera_brand(), ip, device.port)
        .with_credentials(credentials.username, credentials.password)
        .with_channel(credentials.channel);
    config.added_at = Some(Utc::now());
    Ok(config)
}

/// Ordered set of live sessions, one per configured camera.
pub struct SessionRegistry {
    connector: Arc<dyn Connector>,
    detector: Arc<dyn Detector>,
    settings: SessionSettings,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
    max_cameras: Option<usize>,
    sessions: Vec<StreamSession>,
}

impl SessionRegistry {
    pub fn new(
        connector: Arc<dyn Connector>,
        detector: Arc<dyn Detector>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            connector,
            detector,
            settings,
            events: None,
            max_cameras: None,
            sessions: Vec::new(),
        }
    }

    /// Forward state changes and detections of every session to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_max_cameras(mut self, max_cameras: usize) -> Self {
        self.max_cameras = Some(max_cameras);
        self
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn cameras(&self) -> impl ExactSizeIterator<Item = &CameraConfig> {
        self.sessions.iter().map(StreamSession::config)
    }

    pub fn sessions(&self) -> &[StreamSession] {
        &self.sessions
    }

    pub fn get(&self, name: &str) -> Option<&StreamSession> {
        self.sessions.iter().find(|s| s.config().name == name)
    }

    pub fn views(&self) -> Vec<SessionView> {
        self.sessions.iter().map(StreamSession::view).collect()
    }

    /// Add a camera and open its session.
    pub fn add(&mut self, config: CameraConfig) -> Result<&StreamSession, RegistryError> {
        check_admission(self.cameras(), &config, self.max_cameras)?;

        tracing::info!("Adding camera '{}' ({})", config.name, config.redacted_url());
        let session = self.open_session(config);
        self.sessions.push(session);
        Ok(&self.sessions[self.sessions.len() - 1])
    }

    /// Confirm a discovered device with operator credentials and add it.
    pub fn confirm(
        &mut self,
        device: &DiscoveredDevice,
        credentials: Credentials,
    ) -> Result<&StreamSession, RegistryError> {
        let config = confirm_discovered(self.cameras(), device, credentials)?;
        self.add(config)
    }

    /// Close and drop the named camera's session.
    pub fn remove(&mut self, name: &str) -> Result<CameraConfig, RegistryError> {
        let index = self
            .sessions
            .iter()
            .position(|s| s.config().name == name)
            .ok_or_else(|| RegistryError::UnknownCamera(name.to_string()))?;

        let session = self.sessions.remove(index);
        session.close();
        tracing::info!("Removed camera '{}'", name);
        Ok(session.config().clone())
    }

    /// Replace the whole camera list, e.g. after reloading the store.
    ///
    /// The new list is validated first; on error nothing changes. Sessions
    /// whose config is unchanged keep running. Every other session is closed
    /// before any new one opens.
    pub fn replace(&mut self, configs: Vec<CameraConfig>) -> Result<(), RegistryError> {
        if let Some(limit) = self.max_cameras {
            if configs.len() > limit {
                return Err(RegistryError::LimitReached(limit));
            }
        }
        for (i, config) in configs.iter().enumerate() {
            check_valid(config)?;
            check_conflicts(&configs[..i], config)?;
        }

        let mut current: Vec<Option<StreamSession>> =
            std::mem::take(&mut self.sessions).into_iter().map(Some).collect();

        // Pair each new config with an identical running session, if any
        let mut kept: HashSet<usize> = HashSet::new();
        let pairing: Vec<Option<usize>> = configs
            .iter()
            .map(|config| {
                let found = current.iter().enumerate().position(|(i, s)| {
                    !kept.contains(&i) && s.as_ref().is_some_and(|s| s.config() == config)
                });
                if let Some(i) = found {
                    kept.insert(i);
                }
                found
            })
            .collect();

        let mut closed = 0;
        for (i, slot) in current.iter_mut().enumerate() {
            if !kept.contains(&i) {
                if let Some(session) = slot.take() {
                    session.close();
                    closed += 1;
                }
            }
        }

        let mut opened = 0;
        for (config, paired) in configs.into_iter().zip(pairing) {
            let session = match paired.and_then(|i| current[i].take()) {
                Some(session) => session,
                None => {
                    opened += 1;
                    self.open_session(config)
                }
            };
            self.sessions.push(session);
        }

        tracing::info!(
            "Camera list replaced: {} kept, {} closed, {} opened",
            kept.len(),
            closed,
            opened
        );
        Ok(())
    }

    /// Close every session and empty the registry.
    pub fn close_all(&mut self) {
        for session in self.sessions.drain(..) {
            session.close();
        }
    }

    fn open_session(&self, config: CameraConfig) -> StreamSession {
        StreamSession::open(
            config,
            SessionContext {
                connector: self.connector.clone(),
                detector: self.detector.clone(),
                settings: self.settings.clone(),
                events: self.events.clone(),
            },
        )
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Check whether `config` may join the `existing` camera list.
///
/// Applies the same rules as [`SessionRegistry::add`] without opening a
/// session, so callers editing a stored list reject the same cameras.
pub fn check_admission<'a, I>(
    existing: I,
    config: &CameraConfig,
    max_cameras: Option<usize>,
) -> Result<(), RegistryError>
where
    I: IntoIterator<Item = &'a CameraConfig>,
    I::IntoIter: ExactSizeIterator,
{
    check_valid(config)?;
    let existing = existing.into_iter();
    if let Some(limit) = max_cameras {
        if existing.len() >= limit {
            return Err(RegistryError::LimitReached(limit));
        }
    }
    check_conflicts(existing, config)
}

fn check_valid(config: &CameraConfig) -> Result<(), RegistryError> {
    config
        .validate()
        .map_err(|reason| RegistryError::InvalidConfig {
            name: config.name.clone(),
            reason,
        })
}

/// Reject a camera that shares a name, stream identity or URL with `existing`.
fn check_conflicts<'a>(
    existing: impl IntoIterator<Item = &'a CameraConfig>,
    config: &CameraConfig,
) -> Result<(), RegistryError> {
    let key = config.stream_key();
    let url = config.stream_url();
    for other in existing {
        if other.name == config.name {
            return Err(RegistryError::DuplicateName(config.name.clone()));
        }
        if other.stream_key() == key || other.stream_url() == url {
            return Err(RegistryError::DuplicateStream {
                name: config.name.clone(),
                existing: other.name.clone(),
            });
        }
    }
    Ok(())
}
