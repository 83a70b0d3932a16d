//! Camwatch Core Library
//!
//! Building blocks for a multi-camera surveillance dashboard:
//! - Discovery of IP cameras and NVRs by concurrent TCP port probing
//! - Camera model with per-brand RTSP URL templates
//! - Self-healing stream sessions with throttled face detection
//! - A session registry and grid compositor for the display wall
//! - A JSON camera store and TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use camwatch_core::scanner::{DiscoveryEngine, DiscoveryRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let request = DiscoveryRequest::new(vec!["192.168.1.0/24".parse()?]);
//!     let scan = DiscoveryEngine::new().discover(request)?;
//!
//!     let outcome = scan.collect().await;
//!     for device in &outcome.devices {
//!         println!("{} {}:{}", device.brand, device.address, device.port);
//!     }
//!     Ok(())
//! }
//! ```

pub mod camera;
pub mod config;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod stream;

// Re-export commonly used types
pub use camera::{CameraBrand, CameraConfig, Credentials};
pub use config::{AppConfig, ConfigSource};
pub use registry::{GridCompositor, GridSlot, RegistryError, SessionRegistry, check_admission, confirm_discovered};
pub use scanner::{DiscoveredDevice, DiscoveryEngine, DiscoveryEvent, DiscoveryRequest};
pub use store::{CameraStore, StoreError};
pub use stream::{SessionEvent, SessionState, SessionView, StreamSession};
