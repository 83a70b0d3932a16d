//! Application configuration.
//!
//! Priority:
//! 1. Environment variables (`CAMWATCH_CONFIG`, `CAMWATCH_DATA_DIR`)
//! 2. Config file (`~/.config/camwatch/config.toml`)
//! 3. Defaults

use crate::scanner::{
    DiscoveryRequest, NetworkRange, RangeError, DEFAULT_MAX_CONCURRENCY, DEFAULT_PORTS,
};
use crate::stream::{FfmpegConnector, SessionSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable selecting an alternate config file
pub const ENV_CONFIG_PATH: &str = "CAMWATCH_CONFIG";

/// Environment variable overriding the data directory
pub const ENV_DATA_DIR: &str = "CAMWATCH_DATA_DIR";

/// Networks scanned when none are configured
pub const DEFAULT_NETWORKS: [&str; 3] = ["192.168.1.0/24", "192.168.0.0/24", "10.0.0.0/24"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub networks: Vec<String>,
    pub ports: Vec<u16>,
    pub probe_timeout_ms: u64,
    pub max_concurrency: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            networks: DEFAULT_NETWORKS.iter().map(|s| s.to_string()).collect(),
            ports: DEFAULT_PORTS.to_vec(),
            probe_timeout_ms: 300,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl DiscoveryConfig {
    /// Build a discovery request from the configured networks.
    pub fn request(&self) -> Result<DiscoveryRequest, RangeError> {
        let ranges = self
            .networks
            .iter()
            .map(|n| n.parse::<NetworkRange>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DiscoveryRequest::new(ranges)
            .with_ports(self.ports.clone())
            .with_probe_timeout(Duration::from_millis(self.probe_timeout_ms))
            .with_max_concurrency(self.max_concurrency))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub frame_interval_ms: u64,
    pub detect_every: u64,
    pub connect_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub ffmpeg_path: String,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 60,
            detect_every: 2,
            connect_timeout_ms: 10_000,
            retry_delay_ms: 1_000,
            ffmpeg_path: "ffmpeg".to_string(),
            frame_width: 640,
            frame_height: 480,
        }
    }
}

impl StreamConfig {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            detect_every: self.detect_every,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn connector(&self) -> FfmpegConnector {
        FfmpegConnector::new(self.ffmpeg_path.clone(), self.frame_width, self.frame_height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub grid_size: usize,
    pub max_cameras: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            grid_size: 2,
            max_cameras: 5,
        }
    }
}

/// Configuration file structure
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    discovery: DiscoveryConfig,
    stream: StreamConfig,
    dashboard: DashboardConfig,
}

/// Where a configuration value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from environment variable
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Effective runtime configuration
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub discovery: DiscoveryConfig,
    pub stream: StreamConfig,
    pub dashboard: DashboardConfig,
    /// Resolved data directory (`None` if no platform default exists)
    pub data_dir: Option<PathBuf>,
    /// Source of the discovery/stream/dashboard settings
    pub source: ConfigSource,
    /// Source of `data_dir`
    pub data_dir_source: ConfigSource,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig::default(),
            stream: StreamConfig::default(),
            dashboard: DashboardConfig::default(),
            data_dir: crate::store::default_data_dir(),
            source: ConfigSource::Default,
            data_dir_source: ConfigSource::Default,
        }
    }
}

/// Get the path to the configuration file
pub fn get_config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        let path = path.trim();
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("camwatch").join("config.toml"))
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/camwatch/config.toml".to_string())
}

/// Load configuration from the environment, config file and defaults.
pub fn load_config() -> AppConfig {
    let data_dir_override = std::env::var(ENV_DATA_DIR)
        .ok()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .map(PathBuf::from);

    load_config_with(get_config_file_path().as_deref(), data_dir_override)
}

fn load_config_with(config_path: Option<&Path>, data_dir_override: Option<PathBuf>) -> AppConfig {
    let mut config = AppConfig::default();

    if let Some(file) = config_path.and_then(load_config_file) {
        config.discovery = file.discovery;
        config.stream = file.stream;
        config.dashboard = file.dashboard;
        config.source = ConfigSource::ConfigFile;
        if let Some(dir) = file.data_dir {
            config.data_dir = Some(dir);
            config.data_dir_source = ConfigSource::ConfigFile;
        }
    }

    if let Some(dir) = data_dir_override {
        tracing::info!("Using data directory from environment variable: {:?}", dir);
        config.data_dir = Some(dir);
        config.data_dir_source = ConfigSource::Environment;
    }

    sanitize(&mut config);
    config
}

/// Load configuration from the config file
fn load_config_file(path: &Path) -> Option<ConfigFile> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Replace values that would make the engine or sessions unusable.
fn sanitize(config: &mut AppConfig) {
    let defaults = AppConfig::default();

    if config.discovery.max_concurrency == 0 {
        tracing::warn!("discovery.max_concurrency must be at least 1, using default");
        config.discovery.max_concurrency = defaults.discovery.max_concurrency;
    }
    if config.discovery.ports.is_empty() {
        tracing::warn!("discovery.ports is empty, using default ports");
        config.discovery.ports = defaults.discovery.ports;
    }
    if config.stream.detect_every == 0 {
        tracing::warn!("stream.detect_every must be at least 1, using 1");
        config.stream.detect_every = 1;
    }
    if config.stream.frame_width == 0 || config.stream.frame_height == 0 {
        tracing::warn!("stream frame size must be non-zero, using default");
        config.stream.frame_width = defaults.stream.frame_width;
        config.stream.frame_height = defaults.stream.frame_height;
    }
    if !(1..=crate::registry::MAX_GRID_SIZE).contains(&config.dashboard.grid_size) {
        tracing::warn!(
            "dashboard.grid_size {} out of range, using default",
            config.dashboard.grid_size
        );
        config.dashboard.grid_size = defaults.dashboard.grid_size;
    }
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# camwatch configuration
# Place this file at: ~/.config/camwatch/config.toml
# (or point CAMWATCH_CONFIG at another file)

# Directory holding cameras.json (CAMWATCH_DATA_DIR overrides this)
# data_dir = "/var/lib/camwatch"

[discovery]
# networks = ["192.168.1.0/24", "192.168.0.0/24", "10.0.0.0/24"]
# Ports are tried in order; the first open port decides the brand
# ports = [8000, 34567, 37777, 554]
# probe_timeout_ms = 300
# max_concurrency = 50

[stream]
# frame_interval_ms = 60
# Run face detection on every Nth frame
# detect_every = 2
# connect_timeout_ms = 10000
# Constant pause between reconnect attempts (retries are unlimited)
# retry_delay_ms = 1000
# ffmpeg_path = "ffmpeg"
# frame_width = 640
# frame_height = 480

[dashboard]
# grid_size = 2
# max_cameras = 5
"#
    .to_string()
}
