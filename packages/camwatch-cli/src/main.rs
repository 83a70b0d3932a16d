//! camwatch CLI - terminal front end for the camwatch dashboard core
//!
//! This binary can:
//! - Discover IP cameras and NVRs on the local network
//! - Manage the stored camera list
//! - Watch every configured stream on a grid until interrupted

mod watch;

use anyhow::{Context, Result};
use camwatch_core::config::{self, AppConfig};
use camwatch_core::scanner::{DiscoveredDevice, DiscoveryEngine, DiscoveryEvent, ScanSummary};
use camwatch_core::{CameraBrand, CameraConfig, CameraStore, Credentials};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "camwatch")]
#[command(author = "camwatch contributors")]
#[command(version)]
#[command(about = "Discover IP cameras and watch their streams")]
#[command(long_about = "
camwatch finds IP cameras and NVRs on the local network, keeps a list of
configured cameras, and streams all of them onto a grid with automatic
reconnection.

Quick start:
  1. Find cameras:     camwatch discover --confirm
  2. Check the list:   camwatch cameras list
  3. Watch the grid:   camwatch watch --grid 2
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan network ranges for cameras
    #[command(alias = "scan")]
    Discover(DiscoverArgs),

    /// Manage the stored camera list
    Cameras {
        #[command(subcommand)]
        action: CameraCommand,
    },

    /// Stream every configured camera onto a grid
    Watch {
        /// Grid dimension (1-8); defaults to the configured size
        #[arg(short, long)]
        grid: Option<usize>,

        /// Seconds between status refreshes
        #[arg(short, long, default_value = "2")]
        refresh_secs: u64,
    },

    /// Show configuration paths and settings
    Config,
}

#[derive(Args)]
pub struct DiscoverArgs {
    /// Network range in CIDR form (repeatable); defaults to the configured networks
    #[arg(short, long = "range", value_name = "CIDR")]
    ranges: Vec<String>,

    /// Port to probe, in priority order (repeatable)
    #[arg(short, long = "port", value_name = "PORT")]
    ports: Vec<u16>,

    /// Per-connection probe timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Maximum number of hosts probed at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Prompt for credentials and save each new device as a camera
    #[arg(long)]
    confirm: bool,
}

#[derive(Subcommand)]
pub enum CameraCommand {
    /// List stored cameras
    List,

    /// Add a camera
    Add {
        /// Display name
        name: String,

        /// Camera IP address or hostname
        #[arg(long)]
        ip: String,

        /// Brand (Generic, Hikvision, Dahua, Axis, TP-Link, Reolink, Amcrest, Ezviz)
        #[arg(short, long, default_value = "Generic")]
        brand: String,

        #[arg(long, default_value = "554")]
        port: u16,

        #[arg(short, long, default_value = "admin")]
        username: String,

        #[arg(long, default_value = "")]
        password: String,

        #[arg(short, long, default_value = "1")]
        channel: u32,

        /// Free-form location note
        #[arg(short, long)]
        location: Option<String>,
    },

    /// Remove a camera by name
    #[command(alias = "rm")]
    Remove { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("camwatch={},camwatch_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .init();

    let app_config = config::load_config();

    match &cli.command {
        Commands::Discover(args) => cmd_discover(&cli, &app_config, args).await,
        Commands::Cameras { action } => cmd_cameras(&cli, &app_config, action),
        Commands::Watch { grid, refresh_secs } => {
            let grid = grid.unwrap_or(app_config.dashboard.grid_size);
            watch::run_watch(&app_config, grid, *refresh_secs, cli.format).await
        }
        Commands::Config => cmd_config(&cli, &app_config),
    }
}

fn open_store(app_config: &AppConfig) -> Result<CameraStore> {
    app_config
        .data_dir
        .as_ref()
        .map(CameraStore::new)
        .context("No data directory available; set CAMWATCH_DATA_DIR")
}

async fn cmd_discover(cli: &Cli, app_config: &AppConfig, args: &DiscoverArgs) -> Result<()> {
    let mut discovery = app_config.discovery.clone();
    if !args.ranges.is_empty() {
        discovery.networks = args.ranges.clone();
    }
    if !args.ports.is_empty() {
        discovery.ports = args.ports.clone();
    }
    if let Some(timeout_ms) = args.timeout_ms {
        discovery.probe_timeout_ms = timeout_ms;
    }
    if let Some(concurrency) = args.concurrency {
        discovery.max_concurrency = concurrency;
    }

    let request = discovery.request().context("Invalid network range")?;
    let mut scan = DiscoveryEngine::new().discover(request)?;

    match cli.format {
        OutputFormat::Text => println!(
            "Scanning {} hosts in {} on ports {:?}...",
            scan.total(),
            discovery.networks.join(", "),
            discovery.ports
        ),
        OutputFormat::Json => {}
    }

    // Ctrl+C stops probing; results found so far are still reported
    let canceller = scan.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let mut devices: Vec<DiscoveredDevice> = Vec::new();
    let mut summary: Option<ScanSummary> = None;
    let mut last_percent = 0;

    while let Some(event) = scan.next().await {
        match event {
            DiscoveryEvent::Device(device) => {
                if let OutputFormat::Text = cli.format {
                    println!("  Found {} at {}:{}", device.brand, device.address, device.port);
                }
                devices.push(device);
            }
            DiscoveryEvent::Progress(progress) => {
                let percent = progress.percent();
                if let OutputFormat::Text = cli.format {
                    if percent >= last_percent + 10 {
                        println!("  [{:>3}%] {}/{} hosts", percent, progress.scanned, progress.total);
                        last_percent = percent - percent % 10;
                    }
                }
            }
            DiscoveryEvent::Complete(done) => summary = Some(done),
        }
    }

    match cli.format {
        OutputFormat::Text => {
            println!();
            if let Some(summary) = &summary {
                let verb = if summary.cancelled { "Cancelled" } else { "Finished" };
                println!(
                    "{} after {}/{} hosts in {:.1}s",
                    verb,
                    summary.scanned,
                    summary.total,
                    summary.elapsed.as_secs_f64()
                );
            }
            println!("Found {} devices", devices.len());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "devices": devices,
                    "summary": summary,
                })
            );
        }
    }

    if args.confirm && !devices.is_empty() {
        confirm_devices(app_config, &devices).await?;
    }

    Ok(())
}

/// Ask the operator for credentials per device and store confirmed cameras.
async fn confirm_devices(app_config: &AppConfig, devices: &[DiscoveredDevice]) -> Result<()> {
    let store = open_store(app_config)?;
    let mut cameras = store.load().context("Failed to load camera list")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut added = 0;

    for device in devices {
        eprintln!();
        eprintln!("{} at {}:{}", device.brand, device.address, device.port);

        let username = prompt(&mut lines, "  Username (blank to skip): ").await?;
        if username.is_empty() {
            continue;
        }
        let password = prompt(&mut lines, "  Password: ").await?;
        let name = prompt(&mut lines, "  Name (blank for default): ").await?;

        let mut credentials = Credentials::new(username, password);
        if !name.is_empty() {
            credentials = credentials.with_name(name);
        }

        let camera = match camwatch_core::confirm_discovered(&cameras, device, credentials).and_then(|camera| {
            camwatch_core::check_admission(&cameras, &camera, Some(app_config.dashboard.max_cameras))
                .map(|_| camera)
        }) {
            Ok(camera) => camera,
            Err(e) => {
                eprintln!("  Skipped: {}", e);
                continue;
            }
        };

        eprintln!("  Added '{}'", camera.name);
        cameras.push(camera);
        added += 1;
    }

    if added > 0 {
        store.save(&cameras).context("Failed to save camera list")?;
        eprintln!();
        eprintln!("Saved {} new cameras to {}", added, store.path().display());
    }
    Ok(())
}

async fn prompt<R>(lines: &mut tokio::io::Lines<R>, label: &str) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut stderr = tokio::io::stderr();
    stderr.write_all(label.as_bytes()).await?;
    stderr.flush().await?;
    let line = lines.next_line().await?.unwrap_or_default();
    Ok(line.trim().to_string())
}

/// Camera as shown to the operator; never carries the password.
#[derive(Serialize)]
struct CameraRow<'a> {
    name: &'a str,
    brand: CameraBrand,
    ip: &'a str,
    port: u16,
    username: &'a str,
    channel: u32,
    location: Option<&'a str>,
    rtsp_url: String,
}

impl<'a> From<&'a CameraConfig> for CameraRow<'a> {
    fn from(camera: &'a CameraConfig) -> Self {
        Self {
            name: &camera.name,
            brand: camera.brand,
            ip: &camera.ip,
            port: camera.port,
            username: &camera.username,
            channel: camera.channel,
            location: camera.location.as_deref(),
            rtsp_url: camera.redacted_url(),
        }
    }
}

fn cmd_cameras(cli: &Cli, app_config: &AppConfig, action: &CameraCommand) -> Result<()> {
    let store = open_store(app_config)?;

    match action {
        CameraCommand::List => {
            let cameras = store.load().context("Failed to load camera list")?;
            match cli.format {
                OutputFormat::Text => {
                    if cameras.is_empty() {
                        println!("No cameras configured.");
                        println!("Run 'camwatch discover --confirm' or 'camwatch cameras add'.");
                    }
                    for camera in &cameras {
                        let location = camera.location.as_deref().unwrap_or("-");
                        println!(
                            "  {:20} {:10} {:>21}  {:12} {}",
                            camera.name,
                            camera.brand.label(),
                            format!("{}:{}", camera.ip, camera.port),
                            location,
                            camera.redacted_url()
                        );
                    }
                }
                OutputFormat::Json => {
                    let rows: Vec<CameraRow> = cameras.iter().map(CameraRow::from).collect();
                    println!("{}", serde_json::json!({ "cameras": rows }));
                }
            }
        }
        CameraCommand::Add {
            name,
            ip,
            brand,
            port,
            username,
            password,
            channel,
            location,
        } => {
            let mut camera = CameraConfig::new(name.trim(), CameraBrand::from_label(brand), ip.trim(), *port)
                .with_credentials(username.as_str(), password.as_str())
                .with_channel(*channel);
            if let Some(location) = location {
                camera = camera.with_location(location.as_str());
            }
            camera.added_at = Some(Utc::now());

            let mut cameras = store.load().context("Failed to load camera list")?;
            camwatch_core::check_admission(&cameras, &camera, Some(app_config.dashboard.max_cameras))?;

            match cli.format {
                OutputFormat::Text => println!("Added '{}' ({})", camera.name, camera.redacted_url()),
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "added": CameraRow::from(&camera) }));
                }
            }
            cameras.push(camera);
            store.save(&cameras).context("Failed to save camera list")?;
        }
        CameraCommand::Remove { name } => {
            let removed = store.remove(name).context("Failed to update camera list")?;
            match (removed, cli.format) {
                (Some(camera), OutputFormat::Text) => println!("Removed '{}'", camera.name),
                (Some(camera), OutputFormat::Json) => {
                    println!("{}", serde_json::json!({ "removed": camera.name }));
                }
                (None, _) => anyhow::bail!("No camera named '{}'", name),
            }
        }
    }

    Ok(())
}

fn cmd_config(cli: &Cli, app_config: &AppConfig) -> Result<()> {
    let config_path = config::get_config_file_path_string();
    let data_dir = app_config
        .data_dir
        .as_ref()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "-".to_string());

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:    {} (settings from {})", config_path, app_config.source);
            println!("Data directory: {} (from {})", data_dir, app_config.data_dir_source);
            println!();
            println!("Networks:       {}", app_config.discovery.networks.join(", "));
            println!("Ports:          {:?}", app_config.discovery.ports);
            println!(
                "Probing:        {}ms timeout, {} at once",
                app_config.discovery.probe_timeout_ms, app_config.discovery.max_concurrency
            );
            println!(
                "Streams:        {} every {}ms, detection every {} frames, {}x{}",
                app_config.stream.ffmpeg_path,
                app_config.stream.frame_interval_ms,
                app_config.stream.detect_every,
                app_config.stream.frame_width,
                app_config.stream.frame_height
            );
            println!(
                "Reconnect:      {}ms connect timeout, {}ms between attempts",
                app_config.stream.connect_timeout_ms, app_config.stream.retry_delay_ms
            );
            println!(
                "Dashboard:      {0}x{0} grid, at most {1} cameras",
                app_config.dashboard.grid_size, app_config.dashboard.max_cameras
            );
            println!();
            println!("Environment variables:");
            println!("  {} - Use another config file", config::ENV_CONFIG_PATH);
            println!("  {} - Override data directory", config::ENV_DATA_DIR);
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "source": format!("{}", app_config.source),
                    "data_dir": app_config.data_dir,
                    "data_dir_source": format!("{}", app_config.data_dir_source),
                    "discovery": app_config.discovery,
                    "stream": app_config.stream,
                    "dashboard": app_config.dashboard,
                })
            );
        }
    }

    Ok(())
}
