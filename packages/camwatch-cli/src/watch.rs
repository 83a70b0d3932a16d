//! Foreground dashboard mode
//!
//! Opens a session for every stored camera, prints the grid status on an
//! interval and closes every session on SIGTERM/SIGINT.

use crate::{open_store, OutputFormat};
use anyhow::{Context, Result};
use camwatch_core::config::AppConfig;
use camwatch_core::stream::frame::UNKNOWN_LABEL;
use camwatch_core::stream::NoopDetector;
use camwatch_core::{GridCompositor, GridSlot, SessionEvent, SessionRegistry};
use chrono::Local;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Run the dashboard until a shutdown signal arrives.
pub async fn run_watch(
    app_config: &AppConfig,
    grid_size: usize,
    refresh_secs: u64,
    format: OutputFormat,
) -> Result<()> {
    let compositor = GridCompositor::new(grid_size)?;

    let store = open_store(app_config)?;
    let cameras = store.load().context("Failed to load camera list")?;
    if cameras.is_empty() {
        eprintln!("No cameras configured.");
        eprintln!("Run 'camwatch discover --confirm' or 'camwatch cameras add' first.");
        return Ok(());
    }

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut registry = SessionRegistry::new(
        Arc::new(app_config.stream.connector()),
        Arc::new(NoopDetector),
        app_config.stream.session_settings(),
    )
    .with_events(events_tx)
    .with_max_cameras(app_config.dashboard.max_cameras);

    registry
        .replace(cameras)
        .context("Stored camera list cannot be opened")?;

    tracing::info!(
        "Watching {} cameras on a {}x{} grid",
        registry.len(),
        compositor.size(),
        compositor.size()
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut refresh = interval(Duration::from_secs(refresh_secs.max(1)));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = &mut shutdown => {
                match received {
                    Ok(name) => tracing::info!("Received {}, shutting down", name),
                    Err(e) => tracing::error!("Signal handling failed: {:#}", e),
                }
                break;
            }
            _ = refresh.tick() => {
                print_grid(&compositor.layout(&registry), compositor.size(), format);
            }
            Some(event) = events.recv() => log_event(event),
        }
    }

    registry.close_all();
    tracing::info!("All sessions closed");
    Ok(())
}

/// Resolve once SIGTERM or SIGINT is received.
#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    Ok("Ctrl+C")
}

fn log_event(event: SessionEvent) {
    match event {
        SessionEvent::StateChanged { camera, state, status } => {
            tracing::info!("[{}] {} ({})", camera, status, state);
        }
        SessionEvent::Detections {
            camera,
            frame_number,
            detections,
        } => {
            for detection in detections {
                let who = detection
                    .caption()
                    .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
                tracing::info!("[{}] Person Detected: {} at frame {}", camera, who, frame_number);
            }
        }
    }
}

fn print_grid(slots: &[GridSlot], size: usize, format: OutputFormat) {
    match format {
        OutputFormat::Text => {
            println!();
            println!("{0}x{0} grid at {1}", size, Local::now().format("%H:%M:%S"));
            for slot in slots {
                match &slot.session {
                    Some(view) => {
                        let snapshot = view.snapshot();
                        println!(
                            "  [{},{}] {:20} {:>8} frames  {}",
                            slot.row,
                            slot.col,
                            view.camera(),
                            snapshot.frames,
                            snapshot.status
                        );
                    }
                    None => println!("  [{},{}] No Feed", slot.row, slot.col),
                }
            }
        }
        OutputFormat::Json => {
            let cells: Vec<_> = slots
                .iter()
                .map(|slot| {
                    serde_json::json!({
                        "row": slot.row,
                        "col": slot.col,
                        "camera": slot.session.as_ref().map(|v| v.camera().to_string()),
                        "snapshot": slot.session.as_ref().map(|v| v.snapshot()),
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "time": Local::now().to_rfc3339(),
                    "grid_size": size,
                    "slots": cells,
                })
            );
        }
    }
}
