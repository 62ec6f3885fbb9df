//! machud - restores the classic volume/brightness HUD on macOS
//!
//! Standalone monitor host: watches hardware state, decides which changes
//! deserve an overlay, and narrates decisions through the console surface.
//! A real overlay window plugs in behind `overlay::Surface`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use machud::config::{AppConfig, ConfigWatcher};
use machud::hud::HudEngine;
use machud::overlay::console::ConsoleSurface;
use machud::overlay::placement::StaticDisplays;
use machud::overlay::Presenter;
use machud::platform;

/// machud - volume/brightness HUD monitoring daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// One-shot hardware readout, then exit
    #[arg(long)]
    probe: bool,

    /// Print every HUD decision to the console
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let _log_guard = init_logging(&args)?;

    if args.probe {
        return probe();
    }

    info!("Starting machud...");

    let config_path = args.config.clone().unwrap_or_else(AppConfig::default_path);
    info!("Configuration file: {}", config_path.display());

    // Hot-reloading config; actors read the current snapshot at decision
    // time, so edits apply without a restart.
    let (_config_watcher, config_rx) = ConfigWatcher::spawn(config_path).await?;
    let initial_config = config_rx.borrow().clone();

    let hardware = platform::native_hardware()
        .context("no native hardware integration on this platform")?;
    let notifications = platform::native_notifications()
        .context("no native notification source on this platform")?;
    let keys = platform::native_keys(initial_config.hide_system_overlay, hardware.clone())
        .context("no native key source on this platform")?;
    let displays = platform::native_displays()
        .unwrap_or_else(|| Arc::new(StaticDisplays::single(1440.0, 900.0)));

    let surface = if args.watch {
        Arc::new(ConsoleSurface::new())
    } else {
        Arc::new(ConsoleSurface::quiet())
    };
    let presenter = Presenter::spawn(surface, displays, config_rx.clone());

    let engine = HudEngine::new(hardware, notifications, keys, config_rx, presenter.clone());
    engine.start().await?;

    // Display reconfiguration feeds the engine from a platform hook.
    #[cfg(target_os = "macos")]
    let display_watch = match engine.event_sender().await {
        Some(events) => platform::macos::display::start_display_watch(events),
        None => None,
    };

    info!("✅ Monitoring active; press Ctrl+C to stop");
    shutdown_signal().await;

    engine.stop().await;

    #[cfg(target_os = "macos")]
    if let Some(id) = display_watch {
        platform::macos::display::stop_display_watch(id);
    }

    presenter.shutdown();
    info!("machud shutdown complete");
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "machud.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            Ok(None)
        }
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}

/// One-shot readout of everything the monitors would observe.
fn probe() -> Result<()> {
    use colored::*;

    println!("\n{}", "=== machud hardware probe ===".bold().cyan());

    let Some(hardware) = platform::native_hardware() else {
        println!(
            "  {}",
            "no native hardware integration on this platform".red()
        );
        println!();
        return Ok(());
    };

    match hardware.read_volume() {
        Ok(reading) => println!(
            "  {}: {}{}",
            "volume".bright_white(),
            format!("{:.0}%", reading.value * 100.0).green(),
            if reading.muted { " (muted)" } else { "" }
        ),
        Err(err) => println!("  {}: {}", "volume".bright_white(), err.to_string().red()),
    }

    match hardware.read_brightness() {
        Ok(value) => println!(
            "  {}: {}",
            "brightness".bright_white(),
            format!("{:.0}%", value * 100.0).green()
        ),
        Err(err) => println!(
            "  {}: {}",
            "brightness".bright_white(),
            err.to_string().red()
        ),
    }

    if let Some(keys) = platform::native_keys(false, hardware) {
        let status = if keys.permission_granted() {
            "granted".green()
        } else {
            "not granted (key-press detection disabled)".yellow()
        };
        println!("  {}: {}", "input monitoring".bright_white(), status);
    }

    println!();
    Ok(())
}
