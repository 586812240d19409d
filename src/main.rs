//! BLE-MIDI monitor - live table of BLE-MIDI peripherals and their traffic

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ble_midi_monitor::display::{render_json, render_table};
use ble_midi_monitor::transport::btleplug_backend::{self, BtleplugEnumerator, BtleplugTransport};
use ble_midi_monitor::transport::midir_backend::{self, MidirEnumerator, MidirTransport};
use ble_midi_monitor::{AppConfig, DeviceMonitor};

/// Redraw at least this often so opened/closed transports show up
const IDLE_REFRESH: Duration = Duration::from_secs(1);

/// BLE-MIDI Monitor - count MIDI messages and BLE packets per device
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ble-midi-monitor.yaml")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<String>,

    /// List available MIDI input ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Print snapshots as JSON lines instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let _log_guard = init_logging(&args.log_level, args.log_file.as_deref())?;

    let config = AppConfig::load_or_default(&args.config).await?;

    if args.list_ports {
        midir_backend::print_ports(&config.midi.client_name)?;
        return Ok(());
    }

    info!("Starting BLE-MIDI monitor...");
    info!("Configuration file: {}", args.config);

    let adapter = btleplug_backend::open_adapter(config.ble.adapter_index).await?;

    let monitor = DeviceMonitor::new(
        &config,
        Arc::new(MidirTransport::new(config.midi.client_name.clone())),
        Arc::new(BtleplugTransport::new(adapter.clone())),
    );
    monitor
        .start(
            Arc::new(MidirEnumerator::new(
                config.midi.client_name.clone(),
                config.scan_interval(),
            )),
            Arc::new(BtleplugEnumerator::new(adapter)),
        )
        .await?;

    tokio::select! {
        result = render_loop(&monitor, config.min_refresh(), args.json) => {
            if let Err(e) = result {
                error!("Display stopped: {:#}", e);
            }
        }
        _ = shutdown_signal() => {}
    }

    monitor.shutdown().await;
    info!("BLE-MIDI monitor stopped");
    Ok(())
}

/// Redraw whenever the metrics bridge signals, at most once per `min_refresh`
async fn render_loop(monitor: &DeviceMonitor, min_refresh: Duration, json: bool) -> Result<()> {
    loop {
        let snapshot = monitor.snapshot();
        if json {
            println!("{}", render_json(&snapshot)?);
        } else {
            // Clear screen, cursor home
            print!("\x1B[2J\x1B[H{}", render_table(&snapshot));
        }

        tokio::time::sleep(min_refresh).await;
        let _ = tokio::time::timeout(IDLE_REFRESH, monitor.metrics().refreshed()).await;
    }
}

fn init_logging(level: &str, log_file: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let appender = tracing_appender::rolling::never(".", path);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
