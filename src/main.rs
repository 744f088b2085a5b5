//! # Tank Bridge
//!
//! Publishes the water level of a tank, measured with an ultrasonic sensor,
//! to an MQTT broker and announces it to Home Assistant.

use anyhow::Result;
use std::env;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use tank_bridge::config::store::TomlConfigStore;
use tank_bridge::config::Config;
use tank_bridge::connection::mqtt::{RumqttConnector, RumqttSession};
use tank_bridge::connection::nmcli::NmcliRadio;
use tank_bridge::connection::{ConnectionManager, ConnectionSettings};
use tank_bridge::runtime::{DiagnosticCommand, Runtime, STEP_INTERVAL};
use tank_bridge::sensor::ranger::SerialRanger;
use tank_bridge::sensor::SensorSampler;
use tank_bridge::serial::SensorSerial;

/// Used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Set up stdout logging plus a daily rolling file when `dir` is set
///
/// The returned guard must live until exit so buffered file output is flushed.
fn init_logging(dir: &str) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = if dir.is_empty() {
        (None, None)
    } else {
        let appender = tracing_appender::rolling::daily(dir, "tank-bridge.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

/// Main entry point for Tank Bridge
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load the settings file, set up logging, overlay the persistent store
///    - Open the sensor port (a missing sensor only yields `no_read`)
///    - Build the radio, broker session and runtime
///
/// 2. **Main Loop** (single thread, every 100 ms)
///    - Pump and tick the connection state machines
///    - Publish discovery when the broker session comes up
///    - Publish telemetry when due
///    - Serve diagnostic commands from stdin
///
/// 3. **Graceful Shutdown** on Ctrl+C
///    - Publish `offline` to the status topic and disconnect
///
/// # Examples
///
/// ```bash
/// tank-bridge /etc/tank-bridge/config.toml
/// ```
///
/// Diagnostic commands on stdin:
/// ```text
/// reading
/// discovery
/// test {"ssid":"tanknet","wifi_password":"secret","host":"broker.local"}
/// reconnect
/// ```
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let loaded = Config::read(&config_path);

    let log_dir = loaded
        .as_ref()
        .map(|c| c.logging.dir.clone())
        .unwrap_or_default();
    let _log_guard = init_logging(&log_dir);

    info!("Tank Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(config) => {
            info!("Loaded configuration from {}", config_path);
            config
        }
        Err(e) => {
            warn!("Could not load {}: {}, using defaults", config_path, e);
            Config::default()
        }
    };
    config.sanitize();

    match TomlConfigStore::open(&config.store.path) {
        Ok(store) => config.overlay(&store),
        Err(e) => warn!("Settings store {} unavailable: {}", config.store.path, e),
    }

    let ranger = match SensorSerial::open_with_paths(&config.sensor.ports, config.sensor.baud_rate) {
        Ok(serial) => Some(SerialRanger::new(serial)),
        Err(e) => {
            warn!("{}, telemetry will report no_read", e);
            None
        }
    };

    let (events_tx, events_rx) = unbounded_channel();
    let radio = NmcliRadio::new(&config.wifi, events_tx);
    let manager = ConnectionManager::new(
        radio,
        RumqttSession::new(),
        events_rx,
        ConnectionSettings::from_config(&config),
    );
    let mut runtime = Runtime::new(
        &config,
        manager,
        SensorSampler::new(ranger),
        RumqttConnector,
        Instant::now(),
    );

    let mut step = interval(STEP_INTERVAL);
    step.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = step.tick() => {
                runtime.step(Instant::now()).await;
            }

            line = commands.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match line.parse::<DiagnosticCommand>() {
                        Ok(command) => match runtime.handle_command(command).await {
                            Ok(response) => println!("{}", response),
                            Err(e) => warn!("Command failed: {}", e),
                        },
                        Err(e) => warn!("{}", e),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    runtime.shutdown().await;
    info!("Tank Bridge stopped");
    Ok(())
}
