//! # Fieldlink
//!
//! Store-and-forward telemetry uplink for field tracking devices.
//!
//! Reads position records from stdin (one record line per reading, as
//! produced by the positioning front end) and delivers them to the collector,
//! buffering on local storage whenever the link is down.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use fieldlink::config::{Config, LoggingConfig};
use fieldlink::link::{LinkMonitor, LinkTimings, ProbeLink};
use fieldlink::queue::DurableQueue;
use fieldlink::record::{decode, Reading, Record};
use fieldlink::sync::{EngineStatus, SyncEngine};
use fieldlink::uplink::HttpUplink;

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Number of cycles between status log messages
const LOG_INTERVAL_CYCLES: u64 = 30;

/// Operator command: open the provisioning portal
const CMD_PROVISION: &str = "!provision";

/// Operator command: discard the whole backlog
const CMD_CLEAR: &str = "!clear";

/// Main entry point for Fieldlink
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (explicit path, else the default file, else defaults)
///    - Set up logging with tracing subscriber
///    - Mount the offline queue and recover the backlog
///    - Build the HTTP uplink and the link monitor
///
/// 2. **Main Loop**
///    - Keep the most recent reading from stdin
///    - Run one sync cycle per send interval
///    - Handle `!provision` and `!clear` operator commands
///    - Handle Ctrl+C for graceful shutdown
///
/// # Errors
///
/// Returns error if the configuration is invalid or the uplink cannot be built.
/// A queue that fails to mount is not fatal: the device keeps delivering
/// directly while online.
#[tokio::main]
async fn main() -> Result<()> {
    let (config, config_source) = load_config()?;
    let _log_guard = init_logging(&config.logging);

    info!("Fieldlink v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_source);

    let mut queue = DurableQueue::open(&config.queue.path, config.queue.capacity);
    match queue.init() {
        Ok(count) => info!("Recovered {} queued record(s)", count),
        Err(e) => error!("Offline buffering disabled: {}", e),
    }

    let uplink = HttpUplink::new(config.uplink.endpoint.clone(), config.uplink.send_timeout())?;
    let link = ProbeLink::from_endpoint(&config.uplink.endpoint, config.uplink.send_timeout())?;
    let monitor = LinkMonitor::new(
        link,
        LinkTimings {
            check_interval: config.sync.link_check_interval(),
            reconnect_cooldown: config.sync.reconnect_cooldown(),
            portal_timeout: config.provisioning.portal_timeout(),
            portal_name: config.provisioning.portal_name.clone(),
        },
    );

    let mut engine = SyncEngine::new(queue, uplink, monitor, &config.sync);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut feed_open = true;
    let mut latest: Option<Reading> = None;

    let mut cycle_interval = interval(config.sync.send_interval());
    // A long drain delays the next cycle instead of bunching the missed ones
    cycle_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycle_count: u64 = 0;

    info!(
        "Posting to {} every {} ms",
        config.uplink.endpoint, config.sync.send_interval_ms
    );
    info!("Press Ctrl+C to exit");

    // Main control loop
    loop {
        tokio::select! {
            _ = cycle_interval.tick() => {
                let report = engine.cycle(Instant::now(), latest.take()).await;
                cycle_count += 1;

                if report.drained > 0 {
                    info!("Drained {} queued record(s)", report.drained);
                }

                if cycle_count % LOG_INTERVAL_CYCLES == 0 {
                    info!("Status: {}", status_line(&engine.status()));
                }
            }

            line = lines.next_line(), if feed_open => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line == CMD_PROVISION {
                            engine.start_provisioning(Instant::now());
                        } else if line == CMD_CLEAR {
                            if let Err(e) = engine.clear_backlog() {
                                warn!("Clear failed: {}", e);
                            }
                        } else if !line.is_empty() {
                            match parse_feed_line(line, config.device.id) {
                                Ok(reading) => {
                                    if latest.replace(reading).is_some() {
                                        debug!("Reading superseded before its cycle");
                                    }
                                }
                                Err(e) => warn!("Ignoring feed line: {}", e),
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Reading feed closed, continuing to drain backlog");
                        feed_open = false;
                    }
                    Err(e) => {
                        warn!("Reading feed error: {}", e);
                        feed_open = false;
                    }
                }
            }

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                info!("Records still queued: {}", engine.backlog());
                break;
            }
        }
    }

    Ok(())
}

/// Load the configuration, falling back to defaults when no file exists
fn load_config() -> Result<(Config, String)> {
    if let Some(path) = std::env::args().nth(1) {
        let config = Config::load(&path).with_context(|| format!("loading {}", path))?;
        return Ok((config, path));
    }

    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        let config = Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("loading {}", DEFAULT_CONFIG_PATH))?;
        return Ok((config, DEFAULT_CONFIG_PATH.to_string()));
    }

    Ok((Config::default(), "built-in defaults".to_string()))
}

/// Initialize logging to stdout, plus a daily rolling file when configured
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fieldlink.log");
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::io::stdout.and(file_writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// One-line operator summary of the engine status
fn status_line(status: &EngineStatus) -> String {
    format!(
        "mode={} backlog={} link={} buffering={}{}",
        status.mode,
        status.backlog,
        if status.connected { "up" } else { "down" },
        if status.buffering_available { "on" } else { "off" },
        if status.provisioning { " provisioning" } else { "" }
    )
}

/// Decode one feed line, stamping it with this device's identifier
fn parse_feed_line(line: &str, device_id: u32) -> fieldlink::error::Result<Reading> {
    let record = Record::from_line(line)?;
    let mut reading = decode(&record)?;
    reading.device_id = device_id;
    Ok(reading)
}
