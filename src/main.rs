//! hidsense CLI
//!
//! Telemetry and liveness agent for USB sensors that report as keyboards.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use hidsense_agent::{
    collector::{Collector, KeySource, NoopSource, ReplaySource, DEFAULT_CHANNEL_CAPACITY},
    config::{Config, SensorMapping},
    monitor::{Pipeline, ReadingSummary, Severity},
    publish,
    stats::{self, STATS_FILE},
    store::{window_start, JsonlStore, MemoryStore, SharedStore, TelemetryQuery},
    VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hidsense")]
#[command(version = VERSION)]
#[command(about = "Telemetry agent for HID-keyboard temperature/humidity sensors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the sensors and monitor their health
    Start {
        /// Input device to read (repeatable); default is auto-discovery
        #[arg(long = "device")]
        devices: Vec<PathBuf>,

        /// Map a reporting interval to a sensor id, e.g. `1=rack-a` (repeatable)
        #[arg(long = "map", value_parser = parse_mapping)]
        mappings: Vec<SensorMapping>,

        /// Also serve the query API (requires server feature)
        #[arg(long)]
        serve: bool,
    },

    /// Feed recorded sensor output through the full pipeline
    Replay {
        /// Text file with one sensor line per line
        file: PathBuf,

        /// Device id the lines are attributed to
        #[arg(long, default_value = "replay0")]
        device: String,

        /// Map a reporting interval to a sensor id (repeatable)
        #[arg(long = "map", value_parser = parse_mapping)]
        mappings: Vec<SensorMapping>,

        /// Pause between lines, in milliseconds
        #[arg(long, default_value = "0")]
        pace_ms: u64,

        /// Write to the data directory instead of memory
        #[arg(long)]
        persist: bool,
    },

    /// Show current sensor health and ingest statistics
    Status,

    /// Show stored readings
    Readings {
        /// Only this sensor, with a summary
        #[arg(long)]
        sensor: Option<String>,

        /// Lookback window in hours
        #[arg(long, default_value = "1")]
        hours: i64,
    },

    /// Show recent alerts
    Alerts {
        /// Lookback window in hours
        #[arg(long, default_value = "24")]
        hours: i64,

        /// Minimum severity (info, warning, critical)
        #[arg(long)]
        severity: Option<Severity>,
    },

    /// Show configuration
    Config,

    /// Serve the query API over stored telemetry (requires server feature)
    Serve {
        /// Port to listen on (default from config)
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start {
            devices,
            mappings,
            serve,
        } => cmd_start(devices, mappings, serve),
        Commands::Replay {
            file,
            device,
            mappings,
            pace_ms,
            persist,
        } => cmd_replay(file, &device, mappings, pace_ms, persist),
        Commands::Status => cmd_status(),
        Commands::Readings { sensor, hours } => cmd_readings(sensor, hours),
        Commands::Alerts { hours, severity } => cmd_alerts(hours, severity),
        Commands::Config => cmd_config(),
        Commands::Serve { port } => cmd_serve(port),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn parse_mapping(s: &str) -> Result<SensorMapping, String> {
    SensorMapping::parse(s).map_err(|e| e.to_string())
}

/// Configuration file, then environment, then command line.
fn load_config(mappings: Vec<SensorMapping>) -> anyhow::Result<Config> {
    let mut config = Config::load()
        .context("loading configuration")?
        .with_env_overrides()
        .context("applying environment overrides")?;

    for mapping in mappings {
        config
            .sensors
            .retain(|m| m.interval_seconds != mapping.interval_seconds);
        config.sensors.push(mapping);
    }
    config.validate()?;
    Ok(config)
}

fn cmd_start(devices: Vec<PathBuf>, mappings: Vec<SensorMapping>, serve: bool) -> anyhow::Result<()> {
    println!("hidsense agent v{VERSION}");
    println!();

    let config = load_config(mappings)?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    let devices = if devices.is_empty() {
        config.input_devices.clone()
    } else {
        devices
    };
    let sources = open_sources(&devices);

    println!("Starting collection...");
    println!("  Devices: {}", describe(sources.iter().map(|s| s.device_id())));
    println!("  Sensor timeout: {}s", config.sensor_timeout.as_secs());
    println!("  Health check interval: {}s", config.health_check_interval.as_secs());
    println!("  Alert cooldown: {}s", config.alert_cooldown.as_secs());
    for mapping in &config.sensors {
        println!("  Interval {}s -> {}", mapping.interval_seconds, mapping.sensor_id);
    }
    println!("  Data: {:?}", config.data_path);

    let stats = stats::create_shared_stats_with_persistence(config.data_path.join(STATS_FILE));
    let jsonl = Arc::new(JsonlStore::open(&config.data_path).context("opening data directory")?);
    let store: SharedStore = jsonl.clone();
    let publishers = publish::from_config(&config.publish);
    println!("  Publishing to: {}", describe(publishers.names().iter().map(String::as_str)));

    #[cfg(feature = "server")]
    let server = if serve {
        Some(spawn_server(config.server_port, jsonl.clone())?)
    } else {
        None
    };
    #[cfg(not(feature = "server"))]
    if serve {
        eprintln!("Warning: --serve flag ignored (server feature not enabled at compile time)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let mut pipeline = Pipeline::new(&config, store, publishers).with_stats(stats.clone());
    pipeline.register_sensors(config.configured_sensor_ids(), Utc::now());

    let mut collector = Collector::new(DEFAULT_CHANNEL_CAPACITY, stats.clone());
    collector.start(sources)?;
    pipeline.run(collector.receiver(), &running);

    println!();
    println!("Stopping collection...");
    let detached = collector.stop(config.shutdown_grace);
    if detached > 0 {
        eprintln!("Warning: {detached} device worker(s) did not stop in time");
    }

    #[cfg(feature = "server")]
    if let Some(handle) = server {
        handle.shutdown();
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save ingest statistics: {e}");
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

/// Open the requested devices, or discover them. Falls back to an idle
/// source so configured sensors are still monitored.
fn open_sources(devices: &[PathBuf]) -> Vec<Box<dyn KeySource>> {
    let mut sources: Vec<Box<dyn KeySource>> = Vec::new();

    #[cfg(target_os = "linux")]
    {
        use hidsense_agent::collector::evdev::{discover, EvdevSource, DEFAULT_NAME_PATTERNS};

        let paths = if devices.is_empty() {
            discover(DEFAULT_NAME_PATTERNS).unwrap_or_else(|e| {
                eprintln!("Warning: Device discovery failed: {e}");
                Vec::new()
            })
        } else {
            devices.to_vec()
        };
        for path in paths {
            match EvdevSource::open(&path) {
                Ok(source) => sources.push(Box::new(source)),
                Err(e) => eprintln!("Warning: {e}"),
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    if !devices.is_empty() {
        eprintln!("Warning: reading input devices is only supported on Linux");
    }

    if sources.is_empty() {
        eprintln!("Warning: No sensor devices found; only health monitoring will run.");
        sources.push(Box::new(NoopSource::new("none")));
    }
    sources
}

fn describe<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

fn cmd_replay(
    file: PathBuf,
    device: &str,
    mappings: Vec<SensorMapping>,
    pace_ms: u64,
    persist: bool,
) -> anyhow::Result<()> {
    let config = load_config(mappings)?;
    let source = ReplaySource::from_file(device, &file)?.with_pace(Duration::from_millis(pace_ms));
    println!("Replaying {} lines from {:?}", source.remaining_lines(), file);

    let memory = Arc::new(MemoryStore::new());
    let store: SharedStore = if persist {
        config.ensure_directories()?;
        Arc::new(JsonlStore::open(&config.data_path)?)
    } else {
        memory.clone()
    };

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let stats = stats::create_shared_stats();
    let mut pipeline = Pipeline::new(&config, store, publish::from_config(&config.publish))
        .with_stats(stats.clone());
    let mut collector = Collector::new(DEFAULT_CHANNEL_CAPACITY, stats.clone());
    collector.start(vec![Box::new(source)])?;
    pipeline.drain(collector.receiver(), &running);
    collector.stop(config.shutdown_grace);

    println!();
    for reading in pipeline.latest_readings() {
        println!(
            "{:<16} {:>7.2} °C {:>7.2} %RH  ({}s)",
            reading.sensor_id, reading.temperature, reading.humidity, reading.interval_seconds
        );
    }
    for health in pipeline.health().snapshot() {
        println!("{:<16} {}", health.sensor_id, health.status);
    }
    if !persist {
        println!("{} readings kept in memory", memory.reading_count());
    }
    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("hidsense agent status");
    println!("=====================");
    println!();

    let store = JsonlStore::open(&config.data_path)?;
    let health = store.current_health()?;
    if health.is_empty() {
        println!("No sensor health recorded yet.");
    } else {
        println!("Sensors:");
        for record in health {
            println!(
                "  {:<16} {:<9} freshness {:>6.0}s  errors {}  (as of {})",
                record.sensor_id,
                record.status,
                record.data_freshness_seconds,
                record.error_count,
                record.timestamp.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    println!();

    let stats_path = config.data_path.join(STATS_FILE);
    match stats::read_persisted(&stats_path) {
        Ok(persisted) => {
            println!("Cumulative Statistics:");
            println!("  Lines decoded: {}", persisted.lines);
            println!("  Readings: {}", persisted.readings);
            println!("  Banners: {}", persisted.banners);
            println!("  Unrecognised lines: {}", persisted.unknown);
            println!("  Out-of-range readings: {}", persisted.rejected);
            println!("  Dropped events: {}", persisted.dropped);
            println!("  Alerts raised: {}", persisted.alerts);
        }
        Err(_) => println!("No previous session data found."),
    }
    Ok(())
}

fn lookback(hours: i64) -> anyhow::Result<DateTime<Utc>> {
    window_start(Utc::now(), hours)
        .with_context(|| format!("--hours must be a positive number of hours, got {hours}"))
}

fn cmd_readings(sensor: Option<String>, hours: i64) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = JsonlStore::open(&config.data_path)?;

    let Some(sensor_id) = sensor else {
        let latest = store.latest_readings()?;
        if latest.is_empty() {
            println!("No readings stored in {:?}", config.data_path);
        }
        for reading in latest {
            println!(
                "{:<16} {:>7.2} °C {:>7.2} %RH  at {}",
                reading.sensor_id,
                reading.temperature,
                reading.humidity,
                reading.observed_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        return Ok(());
    };

    let since = lookback(hours)?;
    let rows = store.readings(&sensor_id, since, Utc::now())?;
    for reading in &rows {
        println!(
            "{}  {:>7.2} °C {:>7.2} %RH",
            reading.observed_at.format("%Y-%m-%d %H:%M:%S"),
            reading.temperature,
            reading.humidity
        );
    }

    match ReadingSummary::from_readings(&sensor_id, &rows) {
        Some(summary) => {
            println!();
            println!("{} readings over the last {}h", summary.count, hours);
            println!(
                "  Temperature: mean {:.2}, std dev {:.2}, min {:.2}, max {:.2}",
                summary.temperature.mean,
                summary.temperature.std_dev,
                summary.temperature.min,
                summary.temperature.max
            );
            println!(
                "  Humidity:    mean {:.2}, std dev {:.2}, min {:.2}, max {:.2}",
                summary.humidity.mean,
                summary.humidity.std_dev,
                summary.humidity.min,
                summary.humidity.max
            );
        }
        None => println!("No readings for {sensor_id} in the last {hours}h"),
    }
    Ok(())
}

fn cmd_alerts(hours: i64, severity: Option<Severity>) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = JsonlStore::open(&config.data_path)?;

    let alerts = store.alerts(lookback(hours)?, severity)?;
    if alerts.is_empty() {
        println!("No alerts in the last {hours}h");
    }
    for alert in alerts {
        println!(
            "{}  {:<8} {:<20} {}",
            alert.timestamp.format("%Y-%m-%d %H:%M:%S"),
            alert.severity,
            alert.alert_type,
            alert.message
        );
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(feature = "server")]
fn cmd_serve(port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = Arc::new(JsonlStore::open(&config.data_path)?);
    let handle = spawn_server(port.unwrap_or(config.server_port), store)?;
    println!("Listening on http://{}", handle.addr);
    println!("Press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }
    handle.shutdown();
    Ok(())
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_port: Option<u16>) -> anyhow::Result<()> {
    anyhow::bail!("the query API requires the server feature")
}

#[cfg(feature = "server")]
struct ServerHandle {
    addr: std::net::SocketAddr,
    shutdown: tokio::sync::oneshot::Sender<()>,
    runtime: tokio::runtime::Runtime,
}

#[cfg(feature = "server")]
impl ServerHandle {
    fn shutdown(self) {
        let _ = self.shutdown.send(());
        self.runtime.shutdown_timeout(Duration::from_secs(2));
    }
}

#[cfg(feature = "server")]
fn spawn_server(port: u16, query: Arc<dyn TelemetryQuery>) -> anyhow::Result<ServerHandle> {
    use hidsense_agent::server::{run, ServerConfig};

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()?;
    let (addr, shutdown) = runtime.block_on(run(ServerConfig::new(port, query)))?;
    println!("  Query API: http://{addr}");
    Ok(ServerHandle {
        addr,
        shutdown,
        runtime,
    })
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
