//! fleetgate - MQTT device gateway
//!
//! Usage:
//!   fleetgate [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Configuration file path
//!   --http-bind <ADDR>      Operator API bind address (default: 0.0.0.0:8080)
//!   -b, --broker <ADDR>     Broker address (default: localhost:1883)
//!   --client-id <ID>        MQTT client identifier
//!   -s, --store <CONF>      Store connection string (tcp::addr=host:port;)
//!   -l, --log-level         Log level (error, warn, info, debug, trace)
//!   -h, --help              Print help

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use fleetgate::config::Config;
use fleetgate::gateway::Gateway;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// fleetgate - MQTT device gateway
#[derive(Parser, Debug)]
#[command(name = "fleetgate")]
#[command(author = "Fleetgate Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Command fan-out and telemetry persistence for MQTT device fleets")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Operator API bind address
    #[arg(long)]
    http_bind: Option<SocketAddr>,

    /// Broker address (host:port)
    #[arg(short, long)]
    broker: Option<String>,

    /// MQTT client identifier
    #[arg(long)]
    client_id: Option<String>,

    /// Store connection string
    #[arg(short, long)]
    store: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // File (if given) and FLEETGATE__* env vars, then CLI on top
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(bind) = args.http_bind {
        config.http.bind = bind;
    }
    if let Some(broker) = args.broker {
        config.broker.address = broker;
    }
    if let Some(client_id) = args.client_id {
        config.broker.client_id = client_id;
    }
    if let Some(store) = args.store {
        config.store.conf = store;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // CLI level wins, then RUST_LOG, then the config file
    let filter = match args.log_level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.log.level.as_str())),
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    info!("Starting fleetgate");
    info!("  Operator API: {}", config.http.bind);
    info!("  Broker: {}://{}", config.broker.protocol, config.broker.address);
    info!("  Client ID: {}", config.broker.client_id);
    info!("  Store: {}", config.store.conf);
    info!("  Topic layout: {:?}", config.broker.layout);
    info!("  Dispatch: {:?}", config.dispatch.completion);

    let gateway = match Gateway::start(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    gateway.shutdown().await;
    Ok(())
}
