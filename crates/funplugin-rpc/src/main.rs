//! Funplugin RPC - plugin process for a function-calling host.
//!
//! Registers the debugtalk example functions, binds a loopback port and
//! prints the handshake line the host reads to connect.

mod debugtalk;

use anyhow::{Context, Result};
use clap::Parser;
use funplugin::config::{PortConfig, ServerConfig};
use funplugin::{
    FunctionRegistry, PluginProtocol, PortRange, PortSelection, ServeConfig, ShutdownToken,
};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "funplugin-rpc")]
#[command(about = "Plugin process serving the debugtalk example functions")]
struct Args {
    /// Listen on a fixed port instead of a random one in the range
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen on the legacy single-instance port (50051)
    #[arg(long, conflicts_with = "port")]
    legacy_port: bool,

    /// Lowest port considered for random selection
    #[arg(long, default_value_t = PortConfig::RANGE_START)]
    port_min: u16,

    /// Highest port considered for random selection
    #[arg(long, default_value_t = PortConfig::RANGE_END)]
    port_max: u16,

    /// Number of calls that may run at once
    #[arg(short, long, default_value_t = ServerConfig::WORKER_POOL_SIZE)]
    workers: usize,

    /// Announced service kind (defaults to HRP_PLUGIN_TYPE, then grpc)
    #[arg(long)]
    protocol: Option<PluginProtocol>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Also append JSON logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn serve_config(&self) -> ServeConfig {
        let port = match self.port {
            Some(port) => PortSelection::Fixed(port),
            None if self.legacy_port => PortSelection::legacy(),
            None => PortSelection::Random(PortRange::new(self.port_min, self.port_max)),
        };

        ServeConfig::new()
            .with_port(port)
            .with_workers(self.workers)
            .with_protocol(self.protocol.unwrap_or_else(PluginProtocol::from_env))
    }
}

/// Log to stderr, and optionally to a file. Stdout carries only the handshake.
fn init_logging(args: &Args) -> Result<()> {
    let log_level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact();

    let file_layer = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install logger")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    info!("Starting funplugin RPC plugin");

    let registry = FunctionRegistry::new();
    debugtalk::register_all(&registry);

    // Prints the handshake line for the host (intentional stdout).
    let server = funplugin::serve(Arc::new(registry), args.serve_config()).await?;

    info!("Plugin serving on {}", server.addr());

    server.run_until(ShutdownToken::new()).await?;
    info!("Shutdown complete, exiting");

    Ok(())
}
