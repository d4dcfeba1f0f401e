//! Envoy supervisor
//!
//! Keeps an envoy proxy running with a bootstrap rendered from a TOML
//! application config, hot-reloading it whenever the config file changes.
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml ──▶ FileSource (notify) ──▶ Server ──▶ envoy (generation N)
//!                                              │           │ stdout/stderr
//!                                              │           ▼
//!                                              │        LogRelay ──▶ tracing
//!                                              └──▶ process collector ──▶ metrics
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use envoy_supervisor::config::{ConfigSource, FileSource};
use envoy_supervisor::envoy::{Server, ServerSettings};
use envoy_supervisor::lifecycle::signals::wait_for_signal;
use envoy_supervisor::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "envoy-supervisor", version, about = "Run and hot-reload an envoy proxy")]
struct Args {
    /// Application config file (TOML).
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Control plane gRPC port on localhost.
    #[arg(long, default_value = "5443")]
    grpc_port: String,

    /// Bundled envoy binary; `envoy` on PATH is used when absent.
    #[arg(long)]
    envoy_path: Option<PathBuf>,

    /// Trusted SHA-256 of the envoy binary.
    #[arg(long, env = "ENVOY_SUPERVISOR_ENVOY_CHECKSUM")]
    checksum: Option<String>,

    /// Envoy working directory.
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Where envoy persists its hot-restart base id.
    #[arg(long)]
    base_id_path: Option<PathBuf>,

    /// Seconds between envoy process samples.
    #[arg(long, default_value_t = 10)]
    collect_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let source = FileSource::new(&args.config)?;
    let config = source.get_config();

    logging::init_logging(&config.log_level, config.observability.log_json)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        services = %config.services,
        "envoy-supervisor starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let mut settings = ServerSettings {
        grpc_port: args.grpc_port,
        envoy_path: args.envoy_path,
        collect_interval: Duration::from_secs(args.collect_interval_secs.max(1)),
        ..ServerSettings::default()
    };
    if args.checksum.is_some() {
        settings.checksum = args.checksum;
    }
    if let Some(dir) = args.working_dir {
        settings.working_dir = dir;
    }
    if let Some(path) = args.base_id_path {
        settings.base_id_path = path;
    }

    let server = Server::new(settings)?;
    server.start(&source)?;

    // Dropping the watcher stops reloads.
    let _watcher = source.watch()?;

    let signal = wait_for_signal().await?;
    tracing::info!(signal, "Shutdown signal received");

    server.close().await?;
    tracing::info!("Shutdown complete");
    Ok(())
}
