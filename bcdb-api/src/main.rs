use anyhow::{Context, Result};
use bcdb_api::{hash_key, ApiServer, Authenticator};
use bcdb_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use bcdb_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use bcdb_core::{AccessController, Config};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "bcdb")]
#[command(author, version, about = "BCDB document database server", long_about = None)]
struct Args {
    /// TOML configuration file; BCDB_* environment variables are used otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the gRPC listen address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the argon2 hash of an API key for the `auth.users` table
    HashKey { key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(Command::HashKey { key }) = &args.command {
        println!("{}", hash_key(key)?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.logging.json_format |= args.json_logs;
    config.validate()?;

    init_logging_with_config(LogConfig::from(&config.logging))?;
    info!(backend = %config.store.backend, "BCDB starting");

    bcdb_core::metrics::init_metrics();
    if config.metrics.enabled {
        PrometheusBuilder::new()
            .with_http_listener(config.metrics.bind_address)
            .install()
            .context("installing Prometheus exporter")?;
        info!(addr = %config.metrics.bind_address, "Prometheus exporter listening");
    }

    if config.auth.users.is_empty() {
        warn!("No users configured; every call will be rejected");
    }

    let controller = Arc::new(AccessController::open(&config.store)?);
    let auth = Arc::new(Authenticator::from_config(&config.auth));

    let coordinator = Arc::new(ShutdownCoordinator::new(config.server.shutdown_timeout));
    install_signal_handlers(coordinator.clone())?;

    let server = ApiServer::new(controller, auth);
    let signal = {
        let coordinator = coordinator.clone();
        async move {
            coordinator.wait_for_shutdown().await;
        }
    };

    tokio::select! {
        result = server.serve(config.server.bind_address, signal) => result?,
        _ = coordinator.deadline() => {
            warn!("Grace period expired, dropping in-flight calls");
        }
    }

    coordinator.complete().await;
    Ok(())
}
