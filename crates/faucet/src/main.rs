//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use drip_common::utils::{config::load_config_with_env, logging::init_logging};
use drip_faucet::{api, FaucetConfig, FaucetDatabase, FaucetService};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address
    #[arg(long)]
    server_addr: Option<String>,

    /// RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Private key
    #[arg(long, env = "FAUCET_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Database path
    #[arg(long)]
    db_path: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config: FaucetConfig = match &args.config {
        Some(path) => load_config_with_env(path, "FAUCET")
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FaucetConfig::default(),
    };
    config.apply_env();

    // Override with CLI arguments
    if let Some(addr) = args.server_addr {
        config.server_addr = addr;
    }

    if let Some(rpc_url) = args.rpc_url {
        config.rpc_url = rpc_url;
    }

    if let Some(key) = args.private_key {
        config.private_key = key;
    }

    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    if args.debug {
        config.logging.level = "debug".to_string();
    }

    let _log_guard = init_logging(&config.logging)?;

    info!("Starting Drip Faucet v{}", env!("CARGO_PKG_VERSION"));
    config.validate()?;

    info!("Configuration:");
    info!("  Server address: {}", config.server_addr);
    info!("  RPC URL: {}", config.rpc_url);
    info!("  Counter store: {:?}", config.kv_backend);
    info!(
        "  Rate limits: {} per source, {} per device, window {}s{}",
        config.ip_daily_limit,
        config.fingerprint_daily_limit,
        config.rate_limit_window_secs,
        if config.strict_rate_limiting { " (strict)" } else { "" }
    );

    // Initialize database
    let database = FaucetDatabase::new(&config.db_path)?;
    info!("Database initialized at: {}", config.db_path);

    let seeded = database.seed_tokens(&config.tokens)?;
    if seeded > 0 {
        info!("Seeded {} tokens", seeded);
    }

    let stats = database.get_statistics()?;
    info!("Previous statistics:");
    info!("  Completed drips: {}", stats.total_drips);
    info!("  Unique recipients: {}", stats.total_users);

    let service = Arc::new(FaucetService::connect(config.clone(), database)?);
    info!("Faucet service initialized, wallet {}", service.faucet_address());

    let app = api::router(service.clone());

    // Start cleanup task
    let cleanup_service = service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(86400)); // Daily cleanup
        loop {
            interval.tick().await;
            match cleanup_service.cleanup().await {
                Ok((records, _)) => info!("Cleaned up {} old records", records),
                Err(e) => warn!("Cleanup failed: {:?}", e),
            }
        }
    });

    // Start server
    let addr: SocketAddr = config.server_addr.parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Watchers still polling are abandoned; their drips stay pending
    if let Err(e) = service.database().flush() {
        error!("Final flush failed: {}", e);
    }
    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
