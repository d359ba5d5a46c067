use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{StoreBackend, TurnstileConfig};
use turnstile::http::{HttpOptions, HttpServer};
use turnstile::ratelimit::{AdmissionBackend, RateLimiter};
use turnstile::store::{InMemoryCounterStore, RedisCounterStore};

/// Per-identity fixed-window admission control service.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Maximum requests per window
    #[arg(long)]
    limit: Option<u64>,

    /// Window length in seconds
    #[arg(long)]
    period: Option<u64>,

    /// Counter store backend (redis or memory)
    #[arg(long)]
    store: Option<StoreBackend>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Turnstile Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    info!(
        http_addr = %config.server.http_addr,
        limit = config.rate_limiting.limit,
        period_secs = config.rate_limiting.period_secs,
        store = ?config.store.backend,
        failure_policy = ?config.server.failure_policy,
        anonymous = ?config.rate_limiting.anonymous,
        "Configuration loaded"
    );

    let policy = config.rate_limiting.policy()?;

    match config.store.backend {
        StoreBackend::Redis => {
            let url = config.store.redis_url();
            let store = RedisCounterStore::connect(&url)
                .await
                .with_context(|| {
                    format!(
                        "failed to connect to Redis at {}:{}",
                        config.store.host, config.store.port
                    )
                })?;

            if let Err(e) = store.ping().await {
                warn!(error = %e, "Redis did not answer PING; requests will fail until it recovers");
            }

            let limiter = RateLimiter::new(Arc::new(store), policy)
                .with_key_prefix(config.rate_limiting.key_prefix.clone())?;
            run(Arc::new(limiter), &config).await?;
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory counter store; limits are not shared between instances");

            let store = Arc::new(InMemoryCounterStore::new());
            let cleanup = store.spawn_cleanup_loop(config.store.cleanup_interval());

            let limiter = RateLimiter::new(store, policy)
                .with_key_prefix(config.rate_limiting.key_prefix.clone())?;
            run(Arc::new(limiter), &config).await?;

            cleanup.abort();
        }
    }

    info!("Turnstile Admission Control Service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
    }
}

/// Assemble configuration: defaults, file, environment, then CLI flags.
fn load_config(args: &Args) -> anyhow::Result<TurnstileConfig> {
    let mut config = match &args.config {
        Some(path) => TurnstileConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => TurnstileConfig::default(),
    };

    config.apply_env()?;

    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(limit) = args.limit {
        config.rate_limiting.limit = limit;
    }
    if let Some(period) = args.period {
        config.rate_limiting.period_secs = period;
    }
    if let Some(store) = args.store {
        config.store.backend = store;
    }

    config.validate()?;
    Ok(config)
}

async fn run<A: AdmissionBackend + 'static>(
    backend: Arc<A>,
    config: &TurnstileConfig,
) -> anyhow::Result<()> {
    let server = HttpServer::new(config.server.http_addr, backend, HttpOptions::from(config));

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
