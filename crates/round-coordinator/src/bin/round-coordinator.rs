use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use round_coordinator::config::{ProofBackend, StorageBackend};
use round_coordinator::health::Component;
use round_coordinator::{monitor, ApiServer, CoordinatorConfig, RoundCoordinator};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StorageKind {
    Sqlite,
    Memory,
    Redis,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ProofKind {
    Claimed,
    LeadingZeros,
}

#[derive(Parser, Debug)]
#[clap(name = "round-coordinator")]
#[clap(about = "Round-based mining task coordinator and share ledger", long_about = None)]
struct Args {
    /// HTTP API bind address
    #[clap(long, env = "COORDINATOR_HTTP_BIND", default_value = "0.0.0.0:8080")]
    http_bind: SocketAddr,

    /// Share ledger backend
    #[clap(long, env = "COORDINATOR_STORAGE", value_enum, default_value = "sqlite")]
    storage: StorageKind,

    /// SQLite database file
    #[clap(long, env = "COORDINATOR_DATABASE", default_value = "data/shares.db")]
    database: PathBuf,

    /// Redis URL when the redis backend is selected
    #[clap(long, env = "COORDINATOR_REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Upper bound on a single storage operation, in milliseconds
    #[clap(long, env = "COORDINATOR_STORAGE_TIMEOUT_MS", default_value = "5000")]
    storage_timeout_ms: u64,

    /// Round number to start from when no persisted round exists
    #[clap(long, env = "COORDINATOR_INITIAL_ROUND", default_value = "1")]
    initial_round: u64,

    /// Target difficulty of the initial round
    #[clap(long, env = "COORDINATOR_INITIAL_DIFFICULTY", default_value = "1.0")]
    initial_difficulty: f64,

    /// Proof-of-work check applied to submissions
    #[clap(long, env = "COORDINATOR_PROOF", value_enum, default_value = "claimed")]
    proof: ProofKind,

    /// Persist round state in the ledger storage and resume it on start
    #[clap(long, env = "COORDINATOR_PERSIST_ROUNDS")]
    persist_rounds: bool,

    /// Track the miner proxy as a health component
    #[clap(long, env = "COORDINATOR_TRACK_MINER_PROXY")]
    track_miner_proxy: bool,

    /// Window for the hash-rate estimate, in seconds
    #[clap(long, env = "COORDINATOR_HASH_RATE_WINDOW", default_value = "600")]
    hash_rate_window: u64,

    /// Resource and hash-rate sampling interval, in seconds
    #[clap(long, env = "COORDINATOR_MONITOR_INTERVAL", default_value = "1")]
    monitor_interval: u64,
}

impl Args {
    fn into_config(self) -> CoordinatorConfig {
        let storage = match self.storage {
            StorageKind::Sqlite => StorageBackend::Sqlite {
                path: self.database,
            },
            StorageKind::Memory => StorageBackend::SqliteMemory,
            StorageKind::Redis => StorageBackend::Redis {
                url: self.redis_url,
            },
        };
        let proof_backend = match self.proof {
            ProofKind::Claimed => ProofBackend::Claimed,
            ProofKind::LeadingZeros => ProofBackend::LeadingZeros,
        };

        CoordinatorConfig {
            storage,
            storage_timeout: Duration::from_millis(self.storage_timeout_ms),
            initial_round: self.initial_round,
            initial_difficulty: self.initial_difficulty,
            proof_backend,
            persist_rounds: self.persist_rounds,
            track_miner_proxy: self.track_miner_proxy,
            hash_rate_window: Duration::from_secs(self.hash_rate_window),
            monitor_interval: Duration::from_secs(self.monitor_interval),
            ..CoordinatorConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let http_bind = args.http_bind;
    let config = args.into_config();

    info!("Starting round coordinator");
    info!("Storage: {:?}", config.storage);
    info!("Proof check: {:?}", config.proof_backend);

    let coordinator = Arc::new(
        RoundCoordinator::new(config)
            .await
            .context("failed to start coordinator")?,
    );

    let monitor_task = tokio::spawn(monitor::run(coordinator.clone()));

    let router = ApiServer::new(coordinator.clone()).router();
    let listener = tokio::net::TcpListener::bind(http_bind)
        .await
        .with_context(|| format!("failed to bind {}", http_bind))?;
    coordinator.health().mark_ready(Component::Api)?;
    info!("HTTP API listening on {}", http_bind);

    // Run until shutdown signal
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal");
    });
    if let Err(e) = server.await {
        error!("HTTP server error: {}", e);
    }

    monitor_task.abort();
    info!("Round coordinator shutting down");
    Ok(())
}
