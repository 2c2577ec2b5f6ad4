use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use log_chain::api::{self, AppState};
use log_chain::audit::Verifier;
use log_chain::config::{AppConfig, CONFIG_PATH_ENV};
use log_chain::crypto::OsSaltSource;
use log_chain::database::{Database, IndexStore};
use log_chain::ledger::{
    AnchorLedger, LedgerDeadlines, LocalLedger, MemoryStateStore, SqliteStateStore, StateStore,
};
use log_chain::metrics::MetricsRegistry;
use log_chain::pipeline::{self, PipelineDeps};
use log_chain::stream::MemoryBroker;

#[derive(Parser, Debug)]
#[command(name = "log-chain", about = "Tamper-evident audit trail for application logs")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "log_chain=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting log-chain");

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    info!("Configuration loaded");

    let database = Database::new(&config.database.index_url, config.database.max_connections).await?;
    database.run_migrations().await?;
    info!("Index store migrations completed");
    let store: Arc<dyn IndexStore> = Arc::new(database);

    let state_store: Arc<dyn StateStore> = match &config.ledger.state_url {
        Some(url) => Arc::new(
            SqliteStateStore::connect(url)
                .await
                .with_context(|| format!("Failed to open ledger state at {}", url))?,
        ),
        None => {
            info!("Ledger state kept in memory");
            Arc::new(MemoryStateStore::new())
        }
    };
    let ledger = AnchorLedger::new(Arc::new(LocalLedger::new(
        state_store,
        LedgerDeadlines::from(&config.ledger),
    )));

    let broker = MemoryBroker::bounded(
        config.stream.partitions,
        config.stream.max_poll_records,
        config.stream.retention_records,
    );
    let metrics = Arc::new(MetricsRegistry::new()?);

    let pipeline = pipeline::start(
        &config,
        PipelineDeps {
            broker: broker.clone(),
            ledger: ledger.clone(),
            store: store.clone(),
            metrics: metrics.clone(),
            salts: Arc::new(OsSaltSource),
        },
    );
    info!("Pipeline workers: {}", pipeline.worker_names().join(", "));

    let mut verifier = Verifier::new(store.clone(), config.verifier.batch_limit);
    if config.verifier.cross_check_ledger {
        verifier = verifier.with_ledger_cross_check(ledger.clone());
    }

    let app = api::router(AppState {
        ledger,
        store,
        verifier,
        producer: Arc::new(broker),
        raw_topic: config.normalizer.consume_topic.clone(),
        metrics,
    });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.shutdown().await?;
    info!("log-chain stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
