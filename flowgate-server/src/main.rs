//! # Flowgate Server
//!
//! Firewall-log ingestion and analytics engine for NetWall / CONN-style
//! syslog streams.
//!
//! ## Overview
//!
//! The server wires the core pipeline into a running process:
//!
//! - **Live ingest**: UDP syslog receiver feeding the shared ingestor
//! - **File imports**: single background worker draining the ingest-job queue
//! - **Retention**: hourly cleanup of aged live-syslog data
//! - **Maintenance**: operator-initiated firewall purges
//!
//! ## Architecture
//!
//! Built on Tokio with PostgreSQL for persistent storage. All background
//! loops share one broadcast shutdown channel and terminate gracefully on
//! SIGINT/SIGTERM.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowgate_core::enrichment::classification::Classifier;
use flowgate_core::jobs::{retention, store, worker};
use flowgate_core::storage::db;
use flowgate_core::{Ops, Writer};
use flowgate_model::ClassificationPrecedence;

/// Command line arguments for the Flowgate server
#[derive(Parser, Debug)]
#[command(name = "flowgate-server")]
#[command(about = "Firewall-log ingestion and analytics engine")]
struct Args {
    /// UDP syslog listen host
    #[arg(long, env = "SYSLOG_HOST", default_value = "0.0.0.0")]
    syslog_host: String,

    /// UDP syslog listen port
    #[arg(long, env = "SYSLOG_PORT", default_value_t = 5514)]
    syslog_port: u16,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Directory for per-job upload files
    #[arg(long, env = "UPLOADS_DIR", default_value = "uploads")]
    uploads_dir: PathBuf,

    /// Records per import batch transaction
    #[arg(long, env = "INGEST_BATCH_SIZE", default_value_t = 5000)]
    batch_size: usize,

    /// Whether zone or interface wins when deriving sides
    /// (zone_first | interface_first)
    #[arg(long, env = "CLASSIFICATION_PRECEDENCE", default_value = "zone_first")]
    classification_precedence: String,

    /// Serialize batch writes behind a mutex (constrained deployments)
    #[arg(long, env = "SINGLE_WRITER", default_value_t = false)]
    single_writer: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; ignore a missing file.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowgate_server=debug,flowgate_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let precedence: ClassificationPrecedence = args
        .classification_precedence
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let Some(database_url) = args.database_url.as_deref() else {
        error!("DATABASE_URL environment variable is required");
        anyhow::bail!("DATABASE_URL not set");
    };
    if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
        anyhow::bail!("Invalid database URL: must start with postgres:// or postgresql://");
    }

    let pool = db::connect(database_url).await?;
    db::initialize_schema(&pool).await?;
    info!("Database initialized successfully");

    // Jobs left non-terminal by a previous process did not survive it.
    match store::mark_stale_jobs_error(&pool).await {
        Ok(0) => {}
        Ok(n) => info!(count = n, "Marked stale ingest job(s) as error on startup"),
        Err(e) => warn!(error = %e, "Startup job recovery failed"),
    }

    let writer = Arc::new(Writer::new(pool.clone(), args.single_writer));
    let classifier = Arc::new(Classifier::new(pool.clone(), precedence));
    let ops = Arc::new(Ops::new(
        pool.clone(),
        writer,
        classifier,
        args.uploads_dir.clone(),
        Some(args.batch_size),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let syslog_task = {
        let ops = ops.clone();
        let host = args.syslog_host.clone();
        let port = args.syslog_port;
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) =
                flowgate_core::ingest::syslog_udp::run_syslog_udp_server(&host, port, ops, shutdown)
                    .await
            {
                error!(error = %e, "UDP syslog receiver failed");
            }
        })
    };

    let worker_task = {
        let ctx = ops.import_context();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(worker::run_worker_loop(ctx, shutdown))
    };

    let retention_task = {
        let pool = pool.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(retention::run_retention_loop(pool, shutdown))
    };

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, stopping background loops...");
    let _ = shutdown_tx.send(());

    let _ = syslog_task.await;
    let _ = worker_task.await;
    let _ = retention_task.await;

    info!("Flowgate server stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
