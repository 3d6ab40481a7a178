//! transferindex service binary.
//!
//! Wires environment configuration, the Postgres store, the retrying chain
//! gateway, the finalizer task, and the ingestion driver; handles SIGINT
//! shutdown.
//!
//! Exit codes: 0 on graceful stop (including cancellation and logged runtime
//! errors in one-shot mode); 1 on initialization failure.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use transferindex_core::error::IndexerError;
use transferindex_core::{IndexerSettings, RdbSettings};
use transferindex_engine::{metrics, Driver, DriverConfig, Finalizer};
use transferindex_evm::HttpGateway;
use transferindex_storage::{PostgresStore, Store};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %format!("{e:#}"), "initialization failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let settings = IndexerSettings::from_env().context("indexer configuration")?;
    let rdb = RdbSettings::from_env().context("store configuration")?;

    if let Some(addr) = &settings.metrics_addr {
        let addr: std::net::SocketAddr = addr.parse().context("METRICS_ADDR")?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("install metrics exporter")?;
        metrics::describe();
        tracing::info!(%addr, "Prometheus metrics listener started");
    }

    if settings.safe_depth < settings.ingestion_depth {
        tracing::warn!(
            safe_depth = settings.safe_depth,
            ingestion_depth = settings.ingestion_depth,
            "safe depth is below ingestion depth; finalization may outrun ingestion"
        );
    }

    let store = PostgresStore::connect(&rdb.connection_url())
        .await
        .context("connect to store")?;
    tracing::info!(host = %rdb.host, db = %rdb.db_name, "connected to store");

    if let Some(path) = &rdb.migration_url {
        let sql = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read migrations from {path}"))?;
        store.run_migrations(&sql).await.context("apply migrations")?;
        tracing::info!(path = %path, "applied migrations");
    }

    let gateway = Arc::new(HttpGateway::new(&settings.rpc_url).context("build gateway")?);
    tracing::info!(rpc_url = %settings.rpc_url, "gateway ready");

    // The cursor is derived, never written: resume from the last height whose
    // processed mark landed, or from START_BLOCK on a cold start.
    let cursor = match store.get_latest_processed_block_number().await {
        Ok(number) => {
            tracing::info!(last_processed = number, "resuming from cursor");
            number
        }
        Err(IndexerError::BlockNotFound) => {
            let start = settings
                .start_block
                .ok_or_else(|| anyhow!("cursor is empty and START_BLOCK is not set"))?;
            tracing::info!(start_block = start, "no cursor found, starting fresh");
            start as i64 - 1
        }
        Err(e) => return Err(e).context("read cursor"),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    let store = Arc::new(store);
    let finalizer = Finalizer::new(
        gateway.clone(),
        store.clone(),
        cancel.clone(),
        settings.safe_depth,
        settings.finalize_tick,
    );
    let finalizer_handle = tokio::spawn(finalizer.run());

    let driver = Driver::new(
        gateway,
        store,
        cancel.clone(),
        DriverConfig {
            ingestion_depth: settings.ingestion_depth,
            continuous: settings.continuous,
            poll_interval: settings.poll_interval,
        },
    );
    let last_processed = driver.run(cursor).await;

    cancel.cancel();
    let _ = finalizer_handle.await;

    tracing::info!(last_processed, "indexer stopped");
    Ok(())
}
