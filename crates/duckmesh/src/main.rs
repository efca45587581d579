//! Binary entry point. Grounded on `local_backend/src/main.rs`'s
//! clap-config-then-tracing-bootstrap-then-run shape; the HTTP service,
//! Sentry, and sodiumoxide setup from that file have no counterpart here
//! since this binary's boundary is a CLI over plain async functions, not an
//! HTTP server.
mod config;
mod ops;

use std::{
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use config::{
    Cli,
    Command,
};
use duckmesh_catalog_postgres::PostgresCatalog;
use duckmesh_common::{
    knobs::{
        COMPACTION_POLL_INTERVAL_SECONDS,
        RETENTION_POLL_INTERVAL_SECONDS,
    },
    types::TenantId,
    Catalog,
    TokioRuntime,
};
use duckmesh_coordinator::Committer;
use duckmesh_maintenance::{
    compact_all_tenants,
    gc_all_tenants,
};
use duckmesh_object_store::ObjectStore;
use duckmesh_object_store_s3::S3Storage;
use duckmesh_query::{
    Executor,
    QueryRequest,
    SnapshotSelector,
};
use tokio_util::sync::CancellationToken;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = match cli.command {
        Command::Serve { .. } => duckmesh_common::logging::init_service(),
        _ => duckmesh_common::logging::init_tool(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing::info!(catalog_url = %redact_url(&cli.catalog_url), bucket = %cli.object_store_bucket, "starting duckmesh");
    let catalog = Arc::new(PostgresCatalog::connect(&cli.catalog_url).await?);
    catalog.ensure_schema().await?;
    let store = Arc::new(S3Storage::from_env(cli.object_store_bucket.clone()).await);

    match cli.command {
        Command::Serve { consumer_id } => serve(catalog, store, consumer_id).await,
        Command::Compact { tenant } => {
            let outcomes = ops::run_compaction(catalog.as_ref(), store.as_ref(), &TokioRuntime, tenant.map(TenantId)).await?;
            print_json(&outcomes)
        },
        Command::Gc { tenant } => {
            let reports = ops::run_gc(catalog.as_ref(), store.as_ref(), &TokioRuntime, tenant.map(TenantId)).await?;
            print_json(&reports)
        },
        Command::Integrity { tenant } => {
            let reports = ops::run_integrity(catalog.as_ref(), store.as_ref(), tenant.map(TenantId)).await?;
            let healthy = reports.iter().all(|r| r.is_healthy());
            print_json(&reports)?;
            if !healthy {
                anyhow::bail!("integrity check failed for one or more tenants");
            }
            Ok(())
        },
        Command::Lag { tenant } => {
            let stats = ops::lag_stats(catalog.as_ref(), &TenantId(tenant)).await?;
            print_json(&stats)
        },
        Command::Query {
            tenant,
            sql,
            min_visibility_token,
            consistency_timeout_ms,
            row_limit,
        } => {
            let executor = Executor::new(catalog.clone(), store.clone(), TokioRuntime);
            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c_cancel.cancel();
                }
            });
            let result = executor
                .query(
                    QueryRequest {
                        tenant_id: TenantId(tenant),
                        sql,
                        selector: min_visibility_token.map(SnapshotSelector::MinVisibilityToken),
                        consistency_timeout_ms,
                        row_limit,
                    },
                    &cancel,
                )
                .await?;
            println!("{}", result.columns.join("\t"));
            for row in &result.rows {
                println!("{}", row.join("\t"));
            }
            tracing::info!(
                snapshot_id = result.snapshot_id.0,
                scanned_files = result.stats.scanned_files,
                scanned_bytes = result.stats.scanned_bytes,
                duration_ms = result.stats.duration_ms,
                "query complete"
            );
            Ok(())
        },
    }
}

/// Runs the commit coordinator plus periodic compaction and retention
/// sweeps until Ctrl-C, then cancels every background task and waits for it
/// to finish its current unit of work before exiting.
async fn serve<C, S>(catalog: Arc<C>, store: Arc<S>, consumer_id: String) -> anyhow::Result<()>
where
    C: Catalog + 'static,
    S: ObjectStore + 'static,
{
    let shutdown = CancellationToken::new();

    let committer = Committer::new(TokioRuntime, catalog.clone(), store.clone(), consumer_id);
    let committer_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { committer.run(shutdown).await }
    });

    let compaction_task = tokio::spawn({
        let shutdown = shutdown.clone();
        let catalog = catalog.clone();
        let store = store.clone();
        async move {
            let interval = Duration::from_secs(*COMPACTION_POLL_INTERVAL_SECONDS);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = compact_all_tenants(catalog.as_ref(), store.as_ref(), &TokioRuntime).await {
                    tracing::error!("compaction sweep failed: {e:#}");
                }
            }
        }
    });

    let retention_task = tokio::spawn({
        let shutdown = shutdown.clone();
        let catalog = catalog.clone();
        let store = store.clone();
        async move {
            let interval = Duration::from_secs(*RETENTION_POLL_INTERVAL_SECONDS);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = gc_all_tenants(catalog.as_ref(), store.as_ref(), &TokioRuntime).await {
                    tracing::error!("retention sweep failed: {e:#}");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");
    shutdown.cancel();

    let (committer_result, compaction_result, retention_result) = tokio::join!(committer_task, compaction_task, retention_task);
    committer_result??;
    compaction_result?;
    retention_result?;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Strips a password/user-info component before logging a connection string.
fn redact_url(url: &str) -> String {
    match url.find('@') {
        Some(at) => match url.find("://") {
            Some(scheme_end) => format!("{}://***{}", &url[..scheme_end], &url[at..]),
            None => "***".to_string(),
        },
        None => url.to_string(),
    }
}
