//! Snapshot-bound read-only SQL execution (§4.4): resolve a snapshot (by id,
//! by time, or by barrier wait on a visibility token), bind each referenced
//! table's active file set as a view, and run the admitted query against it.
//!
//! Grounded on `database/src/query.rs`'s resolve-then-execute split for the
//! overall flow; the barrier-poll idiom is grounded on
//! `database/src/retention.rs`'s interval-poll loop shape.
use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
        SystemTime,
    },
};

use datafusion::prelude::{
    ParquetReadOptions,
    SessionContext,
};
use duckmesh_common::{
    catalog::CatalogReader,
    errors::ErrorMetadata,
    knobs::{
        BARRIER_POLL_INTERVAL_MS,
        DEFAULT_CONSISTENCY_TIMEOUT_MS,
    },
    types::{
        Snapshot,
        SnapshotId,
        TenantId,
    },
    Runtime,
};
use duckmesh_object_store::{
    ObjectKey,
    ObjectStore,
};
use regex::Regex;
use tokio_util::sync::CancellationToken;

/// Which snapshot a query binds against (§4.4).
#[derive(Debug, Clone)]
pub enum SnapshotSelector {
    SnapshotId(SnapshotId),
    SnapshotTime(SystemTime),
    MinVisibilityToken(i64),
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub tenant_id: TenantId,
    pub sql: String,
    pub selector: Option<SnapshotSelector>,
    pub consistency_timeout_ms: Option<u64>,
    pub row_limit: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryStats {
    pub duration_ms: u64,
    pub scanned_files: u64,
    pub scanned_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub snapshot_id: SnapshotId,
    pub snapshot_time: SystemTime,
    pub max_visibility_token: i64,
    pub stats: QueryStats,
}

/// Only a `select`/`with` prefix is admitted; parameter binding has no
/// supported transport and is rejected explicitly (§4.4).
fn validate_sql(sql: &str) -> anyhow::Result<()> {
    let trimmed = sql.trim_start().to_ascii_lowercase();
    if !(trimmed.starts_with("select") || trimmed.starts_with("with")) {
        anyhow::bail!(ErrorMetadata::bad_request("SQL_NOT_READ_ONLY", "only select/with statements are admitted"));
    }
    if sql.contains('?') || Regex::new(r"\$\d+").unwrap().is_match(sql) {
        anyhow::bail!(ErrorMetadata::bad_request("SQL_PARAM_BINDING_UNSUPPORTED", "parameter binding is not supported"));
    }
    Ok(())
}

fn wrap_row_limit(sql: &str, row_limit: Option<u64>) -> String {
    match row_limit {
        Some(n) if n > 0 => format!("SELECT * FROM ({sql}) AS wrapped LIMIT {n}"),
        _ => sql.to_string(),
    }
}

fn referenced_table_names(sql: &str) -> Vec<String> {
    let re = Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    let mut seen = Vec::new();
    for cap in re.captures_iter(sql) {
        let name = cap[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

pub struct Executor<C: CatalogReader, S: ObjectStore, RT: Runtime> {
    catalog: Arc<C>,
    store: Arc<S>,
    runtime: RT,
}

impl<C: CatalogReader, S: ObjectStore, RT: Runtime> Executor<C, S, RT> {
    pub fn new(catalog: Arc<C>, store: Arc<S>, runtime: RT) -> Self {
        Self { catalog, store, runtime }
    }

    async fn resolve_snapshot(&self, req: &QueryRequest, cancel: &CancellationToken) -> anyhow::Result<Snapshot> {
        match &req.selector {
            Some(SnapshotSelector::SnapshotId(id)) => self
                .catalog
                .get_snapshot_by_id(&req.tenant_id, *id)
                .await?
                .ok_or_else(|| anyhow::Error::new(ErrorMetadata::snapshot_not_found(format!("no snapshot {id:?}")))),
            Some(SnapshotSelector::SnapshotTime(t)) => self
                .catalog
                .get_snapshot_by_time(&req.tenant_id, *t)
                .await?
                .ok_or_else(|| anyhow::Error::new(ErrorMetadata::snapshot_not_found("no snapshot at or before the requested time"))),
            Some(SnapshotSelector::MinVisibilityToken(token)) => self.wait_for_barrier(req, *token, cancel).await,
            None => self
                .catalog
                .get_latest_snapshot(&req.tenant_id)
                .await?
                .ok_or_else(|| anyhow::Error::new(ErrorMetadata::snapshot_not_found("tenant has no snapshot yet"))),
        }
    }

    /// Polls until the tenant's latest snapshot token clears `token`, the
    /// timeout elapses, or `cancel` fires — whichever comes first (§4.4, §5).
    async fn wait_for_barrier(&self, req: &QueryRequest, token: i64, cancel: &CancellationToken) -> anyhow::Result<Snapshot> {
        let timeout = Duration::from_millis(req.consistency_timeout_ms.unwrap_or(*DEFAULT_CONSISTENCY_TIMEOUT_MS));
        let poll_interval = Duration::from_millis(*BARRIER_POLL_INTERVAL_MS);
        let deadline = Instant::now() + timeout;
        let mut last_observed = 0i64;
        loop {
            if let Some(snapshot) = self.catalog.get_latest_snapshot(&req.tenant_id).await? {
                last_observed = snapshot.max_visibility_token;
                if snapshot.max_visibility_token >= token {
                    return Ok(snapshot);
                }
            }
            if Instant::now() >= deadline {
                return Err(anyhow::Error::new(ErrorMetadata::consistency_timeout(last_observed, token)));
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(anyhow::Error::new(ErrorMetadata::consistency_timeout(last_observed, token)).context("query cancelled while waiting on barrier"));
                }
                _ = self.runtime.wait(poll_interval) => {}
            }
        }
    }

    pub async fn query(&self, req: QueryRequest, cancel: &CancellationToken) -> anyhow::Result<QueryResult> {
        let started = Instant::now();
        validate_sql(&req.sql)?;
        let snapshot = self.resolve_snapshot(&req, cancel).await?;
        let sql = wrap_row_limit(&req.sql, req.row_limit);

        let ctx = SessionContext::new();
        let mut tempdirs = Vec::new();
        let mut scanned_files = 0u64;
        let mut scanned_bytes = 0u64;

        for table_name in referenced_table_names(&sql) {
            let Some(table) = self.catalog.get_table_by_name(&req.tenant_id, &table_name).await? else {
                continue;
            };
            let files = self
                .catalog
                .list_snapshot_files_for_table(&req.tenant_id, snapshot.snapshot_id, table.table_id)
                .await?;
            if files.is_empty() {
                continue;
            }
            let dir = tempfile::tempdir()?;
            for (i, active) in files.iter().enumerate() {
                let key = ObjectKey::from_stored_path(active.file.object_path.clone());
                let bytes = self.store.get(&key).await?;
                scanned_files += 1;
                scanned_bytes += active.file.file_size_bytes as u64;
                let path = dir.path().join(format!("part-{i}.parquet"));
                tokio::fs::write(&path, &bytes).await?;
            }
            ctx.register_parquet(&table_name, dir.path().to_str().expect("tempdir path is utf8"), ParquetReadOptions::default())
                .await?;
            tempdirs.push(dir);
        }

        let df = ctx.sql(&sql).await?;
        let batches = df.collect().await?;
        let (columns, rows) = render_batches(&batches)?;

        Ok(QueryResult {
            columns,
            rows,
            snapshot_id: snapshot.snapshot_id,
            snapshot_time: snapshot.created_at,
            max_visibility_token: snapshot.max_visibility_token,
            stats: QueryStats {
                duration_ms: started.elapsed().as_millis() as u64,
                scanned_files,
                scanned_bytes,
            },
        })
    }
}

/// Coerces every cell to its string representation for transport (§4.4).
fn render_batches(batches: &[datafusion::arrow::record_batch::RecordBatch]) -> anyhow::Result<(Vec<String>, Vec<Vec<String>>)> {
    use datafusion::arrow::util::display::{
        ArrayFormatter,
        FormatOptions,
    };

    let Some(schema) = batches.first().map(|b| b.schema()) else {
        return Ok((Vec::new(), Vec::new()));
    };
    let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();

    let mut rows = Vec::new();
    let options = FormatOptions::default();
    for batch in batches {
        let formatters = batch
            .columns()
            .iter()
            .map(|col| ArrayFormatter::try_new(col.as_ref(), &options))
            .collect::<Result<Vec<_>, _>>()?;
        for row_idx in 0..batch.num_rows() {
            let row: Vec<String> = formatters.iter().map(|f| f.value(row_idx).to_string()).collect();
            rows.push(row);
        }
    }
    Ok((columns, rows))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc as StdArc;

    use duckmesh_common::{
        testing::InMemoryCatalog,
        types::{
            IngestEnvelope,
            IngestOp,
        },
        TokioRuntime,
    };
    use duckmesh_coordinator::Committer;
    use duckmesh_object_store::InMemoryObjectStore;

    use super::*;

    async fn seeded_tenant() -> (StdArc<InMemoryCatalog>, StdArc<InMemoryObjectStore>, TenantId) {
        let catalog = StdArc::new(InMemoryCatalog::new());
        let tenant = TenantId("t1".to_string());
        let table = catalog.create_table(&tenant, "events", vec![]);
        let store = StdArc::new(InMemoryObjectStore::new());
        catalog
            .publish(vec![
                IngestEnvelope {
                    tenant_id: tenant.clone(),
                    table_id: table.table_id,
                    idempotency_key: "k1".to_string(),
                    op: IngestOp::Insert,
                    payload_json: serde_json::json!({"v": 1}),
                    event_time: None,
                },
                IngestEnvelope {
                    tenant_id: tenant.clone(),
                    table_id: table.table_id,
                    idempotency_key: "k2".to_string(),
                    op: IngestOp::Insert,
                    payload_json: serde_json::json!({"v": 2}),
                    event_time: None,
                },
            ])
            .await
            .unwrap();
        let committer = Committer::new(TokioRuntime, catalog.clone(), store.clone(), "coordinator-1");
        committer.tick().await.unwrap();
        (catalog, store, tenant)
    }

    #[tokio::test]
    async fn query_latest_snapshot_counts_rows() {
        let (catalog, store, tenant) = seeded_tenant().await;
        let executor = Executor::new(catalog, store, TokioRuntime);
        let result = executor
            .query(
                QueryRequest {
                    tenant_id: tenant,
                    sql: "select count(*) as n from events".to_string(),
                    selector: None,
                    consistency_timeout_ms: None,
                    row_limit: None,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["n"]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0][0], "2");
        assert_eq!(result.stats.scanned_files, 1);
    }

    #[tokio::test]
    async fn query_rejects_non_select_statements() {
        let (catalog, store, tenant) = seeded_tenant().await;
        let executor = Executor::new(catalog, store, TokioRuntime);
        let err = executor
            .query(
                QueryRequest {
                    tenant_id: tenant,
                    sql: "delete from events".to_string(),
                    selector: None,
                    consistency_timeout_ms: None,
                    row_limit: None,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("read-only") || format!("{err:#}").contains("select"));
    }

    #[tokio::test]
    async fn query_rejects_parameter_binding() {
        let (catalog, store, tenant) = seeded_tenant().await;
        let executor = Executor::new(catalog, store, TokioRuntime);
        let err = executor
            .query(
                QueryRequest {
                    tenant_id: tenant,
                    sql: "select * from events where table_id = $1".to_string(),
                    selector: None,
                    consistency_timeout_ms: None,
                    row_limit: None,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("parameter"));
    }

    #[tokio::test]
    async fn min_visibility_token_barrier_times_out_when_never_satisfied() {
        let (catalog, store, tenant) = seeded_tenant().await;
        let executor = Executor::new(catalog, store, TokioRuntime);
        let err = executor
            .query(
                QueryRequest {
                    tenant_id: tenant,
                    sql: "select count(*) as n from events".to_string(),
                    selector: Some(SnapshotSelector::MinVisibilityToken(1_000_000)),
                    consistency_timeout_ms: Some(100),
                    row_limit: None,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(duckmesh_common::errors::ErrorMetadataAnyhowExt::is_consistency_timeout(&err));
    }

    #[tokio::test]
    async fn min_visibility_token_barrier_returns_promptly_on_cancel() {
        let (catalog, store, tenant) = seeded_tenant().await;
        let executor = Executor::new(catalog, store, TokioRuntime);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        let err = executor
            .query(
                QueryRequest {
                    tenant_id: tenant,
                    sql: "select count(*) as n from events".to_string(),
                    selector: Some(SnapshotSelector::MinVisibilityToken(1_000_000)),
                    consistency_timeout_ms: Some(60_000),
                    row_limit: None,
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(duckmesh_common::errors::ErrorMetadataAnyhowExt::is_consistency_timeout(&err));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
