//! `Catalog`/`CatalogReader` backed by `tokio-postgres`, grounded on the
//! teacher's `postgres` crate (connection setup and query-building idiom).
//! A single shared connection is used rather than the teacher's LRU
//! connection pool (`lru`-backed in `postgres/src/lib.rs`) — DuckMesh's
//! catalog traffic is short transactions, not the long-lived per-client
//! connections Convex's `postgres` crate pools; a real deployment would
//! still want a pool (e.g. `deadpool-postgres`), noted in `DESIGN.md`.
mod connection;
mod schema;
mod sql;

use std::{
    sync::Arc,
    time::{
        Duration,
        SystemTime,
    },
};

use async_trait::async_trait;
use duckmesh_common::{
    catalog::{
        Catalog,
        CatalogReader,
        LagStats,
        PublishBatchRequest,
        PublishCompactionRequest,
    },
    errors::ErrorMetadata,
    types::{
        ActiveFile,
        BatchId,
        ClaimedBatch,
        DataFile,
        EventId,
        FileId,
        IngestEnvelope,
        IngestEvent,
        IngestEventState,
        IngestOp,
        PartitionSpec,
        PublishResult,
        Snapshot,
        SnapshotId,
        TableDef,
        TableId,
        TenantId,
    },
};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio_postgres::Row;

pub struct PostgresCatalog {
    client: Arc<tokio_postgres::Client>,
    /// Serializes the multi-statement publish transactions below. A real
    /// deployment would check out an exclusive connection per transaction
    /// from a pool instead; with a single shared `tokio_postgres::Client`
    /// (whose statements all run on one wire connection, and whose
    /// `transaction()` needs `&mut self`) this lock is what keeps BEGIN/
    /// COMMIT pairs from interleaving across concurrent publishers.
    txn_lock: Mutex<()>,
}

impl PostgresCatalog {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let config = connection::config_from_url(url)?;
        let client = connection::connect(&config).await?;
        Ok(Self {
            client: Arc::new(client),
            txn_lock: Mutex::new(()),
        })
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for stmt in schema::SCHEMA_STATEMENTS {
            self.client
                .batch_execute(stmt)
                .await
                .map_err(|e| anyhow::Error::new(e).context("applying catalog schema"))?;
        }
        Ok(())
    }

    pub async fn ensure_tenant(&self, tenant_id: &TenantId) -> anyhow::Result<()> {
        self.client
            .execute(
                "INSERT INTO tenant (tenant_id) VALUES ($1) ON CONFLICT DO NOTHING",
                &[&tenant_id.0],
            )
            .await?;
        Ok(())
    }
}

fn row_to_ingest_event(row: &Row) -> IngestEvent {
    let op: String = row.get("op");
    let state: String = row.get("state");
    IngestEvent {
        event_id: EventId(row.get("event_id")),
        tenant_id: TenantId(row.get("tenant_id")),
        table_id: TableId(row.get("table_id")),
        idempotency_key: row.get("idempotency_key"),
        op: parse_op(&op),
        payload_json: row.get("payload_json"),
        event_time: row.get::<_, Option<SystemTime>>("event_time"),
        ingested_at: row.get("ingested_at"),
        state: parse_event_state(&state),
        lease_owner: row.get("lease_owner"),
        lease_until: row.get::<_, Option<SystemTime>>("lease_until"),
    }
}

fn parse_op(s: &str) -> IngestOp {
    match s {
        "insert" => IngestOp::Insert,
        "upsert" => IngestOp::Upsert,
        "delete" => IngestOp::Delete,
        other => panic!("unknown ingest_op in catalog row: {other}"),
    }
}

fn parse_event_state(s: &str) -> IngestEventState {
    match s {
        "accepted" => IngestEventState::Accepted,
        "claimed" => IngestEventState::Claimed,
        "committed" => IngestEventState::Committed,
        "failed" => IngestEventState::Failed,
        other => panic!("unknown ingest_event_state in catalog row: {other}"),
    }
}

fn row_to_snapshot(row: &Row) -> Snapshot {
    Snapshot {
        snapshot_id: SnapshotId(row.get("snapshot_id")),
        tenant_id: TenantId(row.get("tenant_id")),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        max_visibility_token: row.get("max_visibility_token"),
        parent_snapshot_id: row.get::<_, Option<i64>>("parent_snapshot_id").map(SnapshotId),
    }
}

fn row_to_active_file(row: &Row, tenant_id: &TenantId) -> Option<ActiveFile> {
    let change_type: String = row.get("change_type");
    if change_type != "add" {
        return None;
    }
    Some(ActiveFile {
        table_id: TableId(row.get("table_id")),
        file: DataFile {
            file_id: FileId(row.get("file_id")),
            tenant_id: tenant_id.clone(),
            table_id: TableId(row.get("table_id")),
            object_path: row.get("object_path"),
            record_count: row.get("record_count"),
            file_size_bytes: row.get("file_size_bytes"),
            min_event_time: row.get::<_, Option<SystemTime>>("min_event_time"),
            max_event_time: row.get::<_, Option<SystemTime>>("max_event_time"),
            stats_json: row.get("stats_json"),
            created_at: row.get("created_at"),
        },
    })
}

#[async_trait]
impl CatalogReader for PostgresCatalog {
    async fn get_table(&self, tenant_id: &TenantId, table_id: TableId) -> anyhow::Result<Option<TableDef>> {
        let row = self.client.query_opt(sql::GET_TABLE, &[&tenant_id.0, &table_id.0]).await?;
        Ok(row.map(|r| row_to_table_def(&r)))
    }

    async fn get_table_by_name(&self, tenant_id: &TenantId, table_name: &str) -> anyhow::Result<Option<TableDef>> {
        let row = self
            .client
            .query_opt(sql::GET_TABLE_BY_NAME, &[&tenant_id.0, &table_name])
            .await?;
        Ok(row.map(|r| row_to_table_def(&r)))
    }

    async fn get_latest_snapshot(&self, tenant_id: &TenantId) -> anyhow::Result<Option<Snapshot>> {
        let row = self.client.query_opt(sql::GET_LATEST_SNAPSHOT, &[&tenant_id.0]).await?;
        Ok(row.map(|r| row_to_snapshot(&r)))
    }

    async fn get_snapshot_by_id(&self, tenant_id: &TenantId, snapshot_id: SnapshotId) -> anyhow::Result<Option<Snapshot>> {
        let row = self
            .client
            .query_opt(sql::GET_SNAPSHOT_BY_ID, &[&tenant_id.0, &snapshot_id.0])
            .await?;
        Ok(row.map(|r| row_to_snapshot(&r)))
    }

    async fn get_snapshot_by_time(&self, tenant_id: &TenantId, at: SystemTime) -> anyhow::Result<Option<Snapshot>> {
        let row = self
            .client
            .query_opt(sql::GET_SNAPSHOT_BY_TIME, &[&tenant_id.0, &at])
            .await?;
        Ok(row.map(|r| row_to_snapshot(&r)))
    }

    async fn list_snapshot_files(&self, tenant_id: &TenantId, snapshot_id: SnapshotId) -> anyhow::Result<Vec<ActiveFile>> {
        let rows = self
            .client
            .query(sql::LIST_ACTIVE_FILES, &[&tenant_id.0, &snapshot_id.0])
            .await?;
        Ok(rows.iter().filter_map(|r| row_to_active_file(r, tenant_id)).collect())
    }

    async fn list_snapshot_files_for_table(
        &self,
        tenant_id: &TenantId,
        snapshot_id: SnapshotId,
        table_id: TableId,
    ) -> anyhow::Result<Vec<ActiveFile>> {
        let rows = self
            .client
            .query(sql::LIST_ACTIVE_FILES_FOR_TABLE, &[&tenant_id.0, &snapshot_id.0, &table_id.0])
            .await?;
        Ok(rows.iter().filter_map(|r| row_to_active_file(r, tenant_id)).collect())
    }

    async fn lag_stats(&self, tenant_id: &TenantId) -> anyhow::Result<LagStats> {
        let row = self
            .client
            .query_one(sql::LAG_STATS, &[&tenant_id.0])
            .await
            .map_err(|e| anyhow::Error::new(e).context("computing lag stats"))?;
        let snapshot_row = self.client.query_one(sql::LATEST_SNAPSHOT_ID_FOR_LAG, &[&tenant_id.0]).await?;
        Ok(LagStats {
            accepted_events: row.get("accepted_events"),
            claimed_events: row.get("claimed_events"),
            oldest_pending_ingest_at: row.get::<_, Option<SystemTime>>("oldest_pending_ingest_at"),
            latest_visibility_token: row.get("latest_visibility_token"),
            latest_snapshot_id: snapshot_row.get::<_, Option<i64>>("id"),
        })
    }

    async fn gc_candidates(&self, tenant_id: &TenantId, min_keep_snapshot_id: SnapshotId) -> anyhow::Result<Vec<DataFile>> {
        let rows = self.client.query(sql::GC_CANDIDATES, &[&tenant_id.0]).await?;
        Ok(rows
            .iter()
            .filter(|r| {
                let change: String = r.get("change_type");
                let snap: i64 = r.get("snapshot_id");
                change == "remove" && snap < min_keep_snapshot_id.0
            })
            .map(|r| DataFile {
                file_id: FileId(r.get("file_id")),
                tenant_id: tenant_id.clone(),
                table_id: TableId(r.get("table_id")),
                object_path: r.get("object_path"),
                record_count: r.get("record_count"),
                file_size_bytes: r.get("file_size_bytes"),
                min_event_time: r.get::<_, Option<SystemTime>>("min_event_time"),
                max_event_time: r.get::<_, Option<SystemTime>>("max_event_time"),
                stats_json: r.get("stats_json"),
                created_at: r.get("created_at"),
            })
            .collect())
    }

    async fn list_tenants(&self) -> anyhow::Result<Vec<TenantId>> {
        let rows = self.client.query(sql::LIST_TENANTS, &[]).await?;
        Ok(rows.iter().map(|r| TenantId(r.get("tenant_id"))).collect())
    }

    async fn nth_latest_snapshot_id(&self, tenant_id: &TenantId, offset_from_latest: u32) -> anyhow::Result<Option<SnapshotId>> {
        let row = self
            .client
            .query_opt(sql::NTH_LATEST_SNAPSHOT_ID, &[&tenant_id.0, &(offset_from_latest as i64)])
            .await?;
        Ok(row.map(|r| SnapshotId(r.get("snapshot_id"))))
    }
}

fn row_to_table_def(row: &Row) -> TableDef {
    let pk_cols: JsonValue = row.get("primary_key_cols");
    let partition_spec: JsonValue = row.get("partition_spec");
    TableDef {
        table_id: TableId(row.get("table_id")),
        tenant_id: TenantId(row.get("tenant_id")),
        table_name: row.get("table_name"),
        primary_key_cols: pk_cols
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        partition_spec: PartitionSpec {
            by_event_time: partition_spec.get("by_event_time").and_then(JsonValue::as_bool).unwrap_or(true),
        },
        active_schema_version: row.get("active_schema_version"),
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn publish(&self, envelopes: Vec<IngestEnvelope>) -> anyhow::Result<Vec<PublishResult>> {
        let mut results = Vec::with_capacity(envelopes.len());
        for env in envelopes {
            let op = env.op.as_str();
            let row = self
                .client
                .query_one(
                    sql::PUBLISH_EVENT,
                    &[&env.tenant_id.0, &env.table_id.0, &env.idempotency_key, &op, &env.payload_json, &env.event_time],
                )
                .await
                .map_err(|e| anyhow::Error::new(e).context("publishing ingest event"))?;
            let event_id = EventId(row.get("event_id"));
            let inserted: bool = row.get("inserted");
            results.push(PublishResult {
                event_id,
                visibility_token: event_id.as_visibility_token(),
                inserted,
            });
        }
        Ok(results)
    }

    async fn claim_batch(&self, consumer_id: &str, limit: u32, lease_seconds: u64) -> anyhow::Result<ClaimedBatch> {
        let lease_until = SystemTime::now() + Duration::from_secs(lease_seconds);
        let rows = self
            .client
            .query(sql::CLAIM_BATCH, &[&(limit as i64), &consumer_id, &(lease_seconds as f64)])
            .await
            .map_err(|e| anyhow::Error::new(e).context("claiming batch"))?;

        if rows.is_empty() {
            return Ok(ClaimedBatch {
                batch_id: BatchId(0),
                lease_until,
                envelopes: Vec::new(),
            });
        }

        let batch_row = self
            .client
            .query_one(
                "INSERT INTO claim_batch (consumer_id, lease_until) VALUES ($1, $2) RETURNING batch_id",
                &[&consumer_id, &lease_until],
            )
            .await?;
        let batch_id = BatchId(batch_row.get("batch_id"));

        for row in &rows {
            let event_id: i64 = row.get("event_id");
            self.client
                .execute(
                    "INSERT INTO claim_item (batch_id, event_id) VALUES ($1, $2)",
                    &[&batch_id.0, &event_id],
                )
                .await?;
        }

        Ok(ClaimedBatch {
            batch_id,
            lease_until,
            envelopes: rows.iter().map(row_to_ingest_event).collect(),
        })
    }

    async fn ack(&self, batch_id: BatchId, event_ids: &[EventId]) -> anyhow::Result<()> {
        let ids: Vec<i64> = event_ids.iter().map(|e| e.0).collect();
        self.client.execute(sql::ACK_EVENTS, &[&ids]).await?;
        self.client.execute(sql::RECOMPUTE_BATCH_STATE, &[&batch_id.0]).await?;
        Ok(())
    }

    async fn nack(&self, batch_id: BatchId, event_ids: &[EventId], _reason: &str) -> anyhow::Result<()> {
        let ids: Vec<i64> = event_ids.iter().map(|e| e.0).collect();
        self.client.execute(sql::NACK_EVENTS, &[&ids]).await?;
        self.client
            .execute("UPDATE claim_batch SET state = 'failed' WHERE batch_id = $1", &[&batch_id.0])
            .await?;
        Ok(())
    }

    async fn extend_lease(&self, batch_id: BatchId, lease_seconds: u64) -> anyhow::Result<()> {
        let row = self
            .client
            .query_opt("SELECT state::text FROM claim_batch WHERE batch_id = $1", &[&batch_id.0])
            .await?;
        match row.map(|r| r.get::<_, String>(0)) {
            Some(state) if state == "claimed" => {},
            _ => anyhow::bail!(ErrorMetadata::conflict(format!("batch {} is not claimed", batch_id.0))),
        }
        self.client.execute(sql::EXTEND_LEASE, &[&batch_id.0, &(lease_seconds as f64)]).await?;
        self.client
            .execute(
                "UPDATE claim_batch SET lease_until = now() + make_interval(secs => $2) WHERE batch_id = $1",
                &[&batch_id.0, &(lease_seconds as f64)],
            )
            .await?;
        Ok(())
    }

    async fn requeue_expired(&self) -> anyhow::Result<u64> {
        let row = self.client.query_one(sql::REQUEUE_EXPIRED, &[]).await?;
        let n: i64 = row.get("n");
        self.client.execute(sql::FAIL_STALE_BATCHES, &[]).await?;
        Ok(n as u64)
    }

    async fn allocate_snapshot_id(&self) -> anyhow::Result<SnapshotId> {
        let row = self.client.query_one(sql::ALLOCATE_SNAPSHOT_ID, &[]).await?;
        Ok(SnapshotId(row.get("id")))
    }

    async fn publish_batch(&self, req: PublishBatchRequest) -> anyhow::Result<Snapshot> {
        let _guard = self.txn_lock.lock().await;
        self.client.batch_execute("BEGIN").await?;

        let result: anyhow::Result<Snapshot> = async {
            let parent = self
                .client
                .query_opt(sql::GET_LATEST_SNAPSHOT, &[&req.tenant_id.0])
                .await?
                .map(|r| r.get::<_, i64>("snapshot_id"));

            self.client
                .execute(
                    "INSERT INTO snapshot (snapshot_id, tenant_id, created_by, max_visibility_token, parent_snapshot_id) VALUES ($1, $2, 'coordinator', $3, $4)",
                    &[&req.snapshot_id.0, &req.tenant_id.0, &req.file.max_event_id.0, &parent],
                )
                .await?;

            let file_row = self
                .client
                .query_one(
                    sql::INSERT_DATA_FILE,
                    &[
                        &req.tenant_id.0,
                        &req.file.table_id.0,
                        &req.file.object_path,
                        &req.file.record_count,
                        &req.file.file_size_bytes,
                        &req.file.min_event_time,
                        &req.file.max_event_time,
                        &req.file.stats_json,
                    ],
                )
                .await?;
            let file_id: i64 = file_row.get("file_id");

            self.client
                .execute(sql::UPSERT_WATERMARK, &[&req.snapshot_id.0, &req.file.table_id.0, &req.file.max_event_id.0])
                .await?;
            self.client
                .execute(sql::INSERT_SNAPSHOT_FILE, &[&req.snapshot_id.0, &req.file.table_id.0, &file_id, &"add"])
                .await?;

            let ids: Vec<i64> = req.file.committed_event_ids.iter().map(|e| e.0).collect();
            self.client.execute(sql::ACK_EVENTS, &[&ids]).await?;
            self.client.execute(sql::RECOMPUTE_BATCH_STATE, &[&req.batch_id.0]).await?;

            let snapshot_row = self
                .client
                .query_one(sql::GET_SNAPSHOT_BY_ID, &[&req.tenant_id.0, &req.snapshot_id.0])
                .await?;
            Ok(row_to_snapshot(&snapshot_row))
        }
        .await;

        match result {
            Ok(snapshot) => {
                self.client
                    .batch_execute("COMMIT")
                    .await
                    .map_err(|e| anyhow::Error::new(e).context("committing publish transaction"))?;
                Ok(snapshot)
            },
            Err(e) => {
                let _ = self.client.batch_execute("ROLLBACK").await;
                Err(e.context("publishing batch"))
            },
        }
    }

    async fn publish_compaction(&self, req: PublishCompactionRequest) -> anyhow::Result<Snapshot> {
        let _guard = self.txn_lock.lock().await;
        self.client.batch_execute("BEGIN").await?;

        let result: anyhow::Result<Snapshot> = async {
            let watermark_row = self
                .client
                .query_opt(sql::LATEST_TABLE_WATERMARK, &[&req.tenant_id.0, &req.table_id.0])
                .await?;
            let table_watermark: i64 = watermark_row.map(|r| r.get("max_visibility_token")).unwrap_or(0);
            let latest_snapshot_row = self
                .client
                .query_opt(sql::GET_LATEST_SNAPSHOT, &[&req.tenant_id.0])
                .await?;
            let parent = latest_snapshot_row.as_ref().map(|r| r.get::<_, i64>("snapshot_id"));
            // The snapshot-level token must stay the tenant's current maximum,
            // not this table's watermark, or compacting a lagging table would
            // regress the latest snapshot's token and stall the barrier.
            let tenant_watermark: i64 = latest_snapshot_row.map(|r| r.get("max_visibility_token")).unwrap_or(table_watermark);

            self.client
                .execute(
                    "INSERT INTO snapshot (snapshot_id, tenant_id, created_by, max_visibility_token, parent_snapshot_id) VALUES ($1, $2, 'compactor', $3, $4)",
                    &[&req.snapshot_id.0, &req.tenant_id.0, &tenant_watermark, &parent],
                )
                .await?;

            let file_row = self
                .client
                .query_one(
                    sql::INSERT_DATA_FILE,
                    &[
                        &req.tenant_id.0,
                        &req.table_id.0,
                        &req.new_file.object_path,
                        &req.new_file.record_count,
                        &req.new_file.file_size_bytes,
                        &req.new_file.min_event_time,
                        &req.new_file.max_event_time,
                        &req.new_file.stats_json,
                    ],
                )
                .await?;
            let new_file_id: i64 = file_row.get("file_id");

            self.client
                .execute(sql::UPSERT_WATERMARK, &[&req.snapshot_id.0, &req.table_id.0, &table_watermark])
                .await?;
            self.client
                .execute(sql::INSERT_SNAPSHOT_FILE, &[&req.snapshot_id.0, &req.table_id.0, &new_file_id, &"add"])
                .await?;
            for source in &req.source_file_ids {
                self.client
                    .execute(sql::INSERT_SNAPSHOT_FILE, &[&req.snapshot_id.0, &req.table_id.0, &source.0, &"remove"])
                    .await?;
            }

            let snapshot_row = self
                .client
                .query_one(sql::GET_SNAPSHOT_BY_ID, &[&req.tenant_id.0, &req.snapshot_id.0])
                .await?;
            Ok(row_to_snapshot(&snapshot_row))
        }
        .await;

        match result {
            Ok(snapshot) => {
                self.client
                    .batch_execute("COMMIT")
                    .await
                    .map_err(|e| anyhow::Error::new(e).context("committing compaction publish transaction"))?;
                Ok(snapshot)
            },
            Err(e) => {
                let _ = self.client.batch_execute("ROLLBACK").await;
                Err(e.context("publishing compaction"))
            },
        }
    }

    async fn delete_data_file_row(&self, tenant_id: &TenantId, file_id: FileId) -> anyhow::Result<()> {
        self.client.execute(sql::DELETE_DATA_FILE, &[&tenant_id.0, &file_id.0]).await?;
        Ok(())
    }

    async fn record_compaction_run(&self, tenant_id: &TenantId, table_id: TableId, details: JsonValue) -> anyhow::Result<()> {
        self.client
            .execute(sql::INSERT_COMPACTION_RUN, &[&tenant_id.0, &table_id.0, &details])
            .await?;
        Ok(())
    }

    async fn record_gc_run(&self, tenant_id: &TenantId, details: JsonValue) -> anyhow::Result<()> {
        self.client.execute(sql::INSERT_GC_RUN, &[&tenant_id.0, &details]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Tests here need a live Postgres and are gated accordingly, matching
    //! the teacher's pattern of gating tests that need an external service
    //! (see `postgres/src/tests.rs`). Run with `DUCKMESH_TEST_POSTGRES_URL`
    //! set and `cargo test -- --ignored`.
    use super::*;

    async fn test_catalog() -> Option<PostgresCatalog> {
        let url = std::env::var("DUCKMESH_TEST_POSTGRES_URL").ok()?;
        let cat = PostgresCatalog::connect(&url).await.ok()?;
        cat.ensure_schema().await.ok()?;
        Some(cat)
    }

    #[tokio::test]
    #[ignore]
    async fn publish_and_claim_round_trip() {
        let Some(cat) = test_catalog().await else {
            return;
        };
        let tenant = TenantId("tenant-pg-test".to_string());
        cat.ensure_tenant(&tenant).await.unwrap();
        let table_row = cat
            .client
            .query_one(
                "INSERT INTO table_def (tenant_id, table_name) VALUES ($1, 'events') ON CONFLICT (tenant_id, table_name) DO UPDATE SET table_name = EXCLUDED.table_name RETURNING table_id",
                &[&tenant.0],
            )
            .await
            .unwrap();
        let table_id = TableId(table_row.get("table_id"));
        let env = IngestEnvelope {
            tenant_id: tenant.clone(),
            table_id,
            idempotency_key: "idem-1".to_string(),
            op: IngestOp::Insert,
            payload_json: serde_json::json!({"a": 1}),
            event_time: None,
        };
        let res = cat.publish(vec![env]).await.unwrap();
        assert!(res[0].inserted);
        let batch = cat.claim_batch("test-worker", 10, 30).await.unwrap();
        assert_eq!(batch.envelopes.len(), 1);
    }
}
