//! The commit coordinator: claims leased events off the ingest bus, groups
//! them by `(tenant_id, table_id)`, encodes each group as a columnar file,
//! uploads it, and publishes it into the catalog as a new snapshot (§4.2).
//!
//! Grounded on the shape of `database/src/committer.rs::Committer::go()`: a
//! background loop that alternates between a quiescent poll sleep and a
//! `Backoff`-governed retry path around the publish step, rather than one
//! retry idiom doing both jobs.
use std::{
    collections::BTreeMap,
    sync::Arc,
    time::SystemTime,
};

use arrow::{
    array::{
        Int64Array,
        StringArray,
    },
    datatypes::{
        DataType,
        Field,
        Schema,
    },
    record_batch::RecordBatch,
};
use bytes::Bytes;
use chrono::{
    DateTime,
    Utc,
};
use duckmesh_common::{
    catalog::{
        Catalog,
        PublishBatchRequest,
        PublishedFile,
    },
    knobs::{
        COORDINATOR_CLAIM_LIMIT,
        COORDINATOR_COMMIT_MAX_RETRIES,
        COORDINATOR_POLL_INTERVAL_MS,
    },
    types::{
        EventId,
        IngestEvent,
        TableId,
        TenantId,
    },
    Backoff,
    Runtime,
};
use duckmesh_object_store::{
    ObjectKey,
    ObjectStore,
};
use parquet::arrow::ArrowWriter;
use tokio_util::sync::CancellationToken;

/// Fixed output schema for committed event files (§3).
fn file_schema() -> Schema {
    Schema::new(vec![
        Field::new("event_id", DataType::Int64, false),
        Field::new("tenant_id", DataType::Utf8, false),
        Field::new("table_id", DataType::Int64, false),
        Field::new("idempotency_key", DataType::Utf8, false),
        Field::new("op", DataType::Utf8, false),
        Field::new("payload_json", DataType::Utf8, false),
        Field::new("event_time_unix_ms", DataType::Int64, false),
    ])
}

fn unix_ms(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Encodes one group's events into a parquet file, recording the stats the
/// publish transaction needs (§4.2 step 3).
struct EncodedFile {
    bytes: Bytes,
    record_count: i64,
    min_event_time: Option<SystemTime>,
    max_event_time: Option<SystemTime>,
}

fn encode_group(events: &[IngestEvent]) -> anyhow::Result<EncodedFile> {
    let schema = Arc::new(file_schema());
    let event_ids: Int64Array = events.iter().map(|e| e.event_id.0).collect();
    let tenant_ids: StringArray = events.iter().map(|e| e.tenant_id.0.as_str()).collect();
    let table_ids: Int64Array = events.iter().map(|e| e.table_id.0).collect();
    let keys: StringArray = events.iter().map(|e| e.idempotency_key.as_str()).collect();
    let ops: StringArray = events.iter().map(|e| e.op.as_str()).collect();
    let payloads: StringArray = events.iter().map(|e| e.payload_json.to_string()).collect();
    let event_times: Int64Array = events
        .iter()
        .map(|e| unix_ms(e.event_time.unwrap_or(e.ingested_at)))
        .collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(event_ids),
            Arc::new(tenant_ids),
            Arc::new(table_ids),
            Arc::new(keys),
            Arc::new(ops),
            Arc::new(payloads),
            Arc::new(event_times),
        ],
    )?;

    let mut buf = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;
    }

    let min_event_time = events.iter().map(|e| e.event_time.unwrap_or(e.ingested_at)).min();
    let max_event_time = events.iter().map(|e| e.event_time.unwrap_or(e.ingested_at)).max();

    Ok(EncodedFile {
        bytes: Bytes::from(buf),
        record_count: events.len() as i64,
        min_event_time,
        max_event_time,
    })
}

fn object_key(tenant_id: &TenantId, table_label: &str, at: SystemTime, snapshot_id: i64, seq: u32) -> anyhow::Result<ObjectKey> {
    let dt: DateTime<Utc> = at.into();
    let date = format!("date={}", dt.format("%Y-%m-%d"));
    let hour = format!("hour={}", dt.format("%H"));
    let file_name = format!("part-{snapshot_id}-{seq}.parquet");
    ObjectKey::build(tenant_id, &[table_label, &date, &hour, &file_name])
}

/// Groups events by `(tenant_id, table_id)`, preserving first-seen group
/// order (§4.2 step 1). `BTreeMap` would reorder groups by key, so insertion
/// order is tracked separately.
fn group_events(events: Vec<IngestEvent>) -> Vec<((TenantId, TableId), Vec<IngestEvent>)> {
    let mut order: Vec<(TenantId, TableId)> = Vec::new();
    let mut groups: BTreeMap<(TenantId, TableId), Vec<IngestEvent>> = BTreeMap::new();
    for event in events {
        let key = (event.tenant_id.clone(), event.table_id);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(event);
    }
    order
        .into_iter()
        .map(|key| {
            let events = groups.remove(&key).expect("key was just inserted above");
            (key, events)
        })
        .collect()
}

/// Background loop that turns claimed events into published snapshots.
pub struct Committer<RT: Runtime, C: Catalog, S: ObjectStore> {
    runtime: RT,
    catalog: Arc<C>,
    store: Arc<S>,
    consumer_id: String,
}

impl<RT: Runtime, C: Catalog, S: ObjectStore> Committer<RT, C, S> {
    pub fn new(runtime: RT, catalog: Arc<C>, store: Arc<S>, consumer_id: impl Into<String>) -> Self {
        Self {
            runtime,
            catalog,
            store,
            consumer_id: consumer_id.into(),
        }
    }

    /// Runs until `shutdown` is cancelled. Between batches, sleeps for
    /// `COORDINATOR_POLL_INTERVAL_MS` when there was nothing to claim.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("commit coordinator shutting down");
                    return Ok(());
                }
                committed = self.tick() => {
                    let committed = committed?;
                    if committed == 0 {
                        tokio::select! {
                            _ = shutdown.cancelled() => return Ok(()),
                            _ = self.runtime.wait(std::time::Duration::from_millis(*COORDINATOR_POLL_INTERVAL_MS)) => {}
                        }
                    }
                }
            }
        }
    }

    /// Claims one batch and commits every group in it. Returns the number of
    /// events committed (0 means the claim was empty; caller should back off
    /// on the poll interval rather than spin).
    pub async fn tick(&self) -> anyhow::Result<usize> {
        let batch = self
            .catalog
            .claim_batch(&self.consumer_id, *COORDINATOR_CLAIM_LIMIT, *duckmesh_common::knobs::CLAIM_LEASE_SECONDS)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }
        let batch_id = batch.batch_id;
        let n = batch.envelopes.len();
        for (key, group) in group_events(batch.envelopes) {
            self.commit_group(batch_id, key.0, key.1, group).await?;
        }
        Ok(n)
    }

    /// Steps 2-7 of §4.2 for one `(tenant_id, table_id)` group, retried with
    /// backoff on transient failure. A crash or exhausted-retry abandonment
    /// before the publish transaction commits leaves the uploaded object
    /// orphaned but invisible: no manifest entry ever pointed at it, and the
    /// group's events stay `claimed` until their lease expires and
    /// `requeue_expired` reclaims them for a later attempt.
    async fn commit_group(&self, batch_id: duckmesh_common::types::BatchId, tenant_id: TenantId, table_id: TableId, events: Vec<IngestEvent>) -> anyhow::Result<()> {
        let mut backoff = Backoff::new(std::time::Duration::from_millis(100), std::time::Duration::from_secs(30));
        let mut rng = rand::rng();
        let max_retries = *COORDINATOR_COMMIT_MAX_RETRIES;
        let mut attempt = 0;
        loop {
            match self.try_commit_group(&tenant_id, table_id, batch_id, &events).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt + 1 >= max_retries => {
                    tracing::error!(?tenant_id, ?table_id, attempt, "giving up on group for this tick: {e:#}");
                    return Err(e);
                },
                Err(e) => {
                    let delay = backoff.fail(&mut rng);
                    tracing::warn!(?tenant_id, ?table_id, attempt, ?delay, "retrying group after failure: {e:#}");
                    self.runtime.wait(delay).await;
                    attempt += 1;
                },
            }
        }
    }

    async fn try_commit_group(&self, tenant_id: &TenantId, table_id: TableId, batch_id: duckmesh_common::types::BatchId, events: &[IngestEvent]) -> anyhow::Result<()> {
        let table = self
            .catalog
            .get_table(tenant_id, table_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("table {table_id:?} missing for tenant {tenant_id:?} mid-commit"))?;

        let snapshot_id = self.catalog.allocate_snapshot_id().await?;
        let encoded = encode_group(events)?;
        let at = self.runtime.system_time();
        let key = object_key(tenant_id, table.table_label()?, at, snapshot_id.0, 0)?;
        let put = self.store.put(&key, encoded.bytes, "application/vnd.apache.parquet").await?;

        let max_event_id: EventId = events.iter().map(|e| e.event_id).max().expect("group is non-empty");
        let committed_event_ids: Vec<EventId> = events.iter().map(|e| e.event_id).collect();

        let req = PublishBatchRequest {
            tenant_id: tenant_id.clone(),
            snapshot_id,
            batch_id,
            file: PublishedFile {
                table_id,
                object_path: key.as_str().to_string(),
                record_count: encoded.record_count,
                file_size_bytes: put.size as i64,
                min_event_time: encoded.min_event_time,
                max_event_time: encoded.max_event_time,
                stats_json: serde_json::json!({"record_count": encoded.record_count}),
                max_event_id,
                committed_event_ids: committed_event_ids.clone(),
            },
        };
        self.catalog.publish_batch(req).await?;

        // Idempotent confirmation: the publish transaction already flipped
        // these events to `committed`, so this is a no-op unless a crash
        // between publish and here left them claimed.
        self.catalog.ack(batch_id, &committed_event_ids).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use duckmesh_common::{
        testing::InMemoryCatalog,
        types::{
            IngestEnvelope,
            IngestOp,
        },
        TokioRuntime,
    };
    use duckmesh_object_store::InMemoryObjectStore;

    use super::*;

    fn envelope(tenant: &str, table_id: i64, key: &str) -> IngestEnvelope {
        IngestEnvelope {
            tenant_id: TenantId(tenant.to_string()),
            table_id: TableId(table_id),
            idempotency_key: key.to_string(),
            op: IngestOp::Insert,
            payload_json: serde_json::json!({"k": key}),
            event_time: None,
        }
    }

    async fn setup() -> (Committer<TokioRuntime, InMemoryCatalog, InMemoryObjectStore>, Arc<InMemoryCatalog>, TableId) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let table = catalog.create_table(&TenantId("t1".to_string()), "events", vec![]);
        let store = Arc::new(InMemoryObjectStore::new());
        let committer = Committer::new(TokioRuntime, catalog.clone(), store, "coordinator-1");
        (committer, catalog, table.table_id)
    }

    #[tokio::test]
    async fn tick_publishes_claimed_events_as_a_snapshot() {
        let (committer, catalog, table_id) = setup().await;
        catalog
            .publish(vec![envelope("t1", table_id.0, "k1"), envelope("t1", table_id.0, "k2")])
            .await
            .unwrap();

        let committed = committer.tick().await.unwrap();
        assert_eq!(committed, 2);

        let snapshot = catalog.get_latest_snapshot(&TenantId("t1".to_string())).await.unwrap().unwrap();
        let files = catalog
            .list_snapshot_files(&TenantId("t1".to_string()), snapshot.snapshot_id)
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file.record_count, 2);
    }

    #[tokio::test]
    async fn tick_on_empty_claim_is_a_noop() {
        let (committer, _catalog, _table_id) = setup().await;
        assert_eq!(committer.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn groups_are_split_by_table() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let tenant = TenantId("t1".to_string());
        let table_a = catalog.create_table(&tenant, "a", vec![]).table_id;
        let table_b = catalog.create_table(&tenant, "b", vec![]).table_id;
        let store = Arc::new(InMemoryObjectStore::new());
        let committer = Committer::new(TokioRuntime, catalog.clone(), store, "coordinator-1");

        catalog
            .publish(vec![envelope("t1", table_a.0, "k1"), envelope("t1", table_b.0, "k2")])
            .await
            .unwrap();

        let committed = committer.tick().await.unwrap();
        assert_eq!(committed, 2);

        let snapshot = catalog.get_latest_snapshot(&tenant).await.unwrap().unwrap();
        let files_a = catalog.list_snapshot_files_for_table(&tenant, snapshot.snapshot_id, table_a).await.unwrap();
        let files_b = catalog.list_snapshot_files_for_table(&tenant, snapshot.snapshot_id, table_b).await.unwrap();
        assert_eq!(files_a.len(), 1);
        assert_eq!(files_b.len(), 1);
    }
}
