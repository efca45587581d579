//! The catalog is the one shared mutable store; every other subsystem talks
//! to it through this trait rather than holding its own state. Split into a
//! read-only half and a read+write half the way the teacher splits
//! `Persistence`/`PersistenceReader`, so query-only callers (the executor)
//! can be given a narrower capability than writers (ingest bus, coordinator,
//! maintenance).
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::types::{
    ActiveFile,
    BatchId,
    ClaimedBatch,
    DataFile,
    EventId,
    FileId,
    IngestEnvelope,
    PublishResult,
    Snapshot,
    SnapshotFile,
    SnapshotId,
    TableDef,
    TenantId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct LagStats {
    pub accepted_events: i64,
    pub claimed_events: i64,
    pub oldest_pending_ingest_at: Option<SystemTime>,
    pub latest_visibility_token: i64,
    pub latest_snapshot_id: Option<i64>,
}

/// One file written by the coordinator, ready to be published as an `add`
/// manifest entry (§4.2 step 6).
#[derive(Debug, Clone)]
pub struct PublishedFile {
    pub table_id: crate::types::TableId,
    pub object_path: String,
    pub record_count: i64,
    pub file_size_bytes: i64,
    pub min_event_time: Option<SystemTime>,
    pub max_event_time: Option<SystemTime>,
    pub stats_json: JsonValue,
    /// Max `event_id` committed in this file; becomes the table watermark.
    pub max_event_id: EventId,
    /// Event ids from this file's source batch group to flip to `committed`.
    pub committed_event_ids: Vec<EventId>,
}

/// Request for the single atomic publish transaction in §4.2 step 6.
#[derive(Debug, Clone)]
pub struct PublishBatchRequest {
    pub tenant_id: TenantId,
    pub snapshot_id: SnapshotId,
    pub batch_id: BatchId,
    pub file: PublishedFile,
}

/// Request for the atomic publish transaction in §4.6 compaction step 4.
#[derive(Debug, Clone)]
pub struct PublishCompactionRequest {
    pub tenant_id: TenantId,
    pub snapshot_id: SnapshotId,
    pub table_id: crate::types::TableId,
    pub new_file: PublishedFile,
    pub source_file_ids: Vec<FileId>,
}

#[async_trait]
pub trait CatalogReader: Send + Sync {
    async fn get_table(&self, tenant_id: &TenantId, table_id: crate::types::TableId) -> anyhow::Result<Option<TableDef>>;

    async fn get_table_by_name(&self, tenant_id: &TenantId, table_name: &str) -> anyhow::Result<Option<TableDef>>;

    async fn get_latest_snapshot(&self, tenant_id: &TenantId) -> anyhow::Result<Option<Snapshot>>;

    async fn get_snapshot_by_id(&self, tenant_id: &TenantId, snapshot_id: SnapshotId) -> anyhow::Result<Option<Snapshot>>;

    async fn get_snapshot_by_time(&self, tenant_id: &TenantId, at: SystemTime) -> anyhow::Result<Option<Snapshot>>;

    async fn list_snapshot_files(&self, tenant_id: &TenantId, snapshot_id: SnapshotId) -> anyhow::Result<Vec<ActiveFile>>;

    async fn list_snapshot_files_for_table(
        &self,
        tenant_id: &TenantId,
        snapshot_id: SnapshotId,
        table_id: crate::types::TableId,
    ) -> anyhow::Result<Vec<ActiveFile>>;

    async fn lag_stats(&self, tenant_id: &TenantId) -> anyhow::Result<LagStats>;

    /// Candidate files for GC: latest manifest entry is `remove`, that
    /// entry's snapshot id is below `min_keep_snapshot_id`, and the file's
    /// `created_at <= now - safety_age` is checked by the caller against the
    /// returned `created_at`.
    async fn gc_candidates(&self, tenant_id: &TenantId, min_keep_snapshot_id: SnapshotId) -> anyhow::Result<Vec<DataFile>>;

    /// All tenants known to the catalog, for maintenance loops that sweep
    /// "all tenants".
    async fn list_tenants(&self) -> anyhow::Result<Vec<TenantId>>;

    /// The `SnapshotId` at the given descending offset from the latest
    /// (offset 0 = latest). Used to compute `min_keep_snapshot_id`.
    async fn nth_latest_snapshot_id(&self, tenant_id: &TenantId, offset_from_latest: u32) -> anyhow::Result<Option<SnapshotId>>;
}

#[async_trait]
pub trait Catalog: CatalogReader {
    async fn publish(&self, envelopes: Vec<IngestEnvelope>) -> anyhow::Result<Vec<PublishResult>>;

    async fn claim_batch(&self, consumer_id: &str, limit: u32, lease_seconds: u64) -> anyhow::Result<ClaimedBatch>;

    async fn ack(&self, batch_id: BatchId, event_ids: &[EventId]) -> anyhow::Result<()>;

    async fn nack(&self, batch_id: BatchId, event_ids: &[EventId], reason: &str) -> anyhow::Result<()>;

    async fn extend_lease(&self, batch_id: BatchId, lease_seconds: u64) -> anyhow::Result<()>;

    async fn requeue_expired(&self) -> anyhow::Result<u64>;

    async fn allocate_snapshot_id(&self) -> anyhow::Result<SnapshotId>;

    async fn publish_batch(&self, req: PublishBatchRequest) -> anyhow::Result<Snapshot>;

    async fn publish_compaction(&self, req: PublishCompactionRequest) -> anyhow::Result<Snapshot>;

    async fn delete_data_file_row(&self, tenant_id: &TenantId, file_id: FileId) -> anyhow::Result<()>;

    async fn record_compaction_run(&self, tenant_id: &TenantId, table_id: crate::types::TableId, details: JsonValue) -> anyhow::Result<()>;

    async fn record_gc_run(&self, tenant_id: &TenantId, details: JsonValue) -> anyhow::Result<()>;
}

/// A manifest entry as it appears in a tombstone listing, used internally by
/// catalog implementations to compute active file sets; re-exported so
/// `duckmesh_common::testing`'s fake can share it.
pub type ManifestEntry = SnapshotFile;
