//! Domain types for the catalog's data model.
use std::time::SystemTime;

use derive_more::{
    Display,
    From,
};
use regex::Regex;
use serde::{
    Deserialize,
    Serialize,
};
use std::sync::LazyLock;

/// Object path components (tenant label, table label, and filename segments)
/// must each match this regex. Enforced wherever a path is built, not just
/// at the object store boundary, so a bad table label is rejected before any
/// I/O happens.
pub static PATH_COMPONENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("valid regex"));

pub fn validate_path_component(s: &str) -> anyhow::Result<()> {
    if PATH_COMPONENT_RE.is_match(s) {
        Ok(())
    } else {
        Err(anyhow::Error::new(crate::errors::ErrorMetadata::bad_request(
            "INVALID_PATH_COMPONENT",
            format!("'{s}' does not match [A-Za-z0-9][A-Za-z0-9._-]{{0,127}}"),
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl EventId {
    /// `event_id` doubles as the `visibility_token`; this accessor exists so
    /// call sites read "token" at the query/barrier boundary and "event_id"
    /// at the ingest boundary, per the glossary.
    pub fn as_visibility_token(self) -> i64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_path_component(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: TenantId,
    pub status: TenantStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Event-time-derived `date=YYYY-MM-DD/hour=HH` partitioning is the only
    /// supported scheme; this is a marker today but keeps the object path
    /// builder decoupled from the table definition's shape.
    pub by_event_time: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub table_id: TableId,
    pub tenant_id: TenantId,
    pub table_name: String,
    pub primary_key_cols: Vec<String>,
    pub partition_spec: PartitionSpec,
    pub active_schema_version: i32,
}

impl TableDef {
    /// Object path label for this table (§4.2 step 4).
    pub fn table_label(&self) -> anyhow::Result<&str> {
        validate_path_component(&self.table_name)?;
        Ok(&self.table_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaCompatibilityMode {
    Backward,
    Forward,
    Full,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchemaVersion {
    pub table_id: TableId,
    pub schema_version: i32,
    pub schema_json: serde_json::Value,
    pub compatibility_mode: SchemaCompatibilityMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestOp {
    Insert,
    Upsert,
    Delete,
}

impl IngestOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Upsert => "upsert",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestEventState {
    Accepted,
    Claimed,
    Committed,
    Failed,
}

/// A single envelope submitted to `Publish`, before a catalog row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestEnvelope {
    pub tenant_id: TenantId,
    pub table_id: TableId,
    pub idempotency_key: String,
    pub op: IngestOp,
    pub payload_json: serde_json::Value,
    pub event_time: Option<SystemTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestEvent {
    pub event_id: EventId,
    pub tenant_id: TenantId,
    pub table_id: TableId,
    pub idempotency_key: String,
    pub op: IngestOp,
    pub payload_json: serde_json::Value,
    pub event_time: Option<SystemTime>,
    pub ingested_at: SystemTime,
    pub state: IngestEventState,
    pub lease_owner: Option<String>,
    pub lease_until: Option<SystemTime>,
}

/// Result row of a single `Publish` call, ordering-preserved against the
/// input envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub event_id: EventId,
    pub visibility_token: i64,
    pub inserted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimBatchState {
    Claimed,
    Committed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimBatch {
    pub batch_id: BatchId,
    pub consumer_id: String,
    pub claimed_at: SystemTime,
    pub lease_until: SystemTime,
    pub state: ClaimBatchState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimItem {
    pub batch_id: BatchId,
    pub event_id: EventId,
}

/// The batch returned by `ClaimBatch`, carrying the claimed rows themselves
/// so the coordinator does not need a second round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedBatch {
    pub batch_id: BatchId,
    pub lease_until: SystemTime,
    pub envelopes: Vec<IngestEvent>,
}

impl ClaimedBatch {
    pub fn is_empty(&self) -> bool {
        self.envelopes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    pub tenant_id: TenantId,
    pub created_by: String,
    pub created_at: SystemTime,
    pub max_visibility_token: i64,
    pub parent_snapshot_id: Option<SnapshotId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTableWatermark {
    pub snapshot_id: SnapshotId,
    pub table_id: TableId,
    pub max_visibility_token: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    pub file_id: FileId,
    pub tenant_id: TenantId,
    pub table_id: TableId,
    pub object_path: String,
    pub record_count: i64,
    pub file_size_bytes: i64,
    pub min_event_time: Option<SystemTime>,
    pub max_event_time: Option<SystemTime>,
    pub stats_json: serde_json::Value,
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub snapshot_id: SnapshotId,
    pub table_id: TableId,
    pub file_id: FileId,
    pub change_type: ChangeType,
}

/// A `DataFile` joined with its manifest `add` entry, as returned by
/// `ListSnapshotFiles`/`ListSnapshotFilesForTable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveFile {
    pub table_id: TableId,
    pub file: DataFile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_component_regex_matches_spec() {
        assert!(validate_path_component("tenant-1").is_ok());
        assert!(validate_path_component("part-42-0.parquet").is_ok());
        assert!(validate_path_component("").is_err());
        assert!(validate_path_component(".hidden").is_err());
        assert!(validate_path_component("has/slash").is_err());
        let too_long = "a".repeat(200);
        assert!(validate_path_component(&too_long).is_err());
    }
}
