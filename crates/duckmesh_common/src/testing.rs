//! An in-memory [`Catalog`] used by every other crate's test suite, the way
//! the teacher gates fake implementations behind a `testing` cargo feature
//! (see `storage`'s and `common::persistence`'s test doubles) instead of
//! spinning up a real Postgres for unit tests.
use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicI64,
            Ordering,
        },
        Mutex,
    },
    time::SystemTime,
};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{
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
        ChangeType,
        ClaimBatchState,
        ClaimedBatch,
        DataFile,
        EventId,
        FileId,
        IngestEnvelope,
        IngestEventState,
        PartitionSpec,
        PublishResult,
        Snapshot,
        SnapshotFile,
        SnapshotId,
        TableDef,
        TableId,
        TenantId,
    },
};

#[derive(Default)]
struct State {
    tables: HashMap<(TenantId, TableId), TableDef>,
    table_by_name: HashMap<(TenantId, String), TableId>,
    events: HashMap<EventId, crate::types::IngestEvent>,
    idempotency: HashMap<(TenantId, TableId, String), EventId>,
    claim_batches: HashMap<BatchId, crate::types::ClaimBatch>,
    claim_items: HashMap<BatchId, Vec<EventId>>,
    snapshots: HashMap<(TenantId, SnapshotId), Snapshot>,
    watermarks: HashMap<(SnapshotId, TableId), i64>,
    data_files: HashMap<(TenantId, FileId), DataFile>,
    manifest: Vec<SnapshotFile>,
    compaction_runs: Vec<JsonValue>,
    gc_runs: Vec<JsonValue>,
}

pub struct InMemoryCatalog {
    state: Mutex<State>,
    next_table_id: AtomicI64,
    next_event_id: AtomicI64,
    next_snapshot_id: AtomicI64,
    next_file_id: AtomicI64,
    next_batch_id: AtomicI64,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_table_id: AtomicI64::new(1),
            next_event_id: AtomicI64::new(1),
            next_snapshot_id: AtomicI64::new(1),
            next_file_id: AtomicI64::new(1),
            next_batch_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&self, tenant_id: &TenantId, table_name: &str, primary_key_cols: Vec<String>) -> TableDef {
        let table_id = TableId(self.next_table_id.fetch_add(1, Ordering::SeqCst));
        let def = TableDef {
            table_id,
            tenant_id: tenant_id.clone(),
            table_name: table_name.to_string(),
            primary_key_cols,
            partition_spec: PartitionSpec { by_event_time: true },
            active_schema_version: 1,
        };
        let mut state = self.state.lock().unwrap();
        state.table_by_name.insert((tenant_id.clone(), table_name.to_string()), table_id);
        state.tables.insert((tenant_id.clone(), table_id), def.clone());
        def
    }

    /// Test helper for S4: force a batch's lease into the past so
    /// `requeue_expired` has something to reclaim.
    pub fn force_lease_expired(&self, batch_id: BatchId) {
        let mut state = self.state.lock().unwrap();
        let past = SystemTime::UNIX_EPOCH;
        if let Some(batch) = state.claim_batches.get_mut(&batch_id) {
            batch.lease_until = past;
        }
        let event_ids = state.claim_items.get(&batch_id).cloned().unwrap_or_default();
        for id in event_ids {
            if let Some(ev) = state.events.get_mut(&id) {
                ev.lease_until = Some(past);
            }
        }
    }

    fn active_files_at(
        state: &State,
        tenant_id: &TenantId,
        snapshot_id: SnapshotId,
        table_filter: Option<TableId>,
    ) -> Vec<ActiveFile> {
        let tenant_tables: std::collections::HashSet<TableId> = state
            .tables
            .iter()
            .filter(|((t, _), _)| t == tenant_id)
            .map(|((_, tid), _)| *tid)
            .collect();

        let mut latest: HashMap<(TableId, FileId), (SnapshotId, ChangeType)> = HashMap::new();
        for entry in &state.manifest {
            if entry.snapshot_id.0 > snapshot_id.0 {
                continue;
            }
            if !tenant_tables.contains(&entry.table_id) {
                continue;
            }
            if let Some(tf) = table_filter {
                if entry.table_id != tf {
                    continue;
                }
            }
            let key = (entry.table_id, entry.file_id);
            match latest.get(&key) {
                Some((seen_snap, _)) if seen_snap.0 >= entry.snapshot_id.0 => {},
                _ => {
                    latest.insert(key, (entry.snapshot_id, entry.change_type));
                },
            }
        }

        latest
            .into_iter()
            .filter(|(_, (_, change))| *change == ChangeType::Add)
            .filter_map(|((table_id, file_id), _)| {
                state
                    .data_files
                    .get(&(tenant_id.clone(), file_id))
                    .cloned()
                    .map(|file| ActiveFile { table_id, file })
            })
            .collect()
    }

    fn recompute_batch_state(state: &mut State, batch_id: BatchId) {
        let Some(item_ids) = state.claim_items.get(&batch_id).cloned() else {
            return;
        };
        let still_claimed = item_ids
            .iter()
            .any(|id| matches!(state.events.get(id).map(|e| e.state), Some(IngestEventState::Claimed)));
        if let Some(batch) = state.claim_batches.get_mut(&batch_id) {
            if !matches!(batch.state, ClaimBatchState::Failed) && !still_claimed {
                batch.state = ClaimBatchState::Committed;
            }
        }
    }
}

#[async_trait]
impl CatalogReader for InMemoryCatalog {
    async fn get_table(&self, tenant_id: &TenantId, table_id: TableId) -> anyhow::Result<Option<TableDef>> {
        let state = self.state.lock().unwrap();
        Ok(state.tables.get(&(tenant_id.clone(), table_id)).cloned())
    }

    async fn get_table_by_name(&self, tenant_id: &TenantId, table_name: &str) -> anyhow::Result<Option<TableDef>> {
        let state = self.state.lock().unwrap();
        let Some(table_id) = state.table_by_name.get(&(tenant_id.clone(), table_name.to_string())).copied() else {
            return Ok(None);
        };
        Ok(state.tables.get(&(tenant_id.clone(), table_id)).cloned())
    }

    async fn get_latest_snapshot(&self, tenant_id: &TenantId) -> anyhow::Result<Option<Snapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .values()
            .filter(|s| &s.tenant_id == tenant_id)
            .max_by_key(|s| s.snapshot_id.0)
            .cloned())
    }

    async fn get_snapshot_by_id(&self, tenant_id: &TenantId, snapshot_id: SnapshotId) -> anyhow::Result<Option<Snapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state.snapshots.get(&(tenant_id.clone(), snapshot_id)).cloned())
    }

    async fn get_snapshot_by_time(&self, tenant_id: &TenantId, at: SystemTime) -> anyhow::Result<Option<Snapshot>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .snapshots
            .values()
            .filter(|s| &s.tenant_id == tenant_id && s.created_at <= at)
            .max_by_key(|s| s.snapshot_id.0)
            .cloned())
    }

    async fn list_snapshot_files(&self, tenant_id: &TenantId, snapshot_id: SnapshotId) -> anyhow::Result<Vec<ActiveFile>> {
        let state = self.state.lock().unwrap();
        Ok(Self::active_files_at(&state, tenant_id, snapshot_id, None))
    }

    async fn list_snapshot_files_for_table(
        &self,
        tenant_id: &TenantId,
        snapshot_id: SnapshotId,
        table_id: TableId,
    ) -> anyhow::Result<Vec<ActiveFile>> {
        let state = self.state.lock().unwrap();
        Ok(Self::active_files_at(&state, tenant_id, snapshot_id, Some(table_id)))
    }

    async fn lag_stats(&self, tenant_id: &TenantId) -> anyhow::Result<LagStats> {
        let state = self.state.lock().unwrap();
        let tenant_tables: std::collections::HashSet<TableId> = state
            .tables
            .iter()
            .filter(|((t, _), _)| t == tenant_id)
            .map(|((_, tid), _)| *tid)
            .collect();
        let tenant_events: Vec<_> = state.events.values().filter(|e| tenant_tables.contains(&e.table_id)).collect();
        let accepted_events = tenant_events.iter().filter(|e| matches!(e.state, IngestEventState::Accepted)).count() as i64;
        let claimed_events = tenant_events.iter().filter(|e| matches!(e.state, IngestEventState::Claimed)).count() as i64;
        let oldest_pending_ingest_at = tenant_events
            .iter()
            .filter(|e| matches!(e.state, IngestEventState::Accepted | IngestEventState::Claimed))
            .map(|e| e.ingested_at)
            .min();
        let latest_visibility_token = tenant_events.iter().map(|e| e.event_id.0).max().unwrap_or(0);
        let latest_snapshot_id = state
            .snapshots
            .values()
            .filter(|s| &s.tenant_id == tenant_id)
            .map(|s| s.snapshot_id.0)
            .max();
        Ok(LagStats {
            accepted_events,
            claimed_events,
            oldest_pending_ingest_at,
            latest_visibility_token,
            latest_snapshot_id,
        })
    }

    async fn gc_candidates(&self, tenant_id: &TenantId, min_keep_snapshot_id: SnapshotId) -> anyhow::Result<Vec<DataFile>> {
        let state = self.state.lock().unwrap();
        let mut latest: HashMap<(TableId, FileId), (SnapshotId, ChangeType)> = HashMap::new();
        let tenant_tables: std::collections::HashSet<TableId> =
            state.tables.iter().filter(|((t, _), _)| t == tenant_id).map(|((_, tid), _)| *tid).collect();
        for entry in &state.manifest {
            if !tenant_tables.contains(&entry.table_id) {
                continue;
            }
            let key = (entry.table_id, entry.file_id);
            match latest.get(&key) {
                Some((seen, _)) if seen.0 >= entry.snapshot_id.0 => {},
                _ => {
                    latest.insert(key, (entry.snapshot_id, entry.change_type));
                },
            }
        }
        Ok(latest
            .into_iter()
            .filter(|(_, (snap, change))| *change == ChangeType::Remove && snap.0 < min_keep_snapshot_id.0)
            .filter_map(|((_, file_id), _)| state.data_files.get(&(tenant_id.clone(), file_id)).cloned())
            .collect())
    }

    async fn list_tenants(&self) -> anyhow::Result<Vec<TenantId>> {
        let state = self.state.lock().unwrap();
        let mut tenants: Vec<TenantId> = state.tables.keys().map(|(t, _)| t.clone()).collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }

    async fn nth_latest_snapshot_id(&self, tenant_id: &TenantId, offset_from_latest: u32) -> anyhow::Result<Option<SnapshotId>> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<i64> = state.snapshots.values().filter(|s| &s.tenant_id == tenant_id).map(|s| s.snapshot_id.0).collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids.get(offset_from_latest as usize).map(|id| SnapshotId(*id)))
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn publish(&self, envelopes: Vec<IngestEnvelope>) -> anyhow::Result<Vec<PublishResult>> {
        let mut state = self.state.lock().unwrap();
        let mut results = Vec::with_capacity(envelopes.len());
        for env in envelopes {
            let key = (env.tenant_id.clone(), env.table_id, env.idempotency_key.clone());
            if let Some(existing) = state.idempotency.get(&key).copied() {
                results.push(PublishResult {
                    event_id: existing,
                    visibility_token: existing.as_visibility_token(),
                    inserted: false,
                });
                continue;
            }
            let event_id = EventId(self.next_event_id.fetch_add(1, Ordering::SeqCst));
            let now = SystemTime::now();
            state.events.insert(
                event_id,
                crate::types::IngestEvent {
                    event_id,
                    tenant_id: env.tenant_id.clone(),
                    table_id: env.table_id,
                    idempotency_key: env.idempotency_key.clone(),
                    op: env.op,
                    payload_json: env.payload_json,
                    event_time: env.event_time,
                    ingested_at: now,
                    state: IngestEventState::Accepted,
                    lease_owner: None,
                    lease_until: None,
                },
            );
            state.idempotency.insert(key, event_id);
            results.push(PublishResult {
                event_id,
                visibility_token: event_id.as_visibility_token(),
                inserted: true,
            });
        }
        Ok(results)
    }

    async fn claim_batch(&self, consumer_id: &str, limit: u32, lease_seconds: u64) -> anyhow::Result<ClaimedBatch> {
        let mut state = self.state.lock().unwrap();
        let now = SystemTime::now();
        let mut claimable: Vec<EventId> = state
            .events
            .values()
            .filter(|e| matches!(e.state, IngestEventState::Accepted) && e.lease_until.is_none_or(|l| l <= now))
            .map(|e| e.event_id)
            .collect();
        claimable.sort_unstable_by_key(|id| id.0);
        claimable.truncate(limit as usize);

        if claimable.is_empty() {
            return Ok(ClaimedBatch {
                batch_id: BatchId(0),
                lease_until: now,
                envelopes: Vec::new(),
            });
        }

        let batch_id = BatchId(self.next_batch_id.fetch_add(1, Ordering::SeqCst));
        let lease_until = now + std::time::Duration::from_secs(lease_seconds);
        let mut envelopes = Vec::with_capacity(claimable.len());
        for id in &claimable {
            let ev = state.events.get_mut(id).expect("claimable event vanished");
            ev.state = IngestEventState::Claimed;
            ev.lease_owner = Some(consumer_id.to_string());
            ev.lease_until = Some(lease_until);
            envelopes.push(ev.clone());
        }
        state.claim_batches.insert(
            batch_id,
            crate::types::ClaimBatch {
                batch_id,
                consumer_id: consumer_id.to_string(),
                claimed_at: now,
                lease_until,
                state: ClaimBatchState::Claimed,
            },
        );
        state.claim_items.insert(batch_id, claimable);
        Ok(ClaimedBatch {
            batch_id,
            lease_until,
            envelopes,
        })
    }

    async fn ack(&self, batch_id: BatchId, event_ids: &[EventId]) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let bound: std::collections::HashSet<EventId> = state.claim_items.get(&batch_id).cloned().unwrap_or_default().into_iter().collect();
        for id in event_ids {
            if !bound.contains(id) {
                continue;
            }
            if let Some(ev) = state.events.get_mut(id) {
                if matches!(ev.state, IngestEventState::Claimed) {
                    ev.state = IngestEventState::Committed;
                    ev.lease_owner = None;
                    ev.lease_until = None;
                }
            }
        }
        Self::recompute_batch_state(&mut state, batch_id);
        Ok(())
    }

    async fn nack(&self, batch_id: BatchId, event_ids: &[EventId], _reason: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        for id in event_ids {
            if let Some(ev) = state.events.get_mut(id) {
                ev.state = IngestEventState::Failed;
                ev.lease_owner = None;
                ev.lease_until = None;
            }
        }
        if let Some(batch) = state.claim_batches.get_mut(&batch_id) {
            batch.state = ClaimBatchState::Failed;
        }
        Ok(())
    }

    async fn extend_lease(&self, batch_id: BatchId, lease_seconds: u64) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        let is_claimed = matches!(state.claim_batches.get(&batch_id).map(|b| b.state), Some(ClaimBatchState::Claimed));
        if !is_claimed {
            anyhow::bail!(ErrorMetadata::conflict(format!("batch {batch_id:?} is not claimed")));
        }
        let new_lease_until = SystemTime::now() + std::time::Duration::from_secs(lease_seconds);
        let item_ids = state.claim_items.get(&batch_id).cloned().unwrap_or_default();
        for id in &item_ids {
            if let Some(ev) = state.events.get_mut(id) {
                if matches!(ev.state, IngestEventState::Claimed) {
                    ev.lease_until = Some(new_lease_until);
                }
            }
        }
        if let Some(batch) = state.claim_batches.get_mut(&batch_id) {
            batch.lease_until = new_lease_until;
        }
        Ok(())
    }

    async fn requeue_expired(&self) -> anyhow::Result<u64> {
        let mut state = self.state.lock().unwrap();
        let now = SystemTime::now();
        let expired_ids: Vec<EventId> = state
            .events
            .values()
            .filter(|e| matches!(e.state, IngestEventState::Claimed) && e.lease_until.is_some_and(|l| l < now))
            .map(|e| e.event_id)
            .collect();
        let mut stale_batches = std::collections::HashSet::new();
        for (batch_id, items) in &state.claim_items {
            if items.iter().any(|i| expired_ids.contains(i)) {
                stale_batches.insert(*batch_id);
            }
        }
        for id in &expired_ids {
            if let Some(ev) = state.events.get_mut(id) {
                ev.state = IngestEventState::Accepted;
                ev.lease_owner = None;
                ev.lease_until = None;
            }
        }
        for batch_id in stale_batches {
            if let Some(batch) = state.claim_batches.get_mut(&batch_id) {
                batch.state = ClaimBatchState::Failed;
            }
        }
        Ok(expired_ids.len() as u64)
    }

    async fn allocate_snapshot_id(&self) -> anyhow::Result<SnapshotId> {
        Ok(SnapshotId(self.next_snapshot_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn publish_batch(&self, req: PublishBatchRequest) -> anyhow::Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        let file_id = FileId(self.next_file_id.fetch_add(1, Ordering::SeqCst));
        let now = SystemTime::now();
        state.data_files.insert(
            (req.tenant_id.clone(), file_id),
            DataFile {
                file_id,
                tenant_id: req.tenant_id.clone(),
                table_id: req.file.table_id,
                object_path: req.file.object_path.clone(),
                record_count: req.file.record_count,
                file_size_bytes: req.file.file_size_bytes,
                min_event_time: req.file.min_event_time,
                max_event_time: req.file.max_event_time,
                stats_json: req.file.stats_json.clone(),
                created_at: now,
            },
        );
        let snapshot = Snapshot {
            snapshot_id: req.snapshot_id,
            tenant_id: req.tenant_id.clone(),
            created_by: "coordinator".to_string(),
            created_at: now,
            max_visibility_token: req.file.max_event_id.0,
            parent_snapshot_id: state
                .snapshots
                .values()
                .filter(|s| s.tenant_id == req.tenant_id)
                .max_by_key(|s| s.snapshot_id.0)
                .map(|s| s.snapshot_id),
        };
        state.snapshots.insert((req.tenant_id.clone(), req.snapshot_id), snapshot.clone());
        let watermark_key = (req.snapshot_id, req.file.table_id);
        let current = state.watermarks.get(&watermark_key).copied().unwrap_or(0);
        state.watermarks.insert(watermark_key, current.max(req.file.max_event_id.0));
        state.manifest.push(SnapshotFile {
            snapshot_id: req.snapshot_id,
            table_id: req.file.table_id,
            file_id,
            change_type: ChangeType::Add,
        });
        for id in &req.file.committed_event_ids {
            if let Some(ev) = state.events.get_mut(id) {
                ev.state = IngestEventState::Committed;
                ev.lease_owner = None;
                ev.lease_until = None;
            }
        }
        Self::recompute_batch_state(&mut state, req.batch_id);
        Ok(snapshot)
    }

    async fn publish_compaction(&self, req: PublishCompactionRequest) -> anyhow::Result<Snapshot> {
        let mut state = self.state.lock().unwrap();
        let now = SystemTime::now();
        let new_file_id = FileId(self.next_file_id.fetch_add(1, Ordering::SeqCst));
        state.data_files.insert(
            (req.tenant_id.clone(), new_file_id),
            DataFile {
                file_id: new_file_id,
                tenant_id: req.tenant_id.clone(),
                table_id: req.table_id,
                object_path: req.new_file.object_path.clone(),
                record_count: req.new_file.record_count,
                file_size_bytes: req.new_file.file_size_bytes,
                min_event_time: req.new_file.min_event_time,
                max_event_time: req.new_file.max_event_time,
                stats_json: req.new_file.stats_json.clone(),
                created_at: now,
            },
        );
        let prior_watermark = state
            .snapshots
            .values()
            .filter(|s| s.tenant_id == req.tenant_id)
            .max_by_key(|s| s.snapshot_id.0)
            .map(|s| s.max_visibility_token)
            .unwrap_or(0);
        let snapshot = Snapshot {
            snapshot_id: req.snapshot_id,
            tenant_id: req.tenant_id.clone(),
            created_by: "compactor".to_string(),
            created_at: now,
            max_visibility_token: prior_watermark,
            parent_snapshot_id: state
                .snapshots
                .values()
                .filter(|s| s.tenant_id == req.tenant_id)
                .max_by_key(|s| s.snapshot_id.0)
                .map(|s| s.snapshot_id),
        };
        state.snapshots.insert((req.tenant_id.clone(), req.snapshot_id), snapshot.clone());
        state.watermarks.insert((req.snapshot_id, req.table_id), prior_watermark);
        state.manifest.push(SnapshotFile {
            snapshot_id: req.snapshot_id,
            table_id: req.table_id,
            file_id: new_file_id,
            change_type: ChangeType::Add,
        });
        for source in req.source_file_ids {
            state.manifest.push(SnapshotFile {
                snapshot_id: req.snapshot_id,
                table_id: req.table_id,
                file_id: source,
                change_type: ChangeType::Remove,
            });
        }
        Ok(snapshot)
    }

    async fn delete_data_file_row(&self, tenant_id: &TenantId, file_id: FileId) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.data_files.remove(&(tenant_id.clone(), file_id));
        Ok(())
    }

    async fn record_compaction_run(&self, tenant_id: &TenantId, table_id: TableId, details: JsonValue) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.compaction_runs.push(serde_json::json!({
            "tenant_id": tenant_id.0,
            "table_id": table_id.0,
            "details": details,
        }));
        Ok(())
    }

    async fn record_gc_run(&self, tenant_id: &TenantId, details: JsonValue) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.gc_runs.push(serde_json::json!({
            "tenant_id": tenant_id.0,
            "details": details,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantId {
        TenantId("tenant-1".to_string())
    }

    fn envelope(tenant_id: &TenantId, table_id: TableId, key: &str) -> IngestEnvelope {
        IngestEnvelope {
            tenant_id: tenant_id.clone(),
            table_id,
            idempotency_key: key.to_string(),
            op: crate::types::IngestOp::Insert,
            payload_json: serde_json::json!({"a": 1}),
            event_time: None,
        }
    }

    #[tokio::test]
    async fn publish_is_idempotent() {
        let cat = InMemoryCatalog::new();
        let t = tenant();
        let table = cat.create_table(&t, "events", vec![]);
        let first = cat.publish(vec![envelope(&t, table.table_id, "idem-1")]).await.unwrap();
        assert!(first[0].inserted);
        let second = cat.publish(vec![envelope(&t, table.table_id, "idem-1")]).await.unwrap();
        assert!(!second[0].inserted);
        assert_eq!(first[0].event_id, second[0].event_id);
    }

    #[tokio::test]
    async fn claim_then_ack_commits_and_is_idempotent() {
        let cat = InMemoryCatalog::new();
        let t = tenant();
        let table = cat.create_table(&t, "events", vec![]);
        cat.publish(vec![envelope(&t, table.table_id, "idem-1")]).await.unwrap();
        let batch = cat.claim_batch("worker-1", 10, 30).await.unwrap();
        assert_eq!(batch.envelopes.len(), 1);
        let event_id = batch.envelopes[0].event_id;
        cat.ack(batch.batch_id, &[event_id]).await.unwrap();
        cat.ack(batch.batch_id, &[event_id]).await.unwrap();
        let state = cat.state.lock().unwrap();
        assert!(matches!(state.events[&event_id].state, IngestEventState::Committed));
    }

    #[tokio::test]
    async fn lease_expiry_is_reclaimable() {
        let cat = InMemoryCatalog::new();
        let t = tenant();
        let table = cat.create_table(&t, "events", vec![]);
        cat.publish(vec![envelope(&t, table.table_id, "idem-1")]).await.unwrap();
        let batch = cat.claim_batch("worker-1", 10, 10).await.unwrap();
        cat.force_lease_expired(batch.batch_id);
        let n = cat.requeue_expired().await.unwrap();
        assert_eq!(n, 1);
        let state = cat.state.lock().unwrap();
        let ev = state.events.values().next().unwrap();
        assert!(matches!(ev.state, IngestEventState::Accepted));
    }
}
