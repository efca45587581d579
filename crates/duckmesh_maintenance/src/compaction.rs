//! Merges a table's active file set into one physical file (§4.6
//! Compaction). Grounded on `database/src/committer.rs`'s encode-upload-then-
//! transactionally-publish flow, with a clean-up-on-failure step added since
//! compaction, unlike a fresh commit, has no natural "never published"
//! invisibility: the merged object is uploaded before the transaction runs.
use std::collections::BTreeMap;

use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use duckmesh_common::{
    catalog::{
        Catalog,
        PublishCompactionRequest,
        PublishedFile,
    },
    errors::ErrorMetadata,
    knobs::COMPACTION_MIN_INPUT_FILES,
    types::{
        ActiveFile,
        EventId,
        TableId,
        TenantId,
    },
    Runtime,
};
use duckmesh_object_store::{
    ObjectKey,
    ObjectStore,
};
use parquet::arrow::{
    arrow_reader::ParquetRecordBatchReaderBuilder,
    ArrowWriter,
};

use crate::object_key;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CompactionOutcome {
    pub tenant_id: TenantId,
    pub table_id: TableId,
    pub files_merged: usize,
    pub new_snapshot_id: i64,
}

async fn merge_files<S: ObjectStore>(store: &S, files: &[ActiveFile]) -> anyhow::Result<(Bytes, i64)> {
    let mut batches: Vec<RecordBatch> = Vec::new();
    for active in files {
        let key = ObjectKey::from_stored_path(active.file.object_path.clone());
        let bytes = store.get(&key).await?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;
        for batch in reader {
            batches.push(batch?);
        }
    }
    let merged_record_count: i64 = batches.iter().map(|b| b.num_rows() as i64).sum();
    let source_record_count: i64 = files.iter().map(|a| a.file.record_count).sum();
    if merged_record_count != source_record_count {
        anyhow::bail!(ErrorMetadata::integrity(format!(
            "compaction row count mismatch: merged {merged_record_count} vs source {source_record_count}"
        )));
    }

    let schema = batches
        .first()
        .map(|b| b.schema())
        .ok_or_else(|| anyhow::anyhow!("no input batches to merge"))?;
    let mut buf = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
        for batch in &batches {
            writer.write(batch)?;
        }
        writer.close()?;
    }
    Ok((Bytes::from(buf), merged_record_count))
}

/// Compacts one table's active file set if it has at least
/// `CompactionMinInputFiles` files. Returns `None` if compaction did not run.
pub async fn compact_table<C: Catalog, S: ObjectStore, RT: Runtime>(
    catalog: &C,
    store: &S,
    runtime: &RT,
    tenant_id: &TenantId,
    table_id: TableId,
    active_files: &[ActiveFile],
) -> anyhow::Result<Option<CompactionOutcome>> {
    if active_files.len() < *COMPACTION_MIN_INPUT_FILES {
        return Ok(None);
    }
    let min_event_time = active_files.iter().filter_map(|a| a.file.min_event_time).min();
    let max_event_time = active_files.iter().filter_map(|a| a.file.max_event_time).max();
    let source_file_ids: Vec<_> = active_files.iter().map(|a| a.file.file_id).collect();

    let (merged_bytes, merged_record_count) = merge_files(store, active_files).await?;
    let merged_size = merged_bytes.len() as i64;

    let table = catalog
        .get_table(tenant_id, table_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("table {table_id:?} missing for tenant {tenant_id:?} mid-compaction"))?;
    let snapshot_id = catalog.allocate_snapshot_id().await?;
    let key = object_key(tenant_id, table.table_label()?, runtime.system_time(), snapshot_id.0, 0)?;
    let put = store.put(&key, merged_bytes, "application/vnd.apache.parquet").await?;

    let req = PublishCompactionRequest {
        tenant_id: tenant_id.clone(),
        snapshot_id,
        table_id,
        new_file: PublishedFile {
            table_id,
            object_path: key.as_str().to_string(),
            record_count: merged_record_count,
            file_size_bytes: put.size as i64,
            min_event_time,
            max_event_time,
            stats_json: serde_json::json!({"record_count": merged_record_count, "merged_from": source_file_ids.len()}),
            max_event_id: EventId(0),
            committed_event_ids: Vec::new(),
        },
        source_file_ids: source_file_ids.clone(),
    };

    match catalog.publish_compaction(req).await {
        Ok(snapshot) => {
            catalog
                .record_compaction_run(
                    tenant_id,
                    table_id,
                    serde_json::json!({"source_files": source_file_ids.len(), "snapshot_id": snapshot.snapshot_id.0}),
                )
                .await?;
            Ok(Some(CompactionOutcome {
                tenant_id: tenant_id.clone(),
                table_id,
                files_merged: source_file_ids.len(),
                new_snapshot_id: snapshot.snapshot_id.0,
            }))
        },
        Err(e) => {
            // Publication failed: the uploaded object is orphaned and must
            // be removed, it never entered the manifest.
            if let Err(cleanup_err) = store.delete(&key).await {
                tracing::error!(?tenant_id, ?table_id, "failed to delete orphaned compaction object: {cleanup_err:#}");
            }
            Err(e.context("publishing compaction"))
        },
    }
}

/// Groups a tenant's active file set by table and attempts compaction on
/// each group that meets the input-file threshold.
pub async fn compact_tenant<C: Catalog, S: ObjectStore, RT: Runtime>(
    catalog: &C,
    store: &S,
    runtime: &RT,
    tenant_id: &TenantId,
) -> anyhow::Result<Vec<CompactionOutcome>> {
    let Some(latest) = catalog.get_latest_snapshot(tenant_id).await? else {
        return Ok(Vec::new());
    };
    let active = catalog.list_snapshot_files(tenant_id, latest.snapshot_id).await?;
    let mut by_table: BTreeMap<TableId, Vec<ActiveFile>> = BTreeMap::new();
    for af in active {
        by_table.entry(af.table_id).or_default().push(af);
    }

    let mut outcomes = Vec::new();
    for (table_id, files) in by_table {
        if let Some(outcome) = compact_table(catalog, store, runtime, tenant_id, table_id, &files).await? {
            outcomes.push(outcome);
        }
    }
    Ok(outcomes)
}

/// Runs `compact_tenant` for every tenant known to the catalog. A failure on
/// one tenant is logged and skipped; it does not abort the sweep.
pub async fn compact_all_tenants<C: Catalog, S: ObjectStore, RT: Runtime>(catalog: &C, store: &S, runtime: &RT) -> anyhow::Result<Vec<CompactionOutcome>> {
    let mut outcomes = Vec::new();
    for tenant_id in catalog.list_tenants().await? {
        match compact_tenant(catalog, store, runtime, &tenant_id).await {
            Ok(mut o) => outcomes.append(&mut o),
            Err(e) => tracing::error!(?tenant_id, "compaction sweep failed for tenant: {e:#}"),
        }
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

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

    #[tokio::test]
    async fn compacts_once_min_input_files_is_reached() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let tenant = TenantId("t1".to_string());
        let table = catalog.create_table(&tenant, "events", vec![]);
        let store = Arc::new(InMemoryObjectStore::new());
        let committer = Committer::new(TokioRuntime, catalog.clone(), store.clone(), "coordinator-1");

        let min_files = *COMPACTION_MIN_INPUT_FILES;
        for i in 0..min_files {
            catalog
                .publish(vec![IngestEnvelope {
                    tenant_id: tenant.clone(),
                    table_id: table.table_id,
                    idempotency_key: format!("k{i}"),
                    op: IngestOp::Insert,
                    payload_json: serde_json::json!({"i": i}),
                    event_time: None,
                }])
                .await
                .unwrap();
            committer.tick().await.unwrap();
        }

        let outcomes = compact_tenant(catalog.as_ref(), store.as_ref(), &TokioRuntime, &tenant).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].files_merged, min_files);

        let snapshot = catalog.get_latest_snapshot(&tenant).await.unwrap().unwrap();
        let active = catalog.list_snapshot_files_for_table(&tenant, snapshot.snapshot_id, table.table_id).await.unwrap();
        assert_eq!(active.len(), 1, "compaction should leave exactly one active file");
        assert_eq!(active[0].file.record_count, min_files as i64);
    }

    #[tokio::test]
    async fn skips_tables_below_the_input_file_threshold() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let tenant = TenantId("t1".to_string());
        let table = catalog.create_table(&tenant, "events", vec![]);
        let store = Arc::new(InMemoryObjectStore::new());
        let committer = Committer::new(TokioRuntime, catalog.clone(), store.clone(), "coordinator-1");

        catalog
            .publish(vec![IngestEnvelope {
                tenant_id: tenant.clone(),
                table_id: table.table_id,
                idempotency_key: "k0".to_string(),
                op: IngestOp::Insert,
                payload_json: serde_json::json!({}),
                event_time: None,
            }])
            .await
            .unwrap();
        committer.tick().await.unwrap();

        let outcomes = compact_tenant(catalog.as_ref(), store.as_ref(), &TokioRuntime, &tenant).await.unwrap();
        assert!(outcomes.is_empty());
    }
}
