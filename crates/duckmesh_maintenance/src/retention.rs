//! Retention/GC: deletes files whose latest manifest entry is `remove`,
//! below the keep-window, and past the safety age (§4.6 Retention / GC).
//! Grounded on `database/src/retention.rs`'s per-tenant sweep-and-report
//! shape, simplified since DuckMesh's GC has no external rate-limit
//! requirement (the teacher's `governor` dependency is not carried over).
use std::time::Duration;

use duckmesh_common::{
    catalog::Catalog,
    knobs::{
        RETENTION_GC_SAFETY_AGE_SECONDS,
        RETENTION_KEEP_SNAPSHOTS,
    },
    types::{
        FileId,
        TenantId,
    },
    Runtime,
};
use duckmesh_object_store::{
    ObjectKey,
    ObjectStore,
};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct GcReport {
    pub tenant_id: Option<TenantId>,
    pub candidate_files: usize,
    pub files_deleted: usize,
    pub errors: Vec<String>,
}

impl GcReport {
    fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Default::default()
        }
    }
}

/// Runs one GC sweep for a tenant. Object delete happens before the catalog
/// row delete (§4.6): a crash between the two leaves a dangling `DataFile`
/// row pointing at nothing, caught by a later integrity run rather than
/// silently re-surfacing the object.
pub async fn gc_tenant<C: Catalog, S: ObjectStore, RT: Runtime>(catalog: &C, store: &S, runtime: &RT, tenant_id: &TenantId) -> anyhow::Result<GcReport> {
    let mut report = GcReport::for_tenant(tenant_id.clone());

    let keep_n = *RETENTION_KEEP_SNAPSHOTS;
    let min_keep_snapshot_id = match catalog.nth_latest_snapshot_id(tenant_id, keep_n.saturating_sub(1)).await? {
        Some(id) => id,
        None => {
            // Fewer than `keep_n` snapshots exist; nothing is outside the
            // keep window yet.
            catalog.record_gc_run(tenant_id, serde_json::json!(report_details(&report))).await?;
            return Ok(report);
        },
    };

    let candidates = catalog.gc_candidates(tenant_id, min_keep_snapshot_id).await?;
    let safety_age = Duration::from_secs(*RETENTION_GC_SAFETY_AGE_SECONDS);
    let now = runtime.system_time();

    let eligible: Vec<_> = candidates
        .into_iter()
        .filter(|f| now.duration_since(f.created_at).map(|age| age >= safety_age).unwrap_or(false))
        .collect();
    report.candidate_files = eligible.len();

    for file in eligible {
        if let Err(e) = delete_one(catalog, store, tenant_id, file.file_id, &file.object_path).await {
            report.errors.push(format!("file {}: {e:#}", file.file_id.0));
            continue;
        }
        report.files_deleted += 1;
    }

    catalog.record_gc_run(tenant_id, serde_json::json!(report_details(&report))).await?;
    Ok(report)
}

async fn delete_one<C: Catalog, S: ObjectStore>(catalog: &C, store: &S, tenant_id: &TenantId, file_id: FileId, object_path: &str) -> anyhow::Result<()> {
    let key = ObjectKey::from_stored_path(object_path.to_string());
    store.delete(&key).await?;
    catalog.delete_data_file_row(tenant_id, file_id).await?;
    Ok(())
}

fn report_details(report: &GcReport) -> serde_json::Value {
    serde_json::json!({
        "candidate_files": report.candidate_files,
        "files_deleted": report.files_deleted,
        "error": if report.errors.is_empty() { serde_json::Value::Null } else { serde_json::Value::String(report.errors.join("; ")) },
    })
}

/// Runs `gc_tenant` for every tenant. A per-tenant failure is recorded and
/// does not abort the sweep over the remaining tenants (§4.6).
pub async fn gc_all_tenants<C: Catalog, S: ObjectStore, RT: Runtime>(catalog: &C, store: &S, runtime: &RT) -> anyhow::Result<Vec<GcReport>> {
    let mut reports = Vec::new();
    for tenant_id in catalog.list_tenants().await? {
        match gc_tenant(catalog, store, runtime, &tenant_id).await {
            Ok(report) => reports.push(report),
            Err(e) => tracing::error!(?tenant_id, "gc sweep failed for tenant: {e:#}"),
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::Arc,
        time::SystemTime,
    };

    use async_trait::async_trait;
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

    /// Reports "now" far enough past real time that `GCSafetyAge` is always
    /// satisfied, without the test waiting on a real clock.
    #[derive(Clone, Copy)]
    struct FarFutureRuntime;

    #[async_trait]
    impl Runtime for FarFutureRuntime {
        async fn wait(&self, duration: std::time::Duration) {
            tokio::time::sleep(duration).await;
        }

        fn system_time(&self) -> SystemTime {
            SystemTime::now() + std::time::Duration::from_secs(10 * *RETENTION_GC_SAFETY_AGE_SECONDS)
        }

        fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<()>
        where
            F: std::future::Future<Output = ()> + Send + 'static,
        {
            tokio::spawn(future)
        }
    }

    async fn publish_one_and_tick(committer: &Committer<TokioRuntime, InMemoryCatalog, InMemoryObjectStore>, catalog: &InMemoryCatalog, tenant: &TenantId, table_id: duckmesh_common::types::TableId, key: &str) {
        catalog
            .publish(vec![IngestEnvelope {
                tenant_id: tenant.clone(),
                table_id,
                idempotency_key: key.to_string(),
                op: IngestOp::Insert,
                payload_json: serde_json::json!({}),
                event_time: None,
            }])
            .await
            .unwrap();
        committer.tick().await.unwrap();
    }

    #[tokio::test]
    async fn gc_deletes_files_below_the_keep_window_past_safety_age() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let tenant = TenantId("t1".to_string());
        let table = catalog.create_table(&tenant, "events", vec![]);
        let store = Arc::new(InMemoryObjectStore::new());
        let committer = Committer::new(TokioRuntime, catalog.clone(), store.clone(), "coordinator-1");

        let min_files = *duckmesh_common::knobs::COMPACTION_MIN_INPUT_FILES;
        for i in 0..min_files {
            publish_one_and_tick(&committer, &catalog, &tenant, table.table_id, &format!("k{i}")).await;
        }
        let outcomes = crate::compaction::compact_tenant(catalog.as_ref(), store.as_ref(), &TokioRuntime, &tenant)
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 1, "setup expects compaction to have run");

        let keep_n = *RETENTION_KEEP_SNAPSHOTS as usize;
        for i in 0..keep_n {
            publish_one_and_tick(&committer, &catalog, &tenant, table.table_id, &format!("trailing{i}")).await;
        }

        let report = gc_tenant(catalog.as_ref(), store.as_ref(), &FarFutureRuntime, &tenant).await.unwrap();
        assert_eq!(report.candidate_files, min_files);
        assert_eq!(report.files_deleted, min_files);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn gc_is_a_noop_below_the_keep_snapshot_count() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let tenant = TenantId("t1".to_string());
        let table = catalog.create_table(&tenant, "events", vec![]);
        let store = Arc::new(InMemoryObjectStore::new());
        let committer = Committer::new(TokioRuntime, catalog.clone(), store.clone(), "coordinator-1");
        publish_one_and_tick(&committer, &catalog, &tenant, table.table_id, "k0").await;

        let report = gc_tenant(catalog.as_ref(), store.as_ref(), &FarFutureRuntime, &tenant).await.unwrap();
        assert_eq!(report.candidate_files, 0);
        assert_eq!(report.files_deleted, 0);
    }
}
