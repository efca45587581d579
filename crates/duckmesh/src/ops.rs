//! Operator interface (spec §6 item 5): lag statistics, on-demand
//! compaction/retention/integrity runs, each returning a structured summary.
//! Adapted here to plain async functions rather than HTTP handlers, since
//! HTTP transport and auth are both out of scope; grounded on the
//! one-function-per-operator-action shape of `local_backend/src/admin.rs`,
//! simplified since the CLI has no admin-key boundary to check.
use duckmesh_common::{
    catalog::{
        Catalog,
        CatalogReader,
        LagStats,
    },
    types::TenantId,
    Runtime,
};
use duckmesh_maintenance::{
    check_all_tenants,
    check_tenant,
    compact_all_tenants,
    compact_tenant,
    gc_all_tenants,
    gc_tenant,
    CompactionOutcome,
    GcReport,
    IntegrityReport,
};
use duckmesh_object_store::ObjectStore;

pub async fn lag_stats<C: CatalogReader>(catalog: &C, tenant_id: &TenantId) -> anyhow::Result<LagStats> {
    catalog.lag_stats(tenant_id).await
}

pub async fn run_compaction<C: Catalog, S: ObjectStore, RT: Runtime>(
    catalog: &C,
    store: &S,
    runtime: &RT,
    tenant_id: Option<TenantId>,
) -> anyhow::Result<Vec<CompactionOutcome>> {
    match tenant_id {
        Some(t) => compact_tenant(catalog, store, runtime, &t).await,
        None => compact_all_tenants(catalog, store, runtime).await,
    }
}

pub async fn run_gc<C: Catalog, S: ObjectStore, RT: Runtime>(catalog: &C, store: &S, runtime: &RT, tenant_id: Option<TenantId>) -> anyhow::Result<Vec<GcReport>> {
    match tenant_id {
        Some(t) => Ok(vec![gc_tenant(catalog, store, runtime, &t).await?]),
        None => gc_all_tenants(catalog, store, runtime).await,
    }
}

pub async fn run_integrity<C: CatalogReader, S: ObjectStore>(catalog: &C, store: &S, tenant_id: Option<TenantId>) -> anyhow::Result<Vec<IntegrityReport>> {
    match tenant_id {
        Some(t) => Ok(vec![check_tenant(catalog, store, &t).await?]),
        None => check_all_tenants(catalog, store).await,
    }
}
