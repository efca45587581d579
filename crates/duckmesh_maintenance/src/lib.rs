//! Background maintenance: compaction, retention/GC, and integrity
//! validation (§4.6). Grounded on `database/src/retention.rs`'s
//! knobs-plus-backoff-plus-loop idiom; each sweep is a plain async function
//! over the catalog/object-store traits so the binary crate can run them
//! either as one-shot operator commands or as periodic background tasks.
use std::time::SystemTime;

use chrono::{
    DateTime,
    Utc,
};
use duckmesh_common::types::TenantId;
use duckmesh_object_store::ObjectKey;

pub mod compaction;
pub mod integrity;
pub mod retention;

pub use compaction::{
    compact_all_tenants,
    compact_tenant,
    CompactionOutcome,
};
pub use integrity::{
    check_all_tenants,
    check_tenant,
    IntegrityReport,
};
pub use retention::{
    gc_all_tenants,
    gc_tenant,
    GcReport,
};

fn object_key(tenant_id: &TenantId, table_label: &str, at: SystemTime, snapshot_id: i64, seq: u32) -> anyhow::Result<ObjectKey> {
    let dt: DateTime<Utc> = at.into();
    let date = format!("date={}", dt.format("%Y-%m-%d"));
    let hour = format!("hour={}", dt.format("%H"));
    let file_name = format!("part-{snapshot_id}-{seq}.parquet");
    ObjectKey::build(tenant_id, &[table_label, &date, &hour, &file_name])
}
