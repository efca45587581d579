//! Query text, grouped here the way `postgres/src/sql.rs` separates SQL
//! strings from the connection/trait-impl plumbing.

pub const CLAIM_BATCH: &str = r#"
WITH claimable AS (
    SELECT event_id FROM ingest_event
    WHERE state = 'accepted' AND (lease_until IS NULL OR lease_until <= now())
    ORDER BY event_id ASC
    LIMIT $1
    FOR UPDATE SKIP LOCKED
)
UPDATE ingest_event e
SET state = 'claimed', lease_owner = $2, lease_until = now() + make_interval(secs => $3)
FROM claimable c
WHERE e.event_id = c.event_id
RETURNING e.event_id, e.tenant_id, e.table_id, e.idempotency_key, e.op::text, e.payload_json,
          e.event_time, e.ingested_at, e.state::text, e.lease_owner, e.lease_until
"#;

pub const PUBLISH_EVENT: &str = r#"
INSERT INTO ingest_event (tenant_id, table_id, idempotency_key, op, payload_json, event_time)
VALUES ($1, $2, $3, $4::ingest_op, $5, $6)
ON CONFLICT (tenant_id, table_id, idempotency_key)
DO UPDATE SET tenant_id = EXCLUDED.tenant_id
RETURNING event_id, (xmax = 0) AS inserted
"#;

pub const ACK_EVENTS: &str = r#"
UPDATE ingest_event
SET state = 'committed', lease_owner = NULL, lease_until = NULL
WHERE event_id = ANY($1) AND state = 'claimed'
"#;

pub const NACK_EVENTS: &str = r#"
UPDATE ingest_event
SET state = 'failed', lease_owner = NULL, lease_until = NULL
WHERE event_id = ANY($1)
"#;

pub const RECOMPUTE_BATCH_STATE: &str = r#"
UPDATE claim_batch
SET state = 'committed'
WHERE batch_id = $1
  AND state <> 'failed'
  AND NOT EXISTS (
      SELECT 1 FROM claim_item ci
      JOIN ingest_event e ON e.event_id = ci.event_id
      WHERE ci.batch_id = $1 AND e.state = 'claimed'
  )
"#;

pub const EXTEND_LEASE: &str = r#"
UPDATE ingest_event e
SET lease_until = now() + make_interval(secs => $2)
FROM claim_item ci
WHERE ci.batch_id = $1 AND e.event_id = ci.event_id AND e.state = 'claimed'
"#;

pub const REQUEUE_EXPIRED: &str = r#"
WITH expired AS (
    UPDATE ingest_event
    SET state = 'accepted', lease_owner = NULL, lease_until = NULL
    WHERE state = 'claimed' AND lease_until < now()
    RETURNING event_id
)
SELECT count(*) AS n FROM expired
"#;

pub const FAIL_STALE_BATCHES: &str = r#"
UPDATE claim_batch
SET state = 'failed'
WHERE state = 'claimed'
  AND EXISTS (
      SELECT 1 FROM claim_item ci
      JOIN ingest_event e ON e.event_id = ci.event_id
      WHERE ci.batch_id = claim_batch.batch_id AND e.state = 'accepted'
  )
"#;

pub const GET_LATEST_SNAPSHOT: &str = r#"
SELECT snapshot_id, tenant_id, created_by, created_at, max_visibility_token, parent_snapshot_id
FROM snapshot WHERE tenant_id = $1 ORDER BY snapshot_id DESC LIMIT 1
"#;

pub const GET_SNAPSHOT_BY_ID: &str = r#"
SELECT snapshot_id, tenant_id, created_by, created_at, max_visibility_token, parent_snapshot_id
FROM snapshot WHERE tenant_id = $1 AND snapshot_id = $2
"#;

pub const GET_SNAPSHOT_BY_TIME: &str = r#"
SELECT snapshot_id, tenant_id, created_by, created_at, max_visibility_token, parent_snapshot_id
FROM snapshot WHERE tenant_id = $1 AND created_at <= $2 ORDER BY snapshot_id DESC LIMIT 1
"#;

pub const LIST_ACTIVE_FILES: &str = r#"
SELECT DISTINCT ON (sf.table_id, sf.file_id)
    sf.table_id, sf.file_id, sf.change_type::text,
    df.object_path, df.record_count, df.file_size_bytes, df.min_event_time, df.max_event_time,
    df.stats_json, df.created_at
FROM snapshot_file sf
JOIN data_file df ON df.file_id = sf.file_id
JOIN table_def td ON td.table_id = sf.table_id
WHERE td.tenant_id = $1 AND sf.snapshot_id <= $2
ORDER BY sf.table_id, sf.file_id, sf.snapshot_id DESC
"#;

pub const LIST_ACTIVE_FILES_FOR_TABLE: &str = r#"
SELECT DISTINCT ON (sf.table_id, sf.file_id)
    sf.table_id, sf.file_id, sf.change_type::text,
    df.object_path, df.record_count, df.file_size_bytes, df.min_event_time, df.max_event_time,
    df.stats_json, df.created_at
FROM snapshot_file sf
JOIN data_file df ON df.file_id = sf.file_id
JOIN table_def td ON td.table_id = sf.table_id
WHERE td.tenant_id = $1 AND sf.snapshot_id <= $2 AND sf.table_id = $3
ORDER BY sf.table_id, sf.file_id, sf.snapshot_id DESC
"#;

pub const GC_CANDIDATES: &str = r#"
SELECT DISTINCT ON (sf.table_id, sf.file_id)
    sf.file_id, sf.change_type::text, sf.snapshot_id,
    df.table_id, df.object_path, df.record_count, df.file_size_bytes, df.min_event_time, df.max_event_time,
    df.stats_json, df.created_at
FROM snapshot_file sf
JOIN data_file df ON df.file_id = sf.file_id
JOIN table_def td ON td.table_id = sf.table_id
WHERE td.tenant_id = $1
ORDER BY sf.table_id, sf.file_id, sf.snapshot_id DESC
"#;

pub const NTH_LATEST_SNAPSHOT_ID: &str = r#"
SELECT snapshot_id FROM snapshot WHERE tenant_id = $1 ORDER BY snapshot_id DESC OFFSET $2 LIMIT 1
"#;

pub const LIST_TENANTS: &str = r#"SELECT tenant_id FROM tenant ORDER BY tenant_id"#;

pub const ALLOCATE_SNAPSHOT_ID: &str = r#"SELECT nextval('snapshot_snapshot_id_seq') AS id"#;

pub const INSERT_SNAPSHOT: &str = r#"
INSERT INTO snapshot (snapshot_id, tenant_id, created_by, max_visibility_token, parent_snapshot_id)
VALUES ($1, $2, $3, $4, $5)
RETURNING snapshot_id, tenant_id, created_by, created_at, max_visibility_token, parent_snapshot_id
"#;

pub const INSERT_DATA_FILE: &str = r#"
INSERT INTO data_file (tenant_id, table_id, object_path, record_count, file_size_bytes, min_event_time, max_event_time, stats_json)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
RETURNING file_id
"#;

pub const UPSERT_WATERMARK: &str = r#"
INSERT INTO snapshot_table_watermark (snapshot_id, table_id, max_visibility_token)
VALUES ($1, $2, $3)
ON CONFLICT (snapshot_id, table_id) DO UPDATE
SET max_visibility_token = GREATEST(snapshot_table_watermark.max_visibility_token, EXCLUDED.max_visibility_token)
"#;

pub const INSERT_SNAPSHOT_FILE: &str = r#"
INSERT INTO snapshot_file (snapshot_id, table_id, file_id, change_type)
VALUES ($1, $2, $3, $4::manifest_change_type)
"#;

pub const LATEST_TABLE_WATERMARK: &str = r#"
SELECT stw.max_visibility_token
FROM snapshot_table_watermark stw
JOIN snapshot s ON s.snapshot_id = stw.snapshot_id
WHERE s.tenant_id = $1 AND stw.table_id = $2
ORDER BY stw.snapshot_id DESC LIMIT 1
"#;

pub const DELETE_DATA_FILE: &str = r#"DELETE FROM data_file WHERE tenant_id = $1 AND file_id = $2"#;

pub const GET_TABLE: &str = r#"
SELECT table_id, tenant_id, table_name, primary_key_cols, partition_spec, active_schema_version
FROM table_def WHERE tenant_id = $1 AND table_id = $2
"#;

pub const GET_TABLE_BY_NAME: &str = r#"
SELECT table_id, tenant_id, table_name, primary_key_cols, partition_spec, active_schema_version
FROM table_def WHERE tenant_id = $1 AND table_name = $2
"#;

pub const LAG_STATS: &str = r#"
SELECT
    count(*) FILTER (WHERE e.state = 'accepted') AS accepted_events,
    count(*) FILTER (WHERE e.state = 'claimed') AS claimed_events,
    min(e.ingested_at) FILTER (WHERE e.state IN ('accepted', 'claimed')) AS oldest_pending_ingest_at,
    coalesce(max(e.event_id), 0) AS latest_visibility_token
FROM ingest_event e WHERE e.tenant_id = $1
"#;

pub const LATEST_SNAPSHOT_ID_FOR_LAG: &str = r#"
SELECT max(snapshot_id) AS id FROM snapshot WHERE tenant_id = $1
"#;

pub const INSERT_COMPACTION_RUN: &str = r#"
INSERT INTO compaction_run (tenant_id, table_id, details) VALUES ($1, $2, $3)
"#;

pub const INSERT_GC_RUN: &str = r#"
INSERT INTO gc_run (tenant_id, details) VALUES ($1, $2)
"#;
