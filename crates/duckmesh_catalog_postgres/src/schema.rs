//! DDL for the catalog schema in §3/§6.1: tenants, tables, schema versions,
//! ingest events, claim batches/items, snapshots, watermarks, data files,
//! the snapshot-file manifest, and the compaction/gc audit tables.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    DO $$ BEGIN
        CREATE TYPE ingest_op AS ENUM ('insert', 'upsert', 'delete');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$;
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE ingest_event_state AS ENUM ('accepted', 'claimed', 'committed', 'failed');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$;
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE claim_batch_state AS ENUM ('claimed', 'committed', 'failed');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$;
    "#,
    r#"
    DO $$ BEGIN
        CREATE TYPE manifest_change_type AS ENUM ('add', 'remove');
    EXCEPTION WHEN duplicate_object THEN NULL; END $$;
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tenant (
        tenant_id TEXT PRIMARY KEY,
        status TEXT NOT NULL DEFAULT 'active'
    )
    "#,
    r#"
    CREATE SEQUENCE IF NOT EXISTS table_def_table_id_seq
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS table_def (
        table_id BIGINT PRIMARY KEY DEFAULT nextval('table_def_table_id_seq'),
        tenant_id TEXT NOT NULL REFERENCES tenant(tenant_id),
        table_name TEXT NOT NULL,
        primary_key_cols JSONB NOT NULL DEFAULT '[]',
        partition_spec JSONB NOT NULL DEFAULT '{}',
        active_schema_version INT NOT NULL DEFAULT 1,
        UNIQUE (tenant_id, table_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS table_schema_version (
        table_id BIGINT NOT NULL REFERENCES table_def(table_id),
        schema_version INT NOT NULL,
        schema_json JSONB NOT NULL,
        compatibility_mode TEXT NOT NULL DEFAULT 'backward',
        PRIMARY KEY (table_id, schema_version)
    )
    "#,
    r#"
    CREATE SEQUENCE IF NOT EXISTS ingest_event_event_id_seq
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingest_event (
        event_id BIGINT PRIMARY KEY DEFAULT nextval('ingest_event_event_id_seq'),
        tenant_id TEXT NOT NULL REFERENCES tenant(tenant_id),
        table_id BIGINT NOT NULL REFERENCES table_def(table_id),
        idempotency_key TEXT NOT NULL,
        op ingest_op NOT NULL,
        payload_json JSONB NOT NULL,
        event_time TIMESTAMPTZ,
        ingested_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        state ingest_event_state NOT NULL DEFAULT 'accepted',
        lease_owner TEXT,
        lease_until TIMESTAMPTZ,
        UNIQUE (tenant_id, table_id, idempotency_key)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ingest_event_claim_idx
        ON ingest_event (state, lease_until, table_id)
    "#,
    r#"
    CREATE SEQUENCE IF NOT EXISTS claim_batch_batch_id_seq
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS claim_batch (
        batch_id BIGINT PRIMARY KEY DEFAULT nextval('claim_batch_batch_id_seq'),
        consumer_id TEXT NOT NULL,
        claimed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        lease_until TIMESTAMPTZ NOT NULL,
        state claim_batch_state NOT NULL DEFAULT 'claimed'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS claim_item (
        batch_id BIGINT NOT NULL REFERENCES claim_batch(batch_id),
        event_id BIGINT NOT NULL REFERENCES ingest_event(event_id),
        PRIMARY KEY (batch_id, event_id)
    )
    "#,
    r#"
    CREATE SEQUENCE IF NOT EXISTS snapshot_snapshot_id_seq
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshot (
        snapshot_id BIGINT PRIMARY KEY DEFAULT nextval('snapshot_snapshot_id_seq'),
        tenant_id TEXT NOT NULL REFERENCES tenant(tenant_id),
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        max_visibility_token BIGINT NOT NULL,
        parent_snapshot_id BIGINT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS snapshot_tenant_idx ON snapshot (tenant_id, snapshot_id DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshot_table_watermark (
        snapshot_id BIGINT NOT NULL REFERENCES snapshot(snapshot_id),
        table_id BIGINT NOT NULL REFERENCES table_def(table_id),
        max_visibility_token BIGINT NOT NULL,
        PRIMARY KEY (snapshot_id, table_id)
    )
    "#,
    r#"
    CREATE SEQUENCE IF NOT EXISTS data_file_file_id_seq
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS data_file (
        file_id BIGINT PRIMARY KEY DEFAULT nextval('data_file_file_id_seq'),
        tenant_id TEXT NOT NULL REFERENCES tenant(tenant_id),
        table_id BIGINT NOT NULL REFERENCES table_def(table_id),
        object_path TEXT NOT NULL,
        record_count BIGINT NOT NULL,
        file_size_bytes BIGINT NOT NULL,
        min_event_time TIMESTAMPTZ,
        max_event_time TIMESTAMPTZ,
        stats_json JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshot_file (
        snapshot_id BIGINT NOT NULL REFERENCES snapshot(snapshot_id),
        table_id BIGINT NOT NULL REFERENCES table_def(table_id),
        file_id BIGINT NOT NULL REFERENCES data_file(file_id),
        change_type manifest_change_type NOT NULL,
        PRIMARY KEY (snapshot_id, table_id, file_id, change_type)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS snapshot_file_lookup_idx ON snapshot_file (table_id, file_id, snapshot_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS compaction_run (
        id BIGSERIAL PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        table_id BIGINT NOT NULL,
        ran_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        details JSONB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS gc_run (
        id BIGSERIAL PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        ran_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        details JSONB NOT NULL
    )
    "#,
];
