//! CLI surface. Grounded on `local_backend/src/config.rs`'s `clap::Parser`
//! struct with `env`-backed defaults; subcommands replace that crate's
//! HTTP bind flags since this binary has no HTTP transport.
use clap::{
    Parser,
    Subcommand,
};

#[derive(Parser, Debug)]
#[command(name = "duckmesh", version, about = "DuckMesh multi-tenant analytics plane")]
pub struct Cli {
    /// Postgres connection string for the catalog.
    #[arg(long, env = "DUCKMESH_CATALOG_URL")]
    pub catalog_url: String,

    /// S3 bucket backing the object store facade.
    #[arg(long, env = "DUCKMESH_OBJECT_STORE_BUCKET")]
    pub object_store_bucket: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the commit coordinator and periodic maintenance sweeps until
    /// interrupted (Ctrl-C).
    Serve {
        #[arg(long, env = "DUCKMESH_CONSUMER_ID", default_value = "duckmesh-coordinator")]
        consumer_id: String,
    },
    /// Run one compaction sweep (all tenants, or one with `--tenant`).
    Compact {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Run one retention/GC sweep (all tenants, or one with `--tenant`).
    Gc {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Run one integrity validation sweep (all tenants, or one with `--tenant`).
    /// Exits non-zero if any tenant's report is unhealthy.
    Integrity {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Print lag statistics for a tenant.
    Lag { tenant: String },
    /// Run one read-only SQL query against a tenant's snapshot.
    Query {
        tenant: String,
        sql: String,
        #[arg(long)]
        min_visibility_token: Option<i64>,
        #[arg(long)]
        consistency_timeout_ms: Option<u64>,
        #[arg(long)]
        row_limit: Option<u64>,
    },
}
