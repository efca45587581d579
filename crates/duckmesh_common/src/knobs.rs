//! Environment-variable-driven tunables, following the pattern of reading an
//! override once at process start and logging when a default is overridden.
use std::{
    env,
    fmt::Debug,
    str::FromStr,
    sync::LazyLock,
};

pub fn env_config<T: Debug + FromStr>(name: &str, default: T) -> T
where
    <T as FromStr>::Err: Debug,
{
    let var_s = match env::var(name) {
        Ok(s) => s,
        Err(env::VarError::NotPresent) => return default,
        Err(env::VarError::NotUnicode(..)) => {
            tracing::warn!("Invalid value for {name}, falling back to {default:?}.");
            return default;
        },
    };
    match T::from_str(&var_s) {
        Ok(v) => {
            tracing::info!("Overriding {name} to {v:?} from environment");
            v
        },
        Err(e) => {
            tracing::warn!("Invalid value {var_s} for {name}, falling back to {default:?}: {e:?}");
            default
        },
    }
}

/// Lease duration granted to a coordinator on `ClaimBatch`.
pub static CLAIM_LEASE_SECONDS: LazyLock<u64> =
    LazyLock::new(|| env_config("DUCKMESH_CLAIM_LEASE_SECONDS", 30));

/// How long the commit coordinator sleeps after an empty claim.
pub static COORDINATOR_POLL_INTERVAL_MS: LazyLock<u64> =
    LazyLock::new(|| env_config("DUCKMESH_COORDINATOR_POLL_INTERVAL_MS", 250));

/// Max events claimed per `ClaimBatch` call by the coordinator.
pub static COORDINATOR_CLAIM_LIMIT: LazyLock<u32> =
    LazyLock::new(|| env_config("DUCKMESH_COORDINATOR_CLAIM_LIMIT", 500));

/// Barrier poll interval. Fixed at 50ms by the query contract; kept as a
/// knob purely so tests can shorten it.
pub static BARRIER_POLL_INTERVAL_MS: LazyLock<u64> =
    LazyLock::new(|| env_config("DUCKMESH_BARRIER_POLL_INTERVAL_MS", 50));

/// Default `consistency_timeout_ms` when a query omits one.
pub static DEFAULT_CONSISTENCY_TIMEOUT_MS: LazyLock<u64> =
    LazyLock::new(|| env_config("DUCKMESH_DEFAULT_CONSISTENCY_TIMEOUT_MS", 3000));

/// Minimum active files in a table before compaction will act on it.
pub static COMPACTION_MIN_INPUT_FILES: LazyLock<usize> =
    LazyLock::new(|| env_config("DUCKMESH_COMPACTION_MIN_INPUT_FILES", 8));

/// Interval between periodic compaction sweeps.
pub static COMPACTION_POLL_INTERVAL_SECONDS: LazyLock<u64> =
    LazyLock::new(|| env_config("DUCKMESH_COMPACTION_POLL_INTERVAL_SECONDS", 300));

/// `N` in "keep the N most recent snapshots" for retention.
pub static RETENTION_KEEP_SNAPSHOTS: LazyLock<u32> =
    LazyLock::new(|| env_config("DUCKMESH_RETENTION_KEEP_SNAPSHOTS", 20));

/// `A`: minimum object age before GC will consider deleting it.
pub static RETENTION_GC_SAFETY_AGE_SECONDS: LazyLock<u64> =
    LazyLock::new(|| env_config("DUCKMESH_RETENTION_GC_SAFETY_AGE_SECONDS", 3600));

/// Interval between periodic retention/GC sweeps.
pub static RETENTION_POLL_INTERVAL_SECONDS: LazyLock<u64> =
    LazyLock::new(|| env_config("DUCKMESH_RETENTION_POLL_INTERVAL_SECONDS", 600));

/// Most recent snapshots examined by an integrity run.
pub static INTEGRITY_SNAPSHOT_LIMIT: LazyLock<u32> =
    LazyLock::new(|| env_config("DUCKMESH_INTEGRITY_SNAPSHOT_LIMIT", 10));

/// Bounded first-N issue sampling appended to an integrity failure.
pub static INTEGRITY_ISSUE_SAMPLE_LIMIT: LazyLock<usize> =
    LazyLock::new(|| env_config("DUCKMESH_INTEGRITY_ISSUE_SAMPLE_LIMIT", 20));

/// Retries for a single group's encode-upload-publish sequence before the
/// coordinator gives up on that group for this tick and moves on, leaving
/// its events claimed (a future lease expiry reclaims them).
pub static COORDINATOR_COMMIT_MAX_RETRIES: LazyLock<u32> =
    LazyLock::new(|| env_config("DUCKMESH_COORDINATOR_COMMIT_MAX_RETRIES", 5));
