use std::borrow::Cow;

use thiserror::Error;

/// Machine-readable error classification surfaced to producers, query
/// clients, and the operator interface.
///
/// Maps onto the wire codes from the external interface contract:
/// `SQL_REQUIRED`, `SQL_NOT_ALLOWED`, `PARAMS_UNSUPPORTED`,
/// `SNAPSHOT_SELECTOR_CONFLICT`, `SNAPSHOT_NOT_FOUND`, `CONSISTENCY_TIMEOUT`,
/// `QUERY_EXECUTION_FAILED` are all `BadRequest`/`SnapshotNotFound`/
/// `ConsistencyTimeout` with a distinguishing `short_msg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Bad SQL, missing fields, wrong selector combination, unknown table.
    BadRequest,
    /// No row found for the requested id/key.
    NotFound,
    /// No snapshot satisfies the requested selector.
    SnapshotNotFound,
    /// Barrier wait exceeded `consistency_timeout_ms`.
    ConsistencyTimeout,
    /// Idempotency-key or claim races at the catalog layer; caller may retry.
    Conflict,
    /// Transient catalog/object-store failure; caller or loop should retry.
    Overloaded,
    /// Integrity validation found missing/mismatched/inaccessible files.
    Integrity,
    /// Unexpected internal failure with no more specific classification.
    OperationalInternalServerError,
}

impl ErrorCode {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Conflict | Self::Overloaded)
    }
}

/// Structured error attached to an [`anyhow::Error`] via `.context(..)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    pub short_msg: Cow<'static, str>,
    pub msg: Cow<'static, str>,
}

impl ErrorMetadata {
    pub fn new(code: ErrorCode, short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn bad_request(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::BadRequest, short_msg, msg)
    }

    pub fn not_found(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::NotFound, short_msg, msg)
    }

    pub fn snapshot_not_found(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::SnapshotNotFound, "SNAPSHOT_NOT_FOUND", msg)
    }

    pub fn consistency_timeout(latest_token: i64, wanted_token: i64) -> Self {
        Self::new(
            ErrorCode::ConsistencyTimeout,
            "CONSISTENCY_TIMEOUT",
            format!("timed out waiting for visibility_token {wanted_token}, latest observed {latest_token}"),
        )
    }

    pub fn conflict(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Conflict, "CONFLICT", msg)
    }

    pub fn overloaded(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Overloaded, "OVERLOADED", msg)
    }

    pub fn integrity(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Integrity, "INTEGRITY", msg)
    }

    pub fn operational_internal_server_error(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            ErrorCode::OperationalInternalServerError,
            "INTERNAL_SERVER_ERROR",
            msg,
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.code, ErrorCode::NotFound | ErrorCode::SnapshotNotFound)
    }

    pub fn is_consistency_timeout(&self) -> bool {
        self.code == ErrorCode::ConsistencyTimeout
    }
}

/// Extension for classifying an [`anyhow::Error`] chain without downcasting
/// at every call site.
pub trait ErrorMetadataAnyhowExt {
    fn error_metadata(&self) -> Option<&ErrorMetadata>;

    fn is_not_found(&self) -> bool {
        self.error_metadata().is_some_and(ErrorMetadata::is_not_found)
    }

    fn is_consistency_timeout(&self) -> bool {
        self.error_metadata().is_some_and(ErrorMetadata::is_consistency_timeout)
    }

    fn is_retryable(&self) -> bool {
        self.error_metadata().is_some_and(|m| m.code.is_retryable())
    }

    fn short_msg(&self) -> Cow<'static, str> {
        self.error_metadata()
            .map(|m| m.short_msg.clone())
            .unwrap_or(Cow::Borrowed("INTERNAL_SERVER_ERROR"))
    }
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_metadata(&self) -> Option<&ErrorMetadata> {
        self.chain().find_map(|cause| cause.downcast_ref::<ErrorMetadata>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_and_classifies_through_context() {
        let err: anyhow::Error = anyhow::Error::new(ErrorMetadata::snapshot_not_found("no snapshot for tenant"))
            .context("resolving snapshot selector");
        assert!(err.is_not_found());
        assert_eq!(err.short_msg(), "SNAPSHOT_NOT_FOUND");
    }

    #[test]
    fn plain_anyhow_error_has_no_metadata() {
        let err = anyhow::anyhow!("boom");
        assert!(!err.is_not_found());
        assert_eq!(err.short_msg(), "INTERNAL_SERVER_ERROR");
    }
}
