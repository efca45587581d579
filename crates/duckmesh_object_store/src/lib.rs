//! Namespaced, prefix-safe put/get/stat/delete of immutable byte objects.
//!
//! Grounded on the `Storage` trait in the teacher's `storage` crate, stripped
//! of its multipart client-driven-upload machinery: the external interface
//! contract here (§6.2) is a single-shot `Put`, not a streaming upload
//! protocol, so there is no analogue to `start_client_driven_upload` /
//! `upload_part` / presigned URLs to carry over.
use std::{
    collections::HashMap,
    sync::Mutex,
    time::SystemTime,
};

use async_trait::async_trait;
use bytes::Bytes;
use duckmesh_common::{
    errors::ErrorMetadata,
    types::{
        validate_path_component,
        TenantId,
    },
};

/// A validated, tenant-prefixed key. Construct via [`ObjectKey::build`],
/// never by formatting path segments inline, so every caller goes through
/// path-component validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Builds `{tenant}/{rest...}`, validating every `/`-delimited segment
    /// against the path-component regex (§4.2).
    pub fn build(tenant_id: &TenantId, segments: &[&str]) -> anyhow::Result<Self> {
        validate_path_component(&tenant_id.0)?;
        let mut parts = vec![tenant_id.0.as_str()];
        for seg in segments {
            // `date=YYYY-MM-DD` / `hour=HH` segments contain an `=`; only the
            // literal value after `=` needs validating, the key prefix is
            // fixed by the caller.
            if let Some((prefix, value)) = seg.split_once('=') {
                validate_path_component(value)?;
                let _ = prefix;
            } else {
                validate_path_component(seg)?;
            }
            parts.push(seg);
        }
        Ok(Self(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wraps an already-validated key, e.g. `DataFile::object_path` read back
    /// from the catalog. Skips re-validation since the value was only ever
    /// written via [`ObjectKey::build`].
    pub fn from_stored_path(path: String) -> Self {
        Self(path)
    }
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub key: ObjectKey,
    pub size: u64,
    pub etag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: SystemTime,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &ObjectKey, body: Bytes, content_type: &str) -> anyhow::Result<PutResult>;

    async fn get(&self, key: &ObjectKey) -> anyhow::Result<Bytes>;

    /// Returns `Ok(None)` for a missing key rather than an error; callers
    /// that want the spec's `ObjectNotFound` classification should use
    /// [`ObjectStoreExt::stat_required`].
    async fn stat(&self, key: &ObjectKey) -> anyhow::Result<Option<ObjectStat>>;

    /// Idempotent: deleting an already-absent key is not an error.
    async fn delete(&self, key: &ObjectKey) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ObjectStoreExt: ObjectStore {
    async fn stat_required(&self, key: &ObjectKey) -> anyhow::Result<ObjectStat> {
        self.stat(key)
            .await?
            .ok_or_else(|| anyhow::Error::new(ErrorMetadata::not_found("OBJECT_NOT_FOUND", format!("no object at {key}"))))
    }
}

impl<T: ObjectStore + ?Sized> ObjectStoreExt for T {}

/// In-memory store used by every other crate's test suite.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, (Bytes, SystemTime)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &ObjectKey, body: Bytes, _content_type: &str) -> anyhow::Result<PutResult> {
        let size = body.len() as u64;
        let mut objects = self.objects.lock().unwrap();
        objects.insert(key.0.clone(), (body, SystemTime::now()));
        Ok(PutResult { key: key.clone(), size, etag: None })
    }

    async fn get(&self, key: &ObjectKey) -> anyhow::Result<Bytes> {
        let objects = self.objects.lock().unwrap();
        objects
            .get(&key.0)
            .map(|(b, _)| b.clone())
            .ok_or_else(|| anyhow::Error::new(ErrorMetadata::not_found("OBJECT_NOT_FOUND", format!("no object at {key}"))))
    }

    async fn stat(&self, key: &ObjectKey) -> anyhow::Result<Option<ObjectStat>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects.get(&key.0).map(|(b, t)| ObjectStat { size: b.len() as u64, etag: None, last_modified: *t }))
    }

    async fn delete(&self, key: &ObjectKey) -> anyhow::Result<()> {
        let mut objects = self.objects.lock().unwrap();
        objects.remove(&key.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_rejects_bad_segment() {
        let t = TenantId("tenant-1".to_string());
        assert!(ObjectKey::build(&t, &["events", "date=2024-01-01", "part-1-0.parquet"]).is_ok());
        assert!(ObjectKey::build(&t, &["events", "../escape"]).is_err());
    }

    #[tokio::test]
    async fn stat_required_maps_missing_to_not_found() {
        let store = InMemoryObjectStore::new();
        let t = TenantId("tenant-1".to_string());
        let key = ObjectKey::build(&t, &["events", "missing.parquet"]).unwrap();
        let err = store.stat_required(&key).await.unwrap_err();
        assert!(duckmesh_common::errors::ErrorMetadataAnyhowExt::is_not_found(&err));
    }

    #[tokio::test]
    async fn put_then_get_then_delete_round_trips() {
        let store = InMemoryObjectStore::new();
        let t = TenantId("tenant-1".to_string());
        let key = ObjectKey::build(&t, &["events", "part-1-0.parquet"]).unwrap();
        store.put(&key, Bytes::from_static(b"hello"), "application/octet-stream").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Bytes::from_static(b"hello"));
        store.delete(&key).await.unwrap();
        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.is_err());
    }
}
