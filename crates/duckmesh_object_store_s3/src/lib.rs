//! S3-backed [`ObjectStore`], grounded on `aws_s3::storage::S3Storage` with
//! its multipart upload machinery removed — DuckMesh's contract is a
//! single-shot `Put`, not a streaming multipart protocol.
use std::time::SystemTime;

use async_trait::async_trait;
use aws_sdk_s3::{
    operation::{
        get_object::GetObjectError,
        head_object::HeadObjectError,
    },
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use duckmesh_common::errors::ErrorMetadata;
use duckmesh_object_store::{
    ObjectKey,
    ObjectStat,
    ObjectStore,
    PutResult,
};

pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    pub async fn from_env(bucket: String) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), bucket)
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    async fn put(&self, key: &ObjectKey, body: Bytes, content_type: &str) -> anyhow::Result<PutResult> {
        let size = body.len() as u64;
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| anyhow::Error::new(e).context(format!("S3 put failed for {key}")))?;
        Ok(PutResult {
            key: key.clone(),
            size,
            etag: output.e_tag().map(str::to_string),
        })
    }

    async fn get(&self, key: &ObjectKey) -> anyhow::Result<Bytes> {
        let result = self.client.get_object().bucket(&self.bucket).key(key.as_str()).send().await;
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if let aws_sdk_s3::error::SdkError::ServiceError(service_err) = &err {
                    if matches!(service_err.err(), GetObjectError::NoSuchKey(_)) {
                        return Err(anyhow::Error::new(ErrorMetadata::not_found(
                            "OBJECT_NOT_FOUND",
                            format!("no object at {key}"),
                        )));
                    }
                }
                return Err(anyhow::Error::new(err).context(format!("S3 get failed for {key}")));
            },
        };
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| anyhow::Error::new(e).context(format!("S3 get body read failed for {key}")))?
            .into_bytes();
        Ok(bytes)
    }

    async fn stat(&self, key: &ObjectKey) -> anyhow::Result<Option<ObjectStat>> {
        let result = self.client.head_object().bucket(&self.bucket).key(key.as_str()).send().await;
        match result {
            Ok(output) => Ok(Some(ObjectStat {
                size: output.content_length().unwrap_or(0) as u64,
                etag: output.e_tag().map(str::to_string),
                last_modified: output
                    .last_modified()
                    .and_then(|t| t.try_into().ok())
                    .unwrap_or(SystemTime::UNIX_EPOCH),
            })),
            Err(err) => {
                if let aws_sdk_s3::error::SdkError::ServiceError(service_err) = &err {
                    if matches!(service_err.err(), HeadObjectError::NotFound(_)) {
                        return Ok(None);
                    }
                }
                Err(anyhow::Error::new(err).context(format!("S3 head failed for {key}")))
            },
        }
    }

    async fn delete(&self, key: &ObjectKey) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| anyhow::Error::new(e).context(format!("S3 delete failed for {key}")))?;
        Ok(())
    }
}

