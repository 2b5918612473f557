//! Object-store adapter: durable blobs on an S3-compatible service, plus an
//! in-memory double used by the test suite.
//!
//! Every artifact crossing the store is gzip-compressed by the caller (see
//! [`crate::codec`]); keys are unique per write except the content-addressed
//! `bin/<sha256>` path, where colliding writes are identical by construction.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::env::Environment;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("object store: {0}")]
    Service(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// Best-effort create: read existence, then write if absent. The check
    /// and the write are not atomic; callers only use this for
    /// content-addressed keys where a racing duplicate upload is idempotent.
    /// Returns whether a write happened.
    async fn put_if_absent(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<bool, StoreError> {
        if self.exists(bucket, key).await? {
            debug!(bucket, key, "object already present, skipping upload");
            return Ok(false);
        }
        self.put(bucket, key, data, content_type).await?;
        Ok(true)
    }
}

/////////////////////////////////////////////////////////////////////////////
// S3 backend
/////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone)]
pub struct S3Store {
    client: s3::Client,
}

impl S3Store {
    /// Build a client from explicit credentials. An endpoint override in the
    /// environment points the SDK at MinIO or another S3 clone.
    pub fn new(env: &Environment) -> Self {
        let cred = s3::config::Credentials::new(
            env.aws_access_key_id.clone(),
            env.aws_secret_access_key.clone(),
            None,
            None,
            "gomr",
        );
        let mut conf = s3::config::Builder::new()
            .credentials_provider(cred)
            .region(s3::config::Region::new(env.aws_region.clone()))
            .behavior_version_latest();
        if let Some(url) = &env.s3_endpoint {
            conf = conf.endpoint_url(url);
        }
        Self {
            client: s3::Client::from_conf(conf.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StoreError::Service(e.into_service_error().to_string()))?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Service(service.to_string())
                }
            })?;
        let data = out
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Service(e.to_string()))?
            .into_bytes();
        Ok(data)
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service = e.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(StoreError::Service(service.to_string()))
                }
            }
        }
    }
}

/////////////////////////////////////////////////////////////////////////////
// in-memory backend
/////////////////////////////////////////////////////////////////////////////

/// In-process store that records every write, letting tests assert on
/// upload behaviour (for example that a duplicate binary is never
/// re-uploaded).
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Bytes>>,
    writes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn object_key(bucket: &str, key: &str) -> String {
        format!("{bucket}/{key}")
    }

    /// Every `bucket/key` written so far, in write order.
    pub fn write_log(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<(), StoreError> {
        let full = Self::object_key(bucket, key);
        self.objects.lock().unwrap().insert(full.clone(), data);
        self.writes.lock().unwrap().push(full);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        self.objects
            .lock()
            .unwrap()
            .get(&Self::object_key(bucket, key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains_key(&Self::object_key(bucket, key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_absent_writes_once() {
        let store = MemoryStore::new();
        let wrote = store
            .put_if_absent("b", "bin/abc", Bytes::from_static(b"x"), "application/x-gzip")
            .await
            .unwrap();
        assert!(wrote);
        let wrote = store
            .put_if_absent("b", "bin/abc", Bytes::from_static(b"x"), "application/x-gzip")
            .await
            .unwrap();
        assert!(!wrote);
        assert_eq!(store.write_log(), vec!["b/bin/abc".to_string()]);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("b", "nope").await.unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }
}
