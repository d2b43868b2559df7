//! In-memory backend
//!
//! Keeps objects in a sorted map so listings page lexicographically, the
//! same way S3 does. Used by the test suite and for local development;
//! nothing persists between runs.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::error::{Result, StorageError};
use crate::storage::types::ObjectMetadata;

use super::{GetResponse, ListPage, ObjectBackend, PutRequest, UploadRequest};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    cache_control: String,
    content_encoding: Option<String>,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn etag(&self) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.data.hash(&mut hasher);
        format!("\"{:016x}\"", hasher.finish())
    }

    fn metadata(&self) -> ObjectMetadata {
        let mut metadata = ObjectMetadata::new();
        metadata.insert("content-type", &self.content_type);
        metadata.insert("content-length", self.data.len().to_string());
        metadata.insert("cache-control", &self.cache_control);
        if let Some(encoding) = &self.content_encoding {
            metadata.insert("content-encoding", encoding);
        }
        metadata.insert("etag", self.etag());
        metadata.insert("last-modified", self.last_modified.to_rfc2822());
        metadata
    }
}

/// In-memory object store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put(&self, request: PutRequest) -> Result<()> {
        if request.content_length != request.body.len() as i64 {
            return Err(StorageError::Backend(format!(
                "declared length {} does not match payload length {} for {}",
                request.content_length,
                request.body.len(),
                request.key
            )));
        }

        self.objects.write().await.insert(
            request.key,
            StoredObject {
                data: request.body,
                content_type: request.content_type,
                cache_control: request.cache_control,
                content_encoding: request.content_encoding,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn upload(&self, request: UploadRequest) -> Result<()> {
        let mut body = request.body;
        let mut buffer = Vec::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }

        self.objects.write().await.insert(
            request.key,
            StoredObject {
                data: Bytes::from(buffer),
                content_type: request.content_type,
                cache_control: request.cache_control,
                content_encoding: request.content_encoding,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<GetResponse> {
        let objects = self.objects.read().await;
        let object = objects
            .get(key)
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))?;

        let metadata = object.metadata();
        let data = object.data.clone();

        // Deliver the body in small chunks so consumers exercise real
        // streaming behavior rather than a single-shot buffer.
        let chunks: Vec<Result<Bytes>> = data
            .chunks(1024)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        Ok(GetResponse {
            metadata,
            body: futures::stream::iter(chunks).boxed(),
        })
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(StoredObject::metadata)
            .ok_or_else(|| StorageError::ObjectNotFound(key.to_string()))
    }

    async fn list_page(
        &self,
        prefix: &str,
        max_keys: i32,
        start_after: Option<String>,
    ) -> Result<ListPage> {
        let objects = self.objects.read().await;
        let max_keys = max_keys.max(0) as usize;

        let mut matching = objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .filter(|key| match &start_after {
                Some(token) => key.as_str() > token.as_str(),
                None => true,
            });

        let keys: Vec<String> = matching.by_ref().take(max_keys).cloned().collect();
        let truncated = matching.next().is_some();

        Ok(ListPage { keys, truncated })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}
