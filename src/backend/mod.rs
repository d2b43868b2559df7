//! Storage backend capability
//!
//! The adapter consumes bucket-style storage through [`ObjectBackend`].
//! Each backend instance is bound to exactly one bucket; the facade owns
//! one handle for the primary bucket and, optionally, one for a fallback
//! bucket in another region.

mod memory;
mod s3;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::storage::types::{ContentStream, ObjectMetadata};

pub use memory::MemoryBackend;
pub use s3::S3Backend;

/// Single-shot upload request
///
/// The payload is fully buffered and its length is declared up front so
/// the backend can validate it.
pub struct PutRequest {
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub cache_control: String,
    /// `Some("gzip")` when the payload is pre-compressed
    pub content_encoding: Option<String>,
    pub content_length: i64,
}

/// Streaming upload request; content length is not known up front.
pub struct UploadRequest {
    pub key: String,
    pub body: ContentStream,
    pub content_type: String,
    pub cache_control: String,
    pub content_encoding: Option<String>,
}

/// Response to a get call: headers first, body as a lazy stream.
pub struct GetResponse {
    pub metadata: ObjectMetadata,
    pub body: ContentStream,
}

/// One bounded page of a list call.
///
/// `truncated` signals that more keys remain; the caller threads the last
/// key of this page into the next call as the continuation token.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub truncated: bool,
}

/// Bucket-style storage operations consumed by the adapter.
///
/// Objects written through this trait are world-readable; not-found
/// conditions surface as
/// [`StorageError::ObjectNotFound`](crate::error::StorageError::ObjectNotFound),
/// everything else as a backend error.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Upload a fully buffered object in one call.
    async fn put(&self, request: PutRequest) -> Result<()>;

    /// Upload an object from a stream of unknown length.
    async fn upload(&self, request: UploadRequest) -> Result<()>;

    /// Fetch an object; headers are materialized before the body stream
    /// is consumed.
    async fn get(&self, key: &str) -> Result<GetResponse>;

    /// Metadata-only probe.
    async fn head(&self, key: &str) -> Result<ObjectMetadata>;

    /// One page of keys under `prefix`, lexicographically after
    /// `start_after` when given. At most `max_keys` keys are returned.
    async fn list_page(
        &self,
        prefix: &str,
        max_keys: i32,
        start_after: Option<String>,
    ) -> Result<ListPage>;

    /// Delete a single object. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
