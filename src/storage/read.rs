//! Two-phase streaming reads
//!
//! A streaming read resolves in two steps: [`ObjectReadRequest::open`]
//! awaits the response headers, and only the `Found` outcome hands out an
//! [`ObjectReader`] for the body. Metadata is therefore always available
//! before the first body byte, and the missing / failed / found outcomes
//! are mutually exclusive variants of one sum type instead of separately
//! emitted events.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;

use crate::backend::ObjectBackend;
use crate::error::{Result, StorageError};
use crate::storage::types::{ContentStream, ObjectMetadata};

/// Stable error code attached to missing-object outcomes.
pub const FILE_NOT_FOUND: &str = "fileNotFound";

/// Missing-object outcome of a streaming read.
///
/// Not a transport error: the request reached the backend and the backend
/// answered that no object exists under the key.
#[derive(Debug, Clone)]
pub struct FileNotFound {
    path: String,
}

impl FileNotFound {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Logical path that was requested.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Stable machine-readable code (`fileNotFound`).
    pub fn code(&self) -> &'static str {
        FILE_NOT_FOUND
    }
}

impl fmt::Display for FileNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file at path {} not found", self.path)
    }
}

impl std::error::Error for FileNotFound {}

/// Header-phase outcome of a streaming read.
pub enum ReadStart {
    /// Headers arrived; the body has not been consumed yet.
    Found(ObjectReader),
    /// No object exists under the requested path.
    Missing(FileNotFound),
    /// Transport or service failure.
    Failed(StorageError),
}

impl ReadStart {
    /// Unwrap the reader, mapping `Missing` to `None` and `Failed` to an
    /// error. Convenient for callers that treat absence as an option.
    pub fn into_reader(self) -> Result<Option<ObjectReader>> {
        match self {
            ReadStart::Found(reader) => Ok(Some(reader)),
            ReadStart::Missing(_) => Ok(None),
            ReadStart::Failed(err) => Err(err),
        }
    }
}

impl fmt::Debug for ReadStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadStart::Found(_) => f.write_str("ReadStart::Found"),
            ReadStart::Missing(missing) => write!(f, "ReadStart::Missing({})", missing.path()),
            ReadStart::Failed(err) => write!(f, "ReadStart::Failed({})", err),
        }
    }
}

/// Pending streaming read.
///
/// Inert until [`open`](Self::open) is awaited; holds the backend handle
/// and the resolved physical key. Dropping it without opening issues no
/// request at all.
pub struct ObjectReadRequest {
    backend: Option<Arc<dyn ObjectBackend>>,
    key: String,
    path: String,
}

impl ObjectReadRequest {
    pub(crate) fn new(backend: Arc<dyn ObjectBackend>, key: String, path: String) -> Self {
        Self {
            backend: Some(backend),
            key,
            path,
        }
    }

    /// A request against a source that is not configured (fallback read
    /// without a fallback bucket). Resolves to `Missing` instead of
    /// failing.
    pub(crate) fn unconfigured(path: String) -> Self {
        Self {
            backend: None,
            key: String::new(),
            path,
        }
    }

    /// Issue the request and await the response headers.
    pub async fn open(self) -> ReadStart {
        let backend = match self.backend {
            Some(backend) => backend,
            None => {
                tracing::debug!("fallback read for {} without a configured fallback", self.path);
                return ReadStart::Missing(FileNotFound::new(self.path));
            }
        };

        match backend.get(&self.key).await {
            Ok(response) => ReadStart::Found(ObjectReader {
                metadata: response.metadata,
                body: response.body,
            }),
            Err(err) if err.is_not_found() => ReadStart::Missing(FileNotFound::new(self.path)),
            Err(err) => ReadStart::Failed(err),
        }
    }
}

/// Open object stream.
///
/// Metadata is populated from the response headers before any body byte
/// is pulled; the body is consumed chunk by chunk and ends when
/// [`next_chunk`](Self::next_chunk) returns `None`. Dropping the reader
/// abandons the transfer.
pub struct ObjectReader {
    metadata: ObjectMetadata,
    body: ContentStream,
}

impl ObjectReader {
    /// Normalized response headers, available before the body.
    pub fn metadata(&self) -> &ObjectMetadata {
        &self.metadata
    }

    /// Next body chunk; `None` marks a successfully completed stream.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        self.body.next().await
    }

    /// Drain the remaining body into one buffer.
    pub async fn read_to_end(mut self) -> Result<Bytes> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buffer))
    }

    /// Split into metadata and the raw body stream.
    pub fn into_parts(self) -> (ObjectMetadata, ContentStream) {
        (self.metadata, self.body)
    }
}
