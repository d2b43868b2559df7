//! Storage data model

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;

use crate::error::Result;

/// Lazy byte stream used for object bodies and streaming uploads.
pub type ContentStream = BoxStream<'static, Result<Bytes>>;

/// Payload of a write request.
pub enum FileContents {
    /// Fully buffered payload
    Buffer(Bytes),
    /// Lazily produced payload of unknown length
    Stream(ContentStream),
}

impl std::fmt::Debug for FileContents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileContents::Buffer(bytes) => write!(f, "Buffer({} bytes)", bytes.len()),
            FileContents::Stream(_) => write!(f, "Stream"),
        }
    }
}

/// One write request: logical path plus payload and write options.
///
/// Lives only for the duration of a single
/// [`write_file`](crate::Storage::write_file) or
/// [`write_stream`](crate::Storage::write_stream) call.
#[derive(Debug)]
pub struct FileInfo {
    /// Logical path; the physical key is derived from it
    pub path: String,
    pub contents: FileContents,
    /// Declared payload length in bytes, attached to single-shot uploads
    /// for backend validation
    pub size: i64,
    /// Payload is already gzip-compressed; sets `Content-Encoding: gzip`
    pub gzip_encoded: bool,
    /// Per-write override of the configured cache max-age
    pub max_age: Option<u64>,
}

impl FileInfo {
    /// Build a write request from a buffered payload; the declared size
    /// is the buffer length.
    pub fn from_buffer(path: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        let contents = contents.into();
        let size = contents.len() as i64;
        Self {
            path: path.into(),
            contents: FileContents::Buffer(contents),
            size,
            gzip_encoded: false,
            max_age: None,
        }
    }

    /// Build a write request from a lazy stream. Intended for
    /// [`write_stream`](crate::Storage::write_stream); declare a size with
    /// [`with_size`](Self::with_size) if the request will be passed to
    /// `write_file` instead.
    pub fn from_stream(path: impl Into<String>, contents: ContentStream) -> Self {
        Self {
            path: path.into(),
            contents: FileContents::Stream(contents),
            size: 0,
            gzip_encoded: false,
            max_age: None,
        }
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = size;
        self
    }

    pub fn with_gzip(mut self) -> Self {
        self.gzip_encoded = true;
        self
    }

    pub fn with_max_age(mut self, max_age: u64) -> Self {
        self.max_age = Some(max_age);
        self
    }
}

/// Normalized object metadata
///
/// A key-value view of the backend's response headers with names
/// lowercased on insert, so lookups never depend on the backend's casing.
/// Custom headers are carried alongside the well-known ones.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectMetadata {
    headers: BTreeMap<String, String>,
}

impl ObjectMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, normalizing its name to lowercase.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Case-insensitive header lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    pub fn content_length(&self) -> Option<i64> {
        self.get("content-length").and_then(|v| v.parse().ok())
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.get("cache-control")
    }

    pub fn content_encoding(&self) -> Option<&str> {
        self.get("content-encoding")
    }

    pub fn etag(&self) -> Option<&str> {
        self.get("etag")
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.get("last-modified")
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// All normalized headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

/// Result of an existence probe.
///
/// `Fallback` means the object was absent from the primary bucket but
/// present in the configured fallback bucket; callers use it to trigger
/// lazy migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Existence {
    Absent,
    Primary,
    Fallback,
}

impl Existence {
    /// Whether the object exists anywhere.
    pub fn exists(&self) -> bool {
        !matches!(self, Existence::Absent)
    }
}
