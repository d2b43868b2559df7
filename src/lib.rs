//! S3-compatible object storage adapter
//!
//! A thin layer over bucket-style storage backends (AWS S3, MinIO,
//! Cloudflare R2, ...) providing key-namespaced writes, reads, streaming
//! reads with metadata-first delivery, exhaustive prefix listing across
//! backend page caps, and optional cross-region fallback reads for lazy
//! data migration.
//!
//! # Modules
//!
//! - `config`: adapter configuration (`StorageOptions`)
//! - `backend`: the consumed storage capability and its implementations
//! - `storage`: the public object access facade (`Storage`)

pub mod backend;
pub mod config;
pub mod error;
pub mod storage;

pub use config::{FallbackOptions, StorageOptions};
pub use error::{Result, StorageError};
pub use storage::Storage;
