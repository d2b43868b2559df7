//! Object access facade
//!
//! Public operations over a namespaced bucket: writes, whole-object and
//! streaming reads, exhaustive prefix listing, prefix deletion, existence
//! probes with cross-region fallback, and metadata fetches.

mod adapter;
pub mod key;
pub(crate) mod lister;
pub mod read;
pub mod types;

pub use adapter::Storage;
pub use key::{build_key, Key};
pub use read::{FileNotFound, ObjectReadRequest, ObjectReader, ReadStart};
pub use types::{ContentStream, Existence, FileContents, FileInfo, ObjectMetadata};
