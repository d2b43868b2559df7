//! The storage facade

use std::sync::Arc;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};

use crate::backend::{ObjectBackend, PutRequest, S3Backend, UploadRequest};
use crate::config::StorageOptions;
use crate::error::{Result, StorageError};
use crate::storage::key::{build_key, Key};
use crate::storage::lister;
use crate::storage::read::{ObjectReadRequest, ReadStart};
use crate::storage::types::{Existence, FileContents, FileInfo, ObjectMetadata};

/// Upper bound on in-flight deletes during a prefix deletion.
const DELETE_CONCURRENCY: usize = 8;

/// Object storage adapter
///
/// Owns immutable configuration, a client handle for the primary bucket
/// and, when configured, one for the fallback bucket. Every operation
/// resolves the physical key from the logical path first; no mutable
/// state is shared between concurrent operations.
pub struct Storage {
    options: StorageOptions,
    primary: Arc<dyn ObjectBackend>,
    fallback: Option<Arc<dyn ObjectBackend>>,
}

impl Storage {
    /// Connect to S3-compatible storage using the given options.
    pub async fn connect(options: StorageOptions) -> Result<Self> {
        let primary: Arc<dyn ObjectBackend> = Arc::new(S3Backend::connect(&options).await?);

        let fallback: Option<Arc<dyn ObjectBackend>> = match &options.fallback {
            Some(descriptor) => Some(Arc::new(
                S3Backend::connect_fallback(&options, descriptor).await?,
            )),
            None => None,
        };

        Ok(Self {
            options,
            primary,
            fallback,
        })
    }

    /// Build a facade over arbitrary backends. Used by tests and local
    /// development setups.
    pub fn with_backends(
        options: StorageOptions,
        primary: Arc<dyn ObjectBackend>,
        fallback: Option<Arc<dyn ObjectBackend>>,
    ) -> Self {
        Self {
            options,
            primary,
            fallback,
        }
    }

    /// Adapter configuration.
    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    fn build_key(&self, path: &str) -> Key {
        build_key(self.options.key_prefix.as_deref(), path)
    }

    fn cache_control(&self, max_age: Option<u64>) -> String {
        format!(
            "public, max-age={}",
            max_age.unwrap_or(self.options.max_age)
        )
    }

    /// Upload a file in a single call.
    ///
    /// Content type is inferred from the path extension, the declared
    /// size is attached for backend validation, and a per-write `max_age`
    /// overrides the configured default. Stream payloads are buffered
    /// first; use [`write_stream`](Self::write_stream) when the content
    /// length is not known up front.
    pub async fn write_file(&self, file: FileInfo) -> Result<()> {
        let key = self.build_key(&file.path);
        tracing::debug!("write {} -> {}", file.path, key);

        let body = match file.contents {
            FileContents::Buffer(bytes) => bytes,
            FileContents::Stream(mut stream) => {
                let mut buffer = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Bytes::from(buffer)
            }
        };

        self.primary
            .put(PutRequest {
                key: key.into_string(),
                body,
                content_type: content_type_for(&file.path),
                cache_control: self.cache_control(file.max_age),
                content_encoding: file.gzip_encoded.then(|| "gzip".to_string()),
                content_length: file.size,
            })
            .await
    }

    /// Upload a file via the backend's streaming path. No content length
    /// is declared.
    pub async fn write_stream(&self, file: FileInfo) -> Result<()> {
        let key = self.build_key(&file.path);
        tracing::debug!("stream write {} -> {}", file.path, key);

        let body = match file.contents {
            FileContents::Stream(stream) => stream,
            FileContents::Buffer(bytes) => {
                futures::stream::iter([Ok(bytes)]).boxed()
            }
        };

        self.primary
            .upload(UploadRequest {
                key: key.into_string(),
                body,
                content_type: content_type_for(&file.path),
                cache_control: self.cache_control(file.max_age),
                content_encoding: file.gzip_encoded.then(|| "gzip".to_string()),
            })
            .await
    }

    /// Read a whole object. An absent object is `Ok(None)`, not an error.
    pub async fn read_file(&self, path: &str) -> Result<Option<Bytes>> {
        match self.read_file_stream(path, false).open().await {
            ReadStart::Found(reader) => Ok(Some(reader.read_to_end().await?)),
            ReadStart::Missing(_) => Ok(None),
            ReadStart::Failed(err) => Err(err),
        }
    }

    /// Start a streaming read.
    ///
    /// The returned request is inert until opened; opening awaits the
    /// response headers, which arrive before the first body byte. With
    /// `use_fallback`, the read targets the fallback bucket; requesting
    /// that without a configured fallback resolves to the missing
    /// outcome rather than failing.
    pub fn read_file_stream(&self, path: &str, use_fallback: bool) -> ObjectReadRequest {
        let key = self.build_key(path);

        let backend = if use_fallback {
            match &self.fallback {
                Some(backend) => backend.clone(),
                None => return ObjectReadRequest::unconfigured(path.to_string()),
            }
        } else {
            self.primary.clone()
        };

        ObjectReadRequest::new(backend, key.into_string(), path.to_string())
    }

    /// Delete every object under the built prefix.
    ///
    /// Keys are discovered exhaustively first, then deleted with bounded
    /// concurrency. The first failure aborts the batch and is surfaced;
    /// already-deleted keys are not restored.
    pub async fn delete_files(&self, prefix: &str) -> Result<()> {
        let prefix_key = self.build_key(prefix);
        let keys =
            lister::list_keys(self.primary.as_ref(), prefix_key.as_str(), self.options.max_keys)
                .await?;

        tracing::debug!("deleting {} objects under {}", keys.len(), prefix_key);

        futures::stream::iter(keys)
            .map(Ok::<Key, StorageError>)
            .try_for_each_concurrent(DELETE_CONCURRENCY, |key| {
                let backend = self.primary.clone();
                async move { backend.delete(key.as_str()).await }
            })
            .await
    }

    /// Probe for existence.
    ///
    /// Checks the primary bucket; when absent there and a fallback is
    /// configured, probes the fallback under the same key.
    /// [`Existence::Fallback`] signals the object lives only in the
    /// secondary location.
    pub async fn file_exists(&self, path: &str) -> Result<Existence> {
        let key = self.build_key(path);

        match self.primary.head(key.as_str()).await {
            Ok(_) => return Ok(Existence::Primary),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let Some(fallback) = &self.fallback else {
            return Ok(Existence::Absent);
        };

        match fallback.head(key.as_str()).await {
            Ok(_) => Ok(Existence::Fallback),
            Err(err) if err.is_not_found() => Ok(Existence::Absent),
            Err(err) => Err(err),
        }
    }

    /// List every physical key under the built prefix, paging through
    /// the backend's per-call cap.
    pub async fn list_files(&self, prefix: &str) -> Result<Vec<Key>> {
        let prefix_key = self.build_key(prefix);
        lister::list_keys(self.primary.as_ref(), prefix_key.as_str(), self.options.max_keys).await
    }

    /// Fetch normalized metadata. An absent object is `Ok(None)`.
    pub async fn get_metadata(&self, path: &str) -> Result<Option<ObjectMetadata>> {
        let key = self.build_key(path);

        match self.primary.head(key.as_str()).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Infer a content type from the path extension.
///
/// Text types carry an explicit utf-8 charset so browsers render them
/// consistently.
fn content_type_for(path: &str) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT && mime.get_param(mime_guess::mime::CHARSET).is_none()
    {
        format!("{}; charset=utf-8", mime)
    } else {
        mime.to_string()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::backend::{GetResponse, ListPage, MemoryBackend};
    use crate::config::FallbackOptions;

    /// Delegates to an in-memory store but rejects deletion of one key,
    /// for exercising the batch-delete failure policy.
    struct FailingDeletes {
        inner: MemoryBackend,
        fail_key: String,
    }

    #[async_trait]
    impl ObjectBackend for FailingDeletes {
        async fn put(&self, request: PutRequest) -> Result<()> {
            self.inner.put(request).await
        }

        async fn upload(&self, request: UploadRequest) -> Result<()> {
            self.inner.upload(request).await
        }

        async fn get(&self, key: &str) -> Result<GetResponse> {
            self.inner.get(key).await
        }

        async fn head(&self, key: &str) -> Result<ObjectMetadata> {
            self.inner.head(key).await
        }

        async fn list_page(
            &self,
            prefix: &str,
            max_keys: i32,
            start_after: Option<String>,
        ) -> Result<ListPage> {
            self.inner.list_page(prefix, max_keys, start_after).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            if key == self.fail_key {
                return Err(StorageError::Backend(format!(
                    "delete of {} rejected",
                    key
                )));
            }
            self.inner.delete(key).await
        }
    }

    fn options() -> StorageOptions {
        StorageOptions::new("assets")
    }

    fn storage_with(options: StorageOptions) -> (Storage, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let storage = Storage::with_backends(options, backend.clone(), None);
        (storage, backend)
    }

    fn storage_with_fallback(
        options: StorageOptions,
    ) -> (Storage, Arc<MemoryBackend>, Arc<MemoryBackend>) {
        let primary = Arc::new(MemoryBackend::new());
        let fallback = Arc::new(MemoryBackend::new());
        let options = options.with_fallback(FallbackOptions {
            bucket: "assets-us-west".to_string(),
            region: Some("us-west-2".to_string()),
            endpoint: None,
        });
        let storage = Storage::with_backends(options, primary.clone(), Some(fallback.clone()));
        (storage, primary, fallback)
    }

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("a/plain.txt"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("a/styles.css"), "text/css; charset=utf-8");
        assert_eq!(content_type_for("a/data.json"), "application/json");
        assert_eq!(content_type_for("a/blob"), "application/octet-stream");
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (storage, _) = storage_with(options());
        let contents = "text file contents";

        storage
            .write_file(FileInfo::from_buffer("files/plain.txt", contents))
            .await
            .unwrap();

        let read = storage.read_file("files/plain.txt").await.unwrap();
        assert_eq!(read.unwrap(), Bytes::from(contents));
    }

    #[tokio::test]
    async fn read_missing_returns_none() {
        let (storage, _) = storage_with(options());
        assert!(storage.read_file("missingfile.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_pages_past_the_backend_cap() {
        let (storage, _) = storage_with(options().with_max_keys(2));

        let names = ["v1/a.js", "v1/b.css", "v1/c.html", "v1/d.txt", "v1/e.png"];
        for name in names {
            storage
                .write_file(FileInfo::from_buffer(name, "x"))
                .await
                .unwrap();
        }

        let keys = storage.list_files("v1/").await.unwrap();
        let keys: Vec<&str> = keys.iter().map(Key::as_str).collect();
        assert_eq!(keys, names);
    }

    #[tokio::test]
    async fn exists_lifecycle() {
        let (storage, _) = storage_with(options());
        let path = "v1/app.js";

        assert_eq!(storage.file_exists(path).await.unwrap(), Existence::Absent);

        storage
            .write_file(FileInfo::from_buffer(path, "console.log(1)"))
            .await
            .unwrap();
        assert_eq!(storage.file_exists(path).await.unwrap(), Existence::Primary);

        storage.delete_files("v1/").await.unwrap();
        assert_eq!(storage.file_exists(path).await.unwrap(), Existence::Absent);
    }

    #[tokio::test]
    async fn exists_reports_fallback_location() {
        let (storage, _primary, fallback) = storage_with_fallback(options());

        // Seed the fallback bucket directly, as if the object had been
        // written before the migration started.
        let fallback_storage = Storage::with_backends(options(), fallback.clone(), None);
        fallback_storage
            .write_file(FileInfo::from_buffer("v1/legacy.txt", "old"))
            .await
            .unwrap();

        assert_eq!(
            storage.file_exists("v1/legacy.txt").await.unwrap(),
            Existence::Fallback
        );
        assert_eq!(
            storage.file_exists("v1/other.txt").await.unwrap(),
            Existence::Absent
        );
    }

    #[tokio::test]
    async fn stream_read_of_missing_key() {
        let (storage, _) = storage_with(options());

        match storage.read_file_stream("missing.txt", false).open().await {
            ReadStart::Missing(missing) => {
                assert_eq!(missing.code(), "fileNotFound");
                assert_eq!(missing.path(), "missing.txt");
            }
            other => panic!("expected missing outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stream_read_delivers_metadata_before_body() {
        let (storage, _) = storage_with(options());
        let contents = "text file contents";

        storage
            .write_file(FileInfo::from_buffer("files/plain.txt", contents))
            .await
            .unwrap();

        let mut reader = match storage.read_file_stream("files/plain.txt", false).open().await {
            ReadStart::Found(reader) => reader,
            other => panic!("expected found outcome, got {:?}", other),
        };

        // Headers are available before the first chunk is pulled.
        assert_eq!(
            reader.metadata().content_type(),
            Some("text/plain; charset=utf-8")
        );
        assert_eq!(reader.metadata().content_length(), Some(contents.len() as i64));

        let mut body = Vec::new();
        while let Some(chunk) = reader.next_chunk().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(body, contents.as_bytes());
    }

    #[tokio::test]
    async fn stream_read_from_fallback_bucket() {
        let (storage, _primary, fallback) = storage_with_fallback(options());

        let fallback_storage = Storage::with_backends(options(), fallback.clone(), None);
        fallback_storage
            .write_file(FileInfo::from_buffer("v1/legacy.txt", "old contents"))
            .await
            .unwrap();

        let reader = match storage.read_file_stream("v1/legacy.txt", true).open().await {
            ReadStart::Found(reader) => reader,
            other => panic!("expected found outcome, got {:?}", other),
        };
        assert_eq!(reader.read_to_end().await.unwrap(), Bytes::from("old contents"));
    }

    #[tokio::test]
    async fn fallback_read_without_fallback_degrades_to_missing() {
        let (storage, _) = storage_with(options());
        storage
            .write_file(FileInfo::from_buffer("v1/a.txt", "x"))
            .await
            .unwrap();

        match storage.read_file_stream("v1/a.txt", true).open().await {
            ReadStart::Missing(missing) => assert_eq!(missing.code(), "fileNotFound"),
            other => panic!("expected missing outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn metadata_for_missing_and_existing_keys() {
        let (storage, _) = storage_with(options());

        assert!(storage.get_metadata("nope.txt").await.unwrap().is_none());

        storage
            .write_file(FileInfo::from_buffer("files/plain.txt", "contents"))
            .await
            .unwrap();
        let metadata = storage.get_metadata("files/plain.txt").await.unwrap().unwrap();
        assert_eq!(metadata.content_type(), Some("text/plain; charset=utf-8"));
        assert!(metadata.etag().is_some());
    }

    #[tokio::test]
    async fn delete_then_list_is_empty() {
        let (storage, _) = storage_with(options().with_max_keys(2));

        for name in ["v2/a.txt", "v2/b.txt", "v2/c.txt", "v2/d.txt", "v2/e.txt"] {
            storage
                .write_file(FileInfo::from_buffer(name, "x"))
                .await
                .unwrap();
        }
        storage.delete_files("v2/").await.unwrap();

        assert!(storage.list_files("v2/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_aborts_on_first_failure() {
        let backend = Arc::new(FailingDeletes {
            inner: MemoryBackend::new(),
            fail_key: "v1/b.txt".to_string(),
        });
        let storage = Storage::with_backends(options(), backend, None);

        for name in ["v1/a.txt", "v1/b.txt", "v1/c.txt"] {
            storage
                .write_file(FileInfo::from_buffer(name, "x"))
                .await
                .unwrap();
        }

        let err = storage.delete_files("v1/").await.err().unwrap();
        assert!(!err.is_not_found());

        // The key whose delete failed is untouched; there is no rollback
        // of keys deleted before the failure.
        assert!(storage.file_exists("v1/b.txt").await.unwrap().exists());
    }

    #[tokio::test]
    async fn delete_scopes_to_the_prefix() {
        let (storage, _) = storage_with(options());

        storage
            .write_file(FileInfo::from_buffer("v1/keep.txt", "x"))
            .await
            .unwrap();
        storage
            .write_file(FileInfo::from_buffer("v2/drop.txt", "x"))
            .await
            .unwrap();

        storage.delete_files("v2/").await.unwrap();

        assert!(storage.file_exists("v1/keep.txt").await.unwrap().exists());
        assert!(!storage.file_exists("v2/drop.txt").await.unwrap().exists());
    }

    #[tokio::test]
    async fn key_prefix_namespaces_every_operation() {
        let (storage, _) = storage_with(options().with_key_prefix("deployments"));

        storage
            .write_file(FileInfo::from_buffer("v1/app.js", "code"))
            .await
            .unwrap();

        // Physical keys carry the namespace; logical paths do not.
        let keys = storage.list_files("v1/").await.unwrap();
        assert_eq!(keys[0].as_str(), "deployments/v1/app.js");

        assert_eq!(
            storage.read_file("v1/app.js").await.unwrap().unwrap(),
            Bytes::from("code")
        );
        assert!(storage.file_exists("v1/app.js").await.unwrap().exists());

        storage.delete_files("v1/").await.unwrap();
        assert!(storage.list_files("v1/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_stream_round_trips_chunked_payload() {
        let (storage, _) = storage_with(options());

        let chunks: Vec<crate::error::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"streaming ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let file = FileInfo::from_stream(
            "files/streamed.txt",
            futures::stream::iter(chunks).boxed(),
        );

        storage.write_stream(file).await.unwrap();

        assert_eq!(
            storage.read_file("files/streamed.txt").await.unwrap().unwrap(),
            Bytes::from("hello streaming world")
        );
    }

    #[tokio::test]
    async fn write_options_reach_the_backend() {
        let (storage, _) = storage_with(options().with_max_age(600));

        storage
            .write_file(
                FileInfo::from_buffer("files/app.js.gz", "compressed")
                    .with_gzip()
                    .with_max_age(60),
            )
            .await
            .unwrap();
        storage
            .write_file(FileInfo::from_buffer("files/other.js", "plain"))
            .await
            .unwrap();

        let gzipped = storage.get_metadata("files/app.js.gz").await.unwrap().unwrap();
        assert_eq!(gzipped.content_encoding(), Some("gzip"));
        // Per-write override wins over the configured default.
        assert_eq!(gzipped.cache_control(), Some("public, max-age=60"));

        let plain = storage.get_metadata("files/other.js").await.unwrap().unwrap();
        assert_eq!(plain.cache_control(), Some("public, max-age=600"));
        assert!(plain.content_encoding().is_none());
    }
}
