//! Exhaustive key listing across backend page caps
//!
//! Backends cap a single list call (S3: 1000 keys). Every prefix-based
//! list and delete goes through [`list_keys`], which pages sequentially
//! until the backend reports no further results, so callers never observe
//! silently truncated listings.

use crate::backend::ObjectBackend;
use crate::error::Result;
use crate::storage::key::Key;

/// Collect every key under `prefix`, paging with `max_keys` per call.
///
/// Pages are fetched strictly one after another; the continuation token
/// for the next call is the last key of the page just received. Keys
/// accumulate in page-arrival order with no deduplication or reordering.
/// A failure on any page discards the accumulated keys and surfaces the
/// error.
pub(crate) async fn list_keys(
    backend: &dyn ObjectBackend,
    prefix: &str,
    max_keys: i32,
) -> Result<Vec<Key>> {
    let mut keys: Vec<Key> = Vec::new();
    let mut start_after: Option<String> = None;

    loop {
        let page = backend.list_page(prefix, max_keys, start_after.take()).await?;

        let truncated = page.truncated;
        start_after = page.keys.last().cloned();
        keys.extend(page.keys.into_iter().map(Key::from));

        if !truncated {
            break;
        }

        // A truncated page with no keys yields no usable token; stop
        // instead of reissuing the same request forever.
        if start_after.is_none() {
            tracing::warn!("backend reported a truncated page with zero keys for prefix {}", prefix);
            break;
        }
    }

    tracing::debug!("listed {} keys under prefix {}", keys.len(), prefix);
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::backend::{GetResponse, ListPage, MemoryBackend, PutRequest, UploadRequest};
    use crate::error::StorageError;
    use crate::storage::types::ObjectMetadata;

    /// Backend that replays a fixed script of list pages; the other
    /// operations are never called by the lister.
    struct ScriptedBackend {
        pages: Mutex<VecDeque<Result<ListPage>>>,
    }

    impl ScriptedBackend {
        fn new(pages: Vec<Result<ListPage>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
            }
        }
    }

    #[async_trait]
    impl ObjectBackend for ScriptedBackend {
        async fn put(&self, _request: PutRequest) -> Result<()> {
            unimplemented!("lister never writes")
        }

        async fn upload(&self, _request: UploadRequest) -> Result<()> {
            unimplemented!("lister never writes")
        }

        async fn get(&self, _key: &str) -> Result<GetResponse> {
            unimplemented!("lister never reads")
        }

        async fn head(&self, _key: &str) -> Result<ObjectMetadata> {
            unimplemented!("lister never probes")
        }

        async fn list_page(
            &self,
            _prefix: &str,
            _max_keys: i32,
            _start_after: Option<String>,
        ) -> Result<ListPage> {
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .expect("lister requested more pages than scripted")
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            unimplemented!("lister never deletes")
        }
    }

    async fn seed(backend: &MemoryBackend, keys: &[&str]) {
        for key in keys {
            backend
                .put(PutRequest {
                    key: key.to_string(),
                    body: bytes::Bytes::from_static(b"x"),
                    content_type: "application/octet-stream".to_string(),
                    cache_control: "public, max-age=60".to_string(),
                    content_encoding: None,
                    content_length: 1,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn pages_through_everything() {
        let backend = MemoryBackend::new();
        seed(
            &backend,
            &["v1/a.js", "v1/b.css", "v1/c.html", "v1/d.txt", "v1/e.png"],
        )
        .await;

        // Page size below the key count forces continuation.
        let keys = list_keys(&backend, "v1/", 2).await.unwrap();
        let keys: Vec<&str> = keys.iter().map(Key::as_str).collect();
        assert_eq!(keys, vec!["v1/a.js", "v1/b.css", "v1/c.html", "v1/d.txt", "v1/e.png"]);
    }

    #[tokio::test]
    async fn single_page_when_under_cap() {
        let backend = MemoryBackend::new();
        seed(&backend, &["v1/a.js", "v1/b.css"]).await;

        let keys = list_keys(&backend, "v1/", 1000).await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn empty_prefix_lists_nothing() {
        let backend = MemoryBackend::new();
        seed(&backend, &["v1/a.js"]).await;

        let keys = list_keys(&backend, "v2/", 1000).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn truncated_page_with_no_keys_terminates() {
        // A malformed backend answer must not spin the loop forever.
        let backend = ScriptedBackend::new(vec![Ok(ListPage {
            keys: vec![],
            truncated: true,
        })]);

        let keys = list_keys(&backend, "v1/", 2).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn page_failure_discards_accumulated_keys() {
        let backend = ScriptedBackend::new(vec![
            Ok(ListPage {
                keys: vec!["v1/a.js".to_string()],
                truncated: true,
            }),
            Err(StorageError::Backend("list call failed".to_string())),
        ]);

        // The first page succeeded, but the caller must see only the
        // error, never a partial result.
        let result = list_keys(&backend, "v1/", 1).await;
        match result {
            Err(err) => assert!(!err.is_not_found()),
            Ok(keys) => panic!("expected an error, got {} keys", keys.len()),
        }
    }

    #[tokio::test]
    async fn no_duplicates_across_pages() {
        let backend = MemoryBackend::new();
        let names: Vec<String> = (0..7).map(|i| format!("v1/file-{}.txt", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        seed(&backend, &refs).await;

        let keys = list_keys(&backend, "v1/", 3).await.unwrap();
        assert_eq!(keys.len(), 7);
        let mut unique = keys.clone();
        unique.dedup();
        assert_eq!(unique.len(), 7);
    }
}
