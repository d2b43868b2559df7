//! Configuration for the storage adapter

use serde::Deserialize;
use std::env;

/// Default `Cache-Control` max-age in seconds, inherited from the
/// previous generation of this adapter.
pub const DEFAULT_MAX_AGE: u64 = 54_000;

/// Default per-page key count for list operations. S3 caps a single
/// list call at 1000 keys.
pub const DEFAULT_MAX_KEYS: i32 = 1000;

/// Adapter configuration
///
/// Created once at [`Storage`](crate::Storage) construction and never
/// mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageOptions {
    /// Primary bucket name
    pub bucket: String,
    /// Custom endpoint (MinIO, R2, B2, ...)
    pub endpoint: Option<String>,
    /// Bucket region
    pub region: Option<String>,
    /// Static access key; falls back to the ambient AWS credential chain
    /// when unset
    pub access_key: Option<String>,
    /// Static secret key
    pub secret_key: Option<String>,
    /// Namespace prefix prepended to every logical path
    pub key_prefix: Option<String>,
    /// Default `Cache-Control` max-age in seconds for written objects
    pub max_age: u64,
    /// Page size for list calls
    pub max_keys: i32,
    /// Secondary bucket probed on reads when an object is absent from
    /// the primary; used for lazy cross-region migration
    pub fallback: Option<FallbackOptions>,
}

/// Fallback bucket descriptor
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackOptions {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl StorageOptions {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: None,
            region: None,
            access_key: None,
            secret_key: None,
            key_prefix: None,
            max_age: DEFAULT_MAX_AGE,
            max_keys: DEFAULT_MAX_KEYS,
            fallback: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_credentials(
        mut self,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        self.access_key = Some(access_key.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_max_age(mut self, max_age: u64) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = max_keys;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackOptions) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Build options from `S3_*` environment variables.
    ///
    /// `S3_BUCKET` is required; everything else is optional.
    pub fn from_env() -> Result<Self, env::VarError> {
        let mut options = StorageOptions::new(env::var("S3_BUCKET")?);

        options.endpoint = env::var("S3_ENDPOINT").ok();
        options.region = env::var("S3_REGION").ok();
        options.access_key = env::var("S3_ACCESS_KEY").ok();
        options.secret_key = env::var("S3_SECRET_KEY").ok();
        options.key_prefix = env::var("S3_KEY_PREFIX").ok();

        if let Ok(max_age) = env::var("S3_MAX_AGE") {
            options.max_age = max_age.parse().unwrap_or(DEFAULT_MAX_AGE);
        }
        if let Ok(max_keys) = env::var("S3_MAX_KEYS") {
            options.max_keys = max_keys.parse().unwrap_or(DEFAULT_MAX_KEYS);
        }

        if let Ok(bucket) = env::var("S3_FALLBACK_BUCKET") {
            options.fallback = Some(FallbackOptions {
                bucket,
                region: env::var("S3_FALLBACK_REGION").ok(),
                endpoint: env::var("S3_FALLBACK_ENDPOINT").ok(),
            });
        }

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = StorageOptions::new("assets");
        assert_eq!(options.bucket, "assets");
        assert_eq!(options.max_age, DEFAULT_MAX_AGE);
        assert_eq!(options.max_keys, 1000);
        assert!(options.key_prefix.is_none());
        assert!(options.fallback.is_none());
    }

    #[test]
    fn builder_chain() {
        let options = StorageOptions::new("assets")
            .with_endpoint("http://localhost:9000")
            .with_credentials("admin", "password123")
            .with_key_prefix("deployments")
            .with_max_keys(2)
            .with_fallback(FallbackOptions {
                bucket: "assets-us-west".to_string(),
                region: Some("us-west-2".to_string()),
                endpoint: None,
            });

        assert_eq!(options.key_prefix.as_deref(), Some("deployments"));
        assert_eq!(options.max_keys, 2);
        assert_eq!(options.fallback.unwrap().bucket, "assets-us-west");
    }
}
