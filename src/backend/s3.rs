//! S3-compatible backend
//!
//! Wraps the AWS SDK for use against AWS S3 and S3-compatible services
//! (MinIO, Cloudflare R2, Backblaze B2).

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::ProvideErrorMetadata,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl},
    Client,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::config::{FallbackOptions, StorageOptions};
use crate::error::{Result, StorageError};
use crate::storage::types::ObjectMetadata;

use super::{GetResponse, ListPage, ObjectBackend, PutRequest, UploadRequest};

/// Part size for streaming multipart uploads (the S3 minimum).
const MULTIPART_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// S3 backend bound to a single bucket
#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    /// Connect to the primary bucket.
    pub async fn connect(options: &StorageOptions) -> Result<Self> {
        Self::connect_bucket(
            &options.bucket,
            options.region.as_deref(),
            options.endpoint.as_deref(),
            options,
        )
        .await
    }

    /// Connect to the configured fallback bucket. Credentials are shared
    /// with the primary; region and endpoint may differ.
    pub async fn connect_fallback(
        options: &StorageOptions,
        fallback: &FallbackOptions,
    ) -> Result<Self> {
        Self::connect_bucket(
            &fallback.bucket,
            fallback.region.as_deref().or(options.region.as_deref()),
            fallback.endpoint.as_deref(),
            options,
        )
        .await
    }

    async fn connect_bucket(
        bucket: &str,
        region: Option<&str>,
        endpoint: Option<&str>,
        options: &StorageOptions,
    ) -> Result<Self> {
        let region = region.unwrap_or("us-east-1").to_string();

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .force_path_style(true); // Required for MinIO and other S3-compatible services

        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        match (&options.access_key, &options.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "s3-storage");
                builder = builder.credentials_provider(credentials);
            }
            _ => {
                // No static credentials configured; use the ambient chain
                // (environment, profile, instance metadata).
                let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
                if let Some(provider) = shared.credentials_provider() {
                    builder = builder.credentials_provider(provider);
                }
            }
        }

        let client = Client::from_conf(builder.build());

        // Verify the bucket is reachable, but do not refuse to start:
        // some deployments scope credentials to object operations only.
        match client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                tracing::info!("connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self {
            client,
            bucket: bucket.to_string(),
        })
    }

    /// Bucket this backend is bound to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put(&self, request: PutRequest) -> Result<()> {
        tracing::debug!(
            "S3 PUT {} ({} bytes, encoding {:?})",
            request.key,
            request.content_length,
            request.content_encoding
        );

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&request.key)
            .body(ByteStream::from(request.body))
            .content_type(&request.content_type)
            .cache_control(&request.cache_control)
            .acl(ObjectCannedAcl::PublicRead)
            .content_length(request.content_length)
            .set_content_encoding(request.content_encoding.clone())
            .send()
            .await
            .map_err(|e| map_service_error("put object", &request.key, e.into_service_error()))?;

        Ok(())
    }

    async fn upload(&self, request: UploadRequest) -> Result<()> {
        tracing::debug!(
            "S3 multipart upload {} (encoding {:?})",
            request.key,
            request.content_encoding
        );

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&request.key)
            .content_type(&request.content_type)
            .cache_control(&request.cache_control)
            .acl(ObjectCannedAcl::PublicRead)
            .set_content_encoding(request.content_encoding.clone())
            .send()
            .await
            .map_err(|e| {
                map_service_error("start upload of", &request.key, e.into_service_error())
            })?;

        let upload_id = created.upload_id.ok_or_else(|| {
            StorageError::Backend(format!("no upload id returned for {}", request.key))
        })?;

        match self.upload_parts(&request.key, &upload_id, request.body).await {
            Ok(parts) => {
                let completed = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&request.key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed)
                    .send()
                    .await
                    .map_err(|e| {
                        map_service_error("complete upload of", &request.key, e.into_service_error())
                    })?;
                Ok(())
            }
            Err(err) => {
                // Leave no orphaned parts behind; the original error is
                // what the caller needs to see.
                let _ = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&request.key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                Err(err)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<GetResponse> {
        tracing::debug!("S3 GET {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    map_service_error("get object", key, service_error)
                }
            })?;

        let metadata = response_metadata(
            response.content_type.as_deref(),
            response.content_length,
            response.cache_control.as_deref(),
            response.content_encoding.as_deref(),
            response.e_tag.as_deref(),
            response
                .last_modified
                .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
            response.metadata.as_ref(),
        );

        let key_owned = key.to_string();
        let body = futures::stream::try_unfold(response.body, move |mut body| {
            let key = key_owned.clone();
            async move {
                match body.try_next().await {
                    Ok(Some(chunk)) => Ok(Some((chunk, body))),
                    Ok(None) => Ok(None),
                    Err(e) => Err(StorageError::Backend(format!(
                        "failed reading body of {}: {}",
                        key, e
                    ))),
                }
            }
        })
        .boxed();

        Ok(GetResponse { metadata, body })
    }

    async fn head(&self, key: &str) -> Result<ObjectMetadata> {
        tracing::debug!("S3 HEAD {}", key);

        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    StorageError::ObjectNotFound(key.to_string())
                } else {
                    map_service_error("head object", key, service_error)
                }
            })?;

        Ok(response_metadata(
            response.content_type.as_deref(),
            response.content_length,
            response.cache_control.as_deref(),
            response.content_encoding.as_deref(),
            response.e_tag.as_deref(),
            response
                .last_modified
                .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())),
            response.metadata.as_ref(),
        ))
    }

    async fn list_page(
        &self,
        prefix: &str,
        max_keys: i32,
        start_after: Option<String>,
    ) -> Result<ListPage> {
        tracing::debug!("S3 LIST {} (after {:?})", prefix, start_after);

        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .set_start_after(start_after)
            .send()
            .await
            .map_err(|e| map_service_error("list prefix", prefix, e.into_service_error()))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(|k| k.to_string()))
            .collect();

        Ok(ListPage {
            keys,
            truncated: response.is_truncated().unwrap_or(false),
        })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tracing::debug!("S3 DELETE {}", key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_service_error("delete object", key, e.into_service_error()))?;

        Ok(())
    }
}

impl S3Backend {
    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut body: crate::storage::types::ContentStream,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
            while buffer.len() >= MULTIPART_CHUNK_SIZE {
                let part_data: Vec<u8> = buffer.drain(..MULTIPART_CHUNK_SIZE).collect();
                parts.push(self.upload_part(key, upload_id, part_number, part_data).await?);
                part_number += 1;
            }
        }

        // S3 rejects a complete call with zero parts, so the final part
        // is sent even when empty.
        if !buffer.is_empty() || parts.is_empty() {
            let part_data = std::mem::take(&mut buffer);
            parts.push(self.upload_part(key, upload_id, part_number, part_data).await?);
        }

        Ok(parts)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
    ) -> Result<CompletedPart> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                map_service_error(
                    &format!("upload part {} of", part_number),
                    key,
                    e.into_service_error(),
                )
            })?;

        Ok(CompletedPart::builder()
            .set_e_tag(response.e_tag)
            .part_number(part_number)
            .build())
    }
}

/// Map a non-not-found service error onto the crate taxonomy.
///
/// Access-denied answers get their own variant so callers can tell a
/// permissions problem from a transient service failure; everything else
/// is a generic backend error.
fn map_service_error<E>(action: &str, subject: &str, err: E) -> StorageError
where
    E: ProvideErrorMetadata + std::fmt::Display,
{
    if err.code() == Some("AccessDenied") {
        StorageError::AccessDenied(subject.to_string())
    } else {
        StorageError::Backend(format!("failed to {} {}: {}", action, subject, err))
    }
}

fn response_metadata(
    content_type: Option<&str>,
    content_length: Option<i64>,
    cache_control: Option<&str>,
    content_encoding: Option<&str>,
    e_tag: Option<&str>,
    last_modified: Option<DateTime<Utc>>,
    custom: Option<&HashMap<String, String>>,
) -> ObjectMetadata {
    let mut metadata = ObjectMetadata::new();

    if let Some(content_type) = content_type {
        metadata.insert("content-type", content_type);
    }
    if let Some(content_length) = content_length {
        metadata.insert("content-length", content_length.to_string());
    }
    if let Some(cache_control) = cache_control {
        metadata.insert("cache-control", cache_control);
    }
    if let Some(content_encoding) = content_encoding {
        metadata.insert("content-encoding", content_encoding);
    }
    if let Some(e_tag) = e_tag {
        metadata.insert("etag", e_tag);
    }
    if let Some(last_modified) = last_modified {
        metadata.insert("last-modified", last_modified.to_rfc2822());
    }
    if let Some(custom) = custom {
        for (name, value) in custom {
            metadata.insert(&format!("x-amz-meta-{}", name), value.clone());
        }
    }

    metadata
}
