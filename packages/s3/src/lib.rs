#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Amazon S3 (and S3-compatible) backend for the `bucket_sync` engine.
//!
//! [`S3Store`] implements [`ObjectStore`] on top of `aws-sdk-s3`.
//! Credentials and region come from the standard AWS provider chain
//! (environment, shared config/credentials files, SSO, instance metadata),
//! optionally overridden by the `[client]` table of the sync configuration.
//!
//! Every request is retried by the SDK in adaptive mode (client-side rate
//! limiting plus exponential backoff), up to [`MAX_ATTEMPTS`] attempts.
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |---|---|
//! | `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` | Static credentials |
//! | `AWS_PROFILE` | Named profile from the shared config files |
//! | `AWS_REGION` | Region, unless `[client] region` is set |
//! | `AWS_ENDPOINT_URL` | Custom endpoint, unless `[client] endpoint` is set |

mod headers;

use std::path::Path;

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::ProvideErrorMetadata as _;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{
    CompletedMultipartUpload, Delete, MetadataDirective, ObjectIdentifier, Tagging,
};
use bucket_sync::store::{
    ByteRange, CompletedPart, DeleteFailure, ListPage, ListedObject, MultipartUpload, ObjectHead,
    ObjectStore, ObjectWrite, StoreError, Tag,
};
use bucket_sync_models::ClientConfig;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

pub use headers::ObjectHeaders;
use headers::with_headers;

/// Maximum attempts per request (initial + retries).
pub const MAX_ATTEMPTS: u32 = 5;

/// Error code S3 returns for a bucket that has never been tagged.
const NO_SUCH_TAG_SET: &str = "NoSuchTagSet";

/// Characters left unescaped in an `x-amz-copy-source` key.
const COPY_SOURCE_KEY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// An [`ObjectStore`] backed by an S3 client.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    /// Builds a client from the standard AWS configuration chain, applying
    /// the region, endpoint and path-style overrides in `config`.
    pub async fn from_config(config: &ClientConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .retry_config(RetryConfig::adaptive().with_max_attempts(MAX_ATTEMPTS));

        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        log::debug!(
            "S3 client ready (region: {}, endpoint: {})",
            sdk_config
                .region()
                .map_or("<default>", |region| region.as_ref()),
            config.endpoint.as_deref().unwrap_or("<default>")
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
        }
    }
}

/// `bucket/key` with the key percent-encoded, as `CopyObject` and
/// `UploadPartCopy` expect.
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE_KEY))
}

fn non_negative(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}

fn missing_e_tag(operation: &'static str, upload: &MultipartUpload) -> StoreError {
    StoreError::request(
        operation,
        &upload.bucket,
        &upload.key,
        "response carried no ETag",
    )
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| StoreError::request("ListObjectsV2", bucket, prefix, e))?;

        let objects = output
            .contents()
            .iter()
            .map(|object| ListedObject {
                key: object.key().map(str::to_string),
                e_tag: object.e_tag().map(str::to_string),
                size: non_negative(object.size()),
            })
            .collect();

        let next_continuation_token = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(String::from)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_continuation_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(output) => Ok(Some(ObjectHead {
                size: non_negative(output.content_length()),
                e_tag: output.e_tag().map(str::to_string),
            })),
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(HeadObjectError::is_not_found)
                {
                    return Ok(None);
                }
                Err(StoreError::request("HeadObject", bucket, key, err))
            }
        }
    }

    async fn put_object(&self, write: &ObjectWrite, body: &Path) -> Result<(), StoreError> {
        let stream = ByteStream::from_path(body)
            .await
            .map_err(|e| StoreError::request("PutObject", &write.bucket, &write.key, e))?;
        let headers = ObjectHeaders::from_write(write);

        with_headers!(
            self.client
                .put_object()
                .bucket(&write.bucket)
                .key(&write.key)
                .body(stream),
            &headers
        )
        .send()
        .await
        .map_err(|e| StoreError::request("PutObject", &write.bucket, &write.key, e))?;

        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        write: &ObjectWrite,
    ) -> Result<MultipartUpload, StoreError> {
        let headers = ObjectHeaders::from_write(write);

        let output = with_headers!(
            self.client
                .create_multipart_upload()
                .bucket(&write.bucket)
                .key(&write.key),
            &headers
        )
        .send()
        .await
        .map_err(|e| {
            StoreError::request("CreateMultipartUpload", &write.bucket, &write.key, e)
        })?;

        let upload_id = output.upload_id().ok_or_else(|| {
            StoreError::request(
                "CreateMultipartUpload",
                &write.bucket,
                &write.key,
                "response carried no upload id",
            )
        })?;

        Ok(MultipartUpload {
            bucket: write.bucket.clone(),
            key: write.key.clone(),
            upload_id: upload_id.to_string(),
        })
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: &Path,
        range: ByteRange,
    ) -> Result<CompletedPart, StoreError> {
        let stream = ByteStream::read_from()
            .path(body)
            .offset(range.start)
            .length(Length::Exact(range.byte_count()))
            .build()
            .await
            .map_err(|e| StoreError::request("UploadPart", &upload.bucket, &upload.key, e))?;

        let output = self
            .client
            .upload_part()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .body(stream)
            .send()
            .await
            .map_err(|e| StoreError::request("UploadPart", &upload.bucket, &upload.key, e))?;

        let e_tag = output
            .e_tag()
            .ok_or_else(|| missing_e_tag("UploadPart", upload))?;

        Ok(CompletedPart {
            part_number,
            e_tag: e_tag.to_string(),
        })
    }

    async fn upload_part_copy(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        range: ByteRange,
    ) -> Result<CompletedPart, StoreError> {
        let output = self
            .client
            .upload_part_copy()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .copy_source(copy_source(&upload.bucket, &upload.key))
            .copy_source_range(range.to_string())
            .send()
            .await
            .map_err(|e| StoreError::request("UploadPartCopy", &upload.bucket, &upload.key, e))?;

        let e_tag = output
            .copy_part_result()
            .and_then(|result| result.e_tag())
            .ok_or_else(|| missing_e_tag("UploadPartCopy", upload))?;

        Ok(CompletedPart {
            part_number,
            e_tag: e_tag.to_string(),
        })
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        let parts = parts
            .iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.e_tag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                StoreError::request("CompleteMultipartUpload", &upload.bucket, &upload.key, e)
            })?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(&upload.bucket)
            .key(&upload.key)
            .upload_id(&upload.upload_id)
            .send()
            .await
            .map_err(|e| {
                StoreError::request("AbortMultipartUpload", &upload.bucket, &upload.key, e)
            })?;

        Ok(())
    }

    async fn copy_object(&self, write: &ObjectWrite) -> Result<(), StoreError> {
        let headers = ObjectHeaders::from_write(write);

        with_headers!(
            self.client
                .copy_object()
                .bucket(&write.bucket)
                .key(&write.key)
                .copy_source(copy_source(&write.bucket, &write.key))
                .metadata_directive(MetadataDirective::Replace),
            &headers
        )
        .send()
        .await
        .map_err(|e| StoreError::request("CopyObject", &write.bucket, &write.key, e))?;

        Ok(())
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Result<Vec<DeleteFailure>, StoreError> {
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::request("DeleteObjects", bucket, "", e))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StoreError::request("DeleteObjects", bucket, "", e))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| StoreError::request("DeleteObjects", bucket, "", e))?;

        Ok(output
            .errors()
            .iter()
            .map(|error| DeleteFailure {
                key: error.key().unwrap_or_default().to_string(),
                code: error.code().map(str::to_string),
                message: error.message().map(str::to_string),
            })
            .collect())
    }

    async fn get_bucket_tagging(&self, bucket: &str) -> Result<Vec<Tag>, StoreError> {
        match self.client.get_bucket_tagging().bucket(bucket).send().await {
            Ok(output) => Ok(output
                .tag_set()
                .iter()
                .map(|tag| Tag::new(tag.key(), tag.value()))
                .collect()),
            Err(err) => {
                if err.as_service_error().and_then(|e| e.code()) == Some(NO_SUCH_TAG_SET) {
                    return Err(StoreError::NoSuchTagSet {
                        bucket: bucket.to_string(),
                    });
                }
                Err(StoreError::request("GetBucketTagging", bucket, "", err))
            }
        }
    }

    async fn put_bucket_tagging(&self, bucket: &str, tags: &[Tag]) -> Result<(), StoreError> {
        let tag_set = tags
            .iter()
            .map(|tag| {
                aws_sdk_s3::types::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::request("PutBucketTagging", bucket, "", e))?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| StoreError::request("PutBucketTagging", bucket, "", e))?;

        self.client
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| StoreError::request("PutBucketTagging", bucket, "", e))?;

        Ok(())
    }
}
