//! The object-store seam.
//!
//! The engine only ever talks to storage through [`ObjectStore`]. Request
//! shapes, authentication and retry policy belong to the implementation
//! (see the `bucket_sync_s3` crate); the engine relies solely on the
//! operations below and their success/error shapes.

use std::path::Path;

use async_trait::async_trait;
use bucket_sync_models::{Acl, ObjectParams};

/// Boxed source error carried by [`StoreError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by an [`ObjectStore`] after its own retries are exhausted.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A store request failed.
    #[error("{operation} failed for s3://{bucket}/{key}: {source}")]
    Request {
        /// Name of the store operation (e.g. `PutObject`).
        operation: &'static str,
        /// Bucket name.
        bucket: String,
        /// Object key or prefix; empty for bucket-level operations.
        key: String,
        /// Underlying client error.
        source: BoxError,
    },

    /// The bucket has no tag set at all.
    #[error("Bucket {bucket} has no tag set")]
    NoSuchTagSet {
        /// Bucket name.
        bucket: String,
    },
}

impl StoreError {
    /// Builds a [`StoreError::Request`].
    pub fn request(
        operation: &'static str,
        bucket: &str,
        key: &str,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Request {
            operation,
            bucket: bucket.to_string(),
            key: key.to_string(),
            source: source.into(),
        }
    }
}

/// Everything needed to write an object: destination plus the headers
/// applied on put, multipart create, or metadata-replacing copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectWrite {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Canned ACL.
    pub acl: Acl,
    /// Resolved content type (never empty).
    pub content_type: String,
    /// Extra params resolved from glob rules, stage key already stripped.
    pub params: ObjectParams,
}

/// One object as reported by a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    /// Object key; stores may in theory omit it.
    pub key: Option<String>,
    /// Entity tag, quoted as returned by the store.
    pub e_tag: Option<String>,
    /// Size in bytes.
    pub size: u64,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Objects on this page.
    pub objects: Vec<ListedObject>,
    /// Token for the next page; `None` when this is the last page.
    pub next_continuation_token: Option<String>,
}

/// Result of a `HeadObject`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    /// Size in bytes.
    pub size: u64,
    /// Entity tag, quoted.
    pub e_tag: Option<String>,
}

/// An in-progress multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    /// Bucket name.
    pub bucket: String,
    /// Destination key.
    pub key: String,
    /// Store-assigned upload id.
    pub upload_id: String,
}

/// An inclusive byte range `start..=end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    #[must_use]
    pub const fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// A finished part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: i32,
    /// Entity tag of the part.
    pub e_tag: String,
}

/// A key the store refused to delete inside a batch delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    /// Object key.
    pub key: String,
    /// Store error code, if any.
    pub code: Option<String>,
    /// Store error message, if any.
    pub message: Option<String>,
}

/// A bucket tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Operations the engine needs from an object store.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// target and every in-flight operation.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches one page of keys under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the listing request fails.
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StoreError>;

    /// Fetches an object's size and entity tag; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for any failure other than "not found".
    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>, StoreError>;

    /// Uploads a whole local file in one streamed request.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the upload fails.
    async fn put_object(&self, write: &ObjectWrite, body: &Path) -> Result<(), StoreError>;

    /// Starts a multipart upload carrying `write`'s headers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the upload cannot be created.
    async fn create_multipart_upload(
        &self,
        write: &ObjectWrite,
    ) -> Result<MultipartUpload, StoreError>;

    /// Uploads `range` of a local file as part `part_number`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the part upload fails.
    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: &Path,
        range: ByteRange,
    ) -> Result<CompletedPart, StoreError>;

    /// Copies `range` of the upload's own destination object (as it exists
    /// before completion) as part `part_number`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the range copy fails.
    async fn upload_part_copy(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        range: ByteRange,
    ) -> Result<CompletedPart, StoreError>;

    /// Assembles the uploaded parts, in the given order, into the object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if completion fails.
    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError>;

    /// Discards an unfinished multipart upload and its stored parts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the abort request fails.
    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<(), StoreError>;

    /// Copies an object onto itself, replacing its metadata with `write`'s.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the copy fails.
    async fn copy_object(&self, write: &ObjectWrite) -> Result<(), StoreError>;

    /// Deletes up to 1000 keys in one request, returning the keys the store
    /// refused.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the request as a whole fails.
    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Result<Vec<DeleteFailure>, StoreError>;

    /// Fetches the bucket's tag set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchTagSet`] if the bucket has no tags, or
    /// [`StoreError::Request`] for other failures.
    async fn get_bucket_tagging(&self, bucket: &str) -> Result<Vec<Tag>, StoreError>;

    /// Replaces the bucket's tag set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the request fails.
    async fn put_bucket_tagging(&self, bucket: &str, tags: &[Tag]) -> Result<(), StoreError>;
}
