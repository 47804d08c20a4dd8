//! In-memory [`ObjectStore`].
//!
//! Keeps object sizes and entity tags (not bodies), so it can stand in for a
//! real bucket in tests and dry runs, including objects far larger than
//! memory. Every request is recorded as a [`StoreCall`]; individual keys or
//! part numbers can be made to fail.

use std::collections::{BTreeMap, BTreeSet};
use std::io::SeekFrom;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bucket_sync_models::{Acl, ObjectParams};
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};

use crate::hash::content_etag;
use crate::store::{
    ByteRange, CompletedPart, DeleteFailure, ListPage, ListedObject, MultipartUpload, ObjectHead,
    ObjectStore, ObjectWrite, StoreError, Tag,
};

/// Default listing page size, matching S3's maximum.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// A request received by a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    ListObjects { bucket: String, prefix: String },
    HeadObject { key: String },
    PutObject { key: String },
    CreateMultipartUpload { key: String },
    UploadPart { key: String, part_number: i32 },
    UploadPartCopy { key: String, part_number: i32, range: ByteRange },
    CompleteMultipartUpload { key: String, parts: usize },
    AbortMultipartUpload { key: String },
    CopyObject { key: String },
    DeleteObjects { keys: Vec<String> },
    GetBucketTagging { bucket: String },
    PutBucketTagging { bucket: String, tags: Vec<Tag> },
}

/// What the store knows about one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Size in bytes.
    pub size: u64,
    /// Quoted entity tag; composite (`"<hex>-<parts>"`) after a multipart upload.
    pub e_tag: String,
    /// Canned ACL from the last write.
    pub acl: Acl,
    /// Content type from the last write, if written through the store.
    pub content_type: Option<String>,
    /// Params from the last write.
    pub params: ObjectParams,
}

#[derive(Debug)]
struct PendingUpload {
    write: ObjectWrite,
    parts: BTreeMap<i32, StoredPart>,
}

#[derive(Debug)]
struct StoredPart {
    size: u64,
    e_tag: String,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(String, String), StoredObject>,
    uploads: BTreeMap<String, PendingUpload>,
    next_upload_id: u64,
    tags: BTreeMap<String, Vec<Tag>>,
    calls: Vec<StoreCall>,
    failing_writes: BTreeSet<String>,
    refused_deletes: BTreeSet<String>,
    failing_parts: BTreeSet<i32>,
    failing_tagging: bool,
}

/// An [`ObjectStore`] backed by process memory.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Caps listing pages at `page_size` objects (minimum 1).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Stores an object with the given contents, as a simple put would.
    pub fn insert(&self, bucket: &str, key: &str, contents: &[u8]) {
        let e_tag = format!("\"{:x}\"", md5::compute(contents));
        self.insert_object(bucket, key, contents.len() as u64, e_tag);
    }

    /// Stores an object of `size` bytes with an arbitrary entity tag.
    pub fn insert_sized(&self, bucket: &str, key: &str, size: u64, e_tag: &str) {
        self.insert_object(bucket, key, size, e_tag.to_string());
    }

    fn insert_object(&self, bucket: &str, key: &str, size: u64, e_tag: String) {
        self.with_state(|state| {
            state.objects.insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    size,
                    e_tag,
                    acl: Acl::default(),
                    content_type: None,
                    params: ObjectParams::new(),
                },
            );
        });
    }

    /// Returns a snapshot of one object.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.with_state(|state| {
            state
                .objects
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
        })
    }

    /// All keys in `bucket`, sorted.
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.with_state(|state| {
            state
                .objects
                .keys()
                .filter(|(b, _)| b == bucket)
                .map(|(_, key)| key.clone())
                .collect()
        })
    }

    /// Replaces the bucket's tag set.
    pub fn set_tags(&self, bucket: &str, tags: Vec<Tag>) {
        self.with_state(|state| {
            state.tags.insert(bucket.to_string(), tags);
        });
    }

    /// The bucket's tag set; `None` if it was never tagged.
    #[must_use]
    pub fn tags(&self, bucket: &str) -> Option<Vec<Tag>> {
        self.with_state(|state| state.tags.get(bucket).cloned())
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.with_state(|state| state.calls.clone())
    }

    /// Number of recorded requests satisfying `predicate`.
    #[must_use]
    pub fn count_calls(&self, predicate: impl Fn(&StoreCall) -> bool) -> usize {
        self.with_state(|state| state.calls.iter().filter(|call| predicate(call)).count())
    }

    /// Forgets the recorded requests.
    pub fn clear_calls(&self) {
        self.with_state(|state| state.calls.clear());
    }

    /// Multipart uploads created but neither completed nor aborted.
    #[must_use]
    pub fn pending_uploads(&self) -> usize {
        self.with_state(|state| state.uploads.len())
    }

    /// Makes puts, multipart creates and copies targeting `key` fail.
    pub fn fail_writes_to(&self, key: &str) {
        self.with_state(|state| {
            state.failing_writes.insert(key.to_string());
        });
    }

    /// Makes batch deletes report `key` as not deleted.
    pub fn refuse_delete_of(&self, key: &str) {
        self.with_state(|state| {
            state.refused_deletes.insert(key.to_string());
        });
    }

    /// Makes part uploads and part copies numbered `part_number` fail.
    pub fn fail_part(&self, part_number: i32) {
        self.with_state(|state| {
            state.failing_parts.insert(part_number);
        });
    }

    /// Makes tag reads fail with a request error.
    pub fn fail_tagging(&self) {
        self.with_state(|state| state.failing_tagging = true);
    }

    fn record(&self, call: StoreCall) {
        self.with_state(|state| state.calls.push(call));
    }

    fn check_write(&self, operation: &'static str, bucket: &str, key: &str) -> Result<(), StoreError> {
        if self.with_state(|state| state.failing_writes.contains(key)) {
            return Err(StoreError::request(operation, bucket, key, "injected failure"));
        }
        Ok(())
    }

    fn check_part(
        &self,
        operation: &'static str,
        upload: &MultipartUpload,
        part_number: i32,
    ) -> Result<(), StoreError> {
        let (known, failing) = self.with_state(|state| {
            (
                state.uploads.contains_key(&upload.upload_id),
                state.failing_parts.contains(&part_number),
            )
        });
        if !known {
            return Err(StoreError::request(
                operation,
                &upload.bucket,
                &upload.key,
                format!("no such upload {}", upload.upload_id),
            ));
        }
        if failing {
            return Err(StoreError::request(
                operation,
                &upload.bucket,
                &upload.key,
                format!("injected failure for part {part_number}"),
            ));
        }
        Ok(())
    }

    fn store_part(&self, upload: &MultipartUpload, part_number: i32, size: u64, e_tag: &str) {
        self.with_state(|state| {
            if let Some(pending) = state.uploads.get_mut(&upload.upload_id) {
                pending.parts.insert(
                    part_number,
                    StoredPart {
                        size,
                        e_tag: e_tag.to_string(),
                    },
                );
            }
        });
    }
}

async fn read_range(path: &Path, range: ByteRange) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let len = usize::try_from(range.byte_count()).map_err(std::io::Error::other)?;
    let mut buffer = vec![0u8; len];
    file.read_exact(&mut buffer).await?;
    Ok(buffer)
}

fn write_object(write: &ObjectWrite, size: u64, e_tag: String) -> StoredObject {
    StoredObject {
        size,
        e_tag,
        acl: write.acl,
        content_type: Some(write.content_type.clone()),
        params: write.params.clone(),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StoreError> {
        self.record(StoreCall::ListObjects {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        });

        self.with_state(|state| {
            let mut matching = state
                .objects
                .iter()
                .filter(|((b, key), _)| {
                    b == bucket
                        && key.starts_with(prefix)
                        && continuation_token
                            .as_deref()
                            .is_none_or(|after| key.as_str() > after)
                })
                .map(|((_, key), object)| ListedObject {
                    key: Some(key.clone()),
                    e_tag: Some(object.e_tag.clone()),
                    size: object.size,
                });

            let objects: Vec<ListedObject> = matching.by_ref().take(self.page_size).collect();
            let next_continuation_token = if matching.next().is_some() {
                objects.last().and_then(|object| object.key.clone())
            } else {
                None
            };

            Ok(ListPage {
                objects,
                next_continuation_token,
            })
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        self.record(StoreCall::HeadObject {
            key: key.to_string(),
        });
        Ok(self.object(bucket, key).map(|object| ObjectHead {
            size: object.size,
            e_tag: Some(object.e_tag),
        }))
    }

    async fn put_object(&self, write: &ObjectWrite, body: &Path) -> Result<(), StoreError> {
        self.record(StoreCall::PutObject {
            key: write.key.clone(),
        });
        self.check_write("PutObject", &write.bucket, &write.key)?;

        let size = tokio::fs::metadata(body)
            .await
            .map_err(|e| StoreError::request("PutObject", &write.bucket, &write.key, e))?
            .len();
        let e_tag = content_etag(body)
            .await
            .map_err(|e| StoreError::request("PutObject", &write.bucket, &write.key, e))?;

        self.with_state(|state| {
            state.objects.insert(
                (write.bucket.clone(), write.key.clone()),
                write_object(write, size, e_tag),
            );
        });
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        write: &ObjectWrite,
    ) -> Result<MultipartUpload, StoreError> {
        self.record(StoreCall::CreateMultipartUpload {
            key: write.key.clone(),
        });
        self.check_write("CreateMultipartUpload", &write.bucket, &write.key)?;

        let upload_id = self.with_state(|state| {
            state.next_upload_id += 1;
            let upload_id = format!("upload-{}", state.next_upload_id);
            state.uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    write: write.clone(),
                    parts: BTreeMap::new(),
                },
            );
            upload_id
        });

        Ok(MultipartUpload {
            bucket: write.bucket.clone(),
            key: write.key.clone(),
            upload_id,
        })
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: &Path,
        range: ByteRange,
    ) -> Result<CompletedPart, StoreError> {
        self.record(StoreCall::UploadPart {
            key: upload.key.clone(),
            part_number,
        });
        self.check_part("UploadPart", upload, part_number)?;

        let bytes = read_range(body, range)
            .await
            .map_err(|e| StoreError::request("UploadPart", &upload.bucket, &upload.key, e))?;
        let e_tag = format!("\"{:x}\"", md5::compute(&bytes));
        self.store_part(upload, part_number, range.byte_count(), &e_tag);

        Ok(CompletedPart { part_number, e_tag })
    }

    async fn upload_part_copy(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        range: ByteRange,
    ) -> Result<CompletedPart, StoreError> {
        self.record(StoreCall::UploadPartCopy {
            key: upload.key.clone(),
            part_number,
            range,
        });
        self.check_part("UploadPartCopy", upload, part_number)?;

        let source = self.object(&upload.bucket, &upload.key).ok_or_else(|| {
            StoreError::request("UploadPartCopy", &upload.bucket, &upload.key, "no such key")
        })?;
        if range.end >= source.size {
            return Err(StoreError::request(
                "UploadPartCopy",
                &upload.bucket,
                &upload.key,
                format!("range {range} outside object of {} bytes", source.size),
            ));
        }

        let e_tag = format!(
            "\"{:x}\"",
            md5::compute(format!("{}:{range}", source.e_tag))
        );
        self.store_part(upload, part_number, range.byte_count(), &e_tag);

        Ok(CompletedPart { part_number, e_tag })
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        self.record(StoreCall::CompleteMultipartUpload {
            key: upload.key.clone(),
            parts: parts.len(),
        });

        self.with_state(|state| {
            let pending = state.uploads.remove(&upload.upload_id).ok_or_else(|| {
                StoreError::request(
                    "CompleteMultipartUpload",
                    &upload.bucket,
                    &upload.key,
                    format!("no such upload {}", upload.upload_id),
                )
            })?;

            let mut size = 0;
            let mut digest_input = String::new();
            for part in parts {
                let stored = pending
                    .parts
                    .get(&part.part_number)
                    .filter(|stored| stored.e_tag == part.e_tag)
                    .ok_or_else(|| {
                        StoreError::request(
                            "CompleteMultipartUpload",
                            &upload.bucket,
                            &upload.key,
                            format!("invalid part {}", part.part_number),
                        )
                    })?;
                size += stored.size;
                digest_input.push_str(&stored.e_tag);
            }

            let e_tag = format!("\"{:x}-{}\"", md5::compute(digest_input), parts.len());
            state.objects.insert(
                (upload.bucket.clone(), upload.key.clone()),
                write_object(&pending.write, size, e_tag),
            );
            Ok(())
        })
    }

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<(), StoreError> {
        self.record(StoreCall::AbortMultipartUpload {
            key: upload.key.clone(),
        });
        self.with_state(|state| {
            state.uploads.remove(&upload.upload_id);
        });
        Ok(())
    }

    async fn copy_object(&self, write: &ObjectWrite) -> Result<(), StoreError> {
        self.record(StoreCall::CopyObject {
            key: write.key.clone(),
        });
        self.check_write("CopyObject", &write.bucket, &write.key)?;

        self.with_state(|state| {
            let object = state
                .objects
                .get_mut(&(write.bucket.clone(), write.key.clone()))
                .ok_or_else(|| {
                    StoreError::request("CopyObject", &write.bucket, &write.key, "no such key")
                })?;
            *object = write_object(write, object.size, object.e_tag.clone());
            Ok(())
        })
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Result<Vec<DeleteFailure>, StoreError> {
        self.record(StoreCall::DeleteObjects {
            keys: keys.to_vec(),
        });

        self.with_state(|state| {
            let mut failures = Vec::new();
            for key in keys {
                if state.refused_deletes.contains(key) {
                    failures.push(DeleteFailure {
                        key: key.clone(),
                        code: Some("AccessDenied".to_string()),
                        message: Some("Access Denied".to_string()),
                    });
                } else {
                    state.objects.remove(&(bucket.to_string(), key.clone()));
                }
            }
            Ok(failures)
        })
    }

    async fn get_bucket_tagging(&self, bucket: &str) -> Result<Vec<Tag>, StoreError> {
        self.record(StoreCall::GetBucketTagging {
            bucket: bucket.to_string(),
        });

        self.with_state(|state| {
            if state.failing_tagging {
                return Err(StoreError::request(
                    "GetBucketTagging",
                    bucket,
                    "",
                    "injected failure",
                ));
            }
            state
                .tags
                .get(bucket)
                .cloned()
                .ok_or_else(|| StoreError::NoSuchTagSet {
                    bucket: bucket.to_string(),
                })
        })
    }

    async fn put_bucket_tagging(&self, bucket: &str, tags: &[Tag]) -> Result<(), StoreError> {
        self.record(StoreCall::PutBucketTagging {
            bucket: bucket.to_string(),
            tags: tags.to_vec(),
        });
        self.set_tags(bucket, tags.to_vec());
        Ok(())
    }
}
