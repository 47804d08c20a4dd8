//! Single-request vs multipart orchestration for uploads and in-place copies.
//!
//! A multipart transfer that fails at any step is aborted before the error
//! is returned, so no incomplete upload is left accruing storage.

use std::path::Path;

use crate::SyncError;
use crate::store::{ByteRange, CompletedPart, MultipartUpload, ObjectStore, ObjectWrite};

const MIB: u64 = 1024 * 1024;

/// Objects at or above this size are copied in ranges (single-copy limit).
pub const MULTIPART_COPY_THRESHOLD: u64 = 5 * 1024 * MIB;

/// Range size for multipart copies.
pub const COPY_PART_SIZE: u64 = 500 * MIB;

/// Largest file sent as one streamed put (the single-request object limit).
/// Only larger files are uploaded in parts, so everything up to this size
/// keeps a plain MD5 entity tag that later runs can compare against.
pub const MAX_SINGLE_UPLOAD_SIZE: u64 = 5 * 1024 * MIB;

/// Smallest part size used for multipart uploads.
pub const MIN_UPLOAD_PART_SIZE: u64 = 16 * MIB;

/// Maximum number of parts in one multipart upload.
pub const MAX_PARTS: u64 = 10_000;

/// How an object was transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    /// One put or copy request.
    Single,
    /// A completed multipart upload.
    Multipart {
        /// Number of parts.
        parts: usize,
    },
}

/// Partitions `size` bytes into consecutive inclusive ranges of `part_size`
/// bytes, the last one truncated to what remains.
#[must_use]
pub fn part_ranges(size: u64, part_size: u64) -> Vec<ByteRange> {
    let part_size = part_size.max(1);
    (0..size.div_ceil(part_size))
        .map(|index| {
            let start = index * part_size;
            ByteRange {
                start,
                end: (start + part_size).min(size) - 1,
            }
        })
        .collect()
}

/// Part size for a multipart upload of `size` bytes: [`MIN_UPLOAD_PART_SIZE`],
/// grown as needed to stay within [`MAX_PARTS`].
#[must_use]
pub const fn upload_part_size(size: u64) -> u64 {
    grow_to_part_limit(size, MIN_UPLOAD_PART_SIZE)
}

/// Range size for a multipart copy of `size` bytes: [`COPY_PART_SIZE`],
/// grown as needed to stay within [`MAX_PARTS`].
#[must_use]
pub const fn copy_part_size(size: u64) -> u64 {
    grow_to_part_limit(size, COPY_PART_SIZE)
}

const fn grow_to_part_limit(size: u64, part_size: u64) -> u64 {
    let needed = size.div_ceil(MAX_PARTS);
    if needed > part_size { needed } else { part_size }
}

fn part_number(index: usize) -> i32 {
    i32::try_from(index + 1).unwrap_or(i32::MAX)
}

/// Rewrites an existing object's metadata by copying it onto itself.
///
/// Objects below [`MULTIPART_COPY_THRESHOLD`] take one copy request; larger
/// ones are re-assembled from sequential range copies.
///
/// # Errors
///
/// Returns [`SyncError::Store`] with the first failing request's error. A
/// multipart copy is aborted first.
pub async fn copy_in_place(
    store: &dyn ObjectStore,
    write: &ObjectWrite,
    size: u64,
) -> Result<TransferMethod, SyncError> {
    if size < MULTIPART_COPY_THRESHOLD {
        store.copy_object(write).await?;
        return Ok(TransferMethod::Single);
    }

    let ranges = part_ranges(size, copy_part_size(size));
    log::debug!(
        "Copying s3://{}/{} in {} part(s)",
        write.bucket,
        write.key,
        ranges.len()
    );

    let upload = store.create_multipart_upload(write).await?;
    let result = async {
        let mut parts = Vec::with_capacity(ranges.len());
        for (index, range) in ranges.iter().enumerate() {
            parts.push(
                store
                    .upload_part_copy(&upload, part_number(index), *range)
                    .await?,
            );
        }
        complete(store, &upload, &parts).await
    }
    .await;

    abort_on_error(store, &upload, result).await
}

/// Uploads a local file of `size` bytes, in parts only above
/// [`MAX_SINGLE_UPLOAD_SIZE`].
///
/// # Errors
///
/// Returns [`SyncError::Store`] with the first failing request's error. A
/// multipart upload is aborted first.
pub async fn upload_file(
    store: &dyn ObjectStore,
    write: &ObjectWrite,
    path: &Path,
    size: u64,
) -> Result<TransferMethod, SyncError> {
    if size <= MAX_SINGLE_UPLOAD_SIZE {
        store.put_object(write, path).await?;
        return Ok(TransferMethod::Single);
    }
    upload_multipart(store, write, path, size, upload_part_size(size)).await
}

pub(crate) async fn upload_multipart(
    store: &dyn ObjectStore,
    write: &ObjectWrite,
    path: &Path,
    size: u64,
    part_size: u64,
) -> Result<TransferMethod, SyncError> {
    let ranges = part_ranges(size, part_size);
    log::debug!(
        "Uploading {} to s3://{}/{} in {} part(s)",
        path.display(),
        write.bucket,
        write.key,
        ranges.len()
    );

    let upload = store.create_multipart_upload(write).await?;
    let result = async {
        let mut parts = Vec::with_capacity(ranges.len());
        for (index, range) in ranges.iter().enumerate() {
            parts.push(
                store
                    .upload_part(&upload, part_number(index), path, *range)
                    .await?,
            );
        }
        complete(store, &upload, &parts).await
    }
    .await;

    abort_on_error(store, &upload, result).await
}

async fn complete(
    store: &dyn ObjectStore,
    upload: &MultipartUpload,
    parts: &[CompletedPart],
) -> Result<TransferMethod, SyncError> {
    store.complete_multipart_upload(upload, parts).await?;
    Ok(TransferMethod::Multipart { parts: parts.len() })
}

async fn abort_on_error<T>(
    store: &dyn ObjectStore,
    upload: &MultipartUpload,
    result: Result<T, SyncError>,
) -> Result<T, SyncError> {
    if let Err(e) = &result {
        log::warn!(
            "Aborting multipart upload {} for s3://{}/{}: {e}",
            upload.upload_id,
            upload.bucket,
            upload.key
        );
        if let Err(abort_error) = store.abort_multipart_upload(upload).await {
            log::error!(
                "Failed to abort multipart upload {} for s3://{}/{}: {abort_error}",
                upload.upload_id,
                upload.bucket,
                upload.key
            );
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use bucket_sync_models::{Acl, ObjectParams};

    use super::*;
    use crate::memory::{MemoryStore, StoreCall};
    use crate::test_support::TempDir;

    fn write(key: &str) -> ObjectWrite {
        ObjectWrite {
            bucket: "bucket".to_string(),
            key: key.to_string(),
            acl: Acl::PublicRead,
            content_type: "application/octet-stream".to_string(),
            params: ObjectParams::new(),
        }
    }

    fn copied_ranges(store: &MemoryStore) -> Vec<ByteRange> {
        store
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::UploadPartCopy { range, .. } => Some(range),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn partitions_with_truncated_last_range() {
        assert_eq!(
            part_ranges(10, 4),
            vec![
                ByteRange { start: 0, end: 3 },
                ByteRange { start: 4, end: 7 },
                ByteRange { start: 8, end: 9 },
            ]
        );
        assert_eq!(part_ranges(8, 4).len(), 2);
        assert!(part_ranges(0, 4).is_empty());
    }

    #[test]
    fn part_sizes_grow_to_respect_the_part_limit() {
        assert_eq!(upload_part_size(100 * MIB), MIN_UPLOAD_PART_SIZE);
        let huge = 1024 * 1024 * MIB;
        assert!(part_ranges(huge, upload_part_size(huge)).len() as u64 <= MAX_PARTS);
        let largest_object = 5 * 1024 * 1024 * MIB;
        assert!(part_ranges(largest_object, copy_part_size(largest_object)).len() as u64 <= MAX_PARTS);
    }

    #[tokio::test]
    async fn copy_below_threshold_is_a_single_request() {
        let store = MemoryStore::new();
        let size = MULTIPART_COPY_THRESHOLD - 1;
        store.insert_sized("bucket", "big.bin", size, "\"abc\"");

        let method = copy_in_place(&store, &write("big.bin"), size).await.unwrap();

        assert_eq!(method, TransferMethod::Single);
        assert_eq!(
            store.count_calls(|call| matches!(call, StoreCall::CopyObject { .. })),
            1
        );
        assert_eq!(
            store.count_calls(|call| matches!(call, StoreCall::CreateMultipartUpload { .. })),
            0
        );
    }

    #[tokio::test]
    async fn copy_at_threshold_uses_sequential_ranges() {
        let store = MemoryStore::new();
        let size = MULTIPART_COPY_THRESHOLD;
        store.insert_sized("bucket", "big.bin", size, "\"abc\"");

        let method = copy_in_place(&store, &write("big.bin"), size).await.unwrap();

        assert_eq!(method, TransferMethod::Multipart { parts: 11 });
        let ranges = copied_ranges(&store);
        assert_eq!(ranges.len(), 11);
        assert_eq!(ranges[0], ByteRange { start: 0, end: COPY_PART_SIZE - 1 });
        let last = ranges[10];
        assert_eq!(last.start, 10 * COPY_PART_SIZE);
        assert_eq!(last.end, size - 1);
        assert_eq!(last.byte_count(), 120 * MIB);

        let part_numbers: Vec<i32> = store
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::UploadPartCopy { part_number, .. } => Some(part_number),
                _ => None,
            })
            .collect();
        assert_eq!(part_numbers, (1..=11).collect::<Vec<_>>());

        let object = store.object("bucket", "big.bin").unwrap();
        assert_eq!(object.size, size);
        assert!(object.e_tag.ends_with("-11\""));
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn failed_range_copy_aborts_and_returns_the_part_error() {
        let store = MemoryStore::new();
        let size = MULTIPART_COPY_THRESHOLD;
        store.insert_sized("bucket", "big.bin", size, "\"abc\"");
        store.fail_part(3);

        let result = copy_in_place(&store, &write("big.bin"), size).await;

        assert!(matches!(result, Err(SyncError::Store(_))));
        assert_eq!(copied_ranges(&store).len(), 3);
        assert_eq!(
            store.count_calls(|call| matches!(call, StoreCall::AbortMultipartUpload { .. })),
            1
        );
        assert_eq!(
            store.count_calls(|call| matches!(call, StoreCall::CompleteMultipartUpload { .. })),
            0
        );
        assert_eq!(store.pending_uploads(), 0);
        assert_eq!(store.object("bucket", "big.bin").unwrap().e_tag, "\"abc\"");
    }

    #[tokio::test]
    async fn small_file_is_put_in_one_request() {
        let dir = TempDir::new("transfer_small");
        let path = dir.write("a.txt", b"hello");
        let store = MemoryStore::new();

        let method = upload_file(&store, &write("a.txt"), &path, 5).await.unwrap();

        assert_eq!(method, TransferMethod::Single);
        assert_eq!(
            store.object("bucket", "a.txt").unwrap().e_tag,
            "\"5d41402abc4b2a76b9719d911017c592\""
        );
    }

    #[tokio::test]
    async fn files_up_to_the_single_put_limit_take_one_request() {
        let dir = TempDir::new("transfer_limit");
        let path = dir.write("big.bin", b"stand-in body");
        let store = MemoryStore::new();

        let method = upload_file(&store, &write("big.bin"), &path, MAX_SINGLE_UPLOAD_SIZE)
            .await
            .unwrap();

        assert_eq!(method, TransferMethod::Single);
        assert_eq!(
            store.count_calls(|call| matches!(call, StoreCall::PutObject { .. })),
            1
        );
        assert_eq!(
            store.count_calls(|call| matches!(call, StoreCall::CreateMultipartUpload { .. })),
            0
        );
        assert!(!store.object("bucket", "big.bin").unwrap().e_tag.contains('-'));
    }

    #[tokio::test]
    async fn multipart_upload_sends_every_part() {
        let dir = TempDir::new("transfer_parts");
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let path = dir.write("data.bin", &data);
        let store = MemoryStore::new();

        let method = upload_multipart(&store, &write("data.bin"), &path, 1000, 300)
            .await
            .unwrap();

        assert_eq!(method, TransferMethod::Multipart { parts: 4 });
        let object = store.object("bucket", "data.bin").unwrap();
        assert_eq!(object.size, 1000);
        assert!(object.e_tag.ends_with("-4\""));
    }

    #[tokio::test]
    async fn failed_part_upload_is_aborted() {
        let dir = TempDir::new("transfer_abort");
        let path = dir.write("data.bin", &[1u8; 1000]);
        let store = MemoryStore::new();
        store.fail_part(2);

        let result = upload_multipart(&store, &write("data.bin"), &path, 1000, 300).await;

        assert!(matches!(result, Err(SyncError::Store(_))));
        assert_eq!(store.pending_uploads(), 0);
        assert!(store.object("bucket", "data.bin").is_none());
    }
}
