//! Fixtures for unit tests: scratch directories, a recording progress sink
//! and a store wrapper that measures write concurrency.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::memory::MemoryStore;
use crate::progress::ProgressCallback;
use crate::store::{
    ByteRange, CompletedPart, DeleteFailure, ListPage, MultipartUpload, ObjectHead, ObjectStore,
    ObjectWrite, StoreError, Tag,
};

/// A uniquely-named directory under the system temp dir, removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("bucket_sync_{name}_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

/// Records every total and position it is given.
#[derive(Default)]
pub struct RecordingProgress {
    totals: Mutex<Vec<u64>>,
    positions: Mutex<Vec<u64>>,
}

impl RecordingProgress {
    pub fn positions(&self) -> Vec<u64> {
        self.positions.lock().unwrap().clone()
    }

    pub fn total(&self) -> Option<u64> {
        self.totals.lock().unwrap().last().copied()
    }
}

impl ProgressCallback for RecordingProgress {
    fn set_total(&self, total: u64) {
        self.totals.lock().unwrap().push(total);
    }

    fn set_position(&self, pos: u64) {
        self.positions.lock().unwrap().push(pos);
    }

    fn set_message(&self, _msg: String) {}

    fn finish_and_clear(&self) {}
}

/// Delegates to a [`MemoryStore`], holding each `put_object` and
/// `copy_object` open for a short sleep while tracking the peak number in
/// flight at once.
pub struct InFlightStore {
    pub inner: MemoryStore,
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            delay: Duration::from_millis(20),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn hold<T>(&self, call: impl Future<Output = T>) -> T {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = call.await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl ObjectStore for InFlightStore {
    async fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage, StoreError> {
        self.inner
            .list_objects_page(bucket, prefix, continuation_token)
            .await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectHead>, StoreError> {
        self.inner.head_object(bucket, key).await
    }

    async fn put_object(&self, write: &ObjectWrite, body: &Path) -> Result<(), StoreError> {
        self.hold(self.inner.put_object(write, body)).await
    }

    async fn create_multipart_upload(
        &self,
        write: &ObjectWrite,
    ) -> Result<MultipartUpload, StoreError> {
        self.inner.create_multipart_upload(write).await
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        body: &Path,
        range: ByteRange,
    ) -> Result<CompletedPart, StoreError> {
        self.inner.upload_part(upload, part_number, body, range).await
    }

    async fn upload_part_copy(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        range: ByteRange,
    ) -> Result<CompletedPart, StoreError> {
        self.inner.upload_part_copy(upload, part_number, range).await
    }

    async fn complete_multipart_upload(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        self.inner.complete_multipart_upload(upload, parts).await
    }

    async fn abort_multipart_upload(&self, upload: &MultipartUpload) -> Result<(), StoreError> {
        self.inner.abort_multipart_upload(upload).await
    }

    async fn copy_object(&self, write: &ObjectWrite) -> Result<(), StoreError> {
        self.hold(self.inner.copy_object(write)).await
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Result<Vec<DeleteFailure>, StoreError> {
        self.inner.delete_objects(bucket, keys).await
    }

    async fn get_bucket_tagging(&self, bucket: &str) -> Result<Vec<Tag>, StoreError> {
        self.inner.get_bucket_tagging(bucket).await
    }

    async fn put_bucket_tagging(&self, bucket: &str, tags: &[Tag]) -> Result<(), StoreError> {
        self.inner.put_bucket_tagging(bucket, tags).await
    }
}
