//! Batched deletion of remote keys.

use std::pin::pin;

use futures::StreamExt as _;

use crate::SyncError;
use crate::list::list_objects;
use crate::progress::{PercentProgress, ProgressCallback};
use crate::store::ObjectStore;
use crate::walk::listing_prefix;

/// Maximum number of keys the store accepts in one delete request.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Options for [`delete_directory`].
#[derive(Debug, Clone)]
pub struct DeleteOptions<'a> {
    /// Resolved bucket name.
    pub bucket: &'a str,
    /// Normalized key prefix; empty means the whole bucket.
    pub prefix: &'a str,
}

/// Deletes `keys` in batches of at most [`MAX_DELETE_BATCH`], one batch at a
/// time, reporting `(deleted so far, total)` after each batch.
///
/// Stops at the first batch in which the store refuses any key.
///
/// # Errors
///
/// * [`SyncError::DeleteFailed`] naming every key the store refused in the
///   failing batch.
/// * [`SyncError::Store`] if a delete request fails as a whole.
pub async fn delete_keys(
    store: &dyn ObjectStore,
    bucket: &str,
    keys: &[String],
    progress: &dyn ProgressCallback,
) -> Result<usize, SyncError> {
    progress.set_total(keys.len() as u64);

    let mut deleted = 0;
    for batch in keys.chunks(MAX_DELETE_BATCH) {
        delete_batch(store, bucket, batch).await?;
        deleted += batch.len();
        progress.set_position(deleted as u64);
    }

    if deleted > 0 {
        log::info!("Deleted {deleted} object(s) from s3://{bucket}");
    }
    Ok(deleted)
}

async fn delete_batch(
    store: &dyn ObjectStore,
    bucket: &str,
    batch: &[String],
) -> Result<(), SyncError> {
    log::debug!("Deleting batch of {} key(s) from s3://{bucket}", batch.len());

    let failures = store.delete_objects(bucket, batch).await?;
    if failures.is_empty() {
        return Ok(());
    }

    for failure in &failures {
        log::error!(
            "Failed to delete s3://{bucket}/{}: {} {}",
            failure.key,
            failure.code.as_deref().unwrap_or("UnknownError"),
            failure.message.as_deref().unwrap_or_default()
        );
    }
    Err(SyncError::DeleteFailed {
        bucket: bucket.to_string(),
        keys: failures.into_iter().map(|failure| failure.key).collect(),
    })
}

/// Deletes every object under the options' prefix.
///
/// The listing is streamed and keys are deleted as soon as a full batch has
/// accumulated. Progress is the share of objects discovered so far that
/// have been deleted, so it can move backwards while the listing is still
/// running.
///
/// # Errors
///
/// Same as [`delete_keys`], plus [`SyncError::Store`] if listing fails.
pub async fn delete_directory(
    store: &dyn ObjectStore,
    options: &DeleteOptions<'_>,
    progress: &dyn ProgressCallback,
) -> Result<usize, SyncError> {
    let prefix = listing_prefix(options.prefix);
    let percent = PercentProgress::start(progress, "Deleting");

    let mut objects = pin!(list_objects(store, options.bucket, &prefix));
    let mut pending = Vec::with_capacity(MAX_DELETE_BATCH);
    let mut discovered = 0u64;
    let mut deleted = 0u64;

    while let Some(object) = objects.next().await {
        pending.push(object?.key);
        discovered += 1;

        if pending.len() == MAX_DELETE_BATCH {
            delete_batch(store, options.bucket, &pending).await?;
            deleted += pending.len() as u64;
            pending.clear();
            percent.update(deleted, discovered);
        }
    }

    if !pending.is_empty() {
        delete_batch(store, options.bucket, &pending).await?;
        deleted += pending.len() as u64;
    }
    percent.update(deleted, discovered.max(1));

    log::info!(
        "Deleted {deleted} object(s) under s3://{}/{prefix}",
        options.bucket
    );
    Ok(usize::try_from(deleted).unwrap_or(usize::MAX))
}
