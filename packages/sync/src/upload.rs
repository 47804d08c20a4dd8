//! Directory upload: diff the local tree against the remote listing, upload
//! new and changed files, and optionally delete orphaned remote objects.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use bucket_sync_models::{Acl, ObjectParams, ParamRule};
use futures::StreamExt as _;

use crate::delete::delete_keys;
use crate::hash::content_etag;
use crate::list::{RemoteObject, remote_objects_by_key};
use crate::params::{ParamMatcher, object_write};
use crate::progress::{NullProgress, PercentProgress, ProgressCallback};
use crate::store::ObjectStore;
use crate::transfer::upload_file;
use crate::walk::{listing_prefix, object_key, relative_path, walk_files};
use crate::{FileFailure, SyncError};

/// Options for [`upload_directory`].
#[derive(Debug, Clone)]
pub struct UploadOptions<'a> {
    /// Local root directory.
    pub local_dir: &'a Path,
    /// Resolved bucket name.
    pub bucket: &'a str,
    /// Normalized key prefix.
    pub prefix: &'a str,
    /// Canned ACL for uploaded objects.
    pub acl: Acl,
    /// Delete remote objects under the prefix with no local counterpart.
    pub delete_removed: bool,
    /// Content type when the extension gives none.
    pub default_content_type: Option<&'a str>,
    /// Ordered glob rules.
    pub params: &'a [ParamRule],
    /// Maximum files in flight.
    pub concurrency: usize,
    /// Active stage for `OnlyForStage` rules.
    pub stage: Option<&'a str>,
}

/// Outcome counts of an upload pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Files uploaded because they were new or changed.
    pub uploaded: usize,
    /// Files whose content already matched the remote object.
    pub skipped: usize,
    /// Files left out by a stage restriction.
    pub excluded: usize,
    /// Orphaned remote objects deleted.
    pub deleted: usize,
}

impl std::fmt::Display for UploadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} uploaded, {} unchanged, {} excluded, {} deleted",
            self.uploaded, self.skipped, self.excluded, self.deleted
        )
    }
}

struct Candidate {
    path: PathBuf,
    key: String,
    params: ObjectParams,
}

enum Outcome {
    Uploaded,
    Unchanged,
}

/// Brings the bucket prefix in line with the local directory.
///
/// A candidate whose size matches its remote counterpart is hashed and
/// compared with the remote simple entity tag inside the same bounded unit
/// of work; matching files are skipped. A size mismatch uploads without
/// hashing. Files excluded by a stage restriction are neither uploaded nor
/// protected from orphan deletion. Deletion only runs when every upload
/// succeeded.
///
/// # Errors
///
/// * [`SyncError::Config`] if a glob rule is invalid.
/// * [`SyncError::Store`] if listing or deleting fails.
/// * [`SyncError::Partial`] if any file failed; every scheduled file still
///   ran to completion.
/// * [`SyncError::DeleteFailed`] if the store refused to delete orphans.
pub async fn upload_directory(
    store: &dyn ObjectStore,
    options: &UploadOptions<'_>,
    progress: &dyn ProgressCallback,
) -> Result<UploadSummary, SyncError> {
    let matcher = ParamMatcher::new(options.params)?;
    let remote =
        remote_objects_by_key(store, options.bucket, &listing_prefix(options.prefix)).await?;

    let mut summary = UploadSummary::default();
    let mut local_keys = HashSet::new();
    let mut candidates = Vec::new();

    for path in walk_files(options.local_dir) {
        let Some(relative) = relative_path(options.local_dir, &path) else {
            continue;
        };
        let key = object_key(options.prefix, &relative);
        if let Some(params) = matcher.resolve(&relative, options.stage, false) {
            local_keys.insert(key.clone());
            candidates.push(Candidate { path, key, params });
        } else {
            summary.excluded += 1;
        }
    }

    let scheduled = candidates.len();
    let total = (scheduled + usize::from(options.delete_removed)) as u64;
    log::info!(
        "Syncing {scheduled} file(s) from {} to s3://{}/{}",
        options.local_dir.display(),
        options.bucket,
        options.prefix
    );

    let percent = PercentProgress::start(progress, "Uploading");
    let mut completed = 0u64;
    let mut failures = Vec::new();

    let mut results = futures::stream::iter(candidates.into_iter().map(|candidate| {
        let remote = remote.get(&candidate.key);
        async move {
            let key = candidate.key.clone();
            (key, sync_file(store, options, candidate, remote).await)
        }
    }))
    .buffer_unordered(options.concurrency.max(1));

    while let Some((key, result)) = results.next().await {
        completed += 1;
        percent.update(completed, total);
        match result {
            Ok(Outcome::Uploaded) => summary.uploaded += 1,
            Ok(Outcome::Unchanged) => summary.skipped += 1,
            Err(e) => {
                log::error!("Failed to upload {key}: {e}");
                failures.push(FileFailure {
                    key,
                    error: Box::new(e),
                });
            }
        }
    }

    if !failures.is_empty() {
        if options.delete_removed {
            log::warn!(
                "Not deleting removed files from s3://{}: {} upload(s) failed",
                options.bucket,
                failures.len()
            );
        }
        return Err(SyncError::Partial {
            operation: "upload",
            total: scheduled,
            failures,
        });
    }

    if options.delete_removed {
        let orphans = orphaned_keys(&remote, &local_keys);
        if !orphans.is_empty() {
            log::info!(
                "Deleting {} removed file(s) from s3://{}",
                orphans.len(),
                options.bucket
            );
        }
        summary.deleted = delete_keys(store, options.bucket, &orphans, &NullProgress).await?;
        completed += 1;
        percent.update(completed, total);
    }

    log::info!("s3://{}/{}: {summary}", options.bucket, options.prefix);
    Ok(summary)
}

async fn sync_file(
    store: &dyn ObjectStore,
    options: &UploadOptions<'_>,
    candidate: Candidate,
    remote: Option<&RemoteObject>,
) -> Result<Outcome, SyncError> {
    let Candidate { path, key, params } = candidate;

    let size = tokio::fs::metadata(&path)
        .await
        .map_err(|e| SyncError::io(&path, e))?
        .len();

    let remote_tag = remote
        .filter(|remote| remote.size == size)
        .and_then(RemoteObject::simple_e_tag);
    if let Some(remote_tag) = remote_tag {
        let local_tag = content_etag(&path).await?;
        if local_tag == remote_tag {
            log::debug!("{key}: unchanged");
            return Ok(Outcome::Unchanged);
        }
    }

    let write = object_write(
        options.bucket,
        &key,
        options.acl,
        &path,
        params,
        options.default_content_type,
    );
    let method = upload_file(store, &write, &path, size).await?;
    log::debug!(
        "Uploaded {} to s3://{}/{key} as {} ({method:?})",
        path.display(),
        options.bucket,
        write.content_type
    );
    Ok(Outcome::Uploaded)
}

fn orphaned_keys(remote: &HashMap<String, RemoteObject>, local: &HashSet<String>) -> Vec<String> {
    let mut orphans: Vec<String> = remote
        .keys()
        .filter(|key| !local.contains(*key))
        .cloned()
        .collect();
    orphans.sort();
    orphans
}
