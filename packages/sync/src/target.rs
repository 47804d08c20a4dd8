//! Per-target orchestration: pre-command, upload, metadata, tags.

use std::path::Path;

use bucket_sync_models::SyncTarget;

use crate::SyncError;
use crate::command::run_pre_command;
use crate::delete::{DeleteOptions, delete_directory};
use crate::metadata::{MetadataOptions, MetadataSummary, sync_directory_metadata};
use crate::progress::ProgressCallback;
use crate::store::{ObjectStore, Tag};
use crate::tags::update_bucket_tags;
use crate::upload::{UploadOptions, UploadSummary, upload_directory};

/// Which phases of a target sync to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncScope {
    /// Content upload (and orphan deletion). Also gates the pre-command.
    pub upload: bool,
    /// Metadata rewrite of rule-matched objects.
    pub metadata: bool,
    /// Bucket tag merge.
    pub tags: bool,
}

impl SyncScope {
    /// Every phase.
    pub const FULL: Self = Self {
        upload: true,
        metadata: true,
        tags: true,
    };

    /// Metadata rewrite only.
    pub const METADATA: Self = Self {
        upload: false,
        metadata: true,
        tags: false,
    };

    /// Tag merge only.
    pub const TAGS: Self = Self {
        upload: false,
        metadata: false,
        tags: true,
    };
}

/// What a target sync did, phase by phase; `None` for phases not run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetReport {
    /// Resolved bucket name.
    pub bucket: String,
    /// Upload phase outcome.
    pub upload: Option<UploadSummary>,
    /// Metadata phase outcome.
    pub metadata: Option<MetadataSummary>,
    /// Tag set written, if any.
    pub tags: Option<Vec<Tag>>,
}

impl std::fmt::Display for TargetReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}", self.bucket)?;
        if let Some(upload) = &self.upload {
            write!(f, "; files: {upload}")?;
        }
        if let Some(metadata) = &self.metadata {
            write!(f, "; metadata: {metadata}")?;
        }
        if let Some(tags) = &self.tags {
            write!(f, "; {} tag(s)", tags.len())?;
        }
        Ok(())
    }
}

/// Syncs one target into `bucket`, phase by phase in `scope`.
///
/// The pre-command runs first (relative to `working_dir`) when the upload
/// phase is in scope; its failure stops the target before any store
/// request. Each later phase only runs if the previous one succeeded.
///
/// # Errors
///
/// Returns the first failing phase's error.
pub async fn run_target(
    store: &dyn ObjectStore,
    target: &SyncTarget,
    bucket: &str,
    stage: Option<&str>,
    scope: SyncScope,
    progress: &dyn ProgressCallback,
    working_dir: &Path,
) -> Result<TargetReport, SyncError> {
    let mut report = TargetReport {
        bucket: bucket.to_string(),
        ..TargetReport::default()
    };

    if scope.upload {
        if let Some(command) = &target.pre_command {
            run_pre_command(command, working_dir, target.pre_command_timeout).await?;
        }

        let options = UploadOptions {
            local_dir: &target.local_dir,
            bucket,
            prefix: &target.prefix,
            acl: target.acl,
            delete_removed: target.delete_removed,
            default_content_type: target.default_content_type.as_deref(),
            params: &target.params,
            concurrency: target.concurrency,
            stage,
        };
        report.upload = Some(upload_directory(store, &options, progress).await?);
    }

    if scope.metadata {
        if target.params.is_empty() {
            log::debug!("No param rules for s3://{bucket}, skipping metadata sync");
        } else {
            let options = MetadataOptions {
                local_dir: &target.local_dir,
                bucket,
                prefix: &target.prefix,
                acl: target.acl,
                default_content_type: target.default_content_type.as_deref(),
                params: &target.params,
                concurrency: target.concurrency,
                stage,
            };
            report.metadata = Some(sync_directory_metadata(store, &options, progress).await?);
        }
    }

    if scope.tags && !target.bucket_tags.is_empty() {
        report.tags = Some(update_bucket_tags(store, bucket, &target.bucket_tags).await?);
    }

    Ok(report)
}

/// Deletes every object under the target's prefix in `bucket`.
///
/// # Errors
///
/// Same as [`delete_directory`].
pub async fn clear_target(
    store: &dyn ObjectStore,
    target: &SyncTarget,
    bucket: &str,
    progress: &dyn ProgressCallback,
) -> Result<usize, SyncError> {
    let options = DeleteOptions {
        bucket,
        prefix: &target.prefix,
    };
    delete_directory(store, &options, progress).await
}
