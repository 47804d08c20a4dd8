#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Directory-to-bucket synchronization engine.
//!
//! Diffs a local file tree against the current remote listing and brings the
//! bucket in line with it:
//!
//! * [`upload_directory`] uploads new and changed files (MD5/`ETag`
//!   comparison) and optionally deletes orphaned remote objects.
//! * [`sync_directory_metadata`] re-applies ACL, content type and glob-rule
//!   params to already-uploaded objects by copying them onto themselves.
//! * [`delete_directory`] empties a prefix in batches.
//! * [`update_bucket_tags`] merges configured tags into the bucket's tag set.
//!
//! All storage access goes through the [`ObjectStore`] trait. Object-level
//! work inside one call runs as a bounded `buffer_unordered` pipeline polled
//! by a single task, so the completion counter and progress updates never
//! race.

pub mod command;
pub mod delete;
pub mod hash;
pub mod list;
pub mod memory;
pub mod metadata;
pub mod params;
pub mod progress;
pub mod store;
pub mod tags;
pub mod target;
pub mod transfer;
pub mod upload;
pub mod walk;

#[cfg(test)]
mod test_support;

pub use delete::{DeleteOptions, delete_directory, delete_keys};
pub use metadata::{MetadataOptions, MetadataSummary, sync_directory_metadata};
pub use store::{ObjectStore, StoreError};
pub use tags::update_bucket_tags;
pub use target::{SyncScope, TargetReport, clear_target, run_target};
pub use upload::{UploadOptions, UploadSummary, upload_directory};

use std::time::Duration;

/// Errors that can occur while syncing a target.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The target configuration cannot be used as given.
    #[error("Configuration error: {message}")]
    Config {
        /// What is wrong.
        message: String,
    },

    /// A local file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A store operation failed after the client's retries.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A batch delete reported per-object failures.
    #[error(
        "Failed to delete {} object(s) from s3://{bucket}: {}",
        .keys.len(),
        .keys.join(", ")
    )]
    DeleteFailed {
        /// Bucket name.
        bucket: String,
        /// Every key the store refused to delete.
        keys: Vec<String>,
    },

    /// Some files of a concurrent pass failed; the rest ran to completion.
    #[error(
        "{operation} failed for {} of {total} file(s): {}",
        .failures.len(),
        describe_failures(.failures)
    )]
    Partial {
        /// The pass that failed (`upload` or `metadata sync`).
        operation: &'static str,
        /// Number of files scheduled in the pass.
        total: usize,
        /// Every failed file with its cause.
        failures: Vec<FileFailure>,
    },

    /// The pre-sync command failed to run or exited unsuccessfully.
    #[error("Pre-command `{command}` failed: {reason}")]
    PreCommand {
        /// The shell command.
        command: String,
        /// Exit status or spawn error.
        reason: String,
    },

    /// The pre-sync command did not finish in time.
    #[error("Pre-command `{command}` timed out after {timeout:?}")]
    PreCommandTimeout {
        /// The shell command.
        command: String,
        /// The limit that was exceeded.
        timeout: Duration,
    },
}

/// One failed file inside a [`SyncError::Partial`].
#[derive(Debug)]
pub struct FileFailure {
    /// Object key the file maps to.
    pub key: String,
    /// Why it failed.
    pub error: Box<SyncError>,
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.key, self.error)
    }
}

fn describe_failures(failures: &[FileFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl SyncError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
