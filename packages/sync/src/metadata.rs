//! Re-applies ACL, content type and glob-rule params to objects that are
//! already in the bucket, without re-uploading their content.

use std::path::{Path, PathBuf};

use bucket_sync_models::{Acl, ObjectParams, ParamRule};
use futures::StreamExt as _;

use crate::params::{ParamMatcher, object_write};
use crate::progress::{PercentProgress, ProgressCallback};
use crate::store::ObjectStore;
use crate::transfer::{TransferMethod, copy_in_place};
use crate::walk::{object_key, relative_path, walk_files};
use crate::{FileFailure, SyncError};

/// Options for [`sync_directory_metadata`].
#[derive(Debug, Clone)]
pub struct MetadataOptions<'a> {
    /// Local root directory.
    pub local_dir: &'a Path,
    /// Resolved bucket name.
    pub bucket: &'a str,
    /// Normalized key prefix.
    pub prefix: &'a str,
    /// Canned ACL to apply.
    pub acl: Acl,
    /// Content type when the extension gives none.
    pub default_content_type: Option<&'a str>,
    /// Ordered glob rules; only files matching one of them participate.
    pub params: &'a [ParamRule],
    /// Maximum objects in flight.
    pub concurrency: usize,
    /// Active stage for `OnlyForStage` rules.
    pub stage: Option<&'a str>,
}

/// Outcome counts of a metadata pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataSummary {
    /// Objects whose metadata was rewritten.
    pub updated: usize,
    /// Of those, objects large enough to need a multipart copy.
    pub multipart: usize,
    /// Participating files with no remote object.
    pub missing: usize,
}

impl std::fmt::Display for MetadataSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} updated ({} multipart), {} missing",
            self.updated, self.multipart, self.missing
        )
    }
}

enum Outcome {
    Copied(TransferMethod),
    Missing,
}

/// Copies every participating object onto itself with metadata-replace
/// semantics.
///
/// The rewrite is unconditional; current remote metadata is not compared.
///
/// # Errors
///
/// * [`SyncError::Config`] if a glob rule is invalid.
/// * [`SyncError::Partial`] if any object failed; every scheduled object
///   still ran to completion.
pub async fn sync_directory_metadata(
    store: &dyn ObjectStore,
    options: &MetadataOptions<'_>,
    progress: &dyn ProgressCallback,
) -> Result<MetadataSummary, SyncError> {
    let matcher = ParamMatcher::new(options.params)?;

    let participants: Vec<(PathBuf, String, ObjectParams)> = walk_files(options.local_dir)
        .filter_map(|path| {
            let relative = relative_path(options.local_dir, &path)?;
            let params = matcher.resolve(&relative, options.stage, true)?;
            Some((path, object_key(options.prefix, &relative), params))
        })
        .collect();

    let total = participants.len();
    log::info!(
        "Updating metadata of {total} object(s) in s3://{}/{}",
        options.bucket,
        options.prefix
    );

    let percent = PercentProgress::start(progress, "Updating metadata");
    let mut summary = MetadataSummary::default();
    let mut completed = 0u64;
    let mut failures = Vec::new();

    let mut results = futures::stream::iter(participants.into_iter().map(
        |(path, key, params)| async move {
            let result = sync_object(store, options, &path, &key, params).await;
            (key, result)
        },
    ))
    .buffer_unordered(options.concurrency.max(1));

    while let Some((key, result)) = results.next().await {
        completed += 1;
        percent.update(completed, total as u64);
        match result {
            Ok(Outcome::Copied(method)) => {
                summary.updated += 1;
                if matches!(method, TransferMethod::Multipart { .. }) {
                    summary.multipart += 1;
                }
            }
            Ok(Outcome::Missing) => summary.missing += 1,
            Err(e) => {
                log::error!("Failed to update metadata of {key}: {e}");
                failures.push(FileFailure {
                    key,
                    error: Box::new(e),
                });
            }
        }
    }

    if !failures.is_empty() {
        return Err(SyncError::Partial {
            operation: "metadata sync",
            total,
            failures,
        });
    }

    log::info!("s3://{}/{}: {summary}", options.bucket, options.prefix);
    Ok(summary)
}

async fn sync_object(
    store: &dyn ObjectStore,
    options: &MetadataOptions<'_>,
    path: &Path,
    key: &str,
    params: ObjectParams,
) -> Result<Outcome, SyncError> {
    let Some(head) = store.head_object(options.bucket, key).await? else {
        log::warn!(
            "s3://{}/{key} does not exist, skipping metadata update",
            options.bucket
        );
        return Ok(Outcome::Missing);
    };

    let write = object_write(
        options.bucket,
        key,
        options.acl,
        path,
        params,
        options.default_content_type,
    );
    let method = copy_in_place(store, &write, head.size).await?;
    log::debug!("Updated metadata of s3://{}/{key} ({method:?})", options.bucket);
    Ok(Outcome::Copied(method))
}

#[cfg(test)]
mod tests {
    use bucket_sync_models::STAGE_RESTRICTION_KEY;

    use super::*;
    use crate::memory::{MemoryStore, StoreCall};
    use crate::progress::NullProgress;
    use crate::test_support::{InFlightStore, RecordingProgress, TempDir};
    use crate::transfer::MULTIPART_COPY_THRESHOLD;

    fn options<'a>(dir: &'a TempDir, params: &'a [ParamRule]) -> MetadataOptions<'a> {
        MetadataOptions {
            local_dir: dir.path(),
            bucket: "bucket",
            prefix: "",
            acl: Acl::PublicRead,
            default_content_type: None,
            params,
            concurrency: 5,
            stage: Some("dev"),
        }
    }

    fn copied_keys(store: &MemoryStore) -> Vec<String> {
        let mut keys: Vec<String> = store
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::CopyObject { key } => Some(key),
                _ => None,
            })
            .collect();
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn only_matching_files_participate() {
        let dir = TempDir::new("metadata_matching");
        dir.write("index.html", b"html");
        dir.write("app.js", b"js");
        let store = MemoryStore::new();
        store.insert("bucket", "index.html", b"html");
        store.insert("bucket", "app.js", b"js");

        let rules = vec![ParamRule::new("*.html", &[("CacheControl", "no-cache")])];
        let summary = sync_directory_metadata(&store, &options(&dir, &rules), &NullProgress)
            .await
            .unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(copied_keys(&store), vec!["index.html"]);
        let object = store.object("bucket", "index.html").unwrap();
        assert_eq!(object.content_type.as_deref(), Some("text/html"));
        assert_eq!(
            object.params.get("CacheControl").and_then(|v| v.as_text()),
            Some("no-cache")
        );
    }

    #[tokio::test]
    async fn stage_restricted_files_are_excluded() {
        let dir = TempDir::new("metadata_stage");
        dir.write("app.js", b"js");
        let store = MemoryStore::new();
        store.insert("bucket", "app.js", b"js");

        let rules = vec![ParamRule::new("*.js", &[(STAGE_RESTRICTION_KEY, "prod")])];
        let summary = sync_directory_metadata(&store, &options(&dir, &rules), &NullProgress)
            .await
            .unwrap();

        assert_eq!(summary, MetadataSummary::default());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_objects_are_skipped() {
        let dir = TempDir::new("metadata_missing");
        dir.write("index.html", b"html");
        let store = MemoryStore::new();

        let rules = vec![ParamRule::new("*.html", &[("CacheControl", "no-cache")])];
        let summary = sync_directory_metadata(&store, &options(&dir, &rules), &NullProgress)
            .await
            .unwrap();

        assert_eq!(summary.missing, 1);
        assert!(copied_keys(&store).is_empty());
    }

    #[tokio::test]
    async fn large_objects_use_multipart_copy() {
        let dir = TempDir::new("metadata_large");
        dir.write("video.mp4", b"stand-in");
        let store = MemoryStore::new();
        store.insert_sized("bucket", "video.mp4", MULTIPART_COPY_THRESHOLD, "\"abc\"");

        let rules = vec![ParamRule::new("*.mp4", &[("CacheControl", "max-age=3600")])];
        let summary = sync_directory_metadata(&store, &options(&dir, &rules), &NullProgress)
            .await
            .unwrap();

        assert_eq!(summary.multipart, 1);
        assert!(copied_keys(&store).is_empty());
        let object = store.object("bucket", "video.mp4").unwrap();
        assert_eq!(object.content_type.as_deref(), Some("video/mp4"));
    }

    #[tokio::test]
    async fn failed_copies_are_aggregated() {
        let dir = TempDir::new("metadata_failures");
        dir.write("a.html", b"a");
        dir.write("b.html", b"b");
        let store = MemoryStore::new();
        store.insert("bucket", "a.html", b"a");
        store.insert("bucket", "b.html", b"b");
        store.fail_writes_to("a.html");

        let rules = vec![ParamRule::new("*.html", &[("CacheControl", "no-cache")])];
        let result = sync_directory_metadata(&store, &options(&dir, &rules), &NullProgress).await;

        assert!(matches!(
            result,
            Err(SyncError::Partial { total: 2, ref failures, .. }) if failures.len() == 1
        ));
        assert_eq!(copied_keys(&store), vec!["a.html", "b.html"]);
    }

    #[tokio::test]
    async fn no_participants_reports_zero_percent() {
        let dir = TempDir::new("metadata_empty");
        dir.write("index.html", b"<h1>hi</h1>");
        let store = MemoryStore::new();
        let recorder = RecordingProgress::default();

        let summary = sync_directory_metadata(&store, &options(&dir, &[]), &recorder)
            .await
            .unwrap();

        assert_eq!(summary, MetadataSummary::default());
        assert_eq!(recorder.total(), Some(100));
        assert_eq!(recorder.positions(), vec![0]);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn never_more_than_concurrency_copies_in_flight() {
        let dir = TempDir::new("metadata_concurrency");
        let inner = MemoryStore::new();
        for index in 0..10 {
            let name = format!("page-{index}.html");
            dir.write(&name, b"<p>page</p>");
            inner.insert("bucket", &name, b"<p>page</p>");
        }
        let store = InFlightStore::new(inner);
        let rules = vec![ParamRule::new("*.html", &[("CacheControl", "no-cache")])];
        let mut opts = options(&dir, &rules);
        opts.concurrency = 2;
        let recorder = RecordingProgress::default();

        let summary = sync_directory_metadata(&store, &opts, &recorder)
            .await
            .unwrap();

        assert_eq!(summary.updated, 10);
        assert!(store.peak() <= 2, "peak was {}", store.peak());
        let positions = recorder.positions();
        assert!(positions.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(positions.last(), Some(&100));
    }
}
