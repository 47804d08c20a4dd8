//! Runs one action across every enabled target, isolating failures.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use bucket_sync::progress::ProgressCallback;
use bucket_sync::{ObjectStore, SyncError, SyncScope, clear_target, run_target};
use bucket_sync_cli_utils::{IndicatifProgress, MultiProgress};
use bucket_sync_models::{ConfigError, SyncTarget};

/// What to do with each target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Pre-command, upload, metadata and tags, limited by the scope.
    Sync(SyncScope),
    /// Delete everything under the target prefix.
    Clear,
}

/// How loudly to report success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reporting {
    /// Explicit command: success at `info`.
    Command,
    /// Lifecycle hook: success at `debug`.
    Hook,
}

/// Everything shared by the targets of one invocation.
pub struct RunContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub outputs: &'a BTreeMap<String, String>,
    pub stage: &'a str,
    pub base_dir: &'a Path,
    pub multi: &'a MultiProgress,
    pub reporting: Reporting,
    pub dry_run: bool,
}

/// Why a single target did not complete.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// The target's bucket could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The engine failed.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Runs `action` on every enabled target concurrently and returns the number
/// of targets that failed. Broken configuration entries count as failures.
///
/// `only` restricts the run to the named buckets when non-empty.
pub async fn run_all(
    ctx: &RunContext<'_>,
    targets: Vec<Result<SyncTarget, ConfigError>>,
    action: Action,
    only: &[String],
) -> usize {
    let mut failures = 0;
    let mut runnable = Vec::new();

    for target in targets {
        let target = match target {
            Ok(target) => target,
            Err(e) => {
                log::error!("{e}");
                failures += 1;
                continue;
            }
        };
        if !target.enabled {
            log::info!("Skipping disabled target {}", target.bucket);
            continue;
        }
        let bucket = match target.bucket.resolve(ctx.outputs) {
            Ok(bucket) => bucket,
            Err(e) => {
                log::error!("{e}");
                failures += 1;
                continue;
            }
        };
        if !only.is_empty() && !only.contains(&bucket) {
            log::debug!("Skipping s3://{bucket}, not selected");
            continue;
        }
        runnable.push((target, bucket));
    }

    if runnable.is_empty() {
        log::warn!("No enabled targets to run");
        return failures;
    }

    let outcomes = futures::future::join_all(
        runnable
            .iter()
            .map(|(target, bucket)| run_one(ctx, target, bucket, action)),
    )
    .await;

    for ((_, bucket), outcome) in runnable.iter().zip(outcomes) {
        if let Err(e) = outcome {
            log::error!("s3://{bucket} failed: {e}");
            failures += 1;
        }
    }

    failures
}

async fn run_one(
    ctx: &RunContext<'_>,
    target: &SyncTarget,
    bucket: &str,
    action: Action,
) -> Result<(), TargetError> {
    let start = Instant::now();
    let label = format!("s3://{bucket}");

    match action {
        Action::Sync(scope) => {
            let progress = IndicatifProgress::target_bar(ctx.multi, &label);
            let dry_target;
            let target = if ctx.dry_run && target.pre_command.is_some() {
                log::info!("{label}: dry run, not running pre_command");
                dry_target = SyncTarget {
                    pre_command: None,
                    ..target.clone()
                };
                &dry_target
            } else {
                target
            };

            let result = run_target(
                ctx.store,
                target,
                bucket,
                Some(ctx.stage),
                scope,
                progress.as_ref(),
                ctx.base_dir,
            )
            .await;
            progress.finish_and_clear();

            let report = result?;
            report_success(
                ctx.reporting,
                &format!("Synced {report} in {:.1}s", start.elapsed().as_secs_f64()),
            );
        }
        Action::Clear => {
            let progress: std::sync::Arc<dyn ProgressCallback> =
                IndicatifProgress::clear_bar(ctx.multi, &label);
            let result = clear_target(ctx.store, target, bucket, progress.as_ref()).await;
            progress.finish_and_clear();

            let deleted = result?;
            report_success(
                ctx.reporting,
                &format!(
                    "Removed {deleted} object(s) from {label} in {:.1}s",
                    start.elapsed().as_secs_f64()
                ),
            );
        }
    }

    Ok(())
}

fn report_success(reporting: Reporting, message: &str) {
    match reporting {
        Reporting::Command => log::info!("{message}"),
        Reporting::Hook => log::debug!("{message}"),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use bucket_sync::memory::MemoryStore;
    use bucket_sync_models::{Acl, BucketRef};

    use super::*;

    fn target(bucket: BucketRef, local_dir: PathBuf, enabled: bool) -> SyncTarget {
        SyncTarget {
            bucket,
            local_dir,
            prefix: String::new(),
            acl: Acl::Private,
            delete_removed: true,
            default_content_type: None,
            params: Vec::new(),
            bucket_tags: BTreeMap::new(),
            enabled,
            pre_command: None,
            pre_command_timeout: Duration::from_secs(10),
            concurrency: 2,
        }
    }

    fn local_dir(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("bucket_sync_cli_{name}_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("index.html"), b"<h1>hi</h1>").unwrap();
        path
    }

    #[tokio::test]
    async fn one_broken_target_does_not_stop_the_others() {
        let dir = local_dir("isolation");
        let store = MemoryStore::new();
        let outputs = BTreeMap::from([("SiteBucket".to_string(), "from-output".to_string())]);
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let ctx = RunContext {
            store: &store,
            outputs: &outputs,
            stage: "dev",
            base_dir: &dir,
            multi: &multi,
            reporting: Reporting::Command,
            dry_run: false,
        };

        let failures = run_all(
            &ctx,
            vec![
                Ok(target(BucketRef::Name("plain".to_string()), dir.clone(), true)),
                Ok(target(BucketRef::OutputKey("SiteBucket".to_string()), dir.clone(), true)),
                Ok(target(BucketRef::OutputKey("Missing".to_string()), dir.clone(), true)),
                Ok(target(BucketRef::Name("off".to_string()), dir.clone(), false)),
                Err(ConfigError::MissingBucket { index: 4 }),
            ],
            Action::Sync(SyncScope::FULL),
            &[],
        )
        .await;

        assert_eq!(failures, 2);
        assert_eq!(store.keys("plain"), vec!["index.html"]);
        assert_eq!(store.keys("from-output"), vec!["index.html"]);
        assert!(store.keys("off").is_empty());

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn only_selected_buckets_run() {
        let dir = local_dir("selection");
        let store = MemoryStore::new();
        let outputs = BTreeMap::new();
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let ctx = RunContext {
            store: &store,
            outputs: &outputs,
            stage: "dev",
            base_dir: &dir,
            multi: &multi,
            reporting: Reporting::Hook,
            dry_run: false,
        };

        let failures = run_all(
            &ctx,
            vec![
                Ok(target(BucketRef::Name("a".to_string()), dir.clone(), true)),
                Ok(target(BucketRef::Name("b".to_string()), dir.clone(), true)),
            ],
            Action::Sync(SyncScope::FULL),
            &["b".to_string()],
        )
        .await;

        assert_eq!(failures, 0);
        assert!(store.keys("a").is_empty());
        assert_eq!(store.keys("b"), vec!["index.html"]);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn clear_empties_each_target() {
        let dir = local_dir("clear");
        let store = MemoryStore::new();
        store.insert("site", "a.txt", b"a");
        store.insert("site", "b.txt", b"b");
        let outputs = BTreeMap::new();
        let multi = MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden());
        let ctx = RunContext {
            store: &store,
            outputs: &outputs,
            stage: "dev",
            base_dir: &dir,
            multi: &multi,
            reporting: Reporting::Command,
            dry_run: false,
        };

        let failures = run_all(
            &ctx,
            vec![Ok(target(BucketRef::Name("site".to_string()), dir.clone(), true))],
            Action::Clear,
            &[],
        )
        .await;

        assert_eq!(failures, 0);
        assert!(store.keys("site").is_empty());

        std::fs::remove_dir_all(dir).unwrap();
    }
}
