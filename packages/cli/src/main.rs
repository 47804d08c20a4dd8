#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for syncing local directories into S3 buckets.
//!
//! Targets are read from a TOML configuration file (`bucket_sync.toml` by
//! default). Bucket names may be literal or looked up in a JSON file of
//! deployment stack outputs. Each enabled target runs concurrently; the
//! process exits non-zero if any of them failed.
//!
//! Uses `indicatif-log-bridge` (via [`bucket_sync_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod runner;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bucket_sync::SyncScope;
use bucket_sync::memory::MemoryStore;
use bucket_sync::store::ObjectStore;
use bucket_sync_models::{SyncConfig, load_config};
use bucket_sync_s3::S3Store;
use clap::{Parser, Subcommand};

use crate::runner::{Action, Reporting, RunContext, run_all};

#[derive(Parser)]
#[command(
    name = "bucket_sync",
    about = "Sync local directories into S3 buckets"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, default_value = "bucket_sync.toml")]
    config: PathBuf,
    /// Deployment stage; rules with `OnlyForStage` only apply to their stage
    #[arg(long, global = true, env = "BUCKET_SYNC_STAGE", default_value = "dev")]
    stage: String,
    /// JSON object of stack outputs used to resolve `bucket_name_key`
    #[arg(long, global = true)]
    stack_outputs: Option<PathBuf>,
    /// Run against an empty in-memory store instead of S3
    #[arg(long, global = true)]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files, rewrite metadata and merge bucket tags
    Sync {
        /// Only sync these buckets (repeatable)
        #[arg(long = "target")]
        targets: Vec<String>,
    },
    /// Rewrite metadata of objects matched by param rules
    Metadata,
    /// Merge configured tags into each bucket's tag set
    Tags,
    /// Delete every object under each target's prefix
    Clear,
    /// Lifecycle hooks for deployment tooling
    Hook {
        #[command(subcommand)]
        hook: Hook,
    },
    /// List configured targets
    Targets,
}

#[derive(Subcommand)]
enum Hook {
    /// Full sync after a deployment finishes
    AfterDeploy,
    /// Clear buckets before their stack is removed
    BeforeRemove,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = bucket_sync_cli_utils::init_logger();
    let cli = Cli::parse();

    let (action, reporting, only) = match cli.command {
        Commands::Targets => {
            let config = load_config(&cli.config)?;
            print_targets(&config, base_dir(&cli.config));
            return Ok(());
        }
        Commands::Sync { targets } => (
            Action::Sync(SyncScope::FULL),
            Reporting::Command,
            targets,
        ),
        Commands::Metadata => (
            Action::Sync(SyncScope::METADATA),
            Reporting::Command,
            Vec::new(),
        ),
        Commands::Tags => (Action::Sync(SyncScope::TAGS), Reporting::Command, Vec::new()),
        Commands::Clear => (Action::Clear, Reporting::Command, Vec::new()),
        Commands::Hook {
            hook: Hook::AfterDeploy,
        } => (Action::Sync(SyncScope::FULL), Reporting::Hook, Vec::new()),
        Commands::Hook {
            hook: Hook::BeforeRemove,
        } => (Action::Clear, Reporting::Hook, Vec::new()),
    };

    if !cli.config.exists() {
        log::warn!(
            "No configuration found at {}; nothing to sync",
            cli.config.display()
        );
        return Ok(());
    }
    let config = load_config(&cli.config)?;
    let base_dir = base_dir(&cli.config);
    let outputs = match &cli.stack_outputs {
        Some(path) => load_stack_outputs(path)?,
        None => BTreeMap::new(),
    };

    let store: Box<dyn ObjectStore> = if cli.dry_run {
        log::info!("Dry run: using an empty in-memory store");
        Box::new(MemoryStore::new())
    } else {
        Box::new(S3Store::from_config(&config.client).await)
    };

    let ctx = RunContext {
        store: store.as_ref(),
        outputs: &outputs,
        stage: &cli.stage,
        base_dir,
        multi: &multi,
        reporting,
        dry_run: cli.dry_run,
    };

    let failures = run_all(&ctx, config.normalized_targets(base_dir), action, &only).await;
    if failures > 0 {
        return Err(format!("{failures} target(s) failed").into());
    }

    Ok(())
}

/// Directory relative `local_dir` values resolve against.
fn base_dir(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Reads a flat JSON object of stack outputs. Non-string values are kept in
/// their JSON text form.
fn load_stack_outputs(path: &Path) -> Result<BTreeMap<String, String>, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read stack outputs {}: {e}", path.display()))?;
    let values: BTreeMap<String, serde_json::Value> = serde_json::from_str(&contents)
        .map_err(|e| format!("Invalid stack outputs {}: {e}", path.display()))?;

    Ok(values
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect())
}

fn print_targets(config: &SyncConfig, base_dir: &Path) {
    println!("{:<30} {:<20} {:<8} LOCAL DIR", "BUCKET", "PREFIX", "ENABLED");
    println!("{}", "-".repeat(80));
    for target in config.normalized_targets(base_dir) {
        match target {
            Ok(target) => println!(
                "{:<30} {:<20} {:<8} {}",
                target.bucket.to_string(),
                if target.prefix.is_empty() {
                    "/"
                } else {
                    target.prefix.as_str()
                },
                target.enabled,
                target.local_dir.display()
            ),
            Err(e) => println!("{e}"),
        }
    }
}
