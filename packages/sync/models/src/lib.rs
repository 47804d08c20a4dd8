#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Configuration types for directory-to-bucket sync targets.
//!
//! A sync configuration is a TOML document holding an optional `[client]`
//! table and an ordered list of `[[targets]]`. Raw [`TargetConfig`] entries
//! are loosely typed (every field optional); [`TargetConfig::normalize`]
//! turns each one into an immutable [`SyncTarget`] with every default filled
//! in, so nothing downstream ever sees the raw configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Reserved param key restricting a rule to a single stage.
///
/// It is never sent to the store.
pub const STAGE_RESTRICTION_KEY: &str = "OnlyForStage";

/// Param key carrying the user metadata map (`x-amz-meta-*` headers).
pub const METADATA_KEY: &str = "Metadata";

/// Param key that overrides the detected content type.
pub const CONTENT_TYPE_KEY: &str = "ContentType";

/// Default number of object operations in flight per engine invocation.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default time limit for a target's pre-sync command.
pub const DEFAULT_PRE_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Canned ACL applied to every object written by a target.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Acl {
    /// Owner gets full control, nobody else has access.
    #[default]
    Private,
    /// Anyone can read.
    PublicRead,
    /// Anyone can read and write.
    PublicReadWrite,
    /// Any authenticated principal can read.
    AuthenticatedRead,
    /// The EC2 service can read the object (AMI bundles).
    AwsExecRead,
    /// The bucket owner can read.
    BucketOwnerRead,
    /// The bucket owner gets full control.
    BucketOwnerFullControl,
}

/// A single param value: plain text for header-like params, or a string map
/// for [`METADATA_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// A header-like value such as `CacheControl = "no-cache"`.
    Text(String),
    /// A nested string map such as `Metadata = { build = "42" }`.
    Map(BTreeMap<String, String>),
}

impl ParamValue {
    /// Returns the text value, or `None` for maps.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Map(_) => None,
        }
    }

    /// Returns the map value, or `None` for text.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Text(_) => None,
            Self::Map(map) => Some(map),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Resolved extra params for one object, keyed by param name.
pub type ObjectParams = BTreeMap<String, ParamValue>;

/// A glob pattern and the params attached to every file it matches.
///
/// Rules are ordered within a target; for a given file, later matching rules
/// replace identically-named keys contributed by earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamRule {
    /// Glob evaluated against the forward-slash path relative to the sync root.
    pub glob: String,
    /// Params applied to matching files.
    #[serde(default)]
    pub params: ObjectParams,
}

impl ParamRule {
    /// Creates a rule from a glob and `(key, value)` text pairs.
    #[must_use]
    pub fn new(glob: &str, params: &[(&str, &str)]) -> Self {
        Self {
            glob: glob.to_string(),
            params: params
                .iter()
                .map(|(key, value)| ((*key).to_string(), ParamValue::from(*value)))
                .collect(),
        }
    }
}

/// How a target names its bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BucketRef {
    /// A literal bucket name.
    Name(String),
    /// The key of a deployment stack output holding the bucket name.
    OutputKey(String),
}

impl BucketRef {
    /// Resolves the reference to a concrete bucket name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnresolvedOutput`] if an output key is not
    /// present (or empty) in `outputs`.
    pub fn resolve(&self, outputs: &BTreeMap<String, String>) -> Result<String, ConfigError> {
        match self {
            Self::Name(name) => Ok(name.clone()),
            Self::OutputKey(key) => outputs
                .get(key)
                .filter(|name| !name.is_empty())
                .cloned()
                .ok_or_else(|| ConfigError::UnresolvedOutput { key: key.clone() }),
        }
    }
}

impl std::fmt::Display for BucketRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::OutputKey(key) => write!(f, "<output {key}>"),
        }
    }
}

/// Store client settings shared by all targets.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Region override. Falls back to the environment's region chain.
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Use path-style addressing (needed by most S3-compatible stores).
    #[serde(default)]
    pub force_path_style: bool,
}

/// A sync target exactly as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Literal bucket name.
    #[serde(default)]
    pub bucket_name: Option<String>,
    /// Stack output key resolving to the bucket name.
    #[serde(default)]
    pub bucket_name_key: Option<String>,
    /// Local directory to sync. Relative paths resolve against the
    /// configuration file's directory.
    pub local_dir: PathBuf,
    /// Key prefix inside the bucket.
    #[serde(default)]
    pub bucket_prefix: Option<String>,
    /// Object ACL. Defaults to [`Acl::Private`].
    #[serde(default)]
    pub acl: Option<Acl>,
    /// Delete remote objects with no local counterpart. Defaults to `true`.
    #[serde(default)]
    pub delete_removed: Option<bool>,
    /// Content type used when the extension gives none.
    #[serde(default)]
    pub default_content_type: Option<String>,
    /// Ordered glob rules.
    #[serde(default)]
    pub params: Vec<ParamRule>,
    /// Tags merged into the bucket's tag set.
    #[serde(default)]
    pub bucket_tags: BTreeMap<String, String>,
    /// Whether this target runs at all. Defaults to `true`.
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Shell command run before syncing.
    #[serde(default)]
    pub pre_command: Option<String>,
    /// Time limit for `pre_command`, in seconds.
    #[serde(default)]
    pub pre_command_timeout_secs: Option<u64>,
    /// Maximum object operations in flight.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// A fully-normalized, immutable sync target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    /// Where the bucket name comes from.
    pub bucket: BucketRef,
    /// Absolute (or config-relative resolved) local root.
    pub local_dir: PathBuf,
    /// Key prefix without leading or trailing `/`; empty for the bucket root.
    pub prefix: String,
    /// Object ACL.
    pub acl: Acl,
    /// Delete orphaned remote objects.
    pub delete_removed: bool,
    /// Content type used when the extension gives none.
    pub default_content_type: Option<String>,
    /// Ordered glob rules.
    pub params: Vec<ParamRule>,
    /// Tags merged into the bucket's tag set.
    pub bucket_tags: BTreeMap<String, String>,
    /// Whether this target runs at all.
    pub enabled: bool,
    /// Shell command run before syncing.
    pub pre_command: Option<String>,
    /// Time limit for `pre_command`.
    pub pre_command_timeout: Duration,
    /// Maximum object operations in flight.
    pub concurrency: usize,
}

impl TargetConfig {
    /// Validates this entry and fills in every default.
    ///
    /// `base_dir` is the directory relative `local_dir` values resolve
    /// against; `index` only feeds error messages.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::MissingBucket`] if neither `bucket_name` nor
    ///   `bucket_name_key` is set
    /// * [`ConfigError::AmbiguousBucket`] if both are set
    /// * [`ConfigError::InvalidConcurrency`] if `concurrency` is zero
    pub fn normalize(&self, base_dir: &Path, index: usize) -> Result<SyncTarget, ConfigError> {
        let bucket = match (
            non_empty(self.bucket_name.as_deref()),
            non_empty(self.bucket_name_key.as_deref()),
        ) {
            (Some(name), None) => BucketRef::Name(name.to_string()),
            (None, Some(key)) => BucketRef::OutputKey(key.to_string()),
            (None, None) => return Err(ConfigError::MissingBucket { index }),
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousBucket { index }),
        };

        let concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency { index });
        }

        let local_dir = if self.local_dir.is_absolute() {
            self.local_dir.clone()
        } else {
            base_dir.join(&self.local_dir)
        };

        Ok(SyncTarget {
            bucket,
            local_dir,
            prefix: normalize_prefix(self.bucket_prefix.as_deref().unwrap_or_default()),
            acl: self.acl.unwrap_or_default(),
            delete_removed: self.delete_removed.unwrap_or(true),
            default_content_type: non_empty(self.default_content_type.as_deref())
                .map(str::to_string),
            params: self.params.clone(),
            bucket_tags: self.bucket_tags.clone(),
            enabled: self.enabled.unwrap_or(true),
            pre_command: non_empty(self.pre_command.as_deref()).map(str::to_string),
            pre_command_timeout: self
                .pre_command_timeout_secs
                .map_or(DEFAULT_PRE_COMMAND_TIMEOUT, Duration::from_secs),
            concurrency,
        })
    }
}

/// The whole configuration file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Store client settings.
    #[serde(default)]
    pub client: ClientConfig,
    /// Sync targets in configuration order.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl SyncConfig {
    /// Normalizes every target independently, so one broken entry does not
    /// hide the others.
    #[must_use]
    pub fn normalized_targets(&self, base_dir: &Path) -> Vec<Result<SyncTarget, ConfigError>> {
        self.targets
            .iter()
            .enumerate()
            .map(|(index, target)| target.normalize(base_dir, index))
            .collect()
    }
}

/// Parses a TOML configuration document.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the document is not valid TOML or does
/// not match the configuration schema.
pub fn parse_config_toml(toml_str: &str) -> Result<SyncConfig, ConfigError> {
    toml::de::from_str(toml_str).map_err(|e| ConfigError::Parse {
        message: e.to_string(),
    })
}

/// Reads and parses a configuration file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read and
/// [`ConfigError::Parse`] if it cannot be parsed.
pub fn load_config(path: &Path) -> Result<SyncConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config_toml(&contents)
}

/// Strips leading and trailing `/` from a key prefix.
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Path of the configuration file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration document is malformed.
    #[error("Invalid config: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },

    /// A target names no bucket.
    #[error("Target #{index}: one of bucket_name or bucket_name_key is required")]
    MissingBucket {
        /// Position of the target in the file.
        index: usize,
    },

    /// A target names its bucket twice.
    #[error("Target #{index}: bucket_name and bucket_name_key are mutually exclusive")]
    AmbiguousBucket {
        /// Position of the target in the file.
        index: usize,
    },

    /// A target asks for zero concurrency.
    #[error("Target #{index}: concurrency must be at least 1")]
    InvalidConcurrency {
        /// Position of the target in the file.
        index: usize,
    },

    /// A bucket output key is missing from the stack outputs.
    #[error("Stack output {key} not found; cannot resolve bucket name")]
    UnresolvedOutput {
        /// The missing output key.
        key: String,
    },
}
