//! Glob-rule param resolution and content-type selection.
//!
//! Rules are evaluated in order against a file's forward-slash relative path.
//! Every matching rule's params replace identically-named keys accumulated
//! so far (whole values, including the `Metadata` map). The reserved
//! [`STAGE_RESTRICTION_KEY`] is tracked separately: the last matching rule
//! decides whether a restriction applies, and the key itself is never
//! returned.

use std::path::Path;

use bucket_sync_models::{
    Acl, CONTENT_TYPE_KEY, ObjectParams, ParamRule, STAGE_RESTRICTION_KEY,
};
use glob::{MatchOptions, Pattern};

use crate::SyncError;
use crate::store::ObjectWrite;

/// Content type used when neither the extension nor the target gives one.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Case-sensitive; `*` stays within one path segment; `**` spans segments;
/// dotfiles must be matched explicitly.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// A target's glob rules, compiled once per pass.
#[derive(Debug, Clone)]
pub struct ParamMatcher {
    rules: Vec<(Pattern, ParamRule)>,
}

impl ParamMatcher {
    /// Compiles every rule's glob.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] naming the first invalid pattern.
    pub fn new(rules: &[ParamRule]) -> Result<Self, SyncError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Pattern::new(&rule.glob)
                    .map(|pattern| (pattern, rule.clone()))
                    .map_err(|e| SyncError::Config {
                        message: format!("invalid glob pattern {:?}: {e}", rule.glob),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Resolves the params for `relative_path`.
    ///
    /// Returns `None` when the file is excluded from the operation: no rule
    /// matched and `skip_unmatched` is set, or the last matching rule that
    /// carries a stage restriction names a stage other than `stage`.
    #[must_use]
    pub fn resolve(
        &self,
        relative_path: &str,
        stage: Option<&str>,
        skip_unmatched: bool,
    ) -> Option<ObjectParams> {
        let mut params = ObjectParams::new();
        let mut restriction: Option<String> = None;
        let mut matched = false;

        for (pattern, rule) in &self.rules {
            if !pattern.matches_with(relative_path, MATCH_OPTIONS) {
                continue;
            }
            matched = true;
            restriction = rule
                .params
                .get(STAGE_RESTRICTION_KEY)
                .and_then(|value| value.as_text())
                .map(str::to_string);
            for (key, value) in &rule.params {
                if key != STAGE_RESTRICTION_KEY {
                    params.insert(key.clone(), value.clone());
                }
            }
        }

        if !matched && skip_unmatched {
            return None;
        }

        if let Some(only_for) = restriction
            && stage != Some(only_for.as_str())
        {
            log::debug!("{relative_path}: restricted to stage {only_for}, skipping");
            return None;
        }

        Some(params)
    }
}

/// One-shot form of [`ParamMatcher::resolve`].
///
/// # Errors
///
/// Returns [`SyncError::Config`] if any rule's glob is invalid.
pub fn resolve_params(
    relative_path: &str,
    rules: &[ParamRule],
    stage: Option<&str>,
    skip_unmatched: bool,
) -> Result<Option<ObjectParams>, SyncError> {
    Ok(ParamMatcher::new(rules)?.resolve(relative_path, stage, skip_unmatched))
}

/// Picks the content type for a file: an explicit `ContentType` param, else
/// the type registered for the extension, else the target default, else
/// [`FALLBACK_CONTENT_TYPE`].
#[must_use]
pub fn content_type_for(
    path: &Path,
    params: &ObjectParams,
    default_content_type: Option<&str>,
) -> String {
    if let Some(explicit) = params.get(CONTENT_TYPE_KEY).and_then(|v| v.as_text()) {
        return explicit.to_string();
    }
    mime_guess::from_path(path).first().map_or_else(
        || {
            default_content_type
                .unwrap_or(FALLBACK_CONTENT_TYPE)
                .to_string()
        },
        |mime| mime.essence_str().to_string(),
    )
}

/// Builds the write request for a local file, moving the content type out
/// of the params into its own field.
#[must_use]
pub fn object_write(
    bucket: &str,
    key: &str,
    acl: Acl,
    path: &Path,
    mut params: ObjectParams,
    default_content_type: Option<&str>,
) -> ObjectWrite {
    let content_type = content_type_for(path, &params, default_content_type);
    params.remove(CONTENT_TYPE_KEY);
    ObjectWrite {
        bucket: bucket.to_string(),
        key: key.to_string(),
        acl,
        content_type,
        params,
    }
}
