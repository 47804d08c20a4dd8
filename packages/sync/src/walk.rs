//! Local file enumeration and the mapping from local paths to object keys.

use std::path::{Component, Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// File names never synced, at any directory level.
pub const IGNORED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

/// Lazily yields every regular file under `root`.
///
/// Symbolic links are skipped with a warning. A missing or unreadable root
/// (or subdirectory) is logged as an error and contributes nothing; this
/// never fails. Every call walks the filesystem afresh.
pub fn walk_files(root: &Path) -> impl Iterator<Item = PathBuf> + use<> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => {
                if entry.depth() > 0 && entry.path_is_symlink() {
                    log::warn!("Skipping symbolic link {}", entry.path().display());
                    None
                } else if entry.file_type().is_file() {
                    Some(entry.into_path())
                } else {
                    None
                }
            }
            Err(e) => {
                let path = e
                    .path()
                    .map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string());
                log::error!("Failed to read {path}: {e}");
                None
            }
        })
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| IGNORED_FILES.contains(&name))
}

/// Returns `path` relative to `root` as forward-slash segments, independent
/// of the host's separator. `None` if `path` is not under `root`.
#[must_use]
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Object key for a relative path under a normalized prefix.
#[must_use]
pub fn object_key(prefix: &str, relative: &str) -> String {
    if prefix.is_empty() {
        relative.to_string()
    } else {
        format!("{prefix}/{relative}")
    }
}

/// Listing prefix for a normalized key prefix.
///
/// A non-empty prefix is listed as `prefix/` so sibling keys such as
/// `assets-old/...` never count as orphans of `assets`.
#[must_use]
pub fn listing_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        String::new()
    } else {
        format!("{prefix}/")
    }
}
