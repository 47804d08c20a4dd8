//! Bucket tag merging.

use std::collections::BTreeMap;

use crate::SyncError;
use crate::store::{ObjectStore, StoreError, Tag};

/// Merges `configured` into `existing`: same-key tags are overwritten in
/// place, new keys are appended in key order, and configured tags with an
/// empty value are ignored.
///
/// The order tags were written in the configuration file is not kept; the
/// `bucket_tags` table is a sorted map, so a config listing `z` before `a`
/// still appends `a` first.
#[must_use]
pub fn merge_tags(mut existing: Vec<Tag>, configured: &BTreeMap<String, String>) -> Vec<Tag> {
    for (key, value) in configured {
        if value.is_empty() {
            continue;
        }
        match existing.iter_mut().find(|tag| &tag.key == key) {
            Some(tag) => tag.value.clone_from(value),
            None => existing.push(Tag::new(key, value)),
        }
    }
    existing
}

/// Merges the configured tags into the bucket's tag set and writes the
/// result back in one request.
///
/// Does nothing when no configured tag has a value. Returns the tag set that
/// was written (empty if nothing was).
///
/// # Errors
///
/// Returns [`SyncError::Store`] if reading or writing the tag set fails. A
/// bucket without any tag set is treated as having no tags.
pub async fn update_bucket_tags(
    store: &dyn ObjectStore,
    bucket: &str,
    configured: &BTreeMap<String, String>,
) -> Result<Vec<Tag>, SyncError> {
    if configured.values().all(String::is_empty) {
        log::debug!("No bucket tags configured for {bucket}");
        return Ok(Vec::new());
    }

    let existing = match store.get_bucket_tagging(bucket).await {
        Ok(tags) => tags,
        Err(StoreError::NoSuchTagSet { .. }) => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    let merged = merge_tags(existing, configured);
    store.put_bucket_tagging(bucket, &merged).await?;
    log::info!("Updated {} tag(s) on bucket {bucket}", merged.len());
    Ok(merged)
}
