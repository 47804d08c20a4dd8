//! Paginated remote listing.

use std::collections::HashMap;

use futures::{Stream, TryStreamExt as _};

use crate::hash::is_composite_etag;
use crate::store::{ObjectStore, StoreError};

/// An object from the remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    /// Object key.
    pub key: String,
    /// Entity tag, quoted.
    pub e_tag: Option<String>,
    /// Size in bytes.
    pub size: u64,
}

impl RemoteObject {
    /// The entity tag if it is a plain content hash (not a multipart
    /// composite), i.e. if it can be compared with a local fingerprint.
    #[must_use]
    pub fn simple_e_tag(&self) -> Option<&str> {
        self.e_tag.as_deref().filter(|tag| !is_composite_etag(tag))
    }
}

/// Lazily lists every object under `prefix`, following continuation tokens
/// until the store reports the last page. Objects without a key are dropped.
pub fn list_objects<'a>(
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    prefix: &'a str,
) -> impl Stream<Item = Result<RemoteObject, StoreError>> + Send + 'a {
    async_stream::try_stream! {
        let mut continuation_token: Option<String> = None;

        loop {
            let page = store
                .list_objects_page(bucket, prefix, continuation_token.take())
                .await?;

            for object in page.objects {
                let Some(key) = object.key else {
                    log::warn!("Ignoring listed object without a key in s3://{bucket}/{prefix}");
                    continue;
                };
                yield RemoteObject {
                    key,
                    e_tag: object.e_tag,
                    size: object.size,
                };
            }

            match page.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
    }
}

/// Materializes the listing under `prefix` into a map keyed by object key.
///
/// # Errors
///
/// Returns [`StoreError`] if any page request fails.
pub async fn remote_objects_by_key(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<HashMap<String, RemoteObject>, StoreError> {
    let objects = list_objects(store, bucket, prefix)
        .map_ok(|object| (object.key.clone(), object))
        .try_collect::<HashMap<_, _>>()
        .await?;

    log::info!("Found {} object(s) under s3://{bucket}/{prefix}", objects.len());
    Ok(objects)
}
