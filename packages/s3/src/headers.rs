//! Translation of an [`ObjectWrite`] into typed S3 request headers.

use std::collections::HashMap;

use aws_sdk_s3::primitives::{DateTime, DateTimeFormat};
use aws_sdk_s3::types::{ObjectCannedAcl, ServerSideEncryption, StorageClass};
use bucket_sync::store::ObjectWrite;
use bucket_sync_models::{METADATA_KEY, ParamValue};

/// Headers shared by `PutObject`, `CreateMultipartUpload` and `CopyObject`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHeaders {
    pub acl: ObjectCannedAcl,
    pub content_type: String,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub expires: Option<DateTime>,
    pub storage_class: Option<StorageClass>,
    pub server_side_encryption: Option<ServerSideEncryption>,
    pub sse_kms_key_id: Option<String>,
    pub website_redirect_location: Option<String>,
    /// `x-amz-meta-*` headers; `None` when empty.
    pub metadata: Option<HashMap<String, String>>,
}

impl ObjectHeaders {
    /// Maps known params onto their typed headers. The `Metadata` map and any
    /// unrecognized text param become user metadata; other map-valued params
    /// are ignored with a warning.
    #[must_use]
    pub fn from_write(write: &ObjectWrite) -> Self {
        let mut headers = Self {
            acl: ObjectCannedAcl::from(write.acl.as_ref()),
            content_type: write.content_type.clone(),
            cache_control: None,
            content_disposition: None,
            content_encoding: None,
            content_language: None,
            expires: None,
            storage_class: None,
            server_side_encryption: None,
            sse_kms_key_id: None,
            website_redirect_location: None,
            metadata: None,
        };
        let mut metadata = HashMap::new();

        for (name, value) in &write.params {
            let text = match value {
                ParamValue::Map(map) if name == METADATA_KEY => {
                    metadata.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                    continue;
                }
                ParamValue::Map(_) => {
                    log::warn!("{}: ignoring map-valued param {name}", write.key);
                    continue;
                }
                ParamValue::Text(text) => text,
            };

            match name.as_str() {
                "CacheControl" => headers.cache_control = Some(text.clone()),
                "ContentDisposition" => headers.content_disposition = Some(text.clone()),
                "ContentEncoding" => headers.content_encoding = Some(text.clone()),
                "ContentLanguage" => headers.content_language = Some(text.clone()),
                "Expires" => {
                    headers.expires = parse_expires(text);
                    if headers.expires.is_none() {
                        log::warn!("{}: ignoring unparseable Expires {text:?}", write.key);
                    }
                }
                "StorageClass" => headers.storage_class = Some(StorageClass::from(text.as_str())),
                "ServerSideEncryption" => {
                    headers.server_side_encryption =
                        Some(ServerSideEncryption::from(text.as_str()));
                }
                "SSEKMSKeyId" => headers.sse_kms_key_id = Some(text.clone()),
                "WebsiteRedirectLocation" => {
                    headers.website_redirect_location = Some(text.clone());
                }
                _ => {
                    metadata.insert(name.clone(), text.clone());
                }
            }
        }

        if !metadata.is_empty() {
            headers.metadata = Some(metadata);
        }
        headers
    }
}

/// Accepts an HTTP date or an RFC 3339 timestamp.
fn parse_expires(value: &str) -> Option<DateTime> {
    DateTime::from_str(value, DateTimeFormat::HttpDate)
        .or_else(|_| DateTime::from_str(value, DateTimeFormat::DateTime))
        .ok()
}

/// Applies [`ObjectHeaders`] to any fluent builder exposing the shared
/// object-header setters.
macro_rules! with_headers {
    ($builder:expr, $headers:expr) => {{
        let headers: &$crate::headers::ObjectHeaders = $headers;
        $builder
            .acl(headers.acl.clone())
            .content_type(headers.content_type.clone())
            .set_cache_control(headers.cache_control.clone())
            .set_content_disposition(headers.content_disposition.clone())
            .set_content_encoding(headers.content_encoding.clone())
            .set_content_language(headers.content_language.clone())
            .set_expires(headers.expires)
            .set_storage_class(headers.storage_class.clone())
            .set_server_side_encryption(headers.server_side_encryption.clone())
            .set_ssekms_key_id(headers.sse_kms_key_id.clone())
            .set_website_redirect_location(headers.website_redirect_location.clone())
            .set_metadata(headers.metadata.clone())
    }};
}

pub(crate) use with_headers;

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bucket_sync_models::{Acl, ObjectParams};

    use super::*;

    fn write(params: ObjectParams) -> ObjectWrite {
        ObjectWrite {
            bucket: "bucket".to_string(),
            key: "index.html".to_string(),
            acl: Acl::PublicRead,
            content_type: "text/html".to_string(),
            params,
        }
    }

    #[test]
    fn maps_known_params_to_typed_headers() {
        let params = ObjectParams::from([
            ("CacheControl".to_string(), ParamValue::from("no-cache")),
            ("ContentEncoding".to_string(), ParamValue::from("gzip")),
            ("StorageClass".to_string(), ParamValue::from("STANDARD_IA")),
            ("ServerSideEncryption".to_string(), ParamValue::from("aws:kms")),
            ("SSEKMSKeyId".to_string(), ParamValue::from("key-id")),
        ]);

        let headers = ObjectHeaders::from_write(&write(params));

        assert_eq!(headers.acl, ObjectCannedAcl::PublicRead);
        assert_eq!(headers.content_type, "text/html");
        assert_eq!(headers.cache_control.as_deref(), Some("no-cache"));
        assert_eq!(headers.content_encoding.as_deref(), Some("gzip"));
        assert_eq!(headers.storage_class, Some(StorageClass::StandardIa));
        assert_eq!(
            headers.server_side_encryption,
            Some(ServerSideEncryption::AwsKms)
        );
        assert_eq!(headers.sse_kms_key_id.as_deref(), Some("key-id"));
        assert_eq!(headers.metadata, None);
    }

    #[test]
    fn metadata_map_and_unknown_params_become_user_metadata() {
        let params = ObjectParams::from([
            (
                METADATA_KEY.to_string(),
                ParamValue::Map(BTreeMap::from([("build".to_string(), "42".to_string())])),
            ),
            ("x-team".to_string(), ParamValue::from("web")),
        ]);

        let headers = ObjectHeaders::from_write(&write(params));

        let metadata = headers.metadata.unwrap();
        assert_eq!(metadata.get("build").map(String::as_str), Some("42"));
        assert_eq!(metadata.get("x-team").map(String::as_str), Some("web"));
    }

    #[test]
    fn every_acl_maps_to_its_canned_value() {
        for (acl, expected) in [
            (Acl::Private, ObjectCannedAcl::Private),
            (Acl::PublicRead, ObjectCannedAcl::PublicRead),
            (Acl::PublicReadWrite, ObjectCannedAcl::PublicReadWrite),
            (Acl::AuthenticatedRead, ObjectCannedAcl::AuthenticatedRead),
            (Acl::AwsExecRead, ObjectCannedAcl::AwsExecRead),
            (Acl::BucketOwnerRead, ObjectCannedAcl::BucketOwnerRead),
            (
                Acl::BucketOwnerFullControl,
                ObjectCannedAcl::BucketOwnerFullControl,
            ),
        ] {
            assert_eq!(ObjectCannedAcl::from(acl.as_ref()), expected);
        }
    }

    #[test]
    fn expires_accepts_http_dates_and_ignores_garbage() {
        assert!(parse_expires("Wed, 21 Oct 2015 07:28:00 GMT").is_some());
        assert!(parse_expires("2015-10-21T07:28:00Z").is_some());
        assert!(parse_expires("tomorrow").is_none());

        let params = ObjectParams::from([("Expires".to_string(), ParamValue::from("tomorrow"))]);
        assert_eq!(ObjectHeaders::from_write(&write(params)).expires, None);
    }
}
