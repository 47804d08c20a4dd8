//! Content fingerprints comparable with simple (non-multipart) entity tags.

use std::io::Read as _;
use std::path::Path;

use crate::SyncError;

/// Read buffer for streamed hashing.
const HASH_BUFFER_SIZE: usize = 256 * 1024;

/// Computes the quoted MD5 entity tag of a local file (e.g.
/// `"5d41402abc4b2a76b9719d911017c592"`).
///
/// The file is streamed through the hasher on a blocking thread; it is never
/// loaded whole.
///
/// # Errors
///
/// Returns [`SyncError::Io`] if the file cannot be read.
pub async fn content_etag(path: &Path) -> Result<String, SyncError> {
    let owned = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || compute_md5_sync(&owned))
        .await
        .map_err(|e| SyncError::io(path, std::io::Error::other(e)))?
        .map_err(|e| SyncError::io(path, e))?;
    Ok(format!("\"{digest}\""))
}

/// Synchronous MD5 computation (runs in blocking thread).
fn compute_md5_sync(path: &Path) -> Result<String, std::io::Error> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.finalize()))
}

/// Whether an entity tag was assigned by a multipart upload (`"<hex>-<parts>"`).
///
/// Such tags are not content hashes and can never equal a local fingerprint.
#[must_use]
pub fn is_composite_etag(e_tag: &str) -> bool {
    e_tag.contains('-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempDir;

    #[tokio::test]
    async fn quoted_md5_of_file() {
        let dir = TempDir::new("hash");
        let path = dir.write("hello.txt", b"hello");
        assert_eq!(
            content_etag(&path).await.unwrap(),
            "\"5d41402abc4b2a76b9719d911017c592\""
        );
    }

    #[tokio::test]
    async fn hashes_files_larger_than_the_buffer() {
        let dir = TempDir::new("hash_large");
        let data = vec![7u8; HASH_BUFFER_SIZE * 2 + 13];
        let path = dir.write("big.bin", &data);

        let mut context = md5::Context::new();
        context.consume(&data);
        let expected = format!("\"{:x}\"", context.finalize());

        assert_eq!(content_etag(&path).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn unreadable_file_is_an_io_error() {
        let dir = TempDir::new("hash_missing");
        let result = content_etag(&dir.path().join("missing.txt")).await;
        assert!(matches!(result, Err(SyncError::Io { .. })));
    }

    #[test]
    fn detects_composite_tags() {
        assert!(is_composite_etag("\"9b2cf535f27731c974343645a3985328-3\""));
        assert!(!is_composite_etag("\"5d41402abc4b2a76b9719d911017c592\""));
    }
}
