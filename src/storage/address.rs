use super::error::{Result, StorageError};

/// Bucket (or container) and key of a cloud-style address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPath {
    pub bucket: String,
    pub path: String
}

/// Splits `<protocol><bucket>[/<path>]`. Rejects a foreign protocol and a
/// protocol with nothing after it.
pub fn parse_bucket_path(backend: &'static str, protocol: &str, url: &str) -> Result<BucketPath> {
    let remainder = url.strip_prefix(protocol)
        .ok_or_else(|| StorageError::UnsupportedProtocol(url.to_string()))?;

    let (bucket, path) = match remainder.split_once('/') {
        Some((bucket, path)) => (bucket, path),
        None => (remainder, "")
    };

    if bucket.is_empty() {
        return Err(StorageError::invalid_address(backend, url));
    }

    Ok(BucketPath {
        bucket: bucket.to_string(),
        path: path.to_string()
    })
}

/// Appends `path` to `url`, replacing one trailing separator. An empty
/// subpath leaves the address untouched.
pub fn join(url: &str, path: &str) -> String {
    if path.is_empty() {
        return url.to_string();
    }

    format!("{}/{}", url.strip_suffix('/').unwrap_or(url), path)
}
