use chrono::{DateTime, Utc};

/// Metadata about an object in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// The storage-specific full address of the object,
    /// e.g. "gs://my-bucket/dir1/obj.txt".
    pub url: String,

    /// The name of the object inside the storage system, e.g. "dir1/obj.txt".
    pub name: String,

    /// Opaque version identifier. Empty when the backend can't supply one.
    pub etag: String,

    pub last_modified: DateTime<Utc>,

    /// Size in bytes.
    pub size: u64
}
