mod address;
mod backend;
mod context;
mod context_io;
mod error;
mod ftp;
mod google_cloud;
mod object;
mod retry;
mod swift;

pub use backend::{ByteSink, ByteSource, Storage};
pub use context::TransferContext;
pub use error::{Result, StorageError};
pub use ftp::{Ftp, FtpConfig, FTP_PROTOCOL};
pub use google_cloud::{GoogleCloud, GoogleCloudConfig, GS_PROTOCOL};
pub use object::Object;
pub use retry::{RetryPolicy, StorageRetrier};
pub use swift::{Swift, SwiftConfig, SWIFT_PROTOCOL};

/// Settings of every backend, whichever one an address ends up selecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub google_cloud: GoogleCloudConfig,
    pub swift: SwiftConfig,
    pub ftp: FtpConfig
}

/// Picks the backend whose protocol prefix `url` carries.
#[tracing::instrument(skip(config))]
pub fn new_storage(url: &str, config: &StorageConfig) -> Result<Box<dyn Storage>> {
    if url.starts_with(GS_PROTOCOL) {
        if !config.google_cloud.valid() {
            return Err(StorageError::configuration("googleStorage", "backend is disabled or misconfigured"));
        }

        return Ok(Box::new(GoogleCloud::new(config.google_cloud.clone())?));
    }

    if url.starts_with(SWIFT_PROTOCOL) {
        if !config.swift.valid() {
            return Err(StorageError::configuration("swift", "backend is disabled or misconfigured"));
        }

        return Ok(Box::new(Swift::new(config.swift.clone())?));
    }

    if url.starts_with(FTP_PROTOCOL) {
        if !config.ftp.valid() {
            return Err(StorageError::configuration("ftp", "backend is disabled"));
        }

        return Ok(Box::new(Ftp::new(config.ftp.clone())?));
    }

    Err(StorageError::UnsupportedProtocol(url.to_string()))
}
