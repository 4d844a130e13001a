use std::io;

use thiserror::Error;

use super::context::ContextError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("No storage backend matches {0:?}")]
    UnsupportedProtocol(String),
    #[error("Failed to configure {backend} storage backend: {message}")]
    Configuration {
        backend: &'static str,
        message: String
    },
    #[error("{backend}: invalid address {url:?}")]
    InvalidAddress {
        backend: &'static str,
        url: String
    },
    #[error("{backend}: object not found: {url}")]
    NotFound {
        backend: &'static str,
        url: String
    },
    #[error("{backend}: {action} for {url:?}: {source}")]
    Backend {
        backend: &'static str,
        action: String,
        url: String,
        #[source]
        source: BoxError
    },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Operation deadline exceeded")]
    DeadlineExceeded
}

impl StorageError {
    pub fn configuration(backend: &'static str, message: impl Into<String>) -> StorageError {
        StorageError::Configuration {
            backend,
            message: message.into()
        }
    }

    pub fn invalid_address(backend: &'static str, url: &str) -> StorageError {
        StorageError::InvalidAddress {
            backend,
            url: url.to_string()
        }
    }

    pub fn not_found(backend: &'static str, url: &str) -> StorageError {
        StorageError::NotFound {
            backend,
            url: url.to_string()
        }
    }

    pub fn backend(backend: &'static str, action: impl Into<String>, url: &str, source: impl Into<BoxError>) -> StorageError {
        StorageError::Backend {
            backend,
            action: action.into(),
            url: url.to_string(),
            source: source.into()
        }
    }

    /// Converts an I/O failure into a storage error. Failures raised by the
    /// context-aware stream wrappers come back as `Cancelled` or
    /// `DeadlineExceeded` rather than as a backend fault.
    pub fn from_io(backend: &'static str, action: impl Into<String>, url: &str, error: io::Error) -> StorageError {
        match error.get_ref().and_then(|inner| inner.downcast_ref::<ContextError>()) {
            Some(ContextError::Cancelled) => StorageError::Cancelled,
            Some(ContextError::DeadlineExceeded) => StorageError::DeadlineExceeded,
            None => StorageError::backend(backend, action, url, error)
        }
    }

    /// Only transport faults are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Backend { .. })
    }

    /// The code reported to git-lfs in an error message.
    pub fn code(&self) -> i32 {
        match self {
            StorageError::InvalidAddress { .. } => 2,
            StorageError::NotFound { .. } => 3,
            StorageError::Backend { .. } => 4,
            StorageError::Cancelled => 5,
            StorageError::DeadlineExceeded => 6,
            StorageError::Configuration { .. } => 7,
            StorageError::UnsupportedProtocol(_) => 8
        }
    }
}

impl From<ContextError> for StorageError {
    fn from(error: ContextError) -> Self {
        match error {
            ContextError::Cancelled => StorageError::Cancelled,
            ContextError::DeadlineExceeded => StorageError::DeadlineExceeded
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use std::io;

    use super::{ContextError, StorageError};

    #[test]
    fn only_backend_errors_are_retryable() {
        assert!(StorageError::backend("ftp", "connecting", "ftp://host/a", "refused").is_retryable());

        assert!(!StorageError::not_found("ftp", "ftp://host/a").is_retryable());
        assert!(!StorageError::invalid_address("ftp", "ftp://").is_retryable());
        assert!(!StorageError::UnsupportedProtocol("s3://bucket".to_string()).is_retryable());
        assert!(!StorageError::configuration("swift", "missing user").is_retryable());
        assert!(!StorageError::Cancelled.is_retryable());
        assert!(!StorageError::DeadlineExceeded.is_retryable());
    }

    #[test]
    fn io_errors_from_context_wrappers_become_cancellation() {
        let error = io::Error::new(io::ErrorKind::Other, ContextError::Cancelled);
        let converted = StorageError::from_io("swift", "copying file", "swift://c/o", error);
        assert!(matches!(converted, StorageError::Cancelled));

        let error = io::Error::new(io::ErrorKind::TimedOut, ContextError::DeadlineExceeded);
        let converted = StorageError::from_io("swift", "copying file", "swift://c/o", error);
        assert!(matches!(converted, StorageError::DeadlineExceeded));
    }

    #[test]
    fn plain_io_errors_become_backend_errors() {
        let error = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let converted = StorageError::from_io("ftp", "copying file", "ftp://host/a", error);

        assert!(converted.is_retryable());
        assert_eq!(converted.code(), 4);
        assert!(converted.to_string().contains("reset by peer"));
    }
}
