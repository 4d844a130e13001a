use thiserror::Error;

use super::git_lfs_parser::SessionState;

/// Faults that end a transfer session. Anything that only affects one
/// object is reported to git-lfs instead.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Message stream failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed message {line:?}: {source}")]
    Malformed {
        line: String,
        #[source]
        source: serde_json::Error
    },
    #[error("Unknown event {0:?}")]
    UnknownEvent(String),
    #[error("Unexpected {event} event while {state}")]
    UnexpectedEvent {
        event: &'static str,
        state: SessionState
    },
    #[error("The {event} event is missing the {field} field")]
    MissingField {
        event: &'static str,
        field: &'static str
    },
    #[error("Output stream closed before the session ended")]
    OutputClosed
}
