//! Line-delimited JSON messages exchanged with git-lfs.
//! See https://github.com/git-lfs/git-lfs/blob/main/docs/custom-transfers.md

use serde::{Deserialize, Serialize};

use super::error::ProtocolError;

#[derive(Debug, Deserialize)]
struct GenericEvent {
    event: String
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InitEvent {
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub remote: String,
    #[serde(default)]
    pub concurrent: bool,
    #[serde(default)]
    pub concurrenttransfers: u32
}

#[derive(Debug, Deserialize)]
struct TransferFields {
    oid: Option<String>,
    size: Option<u64>,
    path: Option<String>
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    pub oid: String,
    pub size: u64,
    /// Local file to read from.
    pub path: String
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadEvent {
    pub oid: String,
    pub size: u64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Init(InitEvent),
    Upload(UploadEvent),
    Download(DownloadEvent),
    Terminate
}

fn malformed(line: &str, source: serde_json::Error) -> ProtocolError {
    ProtocolError::Malformed {
        line: line.to_string(),
        source
    }
}

fn required(value: Option<String>, event: &'static str, field: &'static str) -> Result<String, ProtocolError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or(ProtocolError::MissingField { event, field })
}

impl Event {
    /// Parses one input line. The `event` field is read first and decides
    /// how the rest of the record is interpreted.
    pub fn parse(line: &str) -> Result<Event, ProtocolError> {
        let generic: GenericEvent = serde_json::from_str(line).map_err(|error| malformed(line, error))?;

        match generic.event.as_str() {
            "init" => Ok(Event::Init(serde_json::from_str(line).map_err(|error| malformed(line, error))?)),
            "upload" => {
                let fields: TransferFields = serde_json::from_str(line).map_err(|error| malformed(line, error))?;

                Ok(Event::Upload(UploadEvent {
                    oid: required(fields.oid, "upload", "oid")?,
                    size: fields.size.unwrap_or_default(),
                    path: required(fields.path, "upload", "path")?
                }))
            },
            "download" => {
                let fields: TransferFields = serde_json::from_str(line).map_err(|error| malformed(line, error))?;

                Ok(Event::Download(DownloadEvent {
                    oid: required(fields.oid, "download", "oid")?,
                    size: fields.size.unwrap_or_default()
                }))
            },
            "terminate" => Ok(Event::Terminate),
            _ => Err(ProtocolError::UnknownEvent(generic.event))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::Init(_) => "init",
            Event::Upload(_) => "upload",
            Event::Download(_) => "download",
            Event::Terminate => "terminate"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub code: i32,
    pub message: String
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Response {
    Progress {
        oid: String,
        #[serde(rename = "bytesSoFar")]
        bytes_so_far: u64,
        #[serde(rename = "bytesSinceLast")]
        bytes_since_last: u64
    },
    Complete {
        oid: String,
        /// Local file of a finished download; empty for uploads.
        path: String
    },
    Error {
        oid: String,
        error: ErrorDetail
    }
}

/// Reply to init: `{}` on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitAck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>
}

/// Anything written to git-lfs, one record per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Ack(InitAck),
    Response(Response)
}
