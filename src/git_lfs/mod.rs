mod custom_transfer_agent;
mod error;
mod git_lfs_parser;
mod messages;
mod progress_reporter;

pub use custom_transfer_agent::CustomTransferAgent;
pub use error::ProtocolError;
pub use git_lfs_parser::GitLfsParser;
pub use messages::{DownloadEvent, InitEvent, UploadEvent};
pub use progress_reporter::{ProgressCounter, ProgressReader, ProgressWriter};
