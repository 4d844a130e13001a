use std::path::PathBuf;

use anyhow::Result;

use super::messages::{DownloadEvent, InitEvent, UploadEvent};
use super::progress_reporter::ProgressCounter;
use crate::storage::TransferContext;

/// The transfer work behind a git-lfs session. Errors from upload and
/// download are reported for the one object and the session carries on.
pub trait CustomTransferAgent {
    async fn init(&mut self, event: &InitEvent) -> Result<()>;

    /// Sends the local file to the remote store, adding every byte read to
    /// `counter`.
    async fn upload(&mut self, ctx: &TransferContext, event: &UploadEvent, counter: &ProgressCounter) -> Result<()>;

    /// Fetches the object into a local file and returns its absolute path.
    async fn download(&mut self, ctx: &TransferContext, event: &DownloadEvent, counter: &ProgressCounter) -> Result<PathBuf>;

    async fn terminate(&mut self) -> Result<()>;
}
