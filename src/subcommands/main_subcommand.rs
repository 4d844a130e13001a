use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgMatches;
use tokio::fs::File;
use tokio::io::BufReader;
use tracing::{info, warn};

use crate::configuration::Configuration;
use crate::git_lfs::{CustomTransferAgent, DownloadEvent, GitLfsParser, InitEvent, ProgressCounter, ProgressReader, ProgressWriter, UploadEvent};
use crate::storage::{new_storage, RetryPolicy, Storage, StorageRetrier, TransferContext};

use super::Subcommand;

/// The transfer agent git-lfs talks to over stdin and stdout.
#[derive(Debug)]
pub struct MainSubcommand {
    storage: Option<Box<dyn Storage>>,
    base_url: String,
    data_dir: PathBuf
}

impl CustomTransferAgent for MainSubcommand {
    #[tracing::instrument(skip(self))]
    async fn init(&mut self, event: &InitEvent) -> Result<()> {
        self.storage()?;

        info!(operation = event.operation.as_str(), remote = event.remote.as_str(), "Agent ready.");
        Ok(())
    }

    #[tracing::instrument(skip(self, ctx, counter))]
    async fn upload(&mut self, ctx: &TransferContext, event: &UploadEvent, counter: &ProgressCounter) -> Result<()> {
        let storage = self.storage()?;
        let url = storage.join(&self.base_url, &event.oid)?;
        info!("Uploading \"{}\" to \"{}\".", event.path, url);

        let file = File::open(&event.path).await
            .with_context(|| format!("Failed to open \"{}\".", event.path))?;
        let mut source = ProgressReader::new(file, counter.clone());

        let object = storage.put(ctx, &url, &mut source).await?;

        info!(size = object.size, "Upload finished.");
        Ok(())
    }

    #[tracing::instrument(skip(self, ctx, counter))]
    async fn download(&mut self, ctx: &TransferContext, event: &DownloadEvent, counter: &ProgressCounter) -> Result<PathBuf> {
        let storage = self.storage()?;
        let target_path = std::path::absolute(self.data_dir.join(&event.oid))
            .context("Failed to determine the download path.")?;
        let url = storage.join(&self.base_url, &event.oid)?;
        info!("Downloading \"{}\" to \"{}\".", url, target_path.display());

        let file = File::create(&target_path).await
            .with_context(|| format!("Failed to create \"{}\".", target_path.display()))?;
        let mut sink = ProgressWriter::new(file, counter.clone());

        let object = storage.get(ctx, &url, &mut sink).await?;

        sink.into_inner().sync_all().await
            .with_context(|| format!("Failed to close \"{}\".", target_path.display()))?;

        info!(size = object.size, "Download finished.");
        Ok(target_path)
    }

    #[tracing::instrument(skip(self))]
    async fn terminate(&mut self) -> Result<()> {
        // Every connection is closed by the call that opened it.

        Ok(())
    }
}

impl Subcommand for MainSubcommand {
    #[tracing::instrument(skip(self, _arg_matches))]
    async fn execute(&mut self, _arg_matches: &ArgMatches) -> Result<()> {
        let configuration = Configuration::load()?;

        let backend = new_storage(&configuration.url, &configuration.storage)
            .context("Failed to create the storage backend.")?;
        self.storage = Some(Box::new(StorageRetrier::new(backend, RetryPolicy::with_max_attempts(configuration.retries))));
        self.base_url = configuration.url;
        self.data_dir = configuration.data_dir;

        tokio::fs::create_dir_all(&self.data_dir).await
            .with_context(|| format!("Failed to create \"{}\".", self.data_dir.display()))?;

        let ctx = TransferContext::new();
        let interrupt = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling the transfer in progress.");
                interrupt.cancel();
            }
        });

        let parser = GitLfsParser::new(self, BufReader::new(tokio::io::stdin()), tokio::io::stdout(), ctx);
        parser.listen().await?;

        Ok(())
    }
}

impl MainSubcommand {
    #[tracing::instrument]
    pub fn new() -> MainSubcommand {
        MainSubcommand {
            storage: None,
            base_url: String::new(),
            data_dir: PathBuf::new()
        }
    }

    pub fn with_storage(storage: Box<dyn Storage>, base_url: &str, data_dir: &Path) -> MainSubcommand {
        MainSubcommand {
            storage: Some(storage),
            base_url: base_url.to_string(),
            data_dir: data_dir.to_path_buf()
        }
    }

    fn storage(&self) -> Result<&dyn Storage> {
        self.storage.as_deref().context("Storage should be configured before the session starts.")
    }
}
