use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use anyhow::anyhow;
use futures_util::FutureExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::ProtocolError;
use super::messages::{DownloadEvent, ErrorDetail, Event, InitAck, Outbound, Response, UploadEvent};
use super::progress_reporter::{ProgressCounter, ProgressObserver, PROGRESS_INTERVAL};
use super::CustomTransferAgent;
use crate::storage::{StorageError, TransferContext};

const GENERIC_ERROR_CODE: i32 = 1;
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingInit,
    Active,
    Terminated
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::AwaitingInit => write!(f, "awaiting init"),
            SessionState::Active => write!(f, "active"),
            SessionState::Terminated => write!(f, "terminated")
        }
    }
}

/// Storage errors keep their own code; anything else is a generic failure.
fn error_detail(error: &anyhow::Error) -> ErrorDetail {
    ErrorDetail {
        code: error.downcast_ref::<StorageError>().map(StorageError::code).unwrap_or(GENERIC_ERROR_CODE),
        message: format!("{:#}", error)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    }
    else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    }
    else {
        "unknown panic".to_string()
    }
}

/// Runs one message handler, turning a panic into an ordinary error.
async fn guarded<T>(handler: impl Future<Output = anyhow::Result<T>>) -> anyhow::Result<T> {
    match AssertUnwindSafe(handler).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(anyhow!("Panic while handling message: {}", panic_message(panic.as_ref())))
    }
}

async fn write_messages<W: AsyncWrite + Unpin>(mut writer: W, mut receiver: Receiver<Outbound>) -> Result<(), ProtocolError> {
    while let Some(message) = receiver.recv().await {
        let mut line = serde_json::to_string(&message).map_err(std::io::Error::from)?;
        line.push('\n');

        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

/// Drives one git-lfs transfer session: reads events line by line, hands
/// transfers to the agent and writes the replies.
pub struct GitLfsParser<'custom_transfer_agent, T: CustomTransferAgent, R> {
    custom_transfer_agent: &'custom_transfer_agent mut T,
    reader: R,
    sender: Sender<Outbound>,
    writer: JoinHandle<Result<(), ProtocolError>>,
    ctx: TransferContext,
    state: SessionState,
    progress_interval: Duration
}

impl<'custom_transfer_agent, T: CustomTransferAgent, R: AsyncBufRead + Unpin> GitLfsParser<'custom_transfer_agent, T, R> {
    /// Must be called on a tokio runtime: output is written by a task of its own.
    pub fn new<W>(custom_transfer_agent: &'custom_transfer_agent mut T, reader: R, writer: W, ctx: TransferContext) -> GitLfsParser<'custom_transfer_agent, T, R>
    where W: AsyncWrite + Unpin + Send + 'static {
        let (sender, receiver) = mpsc::channel(OUTBOUND_CAPACITY);

        GitLfsParser {
            custom_transfer_agent,
            reader,
            sender,
            writer: tokio::spawn(write_messages(writer, receiver)),
            ctx,
            state: SessionState::AwaitingInit,
            progress_interval: PROGRESS_INTERVAL
        }
    }

    pub fn with_progress_interval(mut self, progress_interval: Duration) -> Self {
        self.progress_interval = progress_interval;

        self
    }

    /// Processes events until terminate or end of input, then waits for all
    /// output to be written.
    #[tracing::instrument(skip(self))]
    pub async fn listen(mut self) -> Result<(), ProtocolError> {
        let result = self.run().await;
        if let Err(error) = &result {
            error!("Session aborted: {}", error);
        }

        let GitLfsParser { sender, writer, .. } = self;
        drop(sender);

        let written = match writer.await {
            Ok(written) => written,
            Err(error) => Err(ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::Other, error)))
        };

        result.and(written)
    }

    async fn run(&mut self) -> Result<(), ProtocolError> {
        let mut line = String::new();

        while self.state != SessionState::Terminated {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                info!("Input closed, terminating.");
                self.terminate().await;
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let event = Event::parse(trimmed)?;
            debug!(event = event.name(), "Received event.");
            self.handle(event).await?;
        }

        Ok(())
    }

    async fn handle(&mut self, event: Event) -> Result<(), ProtocolError> {
        match (self.state, event) {
            (_, Event::Terminate) => {
                self.terminate().await;
                Ok(())
            },
            (SessionState::AwaitingInit, Event::Init(init)) => {
                info!(operation = init.operation.as_str(), remote = init.remote.as_str(), "Initializing.");

                match guarded(self.custom_transfer_agent.init(&init)).await {
                    Ok(()) => {
                        self.state = SessionState::Active;
                        self.send(Outbound::Ack(InitAck { error: None })).await
                    },
                    Err(error) => {
                        warn!("Initialization failed: {:#}", error);
                        self.send(Outbound::Ack(InitAck { error: Some(error_detail(&error)) })).await
                    }
                }
            },
            (SessionState::Active, Event::Upload(upload)) => self.upload(upload).await,
            (SessionState::Active, Event::Download(download)) => self.download(download).await,
            (state, event) => Err(ProtocolError::UnexpectedEvent {
                event: event.name(),
                state
            })
        }
    }

    async fn terminate(&mut self) {
        info!("Terminating.");

        if let Err(error) = guarded(self.custom_transfer_agent.terminate()).await {
            warn!("Agent failed to clean up: {:#}", error);
        }

        self.state = SessionState::Terminated;
    }

    async fn upload(&mut self, event: UploadEvent) -> Result<(), ProtocolError> {
        info!(oid = event.oid.as_str(), size = event.size, "Upload requested.");

        let counter = ProgressCounter::new();
        let observer = ProgressObserver::spawn(&self.ctx, &event.oid, counter.clone(), self.sender.clone(), self.progress_interval);
        let result = guarded(self.custom_transfer_agent.upload(&self.ctx, &event, &counter)).await;
        observer.stop().await;

        let response = match result {
            Ok(()) => Response::Complete {
                oid: event.oid,
                path: String::new()
            },
            Err(error) => self.failure(event.oid, &error)
        };

        self.send(Outbound::Response(response)).await
    }

    async fn download(&mut self, event: DownloadEvent) -> Result<(), ProtocolError> {
        info!(oid = event.oid.as_str(), size = event.size, "Download requested.");

        let counter = ProgressCounter::new();
        let observer = ProgressObserver::spawn(&self.ctx, &event.oid, counter.clone(), self.sender.clone(), self.progress_interval);
        let result = guarded(self.custom_transfer_agent.download(&self.ctx, &event, &counter)).await;
        observer.stop().await;

        let response = match result {
            Ok(path) => Response::Complete {
                oid: event.oid,
                path: path.to_string_lossy().to_string()
            },
            Err(error) => self.failure(event.oid, &error)
        };

        self.send(Outbound::Response(response)).await
    }

    fn failure(&self, oid: String, error: &anyhow::Error) -> Response {
        warn!(oid = oid.as_str(), "Transfer failed: {:#}", error);

        Response::Error {
            oid,
            error: error_detail(error)
        }
    }

    async fn send(&self, message: Outbound) -> Result<(), ProtocolError> {
        self.sender.send(message).await.map_err(|_| ProtocolError::OutputClosed)
    }
}
