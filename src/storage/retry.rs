use std::io::SeekFrom;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncSeekExt;
use tracing::{debug, warn};

use super::backend::{ByteSink, ByteSource, Storage};
use super::context::TransferContext;
use super::error::{Result, StorageError};
use super::object::Object;

/// Exponential backoff settings for [`StorageRetrier`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30)
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    fn start(&self) -> Attempts<'_> {
        Attempts {
            policy: self,
            attempt: 1,
            delay: self.initial_delay.min(self.max_delay)
        }
    }
}

/// Retry state for one logical operation.
#[derive(Debug)]
struct Attempts<'policy> {
    policy: &'policy RetryPolicy,
    attempt: u32,
    delay: Duration
}

impl Attempts<'_> {
    /// Decides what to do with a failed attempt. Returns the error when the
    /// operation should not be tried again; otherwise waits out the backoff.
    async fn backoff(&mut self, ctx: &TransferContext, error: StorageError) -> Result<()> {
        if let Some(context_error) = ctx.err() {
            return Err(context_error.into());
        }

        if !error.is_retryable() {
            return Err(error);
        }

        if self.attempt >= self.policy.max_attempts {
            warn!(attempts = self.attempt, "Giving up after repeated failures: {}", error);
            return Err(error);
        }

        warn!(attempt = self.attempt, delay_ms = self.delay.as_millis() as u64, "Storage call failed, retrying: {}", error);

        tokio::select! {
            _ = ctx.cancelled() => return Err(StorageError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        self.advance();

        Ok(())
    }

    fn advance(&mut self) {
        self.attempt += 1;
        self.delay = self.delay.mul_f64(self.policy.multiplier.max(1.0)).min(self.policy.max_delay);
    }
}

/// Wraps a backend and retries transport failures with backoff.
#[derive(Debug)]
pub struct StorageRetrier {
    backend: Box<dyn Storage>,
    policy: RetryPolicy
}

impl StorageRetrier {
    pub fn new(backend: Box<dyn Storage>, policy: RetryPolicy) -> StorageRetrier {
        StorageRetrier {
            backend,
            policy
        }
    }
}

fn rewind_error(error: std::io::Error) -> StorageError {
    StorageError::from_io("retry", "rewinding stream", "", error)
}

#[async_trait]
impl Storage for StorageRetrier {
    #[tracing::instrument(skip(self, ctx))]
    async fn stat(&self, ctx: &TransferContext, url: &str) -> Result<Object> {
        let mut attempts = self.policy.start();

        loop {
            match self.backend.stat(ctx, url).await {
                Ok(object) => return Ok(object),
                Err(error) => attempts.backoff(ctx, error).await?
            }
        }
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn list(&self, ctx: &TransferContext, url: &str) -> Result<Vec<Object>> {
        let mut attempts = self.policy.start();

        loop {
            match self.backend.list(ctx, url).await {
                Ok(objects) => return Ok(objects),
                Err(error) => attempts.backoff(ctx, error).await?
            }
        }
    }

    #[tracing::instrument(skip(self, ctx, dest))]
    async fn get(&self, ctx: &TransferContext, url: &str, dest: &mut dyn ByteSink) -> Result<Object> {
        let mut attempts = self.policy.start();
        let start = dest.stream_position().await.map_err(rewind_error)?;

        loop {
            match self.backend.get(ctx, url, dest).await {
                Ok(object) => return Ok(object),
                Err(error) => attempts.backoff(ctx, error).await?
            }

            debug!(start, "Rewinding destination before the next attempt.");
            dest.seek(SeekFrom::Start(start)).await.map_err(rewind_error)?;
        }
    }

    #[tracing::instrument(skip(self, ctx, src))]
    async fn put(&self, ctx: &TransferContext, url: &str, src: &mut dyn ByteSource) -> Result<Object> {
        let mut attempts = self.policy.start();
        let start = src.stream_position().await.map_err(rewind_error)?;

        loop {
            match self.backend.put(ctx, url, src).await {
                Ok(object) => return Ok(object),
                Err(error) => attempts.backoff(ctx, error).await?
            }

            debug!(start, "Rewinding source before the next attempt.");
            src.seek(SeekFrom::Start(start)).await.map_err(rewind_error)?;
        }
    }

    fn join(&self, url: &str, path: &str) -> Result<String> {
        self.backend.join(url, path)
    }
}
