use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::messages::{Outbound, Response};
use crate::storage::TransferContext;

pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Cumulative number of bytes moved by one transfer. Only ever grows, even
/// when a retried transfer rewinds its stream.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter {
    bytes: Arc<AtomicU64>
}

impl ProgressCounter {
    pub fn new() -> ProgressCounter {
        ProgressCounter::default()
    }

    pub fn add(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Counts the bytes read through it.
#[derive(Debug)]
pub struct ProgressReader<R> {
    inner: R,
    counter: ProgressCounter
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, counter: ProgressCounter) -> ProgressReader<R> {
        ProgressReader {
            inner,
            counter
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);

        if let Poll::Ready(Ok(())) = result {
            self.counter.add((buf.filled().len() - before) as u64);
        }

        result
    }
}

impl<R: AsyncSeek + Unpin> AsyncSeek for ProgressReader<R> {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.inner).poll_complete(cx)
    }
}

/// Counts the bytes written through it.
#[derive(Debug)]
pub struct ProgressWriter<W> {
    inner: W,
    counter: ProgressCounter
}

impl<W> ProgressWriter<W> {
    pub fn new(inner: W, counter: ProgressCounter) -> ProgressWriter<W> {
        ProgressWriter {
            inner,
            counter
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let result = Pin::new(&mut self.inner).poll_write(cx, buf);

        if let Poll::Ready(Ok(written)) = result {
            self.counter.add(written as u64);
        }

        result
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<W: AsyncSeek + Unpin> AsyncSeek for ProgressWriter<W> {
    fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.inner).start_seek(position)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.inner).poll_complete(cx)
    }
}

struct Sampler {
    oid: String,
    counter: ProgressCounter,
    sender: Sender<Outbound>,
    last: u64
}

impl Sampler {
    /// Sends one progress record. Returns false once nobody is listening.
    async fn sample(&mut self) -> bool {
        let total = self.counter.get();
        let since_last = total.saturating_sub(self.last);
        self.last = total;

        self.sender.send(Outbound::Response(Response::Progress {
            oid: self.oid.clone(),
            bytes_so_far: total,
            bytes_since_last: since_last
        })).await.is_ok()
    }

    async fn run(mut self, ctx: TransferContext, interval: Duration) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.sample().await {
                        return;
                    }
                }
            }
        }

        if self.counter.get() != self.last {
            self.sample().await;
        }
    }
}

/// Background task that reports a transfer's progress until stopped.
#[derive(Debug)]
pub struct ProgressObserver {
    ctx: TransferContext,
    handle: JoinHandle<()>
}

impl ProgressObserver {
    pub fn spawn(ctx: &TransferContext, oid: &str, counter: ProgressCounter, sender: Sender<Outbound>, interval: Duration) -> ProgressObserver {
        let ctx = ctx.child();
        let sampler = Sampler {
            oid: oid.to_string(),
            counter,
            sender,
            last: 0
        };

        debug!(oid, "Starting progress observer.");
        let handle = tokio::spawn(sampler.run(ctx.clone(), interval));

        ProgressObserver {
            ctx,
            handle
        }
    }

    /// Stops the task and waits until its last record has been queued.
    pub async fn stop(self) {
        self.ctx.cancel();

        if let Err(error) = self.handle.await {
            warn!("Progress observer failed: {}", error);
        }
    }
}
