//! Byte-stream adapters that observe a [`TransferContext`].
//!
//! Every read or write checks the context before touching the wrapped stream
//! and again afterwards, so a transfer stops at the next chunk after the
//! context is cancelled instead of running until the stream is exhausted.

use std::future::Future;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::sync::WaitForCancellationFutureOwned;

use super::context::{ContextError, TransferContext};

fn context_error(error: ContextError) -> io::Error {
    let kind = match error {
        ContextError::Cancelled => io::ErrorKind::Other,
        ContextError::DeadlineExceeded => io::ErrorKind::TimedOut
    };

    io::Error::new(kind, error)
}

fn check(ctx: &TransferContext) -> io::Result<()> {
    ctx.check().map_err(context_error)
}

/// Streams whose underlying transport accepts an absolute deadline.
pub trait SetDeadline {
    fn set_read_deadline(&self, deadline: Instant) -> io::Result<()>;
    fn set_write_deadline(&self, deadline: Instant) -> io::Result<()>;
}

fn remaining(deadline: Instant) -> Duration {
    // A zero timeout is rejected by the socket API, so an expired deadline
    // becomes the shortest timeout instead.
    deadline.saturating_duration_since(Instant::now()).max(Duration::from_millis(1))
}

impl SetDeadline for TcpStream {
    fn set_read_deadline(&self, deadline: Instant) -> io::Result<()> {
        self.set_read_timeout(Some(remaining(deadline)))
    }

    fn set_write_deadline(&self, deadline: Instant) -> io::Result<()> {
        self.set_write_timeout(Some(remaining(deadline)))
    }
}

/// Applies the context deadline, if any, to both directions of `stream`.
pub fn apply_deadline<D: SetDeadline + ?Sized>(ctx: &TransferContext, stream: &D) -> io::Result<()> {
    if let Some(deadline) = ctx.deadline() {
        stream.set_read_deadline(deadline)?;
        stream.set_write_deadline(deadline)?;
    }

    Ok(())
}

/// Async reader adapter. A pending read is also woken by cancellation.
pub struct ContextReader<R> {
    inner: R,
    ctx: TransferContext,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>
}

impl<R: AsyncRead + Unpin> ContextReader<R> {
    pub fn new(ctx: &TransferContext, inner: R) -> ContextReader<R> {
        ContextReader {
            inner,
            ctx: ctx.clone(),
            cancelled: Box::pin(ctx.cancelled_owned())
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ContextReader<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = &mut *self;

        check(&this.ctx)?;
        if this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(context_error(ContextError::Cancelled)));
        }

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => Poll::Ready(check(&this.ctx)),
            other => other
        }
    }
}

/// Async writer adapter. A pending write is also woken by cancellation.
pub struct ContextWriter<W> {
    inner: W,
    ctx: TransferContext,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>
}

impl<W: AsyncWrite + Unpin> ContextWriter<W> {
    pub fn new(ctx: &TransferContext, inner: W) -> ContextWriter<W> {
        ContextWriter {
            inner,
            ctx: ctx.clone(),
            cancelled: Box::pin(ctx.cancelled_owned())
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ContextWriter<W> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = &mut *self;

        check(&this.ctx)?;
        if this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(context_error(ContextError::Cancelled)));
        }

        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(written)) => Poll::Ready(check(&this.ctx).map(|_| written)),
            other => other
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Blocking reader adapter, for protocol clients that run off the async
/// executor.
pub struct SyncContextReader<R> {
    inner: R,
    ctx: TransferContext
}

impl<R: Read> SyncContextReader<R> {
    pub fn new(ctx: &TransferContext, inner: R) -> SyncContextReader<R> {
        SyncContextReader {
            inner,
            ctx: ctx.clone()
        }
    }
}

impl<R: Read + SetDeadline> SyncContextReader<R> {
    pub fn with_deadline(ctx: &TransferContext, inner: R) -> io::Result<SyncContextReader<R>> {
        if let Some(deadline) = ctx.deadline() {
            inner.set_read_deadline(deadline)?;
        }

        Ok(SyncContextReader::new(ctx, inner))
    }
}

impl<R> SyncContextReader<R> {
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for SyncContextReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        check(&self.ctx)?;
        let read = self.inner.read(buf)?;
        check(&self.ctx)?;

        Ok(read)
    }
}

pub struct SyncContextWriter<W> {
    inner: W,
    ctx: TransferContext
}

impl<W: Write> SyncContextWriter<W> {
    pub fn new(ctx: &TransferContext, inner: W) -> SyncContextWriter<W> {
        SyncContextWriter {
            inner,
            ctx: ctx.clone()
        }
    }
}

impl<W: Write + SetDeadline> SyncContextWriter<W> {
    pub fn with_deadline(ctx: &TransferContext, inner: W) -> io::Result<SyncContextWriter<W>> {
        if let Some(deadline) = ctx.deadline() {
            inner.set_write_deadline(deadline)?;
        }

        Ok(SyncContextWriter::new(ctx, inner))
    }
}

impl<W> SyncContextWriter<W> {
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for SyncContextWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        check(&self.ctx)?;
        let written = self.inner.write(buf)?;
        check(&self.ctx)?;

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
