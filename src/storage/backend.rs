use std::fmt::Debug;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncSeek, AsyncWrite};

use super::context::TransferContext;
use super::error::Result;
use super::object::Object;

/// A byte stream an object is uploaded from. It must be seekable so a
/// failed attempt can be restarted from the beginning.
pub trait ByteSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ByteSource for T {}

/// A byte stream an object is downloaded into.
pub trait ByteSink: AsyncWrite + AsyncSeek + Send + Unpin {}

impl<T: AsyncWrite + AsyncSeek + Send + Unpin> ByteSink for T {}

/// Access to a remote object store. Addresses are fully qualified and carry
/// the backend's protocol prefix.
#[async_trait]
pub trait Storage: Send + Sync + Debug {
    /// Metadata of the single object at `url`.
    async fn stat(&self, ctx: &TransferContext, url: &str) -> Result<Object>;

    /// Every regular file at or below `url`.
    async fn list(&self, ctx: &TransferContext, url: &str) -> Result<Vec<Object>>;

    /// Copies the object at `url` into `dest`. A failure part way through
    /// leaves whatever was already written in `dest`.
    async fn get(&self, ctx: &TransferContext, url: &str, dest: &mut dyn ByteSink) -> Result<Object>;

    /// Uploads `src` to `url` and returns the freshly stat'ed object.
    async fn put(&self, ctx: &TransferContext, url: &str, src: &mut dyn ByteSource) -> Result<Object>;

    /// Joins a directory address with a subpath. No I/O.
    fn join(&self, url: &str, path: &str) -> Result<String>;
}
