//! Google Cloud Storage backend (`gs://bucket/path`).

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use object_store::buffered::BufWriter;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::address::{self, BucketPath};
use super::backend::{ByteSink, ByteSource, Storage};
use super::context::TransferContext;
use super::context_io::{ContextReader, ContextWriter};
use super::error::{Result, StorageError};
use super::object::Object;

pub const GS_PROTOCOL: &str = "gs://";

const BACKEND: &str = "googleStorage";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoogleCloudConfig {
    pub disabled: bool,
    /// Service account key file. When unset, application default
    /// credentials are used.
    pub credentials_file: Option<PathBuf>
}

impl GoogleCloudConfig {
    pub fn valid(&self) -> bool {
        !self.disabled
    }
}

#[derive(Debug)]
pub struct GoogleCloud {
    config: GoogleCloudConfig,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>
}

impl GoogleCloud {
    pub fn new(config: GoogleCloudConfig) -> Result<GoogleCloud> {
        if !config.valid() {
            return Err(StorageError::configuration(BACKEND, "backend is disabled"));
        }

        if let Some(path) = &config.credentials_file {
            if !path.is_file() {
                return Err(StorageError::configuration(
                    BACKEND,
                    format!("credentials file {} does not exist", path.display())));
            }
        }

        Ok(GoogleCloud {
            config,
            stores: Mutex::new(HashMap::new())
        })
    }

    /// Serves `bucket` from `store` instead of building a GCS client for it.
    pub fn with_store(bucket: &str, store: Arc<dyn ObjectStore>) -> GoogleCloud {
        let mut stores: HashMap<String, Arc<dyn ObjectStore>> = HashMap::new();
        stores.insert(bucket.to_string(), store);

        GoogleCloud {
            config: GoogleCloudConfig::default(),
            stores: Mutex::new(stores)
        }
    }

    fn parse(&self, url: &str) -> Result<BucketPath> {
        address::parse_bucket_path(BACKEND, GS_PROTOCOL, url)
    }

    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock()
            .map_err(|_| StorageError::backend(BACKEND, "locking client cache", bucket, "poisoned lock"))?;

        if let Some(store) = stores.get(bucket) {
            return Ok(store.clone());
        }

        info!(bucket, "Creating Google Cloud Storage client.");
        let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
        if let Some(path) = &self.config.credentials_file {
            builder = builder.with_service_account_path(path.to_string_lossy());
        }

        let store: Arc<dyn ObjectStore> = Arc::new(builder.build()
            .map_err(|error| StorageError::backend(BACKEND, "creating client", bucket, error))?);
        stores.insert(bucket.to_string(), store.clone());

        Ok(store)
    }

    fn object(bucket: &str, meta: &ObjectMeta) -> Object {
        let name = meta.location.to_string();

        Object {
            url: format!("{}{}/{}", GS_PROTOCOL, bucket, name),
            name,
            etag: meta.e_tag.clone().unwrap_or_default(),
            last_modified: meta.last_modified,
            size: meta.size as u64
        }
    }

    fn map_error(url: &str, action: &str, error: object_store::Error) -> StorageError {
        match error {
            object_store::Error::NotFound { .. } => StorageError::not_found(BACKEND, url),
            error => StorageError::backend(BACKEND, action, url, error)
        }
    }
}

#[async_trait]
impl Storage for GoogleCloud {
    #[tracing::instrument(skip(self, ctx))]
    async fn stat(&self, ctx: &TransferContext, url: &str) -> Result<Object> {
        ctx.check()?;
        let parts = self.parse(url)?;
        if parts.path.is_empty() {
            return Err(StorageError::invalid_address(BACKEND, url));
        }

        let store = self.store(&parts.bucket)?;
        let meta = store.head(&Path::from(parts.path.as_str())).await
            .map_err(|error| GoogleCloud::map_error(url, "calling stat on object", error))?;

        let mut object = GoogleCloud::object(&parts.bucket, &meta);
        object.url = url.to_string();

        Ok(object)
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn list(&self, ctx: &TransferContext, url: &str) -> Result<Vec<Object>> {
        let parts = self.parse(url)?;
        let store = self.store(&parts.bucket)?;

        let prefix = if parts.path.is_empty() {
            None
        }
        else {
            Some(Path::from(parts.path.as_str()))
        };

        let mut objects = Vec::new();
        let mut pages = store.list(prefix.as_ref());
        while let Some(meta) = pages.next().await {
            ctx.check()?;

            let meta = meta.map_err(|error| StorageError::backend(BACKEND, "listing objects", url, error))?;
            if meta.location.as_ref().ends_with('/') {
                debug!(name = meta.location.as_ref(), "Skipping directory placeholder.");
                continue;
            }

            objects.push(GoogleCloud::object(&parts.bucket, &meta));
        }

        // A prefix that names a single object has no children.
        if objects.is_empty() && prefix.is_some() {
            match self.stat(ctx, url).await {
                Ok(object) => objects.push(object),
                Err(StorageError::NotFound { .. }) => {},
                Err(error) => return Err(error)
            }
        }

        debug!(count = objects.len(), "Listed objects.");
        Ok(objects)
    }

    #[tracing::instrument(skip(self, ctx, dest))]
    async fn get(&self, ctx: &TransferContext, url: &str, dest: &mut dyn ByteSink) -> Result<Object> {
        let object = self.stat(ctx, url).await?;
        let parts = self.parse(url)?;
        let store = self.store(&parts.bucket)?;

        let result = store.get(&Path::from(parts.path.as_str())).await
            .map_err(|error| GoogleCloud::map_error(url, "getting object", error))?;

        let body = result.into_stream()
            .map_err(|error| io::Error::new(io::ErrorKind::Other, error));
        let mut reader = ContextReader::new(ctx, StreamReader::new(body));

        let mut writer = ContextWriter::new(ctx, dest);

        tokio::io::copy(&mut reader, &mut writer).await
            .map_err(|error| StorageError::from_io(BACKEND, "copying file", url, error))?;
        writer.flush().await
            .map_err(|error| StorageError::from_io(BACKEND, "flushing file", url, error))?;

        Ok(object)
    }

    #[tracing::instrument(skip(self, ctx, src))]
    async fn put(&self, ctx: &TransferContext, url: &str, src: &mut dyn ByteSource) -> Result<Object> {
        let parts = self.parse(url)?;
        if parts.path.is_empty() {
            return Err(StorageError::invalid_address(BACKEND, url));
        }

        let store = self.store(&parts.bucket)?;
        let mut writer = BufWriter::new(store, Path::from(parts.path.as_str()));
        let mut reader = ContextReader::new(ctx, src);

        let copied = match tokio::io::copy(&mut reader, &mut writer).await {
            Ok(copied) => copied,
            Err(error) => {
                if let Err(abort_error) = writer.abort().await {
                    warn!("Failed to abort upload: {}", abort_error);
                }

                return Err(StorageError::from_io(BACKEND, "uploading object", url, error));
            }
        };

        writer.shutdown().await
            .map_err(|error| StorageError::from_io(BACKEND, "completing upload", url, error))?;
        debug!(copied, "Upload finished.");

        self.stat(ctx, url).await
    }

    fn join(&self, url: &str, path: &str) -> Result<String> {
        self.parse(url)?;

        Ok(address::join(url, path))
    }
}
