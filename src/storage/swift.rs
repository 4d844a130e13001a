//! OpenStack Swift backend (`swift://container/path`).
//!
//! Uploads are written as Static Large Objects: the source is streamed into
//! fixed-size segments under `<container>_segments` and a manifest ties them
//! together, so objects larger than the cluster's single-object limit work.

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use educe::Educe;
use futures_util::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};

use super::address::{self, BucketPath};
use super::backend::{ByteSink, ByteSource, Storage};
use super::context::TransferContext;
use super::context_io::{ContextReader, ContextWriter};
use super::error::{Result, StorageError};
use super::object::Object;

pub const SWIFT_PROTOCOL: &str = "swift://";

const BACKEND: &str = "swift";

const MB: u64 = 1000 * 1000;
const GB: u64 = 1000 * MB;
pub const DEFAULT_CHUNK_SIZE: u64 = 500 * MB;
const MIN_CHUNK_SIZE: u64 = 100 * MB;
const MAX_CHUNK_SIZE: u64 = 5 * GB;

pub const DEFAULT_MAX_RETRIES: u32 = 20;

const BUFFER_SIZE: usize = 64 * 1024;
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Educe, Clone, PartialEq, Eq)]
#[educe(Debug)]
pub struct SwiftConfig {
    pub disabled: bool,
    pub user_name: String,
    #[educe(Debug(ignore))]
    pub password: String,
    pub auth_url: String,
    pub tenant_name: String,
    pub tenant_id: String,
    pub region_name: String,
    /// Keystone v3 user domain.
    pub domain_name: String,
    /// Segment size for uploads. Clamped to [100 MB, 5 GB]; unset or too
    /// small falls back to 500 MB.
    pub chunk_size_bytes: u64,
    /// How often an idempotent request is re-sent on transport failure.
    pub max_retries: u32
}

impl Default for SwiftConfig {
    fn default() -> Self {
        SwiftConfig {
            disabled: false,
            user_name: String::new(),
            password: String::new(),
            auth_url: String::new(),
            tenant_name: String::new(),
            tenant_id: String::new(),
            region_name: String::new(),
            domain_name: "Default".to_string(),
            chunk_size_bytes: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_MAX_RETRIES
        }
    }
}

impl SwiftConfig {
    pub fn valid(&self) -> bool {
        let required = [
            &self.user_name,
            &self.password,
            &self.auth_url,
            &self.tenant_name,
            &self.tenant_id,
            &self.region_name
        ];

        !self.disabled && required.iter().all(|value| !value.is_empty())
    }

    /// Fills unset fields from the usual OpenStack environment variables.
    pub fn apply_environment(&mut self) {
        fn fill(field: &mut String, names: &[&str]) {
            if !field.is_empty() {
                return;
            }

            if let Some(value) = names.iter().filter_map(|name| std::env::var(name).ok()).find(|value| !value.is_empty()) {
                *field = value;
            }
        }

        fill(&mut self.user_name, &["OS_USERNAME"]);
        fill(&mut self.password, &["OS_PASSWORD"]);
        fill(&mut self.auth_url, &["OS_AUTH_URL"]);
        fill(&mut self.tenant_name, &["OS_TENANT_NAME", "OS_PROJECT_NAME"]);
        fill(&mut self.tenant_id, &["OS_TENANT_ID", "OS_PROJECT_ID"]);
        fill(&mut self.region_name, &["OS_REGION_NAME"]);
        fill(&mut self.domain_name, &["OS_USER_DOMAIN_NAME"]);
    }

    pub fn chunk_size(&self) -> u64 {
        if self.chunk_size_bytes < MIN_CHUNK_SIZE {
            DEFAULT_CHUNK_SIZE
        }
        else {
            self.chunk_size_bytes.min(MAX_CHUNK_SIZE)
        }
    }
}

#[derive(Educe, Clone)]
#[educe(Debug)]
struct SwiftSession {
    storage_url: String,
    #[educe(Debug(ignore))]
    token: String
}

#[derive(Debug, Deserialize)]
struct V2AuthResponse {
    access: V2Access
}

#[derive(Debug, Deserialize)]
struct V2Access {
    token: V2Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<V2Service>
}

#[derive(Debug, Deserialize)]
struct V2Token {
    id: String
}

#[derive(Debug, Deserialize)]
struct V2Service {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<V2Endpoint>
}

#[derive(Debug, Deserialize)]
struct V2Endpoint {
    #[serde(default)]
    region: String,
    #[serde(rename = "publicURL")]
    public_url: String
}

#[derive(Debug, Deserialize)]
struct V3AuthResponse {
    token: V3Token
}

#[derive(Debug, Deserialize)]
struct V3Token {
    #[serde(default)]
    catalog: Vec<V3Service>
}

#[derive(Debug, Deserialize)]
struct V3Service {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<V3Endpoint>
}

#[derive(Debug, Deserialize)]
struct V3Endpoint {
    interface: String,
    #[serde(default)]
    region: String,
    url: String
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    bytes: u64,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    last_modified: String
}

#[derive(Debug, Serialize)]
struct ManifestSegment {
    path: String,
    etag: String,
    size_bytes: u64
}

fn v2_storage_url(response: &V2AuthResponse, region: &str) -> Option<String> {
    response.access.service_catalog.iter()
        .filter(|service| service.service_type == "object-store")
        .flat_map(|service| service.endpoints.iter())
        .find(|endpoint| region.is_empty() || endpoint.region == region)
        .map(|endpoint| endpoint.public_url.clone())
}

fn v3_storage_url(response: &V3AuthResponse, region: &str) -> Option<String> {
    response.token.catalog.iter()
        .filter(|service| service.service_type == "object-store")
        .flat_map(|service| service.endpoints.iter())
        .find(|endpoint| endpoint.interface == "public" && (region.is_empty() || endpoint.region == region))
        .map(|endpoint| endpoint.url.clone())
}

/// Percent-encodes each segment of an object name, keeping separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<String>>()
        .join("/")
}

fn unquote(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn parse_list_timestamp(value: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

/// Whether a listed name is the object at `path` or lies under it as a
/// directory. Directory markers never count.
fn within(path: &str, name: &str) -> bool {
    if name.ends_with('/') {
        return false;
    }

    let directory = path.trim_end_matches('/');
    directory.is_empty()
        || name == path
        || name.strip_prefix(directory).is_some_and(|rest| rest.starts_with('/'))
}

fn object_from_headers(url: &str, name: &str, headers: &HeaderMap) -> Object {
    let header = |name: HeaderName| headers.get(name).and_then(|value| value.to_str().ok());

    Object {
        url: url.to_string(),
        name: name.to_string(),
        etag: header(ETAG).map(unquote).unwrap_or_default(),
        last_modified: header(LAST_MODIFIED)
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|date| date.with_timezone(&Utc))
            .unwrap_or_default(),
        size: header(CONTENT_LENGTH).and_then(|value| value.parse().ok()).unwrap_or_default()
    }
}

fn check_status(response: Response, action: &str, url: &str) -> Result<Response> {
    let status = response.status();

    if status.is_success() {
        Ok(response)
    }
    else if status == StatusCode::NOT_FOUND {
        Err(StorageError::not_found(BACKEND, url))
    }
    else {
        Err(StorageError::backend(BACKEND, action, url, format!("HTTP {}", status)))
    }
}

#[derive(Debug)]
pub struct Swift {
    client: Client,
    config: SwiftConfig,
    chunk_size: u64,
    session: Mutex<Option<SwiftSession>>
}

impl Swift {
    /// Builds the client. Authentication happens on first use.
    pub fn new(config: SwiftConfig) -> Result<Swift> {
        if !config.valid() {
            return Err(StorageError::configuration(BACKEND, "user, password, auth URL, tenant name, tenant ID and region are all required"));
        }

        let client = Client::builder()
            .build()
            .map_err(|error| StorageError::configuration(BACKEND, error.to_string()))?;

        let chunk_size = config.chunk_size();
        info!(chunk_size, "Configured Swift backend.");

        Ok(Swift {
            client,
            config,
            chunk_size,
            session: Mutex::new(None)
        })
    }

    fn parse(&self, url: &str) -> Result<BucketPath> {
        address::parse_bucket_path(BACKEND, SWIFT_PROTOCOL, url)
    }

    fn parse_object(&self, url: &str) -> Result<BucketPath> {
        let parts = self.parse(url)?;
        if parts.path.is_empty() {
            return Err(StorageError::invalid_address(BACKEND, url));
        }

        Ok(parts)
    }

    fn object_url(session: &SwiftSession, container: &str, path: &str) -> String {
        format!("{}/{}/{}", session.storage_url.trim_end_matches('/'), urlencoding::encode(container), encode_path(path))
    }

    fn container_url(session: &SwiftSession, container: &str) -> String {
        format!("{}/{}", session.storage_url.trim_end_matches('/'), urlencoding::encode(container))
    }

    /// Re-sends the request on connection failures and server errors.
    async fn send_retrying<F>(&self, ctx: &TransferContext, action: &str, url: &str, build: F) -> Result<Response>
    where F: Fn() -> RequestBuilder + Send + Sync {
        let mut attempt = 0;

        loop {
            ctx.check()?;

            match build().send().await {
                Ok(response) if response.status().is_server_error() && attempt < self.config.max_retries => {
                    warn!(attempt, status = %response.status(), "Swift server error while {}, retrying.", action);
                },
                Ok(response) => return Ok(response),
                Err(error) if (error.is_connect() || error.is_timeout()) && attempt < self.config.max_retries => {
                    warn!(attempt, "Swift request failed while {}, retrying: {}", action, error);
                },
                Err(error) => return Err(StorageError::backend(BACKEND, action, url, error))
            }

            attempt += 1;
            tokio::select! {
                _ = ctx.cancelled() => return Err(StorageError::Cancelled),
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
        }
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn authenticate(&self, ctx: &TransferContext) -> Result<SwiftSession> {
        let auth_url = self.config.auth_url.trim_end_matches('/');

        if auth_url.ends_with("/v3") {
            info!("Authenticating with Keystone v3.");
            let url = format!("{}/auth/tokens", auth_url);
            let body = json!({
                "auth": {
                    "identity": {
                        "methods": ["password"],
                        "password": {
                            "user": {
                                "name": self.config.user_name,
                                "password": self.config.password,
                                "domain": { "name": self.config.domain_name }
                            }
                        }
                    },
                    "scope": { "project": { "id": self.config.tenant_id } }
                }
            });

            let response = self.send_retrying(ctx, "authenticating", &url, || self.client.post(&url).json(&body)).await?;
            let response = check_status(response, "authenticating", &url)?;

            let token = response.headers().get("x-subject-token")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| StorageError::backend(BACKEND, "authenticating", &url, "no X-Subject-Token in response"))?;
            let auth = response.json::<V3AuthResponse>().await
                .map_err(|error| StorageError::backend(BACKEND, "parsing auth response", &url, error))?;
            let storage_url = v3_storage_url(&auth, &self.config.region_name)
                .ok_or_else(|| StorageError::backend(BACKEND, "authenticating", &url, "no object-store endpoint for region"))?;

            Ok(SwiftSession { storage_url, token })
        }
        else {
            info!("Authenticating with Keystone v2.");
            let url = format!("{}/tokens", auth_url);
            let mut auth = json!({
                "passwordCredentials": {
                    "username": self.config.user_name,
                    "password": self.config.password
                }
            });
            if self.config.tenant_id.is_empty() {
                auth["tenantName"] = json!(self.config.tenant_name);
            }
            else {
                auth["tenantId"] = json!(self.config.tenant_id);
            }
            let body = json!({ "auth": auth });

            let response = self.send_retrying(ctx, "authenticating", &url, || self.client.post(&url).json(&body)).await?;
            let response = check_status(response, "authenticating", &url)?;

            let auth = response.json::<V2AuthResponse>().await
                .map_err(|error| StorageError::backend(BACKEND, "parsing auth response", &url, error))?;
            let storage_url = v2_storage_url(&auth, &self.config.region_name)
                .ok_or_else(|| StorageError::backend(BACKEND, "authenticating", &url, "no object-store endpoint for region"))?;

            Ok(SwiftSession { storage_url, token: auth.access.token.id })
        }
    }

    async fn session(&self, ctx: &TransferContext) -> Result<SwiftSession> {
        let mut session = self.session.lock().await;

        if let Some(session) = session.as_ref() {
            return Ok(session.clone());
        }

        let fresh = self.authenticate(ctx).await?;
        debug!(storage_url = fresh.storage_url.as_str(), "Authenticated.");
        *session = Some(fresh.clone());

        Ok(fresh)
    }

    async fn invalidate_session(&self) {
        *self.session.lock().await = None;
    }

    /// Sends an idempotent request, authenticating again once if the token
    /// was rejected.
    async fn send_authorized<F>(&self, ctx: &TransferContext, action: &str, url: &str, build: F) -> Result<Response>
    where F: Fn(&SwiftSession) -> RequestBuilder + Send + Sync {
        let session = self.session(ctx).await?;
        let response = self.send_retrying(ctx, action, url, || build(&session)).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!("Token rejected, authenticating again.");
        self.invalidate_session().await;
        let session = self.session(ctx).await?;

        self.send_retrying(ctx, action, url, || build(&session)).await
    }

    /// Streams up to `limit` bytes of `reader` into one segment. Returns
    /// `None` once the reader is exhausted.
    async fn put_segment(&self, session: &SwiftSession, segment_url: &str, reader: &mut (dyn AsyncRead + Send + Unpin), limit: u64) -> Result<Option<(String, u64)>> {
        let mut first = vec![0u8; BUFFER_SIZE.min(limit as usize)];
        let read = reader.read(&mut first).await
            .map_err(|error| StorageError::from_io(BACKEND, "reading source", segment_url, error))?;
        if read == 0 {
            return Ok(None);
        }
        first.truncate(read);

        let (sender, receiver) = mpsc::channel::<io::Result<Bytes>>(4);
        let body = futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|chunk| (chunk, receiver))
        });

        let request = self.client.put(segment_url)
            .header("X-Auth-Token", session.token.as_str())
            .body(Body::wrap_stream(body))
            .send();

        let pump = async move {
            let mut sent = read as u64;
            if sender.send(Ok(Bytes::from(first))).await.is_err() {
                return Ok(sent);
            }

            while sent < limit {
                let mut buffer = vec![0u8; BUFFER_SIZE.min((limit - sent) as usize)];
                match reader.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(read) => {
                        buffer.truncate(read);
                        sent += read as u64;
                        if sender.send(Ok(Bytes::from(buffer))).await.is_err() {
                            break;
                        }
                    },
                    Err(error) => {
                        // Fail the request body so the partial segment is not stored.
                        let _ = sender.send(Err(io::Error::new(error.kind(), error.to_string()))).await;
                        return Err(error);
                    }
                }
            }

            Ok(sent)
        };

        let (response, pumped) = tokio::join!(request, pump);
        let sent = pumped.map_err(|error| StorageError::from_io(BACKEND, "reading source", segment_url, error))?;
        let response = response.map_err(|error| StorageError::backend(BACKEND, "uploading segment", segment_url, error))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.invalidate_session().await;
        }
        let response = check_status(response, "uploading segment", segment_url)?;
        let etag = response.headers().get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(unquote)
            .unwrap_or_default();

        Ok(Some((etag, sent)))
    }
}

#[async_trait]
impl Storage for Swift {
    #[tracing::instrument(skip(self, ctx))]
    async fn stat(&self, ctx: &TransferContext, url: &str) -> Result<Object> {
        let parts = self.parse_object(url)?;

        let response = self.send_authorized(ctx, "getting object info", url, |session| {
            self.client.head(Swift::object_url(session, &parts.bucket, &parts.path))
                .header("X-Auth-Token", session.token.as_str())
        }).await?;
        let response = check_status(response, "getting object info", url)?;

        Ok(object_from_headers(url, &parts.path, response.headers()))
    }

    #[tracing::instrument(skip(self, ctx))]
    async fn list(&self, ctx: &TransferContext, url: &str) -> Result<Vec<Object>> {
        let parts = self.parse(url)?;
        let mut objects = Vec::new();
        let mut marker = String::new();

        loop {
            let response = self.send_authorized(ctx, "listing objects by prefix", url, |session| {
                self.client.get(Swift::container_url(session, &parts.bucket))
                    .header("X-Auth-Token", session.token.as_str())
                    .query(&[("format", "json"), ("prefix", parts.path.as_str()), ("marker", marker.as_str())])
            }).await?;
            let response = check_status(response, "listing objects by prefix", url)?;

            let page = response.json::<Vec<ListEntry>>().await
                .map_err(|error| StorageError::backend(BACKEND, "parsing listing", url, error))?;
            let Some(last) = page.last() else {
                break;
            };
            marker = last.name.clone();

            objects.extend(page.into_iter().filter(|entry| within(&parts.path, &entry.name)).map(|entry| Object {
                url: format!("{}{}/{}", SWIFT_PROTOCOL, parts.bucket, entry.name),
                last_modified: parse_list_timestamp(&entry.last_modified),
                etag: entry.hash,
                size: entry.bytes,
                name: entry.name
            }));
        }

        debug!(count = objects.len(), "Listed objects.");
        Ok(objects)
    }

    #[tracing::instrument(skip(self, ctx, dest))]
    async fn get(&self, ctx: &TransferContext, url: &str, dest: &mut dyn ByteSink) -> Result<Object> {
        let object = self.stat(ctx, url).await?;
        let parts = self.parse_object(url)?;

        let response = self.send_authorized(ctx, "initiating download", url, |session| {
            self.client.get(Swift::object_url(session, &parts.bucket, &parts.path))
                .header("X-Auth-Token", session.token.as_str())
        }).await?;
        let response = check_status(response, "initiating download", url)?;

        let body = response.bytes_stream()
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
        let parts = self.parse_object(url)?;
        let segment_container = format!("{}_segments", parts.bucket);

        let response = self.send_authorized(ctx, "creating segment container", url, |session| {
            self.client.put(Swift::container_url(session, &segment_container))
                .header("X-Auth-Token", session.token.as_str())
        }).await?;
        check_status(response, "creating segment container", url)?;

        let started = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let segment_prefix = format!("{}/slo/{}.{:06}/{}", parts.path, started.as_secs(), started.subsec_micros(), self.chunk_size);
        let session = self.session(ctx).await?;

        let mut reader = ContextReader::new(ctx, src);
        let mut manifest = Vec::new();

        loop {
            let segment_name = format!("{}/{:08}", segment_prefix, manifest.len());
            let segment_url = Swift::object_url(&session, &segment_container, &segment_name);

            match self.put_segment(&session, &segment_url, &mut reader, self.chunk_size).await? {
                Some((etag, size)) => {
                    debug!(segment = segment_name.as_str(), size, "Uploaded segment.");
                    manifest.push(ManifestSegment {
                        path: format!("/{}/{}", segment_container, segment_name),
                        etag,
                        size_bytes: size
                    });
                },
                None => break
            }
        }

        if manifest.is_empty() {
            debug!("Empty source, writing a plain object.");
            let response = self.send_authorized(ctx, "creating object", url, |session| {
                self.client.put(Swift::object_url(session, &parts.bucket, &parts.path))
                    .header("X-Auth-Token", session.token.as_str())
                    .body(Vec::new())
            }).await?;
            check_status(response, "creating object", url)?;
        }
        else {
            let body = serde_json::to_vec(&manifest)
                .map_err(|error| StorageError::backend(BACKEND, "encoding manifest", url, error))?;

            let response = self.send_authorized(ctx, "closing upload", url, |session| {
                self.client.put(Swift::object_url(session, &parts.bucket, &parts.path))
                    .header("X-Auth-Token", session.token.as_str())
                    .query(&[("multipart-manifest", "put")])
                    .body(body.clone())
            }).await?;
            check_status(response, "closing upload", url)?;
        }

        self.stat(ctx, url).await
    }

    fn join(&self, url: &str, path: &str) -> Result<String> {
        self.parse(url)?;

        Ok(address::join(url, path))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use axum::body::Bytes;
    use axum::extract::{Path, Query, State};
    use axum::http::{Method, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{any, post};
    use axum::{Json, Router};
    use chrono::{Datelike, Timelike};
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, ETAG, LAST_MODIFIED};
    use serde::Deserialize;
    use serde_json::{json, Value};

    use super::{encode_path, object_from_headers, parse_list_timestamp, v2_storage_url, v3_storage_url, within, Swift, SwiftConfig, V2AuthResponse, V3AuthResponse, DEFAULT_CHUNK_SIZE, GB, MB};
    use crate::storage::{Storage, StorageError, TransferContext};

    #[derive(Debug, Clone)]
    struct Stored {
        content: Vec<u8>,
        etag: String
    }

    #[derive(Debug, Deserialize)]
    struct ManifestEntry {
        path: String,
        etag: String,
        size_bytes: u64
    }

    /// State of the Keystone v2 plus Swift server below.
    #[derive(Debug, Default)]
    struct Cluster {
        storage_url: String,
        /// Token the server accepts. `None` rejects every request.
        token: Option<String>,
        authentications: u32,
        objects: BTreeMap<String, Stored>,
        containers: Vec<String>,
        manifests: BTreeMap<String, Vec<u64>>,
        listings: u32
    }

    type Shared = Arc<Mutex<Cluster>>;

    async fn authenticate(State(cluster): State<Shared>, Json(body): Json<Value>) -> Response {
        if body["auth"]["passwordCredentials"]["password"] != "secret" {
            return StatusCode::UNAUTHORIZED.into_response();
        }

        let mut cluster = cluster.lock().unwrap();
        cluster.authentications += 1;
        let token = format!("token-{}", cluster.authentications);
        cluster.token = Some(token.clone());

        Json(json!({
            "access": {
                "token": { "id": token },
                "serviceCatalog": [
                    { "type": "object-store", "endpoints": [{ "region": "RegionOne", "publicURL": cluster.storage_url }] }
                ]
            }
        })).into_response()
    }

    async fn storage(State(cluster): State<Shared>, method: Method, Path(path): Path<String>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap, body: Bytes) -> Response {
        let mut cluster = cluster.lock().unwrap();
        let token = headers.get("x-auth-token").and_then(|value| value.to_str().ok());
        if token.is_none() || token != cluster.token.as_deref() {
            return StatusCode::UNAUTHORIZED.into_response();
        }

        let path = path.trim_start_matches('/').to_string();
        let Some((container, name)) = path.split_once('/') else {
            return match method {
                Method::PUT => {
                    cluster.containers.push(path);
                    StatusCode::CREATED.into_response()
                },
                _ => {
                    cluster.listings += 1;
                    let prefix = format!("{}/{}", path, query.get("prefix").cloned().unwrap_or_default());
                    let marker = format!("{}/{}", path, query.get("marker").cloned().unwrap_or_default());
                    let page: Vec<Value> = cluster.objects.iter()
                        .filter(|(key, _)| key.starts_with(&prefix) && key.as_str() > marker.as_str())
                        .take(2)
                        .map(|(key, stored)| json!({
                            "name": &key[path.len() + 1..],
                            "bytes": stored.content.len(),
                            "hash": stored.etag,
                            "last_modified": "2024-01-02T03:04:05.000000"
                        }))
                        .collect();
                    Json(page).into_response()
                }
            };
        };
        let key = format!("{}/{}", container, name);

        match method {
            Method::PUT if query.get("multipart-manifest").map(String::as_str) == Some("put") => {
                let Ok(entries) = serde_json::from_slice::<Vec<ManifestEntry>>(&body) else {
                    return StatusCode::BAD_REQUEST.into_response();
                };

                let mut content = Vec::new();
                for entry in &entries {
                    match cluster.objects.get(entry.path.trim_start_matches('/')) {
                        Some(segment) if segment.etag == entry.etag && segment.content.len() as u64 == entry.size_bytes => content.extend_from_slice(&segment.content),
                        _ => return StatusCode::BAD_REQUEST.into_response()
                    }
                }

                cluster.manifests.insert(key.clone(), entries.iter().map(|entry| entry.size_bytes).collect());
                cluster.objects.insert(key, Stored { content, etag: "manifest".to_string() });
                StatusCode::CREATED.into_response()
            },
            Method::PUT => {
                let etag = format!("etag-{}", cluster.objects.len());
                cluster.objects.insert(key, Stored { content: body.to_vec(), etag: etag.clone() });
                (StatusCode::CREATED, [("etag", format!("\"{}\"", etag))]).into_response()
            },
            Method::GET | Method::HEAD => match cluster.objects.get(&key) {
                Some(stored) => ([("etag", stored.etag.clone())], stored.content.clone()).into_response(),
                None => StatusCode::NOT_FOUND.into_response()
            },
            _ => StatusCode::METHOD_NOT_ALLOWED.into_response()
        }
    }

    /// Starts the server and returns a client for it with a tiny segment size.
    async fn start_cluster(chunk_size: u64) -> (Swift, Shared) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let cluster: Shared = Arc::new(Mutex::new(Cluster {
            storage_url: format!("http://127.0.0.1:{}/v1/AUTH_test", port),
            ..Cluster::default()
        }));

        let app = Router::new()
            .route("/v2.0/tokens", post(authenticate))
            .route("/v1/AUTH_test/*path", any(storage))
            .with_state(cluster.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut swift = Swift::new(SwiftConfig {
            auth_url: format!("http://127.0.0.1:{}/v2.0", port),
            ..full_config()
        }).unwrap();
        swift.chunk_size = chunk_size;

        (swift, cluster)
    }

    fn store(cluster: &Shared, key: &str, content: &[u8]) {
        cluster.lock().unwrap().objects.insert(key.to_string(), Stored { content: content.to_vec(), etag: format!("hash-{}", key) });
    }

    fn full_config() -> SwiftConfig {
        SwiftConfig {
            user_name: "user".to_string(),
            password: "secret".to_string(),
            auth_url: "https://keystone.example.com/v3".to_string(),
            tenant_name: "project".to_string(),
            tenant_id: "0123".to_string(),
            region_name: "RegionOne".to_string(),
            ..SwiftConfig::default()
        }
    }

    #[test]
    fn complete_config_is_valid() {
        assert!(full_config().valid());
    }

    #[test]
    fn partial_config_is_invalid() {
        let mut config = full_config();
        config.tenant_id.clear();
        assert!(!config.valid());

        let mut config = full_config();
        config.password.clear();
        assert!(!config.valid());

        assert!(matches!(Swift::new(config), Err(StorageError::Configuration { .. })));
    }

    #[test]
    fn disabled_config_is_invalid() {
        let mut config = full_config();
        config.disabled = true;

        assert!(!config.valid());
    }

    #[test]
    fn password_is_not_printed() {
        let printed = format!("{:?}", full_config());

        assert!(printed.contains("user"));
        assert!(!printed.contains("secret"));
    }

    #[test]
    fn chunk_size_is_clamped() {
        let mut config = full_config();

        config.chunk_size_bytes = 0;
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);

        config.chunk_size_bytes = 10 * MB;
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);

        config.chunk_size_bytes = 100 * MB;
        assert_eq!(config.chunk_size(), 100 * MB);

        config.chunk_size_bytes = 2 * GB;
        assert_eq!(config.chunk_size(), 2 * GB);

        config.chunk_size_bytes = 50 * GB;
        assert_eq!(config.chunk_size(), 5 * GB);
    }

    #[test]
    fn join_and_address_validation() {
        let swift = Swift::new(full_config()).unwrap();

        assert_eq!(swift.join("swift://container/lfs/", "abc").unwrap(), "swift://container/lfs/abc");
        assert!(matches!(swift.join("gs://container", "abc"), Err(StorageError::UnsupportedProtocol(_))));
        assert!(matches!(swift.join("swift://", "abc"), Err(StorageError::InvalidAddress { .. })));
    }

    #[test]
    fn listing_keeps_only_the_object_and_its_children() {
        assert!(within("lfs/a", "lfs/a"));
        assert!(within("lfs/a", "lfs/a/x"));
        assert!(!within("lfs/a", "lfs/ab"));
        assert!(!within("lfs/a", "lfs/a/"));
        assert!(within("lfs/a/", "lfs/a/x"));
        assert!(within("", "anything/at/all"));
        assert!(!within("", "marker/"));
    }

    #[test]
    fn object_names_are_encoded_per_segment() {
        assert_eq!(encode_path("dir/with space/obj#1"), "dir/with%20space/obj%231");
    }

    #[test]
    fn stat_headers_become_object() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1234"));
        headers.insert(ETAG, HeaderValue::from_static("\"d41d8cd98f00b204e9800998ecf8427e\""));
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));

        let object = object_from_headers("swift://c/lfs/abc", "lfs/abc", &headers);

        assert_eq!(object.size, 1234);
        assert_eq!(object.etag, "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(object.last_modified.year(), 2015);
        assert_eq!(object.last_modified.hour(), 7);
        assert_eq!(object.name, "lfs/abc");
    }

    #[test]
    fn listing_timestamps_parse_without_zone() {
        let parsed = parse_list_timestamp("2016-03-04T05:06:07.123456");

        assert_eq!(parsed.year(), 2016);
        assert_eq!(parsed.second(), 7);
    }

    #[test]
    fn v2_catalog_picks_region() {
        let response: V2AuthResponse = serde_json::from_str(r#"{
            "access": {
                "token": { "id": "tok" },
                "serviceCatalog": [
                    { "type": "compute", "endpoints": [{ "region": "RegionOne", "publicURL": "https://nova" }] },
                    { "type": "object-store", "endpoints": [
                        { "region": "RegionTwo", "publicURL": "https://swift-two/v1/AUTH_x" },
                        { "region": "RegionOne", "publicURL": "https://swift-one/v1/AUTH_x" }
                    ] }
                ]
            }
        }"#).unwrap();

        assert_eq!(v2_storage_url(&response, "RegionOne").as_deref(), Some("https://swift-one/v1/AUTH_x"));
        assert_eq!(v2_storage_url(&response, "Nowhere"), None);
    }

    #[test]
    fn v3_catalog_picks_public_interface() {
        let response: V3AuthResponse = serde_json::from_str(r#"{
            "token": {
                "catalog": [
                    { "type": "object-store", "endpoints": [
                        { "interface": "internal", "region": "RegionOne", "url": "https://internal" },
                        { "interface": "public", "region": "RegionOne", "url": "https://public" }
                    ] }
                ]
            }
        }"#).unwrap();

        assert_eq!(v3_storage_url(&response, "RegionOne").as_deref(), Some("https://public"));
    }

    #[tokio::test]
    async fn put_writes_segments_and_manifest() {
        let (swift, cluster) = start_cluster(4).await;
        let ctx = TransferContext::new();

        let mut source = Cursor::new(b"0123456789".to_vec());
        let object = swift.put(&ctx, "swift://c/lfs/abc", &mut source).await.unwrap();

        assert_eq!(object.size, 10);
        assert_eq!(object.name, "lfs/abc");
        {
            let cluster = cluster.lock().unwrap();
            assert_eq!(cluster.manifests.get("c/lfs/abc"), Some(&vec![4, 4, 2]));
            assert!(cluster.containers.contains(&"c_segments".to_string()));
            assert_eq!(cluster.objects.keys().filter(|key| key.starts_with("c_segments/lfs/abc/slo/")).count(), 3);
        }

        let mut sink = Cursor::new(Vec::new());
        let got = swift.get(&ctx, "swift://c/lfs/abc", &mut sink).await.unwrap();

        assert_eq!(got.size, 10);
        assert_eq!(sink.into_inner(), b"0123456789".to_vec());
    }

    #[tokio::test]
    async fn empty_source_writes_plain_object() {
        let (swift, cluster) = start_cluster(4).await;

        let mut source = Cursor::new(Vec::new());
        let object = swift.put(&TransferContext::new(), "swift://c/lfs/empty", &mut source).await.unwrap();

        assert_eq!(object.size, 0);
        let cluster = cluster.lock().unwrap();
        assert!(cluster.manifests.is_empty());
        assert_eq!(cluster.objects.get("c/lfs/empty").map(|stored| stored.content.len()), Some(0));
    }

    #[tokio::test]
    async fn list_pages_and_filters_by_path() {
        let (swift, cluster) = start_cluster(4).await;
        for key in ["c/lfs/a", "c/lfs/a/", "c/lfs/a/x", "c/lfs/a/y", "c/lfs/ab", "c/other"] {
            store(&cluster, key, b"data");
        }

        let objects = swift.list(&TransferContext::new(), "swift://c/lfs/a").await.unwrap();

        let names: Vec<&str> = objects.iter().map(|object| object.name.as_str()).collect();
        assert_eq!(names, vec!["lfs/a", "lfs/a/x", "lfs/a/y"]);
        assert_eq!(objects[1].url, "swift://c/lfs/a/x");
        assert_eq!(objects[1].size, 4);
        assert_eq!(objects[1].etag, "hash-c/lfs/a/x");
        assert_eq!(objects[1].last_modified.year(), 2024);
        assert!(cluster.lock().unwrap().listings > 2);
    }

    #[tokio::test]
    async fn rejected_token_authenticates_again() {
        let (swift, cluster) = start_cluster(4).await;
        store(&cluster, "c/lfs/abc", b"abc");
        let ctx = TransferContext::new();

        swift.stat(&ctx, "swift://c/lfs/abc").await.unwrap();
        cluster.lock().unwrap().token = Some("rotated".to_string());

        let object = swift.stat(&ctx, "swift://c/lfs/abc").await.unwrap();

        assert_eq!(object.size, 3);
        assert_eq!(cluster.lock().unwrap().authentications, 2);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (swift, _cluster) = start_cluster(4).await;

        let mut sink = Cursor::new(Vec::new());
        let error = swift.get(&TransferContext::new(), "swift://c/lfs/missing", &mut sink).await.unwrap_err();

        assert!(matches!(error, StorageError::NotFound { .. }));
        assert!(sink.into_inner().is_empty());
    }
}
