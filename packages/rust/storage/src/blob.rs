//! Object store client.
//!
//! Blobs are addressed by `(container, blob_name)`. A container may carry path
//! segments (`cps-configuration/Schemas/inv-2025`), which are joined onto the
//! account URL as-is. Failures surface as
//! [`ContentFlowError::PersistenceFailed`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use contentflow_shared::{ByteStream, ContentFlowError, Result, StorageConfig, read_secret_env};
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

/// User-Agent string for object store requests.
const USER_AGENT: &str = concat!("ContentFlow/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Upload and download named payloads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a read stream over a blob. The stream releases its connection when dropped.
    async fn download_stream(&self, container: &str, blob_name: &str) -> Result<ByteStream>;

    /// Write `payload` to the blob, replacing any previous version.
    async fn upload(
        &self,
        container: &str,
        blob_name: &str,
        payload: Bytes,
        content_type: &str,
    ) -> Result<()>;

    /// Download a whole blob into memory.
    async fn download(&self, container: &str, blob_name: &str) -> Result<Bytes> {
        let mut stream = self.download_stream(container, blob_name).await?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Object store client speaking the Azure Blob REST dialect (`GET`/`PUT` on blob URLs).
pub struct HttpBlobStore {
    client: Client,
    account_url: Url,
    sas_token: Option<String>,
}

impl HttpBlobStore {
    /// Build a client from the `[storage]` config section.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ContentFlowError::Network(format!("failed to build HTTP client: {e}")))?;

        let account_url = Url::parse(config.blob_url.trim_end_matches('/')).map_err(|e| {
            ContentFlowError::config(format!("storage.blob_url '{}': {e}", config.blob_url))
        })?;
        if account_url.cannot_be_a_base() {
            return Err(ContentFlowError::config(format!(
                "storage.blob_url '{}' cannot hold blob paths",
                config.blob_url
            )));
        }

        Ok(Self {
            client,
            account_url,
            sas_token: read_secret_env(&config.sas_token_env),
        })
    }

    /// Attach a SAS token explicitly (overrides the env var).
    pub fn with_sas_token(mut self, token: impl Into<String>) -> Self {
        self.sas_token = Some(token.into());
        self
    }

    /// Blob URL with every path segment percent-encoded, so names holding
    /// `#`, `?`, `%` or spaces address the blob they name.
    fn blob_url(&self, container: &str, blob_name: &str) -> Url {
        let mut url = self.account_url.clone();
        let segments = container
            .split('/')
            .chain(blob_name.split('/'))
            .filter(|segment| !segment.is_empty());
        // account_url was checked against cannot_be_a_base in new().
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.set_query(
            self.sas_token
                .as_deref()
                .map(|token| token.trim_start_matches('?'))
                .filter(|token| !token.is_empty()),
        );
        url
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    #[instrument(skip(self))]
    async fn download_stream(&self, container: &str, blob_name: &str) -> Result<ByteStream> {
        let url = self.blob_url(container, blob_name);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                ContentFlowError::PersistenceFailed(format!("{container}/{blob_name}: {e}"))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ContentFlowError::PersistenceFailed(format!(
                "blob not found: {container}/{blob_name}"
            )));
        }
        if !status.is_success() {
            return Err(ContentFlowError::PersistenceFailed(format!(
                "{container}/{blob_name}: HTTP {status}"
            )));
        }

        debug!(content_length = ?response.content_length(), "blob download started");

        let label = format!("{container}/{blob_name}");
        let stream = response
            .bytes_stream()
            .map_err(move |e| ContentFlowError::PersistenceFailed(format!("{label}: {e}")));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn upload(
        &self,
        container: &str,
        blob_name: &str,
        payload: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let url = self.blob_url(container, blob_name);
        let response = self
            .client
            .put(url)
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                ContentFlowError::PersistenceFailed(format!("{container}/{blob_name}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ContentFlowError::PersistenceFailed(format!(
                "upload {container}/{blob_name}: HTTP {status}"
            )));
        }

        debug!("blob uploaded");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// A stored blob in [`MemoryBlobStore`].
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub payload: Bytes,
    pub content_type: String,
}

/// Process-local object store for headless runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<(String, String), StoredBlob>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a stored blob.
    pub async fn get(&self, container: &str, blob_name: &str) -> Option<StoredBlob> {
        self.blobs
            .read()
            .await
            .get(&(container.to_string(), blob_name.to_string()))
            .cloned()
    }

    /// Number of blobs currently held.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn download_stream(&self, container: &str, blob_name: &str) -> Result<ByteStream> {
        let blob = self.get(container, blob_name).await.ok_or_else(|| {
            ContentFlowError::PersistenceFailed(format!("blob not found: {container}/{blob_name}"))
        })?;
        Ok(Box::pin(futures::stream::once(async move { Ok(blob.payload) })))
    }

    async fn upload(
        &self,
        container: &str,
        blob_name: &str,
        payload: Bytes,
        content_type: &str,
    ) -> Result<()> {
        self.blobs.write().await.insert(
            (container.to_string(), blob_name.to_string()),
            StoredBlob {
                payload,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
