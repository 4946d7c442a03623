//! Moving artifact payloads in and out of the object store.
//!
//! Artifacts live at `{process_id}/{name}` inside the process container.

use async_trait::async_trait;
use bytes::Bytes;
use contentflow_shared::{ArtifactFile, ByteStream, Result};

use crate::blob::BlobStore;

/// Content type written for JSON artifacts.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Store transfers for an [`ArtifactFile`].
#[async_trait]
pub trait ArtifactTransfer {
    /// Open a read stream over the artifact's payload.
    async fn download_stream(&self, store: &dyn BlobStore, container: &str) -> Result<ByteStream>;

    /// Download the payload and decode it as UTF-8 text.
    async fn download_text(&self, store: &dyn BlobStore, container: &str) -> Result<String>;

    /// Upload raw bytes and record their size and content type on the artifact.
    async fn upload_bytes(
        &mut self,
        store: &dyn BlobStore,
        container: &str,
        payload: Bytes,
        content_type: &str,
    ) -> Result<()>;

    /// Upload a JSON document.
    async fn upload_json_text(
        &mut self,
        store: &dyn BlobStore,
        container: &str,
        text: String,
    ) -> Result<()>;
}

#[async_trait]
impl ArtifactTransfer for ArtifactFile {
    async fn download_stream(&self, store: &dyn BlobStore, container: &str) -> Result<ByteStream> {
        store.download_stream(container, &self.blob_name()).await
    }

    async fn download_text(&self, store: &dyn BlobStore, container: &str) -> Result<String> {
        let bytes = store.download(container, &self.blob_name()).await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            contentflow_shared::ContentFlowError::PersistenceFailed(format!(
                "{}: payload is not UTF-8: {e}",
                self.blob_name()
            ))
        })
    }

    async fn upload_bytes(
        &mut self,
        store: &dyn BlobStore,
        container: &str,
        payload: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let size = payload.len() as u64;
        store
            .upload(container, &self.blob_name(), payload, content_type)
            .await?;
        self.size = Some(size);
        self.mime_type = Some(content_type.to_string());
        tracing::debug!(blob = %self.blob_name(), size, "artifact uploaded");
        Ok(())
    }

    async fn upload_json_text(
        &mut self,
        store: &dyn BlobStore,
        container: &str,
        text: String,
    ) -> Result<()> {
        self.upload_bytes(store, container, Bytes::from(text), JSON_CONTENT_TYPE)
            .await
    }
}
