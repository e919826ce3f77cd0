use std::sync::Arc;

use tracing::{info, warn};

use crate::media::descriptor::{MediaDescriptor, MediaHandle};
use crate::media::error::MediaError;
use crate::media::store::HandleStore;
use crate::media::transport::MediaTransport;
use crate::utils::timing::log_upload_timing;

/// Uploads local assets and writes the resulting handle through to the store.
pub struct UploadPipeline {
    transport: Arc<dyn MediaTransport>,
    store: Arc<HandleStore>,
}

impl UploadPipeline {
    pub fn new(transport: Arc<dyn MediaTransport>, store: Arc<HandleStore>) -> Self {
        Self { transport, store }
    }

    /// Uploads the asset to `chat_id` and records its handle.
    ///
    /// Nothing is written to the store unless the backend returned a handle.
    pub async fn upload(
        &self,
        descriptor: &MediaDescriptor,
        chat_id: i64,
    ) -> Result<MediaHandle, MediaError> {
        let key = &descriptor.key;
        let bytes = tokio::fs::read(&descriptor.location).await.map_err(|err| {
            MediaError::upload_failed(
                key,
                format!("cannot read {}: {err}", descriptor.location.display()),
            )
        })?;

        info!(
            "Uploading {} ({}, {} bytes) to chat {}",
            key,
            descriptor.kind,
            bytes.len(),
            chat_id
        );

        let handle = log_upload_timing(key.as_str(), descriptor.kind, || {
            self.transport
                .upload_media(chat_id, bytes, &descriptor.file_name, descriptor.kind)
        })
        .await
        .map_err(|err| MediaError::upload_failed(key, err))?
        .ok_or_else(|| MediaError::upload_failed(key, "response carried no media handle"))?;

        if let Err(err) = self.store.put(key.clone(), handle.clone()).await {
            warn!("File id for {} was not saved: {err}", key);
        }

        Ok(handle)
    }
}
