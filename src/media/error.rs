use thiserror::Error;

use crate::media::descriptor::MediaKey;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to load file id cache from {path}: {reason}")]
    StoreLoadFailed { path: String, reason: String },
    #[error("Failed to write file id cache to {path}: {reason}")]
    StoreWriteFailed { path: String, reason: String },
    #[error("Media asset {0} is not configured")]
    AssetNotConfigured(MediaKey),
    #[error("Upload of {key} failed: {reason}")]
    UploadFailed { key: MediaKey, reason: String },
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaKind(String),
}

impl MediaError {
    pub fn upload_failed(key: &MediaKey, reason: impl ToString) -> Self {
        MediaError::UploadFailed {
            key: key.clone(),
            reason: reason.to_string(),
        }
    }
}
