use std::fmt;
use std::path::{Path, PathBuf};

use crate::media::error::MediaError;
use crate::media::kind::{classify, MediaKind};

/// Logical identifier of a media asset, its relative path inside the media root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MediaKey(String);

impl MediaKey {
    pub fn new(value: impl Into<String>) -> Self {
        MediaKey(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque backend identifier that lets an uploaded asset be re-sent without re-transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle(String);

impl MediaHandle {
    pub fn new(value: impl Into<String>) -> Self {
        MediaHandle(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub key: MediaKey,
    pub location: PathBuf,
    pub file_name: String,
    pub kind: MediaKind,
}

impl MediaDescriptor {
    /// Builds the descriptor for `key`, located relative to `media_root`.
    pub fn new(key: MediaKey, media_root: &Path) -> Result<Self, MediaError> {
        let location = media_root.join(key.as_str());
        let file_name = Path::new(key.as_str())
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.to_string())
            .ok_or_else(|| MediaError::UnsupportedMediaKind(key.to_string()))?;
        let kind = classify(&file_name)?;

        Ok(MediaDescriptor {
            key,
            location,
            file_name,
            kind,
        })
    }
}
