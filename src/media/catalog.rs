use std::collections::HashSet;
use std::path::Path;

use tracing::{error, info};

use crate::config::MediaEntryConfig;
use crate::media::descriptor::{MediaDescriptor, MediaHandle, MediaKey};
use crate::media::resolver::StaticHandles;
use crate::media::store::check_storable_key;

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub label: String,
    pub descriptor: MediaDescriptor,
}

/// The statically known media set and the handles configured for it.
#[derive(Debug, Clone, Default)]
pub struct MediaCatalog {
    entries: Vec<CatalogEntry>,
}

impl MediaCatalog {
    /// Builds descriptors and static handles from configuration.
    /// Invalid or duplicate entries are logged and left out.
    pub fn build(configs: &[MediaEntryConfig], media_root: &Path) -> (Self, StaticHandles) {
        let mut entries = Vec::new();
        let mut static_handles = Vec::new();
        let mut seen_keys = HashSet::new();
        let mut seen_names = HashSet::new();

        for config in configs {
            let name = config.name.trim().to_lowercase();
            let path = config.path.trim();
            if name.is_empty() || path.is_empty() {
                error!("Media entry {:?} needs both a name and a path", config.name);
                continue;
            }

            let key = MediaKey::new(path);
            if let Err(reason) = check_storable_key(&key) {
                error!("Media entry {} is misconfigured: {reason}", name);
                continue;
            }
            if !seen_keys.insert(key.clone()) || !seen_names.insert(name.clone()) {
                error!("Duplicate media entry {} ({}) ignored", name, key);
                continue;
            }

            let descriptor = match MediaDescriptor::new(key.clone(), media_root) {
                Ok(descriptor) => descriptor,
                Err(err) => {
                    error!("Media entry {} is misconfigured: {err}", name);
                    continue;
                }
            };

            if let Some(file_id) = config.file_id.as_deref() {
                static_handles.push((key, MediaHandle::new(file_id.trim())));
            }

            let label = if config.label.trim().is_empty() {
                name.clone()
            } else {
                config.label.trim().to_string()
            };
            entries.push(CatalogEntry {
                name,
                label,
                descriptor,
            });
        }

        let static_handles = StaticHandles::new(static_handles);
        info!(
            "Media catalog: {} entr(ies), {} with a configured file id",
            entries.len(),
            static_handles.len()
        );
        (MediaCatalog { entries }, static_handles)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn descriptors(&self) -> Vec<MediaDescriptor> {
        self.entries
            .iter()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    pub fn by_name(&self, name: &str) -> Option<&CatalogEntry> {
        let name = name.trim().to_lowercase();
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn by_label(&self, label: &str) -> Option<&CatalogEntry> {
        let label = label.trim();
        self.entries.iter().find(|entry| entry.label == label)
    }

    pub fn labels(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.label.clone()).collect()
    }
}
