use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::media::descriptor::{MediaDescriptor, MediaHandle, MediaKey};
use crate::media::error::MediaError;

pub type HandleEntries = BTreeMap<MediaKey, MediaHandle>;

/// Persistence behind the handle store. Implementations do blocking I/O.
pub trait HandleBackend: Send + Sync {
    fn describe(&self) -> String;

    /// Returns every persisted entry. A store that was never written is empty, not an error.
    fn load(&self) -> Result<HandleEntries, MediaError>;

    /// Replaces the persisted state with `entries` and returns once it is durable.
    fn persist(&self, entries: &HandleEntries) -> Result<(), MediaError>;
}

/// Flat `key=value` text file, rewritten in full on every persist.
#[derive(Debug, Clone)]
pub struct FileHandleBackend {
    path: PathBuf,
}

impl FileHandleBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load_error(&self, reason: impl ToString) -> MediaError {
        MediaError::StoreLoadFailed {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn write_error(&self, reason: impl ToString) -> MediaError {
        MediaError::StoreWriteFailed {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl HandleBackend for FileHandleBackend {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<HandleEntries, MediaError> {
        let raw = match fs::read(&self.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("File id cache {} not found, starting empty", self.path.display());
                return Ok(HandleEntries::new());
            }
            Err(err) => return Err(self.load_error(err)),
        };

        let (entries, skipped) = parse_entries(&raw);
        if skipped > 0 {
            warn!(
                "Skipped {} malformed line(s) in file id cache {}",
                skipped,
                self.path.display()
            );
        }
        Ok(entries)
    }

    fn persist(&self, entries: &HandleEntries) -> Result<(), MediaError> {
        let content = format_entries(entries).map_err(|reason| self.write_error(reason))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| self.write_error(err))?;
            }
        }

        let temp_path = self.temp_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|err| self.write_error(err))?;
        file.write_all(content.as_bytes())
            .map_err(|err| self.write_error(err))?;
        file.sync_all().map_err(|err| self.write_error(err))?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|err| self.write_error(err))?;
        sync_parent_dir(&self.path);
        Ok(())
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if let Err(err) = File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!("Failed to sync directory {}: {err}", parent.display());
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Parses `key=value` lines. Returns the entries and the number of lines that did not parse.
pub fn parse_entries(raw: &str) -> (HandleEntries, usize) {
    let mut entries = HandleEntries::new();
    let mut skipped = 0;

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            skipped += 1;
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            skipped += 1;
            continue;
        }
        entries.insert(MediaKey::new(key), MediaHandle::new(value));
    }

    (entries, skipped)
}

/// Rejects keys the `key=value` line format cannot hold.
pub fn check_storable_key(key: &MediaKey) -> Result<(), String> {
    let key = key.as_str();
    if key.trim().is_empty()
        || key.contains(['=', '\n', '\r'])
        || key.trim_start().starts_with(['#', '!'])
    {
        return Err(format!("media key {key:?} cannot be stored"));
    }
    Ok(())
}

fn check_storable(key: &MediaKey, handle: &MediaHandle) -> Result<(), String> {
    check_storable_key(key)?;
    if handle.as_str().contains(['\n', '\r']) {
        return Err(format!("media handle for {:?} cannot be stored", key.as_str()));
    }
    Ok(())
}

fn format_entries(entries: &HandleEntries) -> Result<String, String> {
    let mut content = format!("# Telegram file id cache\n# {}\n", Utc::now().to_rfc3339());
    for (key, handle) in entries {
        check_storable(key, handle)?;
        content.push_str(key.as_str().trim());
        content.push('=');
        content.push_str(handle.as_str().trim());
        content.push('\n');
    }
    Ok(content)
}

/// Media key to media handle mapping, loaded once and written through on every `put`.
pub struct HandleStore {
    backend: Arc<dyn HandleBackend>,
    entries: RwLock<HandleEntries>,
    write_gate: tokio::sync::Mutex<()>,
}

impl HandleStore {
    /// Loads the persisted mapping. Load failures degrade to an empty store.
    pub fn open(backend: Arc<dyn HandleBackend>) -> Self {
        let entries = match backend.load() {
            Ok(entries) => {
                info!(
                    "Loaded {} file id(s) from {}",
                    entries.len(),
                    backend.describe()
                );
                entries
            }
            Err(err) => {
                warn!("{err}; continuing with an empty file id cache");
                HandleEntries::new()
            }
        };

        HandleStore {
            backend,
            entries: RwLock::new(entries),
            write_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn get(&self, key: &MediaKey) -> Option<MediaHandle> {
        self.entries
            .read()
            .get(key)
            .filter(|handle| !handle.is_empty())
            .cloned()
    }

    pub fn has_handle(&self, key: &MediaKey) -> bool {
        self.get(key).is_some()
    }

    /// Whether the local asset behind `descriptor` is present and readable.
    pub fn exists(&self, descriptor: &MediaDescriptor) -> bool {
        match fs::metadata(&descriptor.location) {
            Ok(meta) if meta.is_file() => File::open(&descriptor.location).is_ok(),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Records `handle` for `key` and flushes the whole mapping to the backend.
    ///
    /// Writes are serialized. A key or handle the file format cannot hold is rejected
    /// before it reaches memory. Otherwise the in-memory view is updated even when the flush fails.
    pub async fn put(&self, key: MediaKey, handle: MediaHandle) -> Result<(), MediaError> {
        if let Err(reason) = check_storable(&key, &handle) {
            return Err(MediaError::StoreWriteFailed {
                path: self.backend.describe(),
                reason,
            });
        }

        let _gate = self.write_gate.lock().await;

        let snapshot = {
            let mut entries = self.entries.write();
            entries.insert(key.clone(), handle.clone());
            entries.clone()
        };

        let backend = Arc::clone(&self.backend);
        let result = tokio::task::spawn_blocking(move || backend.persist(&snapshot))
            .await
            .unwrap_or_else(|err| {
                Err(MediaError::StoreWriteFailed {
                    path: self.backend.describe(),
                    reason: format!("persist task failed: {err}"),
                })
            });

        match result {
            Ok(()) => {
                info!("Saved file id for {}: {}", key, handle);
                Ok(())
            }
            Err(err) => {
                error!("{err}");
                Err(err)
            }
        }
    }
}
