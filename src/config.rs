use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
struct MediaCatalogFile {
    media: Vec<MediaCatalogFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct MediaCatalogFileEntry {
    name: String,
    path: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
}

/// One configured media asset: its command name, keyboard label, local path and optional file id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEntryConfig {
    pub name: String,
    pub label: String,
    pub path: String,
    pub file_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub log_level: String,
    pub file_id_cache_path: PathBuf,
    pub media_root: PathBuf,
    pub media_entries: Vec<MediaEntryConfig>,
    pub preload_enabled: bool,
    pub preload_chat_id: Option<i64>,
    pub preload_delay_ms: u64,
    pub preload_workers: usize,
    pub preload_queue_capacity: usize,
    pub upload_timeout_seconds: u64,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_optional_i64(name: &str) -> Option<i64> {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<i64>().ok())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// The environment variable that overrides the file id of the media entry called `name`.
pub fn file_id_var_name(name: &str) -> String {
    format!(
        "{}_FILE_ID",
        name.trim().to_uppercase().replace(['-', ' '], "_")
    )
}

fn apply_file_id_overrides<F>(entries: &mut [MediaEntryConfig], lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for entry in entries.iter_mut() {
        let var = file_id_var_name(&entry.name);
        if let Some(file_id) = lookup(&var).and_then(non_empty) {
            info!("File id for media entry {} taken from {}", entry.name, var);
            entry.file_id = Some(file_id);
        }
    }
}

fn load_media_catalog_from_path(path: &Path) -> Vec<MediaEntryConfig> {
    if !path.exists() {
        info!("Media catalog not found at {}", path.display());
        return Vec::new();
    }

    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!("Failed to read media catalog at {}: {}", path.display(), err);
            return Vec::new();
        }
    };

    parse_media_catalog(&raw).unwrap_or_else(|err| {
        warn!("Failed to parse media catalog at {}: {}", path.display(), err);
        Vec::new()
    })
}

fn parse_media_catalog(raw: &str) -> Result<Vec<MediaEntryConfig>> {
    let parsed: MediaCatalogFile = serde_json::from_str(raw)?;
    Ok(parsed
        .media
        .into_iter()
        .map(|entry| MediaEntryConfig {
            label: entry.label.unwrap_or_else(|| entry.name.clone()),
            name: entry.name,
            path: entry.path,
            file_id: entry.file_id.and_then(non_empty),
        })
        .collect())
}

#[derive(Debug, Clone)]
struct BuiltInMediaEnv {
    congratulations_path: String,
    congratulations_file_id: Option<String>,
    monopoly_path: String,
    monopoly_file_id: Option<String>,
}

impl BuiltInMediaEnv {
    fn from_env() -> Self {
        Self {
            congratulations_path: env_string(
                "CONGRATULATIONS_MEDIA_PATH",
                "media/congratulations.mp4",
            ),
            congratulations_file_id: non_empty(env_string("CONGRATULATIONS_FILE_ID", "")),
            monopoly_path: env_string("MONOPOLY_MEDIA_PATH", "media/monopoly.mp4"),
            monopoly_file_id: non_empty(env_string("MONOPOLY_FILE_ID", "")),
        }
    }
}

fn built_in_media_entries(built_in: &BuiltInMediaEnv) -> Vec<MediaEntryConfig> {
    vec![
        MediaEntryConfig {
            name: "congratulations".to_string(),
            label: "🎉 Congratulations".to_string(),
            path: built_in.congratulations_path.clone(),
            file_id: built_in.congratulations_file_id.clone(),
        },
        MediaEntryConfig {
            name: "monopoly".to_string(),
            label: "🎲 Monopoly".to_string(),
            path: built_in.monopoly_path.clone(),
            file_id: built_in.monopoly_file_id.clone(),
        },
    ]
}

fn build_media_entries(path: &Path, built_in: &BuiltInMediaEnv) -> Vec<MediaEntryConfig> {
    let entries = load_media_catalog_from_path(path);
    if !entries.is_empty() {
        info!(
            "Loaded {} media entr(ies) from {}",
            entries.len(),
            path.display()
        );
        return entries;
    }
    info!("Using built-in media entries configured via environment variables");
    built_in_media_entries(built_in)
}

impl Config {
    pub fn load() -> Result<Self> {
        let bot_token = env_string("BOT_TOKEN", "").trim().to_string();
        let media_catalog_path =
            PathBuf::from(env_string("MEDIA_CATALOG_PATH", "media_catalog.json"));
        let mut media_entries =
            build_media_entries(&media_catalog_path, &BuiltInMediaEnv::from_env());
        apply_file_id_overrides(&mut media_entries, |var| env::var(var).ok());

        Ok(Config {
            bot_token,
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            file_id_cache_path: PathBuf::from(env_string(
                "FILE_ID_CACHE_PATH",
                "file-id-cache.properties",
            )),
            media_root: PathBuf::from(env_string("MEDIA_ROOT", ".")),
            media_entries,
            preload_enabled: env_bool("PRELOAD_ENABLED", true),
            preload_chat_id: env_optional_i64("PRELOAD_CHAT_ID"),
            preload_delay_ms: env_u64("PRELOAD_DELAY_MS", 1000),
            preload_workers: env_usize("PRELOAD_WORKERS", 2).max(1),
            preload_queue_capacity: env_usize("PRELOAD_QUEUE_CAPACITY", 10).max(1),
            upload_timeout_seconds: env_u64("UPLOAD_TIMEOUT_SECONDS", 120),
        })
    }

    pub fn preload_delay(&self) -> Duration {
        Duration::from_millis(self.preload_delay_ms)
    }
}
