use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub worker_index: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub content_cache_age_sec: Option<usize>,
    pub socket_timeout_secs: Option<u64>,
    pub virtualized_socket_timeout_secs: Option<u64>,
    /// Human readable size, e.g. "2 GiB".
    pub max_upload_size: Option<String>,
    pub digest_algorithm: Option<String>,
    pub public_hostname: Option<String>,
    pub production_hostname_pattern: Option<String>,

    // Per-partition listeners
    pub public: Option<PartitionFileConfig>,
    pub restricted: Option<PartitionFileConfig>,

    // Feature configs
    pub swift: Option<SwiftFileConfig>,
    pub gc: Option<GcFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PartitionFileConfig {
    pub root: Option<String>,
    pub upload_port: Option<u16>,
    pub download_port: Option<u16>,
    pub upstream_host: Option<String>,
    pub upstream_port: Option<u16>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SwiftFileConfig {
    pub enabled: Option<bool>,
    // Current endpoint: either a pre-authenticated storage URL or TempAuth.
    pub storage_url: Option<String>,
    pub auth_token: Option<String>,
    pub auth_url: Option<String>,
    pub user: Option<String>,
    pub key: Option<String>,
    // Legacy endpoint, read and delete only.
    pub legacy_storage_url: Option<String>,
    pub legacy_auth_token: Option<String>,
    pub legacy_auth_url: Option<String>,
    pub legacy_user: Option<String>,
    pub legacy_key: Option<String>,

    pub timeout_secs: Option<u64>,
    pub feed_workers: Option<usize>,
    pub feed_interval_secs: Option<u64>,
    pub feed_batch_size: Option<usize>,
    /// Human readable size, e.g. "1 GiB".
    pub segment_size: Option<String>,
    pub remove_local_after_migration: Option<bool>,

    // Retry settings
    pub max_retries: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GcFileConfig {
    pub interval_hours: Option<u64>,
    pub grace_period_hours: Option<u64>,
    pub merge_duplicates: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
