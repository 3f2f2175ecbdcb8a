mod file_config;

pub use file_config::{FileConfig, GcFileConfig, PartitionFileConfig, SwiftFileConfig};

use crate::partition::Partition;
use crate::server::RequestsLoggingLevel;
use crate::storage::DigestAlgorithm;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PRODUCTION_HOSTNAME_PATTERN: &str = r"(^|\.)launchpadlibrarian\.net$";

const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub worker_index: u16,
    /// `worker_index` already applied.
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,
    pub public_hostname: Option<String>,
    pub public_upstream: Option<String>,
    pub restricted_upstream: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub worker_index: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,
    pub socket_timeout_secs: u64,
    pub virtualized_socket_timeout_secs: u64,
    pub max_upload_size: Option<u64>,
    pub digest_algorithm: DigestAlgorithm,
    pub public_hostname: String,
    pub production_hostname_pattern: String,

    pub public: PartitionSettings,
    pub restricted: PartitionSettings,

    // Feature configs (with defaults)
    pub swift: SwiftSettings,
    pub gc: GcSettings,
}

#[derive(Debug, Clone)]
pub struct PartitionSettings {
    pub partition: Partition,
    pub root: PathBuf,
    /// Final port, `worker_index` already applied.
    pub upload_port: u16,
    pub download_port: u16,
    /// `host:port` of the librarian to fall back to on a local miss.
    pub upstream: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwiftCredentials {
    /// Pre-authenticated storage URL and token.
    Static {
        storage_url: String,
        auth_token: String,
    },
    /// v1 TempAuth, token fetched on demand.
    TempAuth {
        auth_url: String,
        user: String,
        key: String,
    },
}

#[derive(Debug, Clone)]
pub struct SwiftSettings {
    pub enabled: bool,
    pub current: Option<SwiftCredentials>,
    pub legacy: Option<SwiftCredentials>,
    pub timeout_secs: u64,
    pub feed_workers: usize,
    pub feed_interval_secs: u64,
    pub feed_batch_size: usize,
    pub segment_size: u64,
    pub remove_local_after_migration: bool,
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl Default for SwiftSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            current: None,
            legacy: None,
            timeout_secs: 30,
            feed_workers: 4,
            feed_interval_secs: 300,
            feed_batch_size: 1000,
            segment_size: DEFAULT_SEGMENT_SIZE,
            remove_local_after_migration: false,
            max_retries: 5,
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GcSettings {
    pub interval_hours: u64,
    pub grace_period_hours: u64,
    pub merge_duplicates: bool,
}

impl Default for GcSettings {
    fn default() -> Self {
        Self {
            interval_hours: 24,
            grace_period_hours: 24,
            merge_duplicates: true,
        }
    }
}

impl GcSettings {
    pub fn grace_period_secs(&self) -> i64 {
        (self.grace_period_hours * 3600) as i64
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let worker_index = file.worker_index.unwrap_or(cli.worker_index);
        let metrics_port = file
            .metrics_port
            .unwrap_or(cli.metrics_port)
            .checked_add(worker_index)
            .context("metrics port + worker_index overflows")?;

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let content_cache_age_sec = file
            .content_cache_age_sec
            .unwrap_or(cli.content_cache_age_sec);
        let socket_timeout_secs = file.socket_timeout_secs.unwrap_or(60);
        let virtualized_socket_timeout_secs = file.virtualized_socket_timeout_secs.unwrap_or(600);

        let max_upload_size = file
            .max_upload_size
            .as_deref()
            .map(parse_size)
            .transpose()
            .context("Invalid max_upload_size")?;

        let digest_algorithm = match file.digest_algorithm {
            Some(name) => match DigestAlgorithm::from_name(&name) {
                Some(algorithm) => algorithm,
                None => bail!("Unsupported digest_algorithm: {}", name),
            },
            None => DigestAlgorithm::default(),
        };

        let public_hostname = file
            .public_hostname
            .or_else(|| cli.public_hostname.clone())
            .unwrap_or_else(|| "localhost".to_string());
        let production_hostname_pattern = file
            .production_hostname_pattern
            .unwrap_or_else(|| DEFAULT_PRODUCTION_HOSTNAME_PATTERN.to_string());
        regex::Regex::new(&production_hostname_pattern)
            .context("Invalid production_hostname_pattern")?;

        let public = resolve_partition(
            Partition::Public,
            &db_dir,
            worker_index,
            file.public.unwrap_or_default(),
            cli.public_upstream.clone(),
        )?;
        let restricted = resolve_partition(
            Partition::Restricted,
            &db_dir,
            worker_index,
            file.restricted.unwrap_or_default(),
            cli.restricted_upstream.clone(),
        )?;

        let swift = resolve_swift(file.swift.unwrap_or_default())?;

        let gc_file = file.gc.unwrap_or_default();
        let gc_defaults = GcSettings::default();
        let gc = GcSettings {
            interval_hours: gc_file.interval_hours.unwrap_or(gc_defaults.interval_hours),
            grace_period_hours: gc_file
                .grace_period_hours
                .unwrap_or(gc_defaults.grace_period_hours),
            merge_duplicates: gc_file
                .merge_duplicates
                .unwrap_or(gc_defaults.merge_duplicates),
        };
        if gc.interval_hours == 0 {
            bail!("gc.interval_hours must be greater than zero");
        }

        Ok(Self {
            db_dir,
            worker_index,
            metrics_port,
            logging_level,
            content_cache_age_sec,
            socket_timeout_secs,
            virtualized_socket_timeout_secs,
            max_upload_size,
            digest_algorithm,
            public_hostname,
            production_hostname_pattern,
            public,
            restricted,
            swift,
            gc,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("librarian.db")
    }

    pub fn partition(&self, partition: Partition) -> &PartitionSettings {
        match partition {
            Partition::Public => &self.public,
            Partition::Restricted => &self.restricted,
        }
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    /// Timeout for client-side calls, longer when running virtualized.
    pub fn client_socket_timeout(&self, virtualized: bool) -> Duration {
        if virtualized {
            Duration::from_secs(self.virtualized_socket_timeout_secs)
        } else {
            self.socket_timeout()
        }
    }
}

fn resolve_partition(
    partition: Partition,
    db_dir: &std::path::Path,
    worker_index: u16,
    file: PartitionFileConfig,
    cli_upstream: Option<String>,
) -> Result<PartitionSettings> {
    let (default_upload, default_download) = match partition {
        Partition::Public => (58000, 58080),
        Partition::Restricted => (58005, 58085),
    };
    let offset = |port: u16| {
        port.checked_add(worker_index)
            .with_context(|| format!("{} port {} + worker_index overflows", partition, port))
    };

    let upstream = match (file.upstream_host, file.upstream_port) {
        (Some(host), Some(port)) => Some(format!("{}:{}", host, port)),
        (Some(host), None) => Some(format!("{}:80", host)),
        (None, Some(_)) => bail!("{}.upstream_port set without upstream_host", partition),
        (None, None) => cli_upstream,
    };

    Ok(PartitionSettings {
        partition,
        root: file
            .root
            .map(PathBuf::from)
            .unwrap_or_else(|| db_dir.join(partition.as_str())),
        upload_port: offset(file.upload_port.unwrap_or(default_upload))?,
        download_port: offset(file.download_port.unwrap_or(default_download))?,
        upstream,
    })
}

fn credentials(
    storage_url: Option<String>,
    auth_token: Option<String>,
    auth_url: Option<String>,
    user: Option<String>,
    key: Option<String>,
) -> Option<SwiftCredentials> {
    if let (Some(storage_url), Some(auth_token)) = (storage_url, auth_token) {
        return Some(SwiftCredentials::Static {
            storage_url,
            auth_token,
        });
    }
    match (auth_url, user, key) {
        (Some(auth_url), Some(user), Some(key)) => Some(SwiftCredentials::TempAuth {
            auth_url,
            user,
            key,
        }),
        _ => None,
    }
}

fn resolve_swift(file: SwiftFileConfig) -> Result<SwiftSettings> {
    let defaults = SwiftSettings::default();
    let current = credentials(
        file.storage_url,
        file.auth_token,
        file.auth_url,
        file.user,
        file.key,
    );
    let legacy = credentials(
        file.legacy_storage_url,
        file.legacy_auth_token,
        file.legacy_auth_url,
        file.legacy_user,
        file.legacy_key,
    );
    let enabled = file.enabled.unwrap_or(current.is_some());
    if enabled && current.is_none() {
        bail!("swift is enabled but no storage_url/auth_token or auth_url/user/key were given");
    }

    let segment_size = file
        .segment_size
        .as_deref()
        .map(parse_size)
        .transpose()
        .context("Invalid swift.segment_size")?
        .unwrap_or(defaults.segment_size);
    if segment_size == 0 {
        bail!("swift.segment_size must be greater than zero");
    }

    Ok(SwiftSettings {
        enabled,
        current,
        legacy,
        timeout_secs: file.timeout_secs.unwrap_or(defaults.timeout_secs),
        feed_workers: file.feed_workers.unwrap_or(defaults.feed_workers).max(1),
        feed_interval_secs: file
            .feed_interval_secs
            .unwrap_or(defaults.feed_interval_secs),
        feed_batch_size: file.feed_batch_size.unwrap_or(defaults.feed_batch_size),
        segment_size,
        remove_local_after_migration: file
            .remove_local_after_migration
            .unwrap_or(defaults.remove_local_after_migration),
        max_retries: file.max_retries.unwrap_or(defaults.max_retries),
        initial_backoff_secs: file
            .initial_backoff_secs
            .unwrap_or(defaults.initial_backoff_secs),
        max_backoff_secs: file.max_backoff_secs.unwrap_or(defaults.max_backoff_secs),
        backoff_multiplier: file
            .backoff_multiplier
            .unwrap_or(defaults.backoff_multiplier),
    })
}

/// Parses a human readable size such as "1 GiB" or "1048576".
fn parse_size(s: &str) -> Result<u64> {
    let byte = byte_unit::Byte::parse_str(s, true)
        .map_err(|e| anyhow::anyhow!("cannot parse size {:?}: {}", s, e))?;
    Ok(byte.as_u64())
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
