//! Configuration file and environment handling for `stellar-archivist`.
//!
//! Settings are layered, later sources winning:
//!
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config <FILE>`)
//! 3. `ARCHIVIST_*` environment variables
//! 4. Command-line flags
//!
//! # Example Configuration
//!
//! ```toml
//! [archive]
//! network_passphrase = "Public Global Stellar Network ; September 2015"
//! concurrency = 16
//! timeout_secs = 30
//!
//! [cache]
//! path = "/var/cache/stellar-archivist"
//! max_files = 50000
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! # Environment Overrides
//!
//! - `ARCHIVIST_NETWORK_PASSPHRASE` - Expected network passphrase
//! - `ARCHIVIST_CONCURRENCY` - Parallel requests per command
//! - `ARCHIVIST_TIMEOUT_SECS` - Per-request timeout
//! - `ARCHIVIST_USER_AGENT` - HTTP `User-Agent`
//! - `ARCHIVIST_S3_REGION`, `ARCHIVIST_S3_ENDPOINT` - S3 settings
//! - `ARCHIVIST_GCS_CREDENTIAL_PATH` - GCS service-account file
//! - `ARCHIVIST_CACHE_PATH`, `ARCHIVIST_CACHE_MAX_FILES` - On-disk cache
//! - `ARCHIVIST_LOG_LEVEL`, `ARCHIVIST_LOG_FORMAT` - Logging

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use archivist_history::archive::DEFAULT_CONCURRENCY;
use archivist_history::{ArchiveOptions, DEFAULT_CHECKPOINT_FREQUENCY};
use archivist_storage::{ConnectOptions, DEFAULT_S3_REGION, DEFAULT_USER_AGENT};
use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

/// How archives are reached and processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Expected network passphrase. Empty disables the check.
    pub network_passphrase: String,
    pub checkpoint_frequency: u32,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub unsigned_requests: bool,
    pub gcs_credential_path: Option<String>,
    pub gcs_endpoint: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            network_passphrase: String::new(),
            checkpoint_frequency: DEFAULT_CHECKPOINT_FREQUENCY,
            concurrency: DEFAULT_CONCURRENCY,
            timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            s3_region: DEFAULT_S3_REGION.to_string(),
            s3_endpoint: None,
            unsigned_requests: false,
            gcs_credential_path: None,
            gcs_endpoint: None,
        }
    }
}

/// On-disk cache in front of source archives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory. No caching when unset.
    pub path: Option<PathBuf>,
    /// 0 selects the cache's own default.
    pub max_files: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (text or json).
    pub format: String,
    /// Whether to use ANSI colors.
    pub colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            colors: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Load `path` if given, else defaults, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `ARCHIVIST_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(val) = lookup("ARCHIVIST_NETWORK_PASSPHRASE") {
            self.archive.network_passphrase = val;
        }
        if let Some(val) = lookup("ARCHIVIST_CONCURRENCY") {
            self.archive.concurrency = val
                .parse()
                .with_context(|| format!("invalid ARCHIVIST_CONCURRENCY: {val}"))?;
        }
        if let Some(val) = lookup("ARCHIVIST_TIMEOUT_SECS") {
            self.archive.timeout_secs = val
                .parse()
                .with_context(|| format!("invalid ARCHIVIST_TIMEOUT_SECS: {val}"))?;
        }
        if let Some(val) = lookup("ARCHIVIST_USER_AGENT") {
            self.archive.user_agent = val;
        }
        if let Some(val) = lookup("ARCHIVIST_S3_REGION") {
            self.archive.s3_region = val;
        }
        if let Some(val) = lookup("ARCHIVIST_S3_ENDPOINT") {
            self.archive.s3_endpoint = Some(val);
        }
        if let Some(val) = lookup("ARCHIVIST_GCS_CREDENTIAL_PATH") {
            self.archive.gcs_credential_path = Some(val);
        }
        if let Some(val) = lookup("ARCHIVIST_CACHE_PATH") {
            self.cache.path = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("ARCHIVIST_CACHE_MAX_FILES") {
            self.cache.max_files = val
                .parse()
                .with_context(|| format!("invalid ARCHIVIST_CACHE_MAX_FILES: {val}"))?;
        }
        if let Some(val) = lookup("ARCHIVIST_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("ARCHIVIST_LOG_FORMAT") {
            self.logging.format = val;
        }
        Ok(())
    }

    /// Options for connecting to archives.
    pub fn archive_options(&self) -> ArchiveOptions {
        let archive = &self.archive;
        ArchiveOptions {
            connect: ConnectOptions {
                timeout: Duration::from_secs(archive.timeout_secs),
                user_agent: archive.user_agent.clone(),
                s3_region: archive.s3_region.clone(),
                s3_endpoint: archive.s3_endpoint.clone(),
                unsigned_requests: archive.unsigned_requests,
                gcs_credential_path: archive.gcs_credential_path.clone(),
                gcs_endpoint: archive.gcs_endpoint.clone(),
            },
            network_passphrase: Some(archive.network_passphrase.clone())
                .filter(|p| !p.is_empty()),
            checkpoint_frequency: archive.checkpoint_frequency,
            cache_path: self.cache.path.clone(),
            cache_max_files: self.cache.max_files,
        }
    }
}
