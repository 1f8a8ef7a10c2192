//! Submission configuration
//!
//! Everything the orchestrator needs that used to be process-global: where
//! the warehouse lives, how license plates are prefixed, the dedup threshold
//! and the staleness window. Loaded from `EDW_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default database URL, a SQLite file in the working directory.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://edw.db?mode=rwc";

/// Default warehouse root.
pub const DEFAULT_WAREHOUSE_ROOT: &str = "./warehouse";

/// Default license plate prefix.
pub const DEFAULT_LICENSE_PLATE_PREFIX: &str = "EDWFF";

/// Files larger than this are deduplicated by content hash alone.
pub const DEFAULT_DEDUP_SIZE_THRESHOLD: u64 = 100_000;

/// A silent submission older than this is presumed abandoned (4 hours).
pub const DEFAULT_STALENESS_WINDOW_SECS: u64 = 4 * 60 * 60;

/// Upper bound on concurrent payload fetches, whatever the host allows.
pub const DEFAULT_MAX_PARALLEL_FETCHES: usize = 10;

/// Parallel streams granted to a newly seen host.
pub const DEFAULT_HOST_PARALLEL_STREAMS: i64 = 10;

/// Connect timeout for remote opens.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Longest wait for any single read from a remote server.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitConfig {
    pub database_url: String,
    /// Root of the date-partitioned content tree
    pub warehouse_root: PathBuf,
    /// Scratch area for in-progress transfers; `<warehouse_root>/tmp` when unset.
    /// Must be on the same filesystem as the warehouse root so publish is a rename.
    pub scratch_dir: Option<PathBuf>,
    pub license_plate_prefix: String,
    pub dedup_size_threshold: u64,
    pub staleness_window: Duration,
    pub max_parallel_fetches: usize,
    pub connect_timeout: Duration,
    /// A remote body that stalls this long fails the file
    pub read_timeout: Duration,
    /// External format validator, run as `<command> <format> <path>`.
    /// Built-in signature checks are used when unset.
    pub format_validator: Option<String>,
    pub notify_subscribers: bool,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            warehouse_root: PathBuf::from(DEFAULT_WAREHOUSE_ROOT),
            scratch_dir: None,
            license_plate_prefix: DEFAULT_LICENSE_PLATE_PREFIX.to_string(),
            dedup_size_threshold: DEFAULT_DEDUP_SIZE_THRESHOLD,
            staleness_window: Duration::from_secs(DEFAULT_STALENESS_WINDOW_SECS),
            max_parallel_fetches: DEFAULT_MAX_PARALLEL_FETCHES,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            format_validator: None,
            notify_subscribers: true,
        }
    }
}

impl SubmitConfig {
    /// Load configuration from `.env` and the environment.
    ///
    /// - `EDW_DATABASE_URL`
    /// - `EDW_WAREHOUSE_ROOT`, `EDW_SCRATCH_DIR`
    /// - `EDW_LICENSE_PLATE_PREFIX`
    /// - `EDW_DEDUP_SIZE_THRESHOLD`, `EDW_STALENESS_WINDOW_SECS`
    /// - `EDW_MAX_PARALLEL_FETCHES`, `EDW_CONNECT_TIMEOUT_SECS`, `EDW_READ_TIMEOUT_SECS`
    /// - `EDW_FORMAT_VALIDATOR`, `EDW_NOTIFY_SUBSCRIBERS`
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            database_url: std::env::var("EDW_DATABASE_URL").unwrap_or(defaults.database_url),
            warehouse_root: std::env::var("EDW_WAREHOUSE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.warehouse_root),
            scratch_dir: std::env::var("EDW_SCRATCH_DIR").ok().map(PathBuf::from),
            license_plate_prefix: std::env::var("EDW_LICENSE_PLATE_PREFIX")
                .unwrap_or(defaults.license_plate_prefix),
            dedup_size_threshold: env_parse("EDW_DEDUP_SIZE_THRESHOLD")?
                .unwrap_or(defaults.dedup_size_threshold),
            staleness_window: env_parse("EDW_STALENESS_WINDOW_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.staleness_window),
            max_parallel_fetches: env_parse("EDW_MAX_PARALLEL_FETCHES")?
                .unwrap_or(defaults.max_parallel_fetches),
            connect_timeout: env_parse("EDW_CONNECT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            read_timeout: env_parse("EDW_READ_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.read_timeout),
            format_validator: std::env::var("EDW_FORMAT_VALIDATOR")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            notify_subscribers: env_parse("EDW_NOTIFY_SUBSCRIBERS")?
                .unwrap_or(defaults.notify_subscribers),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.license_plate_prefix.is_empty()
            || !self
                .license_plate_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        {
            anyhow::bail!(
                "License plate prefix must be non-empty and alphanumeric, got '{}'",
                self.license_plate_prefix
            );
        }
        if self.max_parallel_fetches == 0 {
            anyhow::bail!("max_parallel_fetches must be greater than 0");
        }
        if self.staleness_window.is_zero() {
            anyhow::bail!("Staleness window must be greater than 0");
        }
        if self.read_timeout.is_zero() {
            anyhow::bail!("Read timeout must be greater than 0");
        }
        Ok(())
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| self.warehouse_root.join("tmp"))
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_warehouse_root(mut self, root: impl AsRef<Path>) -> Self {
        self.warehouse_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_license_plate_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.license_plate_prefix = prefix.into();
        self
    }

    pub fn with_dedup_size_threshold(mut self, threshold: u64) -> Self {
        self.dedup_size_threshold = threshold;
        self
    }

    pub fn with_staleness_window(mut self, window: Duration) -> Self {
        self.staleness_window = window;
        self
    }

    pub fn with_max_parallel_fetches(mut self, max: usize) -> Self {
        self.max_parallel_fetches = max;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_format_validator(mut self, command: impl Into<String>) -> Self {
        self.format_validator = Some(command.into());
        self
    }

    pub fn with_notify_subscribers(mut self, notify: bool) -> Self {
        self.notify_subscribers = notify;
        self
    }
}

fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value '{}' for {}: {}", raw, key, e)),
        Err(_) => Ok(None),
    }
}
