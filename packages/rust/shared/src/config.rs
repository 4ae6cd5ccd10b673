//! Application configuration for the blackboard.
//!
//! User config lives at `~/.blackboard/blackboard.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BlackboardError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "blackboard.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".blackboard";

/// Longest accepted `housekeeping.interval_secs` (30 days).
pub const MAX_HOUSEKEEPING_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Config structs (matching blackboard.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backing key/value store.
    #[serde(default)]
    pub store: StoreConfig,

    /// Content cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Background cache eviction.
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,

    /// Source readers.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Local database file. Ignored when `url` is set.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Remote libSQL URL (`libsql://...`). Takes precedence over `path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Name of the env var holding the remote auth token (never store the token itself).
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,

    /// Deadline for a single store operation attempt.
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff between retries; doubles each attempt.
    #[serde(default = "default_store_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            url: None,
            auth_token_env: default_auth_token_env(),
            op_timeout_secs: default_op_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_store_backoff(),
        }
    }
}

impl StoreConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_store_path() -> String {
    "~/.blackboard/blackboard.db".into()
}
fn default_auth_token_env() -> String {
    "BLACKBOARD_STORE_TOKEN".into()
}
fn default_op_timeout() -> u64 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_store_backoff() -> u64 {
    200
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one file per cache entry.
    #[serde(default = "default_cache_root")]
    pub root: String,

    /// Entries younger than this are served without fetching.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Deadline for one fetch + convert.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            ttl_secs: default_ttl(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_cache_root() -> String {
    "~/.blackboard/cache".into()
}
fn default_ttl() -> u64 {
    3600
}
fn default_fetch_timeout() -> u64 {
    60
}

/// `[housekeeping]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    /// Whether the runtime starts the eviction task.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between eviction passes.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Entries older than this are deleted.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval(),
            max_age_secs: default_max_age(),
        }
    }
}

impl HousekeepingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

fn default_true() -> bool {
    true
}
fn default_interval() -> u64 {
    3600
}
fn default_max_age() -> u64 {
    3600
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Responses larger than this are rejected.
    #[serde(default = "default_max_response")]
    pub max_response_bytes: u64,

    /// Total read attempts for transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff between read attempts; doubles each attempt.
    #[serde(default = "default_fetch_backoff")]
    pub retry_backoff_ms: u64,

    /// Options for object storage sources.
    #[serde(default)]
    pub object_store: ObjectStoreOptions,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_response_bytes: default_max_response(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_fetch_backoff(),
            object_store: ObjectStoreOptions::default(),
        }
    }
}

/// `[fetch.object_store.*]` tables: per-backend client options such as
/// `region` or `aws_access_key_id`.
///
/// A value of the form `env:NAME` is read from the environment variable
/// `NAME` when the client is built, so secrets stay out of the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStoreOptions {
    /// `s3://` sources.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub s3: BTreeMap<String, String>,

    /// `gs://` and `gcs://` sources.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gcs: BTreeMap<String, String>,

    /// `abfs://` and `abfss://` sources.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub abfs: BTreeMap<String, String>,
}

impl ObjectStoreOptions {
    /// Options table for a source scheme, if the scheme is object storage.
    pub fn for_scheme(&self, scheme: &str) -> Option<&BTreeMap<String, String>> {
        match scheme {
            "s3" => Some(&self.s3),
            "gs" | "gcs" => Some(&self.gcs),
            "abfs" | "abfss" => Some(&self.abfs),
            _ => None,
        }
    }
}

impl FetchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

fn default_request_timeout() -> u64 {
    30
}
fn default_max_response() -> u64 {
    50 * 1024 * 1024
}
fn default_max_attempts() -> u32 {
    3
}
fn default_fetch_backoff() -> u64 {
    500
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.blackboard/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BlackboardError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.blackboard/blackboard.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BlackboardError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        BlackboardError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let path = config_file_path()?;
    write_default_config(&path)?;
    Ok(path)
}

/// Write a default config file at `path`, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| BlackboardError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| BlackboardError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| BlackboardError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}

/// Reject settings that would make a component unusable.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.cache.root.trim().is_empty() {
        return Err(BlackboardError::config("cache.root must not be empty"));
    }
    if config.store.url.is_none() && config.store.path.trim().is_empty() {
        return Err(BlackboardError::config(
            "either store.path or store.url must be set",
        ));
    }
    if config.store.op_timeout_secs == 0 {
        return Err(BlackboardError::config(
            "store.op_timeout_secs must be greater than zero",
        ));
    }
    if config.cache.fetch_timeout_secs == 0 {
        return Err(BlackboardError::config(
            "cache.fetch_timeout_secs must be greater than zero",
        ));
    }
    if config.housekeeping.enabled {
        let interval = config.housekeeping.interval_secs;
        if interval == 0 {
            return Err(BlackboardError::config(
                "housekeeping.interval_secs must be greater than zero",
            ));
        }
        if interval > MAX_HOUSEKEEPING_INTERVAL_SECS {
            return Err(BlackboardError::config(format!(
                "housekeeping.interval_secs must be at most {MAX_HOUSEKEEPING_INTERVAL_SECS}"
            )));
        }
    }
    if config.fetch.max_attempts == 0 {
        return Err(BlackboardError::config("fetch.max_attempts must be at least 1"));
    }
    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| BlackboardError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None if path == "~" => dirs::home_dir()
            .ok_or_else(|| BlackboardError::config("could not determine home directory")),
        None => Ok(PathBuf::from(path)),
    }
}
