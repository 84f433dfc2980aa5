//! # Engine Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FIELDSTOCK_REMOTE_URL=https://stock.example.com                    │
//! │     FIELDSTOCK_AUTH_TOKEN=...                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/fieldstock/engine.toml (Linux)                           │
//! │     ~/Library/Application Support/com.fieldstock.agent/engine.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5 min interval, 30 s request timeout, generated device id          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Van 7 scanner"
//!
//! [remote]
//! base_url = "https://stock.example.com"
//! central_path = "central"
//! request_timeout_secs = 30
//! auth_token_env = "FIELDSTOCK_TOKEN"
//!
//! [sync]
//! interval_secs = 300
//! max_attempts = 10
//! prune_synced = true
//!
//! [storage]
//! database_path = "/var/lib/fieldstock/fieldstock.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use fieldstock_db::DEFAULT_DB_FILE;

use crate::coordinator::CoordinatorOptions;
use crate::error::{EngineResult, SyncError};
use crate::remote::{EnvToken, RemoteConfig, StaticToken, TokenSource};

// =============================================================================
// Device Configuration
// =============================================================================

/// Identity of this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier (UUID v4).
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Van 7 scanner").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "Field Device".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Where the authority lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the authority (http or https).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Path segment of the snapshot endpoints.
    #[serde(default = "default_central_path")]
    pub central_path: String,

    /// Timeout for record pushes (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for snapshot download/upload (seconds).
    #[serde(default = "default_request_timeout")]
    pub snapshot_timeout_secs: u64,

    /// Timeout for the reachability probe (seconds).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Bearer token. Prefer `auth_token_env` outside development.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Name of an environment variable holding the bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,
}

fn default_central_path() -> String {
    "central".to_string()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_probe_timeout() -> u64 {
    5
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: None,
            central_path: default_central_path(),
            request_timeout_secs: default_request_timeout(),
            snapshot_timeout_secs: default_request_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            auth_token: None,
            auth_token_env: None,
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between automatic sync attempts (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Failed records with fewer attempts are re-queued at session start.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delete synced records after a successful session.
    #[serde(default = "default_true")]
    pub prune_synced: bool,

    /// Interval between reachability probes while online (seconds).
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Initial probe backoff while the authority is down (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum probe backoff (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

fn default_interval() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    10
}
fn default_true() -> bool {
    true
}
fn default_probe_interval() -> u64 {
    30
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            interval_secs: default_interval(),
            max_attempts: default_max_attempts(),
            prune_synced: true,
            probe_interval_secs: default_probe_interval(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Local store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Database file. Defaults to `fieldstock.db` in the project data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            database_path: None,
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl EngineConfig {
    /// Creates a new config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.device.id.is_empty() {
            return Err(SyncError::InvalidConfig("device.id must not be empty".into()));
        }

        if let Some(ref base_url) = self.remote.base_url {
            parse_base_url(base_url)?;
        }

        if self.remote.central_path.trim_matches('/').is_empty() {
            return Err(SyncError::InvalidConfig(
                "remote.central_path must not be empty".into(),
            ));
        }

        if self.remote.request_timeout_secs == 0
            || self.remote.snapshot_timeout_secs == 0
            || self.remote.probe_timeout_secs == 0
        {
            return Err(SyncError::InvalidConfig(
                "remote timeouts must be greater than 0".into(),
            ));
        }

        if self.sync.interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.interval_secs must be greater than 0".into(),
            ));
        }

        if self.sync.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.max_attempts must be greater than 0".into(),
            ));
        }

        if self.storage.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "storage.max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from any variable source.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("FIELDSTOCK_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Some(url) = lookup("FIELDSTOCK_REMOTE_URL") {
            debug!(url = %url, "Overriding authority URL from environment");
            self.remote.base_url = Some(url);
        }

        if let Some(token) = lookup("FIELDSTOCK_AUTH_TOKEN") {
            debug!("Using bearer token from environment");
            self.remote.auth_token = Some(token);
        }

        if let Some(secs) = lookup("FIELDSTOCK_SYNC_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid FIELDSTOCK_SYNC_INTERVAL_SECS"),
            }
        }

        if let Some(secs) = lookup("FIELDSTOCK_REQUEST_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.remote.request_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid FIELDSTOCK_REQUEST_TIMEOUT_SECS"),
            }
        }

        if let Some(path) = lookup("FIELDSTOCK_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.database_path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the device ID.
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Database file, falling back to the project data dir.
    pub fn database_path(&self) -> EngineResult<PathBuf> {
        if let Some(ref path) = self.storage.database_path {
            return Ok(path.clone());
        }

        project_dirs()
            .map(|dirs| dirs.data_dir().join(DEFAULT_DB_FILE))
            .ok_or_else(|| {
                SyncError::InvalidConfig(
                    "No home directory; set storage.database_path or FIELDSTOCK_DB_PATH".into(),
                )
            })
    }

    /// Builds the HTTP client settings. Fails if no authority is configured.
    pub fn remote_config(&self) -> EngineResult<RemoteConfig> {
        let base_url = self.remote.base_url.as_deref().ok_or_else(|| {
            SyncError::InvalidConfig(
                "remote.base_url is not configured (or set FIELDSTOCK_REMOTE_URL)".into(),
            )
        })?;

        Ok(RemoteConfig::new(base_url)?
            .central_path(&self.remote.central_path)
            .request_timeout(Duration::from_secs(self.remote.request_timeout_secs))
            .snapshot_timeout(Duration::from_secs(self.remote.snapshot_timeout_secs))
            .probe_timeout(Duration::from_secs(self.remote.probe_timeout_secs)))
    }

    /// Token source for the configured credentials, if any.
    ///
    /// A literal `auth_token` wins over `auth_token_env`.
    pub fn token_source(&self) -> Option<Arc<dyn TokenSource>> {
        if let Some(ref token) = self.remote.auth_token {
            return Some(Arc::new(StaticToken::new(token.clone())));
        }
        self.remote
            .auth_token_env
            .as_ref()
            .map(|var| Arc::new(EnvToken::new(var.clone())) as Arc<dyn TokenSource>)
    }

    /// Coordinator options derived from `[sync]`.
    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            max_attempts: self.sync.max_attempts,
            prune_synced: self.sync.prune_synced,
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync.interval_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.sync.probe_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.remote.probe_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.sync.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.sync.max_backoff_secs)
    }
}

/// Parses an authority base URL, accepting only http and https.
pub(crate) fn parse_base_url(raw: &str) -> EngineResult<Url> {
    let url = Url::parse(raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(SyncError::InvalidUrl(format!(
            "Authority URL must use http:// or https://, got {}://",
            other
        ))),
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "fieldstock", "agent")
}
