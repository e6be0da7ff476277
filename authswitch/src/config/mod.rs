//! Application configuration.
//!
//! Configuration is read from a TOML file (default
//! `<config_dir>/authswitch/config.toml`); a missing file means defaults.
//! `.env` files are honoured through `dotenvy`, and a few environment
//! variables override file values:
//!
//! - `AUTHSWITCH_DATA_DIR`
//! - `AUTHSWITCH_STATE_DB`
//! - `AUTHSWITCH_LOG_FILTER`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Directory shared with the companion account tool.
const DEFAULT_DATA_DIR_NAME: &str = ".antigravity_tools";

/// Google OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Lower bound for the wall-clock budget around one injection.
pub const MIN_INJECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive. Empty means the built-in default.
    pub filter: String,
    /// Directory for rolling log files. Defaults to `<data_dir>/logs`.
    pub log_dir: Option<PathBuf>,
    pub file_logging: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: String::new(),
            log_dir: None,
            file_logging: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Account files, the pending-switch journal and the global device profile live here.
    pub data_dir: PathBuf,
    /// Explicit path to the host's `state.vscdb`; located automatically when unset.
    pub state_db_path: Option<PathBuf>,
    /// Explicit path to the host's `storage.json`; derived from the state database when unset.
    pub storage_json_path: Option<PathBuf>,
    /// SQLite busy timeout used by the writer.
    pub busy_timeout_ms: u64,
    /// Wall-clock budget for one backup-and-inject attempt.
    pub inject_timeout_secs: u64,
    /// Age after which a pending switch is discarded instead of replayed.
    pub pending_ttl_secs: u64,
    /// Tokens expiring within this window are refreshed before a switch.
    pub refresh_skew_secs: u64,
    pub monitored_models: Vec<String>,
    /// Quota percentage below which `status` warns.
    pub quota_threshold: i32,
    pub oauth: OAuthConfig,
    pub logging: LoggingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir: home.join(DEFAULT_DATA_DIR_NAME),
            state_db_path: None,
            storage_json_path: None,
            busy_timeout_ms: 2_000,
            inject_timeout_secs: MIN_INJECT_TIMEOUT_SECS,
            pending_ttl_secs: 5 * 60,
            refresh_skew_secs: 5 * 60,
            monitored_models: vec!["gemini".to_string(), "claude".to_string()],
            quota_threshold: 10,
            oauth: OAuthConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("authswitch").join("config.toml"))
    }

    /// Load configuration from `path` (or the default location), then apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut config = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading configuration file");
                let raw = std::fs::read_to_string(&path)
                    .map_err(|e| Error::io_path("reading", &path, e))?;
                Self::from_toml(&raw)?
            }
            _ => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::config(format!("invalid config file: {e}")))
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("AUTHSWITCH_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(db) = var("AUTHSWITCH_STATE_DB").filter(|v| !v.is_empty()) {
            self.state_db_path = Some(PathBuf::from(db));
        }
        if let Some(filter) = var("AUTHSWITCH_LOG_FILTER").filter(|v| !v.is_empty()) {
            self.logging.filter = filter;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.inject_timeout_secs < MIN_INJECT_TIMEOUT_SECS {
            return Err(Error::config(format!(
                "inject_timeout_secs must be at least {MIN_INJECT_TIMEOUT_SECS}, got {}",
                self.inject_timeout_secs
            )));
        }
        if self.pending_ttl_secs == 0 {
            return Err(Error::config("pending_ttl_secs must be positive"));
        }
        if !(0..=100).contains(&self.quota_threshold) {
            return Err(Error::config(format!(
                "quota_threshold must be within 0..=100, got {}",
                self.quota_threshold
            )));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn inject_timeout(&self) -> Duration {
        Duration::from_secs(self.inject_timeout_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn refresh_skew(&self) -> Duration {
        Duration::from_secs(self.refresh_skew_secs)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("logs"))
    }
}
