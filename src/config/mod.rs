//! Configuration system (layered: code > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bon::Builder;
use serde::Deserialize;

use crate::auth::pipeline::SkipList;
use crate::auth::store::default_hearth_dir;
use crate::error::{HearthError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_MAX_FAILURES: u32 = 5;
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(8 * 60 * 60);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ACCESS_DENIED_MARKER: &str = "not a member of this family";

/// Tunables for the session core.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use hearth::config::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .base_url("https://api.example.com")
///     .max_failures(3)
///     .retry_interval(Duration::from_secs(600))
///     .build();
/// assert_eq!(config.max_failures, 3);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct SessionConfig {
    /// Root URL of the remote API; endpoint paths are appended to it.
    #[builder(into, default = DEFAULT_BASE_URL.to_string())]
    pub base_url: String,
    /// Consecutive refresh failures tolerated before re-login is required.
    #[builder(default = DEFAULT_MAX_FAILURES)]
    pub max_failures: u32,
    /// Window after registration during which 401/403 never trigger a refresh.
    #[builder(default = DEFAULT_GRACE_PERIOD)]
    pub grace_period: Duration,
    /// Proactive refresh cadence after a successful refresh.
    #[builder(default = DEFAULT_REFRESH_INTERVAL)]
    pub refresh_interval: Duration,
    /// Proactive refresh cadence after a failed refresh.
    #[builder(default = DEFAULT_RETRY_INTERVAL)]
    pub retry_interval: Duration,
    /// Floor for any scheduled delay.
    #[builder(default = DEFAULT_MIN_INTERVAL)]
    pub min_interval: Duration,
    /// Upper bound on a single refresh exchange.
    #[builder(default = DEFAULT_REFRESH_TIMEOUT)]
    pub refresh_timeout: Duration,
    #[builder(default)]
    pub skip_list: SkipList,
    /// Body marker identifying a family-membership 403.
    #[builder(into, default = DEFAULT_ACCESS_DENIED_MARKER.to_string())]
    pub access_denied_marker: String,
    #[builder(into, default = default_hearth_dir())]
    pub storage_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    /// Load from environment variables, reading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Apply environment-style overrides from `lookup` on top of defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        config.apply_vars(lookup)?;
        Ok(config)
    }

    /// Parse a TOML config document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw)
            .map_err(|e| HearthError::Configuration(format!("Invalid config file: {e}")))?;
        file.into_config()
    }

    /// Load a TOML config file, then apply environment overrides.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        let _ = dotenvy::dotenv();
        config.apply_vars(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Grace period as a chrono duration for timestamp arithmetic.
    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.grace_period).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("HEARTH_API_BASE_URL") {
            self.base_url = url;
        }
        if let Some(raw) = lookup("HEARTH_MAX_REFRESH_FAILURES") {
            self.max_failures = parse_number("HEARTH_MAX_REFRESH_FAILURES", &raw)?;
        }
        let duration_mappings: [(&str, &mut Duration); 4] = [
            ("HEARTH_GRACE_PERIOD_SECS", &mut self.grace_period),
            ("HEARTH_REFRESH_INTERVAL_SECS", &mut self.refresh_interval),
            ("HEARTH_RETRY_INTERVAL_SECS", &mut self.retry_interval),
            ("HEARTH_REFRESH_TIMEOUT_SECS", &mut self.refresh_timeout),
        ];
        for (env_var, slot) in duration_mappings {
            if let Some(raw) = lookup(env_var) {
                *slot = Duration::from_secs(parse_number(env_var, &raw)?);
            }
        }
        if let Some(dir) = lookup("HEARTH_STORAGE_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse::<T>().map_err(|_| {
        HearthError::Configuration(format!(
            "{name} must be a non-negative integer in range, got {raw:?}"
        ))
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    base_url: Option<String>,
    max_failures: Option<u32>,
    grace_period_secs: Option<u64>,
    refresh_interval_secs: Option<u64>,
    retry_interval_secs: Option<u64>,
    min_interval_secs: Option<u64>,
    refresh_timeout_secs: Option<u64>,
    #[serde(default)]
    skip_endpoints: Vec<String>,
    #[serde(default)]
    skip_patterns: Vec<String>,
    access_denied_marker: Option<String>,
    storage_dir: Option<PathBuf>,
}

impl ConfigFile {
    fn into_config(self) -> Result<SessionConfig> {
        let mut config = SessionConfig::default();
        if let Some(url) = self.base_url {
            config.base_url = url;
        }
        if let Some(max) = self.max_failures {
            config.max_failures = max;
        }
        let secs = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_secs).unwrap_or(fallback)
        };
        config.grace_period = secs(self.grace_period_secs, config.grace_period);
        config.refresh_interval = secs(self.refresh_interval_secs, config.refresh_interval);
        config.retry_interval = secs(self.retry_interval_secs, config.retry_interval);
        config.min_interval = secs(self.min_interval_secs, config.min_interval);
        config.refresh_timeout = secs(self.refresh_timeout_secs, config.refresh_timeout);
        for endpoint in self.skip_endpoints {
            config.skip_list.add_exact(endpoint);
        }
        for pattern in self.skip_patterns {
            config.skip_list.add_pattern(&pattern).map_err(|e| {
                HearthError::Configuration(format!("Invalid skip pattern {pattern:?}: {e}"))
            })?;
        }
        if let Some(marker) = self.access_denied_marker {
            config.access_denied_marker = marker;
        }
        if let Some(dir) = self.storage_dir {
            config.storage_dir = dir;
        }
        Ok(config)
    }
}
