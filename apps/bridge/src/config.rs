//! Bridge configuration.
//!
//! Read from TOML, then overridden by environment variables:
//! - file: `$TVBRIDGE_CONFIG`, or `~/.config/tvbridge/bridge.toml`
//!   (`%APPDATA%/tvbridge/bridge.toml` on Windows)
//! - `TVBRIDGE_HOST`, `TVBRIDGE_NAME`, `TVBRIDGE_TOKEN_FILE`

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use tvbridge_protocol::constants::{
    DEFAULT_CLIENT_NAME, HEARTBEAT_INTERVAL, RECONNECT_DELAY, RECONNECT_MAX_DELAY,
};
use tvbridge_tv_connection::{ConnectionConfig, ReconnectConfig};

/// Upper bound for any interval or delay setting (one day).
const MAX_SETTING_SECS: u64 = 24 * 60 * 60;

/// Bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TV host name or IP address.
    #[serde(default)]
    pub host: String,

    /// Client name shown on the TV.
    #[serde(default = "default_name")]
    pub name: String,

    /// File holding the pairing token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,

    /// Seconds of silence before the connection is dropped.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Extra headers for the WebSocket upgrade request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

/// Backoff settings after an unexpected close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_name() -> String {
    DEFAULT_CLIENT_NAME.into()
}

fn default_heartbeat_secs() -> u64 {
    HEARTBEAT_INTERVAL.as_secs()
}

fn default_initial_delay_secs() -> f64 {
    RECONNECT_DELAY.as_secs_f64()
}

fn default_max_delay_secs() -> f64 {
    RECONNECT_MAX_DELAY.as_secs_f64()
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::new(),
            name: default_name(),
            token_file: None,
            headers: BTreeMap::new(),
            heartbeat_secs: default_heartbeat_secs(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl Config {
    /// Loads the config file (if any), applies environment overrides, and
    /// validates the result.
    pub fn load() -> anyhow::Result<Self> {
        let path = match std::env::var_os("TVBRIDGE_CONFIG") {
            Some(p) => PathBuf::from(p),
            None => config_path()?,
        };

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            tracing::debug!(path = %path.display(), "configuration file read");
            config
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from environment variables looked up via `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("TVBRIDGE_HOST").filter(|v| !v.is_empty()) {
            self.host = host;
        }
        if let Some(name) = lookup("TVBRIDGE_NAME").filter(|v| !v.is_empty()) {
            self.name = name;
        }
        if let Some(path) = lookup("TVBRIDGE_TOKEN_FILE").filter(|v| !v.is_empty()) {
            self.token_file = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("no TV host configured (set `host` or TVBRIDGE_HOST)");
        }
        if self.heartbeat_secs == 0 || self.heartbeat_secs > MAX_SETTING_SECS {
            anyhow::bail!("heartbeat_secs must be between 1 and {MAX_SETTING_SECS}");
        }
        let r = &self.reconnect;
        for (name, secs) in [
            ("initial_delay_secs", r.initial_delay_secs),
            ("max_delay_secs", r.max_delay_secs),
        ] {
            let delay = Duration::try_from_secs_f64(secs)
                .map_err(|e| anyhow::anyhow!("invalid reconnect {name} {secs}: {e}"))?;
            if delay.as_secs() > MAX_SETTING_SECS {
                anyhow::bail!("reconnect {name} must not exceed {MAX_SETTING_SECS}");
            }
        }
        if !(r.backoff_factor.is_finite() && r.backoff_factor >= 1.0) {
            anyhow::bail!("reconnect backoff_factor must be a finite number >= 1");
        }
        Ok(())
    }

    /// Builds the connection manager configuration.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(self.host.trim())
            .with_name(self.name.clone())
            .with_heartbeat_interval(Duration::from_secs(self.heartbeat_secs))
            .with_reconnect(ReconnectConfig {
                initial_delay: Duration::from_secs_f64(self.reconnect.initial_delay_secs),
                max_delay: Duration::from_secs_f64(self.reconnect.max_delay_secs),
                backoff_factor: self.reconnect.backoff_factor,
            });
        for (name, value) in &self.headers {
            config = config.with_header(name.clone(), value.clone());
        }
        if let Some(path) = &self.token_file {
            config = config.with_token_file(path.clone());
        }
        config
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        Ok(base.join("tvbridge").join("bridge.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").context("APPDATA not set")?;
        Ok(PathBuf::from(appdata).join("tvbridge").join("bridge.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("tvbridge")
            .join("bridge.toml"))
    }
}
