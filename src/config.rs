// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the log monitor.
//!
//! Values are layered: built-in defaults, then `config.json` in the data
//! directory, then `MONITOR_*` environment variables (nested keys use `__`,
//! e.g. `MONITOR_GEO__TIMEOUT_SECS`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{AppError, Result};

/// Placeholder written into a freshly generated config file.
pub const PLACEHOLDER_URL: &str = "https://YOUR_LUCKY_URL:16601";
/// Placeholder written into a freshly generated config file.
pub const PLACEHOLDER_TOKEN: &str = "YOUR_TOKEN_HERE";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "MONITOR";

const CONFIG_FILE: &str = "config.json";
const HISTORY_FILE: &str = "lucky_logs.csv";
const GEO_CACHE_FILE: &str = "ip_geo.json";
const ICON_FILE: &str = "icon.png";
const ARCHIVE_DIR: &str = "archive";

/// Configuration for the log monitor service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the proxy admin API (default: placeholder)
    #[serde(default = "default_lucky_url")]
    pub lucky_url: String,

    /// Static token sent in the `openToken` header (default: placeholder)
    #[serde(default = "default_open_token")]
    pub open_token: String,

    /// Sync period in minutes (default: 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval_minutes: Option<u64>,

    /// Sync period in seconds; wins over minutes when both are set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval_seconds: Option<u64>,

    /// Retention bound of the served history (default: 2000)
    #[serde(default = "default_max_log_count")]
    pub max_log_count: usize,

    /// Server bind address (default: 0.0.0.0:8001)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Front-end page served at `/` (default: index.html)
    #[serde(default = "default_index_file")]
    pub index_file: PathBuf,

    /// Upstream client settings
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Geo lookup settings
    #[serde(default)]
    pub geo: GeoConfig,

    /// Directory holding all state files; not part of the file itself
    #[serde(skip, default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Upstream admin API client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Log lines requested per endpoint (default: 100)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Timeout for the rule listing in seconds (default: 10)
    #[serde(default = "default_rules_timeout_secs")]
    pub rules_timeout_secs: u64,

    /// Timeout for one endpoint's logs in seconds (default: 5)
    #[serde(default = "default_logs_timeout_secs")]
    pub logs_timeout_secs: u64,

    /// Accept self-signed certificates on the admin port (default: true)
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

/// Geo lookup backend settings. `{ip}` in a URL is replaced by the address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Lookup URL used for IPv4 addresses
    #[serde(default = "default_ipv4_url")]
    pub ipv4_url: String,

    /// Lookup URL used for IPv6 addresses
    #[serde(default = "default_ipv6_url")]
    pub ipv6_url: String,

    /// Per-lookup timeout in seconds (default: 3)
    #[serde(default = "default_geo_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_lucky_url() -> String {
    PLACEHOLDER_URL.to_string()
}

fn default_open_token() -> String {
    PLACEHOLDER_TOKEN.to_string()
}

fn default_max_log_count() -> usize {
    2000
}

fn default_bind_addr() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_index_file() -> PathBuf {
    PathBuf::from("index.html")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_page_size() -> u32 {
    100
}

fn default_rules_timeout_secs() -> u64 {
    10
}

fn default_logs_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_ipv4_url() -> String {
    "http://ip-api.com/json/{ip}?lang=zh-CN".to_string()
}

fn default_ipv6_url() -> String {
    "http://ip-api.com/json/{ip}?lang=zh-CN".to_string()
}

fn default_geo_timeout_secs() -> u64 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lucky_url: default_lucky_url(),
            open_token: default_open_token(),
            sync_interval_minutes: Some(1),
            sync_interval_seconds: None,
            max_log_count: default_max_log_count(),
            bind_addr: default_bind_addr(),
            index_file: default_index_file(),
            upstream: UpstreamConfig::default(),
            geo: GeoConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            rules_timeout_secs: default_rules_timeout_secs(),
            logs_timeout_secs: default_logs_timeout_secs(),
            accept_invalid_certs: default_true(),
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            ipv4_url: default_ipv4_url(),
            ipv6_url: default_ipv6_url(),
            timeout_secs: default_geo_timeout_secs(),
        }
    }
}

impl Config {
    /// Load layered configuration for `data_dir`.
    ///
    /// Writes a default `config.json` first if the directory has none.
    pub fn load(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let file = data_dir.join(CONFIG_FILE);
        if !file.exists() {
            let body = serde_json::to_string_pretty(&Config::default())
                .map_err(|e| AppError::InvalidConfig(e.to_string()))?;
            std::fs::write(&file, body)?;
            warn!(path = %file.display(), "Generated default configuration, set the token and restart");
        }

        let mut config: Config = config::Config::builder()
            .add_source(
                config::File::from(file)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.data_dir = data_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_log_count == 0 {
            return Err(AppError::InvalidConfig("max_log_count must be at least 1".into()));
        }
        if self.upstream.page_size == 0 {
            return Err(AppError::InvalidConfig("upstream.page_size must be at least 1".into()));
        }
        self.sync_period().map(|_| ())
    }

    /// Resolve the interval unit. Seconds win over minutes; neither means one minute.
    pub fn sync_period(&self) -> Result<Duration> {
        let period = match (self.sync_interval_seconds, self.sync_interval_minutes) {
            (Some(secs), minutes) => {
                if minutes.is_some() {
                    warn!(
                        seconds = secs,
                        "Both sync_interval_seconds and sync_interval_minutes set, using seconds"
                    );
                }
                Duration::from_secs(secs)
            }
            (None, Some(mins)) => Duration::from_secs(mins.saturating_mul(60)),
            (None, None) => Duration::from_secs(60),
        };

        if period.is_zero() {
            return Err(AppError::InvalidConfig("sync interval must be positive".into()));
        }
        Ok(period)
    }

    /// Whether the upstream credentials have been filled in.
    pub fn upstream_ready(&self) -> bool {
        let token = self.open_token.trim();
        let url = self.lucky_url.trim();
        !token.is_empty() && token != PLACEHOLDER_TOKEN && !url.is_empty() && url != PLACEHOLDER_URL
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn geo_cache_path(&self) -> PathBuf {
        self.data_dir.join(GEO_CACHE_FILE)
    }

    pub fn icon_path(&self) -> PathBuf {
        self.data_dir.join(ICON_FILE)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join(ARCHIVE_DIR)
    }
}

impl UpstreamConfig {
    pub fn rules_timeout(&self) -> Duration {
        Duration::from_secs(self.rules_timeout_secs)
    }

    pub fn logs_timeout(&self) -> Duration {
        Duration::from_secs(self.logs_timeout_secs)
    }
}

impl GeoConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
