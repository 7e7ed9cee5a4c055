// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Address-to-location resolution with a persistent cache.
//!
//! Lookups go to one of two HTTP backends chosen by address family. Local
//! and malformed addresses never leave the process, and only successful,
//! non-empty labels are cached.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::GeoConfig;
use crate::persist::{self, LoadOutcome};

pub const LOCAL_NETWORK_LABEL: &str = "Local network";
pub const MALFORMED_LABEL: &str = "Invalid address";
pub const UNKNOWN_LABEL: &str = "Unknown location";
pub const TIMED_OUT_LABEL: &str = "Lookup timed out";

/// Result of resolving one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoLabel {
    /// Private, loopback or link-local address
    LocalNetwork,
    /// Not parseable as an IP address
    Malformed,
    /// Backend answered with a usable label (cached)
    Resolved(String),
    /// Backend answered but with nothing usable
    Unknown,
    /// Backend did not answer in time or the transport failed
    TimedOut,
}

impl GeoLabel {
    /// A transient label may resolve differently on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, GeoLabel::TimedOut)
    }

    pub fn as_str(&self) -> &str {
        match self {
            GeoLabel::LocalNetwork => LOCAL_NETWORK_LABEL,
            GeoLabel::Malformed => MALFORMED_LABEL,
            GeoLabel::Resolved(label) => label,
            GeoLabel::Unknown => UNKNOWN_LABEL,
            GeoLabel::TimedOut => TIMED_OUT_LABEL,
        }
    }
}

impl fmt::Display for GeoLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup failure reported by a backend.
#[derive(Debug, Error)]
pub enum GeoLookupError {
    #[error("geo lookup timed out")]
    Timeout,

    #[error("geo lookup transport error: {0}")]
    Transport(String),

    #[error("geo lookup returned an undecodable body: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GeoLookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GeoLookupError::Timeout
        } else if err.is_decode() {
            GeoLookupError::Decode(err.to_string())
        } else {
            GeoLookupError::Transport(err.to_string())
        }
    }
}

/// A geo lookup service. `Ok(None)` means the service answered without a
/// usable location.
#[async_trait]
pub trait GeoBackend: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> Result<Option<String>, GeoLookupError>;
}

/// Body shapes returned by the supported lookup services.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LookupResponse {
    Nested {
        data: NestedLocation,
    },
    Flat {
        status: String,
        #[serde(default, alias = "region")]
        #[serde(rename = "regionName")]
        region_name: Option<String>,
        #[serde(default)]
        city: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct NestedLocation {
    #[serde(default)]
    province: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    isp: Option<String>,
}

impl LookupResponse {
    fn into_label(self) -> Option<String> {
        let parts = match self {
            LookupResponse::Flat { status, region_name, city } => {
                if status != "success" {
                    return None;
                }
                vec![region_name, city]
            }
            LookupResponse::Nested { data } => vec![data.province, data.city, data.isp],
        };
        compose_label(parts)
    }
}

fn compose_label(parts: Vec<Option<String>>) -> Option<String> {
    let label = parts
        .into_iter()
        .flatten()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

/// Parse a lookup service body into a label.
pub fn parse_lookup_body(body: &str) -> Option<String> {
    serde_json::from_str::<LookupResponse>(body)
        .ok()
        .and_then(LookupResponse::into_label)
}

/// HTTP lookup service addressed by a URL template containing `{ip}`.
pub struct HttpGeoBackend {
    client: reqwest::Client,
    url_template: String,
    timeout: Duration,
}

impl HttpGeoBackend {
    pub fn new(client: reqwest::Client, url_template: String, timeout: Duration) -> Self {
        Self {
            client,
            url_template,
            timeout,
        }
    }
}

#[async_trait]
impl GeoBackend for HttpGeoBackend {
    async fn lookup(&self, ip: IpAddr) -> Result<Option<String>, GeoLookupError> {
        let url = self.url_template.replace("{ip}", &ip.to_string());
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?;
        let body = response.text().await?;
        Ok(parse_lookup_body(&body))
    }
}

/// Normalize a raw address string: trim, drop any `%zone` suffix and fold
/// IPv4-mapped IPv6 addresses to IPv4.
pub fn normalize_address(raw: &str) -> Option<IpAddr> {
    let trimmed = raw.trim();
    let without_zone = trimmed.split('%').next().unwrap_or(trimmed);
    let ip: IpAddr = without_zone.parse().ok()?;
    Some(match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    })
}

/// Whether the address belongs to a private, loopback or link-local range.
pub fn is_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => is_local_v6(v6),
    }
}

fn is_local_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
}

fn is_local_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local fc00::/7
        || (first & 0xffc0) == 0xfe80 // link local fe80::/10
}

/// Persistent address → label map.
#[derive(Debug, Default)]
pub struct GeoCache {
    entries: BTreeMap<String, String>,
    path: Option<PathBuf>,
    /// Entries not yet on disk
    dirty: bool,
}

impl GeoCache {
    /// In-memory cache that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache file, starting empty when it is absent or unreadable.
    pub fn load_or_default(path: PathBuf) -> (Self, LoadOutcome) {
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return (Self { entries: BTreeMap::new(), path: Some(path), dirty: false }, LoadOutcome::Absent);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Geo cache unreadable, starting empty");
                return (
                    Self { entries: BTreeMap::new(), path: Some(path), dirty: false },
                    LoadOutcome::CorruptReset { moved_to: None },
                );
            }
        };

        match serde_json::from_str::<BTreeMap<String, String>>(&contents) {
            Ok(entries) => (Self { entries, path: Some(path), dirty: false }, LoadOutcome::Loaded),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Geo cache corrupt, starting empty");
                let moved_to = persist::move_aside(&path);
                (
                    Self { entries: BTreeMap::new(), path: Some(path), dirty: false },
                    LoadOutcome::CorruptReset { moved_to },
                )
            }
        }
    }

    pub fn get(&self, address: &str) -> Option<&str> {
        self.entries.get(address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the file on disk is behind memory.
    pub fn needs_flush(&self) -> bool {
        self.dirty
    }

    /// Record a label and try to write the whole map back to disk.
    fn insert(&mut self, address: String, label: String) {
        self.entries.insert(address, label);
        self.dirty = true;
        if let Err(e) = self.flush() {
            error!(error = %e, "Failed to persist geo cache, will retry next cycle");
        }
    }

    /// Write the map if it changed since the last successful write. A
    /// failure leaves it marked for the next call.
    pub fn flush(&mut self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            self.dirty = false;
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let body = serde_json::to_vec(&self.entries)?;
        persist::write_atomic(path, &body)?;
        self.dirty = false;
        Ok(())
    }
}

/// Resolves addresses to location labels.
pub struct GeoResolver {
    cache: Mutex<GeoCache>,
    ipv4: Arc<dyn GeoBackend>,
    ipv6: Arc<dyn GeoBackend>,
}

impl GeoResolver {
    pub fn new(cache: GeoCache, ipv4: Arc<dyn GeoBackend>, ipv6: Arc<dyn GeoBackend>) -> Self {
        Self {
            cache: Mutex::new(cache),
            ipv4,
            ipv6,
        }
    }

    /// Resolver backed by the HTTP services named in `config`.
    pub fn from_config(cache: GeoCache, config: &GeoConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        let ipv4 = HttpGeoBackend::new(client.clone(), config.ipv4_url.clone(), config.timeout());
        let ipv6 = HttpGeoBackend::new(client, config.ipv6_url.clone(), config.timeout());
        Ok(Self::new(cache, Arc::new(ipv4), Arc::new(ipv6)))
    }

    /// Number of cached labels.
    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    /// Retry a cache write that failed earlier. No-op when the file is
    /// current.
    pub fn flush_cache(&self) -> std::io::Result<()> {
        self.lock_cache().flush()
    }

    /// Resolve one address. Performs at most one backend lookup.
    pub async fn resolve(&self, address: &str) -> GeoLabel {
        let Some(ip) = normalize_address(address) else {
            debug!(address, "Malformed address");
            return GeoLabel::Malformed;
        };

        if is_local(&ip) {
            return GeoLabel::LocalNetwork;
        }

        let key = ip.to_string();
        let cached = self.lock_cache().get(&key).map(str::to_string);
        if let Some(label) = cached {
            return GeoLabel::Resolved(label);
        }

        let backend = match ip {
            IpAddr::V4(_) => &self.ipv4,
            IpAddr::V6(_) => &self.ipv6,
        };

        match backend.lookup(ip).await {
            Ok(Some(label)) => {
                self.lock_cache().insert(key, label.clone());
                GeoLabel::Resolved(label)
            }
            Ok(None) => GeoLabel::Unknown,
            Err(GeoLookupError::Decode(reason)) => {
                debug!(address = %key, reason = %reason, "Geo lookup body not understood");
                GeoLabel::Unknown
            }
            Err(e) => {
                warn!(address = %key, error = %e, "Geo lookup failed");
                GeoLabel::TimedOut
            }
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, GeoCache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
