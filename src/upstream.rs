// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Upstream log fetcher.
//!
//! Walks the proxy's rule → endpoint hierarchy and pulls the most recent log
//! page of every endpoint. One endpoint failing does not stop the walk; the
//! rule listing failing aborts it.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::LogEntry;

/// Header carrying the admin API token (`openToken`; header names are
/// case-insensitive and must be lowercase here).
pub const TOKEN_HEADER: &str = "opentoken";

const API_PREFIX: [&str; 2] = ["api", "webservice"];

/// Failure talking to the admin API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("invalid token header: {0}")]
    InvalidToken(String),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// A proxy rule and its endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    #[serde(rename = "RuleKey")]
    pub key: String,
    #[serde(rename = "ProxyList", default, deserialize_with = "null_as_default")]
    pub endpoints: Vec<Endpoint>,
}

/// A sub-endpoint of a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Remark", default)]
    pub remark: Option<String>,
    #[serde(rename = "Domains", default)]
    pub domains: Option<Vec<String>>,
}

impl Endpoint {
    /// Display name: remark, else first domain, else the raw key.
    pub fn display_name(&self) -> &str {
        if let Some(remark) = self.remark.as_deref().filter(|r| !r.is_empty()) {
            return remark;
        }
        self.domains
            .as_deref()
            .and_then(|d| d.first())
            .map(String::as_str)
            .filter(|d| !d.is_empty())
            .unwrap_or(&self.key)
    }
}

/// One raw log line as returned by the admin API.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLogLine {
    #[serde(rename = "LogTime", deserialize_with = "string_or_number")]
    pub log_time: String,
    #[serde(rename = "LogContent", default, deserialize_with = "null_as_default")]
    pub log_content: String,
}

#[derive(Debug, Deserialize)]
struct RulesResponse {
    #[serde(rename = "ruleList", default, deserialize_with = "null_as_default")]
    rule_list: Vec<Rule>,
}

/// A log page. Lines are kept as raw values so one malformed line does not
/// sink the whole page.
#[derive(Debug, Deserialize)]
struct LogsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    logs: Vec<serde_json::Value>,
}

impl LogsResponse {
    fn into_lines(self) -> Vec<RawLogLine> {
        self.logs
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<RawLogLine>(value) {
                Ok(line) => Some(line),
                Err(e) => {
                    debug!(error = %e, "Dropping undecodable log line");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct LogContent {
    #[serde(rename = "ExtInfo", default)]
    ext_info: Option<ExtInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtInfo {
    #[serde(rename = "ClientIP", default)]
    client_ip: Option<String>,
    #[serde(rename = "Host", default)]
    host: Option<String>,
    #[serde(rename = "Method", default)]
    method: Option<String>,
    #[serde(rename = "URL", default)]
    url: Option<String>,
}

impl ExtInfo {
    fn is_empty(&self) -> bool {
        self.client_ip.is_none() && self.host.is_none() && self.method.is_none() && self.url.is_none()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected LogTime {other}"))),
    }
}

/// Turn a raw line into an entry. Lines without an extension payload are
/// not access records and yield `None`.
pub fn parse_log_line(line: &RawLogLine, rule_name: &str) -> Option<LogEntry> {
    let content: LogContent = serde_json::from_str(&line.log_content).ok()?;
    let ext = content.ext_info.filter(|e| !e.is_empty())?;
    Some(LogEntry {
        timestamp: line.log_time.clone(),
        source_address: ext.client_ip.unwrap_or_default(),
        host: ext.host.unwrap_or_default(),
        method: ext.method.unwrap_or_default(),
        url: ext.url.unwrap_or_default(),
        rule_name: rule_name.to_string(),
    })
}

/// Access to the proxy admin API.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn list_rules(&self) -> std::result::Result<Vec<Rule>, UpstreamError>;

    async fn fetch_logs(
        &self,
        rule_key: &str,
        endpoint_key: &str,
    ) -> std::result::Result<Vec<RawLogLine>, UpstreamError>;
}

/// `reqwest` client for the admin API.
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    page_size: u32,
    rules_timeout: Duration,
    logs_timeout: Duration,
}

impl HttpUpstream {
    pub fn from_config(config: &Config) -> std::result::Result<Self, UpstreamError> {
        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(config.open_token.trim())
            .map_err(|e| UpstreamError::InvalidToken(e.to_string()))?;
        headers.insert(HeaderName::from_static(TOKEN_HEADER), token);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .danger_accept_invalid_certs(config.upstream.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            base_url: config.lucky_url.trim().to_string(),
            page_size: config.upstream.page_size,
            rules_timeout: config.upstream.rules_timeout(),
            logs_timeout: config.upstream.logs_timeout(),
        })
    }

    /// `<base>/api/webservice/<segments..>`, each segment percent-encoded.
    fn api_url(&self, segments: &[&str]) -> std::result::Result<Url, UpstreamError> {
        let invalid = || UpstreamError::InvalidBaseUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        timeout: Duration,
    ) -> std::result::Result<T, UpstreamError> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| UpstreamError::Decode(e.to_string()))
    }
}

#[async_trait]
impl UpstreamApi for HttpUpstream {
    async fn list_rules(&self) -> std::result::Result<Vec<Rule>, UpstreamError> {
        let url = self.api_url(&["rules"])?;
        let response: RulesResponse = self.get_json(url, self.rules_timeout).await?;
        Ok(response.rule_list)
    }

    async fn fetch_logs(
        &self,
        rule_key: &str,
        endpoint_key: &str,
    ) -> std::result::Result<Vec<RawLogLine>, UpstreamError> {
        let mut url = self.api_url(&[rule_key, endpoint_key, "logs"])?;
        url.query_pairs_mut()
            .append_pair("pageSize", &self.page_size.to_string());
        let response: LogsResponse = self.get_json(url, self.logs_timeout).await?;
        Ok(response.into_lines())
    }
}

/// An endpoint whose logs could not be read this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEndpoint {
    pub rule_key: String,
    pub endpoint_key: String,
    pub reason: String,
}

/// Everything one fetch produced.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub entries: Vec<LogEntry>,
    pub skipped: Vec<SkippedEndpoint>,
    pub endpoints_visited: usize,
}

/// Collects candidate entries from the admin API.
pub struct LogFetcher {
    api: Arc<dyn UpstreamApi>,
    ready: bool,
}

impl LogFetcher {
    /// `ready` is false when credentials are missing; fetches then make no calls.
    pub fn new(api: Arc<dyn UpstreamApi>, ready: bool) -> Self {
        Self { api, ready }
    }

    pub async fn fetch_candidates(&self) -> Result<FetchReport> {
        if !self.ready {
            return Err(AppError::ConfigNotReady);
        }

        let rules = self
            .api
            .list_rules()
            .await
            .map_err(AppError::UpstreamUnavailable)?;

        let mut report = FetchReport::default();
        for rule in &rules {
            for endpoint in &rule.endpoints {
                report.endpoints_visited += 1;
                let lines = match self.api.fetch_logs(&rule.key, &endpoint.key).await {
                    Ok(lines) => lines,
                    Err(e) => {
                        warn!(
                            rule = %rule.key,
                            endpoint = %endpoint.key,
                            error = %e,
                            "Skipping endpoint"
                        );
                        report.skipped.push(SkippedEndpoint {
                            rule_key: rule.key.clone(),
                            endpoint_key: endpoint.key.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                let name = endpoint.display_name();
                let before = report.entries.len();
                report
                    .entries
                    .extend(lines.iter().filter_map(|line| parse_log_line(line, name)));
                debug!(
                    rule = %rule.key,
                    endpoint = %endpoint.key,
                    lines = lines.len(),
                    entries = report.entries.len() - before,
                    "Fetched endpoint logs"
                );
            }
        }

        Ok(report)
    }
}
