// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Data model shared by the pipeline stages and the read API.

use serde::{Deserialize, Serialize};

/// `last_update` value published before the first cycle completes.
pub const STARTING_MARKER: &str = "starting";

/// A single access-log record pulled from the proxy.
///
/// Field names on the wire (CSV header and JSON) are the short column names
/// of the history table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Upstream-formatted timestamp, compared as an opaque string.
    #[serde(rename = "time")]
    pub timestamp: String,
    #[serde(rename = "ip")]
    pub source_address: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "rule", default)]
    pub rule_name: String,
}

/// Deduplication identity of a [`LogEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub timestamp: String,
    pub source_address: String,
    pub url: String,
}

impl LogEntry {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            timestamp: self.timestamp.clone(),
            source_address: self.source_address.clone(),
            url: self.url.clone(),
        }
    }
}

/// One row of the per-address ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    #[serde(rename = "ip")]
    pub address: String,
    pub count: usize,
    pub location: String,
}

/// The read-only view served to clients. Replaced wholesale after each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedSnapshot {
    #[serde(rename = "logs")]
    pub history: Vec<LogEntry>,
    #[serde(rename = "ip_rank")]
    pub rank: Vec<RankEntry>,
    pub last_update: String,
}

impl AggregatedSnapshot {
    /// Snapshot stamped with the current local time.
    pub fn new(history: Vec<LogEntry>, rank: Vec<RankEntry>) -> Self {
        Self {
            history,
            rank,
            last_update: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Placeholder published at startup, before the cold fetch finishes.
    pub fn starting(history: Vec<LogEntry>) -> Self {
        Self {
            history,
            rank: Vec::new(),
            last_update: STARTING_MARKER.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> LogEntry {
        LogEntry {
            timestamp: "2024-01-01 00:00:00".to_string(),
            source_address: "1.2.3.4".to_string(),
            host: "example.com".to_string(),
            method: "GET".to_string(),
            url: "/x".to_string(),
            rule_name: "web".to_string(),
        }
    }

    #[test]
    fn test_identity_ignores_host_method_and_rule() {
        let a = entry();
        let mut b = entry();
        b.host = "other.example.com".to_string();
        b.method = "POST".to_string();
        b.rule_name = "api".to_string();
        assert_eq!(a.identity(), b.identity());

        b.url = "/y".to_string();
        assert_ne!(a.identity(), b.identity());
    }

    #[test]
    fn test_snapshot_wire_names() {
        let snapshot = AggregatedSnapshot {
            history: vec![entry()],
            rank: vec![RankEntry {
                address: "1.2.3.4".to_string(),
                count: 1,
                location: "Somewhere".to_string(),
            }],
            last_update: "12:00:00".to_string(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["logs"][0]["time"], "2024-01-01 00:00:00");
        assert_eq!(json["logs"][0]["ip"], "1.2.3.4");
        assert_eq!(json["logs"][0]["rule"], "web");
        assert_eq!(json["ip_rank"][0]["ip"], "1.2.3.4");
        assert_eq!(json["ip_rank"][0]["count"], 1);
        assert_eq!(json["last_update"], "12:00:00");
    }

    #[test]
    fn test_starting_snapshot() {
        let snapshot = AggregatedSnapshot::starting(vec![entry()]);
        assert_eq!(snapshot.last_update, STARTING_MARKER);
        assert!(snapshot.rank.is_empty());
        assert_eq!(snapshot.history.len(), 1);
    }
}
