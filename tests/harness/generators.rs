// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Log entry generators.

use std::path::Path;

use proxy_log_monitor::{models::LogEntry, store::read_table};

/// Rule/endpoint key used by generated entries; the fake endpoint has no
/// remark or domains, so the fetcher names entries after this key.
pub const ENDPOINT: &str = "web";
pub const RULE: &str = "rule-1";

pub fn entry(time: &str, ip: &str, url: &str) -> LogEntry {
    LogEntry {
        timestamp: time.to_string(),
        source_address: ip.to_string(),
        host: "site.example.com".to_string(),
        method: "GET".to_string(),
        url: url.to_string(),
        rule_name: ENDPOINT.to_string(),
    }
}

/// Timestamp `n` seconds after a fixed origin, zero padded so string order
/// matches time order.
pub fn ts(n: u32) -> String {
    format!("2024-01-01 {:02}:{:02}:{:02}", n / 3600, (n / 60) % 60, n % 60)
}

/// `count` distinct entries starting at second `start`, cycling through a
/// handful of public addresses.
pub fn batch(start: u32, count: u32) -> Vec<LogEntry> {
    const ADDRESSES: [&str; 4] = ["203.0.113.7", "198.51.100.2", "8.8.8.8", "2001:db8::1"];
    (start..start + count)
        .map(|n| entry(&ts(n), ADDRESSES[n as usize % ADDRESSES.len()], &format!("/page/{n}")))
        .collect()
}

/// Every archive table written under `dir/archive`, oldest name first.
pub fn archived_entries(dir: &Path) -> Vec<Vec<LogEntry>> {
    let archive_dir = dir.join("archive");
    let Ok(read_dir) = std::fs::read_dir(&archive_dir) else {
        return Vec::new();
    };
    let mut paths: Vec<_> = read_dir.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    paths.iter().map(|p| read_table(p).unwrap()).collect()
}
