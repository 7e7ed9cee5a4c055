// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! In-memory upstream and geo backends with call counting.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use proxy_log_monitor::{
    geo::{GeoBackend, GeoLookupError},
    models::LogEntry,
    upstream::{Endpoint, RawLogLine, Rule, UpstreamApi, UpstreamError},
};

#[derive(Default)]
struct UpstreamState {
    rules: Vec<Rule>,
    /// `None` makes the endpoint fail
    logs: HashMap<(String, String), Option<Vec<RawLogLine>>>,
    rules_fail: bool,
}

/// Admin API served from memory.
#[derive(Default)]
pub struct FakeUpstream {
    state: Mutex<UpstreamState>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub rule_calls: AtomicUsize,
    pub log_calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an endpoint under a rule, creating the rule if needed.
    pub fn add_endpoint(&self, rule_key: &str, endpoint_key: &str, remark: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        let endpoint = Endpoint {
            key: endpoint_key.to_string(),
            remark: remark.map(str::to_string),
            domains: None,
        };
        match state.rules.iter_mut().find(|r| r.key == rule_key) {
            Some(rule) => rule.endpoints.push(endpoint),
            None => state.rules.push(Rule {
                key: rule_key.to_string(),
                endpoints: vec![endpoint],
            }),
        }
        state
            .logs
            .entry((rule_key.to_string(), endpoint_key.to_string()))
            .or_insert_with(|| Some(Vec::new()));
    }

    /// Serve `entries` as the endpoint's log page.
    pub fn set_logs(&self, rule_key: &str, endpoint_key: &str, entries: &[LogEntry]) {
        let lines = entries.iter().map(raw_line).collect();
        self.set_raw_logs(rule_key, endpoint_key, lines);
    }

    pub fn set_raw_logs(&self, rule_key: &str, endpoint_key: &str, lines: Vec<RawLogLine>) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert((rule_key.to_string(), endpoint_key.to_string()), Some(lines));
    }

    pub fn fail_endpoint(&self, rule_key: &str, endpoint_key: &str) {
        self.state
            .lock()
            .unwrap()
            .logs
            .insert((rule_key.to_string(), endpoint_key.to_string()), None);
    }

    pub fn fail_rules(&self, fail: bool) {
        self.state.lock().unwrap().rules_fail = fail;
    }

    /// Make rule listing wait until the returned handle is notified.
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.notify_one();
        }
    }

    pub fn total_calls(&self) -> usize {
        self.rule_calls.load(Ordering::SeqCst) + self.log_calls.load(Ordering::SeqCst)
    }
}

/// Encode an entry the way the admin API does.
pub fn raw_line(entry: &LogEntry) -> RawLogLine {
    let content = serde_json::json!({
        "ExtInfo": {
            "ClientIP": entry.source_address,
            "Host": entry.host,
            "Method": entry.method,
            "URL": entry.url,
        }
    });
    RawLogLine {
        log_time: entry.timestamp.clone(),
        log_content: content.to_string(),
    }
}

#[async_trait]
impl UpstreamApi for FakeUpstream {
    async fn list_rules(&self) -> Result<Vec<Rule>, UpstreamError> {
        self.rule_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let state = self.state.lock().unwrap();
        if state.rules_fail {
            return Err(UpstreamError::Status(503));
        }
        Ok(state.rules.clone())
    }

    async fn fetch_logs(&self, rule_key: &str, endpoint_key: &str) -> Result<Vec<RawLogLine>, UpstreamError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        match state.logs.get(&(rule_key.to_string(), endpoint_key.to_string())) {
            Some(Some(lines)) => Ok(lines.clone()),
            Some(None) => Err(UpstreamError::Status(500)),
            None => Err(UpstreamError::Status(404)),
        }
    }
}

/// Geo backend answering `geo-<ip>`, or timing out when told to.
#[derive(Default)]
pub struct CountingGeo {
    pub calls: AtomicUsize,
    time_out: AtomicBool,
}

impl CountingGeo {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_timing_out(&self, time_out: bool) {
        self.time_out.store(time_out, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeoBackend for CountingGeo {
    async fn lookup(&self, ip: IpAddr) -> Result<Option<String>, GeoLookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.time_out.load(Ordering::SeqCst) {
            return Err(GeoLookupError::Timeout);
        }
        Ok(Some(format!("geo-{ip}")))
    }
}
