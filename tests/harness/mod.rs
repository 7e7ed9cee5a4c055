// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness for the log monitor pipeline.
//!
//! In-memory stand-ins for the proxy admin API and the geo lookup services,
//! plus generators for log entries and isolated pipelines.

#![allow(dead_code)]

pub mod fakes;
pub mod generators;

use std::path::Path;
use std::sync::Arc;

use proxy_log_monitor::{
    geo::{GeoCache, GeoResolver},
    pipeline::Pipeline,
    store::HistoryStore,
    upstream::LogFetcher,
};

use fakes::{CountingGeo, FakeUpstream};

/// A pipeline wired to fakes, with its state files under `dir`.
pub struct TestPipeline {
    pub pipeline: Arc<Pipeline>,
    pub upstream: Arc<FakeUpstream>,
    pub geo: Arc<CountingGeo>,
}

impl TestPipeline {
    pub fn new(dir: &Path, max_log_count: usize) -> Self {
        Self::with_store(dir, max_log_count, |_| {})
    }

    /// Build a pipeline after letting `prepare` seed the history store.
    pub fn with_store(dir: &Path, max_log_count: usize, prepare: impl FnOnce(&mut HistoryStore)) -> Self {
        let upstream = FakeUpstream::new();
        let geo = CountingGeo::new();

        let (mut store, _) = HistoryStore::load_or_default(
            dir.join("lucky_logs.csv"),
            dir.join("archive"),
            max_log_count,
        );
        prepare(&mut store);

        let (cache, _) = GeoCache::load_or_default(dir.join("ip_geo.json"));
        let resolver = GeoResolver::new(cache, geo.clone(), geo.clone());
        let fetcher = LogFetcher::new(upstream.clone(), true);

        Self {
            pipeline: Arc::new(Pipeline::new(fetcher, store, resolver)),
            upstream,
            geo,
        }
    }
}
