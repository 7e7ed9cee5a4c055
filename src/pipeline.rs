// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! One sync cycle: fetch, merge, flush, aggregate, publish.
//!
//! [`Pipeline`] owns all mutable state (history store, geo cache, published
//! snapshot). Build one per process, or one per test.

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::aggregate::aggregate;
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::geo::{GeoCache, GeoResolver};
use crate::models::AggregatedSnapshot;
use crate::store::HistoryStore;
use crate::upstream::{HttpUpstream, LogFetcher, SkippedEndpoint};

/// Holder of the currently published snapshot.
///
/// Publishing swaps one `Arc`, so a reader holds either the old snapshot or
/// the new one in full.
#[derive(Clone)]
pub struct SnapshotCell {
    inner: Arc<RwLock<Arc<AggregatedSnapshot>>>,
}

impl SnapshotCell {
    pub fn new(initial: AggregatedSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// The snapshot as of now.
    pub async fn current(&self) -> Arc<AggregatedSnapshot> {
        self.inner.read().await.clone()
    }

    pub async fn publish(&self, snapshot: AggregatedSnapshot) {
        *self.inner.write().await = Arc::new(snapshot);
    }
}

/// Summary of a completed cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub added: usize,
    pub evicted: usize,
    pub retained: usize,
    pub ranked: usize,
    pub skipped: Vec<SkippedEndpoint>,
    /// Set when a history or geo cache write failed; it is retried next cycle
    pub persistence_error: Option<String>,
}

/// Owner of the pipeline state.
pub struct Pipeline {
    fetcher: LogFetcher,
    store: Mutex<HistoryStore>,
    geo: GeoResolver,
    snapshot: SnapshotCell,
}

impl Pipeline {
    /// Assemble a pipeline. The initial snapshot exposes the store's
    /// current history with an empty rank.
    pub fn new(fetcher: LogFetcher, store: HistoryStore, geo: GeoResolver) -> Self {
        let snapshot = SnapshotCell::new(AggregatedSnapshot::starting(store.entries().to_vec()));
        Self {
            fetcher,
            store: Mutex::new(store),
            geo,
            snapshot,
        }
    }

    /// Production wiring: HTTP upstream, HTTP geo backends, state files in
    /// the configured data directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let upstream = HttpUpstream::from_config(config)
            .map_err(|e| AppError::InvalidConfig(format!("upstream client: {e}")))?;
        let fetcher = LogFetcher::new(Arc::new(upstream), config.upstream_ready());

        let (store, history_outcome) = HistoryStore::load_or_default(
            config.history_path(),
            config.archive_dir(),
            config.max_log_count,
        );
        info!(outcome = ?history_outcome, entries = store.len(), "History loaded");

        let (cache, cache_outcome) = GeoCache::load_or_default(config.geo_cache_path());
        info!(outcome = ?cache_outcome, entries = cache.len(), "Geo cache loaded");

        let geo = GeoResolver::from_config(cache, &config.geo)
            .map_err(|e| AppError::InvalidConfig(format!("geo client: {e}")))?;

        Ok(Self::new(fetcher, store, geo))
    }

    /// Handle for readers of the published snapshot.
    pub fn snapshot(&self) -> SnapshotCell {
        self.snapshot.clone()
    }

    /// Number of entries currently retained.
    pub async fn retained_len(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Run one cycle.
    ///
    /// `ConfigNotReady` and `UpstreamUnavailable` return before anything is
    /// mutated. A failed flush is reported in the result, not as an error:
    /// the in-memory history is still aggregated and published.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let fetch = self.fetcher.fetch_candidates().await?;

        let mut report = CycleReport {
            fetched: fetch.entries.len(),
            skipped: fetch.skipped,
            ..Default::default()
        };

        let history = {
            let mut store = self.store.lock().await;
            let outcome = store.merge(fetch.entries);
            report.added = outcome.added;
            report.evicted = outcome.evicted;

            if store.needs_flush() {
                if let Err(e) = store.flush() {
                    error!(error = %e, "Failed to persist history, will retry next cycle");
                    report.persistence_error = Some(e.to_string());
                }
            }
            report.retained = store.len();
            store.entries().to_vec()
        };

        let rank = aggregate(&history, &self.geo).await;
        report.ranked = rank.len();
        if let Err(e) = self.geo.flush_cache() {
            error!(error = %e, "Failed to persist geo cache, will retry next cycle");
            report.persistence_error.get_or_insert_with(|| e.to_string());
        }
        self.snapshot
            .publish(AggregatedSnapshot::new(history, rank))
            .await;

        Ok(report)
    }

    /// Run one cycle and log its outcome. Never fails; the previous
    /// snapshot stays published on error.
    pub async fn sync(&self) {
        info!("Starting sync");
        match self.run_cycle().await {
            Ok(report) => {
                info!(
                    fetched = report.fetched,
                    added = report.added,
                    evicted = report.evicted,
                    retained = report.retained,
                    ranked = report.ranked,
                    skipped = report.skipped.len(),
                    "Sync complete"
                );
            }
            Err(e) if e.is_not_ready() => {
                warn!("Upstream token not configured, skipping sync");
            }
            Err(e) => {
                error!(error = %e, "Sync failed, keeping previous snapshot");
            }
        }
    }
}
