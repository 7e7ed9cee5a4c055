// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Proxy Log Monitor
//!
//! This crate periodically pulls access logs from a reverse proxy's admin
//! API and keeps a deduplicated, bounded history of them:
//!
//! - Rule/endpoint walk with per-endpoint failure isolation
//! - Identity-key deduplication and newest-first retention
//! - Overflow archiving to write-once tables
//! - Per-address ranking with cached geo labels
//! - Atomic snapshot publication for the read API

pub mod aggregate;
pub mod config;
pub mod error;
pub mod geo;
pub mod handlers;
pub mod models;
pub mod persist;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod upstream;

pub use config::Config;
pub use error::{AppError, Result};
pub use geo::{GeoLabel, GeoResolver};
pub use models::{AggregatedSnapshot, LogEntry, RankEntry};
pub use pipeline::{CycleReport, Pipeline, SnapshotCell};
pub use scheduler::{Scheduler, SchedulerState};
pub use store::{HistoryStore, MergeOutcome};
pub use upstream::{FetchReport, LogFetcher, UpstreamApi};
