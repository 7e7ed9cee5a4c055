// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Interval-driven sync scheduling.
//!
//! At most one cycle runs at a time. A tick that arrives while a cycle is
//! still running is dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::pipeline::Pipeline;

/// Whether a cycle is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Clears the in-flight flag when the cycle ends, including by panic.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the pipeline on a fixed period.
#[derive(Clone)]
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    period: Duration,
    in_flight: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, period: Duration) -> Self {
        Self {
            pipeline,
            period,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.in_flight.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Start a cycle unless one is already running.
    ///
    /// Returns the spawned cycle, or `None` when the trigger was dropped.
    pub fn trigger(&self) -> Option<JoinHandle<()>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous sync still running, skipping this trigger");
            return None;
        }

        let guard = InFlightGuard(self.in_flight.clone());
        let pipeline = self.pipeline.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            pipeline.sync().await;
        }))
    }

    /// Trigger immediately (cold fetch), then once per period, forever.
    pub async fn run(self) {
        info!(period_secs = self.period.as_secs(), "Scheduler started");
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            // The first tick completes immediately.
            ticker.tick().await;
            self.trigger();
        }
    }

    /// Spawn [`Scheduler::run`] in the background.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
