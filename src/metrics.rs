// src/metrics.rs
//
// Loop observability: counts and rates for polling, measurement and
// actuation. Logged after each cycle and on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct LoopMetrics {
    pub polls: Arc<AtomicU64>,
    pub status_failures: Arc<AtomicU64>,
    pub cycles_run: Arc<AtomicU64>,
    pub cycles_skipped: Arc<AtomicU64>,
    pub program_changes: Arc<AtomicU64>,
    pub program_change_failures: Arc<AtomicU64>,
    pub absent_frames: Arc<AtomicU64>,
    pub vehicles_counted: Arc<AtomicU64>,
    pub last_cycle_ms: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self {
            polls: Arc::new(AtomicU64::new(0)),
            status_failures: Arc::new(AtomicU64::new(0)),
            cycles_run: Arc::new(AtomicU64::new(0)),
            cycles_skipped: Arc::new(AtomicU64::new(0)),
            program_changes: Arc::new(AtomicU64::new(0)),
            program_change_failures: Arc::new(AtomicU64::new(0)),
            absent_frames: Arc::new(AtomicU64::new(0)),
            vehicles_counted: Arc::new(AtomicU64::new(0)),
            last_cycle_ms: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_ms: u64) {
        counter.store(duration_ms, Ordering::Relaxed);
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            polls: self.polls.load(Ordering::Relaxed),
            status_failures: self.status_failures.load(Ordering::Relaxed),
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            program_changes: self.program_changes.load(Ordering::Relaxed),
            program_change_failures: self.program_change_failures.load(Ordering::Relaxed),
            absent_frames: self.absent_frames.load(Ordering::Relaxed),
            vehicles_counted: self.vehicles_counted.load(Ordering::Relaxed),
            last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for LoopMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub polls: u64,
    pub status_failures: u64,
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub program_changes: u64,
    pub program_change_failures: u64,
    pub absent_frames: u64,
    pub vehicles_counted: u64,
    pub last_cycle_ms: u64,
    pub uptime_secs: f64,
}
