//! Lightweight in-memory interception counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct InterceptionMetrics {
    paused: AtomicU64,
    resumed: AtomicU64,
    aborted: AtomicU64,
    cancelled: AtomicU64,
    passed: AtomicU64,
    skipped: AtomicU64,
    rejected: AtomicU64,
    peak_queue_depth: AtomicU64,
}

static INTERCEPTION_METRICS: OnceLock<InterceptionMetrics> = OnceLock::new();

fn metrics() -> &'static InterceptionMetrics {
    INTERCEPTION_METRICS.get_or_init(InterceptionMetrics::default)
}

/// Records a context entering the queue, tracking the deepest queue seen.
pub fn record_pause(queue_depth: usize) {
    let depth = queue_depth as u64;
    let metrics = metrics();
    metrics.paused.fetch_add(1, Ordering::Relaxed);

    let mut current = metrics.peak_queue_depth.load(Ordering::Relaxed);
    while depth > current {
        match metrics.peak_queue_depth.compare_exchange(
            current,
            depth,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(next) => current = next,
        }
    }
}

pub fn record_resume() {
    metrics().resumed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_abort() {
    metrics().aborted.fetch_add(1, Ordering::Relaxed);
}

pub fn record_cancel() {
    metrics().cancelled.fetch_add(1, Ordering::Relaxed);
}

/// A gate let a command through without pausing it.
pub fn record_pass() {
    metrics().passed.fetch_add(1, Ordering::Relaxed);
}

/// The filter chain skipped a command.
pub fn record_skip() {
    metrics().skipped.fetch_add(1, Ordering::Relaxed);
}

pub fn record_reject() {
    metrics().rejected.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Serialize)]
pub struct InterceptionMetricsSnapshot {
    pub paused: u64,
    pub resumed: u64,
    pub aborted: u64,
    pub cancelled: u64,
    pub passed: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub peak_queue_depth: u64,
}

pub fn snapshot() -> InterceptionMetricsSnapshot {
    let metrics = metrics();
    InterceptionMetricsSnapshot {
        paused: metrics.paused.load(Ordering::Relaxed),
        resumed: metrics.resumed.load(Ordering::Relaxed),
        aborted: metrics.aborted.load(Ordering::Relaxed),
        cancelled: metrics.cancelled.load(Ordering::Relaxed),
        passed: metrics.passed.load(Ordering::Relaxed),
        skipped: metrics.skipped.load(Ordering::Relaxed),
        rejected: metrics.rejected.load(Ordering::Relaxed),
        peak_queue_depth: metrics.peak_queue_depth.load(Ordering::Relaxed),
    }
}
