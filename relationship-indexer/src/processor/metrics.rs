//! Throughput counters for the stream processor.
//!
//! Purely observational: nothing here feeds back into processing.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relationship_indexer_shared::ConnectionEventType;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

/// Counters shared between the batch loop and the periodic reporter.
#[derive(Debug)]
pub struct ProcessorMetrics {
    applied_total: AtomicU64,
    applied_interval: AtomicU64,
    batches: AtomicU64,
    latest_offset: AtomicI64,
    register: AtomicU64,
    referral: AtomicU64,
    addfriend: AtomicU64,
    unfriend: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub applied_total: u64,
    pub batches: u64,
    pub latest_offset: i64,
    pub avg_applied_per_batch: f64,
    pub register: u64,
    pub referral: u64,
    pub addfriend: u64,
    pub unfriend: u64,
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        Self {
            applied_total: AtomicU64::new(0),
            applied_interval: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            latest_offset: AtomicI64::new(-1),
            register: AtomicU64::new(0),
            referral: AtomicU64::new(0),
            addfriend: AtomicU64::new(0),
            unfriend: AtomicU64::new(0),
        }
    }
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_applied(&self, event_type: ConnectionEventType) {
        self.applied_total.fetch_add(1, Ordering::Relaxed);
        self.applied_interval.fetch_add(1, Ordering::Relaxed);
        let counter = match event_type {
            ConnectionEventType::Register => &self.register,
            ConnectionEventType::Referral => &self.referral,
            ConnectionEventType::AddFriend => &self.addfriend,
            ConnectionEventType::Unfriend => &self.unfriend,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Track the highest offset examined so far.
    pub fn observe_offset(&self, offset: i64) {
        self.latest_offset.fetch_max(offset, Ordering::Relaxed);
    }

    /// Applied count since the previous call, resetting it.
    pub fn take_interval(&self) -> u64 {
        self.applied_interval.swap(0, Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let applied_total = self.applied_total.load(Ordering::Relaxed);
        let batches = self.batches.load(Ordering::Relaxed);
        MetricsSnapshot {
            applied_total,
            batches,
            latest_offset: self.latest_offset.load(Ordering::Relaxed),
            avg_applied_per_batch: if batches > 0 {
                applied_total as f64 / batches as f64
            } else {
                0.0
            },
            register: self.register.load(Ordering::Relaxed),
            referral: self.referral.load(Ordering::Relaxed),
            addfriend: self.addfriend.load(Ordering::Relaxed),
            unfriend: self.unfriend.load(Ordering::Relaxed),
        }
    }

    /// Log one progress line covering `elapsed` since the previous one.
    pub fn log_progress(&self, elapsed: Duration) {
        let applied_interval = self.take_interval();
        let elapsed_secs = elapsed.as_secs_f64();
        let rate = if elapsed_secs > 0.0 {
            applied_interval as f64 / elapsed_secs
        } else {
            0.0
        };
        let s = self.snapshot();

        info!(
            applied_per_sec = format!("{:.2}", rate),
            applied_interval = applied_interval,
            applied_total = s.applied_total,
            latest_offset = s.latest_offset,
            avg_per_batch = format!("{:.2}", s.avg_applied_per_batch),
            register = s.register,
            referral = s.referral,
            addfriend = s.addfriend,
            unfriend = s.unfriend,
            "Processing progress"
        );
    }
}

/// Log progress every `period` until the returned handle is aborted.
pub fn spawn_reporter(metrics: Arc<ProcessorMetrics>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first tick immediately
        timer.tick().await;

        let mut previous = Instant::now();
        loop {
            timer.tick().await;
            let now = Instant::now();
            metrics.log_progress(now.duration_since(previous));
            previous = now;
        }
    })
}
