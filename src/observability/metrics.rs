use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Metrics {
    pub resets_completed: AtomicU64,
    pub resets_failed: AtomicU64,
    pub room_failures: AtomicU64,
    pub tokens_archived: AtomicU64,
    pub tokens_carried_forward: AtomicU64,
    pub heartbeats: AtomicU64,
    pub start_time: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub resets_completed: u64,
    pub resets_failed: u64,
    pub room_failures: u64,
    pub tokens_archived: u64,
    pub tokens_carried_forward: u64,
    pub heartbeats: u64,
    pub uptime_secs: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            resets_completed: AtomicU64::new(0),
            resets_failed: AtomicU64::new(0),
            room_failures: AtomicU64::new(0),
            tokens_archived: AtomicU64::new(0),
            tokens_carried_forward: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_resets_completed(&self) {
        self.resets_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_resets_failed(&self) {
        self.resets_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_room_failures(&self) {
        self.room_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tokens_archived(&self, count: u64) {
        self.tokens_archived.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_tokens_carried_forward(&self, count: u64) {
        self.tokens_carried_forward.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_heartbeats(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            resets_completed: self.resets_completed.load(Ordering::Relaxed),
            resets_failed: self.resets_failed.load(Ordering::Relaxed),
            room_failures: self.room_failures.load(Ordering::Relaxed),
            tokens_archived: self.tokens_archived.load(Ordering::Relaxed),
            tokens_carried_forward: self.tokens_carried_forward.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}
