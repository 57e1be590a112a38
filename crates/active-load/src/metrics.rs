use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters produced by the active-load pipeline.
#[derive(Debug, Default)]
pub struct ActiveLoadMetrics {
    loaded: AtomicU64,
    quarantined: AtomicU64,
    deferred: AtomicU64,
    /// Gauge: files currently sitting in the fail directory.
    failed_file_count: AtomicU64,
    last_success_at: RwLock<Option<DateTime<Utc>>>,
    last_failure_at: RwLock<Option<DateTime<Utc>>>,
}

/// Point-in-time view of the loader, safe to serialize for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct LoaderMetricsSnapshot {
    pub files_loaded: u64,
    pub files_quarantined: u64,
    pub files_deferred: u64,
    pub failed_file_count: u64,
    pub pending: usize,
    pub in_flight: usize,
    pub active_workers: usize,
    pub target_concurrency: usize,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl ActiveLoadMetrics {
    pub fn record_loaded(&self) {
        self.loaded.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut ts) = self.last_success_at.write() {
            *ts = Some(Utc::now());
        }
    }

    pub fn record_quarantined(&self) {
        self.quarantined.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut ts) = self.last_failure_at.write() {
            *ts = Some(Utc::now());
        }
    }

    pub fn record_deferred(&self) {
        self.deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_file_count(&self, count: u64) {
        self.failed_file_count.store(count, Ordering::Relaxed);
    }

    pub fn files_loaded(&self) -> u64 {
        self.loaded.load(Ordering::Relaxed)
    }

    pub fn files_quarantined(&self) -> u64 {
        self.quarantined.load(Ordering::Relaxed)
    }

    pub fn files_deferred(&self) -> u64 {
        self.deferred.load(Ordering::Relaxed)
    }

    pub fn failed_file_count(&self) -> u64 {
        self.failed_file_count.load(Ordering::Relaxed)
    }

    pub(crate) fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at.read().ok().and_then(|ts| *ts)
    }

    pub(crate) fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at.read().ok().and_then(|ts| *ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metrics() {
        let m = ActiveLoadMetrics::default();
        assert_eq!(m.files_loaded(), 0);
        assert_eq!(m.files_quarantined(), 0);
        assert_eq!(m.failed_file_count(), 0);
        assert!(m.last_success_at().is_none());
    }

    #[test]
    fn records_outcomes() {
        let m = ActiveLoadMetrics::default();
        m.record_loaded();
        m.record_loaded();
        m.record_quarantined();
        m.record_deferred();
        m.record_failed_file_count(7);

        assert_eq!(m.files_loaded(), 2);
        assert_eq!(m.files_quarantined(), 1);
        assert_eq!(m.files_deferred(), 1);
        assert_eq!(m.failed_file_count(), 7);
        assert!(m.last_success_at().is_some());
        assert!(m.last_failure_at().is_some());
    }
}
