//! Active-load orchestrator.
//!
//! [`ActiveLoader::try_trigger_load`] admits a file and tops the worker pool up
//! to `min(pending, max_workers)`. Each worker drains the pending queue until
//! it has seen it empty for the configured idle budget, then exits on its own.
//! Per file, the worker submits a load statement to the [`LoadExecutor`] and
//! either drops the entry (success), leaves the file in place (transient), or
//! quarantines it together with its sidecars.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};
use tsload_core::ActiveLoadConfig;

use crate::executor::{LoadExecutor, LoadOutcome, LoadRequest, LoadStatement};
use crate::metrics::{ActiveLoadMetrics, LoaderMetricsSnapshot};
use crate::pending::{PendingEntry, PendingQueue};
use crate::pool::WorkerPool;
use crate::quarantine::{QuarantineAction, QuarantineManager};

const POOL_NAME: &str = "active-load";

/// Target concurrency for a given backlog.
pub fn target_concurrency_for(pending: usize, max_workers: usize) -> usize {
    pending.min(max_workers)
}

/// State shared between the admission side and every worker thread.
struct LoaderShared {
    queue: PendingQueue,
    executor: Arc<dyn LoadExecutor>,
    fail_dir: PathBuf,
    quarantine: OnceLock<QuarantineManager>,
    metrics: ActiveLoadMetrics,
    shutdown: AtomicBool,
    idle_retry_budget: u64,
    idle_poll_interval: Duration,
}

pub struct ActiveLoader {
    shared: Arc<LoaderShared>,
    pool: OnceLock<WorkerPool>,
    /// Serializes pool reconciliation between concurrent admissions.
    adjust: Mutex<()>,
    max_workers: usize,
    max_pending_size: usize,
}

impl ActiveLoader {
    pub fn new(config: &ActiveLoadConfig, executor: Arc<dyn LoadExecutor>) -> Self {
        Self {
            shared: Arc::new(LoaderShared {
                queue: PendingQueue::new(),
                executor,
                fail_dir: config.fail_dir.clone(),
                quarantine: OnceLock::new(),
                metrics: ActiveLoadMetrics::default(),
                shutdown: AtomicBool::new(false),
                idle_retry_budget: config.idle_retry_budget(),
                idle_poll_interval: config.idle_poll_interval(),
            }),
            pool: OnceLock::new(),
            adjust: Mutex::new(()),
            max_workers: config.resolved_max_thread_num(),
            max_pending_size: config.max_pending_size,
        }
    }

    /// Admit a file for loading. Duplicates of pending or in-flight files are
    /// ignored.
    pub fn try_trigger_load(&self, path: impl Into<PathBuf>, generated_by_external_source: bool) {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        if self.shared.queue.enqueue(path, generated_by_external_source) {
            self.shared.quarantine();
            self.adjust_pool_if_necessary();
        }
    }

    /// Admit a batch of files, reconciling the pool once. Returns how many
    /// were accepted.
    pub fn try_trigger_load_all<I, P>(&self, files: I) -> usize
    where
        I: IntoIterator<Item = (P, bool)>,
        P: Into<PathBuf>,
    {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return 0;
        }
        let accepted = files
            .into_iter()
            .map(|(path, generated)| self.shared.queue.enqueue(path, generated))
            .filter(|accepted| *accepted)
            .count();
        if accepted > 0 {
            self.shared.quarantine();
            self.adjust_pool_if_necessary();
        }
        accepted
    }

    /// How many more files the discovery side should submit right now.
    pub fn remaining_admission_capacity(&self) -> usize {
        self.max_pending_size.saturating_sub(self.shared.queue.size())
    }

    fn adjust_pool_if_necessary(&self) {
        let _guard = self.adjust.lock().unwrap_or_else(|e| e.into_inner());
        if self.pool.get().is_none() {
            match WorkerPool::new(POOL_NAME, self.max_workers) {
                Ok(pool) => {
                    let _ = self.pool.set(pool);
                }
                Err(e) => {
                    warn!(error = %e, "failed to build active load worker pool");
                    return;
                }
            }
        }
        let Some(pool) = self.pool.get() else {
            return;
        };

        let target = target_concurrency_for(self.shared.queue.size(), self.max_workers);
        if pool.core_size() != target {
            pool.set_core_size(target);
        }

        // Workers already running pick up remaining backlog themselves.
        let needed = target.saturating_sub(pool.active_count());
        for _ in 0..needed {
            let shared = Arc::clone(&self.shared);
            pool.execute(move || shared.run_worker());
        }
        if needed > 0 {
            debug!(target_concurrency = target, started = needed, "active load workers started");
        }
    }

    /// Count files in the fail directory and publish the gauge.
    pub fn count_and_report_failed_files(&self) -> u64 {
        let quarantine = self.shared.quarantine();
        match quarantine.count_quarantined_files() {
            Ok(count) => {
                self.shared.metrics.record_failed_file_count(count);
                count
            }
            Err(e) => {
                warn!(
                    fail_dir = %quarantine.fail_dir().display(),
                    error = %e,
                    "failed to count files in fail directory"
                );
                0
            }
        }
    }

    /// Stop admitting files. Workers finish the file they hold and exit.
    pub fn shutdown(&self) {
        info!("active loader shutdown requested");
        self.shared.shutdown.store(true, Ordering::Release);
    }

    pub fn fail_dir(&self) -> &Path {
        &self.shared.fail_dir
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn pending_count(&self) -> usize {
        self.shared.queue.size()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.queue.in_flight_count()
    }

    pub fn active_workers(&self) -> usize {
        self.pool.get().map(WorkerPool::active_count).unwrap_or(0)
    }

    pub fn target_concurrency(&self) -> usize {
        self.pool.get().map(WorkerPool::core_size).unwrap_or(0)
    }

    pub fn metrics(&self) -> LoaderMetricsSnapshot {
        let m = &self.shared.metrics;
        LoaderMetricsSnapshot {
            files_loaded: m.files_loaded(),
            files_quarantined: m.files_quarantined(),
            files_deferred: m.files_deferred(),
            failed_file_count: m.failed_file_count(),
            pending: self.pending_count(),
            in_flight: self.in_flight_count(),
            active_workers: self.active_workers(),
            target_concurrency: self.target_concurrency(),
            last_success_at: m.last_success_at(),
            last_failure_at: m.last_failure_at(),
        }
    }
}

impl LoaderShared {
    /// Fail-directory manager, creating the directory on first use. A creation
    /// failure is only logged; the next move retries it.
    fn quarantine(&self) -> &QuarantineManager {
        self.quarantine.get_or_init(|| {
            let manager = QuarantineManager::new(&self.fail_dir);
            if let Err(e) = manager.ensure_dir() {
                warn!(
                    fail_dir = %self.fail_dir.display(),
                    error = %e,
                    "error occurred while creating fail directory for active load"
                );
            }
            manager
        })
    }

    fn run_worker(&self) {
        debug!("active load worker started");
        while let Some(entry) = self.next_pending_file() {
            self.load_one(entry);
        }
        debug!("active load worker idle, exiting");
    }

    /// Dequeue with a bounded number of idle polls.
    fn next_pending_file(&self) -> Option<PendingEntry> {
        let mut retries = 0u64;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return None;
            }
            if let Some(entry) = self.queue.dequeue() {
                return Some(entry);
            }
            if retries >= self.idle_retry_budget {
                return None;
            }
            retries += 1;
            thread::sleep(self.idle_poll_interval);
        }
    }

    fn load_one(&self, entry: PendingEntry) {
        let _in_flight = InFlightGuard {
            queue: &self.queue,
            path: &entry.path,
        };

        let statement = LoadStatement::new(
            LoadRequest::for_active_load(&entry.path),
            entry.generated_by_external_source,
        );
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            self.executor.execute(&statement)
        })) {
            Ok(result) => LoadOutcome::classify(result),
            Err(payload) => LoadOutcome::UnexpectedFailure(panic_message(payload.as_ref())),
        };
        self.handle_outcome(&entry, outcome);
    }

    fn handle_outcome(&self, entry: &PendingEntry, outcome: LoadOutcome) {
        let path = entry.path.display();
        let generated = entry.generated_by_external_source;

        match &outcome {
            LoadOutcome::Success | LoadOutcome::Redirect => {
                info!(path = %path, generated, "successfully auto loaded file");
            }
            LoadOutcome::Transient(reason) => {
                info!(
                    path = %path,
                    generated,
                    reason = %reason,
                    "rejected auto load due to resource constraints, will retry later"
                );
            }
            LoadOutcome::ExplicitFailure(status) => {
                warn!(
                    path = %path,
                    generated,
                    status = %status,
                    "failed to auto load file, moving it to fail directory"
                );
            }
            LoadOutcome::NotFound => {
                warn!(path = %path, generated, "failed to auto load file: file not found");
            }
            LoadOutcome::UnexpectedFailure(cause) => {
                warn!(
                    path = %path,
                    generated,
                    error = %cause,
                    "failed to auto load file because of an unexpected error, moving it to fail directory"
                );
            }
        }

        if outcome.is_success() {
            self.metrics.record_loaded();
        } else if outcome.should_quarantine() {
            let report = self.quarantine().quarantine_with_sidecars(&entry.path);
            // Only a data file that actually left its source location counts.
            if matches!(
                report.action_for(&entry.path),
                Some(
                    QuarantineAction::Moved { .. }
                        | QuarantineAction::Renamed { .. }
                        | QuarantineAction::DeletedDuplicate { .. }
                )
            ) {
                self.metrics.record_quarantined();
            }
        } else {
            self.metrics.record_deferred();
        }
    }
}

/// Releases the in-flight marker on every exit path.
struct InFlightGuard<'a> {
    queue: &'a PendingQueue,
    path: &'a Path,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.queue.complete_in_flight(self.path);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("load panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("load panicked: {s}")
    } else {
        "load panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{LoadError, LoadStatus};

    fn config(fail_dir: &Path, max_threads: usize) -> ActiveLoadConfig {
        let mut config = ActiveLoadConfig::with_fail_dir(fail_dir);
        config.max_thread_num = max_threads;
        config.max_pending_size = 10;
        config.check_interval_secs = 1;
        config.idle_poll_interval_ms = 5;
        config
    }

    #[test]
    fn target_is_capped_by_max_workers() {
        assert_eq!(target_concurrency_for(3, 8), 3);
        assert_eq!(target_concurrency_for(20, 8), 8);
        assert_eq!(target_concurrency_for(0, 8), 0);
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("bad file");
        assert_eq!(panic_message(payload.as_ref()), "load panicked: bad file");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "load panicked");
    }

    #[test]
    fn nothing_is_created_before_first_admission() {
        let tmp = tempfile::tempdir().unwrap();
        let fail_dir = tmp.path().join("failed");
        let executor: Arc<dyn LoadExecutor> =
            Arc::new(|_: &LoadStatement| -> Result<LoadStatus, LoadError> { Ok(LoadStatus::success()) });
        let loader = ActiveLoader::new(&config(&fail_dir, 2), executor);

        assert!(!fail_dir.exists());
        assert_eq!(loader.active_workers(), 0);
        assert_eq!(loader.target_concurrency(), 0);
        assert_eq!(loader.remaining_admission_capacity(), 10);
    }

    #[test]
    fn admission_creates_fail_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let fail_dir = tmp.path().join("failed");
        let executor: Arc<dyn LoadExecutor> =
            Arc::new(|_: &LoadStatement| -> Result<LoadStatus, LoadError> { Ok(LoadStatus::success()) });
        let loader = ActiveLoader::new(&config(&fail_dir, 2), executor);

        loader.try_trigger_load(tmp.path().join("a.tsfile"), false);
        assert!(fail_dir.is_dir());
    }

    #[test]
    fn shutdown_rejects_new_admissions() {
        let tmp = tempfile::tempdir().unwrap();
        let executor: Arc<dyn LoadExecutor> =
            Arc::new(|_: &LoadStatement| -> Result<LoadStatus, LoadError> { Ok(LoadStatus::success()) });
        let loader = ActiveLoader::new(&config(&tmp.path().join("failed"), 2), executor);

        loader.shutdown();
        loader.try_trigger_load(tmp.path().join("a.tsfile"), false);
        assert_eq!(loader.pending_count(), 0);
        assert_eq!(loader.try_trigger_load_all(vec![(tmp.path().join("b"), false)]), 0);
    }
}
