//! Worker pool for load workers.
//!
//! A fixed `rayon` pool sized to the worker cap runs the tasks. The target
//! concurrency is only bookkeeping: callers never submit more than
//! `target - active` tasks, so the pool itself never needs resizing. The
//! active count is bumped at submission, so a task waiting for a free thread
//! already counts as active.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

/// Decrements the active count when a task finishes, panicking or not.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct WorkerPool {
    name: String,
    pool: rayon::ThreadPool,
    core_size: AtomicUsize,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Build a pool of `num_threads` threads named `<name>-<index>`.
    pub fn new(name: impl Into<String>, num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let name = name.into();
        let thread_prefix = name.clone();
        let panic_pool = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(move |i| format!("{}-{}", thread_prefix, i))
            .panic_handler(move |_| {
                error!(pool = %panic_pool, "worker task panicked");
            })
            .build()?;

        Ok(Self {
            name,
            pool,
            core_size: AtomicUsize::new(num_threads),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Desired concurrency.
    pub fn core_size(&self) -> usize {
        self.core_size.load(Ordering::Acquire)
    }

    pub fn set_core_size(&self, size: usize) {
        let prev = self.core_size.swap(size, Ordering::AcqRel);
        if prev != size {
            debug!(pool = %self.name, from = prev, to = size, "worker pool resized");
        }
    }

    /// Tasks submitted and not yet finished.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = ActiveGuard(Arc::clone(&self.active));
        self.pool.spawn(move || {
            let _guard = guard;
            task();
        });
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("threads", &self.pool.current_num_threads())
            .field("core_size", &self.core_size())
            .field("active", &self.active_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    fn wait_for(pool: &WorkerPool, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.active_count() != expected {
            assert!(Instant::now() < deadline, "active count never reached {expected}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn active_count_tracks_running_tasks() {
        let pool = WorkerPool::new("test-pool", 2).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        for _ in 0..2 {
            let rx = Arc::clone(&release_rx);
            pool.execute(move || {
                let _ = rx.lock().unwrap().recv();
            });
        }
        assert_eq!(pool.active_count(), 2);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        wait_for(&pool, 0);
    }

    #[test]
    fn queued_tasks_count_as_active() {
        let pool = WorkerPool::new("test-pool", 1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        for _ in 0..3 {
            let rx = Arc::clone(&release_rx);
            pool.execute(move || {
                let _ = rx.lock().unwrap().recv();
            });
        }
        assert_eq!(pool.active_count(), 3);

        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        wait_for(&pool, 0);
    }

    #[test]
    fn panicking_task_releases_its_slot() {
        let pool = WorkerPool::new("test-pool", 1).unwrap();
        pool.execute(|| panic!("boom"));
        wait_for(&pool, 0);

        let (tx, rx) = mpsc::channel();
        pool.execute(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn threads_are_named_after_the_pool() {
        let pool = WorkerPool::new("named", 1).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.execute(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        });
        let name = rx.recv().unwrap().unwrap();
        assert!(name.starts_with("named-"));
    }

    #[test]
    fn set_core_size() {
        let pool = WorkerPool::new("test-pool", 4).unwrap();
        pool.set_core_size(1);
        assert_eq!(pool.core_size(), 1);
    }
}
