//! Active ingestion: drains externally-deposited data files into the storage
//! engine and quarantines the ones that cannot be loaded.
//!
//! The discovery side calls [`ActiveLoader::try_trigger_load`] for each file it
//! finds. Admitted files are deduplicated by [`PendingQueue`], drained by a
//! self-scaling [`WorkerPool`], handed to a [`LoadExecutor`], and on failure
//! moved into the fail directory by [`QuarantineManager`].

pub mod error;
pub mod executor;
pub mod loader;
pub mod metrics;
pub mod pending;
pub mod pool;
pub mod quarantine;

pub use error::QuarantineError;
pub use executor::{
    LoadError, LoadExecutor, LoadOutcome, LoadRequest, LoadStatement, LoadStatus,
};
pub use loader::ActiveLoader;
pub use metrics::{ActiveLoadMetrics, LoaderMetricsSnapshot};
pub use pending::{PendingEntry, PendingQueue};
pub use pool::WorkerPool;
pub use quarantine::{QuarantineAction, QuarantineManager, QuarantineReport};
