//! Error types for infradb-sync.

use infradb_core::ConfigError;
use infradb_store::StoreError;
use thiserror::Error;

/// Failures of a sync run as a whole. Source and target failures are not
/// errors; they are recorded in the [`SyncReport`](crate::SyncReport).
#[derive(Debug, Error)]
pub enum SyncError {
    /// The run did not finish within its deadline.
    #[error("sync timed out after {secs}s")]
    TimedOut { secs: u64 },

    /// The worker thread went away without reporting.
    #[error("sync worker exited without a report")]
    WorkerLost,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::TimedOut { .. })
    }
}
