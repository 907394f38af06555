//! Error types for infradb-store.

use std::path::PathBuf;

use infradb_core::EntityKind;
use thiserror::Error;

/// Failures of the storage layer itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Any SQLite failure: constraint violation, lock timeout, I/O.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no database at {path}; run `infradb init` first")]
    Missing { path: PathBuf },

    #[error("database at {path} has schema version {found}, expected {expected}")]
    SchemaVersion {
        path: PathBuf,
        found: i64,
        expected: i64,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// True when SQLite gave up waiting for a lock.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        )
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

/// Failures of a single reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A referenced entity does not exist; nothing was written.
    #[error("{kind} not found: {key}")]
    NotFound { kind: EntityKind, key: String },

    /// The write failed and was rolled back as a unit.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<rusqlite::Error> for ReconcileError {
    fn from(e: rusqlite::Error) -> Self {
        ReconcileError::Storage(StoreError::Sqlite(e))
    }
}

impl From<serde_json::Error> for ReconcileError {
    fn from(e: serde_json::Error) -> Self {
        ReconcileError::Storage(StoreError::Json(e))
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
