//! Connection and transaction manager.
//!
//! A [`Store`] is a cheap handle (path + lock-wait budget). Each logical
//! operation opens its own connection, applies the pragmas, runs inside one
//! transaction and drops the connection on return. Dropping an uncommitted
//! `rusqlite::Transaction` rolls it back, so an `Err` from the closure undoes
//! the whole unit.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};

use crate::error::{io_err, StoreError};
use crate::schema;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Store {
    /// Creates the database file and schema if needed. Safe to call on an
    /// existing store of the current version.
    pub fn create(path: impl Into<PathBuf>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let store = Self { path, busy_timeout };
        let conn = store.connect_with(OpenFlags::default())?;
        let found = schema::version(&conn)?;
        if found != 0 && found != schema::SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                path: store.path.clone(),
                found,
                expected: schema::SCHEMA_VERSION,
            });
        }
        schema::apply(&conn)?;
        tracing::debug!(path = %store.path.display(), "schema ready");
        Ok(store)
    }

    /// Opens an existing store; never creates one.
    pub fn open(path: impl Into<PathBuf>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            return Err(StoreError::Missing { path });
        }
        let store = Self { path, busy_timeout };
        let conn = store.connect()?;
        schema::check_version(&conn, &store.path)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh connection with the consistency pragmas applied.
    pub fn connect(&self) -> Result<Connection, StoreError> {
        self.connect_with(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX)
    }

    fn connect_with(&self, flags: OpenFlags) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(&self.path, flags)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        Ok(conn)
    }

    /// Runs `f` in a write transaction.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front, so two writers of the
    /// same natural key queue on the busy timeout instead of racing between
    /// their read and their write.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.connect().map_err(E::from)?;
        let mut tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| E::from(StoreError::from(e)))?;
        let value = f(&mut tx)?;
        tx.commit().map_err(|e| E::from(StoreError::from(e)))?;
        Ok(value)
    }

    /// Runs `f` in a read transaction; gives a consistent snapshot across
    /// several queries.
    pub fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = f(&tx)?;
        tx.finish()?;
        Ok(value)
    }

    /// Liveness check: the file opens and answers `SELECT 1`.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}
