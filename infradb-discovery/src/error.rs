//! Error types for infradb-discovery.

use infradb_store::{ReconcileError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The remote source could not be reached at all (auth failure,
    /// connection refused, TLS failure).
    #[error("{endpoint} unavailable: {reason}")]
    SourceUnavailable { endpoint: String, reason: String },

    /// The source answered with an HTTP error status.
    #[error("{url} returned HTTP {status}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    #[error("`{command}` on {target} failed ({status}): {stderr}")]
    Command {
        target: String,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` on {target} timed out after {secs}s")]
    Timeout {
        target: String,
        command: String,
        secs: u64,
    },

    #[error("unexpected {what}: {reason}")]
    Parse { what: String, reason: String },

    /// A Docker target has no matching host row to attach its resources to.
    #[error("no inventory host with management IP or hostname '{0}'")]
    UnknownHost(String),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) fn parse_err(what: impl Into<String>, reason: impl ToString) -> DiscoveryError {
    DiscoveryError::Parse {
        what: what.into(),
        reason: reason.to_string(),
    }
}
