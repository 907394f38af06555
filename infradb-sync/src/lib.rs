//! # infradb-sync
//!
//! Sync orchestration over the discovery producers.
//!
//! Call [`pipeline::run`] to drive a list of producers against a store, or
//! [`pipeline::run_bounded`] to do the same under an optional overall deadline. The
//! CLI and the daemon both go through [`pipeline::sync_configured`].

pub mod error;
pub mod pipeline;
pub mod report;

pub use error::SyncError;
pub use report::{SourceReport, SourceStatus, SyncReport};
