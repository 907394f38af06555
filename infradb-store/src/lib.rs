//! infradb-store: SQLite entity store, reconciler, audit trail and read views.
//!
//! # Write path
//!
//! ```text
//! Record ──► Reconciler::reconcile ──► Store::with_transaction (BEGIN IMMEDIATE)
//!                                         ├─ parent host check
//!                                         ├─ lookup by natural key
//!                                         ├─ INSERT / minimal UPDATE
//!                                         └─ SAVEPOINT audit insert
//! ```
//!
//! Reads go through [`Store::read`] and never write.

pub mod absence;
pub mod audit;
pub mod error;
pub mod projection;
pub mod reconcile;
pub mod schema;
pub mod services;
pub mod store;
mod values;

pub use audit::ChangeFilter;
pub use error::{ReconcileError, StoreError};
pub use reconcile::{Outcome, Reconciliation, Reconciler};
pub use store::Store;
