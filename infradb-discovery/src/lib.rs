//! Discovery producers.
//!
//! A [`Producer`] enumerates one source (a Proxmox cluster, a set of Docker
//! hosts), turns what it finds into typed records and hands each one to the
//! [`Reconciler`]. Producers own their transport and isolate failures per
//! target: an unreachable Docker host or a broken Proxmox node is recorded in
//! that target's [`TargetReport`] and the next target is still attempted.
//!
//! Transports sit behind traits ([`proxmox::ProxmoxApi`], [`docker::RemoteShell`])
//! so producers can be driven by in-process fakes.

pub mod docker;
pub mod error;
pub mod proxmox;
pub mod report;
pub mod tls;

use infradb_store::Reconciler;

pub use error::DiscoveryError;
pub use report::{EntityFailure, TargetReport};

/// One discovery source.
pub trait Producer: Send {
    /// Stable source name shown in sync reports.
    ///
    /// Audit rows carry each producer's `SOURCE` constant as `changed_by`
    /// instead, e.g. `proxmox_discovery`.
    fn name(&self) -> &'static str;

    /// Enumerates every target of the source.
    ///
    /// `Err` means the source as a whole was unreachable; per-target problems
    /// are reported inside the returned reports instead.
    fn discover(&mut self, reconciler: &Reconciler<'_>) -> Result<Vec<TargetReport>, DiscoveryError>;
}
