//! infradb core library: domain types, typed record patches, configuration.
//!
//! - [`types`]: identifiers, enums and the change-log entry
//! - [`records`]: per-kind partial records handed to the reconciler
//! - [`config`]: YAML config with environment overrides
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod records;
pub mod types;

pub use config::{Config, DockerTarget};
pub use error::ConfigError;
pub use records::{
    DockerContainerRecord, DockerNetworkRecord, DockerVolumeRecord, HostRecord,
    ProxmoxContainerRecord, Record, ServiceRecord,
};
pub use types::{
    ChangeAttribution, ChangeLogEntry, ChangeSource, ChangeType, EntityId, EntityKind, GuestKind,
    HostType,
};
