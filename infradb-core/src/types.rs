//! Domain types for the infrastructure inventory.
//!
//! Enums serialize to the lowercase strings that are stored in SQLite, so the
//! same value round-trips through the database, the audit log and the socket
//! protocol unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Surrogate row identifier of any inventory entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What kind of machine a host row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostType {
    Physical,
    Vm,
    Lxc,
    DockerHost,
}

impl HostType {
    pub fn as_str(self) -> &'static str {
        match self {
            HostType::Physical => "physical",
            HostType::Vm => "vm",
            HostType::Lxc => "lxc",
            HostType::DockerHost => "docker_host",
        }
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "physical" => Ok(HostType::Physical),
            "vm" => Ok(HostType::Vm),
            "lxc" => Ok(HostType::Lxc),
            "docker_host" => Ok(HostType::DockerHost),
            other => Err(format!("unknown host type '{other}'")),
        }
    }
}

/// Proxmox guest flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Vm,
    Lxc,
}

impl GuestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GuestKind::Vm => "vm",
            GuestKind::Lxc => "lxc",
        }
    }

    /// The host type a guest of this kind is inventoried as.
    pub fn host_type(self) -> HostType {
        match self {
            GuestKind::Vm => HostType::Vm,
            GuestKind::Lxc => HostType::Lxc,
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The entity kinds the reconciler knows how to merge.
///
/// Each kind maps to exactly one table and one natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Host,
    ProxmoxContainer,
    DockerContainer,
    DockerVolume,
    DockerNetwork,
    Service,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Host,
        EntityKind::ProxmoxContainer,
        EntityKind::DockerContainer,
        EntityKind::DockerVolume,
        EntityKind::DockerNetwork,
        EntityKind::Service,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Host => "host",
            EntityKind::ProxmoxContainer => "proxmox_container",
            EntityKind::DockerContainer => "docker_container",
            EntityKind::DockerVolume => "docker_volume",
            EntityKind::DockerNetwork => "docker_network",
            EntityKind::Service => "service",
        }
    }

    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Host => "hosts",
            EntityKind::ProxmoxContainer => "proxmox_containers",
            EntityKind::DockerContainer => "docker_containers",
            EntityKind::DockerVolume => "docker_volumes",
            EntityKind::DockerNetwork => "docker_networks",
            EntityKind::Service => "services",
        }
    }

    /// Columns that identify a row within the kind's table.
    pub fn natural_key(self) -> &'static [&'static str] {
        match self {
            EntityKind::Host => &["hostname"],
            EntityKind::ProxmoxContainer => &["proxmox_host_id", "vmid"],
            EntityKind::DockerContainer => &["docker_host_id", "container_name"],
            EntityKind::DockerVolume => &["docker_host_id", "volume_name"],
            EntityKind::DockerNetwork => &["docker_host_id", "network_name"],
            EntityKind::Service => &["host_id", "service_name"],
        }
    }

    /// Columns other than the natural key that a record may set.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            EntityKind::Host => &[
                "host_type",
                "management_ip",
                "status",
                "cpu_cores",
                "total_ram_mb",
                "used_ram_mb",
                "vmid",
                "parent_host_id",
                "criticality",
                "purpose",
            ],
            EntityKind::ProxmoxContainer => &[
                "host_id",
                "container_type",
                "vm_type",
                "os_type",
                "os_template",
                "unprivileged",
                "auto_start",
                "nesting",
                "boot_disk",
                "rootfs_storage",
                "network_config",
            ],
            EntityKind::DockerContainer => &[
                "container_id",
                "image",
                "image_tag",
                "status",
                "health_status",
                "restart_policy",
                "network_mode",
                "networks",
                "ports",
                "environment_vars",
                "labels",
                "memory_limit_mb",
                "command",
            ],
            EntityKind::DockerVolume => &["driver", "mount_point", "options", "labels"],
            EntityKind::DockerNetwork => &[
                "network_id",
                "driver",
                "subnet",
                "gateway",
                "internal",
                "attachable",
                "labels",
            ],
            EntityKind::Service => &[
                "service_type",
                "port",
                "protocol",
                "status",
                "url",
                "criticality",
            ],
        }
    }

    /// Fields whose change alone makes an update audit-worthy.
    ///
    /// `None` means every applied change is logged.
    pub fn significant_fields(self) -> Option<&'static [&'static str]> {
        match self {
            EntityKind::DockerContainer => Some(&["status", "health_status"]),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown entity type '{s}'"))
    }
}

/// Whether a change-log entry records a creation or an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeType::Create),
            "update" => Ok(ChangeType::Update),
            other => Err(format!("unknown change type '{other}'")),
        }
    }
}

/// Who originated a change: an operator or a discovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    Manual,
    Automation,
}

impl ChangeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeSource::Manual => "manual",
            ChangeSource::Automation => "automation",
        }
    }
}

impl fmt::Display for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ChangeSource::Manual),
            "automation" => Ok(ChangeSource::Automation),
            other => Err(format!("unknown change source '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Attribution stamped on every audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeAttribution {
    pub changed_by: String,
    pub source: ChangeSource,
}

impl ChangeAttribution {
    /// Attribution for a discovery run, e.g. `proxmox_discovery`.
    pub fn automation(changed_by: impl Into<String>) -> Self {
        Self {
            changed_by: changed_by.into(),
            source: ChangeSource::Automation,
        }
    }

    /// Attribution for an operator edit.
    pub fn manual(changed_by: impl Into<String>) -> Self {
        Self {
            changed_by: changed_by.into(),
            source: ChangeSource::Manual,
        }
    }
}

/// One immutable row of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: i64,
    pub change_type: ChangeType,
    pub entity_type: EntityKind,
    pub entity_id: EntityId,
    pub changed_by: String,
    pub change_source: ChangeSource,
    /// `None` exactly when `change_type` is `Create`.
    pub old_values: Option<Value>,
    pub new_values: Value,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}
