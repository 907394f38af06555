//! Typed partial records handed from producers to the reconciler.
//!
//! Natural-key fields are plain fields; everything else is an `Option`. A
//! `None` field means "not observed in this pass" and is skipped during
//! serialization, so it never reaches the database and never overwrites a
//! stored value.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::{ChangeType, EntityId, EntityKind, GuestKind, HostType};

/// A normalized record of one entity kind.
pub trait Record: Serialize {
    const KIND: EntityKind;

    /// Host references carried by the record, as `(column, host id)`.
    ///
    /// Every reference must resolve to an existing host at write time.
    fn parent_refs(&self) -> Vec<(&'static str, EntityId)>;

    /// Human-readable audit description for a change of this record.
    fn description(&self, _change: ChangeType) -> Option<String> {
        None
    }

    /// The present fields of the record, keyed by column name.
    fn fields(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(<serde_json::Error as serde::ser::Error>::custom(
                "record did not serialize to a map",
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostRecord {
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_type: Option<HostType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ram_mb: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_ram_mb: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vmid: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_host_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criticality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

impl HostRecord {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }
}

impl Record for HostRecord {
    const KIND: EntityKind = EntityKind::Host;

    fn parent_refs(&self) -> Vec<(&'static str, EntityId)> {
        self.parent_host_id
            .map(|id| ("parent_host_id", id))
            .into_iter()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Proxmox guests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxmoxContainerRecord {
    pub proxmox_host_id: EntityId,
    pub vmid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<EntityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_type: Option<GuestKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unprivileged: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_start: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nesting: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_disk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rootfs_storage: Option<String>,
    /// NIC definitions keyed by device name (`net0`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_config: Option<BTreeMap<String, String>>,
}

impl ProxmoxContainerRecord {
    pub fn new(proxmox_host_id: EntityId, vmid: i64) -> Self {
        Self {
            proxmox_host_id,
            vmid,
            host_id: None,
            container_type: None,
            vm_type: None,
            os_type: None,
            os_template: None,
            unprivileged: None,
            auto_start: None,
            nesting: None,
            boot_disk: None,
            rootfs_storage: None,
            network_config: None,
        }
    }
}

impl Record for ProxmoxContainerRecord {
    const KIND: EntityKind = EntityKind::ProxmoxContainer;

    fn parent_refs(&self) -> Vec<(&'static str, EntityId)> {
        let mut refs = vec![("proxmox_host_id", self.proxmox_host_id)];
        if let Some(id) = self.host_id {
            refs.push(("host_id", id));
        }
        refs
    }

    fn description(&self, change: ChangeType) -> Option<String> {
        let verb = match change {
            ChangeType::Create => "Created",
            ChangeType::Update => "Updated",
        };
        let kind = self.container_type.map(GuestKind::as_str).unwrap_or("guest");
        Some(format!("{verb} {kind} {}", self.vmid))
    }
}

// ---------------------------------------------------------------------------
// Docker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DockerContainerRecord {
    pub docker_host_id: EntityId,
    pub container_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub networks: Option<Vec<String>>,
    /// Published ports as `host:container` pairs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment_vars: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl DockerContainerRecord {
    pub fn new(docker_host_id: EntityId, container_name: impl Into<String>) -> Self {
        Self {
            docker_host_id,
            container_name: container_name.into(),
            container_id: None,
            image: None,
            image_tag: None,
            status: None,
            health_status: None,
            restart_policy: None,
            network_mode: None,
            networks: None,
            ports: None,
            environment_vars: None,
            labels: None,
            memory_limit_mb: None,
            command: None,
        }
    }
}

impl Record for DockerContainerRecord {
    const KIND: EntityKind = EntityKind::DockerContainer;

    fn parent_refs(&self) -> Vec<(&'static str, EntityId)> {
        vec![("docker_host_id", self.docker_host_id)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DockerVolumeRecord {
    pub docker_host_id: EntityId,
    pub volume_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

impl DockerVolumeRecord {
    pub fn new(docker_host_id: EntityId, volume_name: impl Into<String>) -> Self {
        Self {
            docker_host_id,
            volume_name: volume_name.into(),
            driver: None,
            mount_point: None,
            options: None,
            labels: None,
        }
    }
}

impl Record for DockerVolumeRecord {
    const KIND: EntityKind = EntityKind::DockerVolume;

    fn parent_refs(&self) -> Vec<(&'static str, EntityId)> {
        vec![("docker_host_id", self.docker_host_id)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DockerNetworkRecord {
    pub docker_host_id: EntityId,
    pub network_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

impl DockerNetworkRecord {
    pub fn new(docker_host_id: EntityId, network_name: impl Into<String>) -> Self {
        Self {
            docker_host_id,
            network_name: network_name.into(),
            network_id: None,
            driver: None,
            subnet: None,
            gateway: None,
            internal: None,
            attachable: None,
            labels: None,
        }
    }
}

impl Record for DockerNetworkRecord {
    const KIND: EntityKind = EntityKind::DockerNetwork;

    fn parent_refs(&self) -> Vec<(&'static str, EntityId)> {
        vec![("docker_host_id", self.docker_host_id)]
    }
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRecord {
    pub host_id: EntityId,
    pub service_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criticality: Option<String>,
}

impl ServiceRecord {
    pub fn new(host_id: EntityId, service_name: impl Into<String>) -> Self {
        Self {
            host_id,
            service_name: service_name.into(),
            service_type: None,
            port: None,
            protocol: None,
            status: None,
            url: None,
            criticality: None,
        }
    }
}

impl Record for ServiceRecord {
    const KIND: EntityKind = EntityKind::Service;

    fn parent_refs(&self) -> Vec<(&'static str, EntityId)> {
        vec![("host_id", self.host_id)]
    }
}
