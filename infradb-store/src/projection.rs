//! Read-only views over the current inventory.
//!
//! Every call is a fresh query against committed state; nothing is cached and
//! nothing is written. Lookups by key return `Ok(None)` when the entity does
//! not exist.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{Map, Value};

use infradb_core::EntityId;

use crate::error::StoreError;
use crate::store::Store;
use crate::values::{flag, row_to_json, string_list};

// ---------------------------------------------------------------------------
// View types
// ---------------------------------------------------------------------------

/// A host joined with its Proxmox guest record and parent hostname.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostSummary {
    pub id: EntityId,
    pub hostname: String,
    pub host_type: Option<String>,
    pub management_ip: Option<String>,
    pub status: Option<String>,
    pub cpu_cores: Option<i64>,
    pub total_ram_mb: Option<i64>,
    pub vmid: Option<i64>,
    pub criticality: Option<String>,
    pub purpose: Option<String>,
    pub container_type: Option<String>,
    pub vm_type: Option<String>,
    pub os_type: Option<String>,
    pub os_template: Option<String>,
    pub unprivileged: Option<bool>,
    pub auto_start: Option<bool>,
    pub parent_hostname: Option<String>,
}

/// A Docker container joined with its host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSummary {
    pub id: EntityId,
    pub container_name: String,
    pub image: Option<String>,
    pub image_tag: Option<String>,
    pub status: Option<String>,
    pub health_status: Option<String>,
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    pub docker_host_id: EntityId,
    pub docker_host: String,
    pub host_ip: Option<String>,
}

/// Everything known about one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostDetail {
    pub host: Map<String, Value>,
    pub docker_containers: Vec<Map<String, Value>>,
    pub services: Vec<Map<String, Value>>,
    pub proxmox: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub hosts: HostStats,
    pub docker: DockerStats,
    pub services: ServiceStats,
    pub proxmox: ProxmoxStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostStats {
    pub total: i64,
    pub physical: i64,
    /// Active LXC guests.
    pub lxc: i64,
    /// Active VMs.
    pub vm: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DockerStats {
    pub containers: i64,
    pub running: i64,
    pub healthy: i64,
    pub networks: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub total: i64,
    /// `running` or `healthy`.
    pub running: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProxmoxStats {
    pub containers: i64,
    pub lxc: i64,
    pub vm: i64,
}

/// One network/address/host triple; hosts and interfaces may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyRow {
    pub network_name: String,
    pub cidr: String,
    pub vlan_id: Option<i64>,
    pub gateway: Option<String>,
    pub security_zone: Option<String>,
    pub hostname: Option<String>,
    pub host_type: Option<String>,
    pub interface_name: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RamUtilization {
    pub hostname: String,
    pub host_type: Option<String>,
    pub total_ram_mb: i64,
    pub used_ram_mb: Option<i64>,
    pub ram_utilization_pct: Option<f64>,
    pub criticality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostRef {
    pub id: EntityId,
    pub hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentService {
    pub id: EntityId,
    pub host_id: EntityId,
    pub service_name: String,
    pub status: Option<String>,
    pub dependency_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckRow {
    pub id: i64,
    pub status: String,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub checked_at: String,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

const CONTAINER_SELECT: &str = "
    SELECT dc.id, dc.container_name, dc.image, dc.image_tag, dc.status,
           dc.health_status, dc.ports, dc.networks,
           h.id AS docker_host_id, h.hostname AS docker_host, h.management_ip AS host_ip
    FROM docker_containers dc
    JOIN hosts h ON dc.docker_host_id = h.id";

impl Store {
    /// Physical hosts and Proxmox guests, ordered by vmid then hostname.
    pub fn hosts(&self) -> Result<Vec<HostSummary>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT h.id, h.hostname, h.host_type, h.management_ip, h.status, h.cpu_cores,
                        h.total_ram_mb, h.vmid, h.criticality, h.purpose,
                        pc.container_type, pc.vm_type, pc.os_type, pc.os_template,
                        pc.unprivileged, pc.auto_start,
                        ph.hostname AS parent_hostname
                 FROM hosts h
                 LEFT JOIN proxmox_containers pc ON h.id = pc.host_id
                           AND pc.proxmox_host_id = h.parent_host_id
                           AND pc.vmid = h.vmid
                 LEFT JOIN hosts ph ON h.parent_host_id = ph.id
                 WHERE h.host_type IN ('lxc', 'vm', 'physical')
                 ORDER BY h.vmid, h.hostname",
            )?;
            let rows = stmt.query_map([], host_summary)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// `None` when no host has this hostname.
    pub fn host_detail(&self, hostname: &str) -> Result<Option<HostDetail>, StoreError> {
        self.read(|conn| {
            let host = conn
                .query_row("SELECT * FROM hosts WHERE hostname = ?1", [hostname], row_to_json)
                .optional()?;
            let Some(host) = host else {
                return Ok(None);
            };
            let id = host.get("id").and_then(Value::as_i64).unwrap_or_default();
            let docker_containers = json_rows(
                conn,
                "SELECT * FROM docker_containers WHERE docker_host_id = ?1 ORDER BY container_name",
                id,
            )?;
            let services = json_rows(
                conn,
                "SELECT * FROM services WHERE host_id = ?1 ORDER BY service_name",
                id,
            )?;
            let proxmox = conn
                .query_row(
                    "SELECT pc.* FROM proxmox_containers pc
                     JOIN hosts h ON h.id = pc.host_id
                     WHERE pc.host_id = ?1
                       AND pc.proxmox_host_id = h.parent_host_id
                       AND pc.vmid = h.vmid",
                    [id],
                    row_to_json,
                )
                .optional()?;
            Ok(Some(HostDetail {
                host,
                docker_containers,
                services,
                proxmox,
            }))
        })
    }

    /// All containers, ordered by host then name.
    pub fn containers(&self) -> Result<Vec<ContainerSummary>, StoreError> {
        self.read(|conn| {
            let sql = format!("{CONTAINER_SELECT} ORDER BY h.hostname, dc.container_name");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], container_summary)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn containers_for_host(
        &self,
        docker_host_id: EntityId,
    ) -> Result<Vec<ContainerSummary>, StoreError> {
        self.read(|conn| {
            let sql = format!("{CONTAINER_SELECT} WHERE dc.docker_host_id = ?1 ORDER BY dc.container_name");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([docker_host_id.0], container_summary)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Guests currently running on one node, joined with their guest host.
    /// Records left behind by a migration or a vmid change are skipped.
    pub fn proxmox_guests(&self, proxmox_host_id: EntityId) -> Result<Vec<Map<String, Value>>, StoreError> {
        self.read(|conn| {
            json_rows(
                conn,
                "SELECT pc.*, h.hostname, h.status AS host_status
                 FROM proxmox_containers pc
                 JOIN hosts h ON pc.host_id = h.id
                             AND h.parent_host_id = pc.proxmox_host_id
                             AND h.vmid = pc.vmid
                 WHERE pc.proxmox_host_id = ?1
                 ORDER BY pc.vmid",
                proxmox_host_id.0,
            )
        })
    }

    pub fn stats(&self) -> Result<Stats, StoreError> {
        self.read(|conn| {
            let count = |sql: &str| -> Result<i64, StoreError> {
                Ok(conn.query_row(sql, [], |r| r.get(0))?)
            };
            Ok(Stats {
                hosts: HostStats {
                    total: count("SELECT COUNT(*) FROM hosts")?,
                    physical: count("SELECT COUNT(*) FROM hosts WHERE host_type = 'physical'")?,
                    lxc: count(
                        "SELECT COUNT(*) FROM hosts WHERE host_type = 'lxc' AND status = 'active'",
                    )?,
                    vm: count(
                        "SELECT COUNT(*) FROM hosts WHERE host_type = 'vm' AND status = 'active'",
                    )?,
                },
                docker: DockerStats {
                    containers: count("SELECT COUNT(*) FROM docker_containers")?,
                    running: count(
                        "SELECT COUNT(*) FROM docker_containers WHERE status = 'running'",
                    )?,
                    healthy: count(
                        "SELECT COUNT(*) FROM docker_containers WHERE health_status = 'healthy'",
                    )?,
                    networks: count("SELECT COUNT(*) FROM docker_networks")?,
                },
                services: ServiceStats {
                    total: count("SELECT COUNT(*) FROM services")?,
                    running: count(
                        "SELECT COUNT(*) FROM services WHERE status IN ('running', 'healthy')",
                    )?,
                },
                proxmox: ProxmoxStats {
                    containers: count("SELECT COUNT(*) FROM proxmox_containers")?,
                    lxc: count(
                        "SELECT COUNT(*) FROM proxmox_containers WHERE container_type = 'lxc'",
                    )?,
                    vm: count(
                        "SELECT COUNT(*) FROM proxmox_containers WHERE container_type = 'vm'",
                    )?,
                },
            })
        })
    }

    pub fn topology(&self) -> Result<Vec<TopologyRow>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT n.network_name, n.cidr, n.vlan_id, n.gateway, n.security_zone,
                        h.hostname, h.host_type, ni.interface_name, ip.ip_address
                 FROM networks n
                 LEFT JOIN ip_addresses ip ON ip.network_id = n.id
                 LEFT JOIN hosts h ON ip.host_id = h.id
                 LEFT JOIN network_interfaces ni ON ip.interface_id = ni.id
                 ORDER BY n.vlan_id, ip.ip_address",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(TopologyRow {
                    network_name: r.get(0)?,
                    cidr: r.get(1)?,
                    vlan_id: r.get(2)?,
                    gateway: r.get(3)?,
                    security_zone: r.get(4)?,
                    hostname: r.get(5)?,
                    host_type: r.get(6)?,
                    interface_name: r.get(7)?,
                    ip_address: r.get(8)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// RAM use of active hosts with a known total, busiest first.
    pub fn ram_utilization(&self) -> Result<Vec<RamUtilization>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT hostname, host_type, total_ram_mb, used_ram_mb,
                        ROUND((used_ram_mb * 100.0) / NULLIF(total_ram_mb, 0), 2) AS pct,
                        criticality
                 FROM hosts
                 WHERE status = 'active' AND total_ram_mb IS NOT NULL
                 ORDER BY pct DESC, hostname",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(RamUtilization {
                    hostname: r.get(0)?,
                    host_type: r.get(1)?,
                    total_ram_mb: r.get(2)?,
                    used_ram_mb: r.get(3)?,
                    ram_utilization_pct: r.get(4)?,
                    criticality: r.get(5)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn host_by_ip(&self, ip: &str) -> Result<Option<HostRef>, StoreError> {
        self.host_ref("SELECT id, hostname FROM hosts WHERE management_ip = ?1", ip)
    }

    pub fn host_by_name(&self, hostname: &str) -> Result<Option<HostRef>, StoreError> {
        self.host_ref("SELECT id, hostname FROM hosts WHERE hostname = ?1", hostname)
    }

    fn host_ref(&self, sql: &str, key: &str) -> Result<Option<HostRef>, StoreError> {
        self.read(|conn| {
            Ok(conn
                .query_row(sql, [key], |r| {
                    Ok(HostRef {
                        id: EntityId(r.get(0)?),
                        hostname: r.get(1)?,
                    })
                })
                .optional()?)
        })
    }

    /// Services that declared a dependency on `service_id`.
    pub fn dependent_services(&self, service_id: EntityId) -> Result<Vec<DependentService>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.host_id, s.service_name, s.status, sd.dependency_type
                 FROM services s
                 JOIN service_dependencies sd ON s.id = sd.dependent_service_id
                 WHERE sd.dependency_service_id = ?1
                 ORDER BY s.service_name",
            )?;
            let rows = stmt.query_map([service_id.0], |r| {
                Ok(DependentService {
                    id: EntityId(r.get(0)?),
                    host_id: EntityId(r.get(1)?),
                    service_name: r.get(2)?,
                    status: r.get(3)?,
                    dependency_type: r.get(4)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Health checks of one service, newest first.
    pub fn health_history(&self, service_id: EntityId, limit: usize) -> Result<Vec<HealthCheckRow>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, status, response_time_ms, error_message, checked_at
                 FROM health_checks
                 WHERE service_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![service_id.0, limit], |r| {
                Ok(HealthCheckRow {
                    id: r.get(0)?,
                    status: r.get(1)?,
                    response_time_ms: r.get(2)?,
                    error_message: r.get(3)?,
                    checked_at: r.get(4)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn host_summary(r: &Row<'_>) -> rusqlite::Result<HostSummary> {
    Ok(HostSummary {
        id: EntityId(r.get("id")?),
        hostname: r.get("hostname")?,
        host_type: r.get("host_type")?,
        management_ip: r.get("management_ip")?,
        status: r.get("status")?,
        cpu_cores: r.get("cpu_cores")?,
        total_ram_mb: r.get("total_ram_mb")?,
        vmid: r.get("vmid")?,
        criticality: r.get("criticality")?,
        purpose: r.get("purpose")?,
        container_type: r.get("container_type")?,
        vm_type: r.get("vm_type")?,
        os_type: r.get("os_type")?,
        os_template: r.get("os_template")?,
        unprivileged: flag(r, "unprivileged")?,
        auto_start: flag(r, "auto_start")?,
        parent_hostname: r.get("parent_hostname")?,
    })
}

fn container_summary(r: &Row<'_>) -> rusqlite::Result<ContainerSummary> {
    Ok(ContainerSummary {
        id: EntityId(r.get("id")?),
        container_name: r.get("container_name")?,
        image: r.get("image")?,
        image_tag: r.get("image_tag")?,
        status: r.get("status")?,
        health_status: r.get("health_status")?,
        ports: string_list(r, "ports")?,
        networks: string_list(r, "networks")?,
        docker_host_id: EntityId(r.get("docker_host_id")?),
        docker_host: r.get("docker_host")?,
        host_ip: r.get("host_ip")?,
    })
}

fn json_rows(conn: &Connection, sql: &str, id: i64) -> Result<Vec<Map<String, Value>>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([id], row_to_json)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
