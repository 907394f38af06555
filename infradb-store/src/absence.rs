//! Status marking for entities a source no longer reports.
//!
//! Rows are never deleted by discovery. After a target has been fully
//! enumerated, rows the target owns but did not report are reconciled to an
//! absence status, which goes through the normal audit path.

use std::collections::HashSet;

use rusqlite::params;

use infradb_core::{ChangeAttribution, DockerContainerRecord, EntityId, HostRecord};

use crate::error::ReconcileError;
use crate::reconcile::{Reconciliation, Reconciler};

pub const CONTAINER_MISSING: &str = "missing";
pub const GUEST_UNKNOWN: &str = "unknown";

impl Reconciler<'_> {
    /// Marks containers of `docker_host_id` not in `seen` as `missing`.
    pub fn mark_absent_containers(
        &self,
        docker_host_id: EntityId,
        seen: &HashSet<String>,
        by: &ChangeAttribution,
    ) -> Result<Vec<Reconciliation>, ReconcileError> {
        let known: Vec<String> = self.store().read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT container_name FROM docker_containers
                 WHERE docker_host_id = ?1 AND (status IS NULL OR status <> ?2)
                 ORDER BY container_name",
            )?;
            let names = stmt
                .query_map(params![docker_host_id.0, CONTAINER_MISSING], |r| r.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })?;

        known
            .into_iter()
            .filter(|name| !seen.contains(name))
            .map(|name| {
                tracing::info!(host = %docker_host_id, container = %name, "container no longer reported");
                let mut record = DockerContainerRecord::new(docker_host_id, name);
                record.status = Some(CONTAINER_MISSING.to_owned());
                self.reconcile(&record, by)
            })
            .collect()
    }

    /// Marks guest hosts of Proxmox node `proxmox_host_id` whose vmid is not
    /// in `seen` as `unknown`.
    ///
    /// Only hosts still attributed to this node and vmid are touched. A guest
    /// that migrated to another node, or was recreated under a new vmid, keeps
    /// its stale `proxmox_containers` row but no longer matches.
    pub fn mark_absent_guests(
        &self,
        proxmox_host_id: EntityId,
        seen: &HashSet<i64>,
        by: &ChangeAttribution,
    ) -> Result<Vec<Reconciliation>, ReconcileError> {
        let known: Vec<(i64, String)> = self.store().read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pc.vmid, h.hostname
                 FROM proxmox_containers pc
                 JOIN hosts h ON pc.host_id = h.id
                             AND h.parent_host_id = pc.proxmox_host_id
                             AND h.vmid = pc.vmid
                 WHERE pc.proxmox_host_id = ?1 AND (h.status IS NULL OR h.status <> ?2)
                 ORDER BY pc.vmid",
            )?;
            let rows = stmt
                .query_map(params![proxmox_host_id.0, GUEST_UNKNOWN], |r| {
                    Ok((r.get(0)?, r.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        known
            .into_iter()
            .filter(|(vmid, _)| !seen.contains(vmid))
            .map(|(vmid, hostname)| {
                tracing::info!(node = %proxmox_host_id, vmid, %hostname, "guest no longer reported");
                let record = HostRecord {
                    status: Some(GUEST_UNKNOWN.to_owned()),
                    ..HostRecord::new(hostname)
                };
                self.reconcile(&record, by)
            })
            .collect()
    }
}
