//! Service health history and dependencies.

use rusqlite::{params, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use infradb_core::{ChangeAttribution, EntityId, EntityKind, ServiceRecord};

use crate::error::ReconcileError;
use crate::reconcile::{reconcile_in, Reconciliation, Reconciler};

/// One health check result for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
}

impl HealthCheck {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            response_time_ms: None,
            error_message: None,
        }
    }
}

impl Reconciler<'_> {
    /// Appends a `health_checks` row and reconciles the service's status,
    /// both in one transaction. A status flip is audited like any update.
    pub fn record_health_check(
        &self,
        service_id: EntityId,
        check: &HealthCheck,
        by: &ChangeAttribution,
    ) -> Result<Reconciliation, ReconcileError> {
        self.store().with_transaction(|tx| {
            let (host_id, service_name) = service_key(tx, service_id)?;
            tx.execute(
                "INSERT INTO health_checks (service_id, status, response_time_ms, error_message)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    service_id.0,
                    check.status,
                    check.response_time_ms,
                    check.error_message
                ],
            )?;
            let mut record = ServiceRecord::new(host_id, service_name);
            record.status = Some(check.status.clone());
            reconcile_in(tx, &record, by)
        })
    }

    /// Declares that `dependent` needs `dependency`. Re-declaring updates the
    /// dependency type.
    pub fn add_service_dependency(
        &self,
        dependent: EntityId,
        dependency: EntityId,
        dependency_type: &str,
    ) -> Result<(), ReconcileError> {
        self.store().with_transaction(|tx| {
            service_key(tx, dependent)?;
            service_key(tx, dependency)?;
            tx.execute(
                "INSERT INTO service_dependencies
                 (dependent_service_id, dependency_service_id, dependency_type)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (dependent_service_id, dependency_service_id)
                 DO UPDATE SET dependency_type = excluded.dependency_type",
                params![dependent.0, dependency.0, dependency_type],
            )?;
            Ok(())
        })
    }
}

fn service_key(
    tx: &Transaction<'_>,
    service_id: EntityId,
) -> Result<(EntityId, String), ReconcileError> {
    tx.query_row(
        "SELECT host_id, service_name FROM services WHERE id = ?1",
        [service_id.0],
        |r| Ok((EntityId(r.get(0)?), r.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| ReconcileError::NotFound {
        kind: EntityKind::Service,
        key: format!("id={service_id}"),
    })
}
