//! Per-target outcome of a discovery pass.

use serde::Serialize;

use infradb_store::{Outcome, Reconciliation};

/// One entity that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub entity: String,
    pub error: String,
}

/// What happened on one target (a Proxmox node, a Docker host).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failures: Vec<EntityFailure>,
    /// Set when the target could not be enumerated at all.
    pub error: Option<String>,
}

impl TargetReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    pub fn failed(target: impl Into<String>, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(target)
        }
    }

    /// A target succeeded when it was enumerated and every entity reconciled.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failures.is_empty()
    }

    pub fn record(&mut self, reconciliation: &Reconciliation) {
        match reconciliation.outcome {
            Outcome::Created { .. } => self.created += 1,
            Outcome::Updated { .. } => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn fail(&mut self, entity: impl Into<String>, error: impl ToString) {
        let entity = entity.into();
        let error = error.to_string();
        tracing::warn!(target_name = %self.target, %entity, %error, "entity failed");
        self.failures.push(EntityFailure { entity, error });
    }

    /// Records `result` under `entity`, returning the id on success.
    pub fn track<E: ToString>(
        &mut self,
        entity: impl Into<String>,
        result: Result<Reconciliation, E>,
    ) -> Option<Reconciliation> {
        match result {
            Ok(r) => {
                self.record(&r);
                Some(r)
            }
            Err(e) => {
                self.fail(entity, e);
                None
            }
        }
    }
}
