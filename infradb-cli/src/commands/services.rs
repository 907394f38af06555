//! Operator commands for services: registration, health checks and
//! dependencies, plus their read views.

use anyhow::{bail, Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use infradb_core::{EntityId, ServiceRecord};
use infradb_store::services::HealthCheck;
use infradb_store::{Outcome, Reconciler};

use super::dash;
use super::hosts::status_label;

#[derive(Args, Debug)]
pub struct ServiceAddArgs {
    /// Host the service runs on.
    pub hostname: String,

    pub name: String,

    #[arg(long = "type")]
    pub service_type: Option<String>,

    #[arg(long)]
    pub port: Option<i64>,

    #[arg(long)]
    pub protocol: Option<String>,

    #[arg(long)]
    pub url: Option<String>,

    #[arg(long)]
    pub criticality: Option<String>,

    /// Name recorded as the author of the change. Defaults to `$USER`.
    #[arg(long)]
    pub by: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServiceCheckArgs {
    pub service_id: i64,

    /// Observed status, e.g. `healthy` or `unhealthy`.
    #[arg(long)]
    pub status: String,

    #[arg(long)]
    pub response_time_ms: Option<i64>,

    #[arg(long)]
    pub error: Option<String>,

    /// Name recorded as the author of the change. Defaults to `$USER`.
    #[arg(long)]
    pub by: Option<String>,
}

#[derive(Args, Debug)]
pub struct ServiceDependArgs {
    /// Service that needs the other one.
    pub dependent_id: i64,

    /// Service being depended on.
    pub dependency_id: i64,

    #[arg(long = "type", default_value = "requires")]
    pub dependency_type: String,
}

#[derive(Args, Debug)]
pub struct ServiceDepsArgs {
    pub service_id: i64,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HealthHistoryArgs {
    pub service_id: i64,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct DependentRow {
    #[tabled(rename = "id")]
    id: i64,
    #[tabled(rename = "service")]
    service: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "dependency")]
    dependency: String,
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "checked at")]
    checked_at: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "ms")]
    response_time: String,
    #[tabled(rename = "error")]
    error: String,
}

impl ServiceAddArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let Some(host) = store.host_by_name(&self.hostname)? else {
            bail!("host '{}' not found", self.hostname);
        };

        let record = ServiceRecord {
            service_type: self.service_type,
            port: self.port,
            protocol: self.protocol,
            url: self.url,
            criticality: self.criticality,
            ..ServiceRecord::new(host.id, &self.name)
        };
        let result = Reconciler::new(&store)
            .reconcile(&record, &super::operator(self.by))
            .with_context(|| format!("failed to register service '{}'", self.name))?;

        match result.outcome {
            Outcome::Created { .. } => {
                println!("✓ Created service '{}' (id {})", self.name, result.id)
            }
            Outcome::Updated { fields, .. } => println!(
                "✓ Updated service '{}' (id {}): {}",
                self.name,
                result.id,
                fields.join(", ")
            ),
            Outcome::Unchanged => {
                println!("✓ Service '{}' (id {}) already up to date", self.name, result.id)
            }
        }
        Ok(())
    }
}

impl ServiceCheckArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let check = HealthCheck {
            status: self.status,
            response_time_ms: self.response_time_ms,
            error_message: self.error,
        };
        let result = Reconciler::new(&store)
            .record_health_check(EntityId(self.service_id), &check, &super::operator(self.by))
            .with_context(|| format!("failed to record health check for service {}", self.service_id))?;

        let changed = matches!(result.outcome, Outcome::Updated { .. });
        println!(
            "✓ Recorded {} for service {}{}",
            check.status,
            self.service_id,
            if changed { " (status changed)" } else { "" }
        );
        Ok(())
    }
}

impl ServiceDependArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        Reconciler::new(&store)
            .add_service_dependency(
                EntityId(self.dependent_id),
                EntityId(self.dependency_id),
                &self.dependency_type,
            )
            .context("failed to record dependency")?;
        println!(
            "✓ Service {} {} service {}",
            self.dependent_id, self.dependency_type, self.dependency_id
        );
        Ok(())
    }
}

impl ServiceDepsArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let dependents = store
            .dependent_services(EntityId(self.service_id))
            .context("failed to load dependent services")?;
        if self.json {
            return super::print_json(&dependents);
        }
        if dependents.is_empty() {
            println!("Nothing depends on service {}.", self.service_id);
            return Ok(());
        }

        let rows: Vec<DependentRow> = dependents
            .into_iter()
            .map(|d| DependentRow {
                id: d.id.0,
                service: d.service_name,
                status: status_label(d.status.as_deref()),
                dependency: d.dependency_type,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

impl HealthHistoryArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let history = store
            .health_history(EntityId(self.service_id), self.limit)
            .context("failed to load health history")?;
        if self.json {
            return super::print_json(&history);
        }
        if history.is_empty() {
            println!("No health checks recorded for service {}.", self.service_id);
            return Ok(());
        }

        let rows: Vec<CheckRow> = history
            .into_iter()
            .map(|c| CheckRow {
                checked_at: c.checked_at,
                status: status_label(Some(&c.status)),
                response_time: dash(c.response_time_ms),
                error: dash(c.error_message),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
