//! `infradb hosts`, `infradb host`, `infradb host-set` and `infradb guests`.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::{Map, Value};
use tabled::{settings::Style, Table, Tabled};

use infradb_core::HostRecord;
use infradb_store::{Outcome, Reconciler};

use super::dash;

#[derive(Args, Debug)]
pub struct HostsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HostArgs {
    pub hostname: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HostSetArgs {
    pub hostname: String,

    #[arg(long)]
    pub criticality: Option<String>,

    #[arg(long)]
    pub purpose: Option<String>,

    #[arg(long)]
    pub status: Option<String>,

    /// Name recorded as the author of the change. Defaults to `$USER`.
    #[arg(long)]
    pub by: Option<String>,
}

#[derive(Args, Debug)]
pub struct GuestsArgs {
    /// Proxmox node hostname.
    pub node: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct HostRow {
    #[tabled(rename = "vmid")]
    vmid: String,
    #[tabled(rename = "hostname")]
    hostname: String,
    #[tabled(rename = "type")]
    host_type: String,
    #[tabled(rename = "ip")]
    ip: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "cpu")]
    cpu: String,
    #[tabled(rename = "ram MB")]
    ram: String,
    #[tabled(rename = "criticality")]
    criticality: String,
    #[tabled(rename = "parent")]
    parent: String,
}

impl HostsArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let hosts = store.hosts().context("failed to list hosts")?;
        if self.json {
            return super::print_json(&hosts);
        }
        if hosts.is_empty() {
            println!("No hosts in inventory. Run `infradb sync`.");
            return Ok(());
        }

        let rows: Vec<HostRow> = hosts
            .into_iter()
            .map(|h| HostRow {
                vmid: dash(h.vmid),
                hostname: h.hostname,
                host_type: dash(h.host_type),
                ip: dash(h.management_ip),
                status: status_label(h.status.as_deref()),
                cpu: dash(h.cpu_cores),
                ram: dash(h.total_ram_mb),
                criticality: dash(h.criticality),
                parent: dash(h.parent_hostname),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

impl HostArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let Some(detail) = store
            .host_detail(&self.hostname)
            .with_context(|| format!("failed to load host '{}'", self.hostname))?
        else {
            bail!("host '{}' not found", self.hostname);
        };
        if self.json {
            return super::print_json(&detail);
        }

        println!("{}", self.hostname.bold());
        print_fields(&detail.host, &["id", "hostname"]);
        if let Some(proxmox) = &detail.proxmox {
            println!("{}", "proxmox".bold());
            print_fields(proxmox, &["id", "host_id", "proxmox_host_id"]);
        }
        if !detail.docker_containers.is_empty() {
            println!("{}", "containers".bold());
            for c in &detail.docker_containers {
                println!(
                    "  {} {} {}",
                    field(c, "container_name"),
                    field(c, "image"),
                    status_label(c.get("status").and_then(Value::as_str))
                );
            }
        }
        if !detail.services.is_empty() {
            println!("{}", "services".bold());
            for s in &detail.services {
                println!(
                    "  [{}] {} {}",
                    field(s, "id"),
                    field(s, "service_name"),
                    status_label(s.get("status").and_then(Value::as_str))
                );
            }
        }
        Ok(())
    }
}

impl HostSetArgs {
    pub fn run(self) -> Result<()> {
        if self.criticality.is_none() && self.purpose.is_none() && self.status.is_none() {
            bail!("nothing to set: pass --criticality, --purpose or --status");
        }
        let (_, _, store) = super::home_config_store()?;
        if store.host_by_name(&self.hostname)?.is_none() {
            bail!("host '{}' not found", self.hostname);
        }

        let record = HostRecord {
            criticality: self.criticality,
            purpose: self.purpose,
            status: self.status,
            ..HostRecord::new(&self.hostname)
        };
        let result = Reconciler::new(&store)
            .reconcile(&record, &super::operator(self.by))
            .with_context(|| format!("failed to update host '{}'", self.hostname))?;

        match result.outcome {
            Outcome::Updated { fields, .. } => {
                println!("✓ Updated '{}': {}", self.hostname, fields.join(", "))
            }
            Outcome::Unchanged => println!("✓ '{}' already up to date", self.hostname),
            Outcome::Created { .. } => println!("✓ Created '{}'", self.hostname),
        }
        Ok(())
    }
}

impl GuestsArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let Some(node) = store.host_by_name(&self.node)? else {
            bail!("host '{}' not found", self.node);
        };
        let guests = store
            .proxmox_guests(node.id)
            .with_context(|| format!("failed to list guests of '{}'", self.node))?;
        if self.json {
            return super::print_json(&guests);
        }
        if guests.is_empty() {
            println!("No guests on '{}'.", self.node);
            return Ok(());
        }

        for guest in &guests {
            println!(
                "  {:>5} {:<24} {:<4} {}",
                field(guest, "vmid"),
                field(guest, "hostname"),
                field(guest, "container_type"),
                status_label(guest.get("host_status").and_then(Value::as_str))
            );
        }
        Ok(())
    }
}

fn print_fields(map: &Map<String, Value>, skip: &[&str]) {
    for (key, value) in map {
        if skip.contains(&key.as_str()) || value.is_null() {
            continue;
        }
        let shown = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("  {key:<18} {shown}");
    }
}

fn field(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    }
}

pub(crate) fn status_label(status: Option<&str>) -> String {
    match status {
        Some(s @ ("active" | "running" | "healthy")) => s.green().to_string(),
        Some(s @ ("stopped" | "exited" | "missing" | "unknown" | "unhealthy")) => {
            s.red().to_string()
        }
        Some(s) => s.to_string(),
        None => "-".to_string(),
    }
}
