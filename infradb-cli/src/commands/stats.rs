//! `infradb stats`, `infradb topology` and `infradb utilization`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use super::dash;

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TopologyArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct UtilizationArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct UtilizationRow {
    #[tabled(rename = "hostname")]
    hostname: String,
    #[tabled(rename = "type")]
    host_type: String,
    #[tabled(rename = "used MB")]
    used: String,
    #[tabled(rename = "total MB")]
    total: i64,
    #[tabled(rename = "%")]
    pct: String,
    #[tabled(rename = "criticality")]
    criticality: String,
}

#[derive(Tabled)]
struct TopologyRow {
    #[tabled(rename = "network")]
    network: String,
    #[tabled(rename = "cidr")]
    cidr: String,
    #[tabled(rename = "vlan")]
    vlan: String,
    #[tabled(rename = "host")]
    host: String,
    #[tabled(rename = "interface")]
    interface: String,
    #[tabled(rename = "ip")]
    ip: String,
}

impl StatsArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let stats = store.stats().context("failed to compute stats")?;
        if self.json {
            return super::print_json(&stats);
        }

        println!("{}", "hosts".bold());
        println!(
            "  {} total ({} physical, {} lxc, {} vm)",
            stats.hosts.total, stats.hosts.physical, stats.hosts.lxc, stats.hosts.vm
        );
        println!("{}", "docker".bold());
        println!(
            "  {} containers ({} running, {} healthy), {} networks",
            stats.docker.containers, stats.docker.running, stats.docker.healthy, stats.docker.networks
        );
        println!("{}", "services".bold());
        println!("  {} total ({} running)", stats.services.total, stats.services.running);
        println!("{}", "proxmox".bold());
        println!(
            "  {} guests ({} lxc, {} vm)",
            stats.proxmox.containers, stats.proxmox.lxc, stats.proxmox.vm
        );
        Ok(())
    }
}

impl TopologyArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let topology = store.topology().context("failed to load topology")?;
        if self.json {
            return super::print_json(&topology);
        }
        if topology.is_empty() {
            println!("No networks in inventory.");
            return Ok(());
        }

        let rows: Vec<TopologyRow> = topology
            .into_iter()
            .map(|t| TopologyRow {
                network: t.network_name,
                cidr: t.cidr,
                vlan: dash(t.vlan_id),
                host: dash(t.hostname),
                interface: dash(t.interface_name),
                ip: dash(t.ip_address),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

impl UtilizationArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let hosts = store.ram_utilization().context("failed to compute RAM utilization")?;
        if self.json {
            return super::print_json(&hosts);
        }
        if hosts.is_empty() {
            println!("No active hosts with known RAM.");
            return Ok(());
        }

        let rows: Vec<UtilizationRow> = hosts
            .into_iter()
            .map(|h| UtilizationRow {
                hostname: h.hostname,
                host_type: dash(h.host_type),
                used: dash(h.used_ram_mb),
                total: h.total_ram_mb,
                pct: h.ram_utilization_pct.map_or_else(|| "-".to_string(), |p| format!("{p:.1}")),
                criticality: dash(h.criticality),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
