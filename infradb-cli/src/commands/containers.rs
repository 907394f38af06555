//! `infradb containers`

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use infradb_core::EntityId;

use super::{dash, hosts::status_label};

#[derive(Args, Debug)]
pub struct ContainersArgs {
    /// Only containers on this Docker host.
    #[arg(long)]
    pub host_id: Option<i64>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "host")]
    host: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "image")]
    image: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "health")]
    health: String,
    #[tabled(rename = "ports")]
    ports: String,
}

impl ContainersArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let containers = match self.host_id {
            Some(id) => store.containers_for_host(EntityId(id)),
            None => store.containers(),
        }
        .context("failed to list containers")?;

        if self.json {
            return super::print_json(&containers);
        }
        if containers.is_empty() {
            println!("No containers in inventory.");
            return Ok(());
        }

        let rows: Vec<ContainerRow> = containers
            .into_iter()
            .map(|c| ContainerRow {
                host: c.docker_host,
                name: c.container_name,
                image: match (c.image, c.image_tag) {
                    (Some(image), Some(tag)) => format!("{image}:{tag}"),
                    (image, _) => dash(image),
                },
                status: status_label(c.status.as_deref()),
                health: dash(c.health_status),
                ports: c.ports.join(", "),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
