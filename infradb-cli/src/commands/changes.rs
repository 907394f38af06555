//! `infradb changes`: the audit trail, newest first.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use infradb_core::{EntityId, EntityKind};
use infradb_store::ChangeFilter;

#[derive(Args, Debug)]
pub struct ChangesArgs {
    /// Only changes to this kind of entity, e.g. `host` or `docker_container`.
    #[arg(long)]
    pub entity_type: Option<EntityKind>,

    /// Only changes to this entity id.
    #[arg(long)]
    pub entity_id: Option<i64>,

    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "id")]
    id: i64,
    #[tabled(rename = "when")]
    when: String,
    #[tabled(rename = "change")]
    change: String,
    #[tabled(rename = "entity")]
    entity: String,
    #[tabled(rename = "by")]
    by: String,
    #[tabled(rename = "description")]
    description: String,
}

impl ChangesArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        let filter = ChangeFilter {
            entity_type: self.entity_type,
            entity_id: self.entity_id.map(EntityId),
            limit: Some(self.limit),
        };
        let changes = store.changes(&filter).context("failed to read change log")?;
        if self.json {
            return super::print_json(&changes);
        }
        if changes.is_empty() {
            println!("No changes recorded.");
            return Ok(());
        }

        let rows: Vec<ChangeRow> = changes
            .into_iter()
            .map(|c| ChangeRow {
                id: c.id,
                when: c.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                change: c.change_type.to_string(),
                entity: format!("{}#{}", c.entity_type, c.entity_id),
                by: format!("{} ({})", c.changed_by, c.change_source),
                description: c.description.unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
