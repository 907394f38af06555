//! `infradb init`: write a default config and create the database.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use infradb_core::config;
use infradb_store::Store;

/// Create `~/.infradb/config.yaml` (if absent) and the inventory database.
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config_path = config::config_path_at(&home);
        let cfg = super::load_config(&home)?;

        if config_path.exists() {
            println!("✓ Config exists: {}", config_path.display());
        } else {
            // Persist file values only; env overrides stay in the environment.
            let on_disk = config::load_at(&home).context("failed to read config defaults")?;
            let path = config::save_at(&home, &on_disk)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
            println!("✓ Wrote default config: {}", path.display());
        }

        let db_path = cfg.db_path(&home);
        Store::create(&db_path, Duration::from_millis(cfg.database.busy_timeout_ms))
            .with_context(|| format!("failed to create inventory at {}", db_path.display()))?;
        println!("✓ Inventory database: {}", db_path.display());

        if !cfg.proxmox.is_configured() && cfg.docker.targets.is_empty() {
            println!(
                "  No sources configured yet. Edit {} or set INFRADB_PROXMOX_HOST / INFRADB_DOCKER_HOSTS.",
                config_path.display()
            );
        }
        Ok(())
    }
}
