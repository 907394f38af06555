use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl HealthArgs {
    pub fn run(self) -> Result<()> {
        let (_, _, store) = super::home_config_store()?;
        store.ping().context("inventory database is not reachable")?;

        if self.json {
            return super::print_json(&json!({
                "status": "healthy",
                "database": "connected",
                "path": store.path().display().to_string(),
            }));
        }
        println!("✓ healthy: {}", store.path().display());
        Ok(())
    }
}
