pub mod changes;
pub mod containers;
pub mod daemon;
pub mod health;
pub mod hosts;
pub mod init;
pub mod services;
pub mod stats;
pub mod sync;

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use infradb_core::{config, ChangeAttribution, Config};
use infradb_store::Store;

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_config(home: &Path) -> Result<Config> {
    config::load_with_env_at(home).with_context(|| {
        format!(
            "failed to load {}",
            config::config_path_at(home).display()
        )
    })
}

/// Opens the existing inventory; reads never create it.
pub(crate) fn open_store(home: &Path, config: &Config) -> Result<Store> {
    let path = config.db_path(home);
    Store::open(&path, Duration::from_millis(config.database.busy_timeout_ms)).with_context(|| {
        format!(
            "cannot open inventory at {} — run `infradb init` first",
            path.display()
        )
    })
}

pub(crate) fn home_config_store() -> Result<(PathBuf, Config, Store)> {
    let home = home()?;
    let config = load_config(&home)?;
    let store = open_store(&home, &config)?;
    Ok((home, config, store))
}

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}

/// `-` for absent values in tables.
pub(crate) fn dash<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Manual attribution for operator edits: `--by`, then `$USER`.
pub(crate) fn operator(by: Option<String>) -> ChangeAttribution {
    let by = by
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "operator".to_string());
    ChangeAttribution::manual(by)
}
