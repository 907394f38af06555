//! `infradb sync`: run discovery once, in-process.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use infradb_sync::{pipeline, SourceStatus, SyncReport};

/// Arguments for `infradb sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Emit the sync report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;

        let report = pipeline::sync_configured(&config, &home).context("sync failed")?;
        if self.json {
            return super::print_json(&report);
        }
        print_report(&report);
        Ok(())
    }
}

pub(crate) fn print_report(report: &SyncReport) {
    if report.sources.is_empty() {
        println!("No sources configured. Run `infradb init` and edit the config.");
        return;
    }

    for source in &report.sources {
        let headline = match &source.status {
            SourceStatus::Success => format!("✓ {}", source.source).green(),
            SourceStatus::Partial { succeeded, failed } => format!(
                "~ {} ({succeeded} ok, {failed} failed)",
                source.source
            )
            .yellow(),
            SourceStatus::Failed { error } => format!("✗ {} — {error}", source.source).red(),
        };
        println!("{headline}");

        for target in &source.targets {
            let mark = if target.is_success() { "✓" } else { "✗" };
            println!(
                "  {mark} {} ({} created, {} updated, {} unchanged)",
                target.target, target.created, target.updated, target.unchanged
            );
            if let Some(error) = &target.error {
                println!("      {}", error.red());
            }
            for failure in &target.failures {
                println!("      {}: {}", failure.entity, failure.error.red());
            }
        }
    }

    let (created, updated, unchanged) = report.totals();
    let elapsed = report.finished_at - report.started_at;
    println!(
        "{} created, {} updated, {} unchanged in {:.1}s",
        created,
        updated,
        unchanged,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
}
