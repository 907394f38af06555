//! infradb: homelab infrastructure inventory CLI.
//!
//! # Usage
//!
//! ```text
//! infradb init
//! infradb sync [--json]
//! infradb hosts [--json]
//! infradb host <hostname> [--json]
//! infradb host-set <hostname> [--criticality C] [--purpose P] [--status S] [--by NAME]
//! infradb guests <node> [--json]
//! infradb containers [--host-id N] [--json]
//! infradb stats [--json]
//! infradb topology [--json]
//! infradb utilization [--json]
//! infradb service-add <hostname> <name> [--type T] [--port N] [--protocol P] [--url U] [--criticality C] [--by NAME]
//! infradb service-check <service-id> --status S [--response-time-ms N] [--error E] [--by NAME]
//! infradb service-depend <dependent-id> <dependency-id> [--type T]
//! infradb service-deps <service-id> [--json]
//! infradb health-history <service-id> [--limit N] [--json]
//! infradb changes [--entity-type T] [--entity-id N] [--limit N] [--json]
//! infradb health
//! infradb daemon start|stop|status|sync
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    changes::ChangesArgs, containers::ContainersArgs, daemon::DaemonCommand, health::HealthArgs,
    hosts::{GuestsArgs, HostArgs, HostSetArgs, HostsArgs}, init::InitArgs,
    services::{HealthHistoryArgs, ServiceAddArgs, ServiceCheckArgs, ServiceDependArgs, ServiceDepsArgs},
    stats::{StatsArgs, TopologyArgs, UtilizationArgs},
    sync::SyncArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "infradb",
    version,
    about = "Inventory of Proxmox hosts, guests and Docker containers with a change log",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the config file and the inventory database.
    Init(InitArgs),

    /// Discover every configured source and reconcile the inventory.
    Sync(SyncArgs),

    /// List physical hosts and Proxmox guests.
    Hosts(HostsArgs),

    /// Show one host with its containers, services and Proxmox record.
    Host(HostArgs),

    /// Edit operator-owned host fields (recorded as a manual change).
    HostSet(HostSetArgs),

    /// List the guests running on one Proxmox node.
    Guests(GuestsArgs),

    /// List Docker containers.
    Containers(ContainersArgs),

    /// Show aggregate counts.
    Stats(StatsArgs),

    /// Show network topology.
    Topology(TopologyArgs),

    /// Show RAM use of active hosts, busiest first.
    Utilization(UtilizationArgs),

    /// Register or update a service on a host (recorded as a manual change).
    ServiceAdd(ServiceAddArgs),

    /// Record a health check result for a service.
    ServiceCheck(ServiceCheckArgs),

    /// Declare that one service depends on another.
    ServiceDepend(ServiceDependArgs),

    /// List the services that depend on a service.
    ServiceDeps(ServiceDepsArgs),

    /// Show recent health checks of a service.
    HealthHistory(HealthHistoryArgs),

    /// Show the change log.
    Changes(ChangesArgs),

    /// Check that the inventory database is reachable.
    Health(HealthArgs),

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    infradb_daemon::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Hosts(args) => args.run(),
        Commands::Host(args) => args.run(),
        Commands::HostSet(args) => args.run(),
        Commands::Guests(args) => args.run(),
        Commands::Containers(args) => args.run(),
        Commands::Stats(args) => args.run(),
        Commands::Topology(args) => args.run(),
        Commands::Utilization(args) => args.run(),
        Commands::ServiceAdd(args) => args.run(),
        Commands::ServiceCheck(args) => args.run(),
        Commands::ServiceDepend(args) => args.run(),
        Commands::ServiceDeps(args) => args.run(),
        Commands::HealthHistory(args) => args.run(),
        Commands::Changes(args) => args.run(),
        Commands::Health(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
