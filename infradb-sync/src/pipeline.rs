//! Shared sync pipeline entrypoint used by CLI and daemon.
//!
//! Producers run one after another in the order given. Proxmox goes first
//! because the Docker producer attaches containers to hosts it creates.
//! A producer that errors or panics is recorded as a failed source and the
//! next one still runs.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use infradb_core::config::ProxmoxConfig;
use infradb_core::Config;
use infradb_discovery::docker::{DockerProducer, SshShell};
use infradb_discovery::proxmox::{HttpProxmox, ProxmoxProducer};
use infradb_discovery::{DiscoveryError, Producer, TargetReport};
use infradb_store::{Reconciler, Store};

use crate::error::SyncError;
use crate::report::{SourceReport, SyncReport};

/// Runs every producer once, in order.
pub fn run(store: &Store, producers: &mut [Box<dyn Producer>]) -> SyncReport {
    let started_at = Utc::now();
    let reconciler = Reconciler::new(store);
    let mut sources = Vec::with_capacity(producers.len());

    for producer in producers.iter_mut() {
        let name = producer.name();
        let clock = Instant::now();
        tracing::info!(source = name, "sync source started");

        let result = panic::catch_unwind(AssertUnwindSafe(|| producer.discover(&reconciler)));
        let report = match result {
            Ok(Ok(targets)) => SourceReport::from_targets(name, targets),
            Ok(Err(e)) => SourceReport::failed(name, e),
            Err(payload) => SourceReport::failed(name, panic_message(payload.as_ref())),
        };

        if report.is_success() {
            tracing::info!(source = name, elapsed_ms = clock.elapsed().as_millis() as u64, "sync source finished");
        } else {
            tracing::warn!(source = name, status = ?report.status, "sync source did not fully succeed");
        }
        sources.push(report);
    }

    SyncReport {
        started_at,
        finished_at: Utc::now(),
        sources,
    }
}

/// Like [`run`], but gives up waiting after `timeout`. `None` waits for the
/// run to finish.
///
/// The run happens on a worker thread that owns its own store handle. On
/// timeout the caller gets [`SyncError::TimedOut`]; the worker is not
/// interrupted and finishes its current pass in the background, each of its
/// writes still atomic.
pub fn run_bounded(
    store: &Store,
    mut producers: Vec<Box<dyn Producer>>,
    timeout: Option<Duration>,
) -> Result<SyncReport, SyncError> {
    let (tx, rx) = mpsc::channel();
    let store = store.clone();
    thread::Builder::new()
        .name("infradb-sync".into())
        .spawn(move || {
            let report = run(&store, &mut producers);
            // The receiver is gone if the caller already timed out.
            let _ = tx.send(report);
        })
        .map_err(|_| SyncError::WorkerLost)?;

    let Some(timeout) = timeout else {
        return rx.recv().map_err(|_| SyncError::WorkerLost);
    };
    match rx.recv_timeout(timeout) {
        Ok(report) => Ok(report),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            tracing::warn!(secs = timeout.as_secs(), "sync timed out");
            Err(SyncError::TimedOut {
                secs: timeout.as_secs(),
            })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(SyncError::WorkerLost),
    }
}

/// The producers a configuration asks for, Proxmox first.
pub fn build_producers(config: &Config, home: &Path) -> Vec<Box<dyn Producer>> {
    let mut producers: Vec<Box<dyn Producer>> = Vec::new();

    if config.proxmox.is_configured() {
        producers.push(Box::new(ProxmoxSource {
            config: config.proxmox.clone(),
        }));
    } else {
        tracing::info!("Proxmox not configured; skipping");
    }

    if config.docker.targets.is_empty() {
        tracing::info!("no Docker targets configured; skipping");
    } else {
        let shell = SshShell::new(
            config.ssh_key(home),
            Duration::from_secs(config.docker.command_timeout_secs),
        );
        producers.push(Box::new(DockerProducer::new(
            shell,
            config.docker.targets.clone(),
        )));
    }

    producers
}

/// Opens the configured store and runs every configured source under the
/// configured deadline (`sync.timeout_secs`, 0 for none).
pub fn sync_configured(config: &Config, home: &Path) -> Result<SyncReport, SyncError> {
    let store = Store::create(
        config.db_path(home),
        Duration::from_millis(config.database.busy_timeout_ms),
    )?;
    let producers = build_producers(config, home);
    run_bounded(&store, producers, config.sync.timeout())
}

/// Connects on each run, so an unreachable or misconfigured cluster shows up
/// as a failed source rather than a failed run.
struct ProxmoxSource {
    config: ProxmoxConfig,
}

impl Producer for ProxmoxSource {
    fn name(&self) -> &'static str {
        "proxmox"
    }

    fn discover(&mut self, reconciler: &Reconciler<'_>) -> Result<Vec<TargetReport>, DiscoveryError> {
        let api = HttpProxmox::connect(&self.config)?;
        ProxmoxProducer::new(api).discover(reconciler)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    format!("producer panicked: {detail}")
}
