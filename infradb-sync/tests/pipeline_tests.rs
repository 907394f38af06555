use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use infradb_core::{ChangeAttribution, DockerTarget, HostRecord, HostType};
use infradb_discovery::docker::{DockerProducer, RemoteShell};
use infradb_discovery::{DiscoveryError, Producer, TargetReport};
use infradb_store::store::DEFAULT_BUSY_TIMEOUT;
use infradb_store::{ChangeFilter, Reconciler, Store};
use infradb_sync::pipeline::{run, run_bounded};
use infradb_sync::{SourceStatus, SyncError};
use serde_json::json;
use tempfile::TempDir;

fn setup() -> (TempDir, Store) {
    let dir = TempDir::new().expect("tempdir");
    let store = Store::create(dir.path().join("infra.db"), DEFAULT_BUSY_TIMEOUT).expect("store");
    (dir, store)
}

/// Creates one host per call and records the order it ran in.
struct HostProducer {
    name: &'static str,
    hostname: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl Producer for HostProducer {
    fn name(&self) -> &'static str {
        self.name
    }

    fn discover(&mut self, rec: &Reconciler<'_>) -> Result<Vec<TargetReport>, DiscoveryError> {
        self.log.lock().unwrap().push(self.name);
        let mut report = TargetReport::new(self.hostname);
        report.track(
            self.hostname,
            rec.reconcile(&HostRecord::new(self.hostname), &ChangeAttribution::automation(self.name)),
        );
        Ok(vec![report])
    }
}

struct Unreachable;

impl Producer for Unreachable {
    fn name(&self) -> &'static str {
        "proxmox"
    }

    fn discover(&mut self, _: &Reconciler<'_>) -> Result<Vec<TargetReport>, DiscoveryError> {
        Err(DiscoveryError::SourceUnavailable {
            endpoint: "https://pve.lan:8006/api2/json".into(),
            reason: "authentication failed".into(),
        })
    }
}

struct Panics;

impl Producer for Panics {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn discover(&mut self, _: &Reconciler<'_>) -> Result<Vec<TargetReport>, DiscoveryError> {
        panic!("unexpected payload")
    }
}

struct Slow(Duration);

impl Producer for Slow {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn discover(&mut self, _: &Reconciler<'_>) -> Result<Vec<TargetReport>, DiscoveryError> {
        std::thread::sleep(self.0);
        Ok(vec![])
    }
}

#[test]
fn failed_source_does_not_stop_later_sources() {
    let (_dir, store) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut producers: Vec<Box<dyn Producer>> = vec![
        Box::new(Unreachable),
        Box::new(HostProducer {
            name: "docker",
            hostname: "docker1",
            log: log.clone(),
        }),
    ];

    let report = run(&store, &mut producers);
    assert!(!report.is_success());
    assert!(matches!(
        &report.sources[0].status,
        SourceStatus::Failed { error } if error.contains("authentication failed")
    ));
    assert_eq!(report.sources[1].status, SourceStatus::Success);
    assert_eq!(*log.lock().unwrap(), vec!["docker"]);
    assert!(store.host_by_name("docker1").unwrap().is_some());
}

#[test]
fn panicking_producer_is_contained() {
    let (_dir, store) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut producers: Vec<Box<dyn Producer>> = vec![
        Box::new(Panics),
        Box::new(HostProducer {
            name: "docker",
            hostname: "docker1",
            log: log.clone(),
        }),
    ];

    let report = run(&store, &mut producers);
    assert!(matches!(
        &report.source("broken").unwrap().status,
        SourceStatus::Failed { error } if error.contains("unexpected payload")
    ));
    assert!(report.source("docker").unwrap().is_success());
}

#[test]
fn producers_run_in_given_order() {
    let (_dir, store) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut producers: Vec<Box<dyn Producer>> = vec![
        Box::new(HostProducer {
            name: "proxmox",
            hostname: "pve1",
            log: log.clone(),
        }),
        Box::new(HostProducer {
            name: "docker",
            hostname: "docker1",
            log: log.clone(),
        }),
    ];

    let report = run(&store, &mut producers);
    assert!(report.is_success());
    assert_eq!(*log.lock().unwrap(), vec!["proxmox", "docker"]);
    assert_eq!(report.totals(), (2, 0, 0));
}

#[test]
fn bounded_run_reports_timeout_distinctly() {
    let (_dir, store) = setup();
    let producers: Vec<Box<dyn Producer>> = vec![Box::new(Slow(Duration::from_millis(500)))];

    let err = run_bounded(&store, producers, Some(Duration::from_millis(50))).unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, SyncError::TimedOut { .. }));
}

#[test]
fn bounded_run_returns_report_in_time() {
    let (_dir, store) = setup();
    let producers: Vec<Box<dyn Producer>> = vec![Box::new(Unreachable)];

    let report = run_bounded(&store, producers, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(report.sources.len(), 1);
    assert!(!report.is_success());
}

#[test]
fn unbounded_run_waits_for_slow_sources() {
    let (_dir, store) = setup();
    let producers: Vec<Box<dyn Producer>> = vec![Box::new(Slow(Duration::from_millis(200)))];

    let report = run_bounded(&store, producers, None).unwrap();
    assert_eq!(report.sources.len(), 1);
}

/// Docker CLI stand-in: every host answers with one running container,
/// except the ones listed as down.
struct Fleet {
    down: Vec<&'static str>,
}

impl RemoteShell for Fleet {
    fn run(&self, target: &DockerTarget, command: &str) -> Result<String, DiscoveryError> {
        if self.down.contains(&target.host.as_str()) {
            return Err(DiscoveryError::SourceUnavailable {
                endpoint: target.to_string(),
                reason: "ssh: connect to host port 22: Connection refused".into(),
            });
        }
        let name = format!("app-{}", target.host.rsplit('.').next().unwrap_or("x"));
        let canned: HashMap<&str, String> = HashMap::from([
            ("docker ps -a --format '{{json .}}'", json!({"ID": "c1"}).to_string()),
            (
                "docker inspect 'c1'",
                json!([{
                    "Id": "c1c1c1c1c1c1c1c1",
                    "Name": format!("/{name}"),
                    "State": {"Running": true},
                    "Config": {"Image": "nginx"}
                }])
                .to_string(),
            ),
            ("docker volume ls --format '{{json .}}'", String::new()),
            ("docker network ls --format '{{json .}}'", String::new()),
        ]);
        canned
            .get(command)
            .cloned()
            .ok_or_else(|| DiscoveryError::Command {
                target: target.to_string(),
                command: command.into(),
                status: "exit status: 127".into(),
                stderr: String::new(),
            })
    }
}

#[test]
fn docker_fleet_with_one_host_down_is_partial() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    for (name, ip) in [("d1", "10.0.0.11"), ("d2", "10.0.0.12"), ("d3", "10.0.0.13")] {
        let host = HostRecord {
            host_type: Some(HostType::DockerHost),
            management_ip: Some(ip.into()),
            ..HostRecord::new(name)
        };
        rec.reconcile(&host, &ChangeAttribution::manual("setup")).unwrap();
    }

    let targets = ["10.0.0.11", "10.0.0.12", "10.0.0.13"]
        .iter()
        .map(|t| t.parse().unwrap())
        .collect();
    let mut producers: Vec<Box<dyn Producer>> = vec![Box::new(DockerProducer::new(
        Fleet {
            down: vec!["10.0.0.12"],
        },
        targets,
    ))];

    let report = run(&store, &mut producers);
    let docker = report.source("docker").unwrap();
    assert_eq!(
        docker.status,
        SourceStatus::Partial {
            succeeded: 2,
            failed: 1
        }
    );
    let outcome: Vec<bool> = docker.targets.iter().map(TargetReport::is_success).collect();
    assert_eq!(outcome, vec![true, false, true]);
    assert!(docker.targets[1]
        .error
        .as_deref()
        .unwrap()
        .contains("Connection refused"));

    let names: Vec<_> = store
        .containers()
        .unwrap()
        .into_iter()
        .map(|c| c.container_name)
        .collect();
    assert_eq!(names, vec!["app-11", "app-13"]);

    let audited = store.changes(&ChangeFilter::default()).unwrap();
    assert!(audited.iter().any(|c| c.changed_by == "docker_discovery"));
}
