use std::collections::BTreeMap;

use infradb_core::{
    ChangeAttribution, ChangeSource, ChangeType, DockerContainerRecord, DockerNetworkRecord,
    EntityId, EntityKind, GuestKind, HostRecord, HostType, ProxmoxContainerRecord,
};
use infradb_store::store::DEFAULT_BUSY_TIMEOUT;
use infradb_store::{ChangeFilter, Outcome, ReconcileError, Reconciler, Store};
use serde_json::json;
use tempfile::TempDir;

fn setup() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::create(dir.path().join("infra.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
    (dir, store)
}

fn discovery() -> ChangeAttribution {
    ChangeAttribution::automation("discovery")
}

fn all_changes(store: &Store) -> Vec<infradb_core::ChangeLogEntry> {
    store.changes(&ChangeFilter::default()).unwrap()
}

fn docker_host(rec: &Reconciler<'_>) -> EntityId {
    let host = HostRecord {
        host_type: Some(HostType::DockerHost),
        management_ip: Some("10.0.0.5".into()),
        status: Some("active".into()),
        ..HostRecord::new("docker1")
    };
    rec.reconcile(&host, &discovery()).unwrap().id
}

fn container(host: EntityId, status: &str) -> DockerContainerRecord {
    let mut c = DockerContainerRecord::new(host, "web");
    c.image = Some("nginx".into());
    c.image_tag = Some("1.25".into());
    c.status = Some(status.into());
    c.health_status = Some("none".into());
    c
}

#[test]
fn host_lifecycle_scenario() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let by = discovery();

    let pve2 = HostRecord {
        host_type: Some(HostType::Physical),
        status: Some("active".into()),
        ..HostRecord::new("pve2")
    };
    let first = rec.reconcile(&pve2, &by).unwrap();
    assert_eq!(first.outcome, Outcome::Created { audited: true });
    assert_eq!(all_changes(&store).len(), 1);

    let again = rec.reconcile(&pve2, &by).unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.outcome, Outcome::Unchanged);
    assert_eq!(all_changes(&store).len(), 1);

    let stopped = HostRecord {
        status: Some("stopped".into()),
        ..HostRecord::new("pve2")
    };
    let third = rec.reconcile(&stopped, &by).unwrap();
    assert_eq!(third.id, first.id);
    assert_eq!(
        third.outcome,
        Outcome::Updated {
            fields: vec!["status".into()],
            audited: true
        }
    );

    let changes = all_changes(&store);
    assert_eq!(changes.len(), 2);
    let update = &changes[0];
    assert_eq!(update.change_type, ChangeType::Update);
    assert_eq!(update.entity_type, EntityKind::Host);
    assert_eq!(update.entity_id, first.id);
    assert_eq!(update.change_source, ChangeSource::Automation);
    assert_eq!(update.changed_by, "discovery");
    let old = update.old_values.as_ref().unwrap();
    assert_eq!(old["status"], json!("active"));
    assert_eq!(old["host_type"], json!("physical"));
    assert_eq!(update.new_values, json!({"hostname": "pve2", "status": "stopped"}));

    let detail = store.host_detail("pve2").unwrap().unwrap();
    assert_eq!(detail.host["status"], json!("stopped"));
}

#[test]
fn create_logs_null_old_values_and_full_record() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let host = HostRecord {
        cpu_cores: Some(8),
        ..HostRecord::new("nas")
    };
    let r = rec.reconcile(&host, &ChangeAttribution::manual("ops")).unwrap();

    let changes = all_changes(&store);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_type, ChangeType::Create);
    assert_eq!(changes[0].entity_id, r.id);
    assert!(changes[0].old_values.is_none());
    assert_eq!(changes[0].new_values, json!({"hostname": "nas", "cpu_cores": 8}));
    assert_eq!(changes[0].change_source, ChangeSource::Manual);
}

#[test]
fn partial_update_leaves_other_fields_untouched() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let full = HostRecord {
        host_type: Some(HostType::Vm),
        management_ip: Some("10.0.0.20".into()),
        cpu_cores: Some(4),
        total_ram_mb: Some(8192),
        criticality: Some("high".into()),
        purpose: Some("ci runner".into()),
        ..HostRecord::new("runner")
    };
    rec.reconcile(&full, &discovery()).unwrap();

    let partial = HostRecord {
        used_ram_mb: Some(2048),
        ..HostRecord::new("runner")
    };
    rec.reconcile(&partial, &discovery()).unwrap();

    let host = store.host_detail("runner").unwrap().unwrap().host;
    assert_eq!(host["host_type"], json!("vm"));
    assert_eq!(host["management_ip"], json!("10.0.0.20"));
    assert_eq!(host["cpu_cores"], json!(4));
    assert_eq!(host["total_ram_mb"], json!(8192));
    assert_eq!(host["criticality"], json!("high"));
    assert_eq!(host["purpose"], json!("ci runner"));
    assert_eq!(host["used_ram_mb"], json!(2048));
}

#[test]
fn docker_container_non_significant_change_is_written_but_not_logged() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let host = docker_host(&rec);
    rec.reconcile(&container(host, "running"), &discovery()).unwrap();
    let before = all_changes(&store).len();

    let mut retagged = container(host, "running");
    retagged.image_tag = Some("1.26".into());
    retagged.labels = Some(BTreeMap::from([("tier".to_owned(), "edge".to_owned())]));
    let r = rec.reconcile(&retagged, &discovery()).unwrap();
    match &r.outcome {
        Outcome::Updated { fields, audited } => {
            assert_eq!(fields, &vec!["image_tag".to_owned(), "labels".to_owned()]);
            assert!(!audited);
        }
        other => panic!("expected update, got {other:?}"),
    }
    assert_eq!(all_changes(&store).len(), before);

    let stored = store.containers_for_host(host).unwrap();
    assert_eq!(stored[0].image_tag.as_deref(), Some("1.26"));
}

#[test]
fn docker_container_status_flip_is_logged() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let host = docker_host(&rec);
    rec.reconcile(&container(host, "running"), &discovery()).unwrap();
    let before = all_changes(&store).len();

    let r = rec.reconcile(&container(host, "exited"), &discovery()).unwrap();
    assert!(matches!(r.outcome, Outcome::Updated { audited: true, .. }));

    let changes = all_changes(&store);
    assert_eq!(changes.len(), before + 1);
    assert_eq!(changes[0].entity_type, EntityKind::DockerContainer);
    assert_eq!(changes[0].old_values.as_ref().unwrap()["status"], json!("running"));
    assert_eq!(changes[0].new_values["status"], json!("exited"));
}

#[test]
fn other_kinds_log_any_change() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let host = docker_host(&rec);
    let mut net = DockerNetworkRecord::new(host, "frontend");
    net.driver = Some("bridge".into());
    rec.reconcile(&net, &discovery()).unwrap();

    net.gateway = Some("172.18.0.1".into());
    let r = rec.reconcile(&net, &discovery()).unwrap();
    assert!(matches!(r.outcome, Outcome::Updated { audited: true, .. }));
}

#[test]
fn missing_parent_host_is_not_found_and_writes_nothing() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let err = rec
        .reconcile(&container(EntityId(42), "running"), &discovery())
        .unwrap_err();
    match err {
        ReconcileError::NotFound { kind, key } => {
            assert_eq!(kind, EntityKind::Host);
            assert_eq!(key, "docker_host_id=42");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert!(store.containers().unwrap().is_empty());
    assert!(all_changes(&store).is_empty());
}

#[test]
fn missing_parent_on_update_path_is_not_found() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    rec.reconcile(&HostRecord::new("guest"), &discovery()).unwrap();
    let dangling = HostRecord {
        parent_host_id: Some(EntityId(999)),
        ..HostRecord::new("guest")
    };
    let err = rec.reconcile(&dangling, &discovery()).unwrap_err();
    assert!(matches!(err, ReconcileError::NotFound { .. }));
    assert_eq!(all_changes(&store).len(), 1);
}

#[test]
fn constraint_violation_rolls_back_row_and_audit() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let a = HostRecord {
        management_ip: Some("10.0.0.9".into()),
        ..HostRecord::new("a")
    };
    rec.reconcile(&a, &discovery()).unwrap();

    let clash = HostRecord {
        management_ip: Some("10.0.0.9".into()),
        ..HostRecord::new("b")
    };
    let err = rec.reconcile(&clash, &discovery()).unwrap_err();
    match err {
        ReconcileError::Storage(e) => assert!(e.is_constraint_violation()),
        other => panic!("expected storage error, got {other:?}"),
    }
    assert!(store.host_by_name("b").unwrap().is_none());
    assert_eq!(all_changes(&store).len(), 1);
}

#[test]
fn audit_failure_keeps_entity_write() {
    let (_dir, store) = setup();
    store
        .connect()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER audit_offline BEFORE INSERT ON infrastructure_changes
             BEGIN SELECT RAISE(ABORT, 'audit offline'); END;",
        )
        .unwrap();

    let rec = Reconciler::new(&store);
    let r = rec.reconcile(&HostRecord::new("pve1"), &discovery()).unwrap();
    assert_eq!(r.outcome, Outcome::Created { audited: false });
    assert_eq!(store.host_by_name("pve1").unwrap().unwrap().id, r.id);
    assert!(all_changes(&store).is_empty());
}

#[test]
fn proxmox_guest_records_carry_descriptions_and_flags() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let by = ChangeAttribution::automation("proxmox_discovery");
    let node = rec
        .reconcile(
            &HostRecord {
                host_type: Some(HostType::Physical),
                ..HostRecord::new("pve1")
            },
            &by,
        )
        .unwrap()
        .id;
    let guest = rec
        .reconcile(
            &HostRecord {
                host_type: Some(HostType::Lxc),
                vmid: Some(101),
                parent_host_id: Some(node),
                status: Some("active".into()),
                ..HostRecord::new("pihole")
            },
            &by,
        )
        .unwrap()
        .id;

    let mut pc = ProxmoxContainerRecord::new(node, 101);
    pc.host_id = Some(guest);
    pc.container_type = Some(GuestKind::Lxc);
    pc.unprivileged = Some(true);
    pc.network_config = Some(BTreeMap::from([(
        "net0".to_owned(),
        "name=eth0,bridge=vmbr0,ip=10.0.0.53/24".to_owned(),
    )]));
    rec.reconcile(&pc, &by).unwrap();
    assert_eq!(rec.reconcile(&pc, &by).unwrap().outcome, Outcome::Unchanged);

    pc.unprivileged = Some(false);
    rec.reconcile(&pc, &by).unwrap();

    let changes = store
        .changes(&ChangeFilter {
            entity_type: Some(EntityKind::ProxmoxContainer),
            ..ChangeFilter::default()
        })
        .unwrap();
    let descriptions: Vec<_> = changes.iter().map(|c| c.description.clone()).collect();
    assert_eq!(
        descriptions,
        vec![Some("Updated lxc 101".to_owned()), Some("Created lxc 101".to_owned())]
    );
    let old = changes[0].old_values.as_ref().unwrap();
    assert_eq!(old["unprivileged"], json!(true));
    assert_eq!(old["network_config"]["net0"], json!("name=eth0,bridge=vmbr0,ip=10.0.0.53/24"));

    let hosts = store.hosts().unwrap();
    let pihole = hosts.iter().find(|h| h.hostname == "pihole").unwrap();
    assert_eq!(pihole.parent_hostname.as_deref(), Some("pve1"));
    assert_eq!(pihole.container_type.as_deref(), Some("lxc"));
    assert_eq!(pihole.unprivileged, Some(false));
}

#[test]
fn change_filter_narrows_by_entity_and_limit() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let a = rec.reconcile(&HostRecord::new("a"), &discovery()).unwrap().id;
    rec.reconcile(&HostRecord::new("b"), &discovery()).unwrap();
    rec.reconcile(
        &HostRecord {
            status: Some("active".into()),
            ..HostRecord::new("a")
        },
        &discovery(),
    )
    .unwrap();

    let for_a = store
        .changes(&ChangeFilter {
            entity_type: Some(EntityKind::Host),
            entity_id: Some(a),
            limit: None,
        })
        .unwrap();
    assert_eq!(for_a.len(), 2);
    assert!(for_a.iter().all(|c| c.entity_id == a));

    let latest = store
        .changes(&ChangeFilter {
            limit: Some(1),
            ..ChangeFilter::default()
        })
        .unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].change_type, ChangeType::Update);

    let none = store
        .changes(&ChangeFilter {
            entity_type: Some(EntityKind::Service),
            ..ChangeFilter::default()
        })
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn concurrent_reconcilers_of_same_key_serialize() {
    let (_dir, store) = setup();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                let rec = Reconciler::new(&store);
                let host = HostRecord {
                    status: Some("active".into()),
                    ..HostRecord::new("shared")
                };
                rec.reconcile(&host, &discovery()).unwrap().id
            })
        })
        .collect();
    let ids: Vec<EntityId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(all_changes(&store).len(), 1);
}
