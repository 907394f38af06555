use std::collections::HashSet;

use infradb_core::{
    ChangeAttribution, DockerContainerRecord, DockerNetworkRecord, EntityId, EntityKind, GuestKind,
    HostRecord, HostType, ProxmoxContainerRecord, ServiceRecord,
};
use infradb_store::services::HealthCheck;
use infradb_store::store::DEFAULT_BUSY_TIMEOUT;
use infradb_store::{ChangeFilter, Outcome, ReconcileError, Reconciler, Store};
use serde_json::json;
use tempfile::TempDir;

fn setup() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::create(dir.path().join("infra.db"), DEFAULT_BUSY_TIMEOUT).unwrap();
    (dir, store)
}

fn by() -> ChangeAttribution {
    ChangeAttribution::automation("test")
}

fn host(rec: &Reconciler<'_>, name: &str, host_type: HostType, ip: Option<&str>) -> EntityId {
    let record = HostRecord {
        host_type: Some(host_type),
        management_ip: ip.map(str::to_owned),
        status: Some("active".into()),
        ..HostRecord::new(name)
    };
    rec.reconcile(&record, &by()).unwrap().id
}

fn running(host: EntityId, name: &str, health: &str) -> DockerContainerRecord {
    let mut c = DockerContainerRecord::new(host, name);
    c.status = Some("running".into());
    c.health_status = Some(health.into());
    c.ports = Some(vec!["8080:80".into()]);
    c.networks = Some(vec!["bridge".into()]);
    c
}

#[test]
fn host_detail_distinguishes_not_found() {
    let (_dir, store) = setup();
    assert!(store.host_detail("ghost").unwrap().is_none());
}

#[test]
fn host_detail_collects_containers_services_and_guest_record() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let node = host(&rec, "pve1", HostType::Physical, Some("10.0.0.2"));
    let vm = host(&rec, "docker-vm", HostType::Vm, Some("10.0.0.30"));
    let placed = HostRecord {
        vmid: Some(200),
        parent_host_id: Some(node),
        ..HostRecord::new("docker-vm")
    };
    rec.reconcile(&placed, &by()).unwrap();
    rec.reconcile(&running(vm, "grafana", "healthy"), &by()).unwrap();
    rec.reconcile(&ServiceRecord::new(vm, "grafana-http"), &by()).unwrap();
    let mut pc = ProxmoxContainerRecord::new(node, 200);
    pc.host_id = Some(vm);
    pc.container_type = Some(GuestKind::Vm);
    rec.reconcile(&pc, &by()).unwrap();

    let detail = store.host_detail("docker-vm").unwrap().unwrap();
    assert_eq!(detail.host["hostname"], json!("docker-vm"));
    assert_eq!(detail.docker_containers.len(), 1);
    assert_eq!(detail.docker_containers[0]["ports"], json!(["8080:80"]));
    assert_eq!(detail.services.len(), 1);
    assert_eq!(detail.proxmox.unwrap()["vmid"], json!(200));

    let guests = store.proxmox_guests(node).unwrap();
    assert_eq!(guests.len(), 1);
    assert_eq!(guests[0]["hostname"], json!("docker-vm"));
}

#[test]
fn containers_join_their_host() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let d1 = host(&rec, "docker1", HostType::DockerHost, Some("10.0.0.5"));
    let d2 = host(&rec, "docker2", HostType::DockerHost, None);
    rec.reconcile(&running(d2, "b", "none"), &by()).unwrap();
    rec.reconcile(&running(d1, "z", "healthy"), &by()).unwrap();
    rec.reconcile(&running(d1, "a", "unhealthy"), &by()).unwrap();

    let all = store.containers().unwrap();
    let order: Vec<_> = all
        .iter()
        .map(|c| (c.docker_host.as_str(), c.container_name.as_str()))
        .collect();
    assert_eq!(order, vec![("docker1", "a"), ("docker1", "z"), ("docker2", "b")]);
    assert_eq!(all[0].host_ip.as_deref(), Some("10.0.0.5"));
    assert_eq!(all[0].ports, vec!["8080:80".to_owned()]);

    let on_d2 = store.containers_for_host(d2).unwrap();
    assert_eq!(on_d2.len(), 1);
    assert_eq!(on_d2[0].docker_host_id, d2);
}

#[test]
fn stats_count_by_type_and_status() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let node = host(&rec, "pve1", HostType::Physical, None);
    host(&rec, "ct1", HostType::Lxc, None);
    host(&rec, "vm1", HostType::Vm, None);
    rec.reconcile(
        &HostRecord {
            host_type: Some(HostType::Lxc),
            status: Some("stopped".into()),
            ..HostRecord::new("ct2")
        },
        &by(),
    )
    .unwrap();
    let d = host(&rec, "docker1", HostType::DockerHost, None);
    rec.reconcile(&running(d, "a", "healthy"), &by()).unwrap();
    let mut exited = running(d, "b", "none");
    exited.status = Some("exited".into());
    rec.reconcile(&exited, &by()).unwrap();
    rec.reconcile(&DockerNetworkRecord::new(d, "bridge"), &by()).unwrap();
    let mut svc = ServiceRecord::new(d, "api");
    svc.status = Some("healthy".into());
    rec.reconcile(&svc, &by()).unwrap();
    let mut pc = ProxmoxContainerRecord::new(node, 100);
    pc.container_type = Some(GuestKind::Lxc);
    rec.reconcile(&pc, &by()).unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.hosts.total, 5);
    assert_eq!(stats.hosts.physical, 1);
    assert_eq!(stats.hosts.lxc, 1);
    assert_eq!(stats.hosts.vm, 1);
    assert_eq!(stats.docker.containers, 2);
    assert_eq!(stats.docker.running, 1);
    assert_eq!(stats.docker.healthy, 1);
    assert_eq!(stats.docker.networks, 1);
    assert_eq!(stats.services.total, 1);
    assert_eq!(stats.services.running, 1);
    assert_eq!(stats.proxmox.containers, 1);
    assert_eq!(stats.proxmox.lxc, 1);
    assert_eq!(stats.proxmox.vm, 0);
}

#[test]
fn topology_joins_networks_addresses_and_hosts() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let h = host(&rec, "pve1", HostType::Physical, None);
    let conn = store.connect().unwrap();
    conn.execute_batch(&format!(
        "INSERT INTO networks (network_name, cidr, vlan_id) VALUES ('mgmt', '10.0.0.0/24', 10);
         INSERT INTO networks (network_name, cidr, vlan_id) VALUES ('empty', '10.9.0.0/24', 99);
         INSERT INTO network_interfaces (host_id, interface_name) VALUES ({h}, 'vmbr0');
         INSERT INTO ip_addresses (ip_address, network_id, host_id, interface_id)
             VALUES ('10.0.0.2', 1, {h}, 1);"
    ))
    .unwrap();

    let topo = store.topology().unwrap();
    assert_eq!(topo.len(), 2);
    assert_eq!(topo[0].network_name, "mgmt");
    assert_eq!(topo[0].hostname.as_deref(), Some("pve1"));
    assert_eq!(topo[0].interface_name.as_deref(), Some("vmbr0"));
    assert_eq!(topo[1].network_name, "empty");
    assert!(topo[1].ip_address.is_none());
}

#[test]
fn ram_utilization_orders_busiest_first() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    for (name, used) in [("low", 1024), ("high", 7168)] {
        rec.reconcile(
            &HostRecord {
                status: Some("active".into()),
                total_ram_mb: Some(8192),
                used_ram_mb: Some(used),
                ..HostRecord::new(name)
            },
            &by(),
        )
        .unwrap();
    }
    let util = store.ram_utilization().unwrap();
    assert_eq!(util[0].hostname, "high");
    assert_eq!(util[0].ram_utilization_pct, Some(87.5));
    assert_eq!(util[1].ram_utilization_pct, Some(12.5));
}

#[test]
fn host_lookup_by_ip_and_name() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let id = host(&rec, "docker1", HostType::DockerHost, Some("10.0.0.5"));
    assert_eq!(store.host_by_ip("10.0.0.5").unwrap().unwrap().id, id);
    assert_eq!(store.host_by_name("docker1").unwrap().unwrap().id, id);
    assert!(store.host_by_ip("10.0.0.6").unwrap().is_none());
}

#[test]
fn health_check_appends_history_and_audits_status_flip() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let h = host(&rec, "docker1", HostType::DockerHost, None);
    let mut svc = ServiceRecord::new(h, "api");
    svc.status = Some("healthy".into());
    let service = rec.reconcile(&svc, &by()).unwrap().id;

    let same = rec
        .record_health_check(service, &HealthCheck::new("healthy"), &by())
        .unwrap();
    assert_eq!(same.outcome, Outcome::Unchanged);

    let failing = HealthCheck {
        status: "unhealthy".into(),
        response_time_ms: Some(5000),
        error_message: Some("timeout".into()),
    };
    let flipped = rec.record_health_check(service, &failing, &by()).unwrap();
    assert!(matches!(flipped.outcome, Outcome::Updated { audited: true, .. }));

    let history = store.health_history(service, 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, "unhealthy");
    assert_eq!(history[0].error_message.as_deref(), Some("timeout"));

    let audits = store
        .changes(&ChangeFilter {
            entity_type: Some(EntityKind::Service),
            entity_id: Some(service),
            limit: None,
        })
        .unwrap();
    assert_eq!(audits.len(), 2);
}

#[test]
fn health_check_for_unknown_service_is_not_found() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let err = rec
        .record_health_check(EntityId(7), &HealthCheck::new("healthy"), &by())
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotFound { kind: EntityKind::Service, .. }));
}

#[test]
fn dependencies_are_listed_from_the_dependency_side() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let h = host(&rec, "app1", HostType::Vm, None);
    let db = rec.reconcile(&ServiceRecord::new(h, "postgres"), &by()).unwrap().id;
    let api = rec.reconcile(&ServiceRecord::new(h, "api"), &by()).unwrap().id;
    let worker = rec.reconcile(&ServiceRecord::new(h, "worker"), &by()).unwrap().id;
    rec.add_service_dependency(api, db, "requires").unwrap();
    rec.add_service_dependency(worker, db, "requires").unwrap();
    rec.add_service_dependency(worker, db, "optional").unwrap();

    let deps = store.dependent_services(db).unwrap();
    let names: Vec<_> = deps.iter().map(|d| (d.service_name.as_str(), d.dependency_type.as_str())).collect();
    assert_eq!(names, vec![("api", "requires"), ("worker", "optional")]);

    assert!(matches!(
        rec.add_service_dependency(api, EntityId(99), "requires"),
        Err(ReconcileError::NotFound { .. })
    ));
}

#[test]
fn absent_containers_are_marked_missing_not_deleted() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let d = host(&rec, "docker1", HostType::DockerHost, None);
    rec.reconcile(&running(d, "web", "healthy"), &by()).unwrap();
    rec.reconcile(&running(d, "db", "healthy"), &by()).unwrap();

    let seen: HashSet<String> = ["web".to_owned()].into();
    let marked = rec.mark_absent_containers(d, &seen, &by()).unwrap();
    assert_eq!(marked.len(), 1);
    assert!(matches!(marked[0].outcome, Outcome::Updated { audited: true, .. }));

    let containers = store.containers_for_host(d).unwrap();
    assert_eq!(containers.len(), 2);
    let db = containers.iter().find(|c| c.container_name == "db").unwrap();
    assert_eq!(db.status.as_deref(), Some("missing"));

    // Already missing: nothing more to do.
    assert!(rec.mark_absent_containers(d, &seen, &by()).unwrap().is_empty());
}

#[test]
fn absent_guests_are_marked_unknown() {
    let (_dir, store) = setup();
    let rec = Reconciler::new(&store);
    let node = host(&rec, "pve1", HostType::Physical, None);
    for (name, vmid) in [("ct100", 100), ("ct101", 101)] {
        let guest = rec
            .reconcile(
                &HostRecord {
                    host_type: Some(HostType::Lxc),
                    status: Some("active".into()),
                    vmid: Some(vmid),
                    parent_host_id: Some(node),
                    ..HostRecord::new(name)
                },
                &by(),
            )
            .unwrap()
            .id;
        let mut pc = ProxmoxContainerRecord::new(node, vmid);
        pc.host_id = Some(guest);
        rec.reconcile(&pc, &by()).unwrap();
    }

    let seen: HashSet<i64> = [100].into();
    let marked = rec.mark_absent_guests(node, &seen, &by()).unwrap();
    assert_eq!(marked.len(), 1);
    let detail = store.host_detail("ct101").unwrap().unwrap();
    assert_eq!(detail.host["status"], json!("unknown"));
    let kept = store.host_detail("ct100").unwrap().unwrap();
    assert_eq!(kept.host["status"], json!("active"));
}

#[test]
fn ping_answers_on_live_store() {
    let (_dir, store) = setup();
    store.ping().unwrap();
}
