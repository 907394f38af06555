//! Proxmox VE producer.
//!
//! Nodes become physical hosts; QEMU VMs and LXC containers become `vm`/`lxc`
//! hosts parented to their node, each with a Proxmox guest record. Each node
//! is one target: a node whose guest lists cannot be fetched fails alone.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use infradb_core::config::ProxmoxConfig;
use infradb_core::{
    ChangeAttribution, EntityId, GuestKind, HostRecord, HostType, ProxmoxContainerRecord,
};
use infradb_store::Reconciler;

use crate::error::{parse_err, DiscoveryError};
use crate::report::TargetReport;
use crate::Producer;

pub const SOURCE: &str = "proxmox_discovery";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

/// `GET /nodes` entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeInfo {
    pub node: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub maxcpu: Option<i64>,
    #[serde(default)]
    pub maxmem: Option<i64>,
    #[serde(default)]
    pub mem: Option<i64>,
}

/// `GET /nodes/{node}/qemu` or `/lxc` entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GuestInfo {
    #[serde(deserialize_with = "int_or_string")]
    pub vmid: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "type")]
    pub guest_type: Option<String>,
}

fn int_or_string<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Value::deserialize(d)? {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom("vmid is not an integer")),
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!("unexpected vmid {other}"))),
    }
}

/// The Proxmox REST calls the producer needs.
pub trait ProxmoxApi: Send {
    fn nodes(&self) -> Result<Vec<NodeInfo>, DiscoveryError>;
    fn guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestInfo>, DiscoveryError>;
    fn guest_config(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: i64,
    ) -> Result<Map<String, Value>, DiscoveryError>;
    /// Node name to cluster IP, from `/cluster/status`. Empty on standalone
    /// nodes.
    fn node_addresses(&self) -> Result<BTreeMap<String, String>, DiscoveryError>;
}

fn api_path(kind: GuestKind) -> &'static str {
    match kind {
        GuestKind::Vm => "qemu",
        GuestKind::Lxc => "lxc",
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct Ticket {
    ticket: String,
}

#[derive(Deserialize)]
struct ClusterMember {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

/// `ureq` client for `https://<host>:<port>/api2/json`.
pub struct HttpProxmox {
    agent: ureq::Agent,
    base: String,
    auth: Auth,
}

enum Auth {
    Token(String),
    Cookie(String),
}

impl HttpProxmox {
    /// Builds the client and authenticates. Password logins fetch a ticket
    /// up front so bad credentials surface as `SourceUnavailable`.
    pub fn connect(cfg: &ProxmoxConfig) -> Result<Self, DiscoveryError> {
        let host = cfg.host.as_deref().ok_or_else(|| DiscoveryError::SourceUnavailable {
            endpoint: "proxmox".into(),
            reason: "no host configured".into(),
        })?;
        let base = format!("https://{host}:{}/api2/json", cfg.port);

        let mut builder = ureq::AgentBuilder::new().timeout(Duration::from_secs(cfg.timeout_secs));
        if !cfg.verify_tls {
            let tls = crate::tls::insecure_client_config().map_err(|e| {
                DiscoveryError::SourceUnavailable {
                    endpoint: base.clone(),
                    reason: format!("TLS setup failed: {e}"),
                }
            })?;
            builder = builder.tls_config(Arc::new(tls));
        }
        let agent = builder.build();

        let auth = match (&cfg.token_id, &cfg.token_secret, &cfg.user, &cfg.password) {
            (Some(id), Some(secret), _, _) => Auth::Token(format!("PVEAPIToken={id}={secret}")),
            (_, _, Some(user), Some(password)) => {
                let url = format!("{base}/access/ticket");
                let response = agent
                    .post(&url)
                    .send_form(&[("username", user.as_str()), ("password", password.as_str())])
                    .map_err(|e| unavailable(&url, e))?;
                let ticket: Envelope<Ticket> = response
                    .into_json()
                    .map_err(|e| parse_err("ticket response", e))?;
                Auth::Cookie(format!("PVEAuthCookie={}", ticket.data.ticket))
            }
            _ => {
                return Err(DiscoveryError::SourceUnavailable {
                    endpoint: base,
                    reason: "no API token or user/password configured".into(),
                })
            }
        };
        tracing::info!(endpoint = %base, "connected to Proxmox");
        Ok(Self { agent, base, auth })
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, DiscoveryError> {
        let url = format!("{}{path}", self.base);
        let request = match &self.auth {
            Auth::Token(header) => self.agent.get(&url).set("Authorization", header),
            Auth::Cookie(cookie) => self.agent.get(&url).set("Cookie", cookie),
        };
        let response = request.call().map_err(|e| match e {
            ureq::Error::Status(status, response) => DiscoveryError::Http {
                url: url.clone(),
                status,
                body: response.into_string().unwrap_or_default(),
            },
            transport => unavailable(&url, transport),
        })?;
        let envelope: Envelope<T> = response.into_json().map_err(|e| parse_err(path, e))?;
        Ok(envelope.data)
    }
}

fn unavailable(url: &str, e: ureq::Error) -> DiscoveryError {
    match e {
        ureq::Error::Status(401, _) => DiscoveryError::SourceUnavailable {
            endpoint: url.to_owned(),
            reason: "authentication failed".into(),
        },
        other => DiscoveryError::SourceUnavailable {
            endpoint: url.to_owned(),
            reason: other.to_string(),
        },
    }
}

impl ProxmoxApi for HttpProxmox {
    fn nodes(&self) -> Result<Vec<NodeInfo>, DiscoveryError> {
        // An unreachable cluster means the whole source is down.
        self.get("/nodes").map_err(|e| match e {
            DiscoveryError::Http { url, status, body } => DiscoveryError::SourceUnavailable {
                endpoint: url,
                reason: format!("HTTP {status}: {body}"),
            },
            other => other,
        })
    }

    fn guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestInfo>, DiscoveryError> {
        self.get(&format!("/nodes/{node}/{}", api_path(kind)))
    }

    fn guest_config(
        &self,
        node: &str,
        kind: GuestKind,
        vmid: i64,
    ) -> Result<Map<String, Value>, DiscoveryError> {
        self.get(&format!("/nodes/{node}/{}/{vmid}/config", api_path(kind)))
    }

    fn node_addresses(&self) -> Result<BTreeMap<String, String>, DiscoveryError> {
        let members: Vec<ClusterMember> = self.get("/cluster/status")?;
        Ok(members
            .into_iter()
            .filter(|m| m.kind == "node")
            .filter_map(|m| Some((m.name?, m.ip?)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

pub struct ProxmoxProducer<A> {
    api: A,
}

impl<A: ProxmoxApi> ProxmoxProducer<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }
}

impl<A: ProxmoxApi> Producer for ProxmoxProducer<A> {
    fn name(&self) -> &'static str {
        "proxmox"
    }

    fn discover(&mut self, rec: &Reconciler<'_>) -> Result<Vec<TargetReport>, DiscoveryError> {
        let by = ChangeAttribution::automation(SOURCE);
        let nodes = self.api.nodes()?;
        let addresses = self.api.node_addresses().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "no cluster status; node IPs from /nodes only");
            BTreeMap::new()
        });
        tracing::info!(count = nodes.len(), "discovered Proxmox nodes");

        Ok(nodes
            .iter()
            .map(|node| {
                let ip = node.ip.clone().or_else(|| addresses.get(&node.node).cloned());
                self.sync_node(rec, &by, node, ip)
            })
            .collect())
    }
}

impl<A: ProxmoxApi> ProxmoxProducer<A> {
    fn sync_node(
        &self,
        rec: &Reconciler<'_>,
        by: &ChangeAttribution,
        node: &NodeInfo,
        ip: Option<String>,
    ) -> TargetReport {
        let mut report = TargetReport::new(&node.node);

        let known = match rec.store().host_by_name(&node.node) {
            Ok(found) => found.is_some(),
            Err(e) => return TargetReport::failed(&node.node, e),
        };
        let record = node_record(node, ip, !known);
        let Some(node_id) = report.track(&node.node, rec.reconcile(&record, by)).map(|r| r.id)
        else {
            report.error = Some(format!("node host {} could not be reconciled", node.node));
            return report;
        };

        let mut seen = HashSet::new();
        let mut enumerated = true;
        for kind in [GuestKind::Vm, GuestKind::Lxc] {
            let guests = match self.api.guests(&node.node, kind) {
                Ok(guests) => guests,
                Err(e) => {
                    report.fail(format!("{kind} list"), e);
                    enumerated = false;
                    continue;
                }
            };
            tracing::info!(node = %node.node, %kind, count = guests.len(), "discovered guests");
            for guest in &guests {
                seen.insert(guest.vmid);
                let label = format!("{kind} {}", guest.vmid);
                if let Err(e) = self.sync_guest(rec, by, &node.node, node_id, kind, guest, &mut report) {
                    report.fail(label, e);
                }
            }
        }

        if enumerated {
            match rec.mark_absent_guests(node_id, &seen, by) {
                Ok(marked) => marked.iter().for_each(|r| report.record(r)),
                Err(e) => report.fail("absent guests", e),
            }
        }
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn sync_guest(
        &self,
        rec: &Reconciler<'_>,
        by: &ChangeAttribution,
        node_name: &str,
        node_id: EntityId,
        kind: GuestKind,
        guest: &GuestInfo,
        report: &mut TargetReport,
    ) -> Result<(), DiscoveryError> {
        let config = self.api.guest_config(node_name, kind, guest.vmid)?;
        let hostname = guest
            .name
            .clone()
            .or_else(|| str_field(&config, "hostname"))
            .or_else(|| str_field(&config, "name"))
            .unwrap_or_else(|| format!("{kind}-{}", guest.vmid));

        let known = rec.store().host_by_name(&hostname)?.is_some();
        let host = guest_host_record(&hostname, node_id, kind, guest, &config, !known);
        let host_id = rec.reconcile(&host, by)?;
        report.record(&host_id);

        let pc = guest_record(node_id, host_id.id, kind, guest, &config);
        let r = rec.reconcile(&pc, by)?;
        report.record(&r);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

const MIB: i64 = 1024 * 1024;

/// `first_seen` controls the defaults an operator may later override
/// (criticality, purpose); they are only supplied on creation.
pub fn node_record(node: &NodeInfo, ip: Option<String>, first_seen: bool) -> HostRecord {
    HostRecord {
        host_type: Some(HostType::Physical),
        management_ip: ip,
        status: Some(if node.status == "online" { "active" } else { "stopped" }.to_owned()),
        cpu_cores: node.maxcpu,
        total_ram_mb: node.maxmem.map(|b| b / MIB),
        used_ram_mb: node.mem.map(|b| b / MIB),
        purpose: first_seen.then(|| "Proxmox virtualization host".to_owned()),
        criticality: first_seen.then(|| "critical".to_owned()),
        ..HostRecord::new(&node.node)
    }
}

pub fn guest_host_record(
    hostname: &str,
    node_id: EntityId,
    kind: GuestKind,
    guest: &GuestInfo,
    config: &Map<String, Value>,
    first_seen: bool,
) -> HostRecord {
    let cores = int_field(config, "cores").unwrap_or(1);
    let cpu_cores = match kind {
        GuestKind::Vm => cores * int_field(config, "sockets").unwrap_or(1),
        GuestKind::Lxc => cores,
    };
    let default_criticality = match kind {
        GuestKind::Vm => "high",
        GuestKind::Lxc => "medium",
    };
    HostRecord {
        host_type: Some(kind.host_type()),
        management_ip: match kind {
            GuestKind::Lxc => str_field(config, "net0").and_then(|net| static_ip(&net)),
            GuestKind::Vm => None,
        },
        status: Some(guest_status(&guest.status)),
        cpu_cores: Some(cpu_cores),
        total_ram_mb: int_field(config, "memory"),
        vmid: Some(guest.vmid),
        parent_host_id: Some(node_id),
        criticality: first_seen.then(|| default_criticality.to_owned()),
        ..HostRecord::new(hostname)
    }
}

pub fn guest_record(
    node_id: EntityId,
    host_id: EntityId,
    kind: GuestKind,
    guest: &GuestInfo,
    config: &Map<String, Value>,
) -> ProxmoxContainerRecord {
    let mut pc = ProxmoxContainerRecord::new(node_id, guest.vmid);
    pc.host_id = Some(host_id);
    pc.container_type = Some(kind);
    pc.auto_start = Some(int_field(config, "onboot") == Some(1));
    let nics = network_config(config);
    pc.network_config = (!nics.is_empty()).then_some(nics);
    match kind {
        GuestKind::Vm => {
            pc.vm_type = Some(guest.guest_type.clone().unwrap_or_else(|| "qemu".into()));
            pc.os_type = str_field(config, "ostype");
            pc.boot_disk = str_field(config, "bootdisk").or_else(|| str_field(config, "boot"));
        }
        GuestKind::Lxc => {
            pc.os_template = str_field(config, "ostype");
            pc.unprivileged = Some(int_field(config, "unprivileged") == Some(1));
            pc.rootfs_storage = str_field(config, "rootfs").and_then(|r| rootfs_storage(&r));
            pc.nesting = Some(
                str_field(config, "features")
                    .map(|f| option_set(&f, "nesting"))
                    .unwrap_or(false),
            );
        }
    }
    pc
}

/// Proxmox reports `running`/`stopped`; inventory uses `active` for live guests.
fn guest_status(status: &str) -> String {
    match status {
        "running" => "active".to_owned(),
        "" => "unknown".to_owned(),
        other => other.to_owned(),
    }
}

/// `ip=` of a `net0` line, without prefix length. DHCP yields `None`.
pub fn static_ip(net: &str) -> Option<String> {
    net.split(',')
        .find_map(|part| part.strip_prefix("ip="))
        .and_then(|ip| ip.split('/').next())
        .filter(|ip| !ip.is_empty() && *ip != "dhcp" && *ip != "manual")
        .map(str::to_owned)
}

/// `local-lvm:vm-101-disk-0,size=8G` → `local-lvm`.
fn rootfs_storage(rootfs: &str) -> Option<String> {
    rootfs
        .split(',')
        .next()
        .and_then(|volume| volume.split(':').next())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// True when a `k=v,k=v` option string sets `key=1`.
fn option_set(options: &str, key: &str) -> bool {
    options
        .split(',')
        .filter_map(|kv| kv.split_once('='))
        .any(|(k, v)| k.trim() == key && v.trim() == "1")
}

/// Every `netN` entry of a guest config.
fn network_config(config: &Map<String, Value>) -> BTreeMap<String, String> {
    config
        .iter()
        .filter(|(key, _)| {
            key.strip_prefix("net")
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
        })
        .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_owned())))
        .collect()
}

fn str_field(config: &Map<String, Value>, key: &str) -> Option<String> {
    match config.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Proxmox returns numbers as JSON numbers or numeric strings depending on
/// version and field.
fn int_field(config: &Map<String, Value>, key: &str) -> Option<i64> {
    match config.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}
