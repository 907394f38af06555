//! Docker producer.
//!
//! Each configured `user@host` target is reached over SSH and asked for its
//! containers, volumes and networks through the `docker` CLI. The target is
//! matched to an inventory host first by management IP, then by hostname;
//! resources are recorded under that host.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use process_control::{ChildExt, Control};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use infradb_core::{
    ChangeAttribution, DockerContainerRecord, DockerNetworkRecord, DockerTarget,
    DockerVolumeRecord, EntityId,
};
use infradb_store::Reconciler;

use crate::error::{parse_err, DiscoveryError};
use crate::report::TargetReport;
use crate::Producer;

pub const SOURCE: &str = "docker_discovery";

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Runs a command on a Docker target and returns its stdout.
pub trait RemoteShell: Send {
    fn run(&self, target: &DockerTarget, command: &str) -> Result<String, DiscoveryError>;
}

/// `ssh` in batch mode, with a per-command time limit.
#[derive(Debug, Clone)]
pub struct SshShell {
    key: Option<PathBuf>,
    timeout: Duration,
}

impl SshShell {
    pub fn new(key: Option<PathBuf>, timeout: Duration) -> Self {
        Self { key, timeout }
    }
}

/// ssh reserves 255 for its own failures (unreachable, auth refused).
const SSH_FAILURE: i64 = 255;

impl RemoteShell for SshShell {
    fn run(&self, target: &DockerTarget, command: &str) -> Result<String, DiscoveryError> {
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes", "-o", "ConnectTimeout=10"]);
        if let Some(key) = &self.key {
            cmd.arg("-i").arg(key);
        }
        cmd.arg(target.destination())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(%target, command, "ssh");
        let child = cmd.spawn()?;
        let output = child
            .controlled_with_output()
            .time_limit(self.timeout)
            .terminate_for_timeout()
            .wait()?
            .ok_or_else(|| DiscoveryError::Timeout {
                target: target.to_string(),
                command: command.to_owned(),
                secs: self.timeout.as_secs(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        if output.status.code().map(i64::from) == Some(SSH_FAILURE) {
            return Err(DiscoveryError::SourceUnavailable {
                endpoint: target.to_string(),
                reason: stderr,
            });
        }
        if !output.status.success() {
            return Err(DiscoveryError::Command {
                target: target.to_string(),
                command: command.to_owned(),
                status: output.status.to_string(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Single-quotes `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ---------------------------------------------------------------------------
// Docker CLI payloads
// ---------------------------------------------------------------------------

/// One line of `docker ps -a --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameLine {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerInspect {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub config: ContainerConfig,
    pub host_config: HostConfig,
    pub network_settings: NetworkSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerState {
    pub running: bool,
    pub health: Option<Health>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Health {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerConfig {
    pub image: String,
    pub env: Option<Vec<String>>,
    pub labels: Option<BTreeMap<String, String>>,
    pub cmd: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostConfig {
    pub restart_policy: Option<RestartPolicy>,
    pub network_mode: Option<String>,
    pub port_bindings: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
    pub memory: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RestartPolicy {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortBinding {
    pub host_port: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkSettings {
    pub networks: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VolumeInspect {
    pub name: String,
    pub driver: Option<String>,
    pub mountpoint: Option<String>,
    pub options: Option<BTreeMap<String, String>>,
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NetworkInspect {
    pub name: String,
    pub id: String,
    pub driver: Option<String>,
    #[serde(rename = "IPAM")]
    pub ipam: Ipam,
    pub internal: Option<bool>,
    pub attachable: Option<bool>,
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Ipam {
    pub config: Option<Vec<IpamConfig>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IpamConfig {
    pub subnet: Option<String>,
    pub gateway: Option<String>,
}

/// Parses newline-delimited JSON, skipping blank lines.
fn json_lines<T: DeserializeOwned>(what: &str, out: &str) -> Result<Vec<T>, DiscoveryError> {
    out.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| serde_json::from_str(l).map_err(|e| parse_err(what, e)))
        .collect()
}

/// `docker * inspect` prints a one-element array.
fn inspect_one<T: DeserializeOwned>(what: &str, out: &str) -> Result<T, DiscoveryError> {
    let mut items: Vec<T> = serde_json::from_str(out).map_err(|e| parse_err(what, e))?;
    if items.is_empty() {
        return Err(parse_err(what, "empty inspect output"));
    }
    Ok(items.swap_remove(0))
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

const MIB: i64 = 1024 * 1024;

/// Splits `registry:5000/app:1.2` into `("registry:5000/app", "1.2")`.
/// Digests and missing tags fall back to `latest` for the tag.
pub fn split_image(image: &str) -> (String, String) {
    let image = image.split('@').next().unwrap_or(image);
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rsplit_once(':') {
        Some((name, tag)) if !tag.is_empty() => {
            (format!("{}{name}", &image[..name_start]), tag.to_owned())
        }
        _ => (image.to_owned(), "latest".to_owned()),
    }
}

/// `{"80/tcp": [{"HostPort": "8080"}]}` → `["8080:80"]`.
fn published_ports(bindings: &BTreeMap<String, Option<Vec<PortBinding>>>) -> Vec<String> {
    bindings
        .iter()
        .flat_map(|(container_port, hosts)| {
            let port = container_port.split('/').next().unwrap_or(container_port);
            hosts
                .iter()
                .flatten()
                .filter(|b| !b.host_port.is_empty())
                .map(move |b| format!("{}:{port}", b.host_port))
        })
        .collect()
}

pub fn container_record(host_id: EntityId, inspect: &ContainerInspect) -> DockerContainerRecord {
    let (image, tag) = split_image(&inspect.config.image);
    let hc = &inspect.host_config;
    DockerContainerRecord {
        container_id: Some(inspect.id.chars().take(12).collect()),
        image: Some(image),
        image_tag: Some(tag),
        status: Some(if inspect.state.running { "running" } else { "exited" }.to_owned()),
        health_status: Some(
            inspect
                .state
                .health
                .as_ref()
                .map_or_else(|| "none".to_owned(), |h| h.status.clone()),
        ),
        restart_policy: hc.restart_policy.as_ref().map(|p| p.name.clone()),
        network_mode: hc.network_mode.clone(),
        networks: Some(
            inspect
                .network_settings
                .networks
                .as_ref()
                .map(|n| n.keys().cloned().collect())
                .unwrap_or_default(),
        ),
        ports: Some(hc.port_bindings.as_ref().map(published_ports).unwrap_or_default()),
        environment_vars: Some(inspect.config.env.clone().unwrap_or_default()),
        labels: Some(inspect.config.labels.clone().unwrap_or_default()),
        memory_limit_mb: (hc.memory > 0).then(|| hc.memory / MIB),
        command: inspect.config.cmd.as_ref().map(|c| c.join(" ")),
        ..DockerContainerRecord::new(host_id, inspect.name.trim_start_matches('/'))
    }
}

pub fn volume_record(host_id: EntityId, v: &VolumeInspect) -> DockerVolumeRecord {
    DockerVolumeRecord {
        driver: v.driver.clone(),
        mount_point: v.mountpoint.clone(),
        options: Some(v.options.clone().unwrap_or_default()),
        labels: Some(v.labels.clone().unwrap_or_default()),
        ..DockerVolumeRecord::new(host_id, &v.name)
    }
}

pub fn network_record(host_id: EntityId, n: &NetworkInspect) -> DockerNetworkRecord {
    let ipam = n.ipam.config.as_ref().and_then(|c| c.first());
    DockerNetworkRecord {
        network_id: Some(n.id.chars().take(12).collect()),
        driver: n.driver.clone(),
        subnet: ipam.and_then(|c| c.subnet.clone()),
        gateway: ipam.and_then(|c| c.gateway.clone()),
        internal: n.internal,
        attachable: n.attachable,
        labels: Some(n.labels.clone().unwrap_or_default()),
        ..DockerNetworkRecord::new(host_id, &n.name)
    }
}

// ---------------------------------------------------------------------------
// Producer
// ---------------------------------------------------------------------------

pub struct DockerProducer<S> {
    shell: S,
    targets: Vec<DockerTarget>,
}

impl<S: RemoteShell> DockerProducer<S> {
    pub fn new(shell: S, targets: Vec<DockerTarget>) -> Self {
        Self { shell, targets }
    }

    fn sync_target(
        &self,
        rec: &Reconciler<'_>,
        by: &ChangeAttribution,
        target: &DockerTarget,
    ) -> Result<TargetReport, DiscoveryError> {
        let store = rec.store();
        let host = match store.host_by_ip(&target.host)? {
            Some(h) => h,
            None => store
                .host_by_name(&target.host)?
                .ok_or_else(|| DiscoveryError::UnknownHost(target.host.clone()))?,
        };
        tracing::info!(%target, host = %host.hostname, "syncing Docker host");
        let mut report = TargetReport::new(target.to_string());

        let ps = self.shell.run(target, "docker ps -a --format '{{json .}}'")?;
        let lines: Vec<PsLine> = json_lines("docker ps output", &ps)?;
        let mut seen = HashSet::new();
        let mut enumerated = true;
        for line in &lines {
            let inspected = self
                .shell
                .run(target, &format!("docker inspect {}", shell_quote(&line.id)))
                .and_then(|out| inspect_one::<ContainerInspect>("docker inspect output", &out));
            let inspect = match inspected {
                Ok(i) => i,
                Err(e) => {
                    // The container may still exist; its absence is not proven.
                    enumerated = false;
                    report.fail(format!("container {}", line.id), e);
                    continue;
                }
            };
            let record = container_record(host.id, &inspect);
            seen.insert(record.container_name.clone());
            report.track(format!("container {}", record.container_name), rec.reconcile(&record, by));
        }
        tracing::info!(%target, count = lines.len(), "discovered containers");

        if enumerated {
            match rec.mark_absent_containers(host.id, &seen, by) {
                Ok(marked) => marked.iter().for_each(|r| report.record(r)),
                Err(e) => report.fail("absent containers", e),
            }
        }

        self.sync_volumes(rec, by, target, host.id, &mut report);
        self.sync_networks(rec, by, target, host.id, &mut report);
        Ok(report)
    }

    fn sync_volumes(
        &self,
        rec: &Reconciler<'_>,
        by: &ChangeAttribution,
        target: &DockerTarget,
        host_id: EntityId,
        report: &mut TargetReport,
    ) {
        let names = match self
            .shell
            .run(target, "docker volume ls --format '{{json .}}'")
            .and_then(|out| json_lines::<NameLine>("docker volume ls output", &out))
        {
            Ok(names) => names,
            Err(e) => return report.fail("volumes", e),
        };
        for NameLine { name } in names {
            let result = self
                .shell
                .run(target, &format!("docker volume inspect {}", shell_quote(&name)))
                .and_then(|out| inspect_one::<VolumeInspect>("docker volume inspect output", &out))
                .and_then(|v| Ok(rec.reconcile(&volume_record(host_id, &v), by)?));
            report.track(format!("volume {name}"), result);
        }
    }

    fn sync_networks(
        &self,
        rec: &Reconciler<'_>,
        by: &ChangeAttribution,
        target: &DockerTarget,
        host_id: EntityId,
        report: &mut TargetReport,
    ) {
        let names = match self
            .shell
            .run(target, "docker network ls --format '{{json .}}'")
            .and_then(|out| json_lines::<NameLine>("docker network ls output", &out))
        {
            Ok(names) => names,
            Err(e) => return report.fail("networks", e),
        };
        for NameLine { name } in names {
            let result = self
                .shell
                .run(target, &format!("docker network inspect {}", shell_quote(&name)))
                .and_then(|out| inspect_one::<NetworkInspect>("docker network inspect output", &out))
                .and_then(|n| Ok(rec.reconcile(&network_record(host_id, &n), by)?));
            report.track(format!("network {name}"), result);
        }
    }
}

impl<S: RemoteShell> Producer for DockerProducer<S> {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn discover(&mut self, rec: &Reconciler<'_>) -> Result<Vec<TargetReport>, DiscoveryError> {
        let by = ChangeAttribution::automation(SOURCE);
        Ok(self
            .targets
            .iter()
            .map(|target| {
                self.sync_target(rec, &by, target).unwrap_or_else(|e| {
                    tracing::warn!(%target, error = %e, "Docker target failed");
                    TargetReport::failed(target.to_string(), e)
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("nginx", "nginx", "latest")]
    #[case("nginx:1.25", "nginx", "1.25")]
    #[case("ghcr.io/org/app:v2", "ghcr.io/org/app", "v2")]
    #[case("registry:5000/app", "registry:5000/app", "latest")]
    #[case("registry:5000/app:3", "registry:5000/app", "3")]
    #[case("redis@sha256:abcd", "redis", "latest")]
    fn splits_image_references(#[case] image: &str, #[case] name: &str, #[case] tag: &str) {
        assert_eq!(split_image(image), (name.to_owned(), tag.to_owned()));
    }

    #[test]
    fn quotes_single_quotes() {
        assert_eq!(shell_quote("a'b"), r"'a'\''b'");
    }

    #[test]
    fn container_record_from_inspect() {
        let inspect: ContainerInspect = serde_json::from_value(json!({
            "Id": "0123456789abcdef0123",
            "Name": "/grafana",
            "State": {"Running": true, "Health": {"Status": "healthy"}},
            "Config": {
                "Image": "grafana/grafana:10.2.0",
                "Env": ["GF_PATHS_DATA=/var/lib/grafana"],
                "Labels": {"com.docker.compose.project": "monitoring"},
                "Cmd": ["grafana", "server"]
            },
            "HostConfig": {
                "RestartPolicy": {"Name": "unless-stopped"},
                "NetworkMode": "monitoring_default",
                "PortBindings": {"3000/tcp": [{"HostIp": "", "HostPort": "3000"}], "9000/tcp": null},
                "Memory": 536870912
            },
            "NetworkSettings": {"Networks": {"monitoring_default": {}}}
        }))
        .unwrap();
        let r = container_record(EntityId(7), &inspect);
        assert_eq!(r.container_name, "grafana");
        assert_eq!(r.container_id.as_deref(), Some("0123456789ab"));
        assert_eq!(r.image.as_deref(), Some("grafana/grafana"));
        assert_eq!(r.image_tag.as_deref(), Some("10.2.0"));
        assert_eq!(r.status.as_deref(), Some("running"));
        assert_eq!(r.health_status.as_deref(), Some("healthy"));
        assert_eq!(r.ports, Some(vec!["3000:3000".to_owned()]));
        assert_eq!(r.networks, Some(vec!["monitoring_default".to_owned()]));
        assert_eq!(r.memory_limit_mb, Some(512));
        assert_eq!(r.command.as_deref(), Some("grafana server"));
    }

    #[test]
    fn stopped_container_without_health_or_limit() {
        let inspect: ContainerInspect = serde_json::from_value(json!({
            "Id": "abc", "Name": "/job", "State": {"Running": false},
            "Config": {"Image": "busybox"}, "HostConfig": {"Memory": 0}
        }))
        .unwrap();
        let r = container_record(EntityId(1), &inspect);
        assert_eq!(r.status.as_deref(), Some("exited"));
        assert_eq!(r.health_status.as_deref(), Some("none"));
        assert_eq!(r.memory_limit_mb, None);
        assert_eq!(r.ports, Some(vec![]));
    }

    #[test]
    fn network_record_takes_first_ipam_config() {
        let n: NetworkInspect = serde_json::from_value(json!({
            "Name": "bridge", "Id": "fedcba9876543210", "Driver": "bridge",
            "IPAM": {"Config": [{"Subnet": "172.17.0.0/16", "Gateway": "172.17.0.1"}]},
            "Internal": false, "Attachable": false, "Labels": {}
        }))
        .unwrap();
        let r = network_record(EntityId(1), &n);
        assert_eq!(r.network_id.as_deref(), Some("fedcba987654"));
        assert_eq!(r.subnet.as_deref(), Some("172.17.0.0/16"));
        assert_eq!(r.gateway.as_deref(), Some("172.17.0.1"));
        assert_eq!(r.internal, Some(false));
    }

    #[test]
    fn json_lines_skips_blank_lines() {
        let out = "{\"ID\":\"a\"}\n\n{\"ID\":\"b\"}\n";
        let lines: Vec<PsLine> = json_lines("ps", out).unwrap();
        assert_eq!(lines.len(), 2);
    }
}
