use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use infradb_core::config::{self, Config, DockerTarget};
use infradb_core::ConfigError;
use rstest::rstest;
use tempfile::TempDir;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn missing_config_file_yields_defaults() {
    let home = TempDir::new().unwrap();
    let cfg = config::load_at(home.path()).unwrap();
    assert_eq!(cfg, Config::default());
    assert_eq!(cfg.database.busy_timeout_ms, 30_000);
    assert_eq!(cfg.proxmox.port, 8006);
    assert!(!cfg.proxmox.verify_tls);
    assert_eq!(cfg.docker.command_timeout_secs, 300);
    assert_eq!(cfg.sync.timeout_secs, 300);
    assert_eq!(cfg.sync.interval_secs, 0);
}

#[test]
fn partial_yaml_keeps_defaults_for_other_fields() {
    let home = TempDir::new().unwrap();
    std::fs::create_dir_all(home.path().join(".infradb")).unwrap();
    std::fs::write(
        config::config_path_at(home.path()),
        "proxmox:\n  host: 10.0.0.2\ndocker:\n  targets:\n    - 10.0.0.5\n    - admin@10.0.0.6\n",
    )
    .unwrap();

    let cfg = config::load_at(home.path()).unwrap();
    assert_eq!(cfg.proxmox.host.as_deref(), Some("10.0.0.2"));
    assert_eq!(cfg.proxmox.port, 8006);
    assert_eq!(
        cfg.docker.targets,
        vec![
            DockerTarget { user: "root".into(), host: "10.0.0.5".into() },
            DockerTarget { user: "admin".into(), host: "10.0.0.6".into() },
        ]
    );
}

#[test]
fn malformed_yaml_reports_path() {
    let home = TempDir::new().unwrap();
    std::fs::create_dir_all(home.path().join(".infradb")).unwrap();
    std::fs::write(config::config_path_at(home.path()), "sync: [unclosed").unwrap();
    match config::load_at(home.path()) {
        Err(ConfigError::Parse { path, .. }) => {
            assert_eq!(path, config::config_path_at(home.path()))
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn save_then_load_preserves_config() {
    let home = TempDir::new().unwrap();
    let mut cfg = Config::default();
    cfg.sync.interval_secs = 900;
    cfg.docker.targets = vec!["ops@docker1".parse().unwrap()];
    config::save_at(home.path(), &cfg).unwrap();
    assert_eq!(config::load_at(home.path()).unwrap(), cfg);
}

#[test]
fn env_overrides_replace_file_values() {
    let mut cfg = Config::default();
    cfg.apply_env(env(&[
        ("INFRADB_DB_PATH", "/var/lib/infradb.db"),
        ("INFRADB_PROXMOX_HOST", "pve.lan"),
        ("INFRADB_PROXMOX_TOKEN_ID", "root@pam!sync"),
        ("INFRADB_PROXMOX_TOKEN_SECRET", "s3cret"),
        ("INFRADB_PROXMOX_VERIFY_TLS", "yes"),
        ("INFRADB_DOCKER_HOSTS", "10.0.0.5, deploy@10.0.0.6,"),
        ("INFRADB_SYNC_TIMEOUT_SECS", "60"),
    ]))
    .unwrap();

    assert_eq!(cfg.database.path, Some(PathBuf::from("/var/lib/infradb.db")));
    assert!(cfg.proxmox.is_configured());
    assert!(cfg.proxmox.verify_tls);
    assert_eq!(cfg.docker.targets.len(), 2);
    assert_eq!(cfg.docker.targets[1].destination(), "deploy@10.0.0.6");
    assert_eq!(cfg.sync.timeout_secs, 60);
}

#[test]
fn blank_env_values_are_ignored() {
    let mut cfg = Config::default();
    cfg.proxmox.host = Some("pve.lan".into());
    cfg.apply_env(env(&[("INFRADB_PROXMOX_HOST", "  ")])).unwrap();
    assert_eq!(cfg.proxmox.host.as_deref(), Some("pve.lan"));
}

#[test]
fn bad_env_number_is_rejected() {
    let mut cfg = Config::default();
    let err = cfg
        .apply_env(env(&[("INFRADB_SYNC_TIMEOUT_SECS", "soon")]))
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidEnv { .. }));
}

#[rstest]
#[case(300, Some(Duration::from_secs(300)))]
#[case(1, Some(Duration::from_secs(1)))]
#[case(0, None)]
fn zero_sync_timeout_means_unbounded(#[case] secs: u64, #[case] expected: Option<Duration>) {
    let mut cfg = Config::default();
    cfg.sync.timeout_secs = secs;
    assert_eq!(cfg.sync.timeout(), expected);
}

#[test]
fn db_path_expands_home() {
    let home = PathBuf::from("/home/ops");
    let mut cfg = Config::default();
    assert_eq!(
        cfg.db_path(&home),
        PathBuf::from("/home/ops/.infradb/infrastructure.db")
    );
    cfg.database.path = Some(PathBuf::from("~/inventory/infra.db"));
    assert_eq!(cfg.db_path(&home), PathBuf::from("/home/ops/inventory/infra.db"));
}

#[test]
fn proxmox_needs_host_and_credentials() {
    let mut cfg = Config::default();
    assert!(!cfg.proxmox.is_configured());
    cfg.proxmox.host = Some("pve".into());
    assert!(!cfg.proxmox.is_configured());
    cfg.proxmox.user = Some("root@pam".into());
    cfg.proxmox.password = Some("pw".into());
    assert!(cfg.proxmox.is_configured());
}

#[rstest]
#[case("docker1", "root", "docker1")]
#[case("ops@10.0.0.7", "ops", "10.0.0.7")]
#[case("  admin@nas ", "admin", "nas")]
fn docker_target_parses(#[case] input: &str, #[case] user: &str, #[case] host: &str) {
    let t: DockerTarget = input.parse().unwrap();
    assert_eq!(t.user, user);
    assert_eq!(t.host, host);
}

#[rstest]
#[case("")]
#[case("@host")]
#[case("user@")]
#[case("a@b@c")]
fn docker_target_rejects(#[case] input: &str) {
    assert!(input.parse::<DockerTarget>().is_err());
}
