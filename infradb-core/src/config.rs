//! YAML configuration with environment overrides.
//!
//! # Storage layout
//!
//! ```text
//! ~/.infradb/
//!   config.yaml         (optional: every field has a default)
//!   infrastructure.db   (default database location)
//!   daemon.sock         (daemon socket)
//! ```
//!
//! Every function comes in two forms, `fn_at(home, ..)` with an explicit home
//! directory and `fn(..)` deriving it from `dirs::home_dir()`. Tests only use
//! the `_at` form.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

// ---------------------------------------------------------------------------
// 1. Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub proxmox: ProxmoxConfig,
    pub docker: DockerConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file; `~/` is expanded. Defaults to `~/.infradb/infrastructure.db`.
    pub path: Option<PathBuf>,
    /// Upper bound on waiting for a locked database.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxmoxConfig {
    pub host: Option<String>,
    pub port: u16,
    /// `user@realm`, used for password authentication.
    pub user: Option<String>,
    pub password: Option<String>,
    /// `user@realm!tokenname`, used with `token_secret`.
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
    pub verify_tls: bool,
    pub timeout_secs: u64,
}

impl Default for ProxmoxConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 8006,
            user: None,
            password: None,
            token_id: None,
            token_secret: None,
            verify_tls: false,
            timeout_secs: 30,
        }
    }
}

impl ProxmoxConfig {
    /// A host plus either a full token or a user/password pair.
    pub fn is_configured(&self) -> bool {
        let token = self.token_id.is_some() && self.token_secret.is_some();
        let password = self.user.is_some() && self.password.is_some();
        self.host.is_some() && (token || password)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    pub targets: Vec<DockerTarget>,
    pub ssh_key: Option<PathBuf>,
    /// Bound on each remote command.
    pub command_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            ssh_key: None,
            command_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Bound on a whole sync run when triggered through the daemon or CLI;
    /// 0 waits for the run to finish.
    pub timeout_secs: u64,
    /// Daemon periodic sync interval; 0 disables it.
    pub interval_secs: u64,
}

impl SyncConfig {
    /// The sync deadline, `None` when unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            interval_secs: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Docker targets
// ---------------------------------------------------------------------------

/// An SSH destination running a Docker engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DockerTarget {
    pub user: String,
    pub host: String,
}

impl DockerTarget {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for DockerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

impl FromStr for DockerTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (user, host) = match s.split_once('@') {
            Some((user, host)) => (user, host),
            None => ("root", s),
        };
        if user.is_empty() || host.is_empty() || host.contains('@') || host.contains(' ') {
            return Err(ConfigError::InvalidTarget(s.to_owned()));
        }
        Ok(Self {
            user: user.to_owned(),
            host: host.to_owned(),
        })
    }
}

impl TryFrom<String> for DockerTarget {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DockerTarget> for String {
    fn from(t: DockerTarget) -> Self {
        t.to_string()
    }
}

// ---------------------------------------------------------------------------
// 3. Paths
// ---------------------------------------------------------------------------

/// `<home>/.infradb/`
pub fn infradb_dir_at(home: &Path) -> PathBuf {
    home.join(".infradb")
}

/// `<home>/.infradb/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    infradb_dir_at(home).join("config.yaml")
}

/// `<home>/.infradb/infrastructure.db`
pub fn default_db_path_at(home: &Path) -> PathBuf {
    infradb_dir_at(home).join("infrastructure.db")
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// 4. Load / save
// ---------------------------------------------------------------------------

/// Reads `config.yaml`; a missing file yields the defaults.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
}

/// `load_at` followed by process-environment overrides.
pub fn load_with_env_at(home: &Path) -> Result<Config, ConfigError> {
    let mut config = load_at(home)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

/// `load_with_env_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_with_env_at(&home()?)
}

/// Writes `config.yaml`, creating `~/.infradb/` when needed.
pub fn save_at(home: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    let dir = infradb_dir_at(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let path = config_path_at(home);
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&path, yaml).map_err(|e| io_err(&path, e))?;
    set_file_permissions(&path)?;
    Ok(path)
}

/// The config may hold API credentials.
#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// 5. Overrides and resolution
// ---------------------------------------------------------------------------

impl Config {
    /// Applies `INFRADB_*` overrides read through `lookup`.
    ///
    /// Empty values are ignored so that an exported-but-blank variable does
    /// not wipe a configured value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("INFRADB_DB_PATH") {
            self.database.path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("INFRADB_PROXMOX_HOST") {
            self.proxmox.host = Some(v);
        }
        if let Some(v) = get("INFRADB_PROXMOX_USER") {
            self.proxmox.user = Some(v);
        }
        if let Some(v) = get("INFRADB_PROXMOX_PASSWORD") {
            self.proxmox.password = Some(v);
        }
        if let Some(v) = get("INFRADB_PROXMOX_TOKEN_ID") {
            self.proxmox.token_id = Some(v);
        }
        if let Some(v) = get("INFRADB_PROXMOX_TOKEN_SECRET") {
            self.proxmox.token_secret = Some(v);
        }
        if let Some(v) = get("INFRADB_PROXMOX_VERIFY_TLS") {
            self.proxmox.verify_tls = parse_bool("INFRADB_PROXMOX_VERIFY_TLS", &v)?;
        }
        if let Some(v) = get("INFRADB_DOCKER_HOSTS") {
            self.docker.targets = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(DockerTarget::from_str)
                .collect::<Result<_, _>>()?;
        }
        if let Some(v) = get("INFRADB_SSH_KEY") {
            self.docker.ssh_key = Some(PathBuf::from(v));
        }
        if let Some(v) = get("INFRADB_SYNC_TIMEOUT_SECS") {
            self.sync.timeout_secs = v.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "INFRADB_SYNC_TIMEOUT_SECS".into(),
                value: v.clone(),
            })?;
        }
        Ok(())
    }

    /// The database file to use, with `~/` expanded against `home`.
    pub fn db_path(&self, home: &Path) -> PathBuf {
        match &self.database.path {
            Some(p) => expand_home(p, home),
            None => default_db_path_at(home),
        }
    }

    pub fn ssh_key(&self, home: &Path) -> Option<PathBuf> {
        self.docker.ssh_key.as_deref().map(|p| expand_home(p, home))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_owned(),
            value: value.to_owned(),
        }),
    }
}
