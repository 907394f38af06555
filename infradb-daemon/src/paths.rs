use std::path::{Path, PathBuf};

use infradb_core::config::infradb_dir_at;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    infradb_dir_at(home).join(DAEMON_SOCKET)
}
