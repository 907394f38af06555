//! Table definitions and schema versioning.
//!
//! The version lives in `PRAGMA user_version`. `apply` is idempotent; every
//! statement is `IF NOT EXISTS`.

use std::path::Path;

use rusqlite::Connection;

use crate::error::StoreError;

pub const SCHEMA_VERSION: i64 = 1;

const TIMESTAMP_DEFAULT: &str = "(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))";

/// SQL expression for "now" in the same format as column defaults.
pub(crate) const NOW_SQL: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

fn ddl() -> String {
    let ts = TIMESTAMP_DEFAULT;
    format!(
        "
CREATE TABLE IF NOT EXISTS hosts (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname        TEXT NOT NULL UNIQUE,
    host_type       TEXT CHECK (host_type IN ('physical', 'vm', 'lxc', 'docker_host')),
    management_ip   TEXT UNIQUE,
    status          TEXT,
    cpu_cores       INTEGER,
    total_ram_mb    INTEGER,
    used_ram_mb     INTEGER,
    vmid            INTEGER,
    parent_host_id  INTEGER REFERENCES hosts(id) ON DELETE SET NULL,
    criticality     TEXT,
    purpose         TEXT,
    created_at      TEXT NOT NULL DEFAULT {ts},
    updated_at      TEXT NOT NULL DEFAULT {ts}
);

CREATE TABLE IF NOT EXISTS proxmox_containers (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    proxmox_host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    vmid            INTEGER NOT NULL,
    host_id         INTEGER REFERENCES hosts(id) ON DELETE SET NULL,
    container_type  TEXT CHECK (container_type IN ('vm', 'lxc')),
    vm_type         TEXT,
    os_type         TEXT,
    os_template     TEXT,
    unprivileged    INTEGER,
    auto_start      INTEGER,
    nesting         INTEGER,
    boot_disk       TEXT,
    rootfs_storage  TEXT,
    network_config  TEXT,
    created_at      TEXT NOT NULL DEFAULT {ts},
    updated_at      TEXT NOT NULL DEFAULT {ts},
    UNIQUE (proxmox_host_id, vmid)
);

CREATE TABLE IF NOT EXISTS docker_containers (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    docker_host_id   INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    container_name   TEXT NOT NULL,
    container_id     TEXT,
    image            TEXT,
    image_tag        TEXT,
    status           TEXT,
    health_status    TEXT,
    restart_policy   TEXT,
    network_mode     TEXT,
    networks         TEXT,
    ports            TEXT,
    environment_vars TEXT,
    labels           TEXT,
    memory_limit_mb  INTEGER,
    command          TEXT,
    created_at       TEXT NOT NULL DEFAULT {ts},
    updated_at       TEXT NOT NULL DEFAULT {ts},
    UNIQUE (docker_host_id, container_name)
);

CREATE TABLE IF NOT EXISTS docker_volumes (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    docker_host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    volume_name    TEXT NOT NULL,
    driver         TEXT,
    mount_point    TEXT,
    options        TEXT,
    labels         TEXT,
    created_at     TEXT NOT NULL DEFAULT {ts},
    updated_at     TEXT NOT NULL DEFAULT {ts},
    UNIQUE (docker_host_id, volume_name)
);

CREATE TABLE IF NOT EXISTS docker_networks (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    docker_host_id INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    network_name   TEXT NOT NULL,
    network_id     TEXT,
    driver         TEXT,
    subnet         TEXT,
    gateway        TEXT,
    internal       INTEGER,
    attachable     INTEGER,
    labels         TEXT,
    created_at     TEXT NOT NULL DEFAULT {ts},
    updated_at     TEXT NOT NULL DEFAULT {ts},
    UNIQUE (docker_host_id, network_name)
);

CREATE TABLE IF NOT EXISTS services (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    host_id      INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    service_name TEXT NOT NULL,
    service_type TEXT,
    port         INTEGER,
    protocol     TEXT,
    status       TEXT,
    url          TEXT,
    criticality  TEXT,
    created_at   TEXT NOT NULL DEFAULT {ts},
    updated_at   TEXT NOT NULL DEFAULT {ts},
    UNIQUE (host_id, service_name)
);

CREATE TABLE IF NOT EXISTS service_dependencies (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    dependent_service_id  INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    dependency_service_id INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    dependency_type       TEXT NOT NULL DEFAULT 'requires',
    created_at            TEXT NOT NULL DEFAULT {ts},
    UNIQUE (dependent_service_id, dependency_service_id),
    CHECK (dependent_service_id <> dependency_service_id)
);

CREATE TABLE IF NOT EXISTS health_checks (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    service_id       INTEGER NOT NULL REFERENCES services(id) ON DELETE CASCADE,
    status           TEXT NOT NULL,
    response_time_ms INTEGER,
    error_message    TEXT,
    checked_at       TEXT NOT NULL DEFAULT {ts}
);

CREATE TABLE IF NOT EXISTS networks (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    network_name  TEXT NOT NULL UNIQUE,
    cidr          TEXT NOT NULL,
    vlan_id       INTEGER,
    gateway       TEXT,
    security_zone TEXT,
    created_at    TEXT NOT NULL DEFAULT {ts},
    updated_at    TEXT NOT NULL DEFAULT {ts}
);

CREATE TABLE IF NOT EXISTS network_interfaces (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    host_id        INTEGER NOT NULL REFERENCES hosts(id) ON DELETE CASCADE,
    interface_name TEXT NOT NULL,
    mac_address    TEXT,
    created_at     TEXT NOT NULL DEFAULT {ts},
    UNIQUE (host_id, interface_name)
);

CREATE TABLE IF NOT EXISTS ip_addresses (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    ip_address   TEXT NOT NULL,
    network_id   INTEGER REFERENCES networks(id) ON DELETE CASCADE,
    host_id      INTEGER REFERENCES hosts(id) ON DELETE SET NULL,
    interface_id INTEGER REFERENCES network_interfaces(id) ON DELETE SET NULL,
    created_at   TEXT NOT NULL DEFAULT {ts},
    UNIQUE (ip_address, network_id)
);

CREATE TABLE IF NOT EXISTS infrastructure_changes (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    change_type   TEXT NOT NULL CHECK (change_type IN ('create', 'update')),
    entity_type   TEXT NOT NULL,
    entity_id     INTEGER NOT NULL,
    changed_by    TEXT NOT NULL,
    change_source TEXT NOT NULL CHECK (change_source IN ('manual', 'automation')),
    old_values    TEXT,
    new_values    TEXT NOT NULL,
    description   TEXT,
    changed_at    TEXT NOT NULL,
    CHECK ((change_type = 'create') = (old_values IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_changes_entity
    ON infrastructure_changes (entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_health_checks_service
    ON health_checks (service_id, checked_at);
CREATE INDEX IF NOT EXISTS idx_hosts_parent
    ON hosts (parent_host_id);

CREATE TRIGGER IF NOT EXISTS infrastructure_changes_no_update
    BEFORE UPDATE ON infrastructure_changes
BEGIN
    SELECT RAISE(ABORT, 'infrastructure_changes is append-only');
END;

CREATE TRIGGER IF NOT EXISTS infrastructure_changes_no_delete
    BEFORE DELETE ON infrastructure_changes
BEGIN
    SELECT RAISE(ABORT, 'infrastructure_changes is append-only');
END;
"
    )
}

/// Creates every table and stamps the schema version.
pub(crate) fn apply(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(&ddl())?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

pub(crate) fn version(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Refuses databases written by a different schema version.
pub(crate) fn check_version(conn: &Connection, path: &Path) -> Result<(), StoreError> {
    let found = version(conn)?;
    if found != SCHEMA_VERSION {
        return Err(StoreError::SchemaVersion {
            path: path.to_path_buf(),
            found,
            expected: SCHEMA_VERSION,
        });
    }
    Ok(())
}
