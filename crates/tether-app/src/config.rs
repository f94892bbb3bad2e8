//! Typed configuration built from the settings table.
//!
//! Every value has a default seeded on first launch. A stored value that
//! does not parse falls back to the default with a warning instead of
//! refusing to start.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use rusqlite::Connection;
use tether_db::settings;
use tether_pty::{SshConfig, TransferConfig, Tuning};

pub const SETTING_SSH_HOST: &str = "ssh_host";
pub const SETTING_SSH_PROGRAM: &str = "ssh_program";
pub const SETTING_CONNECT_TIMEOUT: &str = "ssh_connect_timeout_secs";
pub const SETTING_ALIVE_INTERVAL: &str = "ssh_server_alive_interval_secs";
pub const SETTING_ALIVE_COUNT: &str = "ssh_server_alive_count_max";
pub const SETTING_TCP_KEEPALIVE: &str = "ssh_tcp_keepalive";
pub const SETTING_LOCAL_FORWARDS: &str = "ssh_local_forwards";
pub const SETTING_RECONNECT_BACKOFF_MS: &str = "reconnect_backoff_ms";
pub const SETTING_MARKER_DELAY_MS: &str = "marker_delay_ms";
pub const SETTING_READ_BUFFER_SIZE: &str = "read_buffer_size";
pub const SETTING_SCP_PROGRAM: &str = "scp_program";
pub const SETTING_UPLOAD_REMOTE_DIR: &str = "upload_remote_dir";
pub const SETTING_UPLOAD_STAGING_DIR: &str = "upload_staging_dir";

/// Every known setting with its seeded default. An empty optional value
/// means "not set".
pub const DEFAULTS: &[(&str, &str)] = &[
    (SETTING_SSH_HOST, ""),
    (SETTING_SSH_PROGRAM, "ssh"),
    (SETTING_CONNECT_TIMEOUT, "10"),
    (SETTING_ALIVE_INTERVAL, "5"),
    (SETTING_ALIVE_COUNT, "3"),
    (SETTING_TCP_KEEPALIVE, "false"),
    (SETTING_LOCAL_FORWARDS, "[]"),
    (SETTING_RECONNECT_BACKOFF_MS, "1000"),
    (SETTING_MARKER_DELAY_MS, "5"),
    (SETTING_READ_BUFFER_SIZE, "65536"),
    (SETTING_SCP_PROGRAM, "scp"),
    (SETTING_UPLOAD_REMOTE_DIR, "/tmp"),
    (SETTING_UPLOAD_STAGING_DIR, ""),
];

/// Everything the app needs to build its spawner, registry and uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub ssh: SshConfig,
    pub tuning: Tuning,
    pub transfer: TransferConfig,
}

/// Seed defaults for settings that have never been written.
pub fn seed_defaults(conn: &Connection) -> rusqlite::Result<()> {
    for (key, value) in DEFAULTS {
        if settings::set_default(conn, key, value)? {
            log::debug!("seeded setting {key}={value}");
        }
    }
    Ok(())
}

/// Persist a `key=value` assignment from the command line.
pub fn apply_assignment(conn: &Connection, assignment: &str) -> Result<(), String> {
    let (key, value) = assignment
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {assignment:?}"))?;
    let key = key.trim();
    if !DEFAULTS.iter().any(|(known, _)| *known == key) {
        return Err(format!("unknown setting {key:?}"));
    }
    settings::set(conn, key, value.trim()).map_err(|e| format!("failed to save {key}: {e}"))?;
    log::info!("setting {key} updated");
    Ok(())
}

/// One `--list-settings` line: `key=value  # updated <timestamp>`.
pub fn describe(setting: &settings::Setting) -> String {
    format!("{}={}  # updated {}", setting.key, setting.value, setting.updated_at)
}

pub fn load(conn: &Connection) -> rusqlite::Result<AppConfig> {
    let ssh = SshConfig {
        host: read_string(conn, SETTING_SSH_HOST)?,
        program: read_string(conn, SETTING_SSH_PROGRAM)?,
        connect_timeout_secs: read_optional(conn, SETTING_CONNECT_TIMEOUT)?,
        server_alive_interval_secs: read_optional(conn, SETTING_ALIVE_INTERVAL)?,
        server_alive_count_max: read_optional(conn, SETTING_ALIVE_COUNT)?,
        tcp_keepalive: read_parsed(conn, SETTING_TCP_KEEPALIVE)?,
        local_forwards: read_forwards(conn)?,
    };

    let tuning = Tuning {
        reconnect_backoff: Duration::from_millis(read_parsed(conn, SETTING_RECONNECT_BACKOFF_MS)?),
        marker_delay: Duration::from_millis(read_parsed(conn, SETTING_MARKER_DELAY_MS)?),
        read_buffer_size: read_parsed(conn, SETTING_READ_BUFFER_SIZE)?,
    };

    let staging_dir = read_string(conn, SETTING_UPLOAD_STAGING_DIR)?;
    let transfer = TransferConfig {
        scp_program: read_string(conn, SETTING_SCP_PROGRAM)?,
        remote_dir: read_string(conn, SETTING_UPLOAD_REMOTE_DIR)?,
        staging_dir: if staging_dir.is_empty() {
            TransferConfig::default().staging_dir
        } else {
            PathBuf::from(staging_dir)
        },
    };

    Ok(AppConfig {
        ssh,
        tuning,
        transfer,
    })
}

fn default_for(key: &str) -> &'static str {
    DEFAULTS
        .iter()
        .find(|(known, _)| *known == key)
        .map(|(_, value)| *value)
        .unwrap_or("")
}

fn read_string(conn: &Connection, key: &str) -> rusqlite::Result<String> {
    Ok(settings::get(conn, key)?
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| default_for(key).to_string()))
}

fn read_parsed<T: FromStr>(conn: &Connection, key: &str) -> rusqlite::Result<T> {
    let raw = read_string(conn, key)?;
    match raw.parse() {
        Ok(value) => Ok(value),
        Err(_) => {
            log::warn!("setting {key}={raw:?} is invalid, using default");
            default_for(key)
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnName(key.to_string()))
        }
    }
}

fn read_optional<T: FromStr>(conn: &Connection, key: &str) -> rusqlite::Result<Option<T>> {
    let raw = read_string(conn, key)?;
    if raw.is_empty() {
        return Ok(None);
    }
    read_parsed(conn, key).map(Some)
}

fn read_forwards(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    match settings::get_json::<Vec<String>>(conn, SETTING_LOCAL_FORWARDS) {
        Ok(forwards) => Ok(forwards.unwrap_or_default()),
        Err(rusqlite::Error::FromSqlConversionFailure(..)) => {
            log::warn!("setting {SETTING_LOCAL_FORWARDS} is not a JSON list, ignoring it");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}
