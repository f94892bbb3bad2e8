//! Connection and timing configuration.
//!
//! Everything here is built once at startup and handed to the spawner,
//! the transfer service and the registry. Nothing reads ambient globals.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default SSH client executable.
pub const DEFAULT_SSH_PROGRAM: &str = "ssh";

/// Default secure-copy executable used for uploads.
pub const DEFAULT_SCP_PROGRAM: &str = "scp";

/// Default delay before a reconnect attempt.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Default delay between the two writes of a bracketed frame.
pub const DEFAULT_MARKER_DELAY: Duration = Duration::from_millis(5);

/// Default size of the relay's read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 65536;

/// Default remote directory uploads land in.
pub const DEFAULT_REMOTE_UPLOAD_DIR: &str = "/tmp";

/// Terminal geometry in character cells. Both dimensions are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Geometry {
    /// Build a geometry, clamping zero dimensions to 1.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// How to reach the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote target, anything `ssh` accepts as a destination.
    pub host: String,
    /// SSH client executable.
    pub program: String,
    pub connect_timeout_secs: Option<u32>,
    pub server_alive_interval_secs: Option<u32>,
    pub server_alive_count_max: Option<u32>,
    /// When `false`, `-o TCPKeepAlive=no` is passed so that only the
    /// server-alive probes decide when a connection is dead.
    pub tcp_keepalive: bool,
    /// Local port forwards, each in `ssh -L` syntax.
    pub local_forwards: Vec<String>,
}

impl SshConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            program: DEFAULT_SSH_PROGRAM.to_string(),
            connect_timeout_secs: Some(10),
            server_alive_interval_secs: Some(5),
            server_alive_count_max: Some(3),
            tcp_keepalive: false,
            local_forwards: Vec::new(),
        }
    }

    /// Arguments passed to the SSH client, destination last.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(secs) = self.connect_timeout_secs {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={secs}"));
        }
        if let Some(secs) = self.server_alive_interval_secs {
            args.push("-o".to_string());
            args.push(format!("ServerAliveInterval={secs}"));
        }
        if let Some(count) = self.server_alive_count_max {
            args.push("-o".to_string());
            args.push(format!("ServerAliveCountMax={count}"));
        }
        if !self.tcp_keepalive {
            args.push("-o".to_string());
            args.push("TCPKeepAlive=no".to_string());
        }
        for forward in &self.local_forwards {
            args.push("-L".to_string());
            args.push(forward.clone());
        }
        args.push(self.host.clone());
        args
    }
}

/// Timing and buffering policy for sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub reconnect_backoff: Duration,
    pub marker_delay: Duration,
    pub read_buffer_size: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            marker_delay: DEFAULT_MARKER_DELAY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

/// Where upload artifacts are staged and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    pub scp_program: String,
    pub remote_dir: String,
    pub staging_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            scp_program: DEFAULT_SCP_PROGRAM.to_string(),
            remote_dir: DEFAULT_REMOTE_UPLOAD_DIR.to_string(),
            staging_dir: std::env::temp_dir().join("tether-uploads"),
        }
    }
}
