use std::path::PathBuf;

use crate::registry::WindowId;

/// Errors from operations on a live transport.
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PTY resize failed: {0}")]
    ResizeFailed(String),

    #[error("transport already exited")]
    Exited,
}

/// A transport could not be created.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to open PTY: {0}")]
    OpenPty(String),

    #[error("failed to launch {program}: {message}")]
    Launch { program: String, message: String },

    #[error("{program} exited immediately with code {code}")]
    ExitedImmediately { program: String, code: u32 },
}

impl SpawnError {
    /// Exit code of the process, if it got far enough to have one.
    pub fn exit_code(&self) -> Option<u32> {
        match self {
            SpawnError::ExitedImmediately { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// The active transport terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("transport exited with code {code}")]
pub struct TransportExit {
    pub code: u32,
}

/// A drag-drop or paste upload failed.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    #[error("transfer of {path} failed ({status}): {stderr}")]
    Transfer {
        path: PathBuf,
        status: String,
        stderr: String,
    },

    #[error("upload task aborted: {0}")]
    Aborted(String),
}

/// Errors surfaced by the session registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("window {0} already has a session")]
    SessionExists(WindowId),

    #[error("no session for window {0}")]
    WindowNotFound(WindowId),

    #[error("session for window {0} has ended")]
    SessionClosed(WindowId),

    #[error("uploads are not configured")]
    UploadsDisabled,

    #[error(transparent)]
    Upload(#[from] UploadError),
}
