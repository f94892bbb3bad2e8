//! tether-pty: reconnecting SSH terminal sessions.
//!
//! This crate sits between a display surface (a GUI window or the local
//! terminal) and a remote shell reached through an SSH client running on a
//! pseudo-terminal. It keeps the session alive across network drops and
//! frames pastes and uploads so they survive transport re-chunking.
//!
//! # Architecture
//!
//! - [`PtySpawner`] — Launches the SSH client on a pty ([`Spawner`] is the seam).
//! - [`SessionHandle`] — One session per window: reconnect state machine,
//!   input serialization, bracketed frames.
//! - [`relay`] — Per-transport thread forwarding output to its session.
//! - [`BracketedFrame`] — Two-write paste/upload framing.
//! - [`TransferService`] — Stages and uploads dropped files and pasted images.
//! - [`SessionRegistry`] — Maps windows to sessions and routes their events.

pub mod bracket;
pub mod config;
pub mod error;
pub mod ipc;
pub mod paste_mode;
pub mod pty;
pub mod registry;
pub mod relay;
pub mod session;
pub mod upload;

#[cfg(test)]
mod testing;

pub use bracket::BracketedFrame;
pub use config::{Geometry, SshConfig, TransferConfig, Tuning};
pub use error::{PtyError, RegistryError, SpawnError, TransportExit, UploadError};
pub use ipc::TerminalEvent;
pub use pty::{PtySpawner, Spawner, Transport};
pub use registry::{SessionRegistry, WindowId};
pub use session::{ConnectionState, SessionHandle, SessionInfo};
pub use upload::{DroppedFile, PastedImage, ScpUploader, TransferService, Uploader};
