//! Events delivered from a session to its display.
//!
//! Serialized as tagged JSON so a GUI host can forward them over its own
//! IPC channel unchanged.

use serde::Serialize;

use crate::session::ConnectionState;

/// Events sent from a session to the display collaborator.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum TerminalEvent {
    /// Raw bytes to render, in transport order. Diagnostic lines written by
    /// the session itself also arrive here.
    Output { data: Vec<u8> },
    /// The connection state changed.
    StateChanged { state: ConnectionState },
    /// The session ended; no further events follow.
    Closed,
}
