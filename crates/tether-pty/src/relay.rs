//! Per-transport relay thread that forwards output to the owning session.
//!
//! Each transport gets its own dedicated OS thread because PTY reads are
//! blocking. The thread owns the reader directly, so a blocked read never
//! holds up the session. Every event carries the transport's generation so
//! the session can drop anything a discarded transport still produces.

use std::io::Read;

use tokio::sync::mpsc;

use crate::error::TransportExit;
use crate::pty::TransportIo;

/// Identifies one transport within a session's lifetime.
pub type Generation = u64;

/// Events sent from a relay thread to its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A chunk of transport output, exactly as read.
    Output {
        generation: Generation,
        data: Vec<u8>,
    },
    /// The transport's process exited. Always the last event of a generation.
    Exited {
        generation: Generation,
        exit: TransportExit,
    },
}

impl RelayEvent {
    pub fn generation(&self) -> Generation {
        match self {
            RelayEvent::Output { generation, .. } | RelayEvent::Exited { generation, .. } => {
                *generation
            }
        }
    }
}

/// Start the read loop for a transport on a dedicated OS thread.
pub fn start_relay_thread(
    label: &str,
    generation: Generation,
    io: TransportIo,
    buffer_size: usize,
    events: mpsc::UnboundedSender<RelayEvent>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name(format!("relay-{label}-{generation}"))
        .spawn(move || relay_loop(generation, io, buffer_size.max(1), events))?;
    Ok(())
}

fn relay_loop(
    generation: Generation,
    io: TransportIo,
    buffer_size: usize,
    events: mpsc::UnboundedSender<RelayEvent>,
) {
    let TransportIo { mut reader, exit } = io;
    let mut buf = vec![0u8; buffer_size];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            // EIO is how a pty master reports that the child side closed.
            Err(_) => break,
        };

        let event = RelayEvent::Output {
            generation,
            data: buf[..n].to_vec(),
        };
        if events.send(event).is_err() {
            // Session is gone; nobody is left to tell about the exit either.
            return;
        }
    }

    drop(reader);
    let code = exit.wait();
    log::debug!("transport generation {generation} exited with code {code}");
    let _ = events.send(RelayEvent::Exited {
        generation,
        exit: TransportExit { code },
    });
}
