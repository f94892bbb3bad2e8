use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};

use crate::config::{Geometry, SshConfig};
use crate::error::{PtyError, SpawnError};

/// One live subprocess attached to a pseudo-terminal.
///
/// A transport is owned by exactly one session. Its output stream and exit
/// notification are handed out once through [`Transport::take_io`] so that
/// blocking reads can happen on a relay thread while the session keeps
/// writing and resizing.
pub trait Transport: Send {
    /// Write bytes to the remote side (user input -> shell).
    fn write(&mut self, data: &[u8]) -> Result<(), PtyError>;

    /// Resize the pseudo-terminal.
    fn resize(&mut self, geometry: Geometry) -> Result<(), PtyError>;

    /// Hand out the output reader and exit waiter. Returns `None` after the
    /// first call.
    fn take_io(&mut self) -> Option<TransportIo>;

    /// Terminate the subprocess. Safe to call more than once.
    fn kill(&mut self);
}

/// The read side of a transport.
pub struct TransportIo {
    pub reader: Box<dyn Read + Send>,
    pub exit: Box<dyn ExitWaiter>,
}

/// Blocks until the subprocess has exited and yields its exit code.
pub trait ExitWaiter: Send {
    fn wait(self: Box<Self>) -> u32;
}

/// Creates transports. Retry policy belongs to the caller.
pub trait Spawner: Send + Sync {
    fn spawn(&self, geometry: Geometry) -> Result<Box<dyn Transport>, SpawnError>;
}

/// Spawns a fixed command on a native pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    program: String,
    args: Vec<String>,
}

impl PtySpawner {
    pub fn command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Spawner for an SSH client connecting to `config.host`.
    pub fn ssh(config: &SshConfig) -> Self {
        Self::command(config.program.clone(), config.args())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn launch_error(&self, message: impl std::fmt::Display) -> SpawnError {
        SpawnError::Launch {
            program: self.program.clone(),
            message: message.to_string(),
        }
    }
}

impl Spawner for PtySpawner {
    fn spawn(&self, geometry: Geometry) -> Result<Box<dyn Transport>, SpawnError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(pty_size(geometry))
            .map_err(|e| SpawnError::OpenPty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&self.program);
        cmd.args(&self.args);
        if std::env::var_os("TERM").is_none() {
            cmd.env("TERM", "xterm-256color");
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| self.launch_error(e))?;
        // Only the child keeps the slave side open, so the reader sees EOF
        // once the child exits.
        drop(pair.slave);

        if let Ok(Some(status)) = child.try_wait() {
            return Err(SpawnError::ExitedImmediately {
                program: self.program.clone(),
                code: status.exit_code(),
            });
        }

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| self.launch_error(format!("failed to clone reader: {e}")))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| self.launch_error(format!("failed to take writer: {e}")))?;

        log::debug!(
            "spawned {} (pid {:?}) at {}x{}",
            self.program,
            child.process_id(),
            geometry.cols,
            geometry.rows
        );

        let killer = child.clone_killer();
        let exited = Arc::new(AtomicBool::new(false));

        Ok(Box::new(PtyTransport {
            master: pair.master,
            writer,
            killer,
            io: Some(TransportIo {
                reader,
                exit: Box::new(ChildExit {
                    child,
                    exited: Arc::clone(&exited),
                }),
            }),
            exited,
        }))
    }
}

/// Transport backed by a portable-pty master and child process.
pub struct PtyTransport {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    io: Option<TransportIo>,
    exited: Arc<AtomicBool>,
}

impl Transport for PtyTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        if self.exited.load(Ordering::Acquire) {
            return Err(PtyError::Exited);
        }
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn resize(&mut self, geometry: Geometry) -> Result<(), PtyError> {
        if self.exited.load(Ordering::Acquire) {
            return Err(PtyError::Exited);
        }
        self.master
            .resize(pty_size(geometry))
            .map_err(|e| PtyError::ResizeFailed(e.to_string()))
    }

    fn take_io(&mut self) -> Option<TransportIo> {
        self.io.take()
    }

    fn kill(&mut self) {
        if !self.exited.load(Ordering::Acquire) {
            let _ = self.killer.kill();
        }
    }
}

impl Drop for PtyTransport {
    fn drop(&mut self) {
        self.kill();
    }
}

struct ChildExit {
    child: Box<dyn Child + Send + Sync>,
    exited: Arc<AtomicBool>,
}

impl ExitWaiter for ChildExit {
    fn wait(mut self: Box<Self>) -> u32 {
        let code = match self.child.wait() {
            Ok(status) => status.exit_code(),
            Err(e) => {
                log::warn!("failed to wait for transport process: {e}");
                1
            }
        };
        self.exited.store(true, Ordering::Release);
        code
    }
}

fn pty_size(geometry: Geometry) -> PtySize {
    PtySize {
        rows: geometry.rows,
        cols: geometry.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}
