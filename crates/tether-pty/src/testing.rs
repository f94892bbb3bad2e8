//! Scripted in-memory transports for session and registry tests.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::{Geometry, Tuning};
use crate::error::{PtyError, SpawnError};
use crate::ipc::TerminalEvent;
use crate::pty::{ExitWaiter, Spawner, Transport, TransportIo};
use crate::session::ConnectionState;

/// Everything a transport was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Write(Vec<u8>),
    Resize(Geometry),
}

/// Fast timings so reconnect tests finish quickly.
pub fn fast_tuning() -> Tuning {
    Tuning {
        reconnect_backoff: Duration::from_millis(100),
        marker_delay: Duration::from_millis(20),
        read_buffer_size: 4096,
    }
}

#[derive(Default)]
struct SpawnerState {
    failures: VecDeque<SpawnError>,
    remotes: Vec<MockRemote>,
    attempts: usize,
}

/// Spawner handing out [`MockRemote`]-controlled transports.
#[derive(Clone, Default)]
pub struct MockSpawner {
    state: Arc<Mutex<SpawnerState>>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next spawn attempt fail with `error`.
    pub fn fail_next(&self, error: SpawnError) {
        self.state.lock().unwrap().failures.push_back(error);
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn remotes(&self) -> Vec<MockRemote> {
        self.state.lock().unwrap().remotes.clone()
    }

    /// Wait until `count` transports have been created.
    pub async fn wait_for_spawns(&self, count: usize) -> Vec<MockRemote> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remotes = self.remotes();
            if remotes.len() >= count {
                return remotes;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {count} spawns, saw {}",
                remotes.len()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Spawner for MockSpawner {
    fn spawn(&self, geometry: Geometry) -> Result<Box<dyn Transport>, SpawnError> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        let (output_tx, output_rx) = std_mpsc::channel();
        let (exit_tx, exit_rx) = std_mpsc::channel();
        let remote = MockRemote {
            shared: Arc::new(RemoteShared {
                spawn_geometry: geometry,
                ops: Mutex::new(Vec::new()),
                write_times: Mutex::new(Vec::new()),
                killed: AtomicBool::new(false),
                exited: AtomicBool::new(false),
                output: Mutex::new(Some(output_tx)),
                exit: Mutex::new(Some(exit_tx)),
            }),
        };
        state.remotes.push(remote.clone());

        Ok(Box::new(MockTransport {
            io: Some(TransportIo {
                reader: Box::new(ChannelReader {
                    rx: output_rx,
                    pending: Vec::new(),
                }),
                exit: Box::new(ChannelExit {
                    rx: exit_rx,
                    remote: remote.clone(),
                }),
            }),
            remote,
        }))
    }
}

struct RemoteShared {
    spawn_geometry: Geometry,
    ops: Mutex<Vec<Op>>,
    write_times: Mutex<Vec<Instant>>,
    killed: AtomicBool,
    exited: AtomicBool,
    output: Mutex<Option<std_mpsc::Sender<Vec<u8>>>>,
    exit: Mutex<Option<std_mpsc::Sender<u32>>>,
}

/// The far end of a mock transport, driven by the test.
#[derive(Clone)]
pub struct MockRemote {
    shared: Arc<RemoteShared>,
}

impl MockRemote {
    /// Produce output as if the remote shell printed it.
    pub fn emit(&self, data: &[u8]) {
        if let Some(tx) = self.shared.output.lock().unwrap().as_ref() {
            let _ = tx.send(data.to_vec());
        }
    }

    /// End the process with `code` after any output already emitted.
    pub fn exit(&self, code: u32) {
        self.shared.exited.store(true, Ordering::Release);
        self.shared.output.lock().unwrap().take();
        if let Some(tx) = self.shared.exit.lock().unwrap().take() {
            let _ = tx.send(code);
        }
    }

    pub fn spawn_geometry(&self) -> Geometry {
        self.shared.spawn_geometry
    }

    pub fn ops(&self) -> Vec<Op> {
        self.shared.ops.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write(data) => Some(data),
                Op::Resize(_) => None,
            })
            .collect()
    }

    pub fn written(&self) -> Vec<u8> {
        self.writes().concat()
    }

    pub fn write_times(&self) -> Vec<Instant> {
        self.shared.write_times.lock().unwrap().clone()
    }

    pub fn is_killed(&self) -> bool {
        self.shared.killed.load(Ordering::Acquire)
    }
}

struct MockTransport {
    remote: MockRemote,
    io: Option<TransportIo>,
}

impl Transport for MockTransport {
    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let shared = &self.remote.shared;
        if shared.exited.load(Ordering::Acquire) {
            return Err(PtyError::Exited);
        }
        shared.ops.lock().unwrap().push(Op::Write(data.to_vec()));
        shared.write_times.lock().unwrap().push(Instant::now());
        Ok(())
    }

    fn resize(&mut self, geometry: Geometry) -> Result<(), PtyError> {
        let shared = &self.remote.shared;
        if shared.exited.load(Ordering::Acquire) {
            return Err(PtyError::Exited);
        }
        shared.ops.lock().unwrap().push(Op::Resize(geometry));
        Ok(())
    }

    fn take_io(&mut self) -> Option<TransportIo> {
        self.io.take()
    }

    fn kill(&mut self) {
        if !self.remote.shared.exited.load(Ordering::Acquire) {
            self.remote.shared.killed.store(true, Ordering::Release);
            self.remote.exit(137);
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.kill();
    }
}

struct ChannelReader {
    rx: std_mpsc::Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct ChannelExit {
    rx: std_mpsc::Receiver<u32>,
    remote: MockRemote,
}

impl ExitWaiter for ChannelExit {
    fn wait(self: Box<Self>) -> u32 {
        let code = self.rx.recv().unwrap_or(0);
        self.remote.shared.exited.store(true, Ordering::Release);
        code
    }
}

/// Receive the next event, failing the test after a generous timeout.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<TerminalEvent>) -> TerminalEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a terminal event")
        .expect("event stream ended")
}

/// Consume events up to and including a change to `state`, returning every
/// event seen on the way.
pub async fn events_until_state(
    rx: &mut mpsc::UnboundedReceiver<TerminalEvent>,
    state: ConnectionState,
) -> Vec<TerminalEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = event == TerminalEvent::StateChanged { state };
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Concatenated output bytes from a list of events.
pub fn output_of(events: &[TerminalEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            TerminalEvent::Output { data } => Some(data.as_slice()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .concat()
}
