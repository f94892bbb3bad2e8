//! One reconnecting terminal session per window.
//!
//! A session runs as a single tokio task that owns all of its state. Commands
//! from the registry, output and exit events from the relay thread, and the
//! reconnect timer are handled one at a time, which keeps the state machine
//! free of locks:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected -> ... (after backoff)
//!        \______________\_____________\______> Closing (on close)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bracket::{normalize_newlines, BracketedFrame};
use crate::config::{Geometry, Tuning};
use crate::ipc::TerminalEvent;
use crate::paste_mode::PasteModeTracker;
use crate::pty::{Spawner, Transport};
use crate::registry::WindowId;
use crate::relay::{start_relay_thread, Generation, RelayEvent};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub window: WindowId,
    pub state: ConnectionState,
    pub geometry: Geometry,
    pub reconnect_attempts: u64,
    pub bracketed_paste: bool,
}

enum SessionCommand {
    Write(Vec<u8>),
    Resize(Geometry),
    PasteText(String),
    SendFrame(BracketedFrame),
    Info(oneshot::Sender<SessionInfo>),
    Close,
}

/// Handle used to drive a running session.
///
/// Dropping every handle closes the session.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Start a session and its first connection attempt.
    ///
    /// Must be called from within a tokio runtime. The returned receiver is
    /// the display's view of the session.
    pub fn start(
        window: WindowId,
        spawner: Arc<dyn Spawner>,
        tuning: Tuning,
        geometry: Geometry,
    ) -> (Self, mpsc::UnboundedReceiver<TerminalEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();

        let session = Session {
            window,
            state: ConnectionState::Disconnected,
            geometry: Geometry::new(geometry.cols, geometry.rows),
            spawner,
            tuning,
            events: event_tx,
            relay_tx,
            active: None,
            generation: 0,
            reconnect_attempts: 0,
            reconnect_at: None,
            paste_mode: PasteModeTracker::new(),
        };
        let task = tokio::spawn(session.run(command_rx, relay_rx));

        (
            Self {
                commands: command_tx,
                task,
            },
            event_rx,
        )
    }

    /// Queue input for the remote shell. Input sent while disconnected is
    /// dropped. Returns `false` once the session has ended.
    pub fn write(&self, data: impl Into<Vec<u8>>) -> bool {
        self.send(SessionCommand::Write(data.into()))
    }

    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        self.send(SessionCommand::Resize(Geometry::new(cols, rows)))
    }

    /// Paste text, bracketed if the remote application asked for it.
    pub fn paste_text(&self, text: impl Into<String>) -> bool {
        self.send(SessionCommand::PasteText(text.into()))
    }

    /// Send paths as one bracketed frame.
    pub fn send_paths<I, S>(&self, tokens: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.send_frame(BracketedFrame::paths(tokens))
    }

    pub fn send_frame(&self, frame: BracketedFrame) -> bool {
        self.send(SessionCommand::SendFrame(frame))
    }

    /// Snapshot of the session, answered after every previously queued
    /// command has been applied.
    pub async fn info(&self) -> Option<SessionInfo> {
        self.request_info()?.await.ok()
    }

    /// Queue a snapshot request without waiting for the answer.
    pub fn request_info(&self) -> Option<oneshot::Receiver<SessionInfo>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Info(tx)).then_some(rx)
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        let _ = self.commands.send(SessionCommand::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Close and wait for the session task to finish its teardown.
    pub async fn shutdown(self) {
        self.close();
        let _ = self.task.await;
    }

    fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).is_ok()
    }
}

struct Active {
    generation: Generation,
    transport: Box<dyn Transport>,
}

struct Session {
    window: WindowId,
    state: ConnectionState,
    geometry: Geometry,
    spawner: Arc<dyn Spawner>,
    tuning: Tuning,
    events: mpsc::UnboundedSender<TerminalEvent>,
    relay_tx: mpsc::UnboundedSender<RelayEvent>,
    active: Option<Active>,
    generation: Generation,
    reconnect_attempts: u64,
    reconnect_at: Option<Instant>,
    paste_mode: PasteModeTracker,
}

impl Session {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
    ) {
        self.connect();

        loop {
            let reconnect_at = self.reconnect_at;
            // Commands go first so a close queued alongside a due timer wins.
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(SessionCommand::Close) | None => break,
                    Some(command) => self.handle_command(command, &mut relay_rx).await,
                },
                Some(event) = relay_rx.recv() => self.handle_relay(event),
                () = wait_until(reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect();
                }
            }
        }

        self.teardown();
    }

    async fn handle_command(
        &mut self,
        command: SessionCommand,
        relay_rx: &mut mpsc::UnboundedReceiver<RelayEvent>,
    ) {
        match command {
            SessionCommand::Write(data) => self.write_active(&data),
            SessionCommand::Resize(geometry) => {
                self.geometry = geometry;
                if let Some(active) = self.active.as_mut() {
                    apply_geometry(self.window, active.transport.as_mut(), geometry);
                }
            }
            SessionCommand::PasteText(text) => {
                if self.paste_mode.bracketed() {
                    self.send_frame(BracketedFrame::text(&text), relay_rx).await;
                } else {
                    self.write_active(normalize_newlines(&text).as_bytes());
                }
            }
            SessionCommand::SendFrame(frame) => self.send_frame(frame, relay_rx).await,
            SessionCommand::Info(reply) => {
                let _ = reply.send(self.info());
            }
            SessionCommand::Close => {}
        }
    }

    fn handle_relay(&mut self, event: RelayEvent) {
        if Some(event.generation()) != self.active_generation() {
            log::trace!(
                "window {}: dropping event from stale transport {}",
                self.window,
                event.generation()
            );
            return;
        }

        match event {
            RelayEvent::Output { data, .. } => {
                self.paste_mode.advance(&data);
                self.emit(TerminalEvent::Output { data });
            }
            RelayEvent::Exited { exit, .. } => {
                log::info!("window {}: {exit}", self.window);
                self.active = None;
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect(&format!("ssh exited with code {}", exit.code));
            }
        }
    }

    fn connect(&mut self) {
        debug_assert!(self.active.is_none(), "connect with a live transport");
        self.set_state(ConnectionState::Connecting);

        let mut transport = match self.spawner.spawn(self.geometry) {
            Ok(transport) => transport,
            Err(e) => {
                log::warn!("window {}: {e}", self.window);
                self.set_state(ConnectionState::Disconnected);
                let reason = match e.exit_code() {
                    Some(code) => format!("ssh exited with code {code}"),
                    None => format!("ssh failed to start: {e}"),
                };
                self.schedule_reconnect(&reason);
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;

        // Geometry goes in before the relay starts, so no output of this
        // transport is delivered ahead of it.
        apply_geometry(self.window, transport.as_mut(), self.geometry);
        self.paste_mode.reset();

        let started = match transport.take_io() {
            Some(io) => start_relay_thread(
                &self.window.to_string(),
                generation,
                io,
                self.tuning.read_buffer_size,
                self.relay_tx.clone(),
            )
            .map_err(|e| e.to_string()),
            None => Err("transport output already taken".to_string()),
        };
        if let Err(e) = started {
            log::warn!("window {}: failed to start relay: {e}", self.window);
            transport.kill();
            self.set_state(ConnectionState::Disconnected);
            self.schedule_reconnect(&format!("ssh relay failed: {e}"));
            return;
        }

        self.active = Some(Active {
            generation,
            transport,
        });
        self.set_state(ConnectionState::Connected);
    }

    fn schedule_reconnect(&mut self, reason: &str) {
        self.reconnect_attempts += 1;
        let backoff = self.tuning.reconnect_backoff;
        log::info!(
            "window {}: reconnect attempt {} in {:?}",
            self.window,
            self.reconnect_attempts,
            backoff
        );
        self.emit(TerminalEvent::Output {
            data: diagnostic_line(reason, backoff).into_bytes(),
        });
        self.reconnect_at = Some(Instant::now() + backoff);
    }

    /// Write the opening half, keep relaying output for the marker delay,
    /// then write END unless the transport was lost in the meantime.
    /// Commands queue behind the frame, so no input lands between markers.
    async fn send_frame(
        &mut self,
        frame: BracketedFrame,
        relay_rx: &mut mpsc::UnboundedReceiver<RelayEvent>,
    ) {
        let Some(generation) = self.active_generation() else {
            log::debug!("window {}: dropping bracketed frame while disconnected", self.window);
            return;
        };

        self.write_active(frame.opening());

        let delay = tokio::time::sleep(self.tuning.marker_delay);
        tokio::pin!(delay);
        loop {
            tokio::select! {
                () = &mut delay => break,
                Some(event) = relay_rx.recv() => self.handle_relay(event),
            }
        }

        if self.active_generation() == Some(generation) {
            self.write_active(frame.closing());
        } else {
            log::debug!(
                "window {}: transport lost mid-frame, skipping END marker",
                self.window
            );
        }
    }

    fn write_active(&mut self, data: &[u8]) {
        match self.active.as_mut() {
            Some(active) => {
                // A failed write means the transport is going away; its exit
                // event drives the reconnect.
                if let Err(e) = active.transport.write(data) {
                    log::debug!("window {}: write failed: {e}", self.window);
                }
            }
            None => {
                log::trace!(
                    "window {}: dropping {} bytes of input while disconnected",
                    self.window,
                    data.len()
                );
            }
        }
    }

    fn teardown(&mut self) {
        self.set_state(ConnectionState::Closing);
        self.reconnect_at = None;
        if let Some(mut active) = self.active.take() {
            active.transport.kill();
        }
        log::info!("window {}: session closed", self.window);
        self.emit(TerminalEvent::Closed);
    }

    fn active_generation(&self) -> Option<Generation> {
        self.active.as_ref().map(|active| active.generation)
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            window: self.window,
            state: self.state,
            geometry: self.geometry,
            reconnect_attempts: self.reconnect_attempts,
            bracketed_paste: self.paste_mode.bracketed(),
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            log::debug!("window {}: {:?} -> {:?}", self.window, self.state, state);
            self.state = state;
            self.emit(TerminalEvent::StateChanged { state });
        }
    }

    fn emit(&self, event: TerminalEvent) {
        // The display may already be gone; the session keeps running until
        // it is closed.
        let _ = self.events.send(event);
    }
}

/// Apply geometry to a transport, ignoring a transport that already exited.
fn apply_geometry(window: WindowId, transport: &mut dyn Transport, geometry: Geometry) {
    if let Err(e) = transport.resize(geometry) {
        log::debug!(
            "window {window}: ignoring resize to {}x{}: {e}",
            geometry.cols,
            geometry.rows
        );
    }
}

/// The line shown to the user when the connection drops.
pub fn diagnostic_line(reason: &str, backoff: Duration) -> String {
    format!(
        "\r\n\x1b[33m[{reason}, reconnecting in {}...]\x1b[0m\r\n",
        format_backoff(backoff)
    )
}

fn format_backoff(backoff: Duration) -> String {
    if backoff.subsec_millis() == 0 && backoff.as_secs() > 0 {
        format!("{}s", backoff.as_secs())
    } else {
        format!("{}ms", backoff.as_millis())
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bracket::{END_MARKER, START_MARKER};
    use crate::error::SpawnError;
    use crate::testing::{
        events_until_state, fast_tuning, next_event, output_of, MockSpawner, Op,
    };

    fn start(spawner: &MockSpawner) -> (SessionHandle, mpsc::UnboundedReceiver<TerminalEvent>) {
        SessionHandle::start(
            1,
            Arc::new(spawner.clone()),
            fast_tuning(),
            Geometry::new(80, 24),
        )
    }

    #[tokio::test]
    async fn test_connects_and_relays_output_in_order() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);

        let seen = events_until_state(&mut events, ConnectionState::Connected).await;
        assert_eq!(
            seen,
            vec![
                TerminalEvent::StateChanged { state: ConnectionState::Connecting },
                TerminalEvent::StateChanged { state: ConnectionState::Connected },
            ]
        );

        let remote = &spawner.wait_for_spawns(1).await[0];
        remote.emit(b"hello ");
        remote.emit(b"world");
        assert_eq!(next_event(&mut events).await, TerminalEvent::Output { data: b"hello ".to_vec() });
        assert_eq!(next_event(&mut events).await, TerminalEvent::Output { data: b"world".to_vec() });

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_initial_geometry_applied_before_output() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);
        events_until_state(&mut events, ConnectionState::Connected).await;
        let remote = &spawner.wait_for_spawns(1).await[0];

        assert_eq!(remote.spawn_geometry(), Geometry::new(80, 24));
        assert_eq!(remote.ops().first(), Some(&Op::Resize(Geometry::new(80, 24))));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_write_forwarded_in_order() {
        let spawner = MockSpawner::new();
        let (session, _events) = start(&spawner);
        let remote = &spawner.wait_for_spawns(1).await[0];

        session.write(b"ls".to_vec());
        session.write(b" -la\r".to_vec());
        session.info().await.unwrap();

        assert_eq!(remote.writes(), vec![b"ls".to_vec(), b" -la\r".to_vec()]);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_reconnect_diagnostic_emitted_once() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);
        events_until_state(&mut events, ConnectionState::Connected).await;

        let first = &spawner.wait_for_spawns(1).await[0];
        first.emit(b"last words");
        first.exit(255);

        let seen = events_until_state(&mut events, ConnectionState::Connected).await;
        let diagnostics: Vec<&TerminalEvent> = seen
            .iter()
            .filter(|event| matches!(event, TerminalEvent::Output { data } if String::from_utf8_lossy(data).contains("255")))
            .collect();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            output_of(&seen),
            b"last words\r\n\x1b[33m[ssh exited with code 255, reconnecting in 100ms...]\x1b[0m\r\n".to_vec()
        );

        let second = &spawner.wait_for_spawns(2).await[1];
        second.emit(b"welcome back");
        assert_eq!(
            next_event(&mut events).await,
            TerminalEvent::Output { data: b"welcome back".to_vec() }
        );
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_geometry_persists_across_reconnect() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);
        let first = &spawner.wait_for_spawns(1).await[0];

        session.resize(132, 43);
        session.info().await.unwrap();
        assert_eq!(first.ops().last(), Some(&Op::Resize(Geometry::new(132, 43))));

        first.exit(0);
        events_until_state(&mut events, ConnectionState::Disconnected).await;
        events_until_state(&mut events, ConnectionState::Connected).await;

        let second = &spawner.wait_for_spawns(2).await[1];
        assert_eq!(second.spawn_geometry(), Geometry::new(132, 43));
        assert_eq!(second.ops(), vec![Op::Resize(Geometry::new(132, 43))]);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_replay_of_input_written_while_disconnected() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);
        let first = &spawner.wait_for_spawns(1).await[0];

        session.write(b"one".to_vec());
        session.info().await.unwrap();
        first.exit(1);
        events_until_state(&mut events, ConnectionState::Disconnected).await;

        session.write(b"lost".to_vec());
        session.paste_text("also lost");
        events_until_state(&mut events, ConnectionState::Connected).await;
        session.write(b"two".to_vec());
        session.info().await.unwrap();

        let remotes = spawner.remotes();
        assert_eq!(remotes.len(), 2);
        assert_eq!(remotes[0].written(), b"one".to_vec());
        assert_eq!(remotes[1].written(), b"two".to_vec());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_transport_never_receives_input() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);
        let first = &spawner.wait_for_spawns(1).await[0];
        first.exit(1);
        events_until_state(&mut events, ConnectionState::Disconnected).await;
        events_until_state(&mut events, ConnectionState::Connected).await;
        let ops_before = first.ops();

        session.write(b"after".to_vec());
        session.resize(100, 30);
        session.send_paths(["/tmp/x"]);
        session.info().await.unwrap();

        assert_eq!(first.ops(), ops_before);
        assert_eq!(spawner.remotes().len(), 2);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_resize_after_exit_is_swallowed() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);
        events_until_state(&mut events, ConnectionState::Connected).await;
        let first = &spawner.wait_for_spawns(1).await[0];

        first.exit(0);
        // Races with the exit event; either way nothing escapes.
        session.resize(90, 20);
        let info = session.info().await.unwrap();
        assert_eq!(info.geometry, Geometry::new(90, 20));

        events_until_state(&mut events, ConnectionState::Connected).await;
        let second = &spawner.wait_for_spawns(2).await[1];
        assert_eq!(second.ops().first(), Some(&Op::Resize(Geometry::new(90, 20))));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_close_during_backoff_cancels_reconnect() {
        let spawner = MockSpawner::new();
        let mut tuning = fast_tuning();
        tuning.reconnect_backoff = Duration::from_millis(300);
        let (session, mut events) =
            SessionHandle::start(1, Arc::new(spawner.clone()), tuning, Geometry::default());
        let first = &spawner.wait_for_spawns(1).await[0];

        first.exit(1);
        events_until_state(&mut events, ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_millis(90)).await;
        session.close();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(spawner.attempts(), 1);

        let mut rest = Vec::new();
        while let Some(event) = events.recv().await {
            rest.push(event);
        }
        assert_eq!(
            rest,
            vec![
                TerminalEvent::Output {
                    data: diagnostic_line("ssh exited with code 1", Duration::from_millis(300))
                        .into_bytes()
                },
                TerminalEvent::StateChanged { state: ConnectionState::Closing },
                TerminalEvent::Closed,
            ]
        );
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_close_kills_transport_and_is_idempotent() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);
        let remote = spawner.wait_for_spawns(1).await[0].clone();

        session.close();
        session.close();
        events_until_state(&mut events, ConnectionState::Closing).await;
        assert_eq!(next_event(&mut events).await, TerminalEvent::Closed);
        assert!(remote.is_killed());
        assert!(!session.write(b"x".to_vec()) || session.info().await.is_none());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_session() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);
        let remote = spawner.wait_for_spawns(1).await[0].clone();

        drop(session);
        events_until_state(&mut events, ConnectionState::Closing).await;
        assert_eq!(next_event(&mut events).await, TerminalEvent::Closed);
        assert!(remote.is_killed());
    }

    #[tokio::test]
    async fn test_spawn_failure_enters_reconnect_loop() {
        let spawner = MockSpawner::new();
        spawner.fail_next(SpawnError::Launch {
            program: "ssh".into(),
            message: "No such file or directory".into(),
        });
        spawner.fail_next(SpawnError::ExitedImmediately {
            program: "ssh".into(),
            code: 255,
        });
        let (session, mut events) = start(&spawner);

        let seen = events_until_state(&mut events, ConnectionState::Connected).await;
        let text = String::from_utf8(output_of(&seen)).unwrap();
        assert!(text.contains("[ssh failed to start: failed to launch ssh: No such file or directory"));
        assert!(text.contains("[ssh exited with code 255, reconnecting in 100ms...]"));
        assert_eq!(spawner.attempts(), 3);
        assert_eq!(session.info().await.unwrap().reconnect_attempts, 2);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_bracketed_frame_is_two_delayed_writes() {
        let spawner = MockSpawner::new();
        let (session, _events) = start(&spawner);
        let remote = &spawner.wait_for_spawns(1).await[0];

        session.send_paths(["/tmp/123-my_file.txt"]);
        session.write(b"typed".to_vec());
        session.info().await.unwrap();

        let mut opening = START_MARKER.to_vec();
        opening.extend_from_slice(b"/tmp/123-my_file.txt ");
        assert_eq!(
            remote.writes(),
            vec![opening, END_MARKER.to_vec(), b"typed".to_vec()]
        );
        assert_eq!(
            remote.written(),
            b"\x1b[200~/tmp/123-my_file.txt \x1b[201~typed".to_vec()
        );

        let times = remote.write_times();
        assert!(times[1].duration_since(times[0]) >= fast_tuning().marker_delay);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_transport_loss_during_frame_skips_end_marker() {
        let spawner = MockSpawner::new();
        let mut tuning = fast_tuning();
        tuning.marker_delay = Duration::from_millis(400);
        let (session, mut events) =
            SessionHandle::start(1, Arc::new(spawner.clone()), tuning, Geometry::default());
        events_until_state(&mut events, ConnectionState::Connected).await;
        let first = spawner.wait_for_spawns(1).await[0].clone();

        session.send_paths(["/tmp/a.txt"]);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while first.writes().is_empty() {
            assert!(std::time::Instant::now() < deadline, "opening marker never written");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Output and the exit are relayed while the frame waits.
        first.emit(b"mid-frame");
        let output = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert_eq!(
            output.unwrap(),
            Some(TerminalEvent::Output { data: b"mid-frame".to_vec() })
        );
        first.exit(255);
        let disconnected = tokio::time::timeout(
            Duration::from_millis(200),
            events_until_state(&mut events, ConnectionState::Disconnected),
        )
        .await;
        assert!(disconnected.is_ok(), "exit was not handled during the marker delay");

        events_until_state(&mut events, ConnectionState::Connected).await;
        session.info().await.unwrap();
        let second = &spawner.wait_for_spawns(2).await[1];

        let mut opening = START_MARKER.to_vec();
        opening.extend_from_slice(b"/tmp/a.txt ");
        assert_eq!(first.writes(), vec![opening]);
        assert!(second.writes().is_empty());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_paste_follows_remote_bracket_mode() {
        let spawner = MockSpawner::new();
        let (session, mut events) = start(&spawner);
        events_until_state(&mut events, ConnectionState::Connected).await;
        let remote = &spawner.wait_for_spawns(1).await[0];

        session.paste_text("echo a\necho b");
        session.info().await.unwrap();
        assert_eq!(remote.writes(), vec![b"echo a\recho b".to_vec()]);

        remote.emit(b"\x1b[?2004h$ ");
        next_event(&mut events).await;
        assert!(session.info().await.unwrap().bracketed_paste);

        session.paste_text("x\x1by\n");
        session.info().await.unwrap();
        let writes = remote.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[1], "\x1b[200~x\u{241b}y\r".as_bytes().to_vec());
        assert_eq!(writes[2], END_MARKER.to_vec());
        session.shutdown().await;
    }

    #[test]
    fn test_diagnostic_line_format() {
        assert_eq!(
            diagnostic_line("ssh exited with code 255", Duration::from_secs(1)),
            "\r\n\x1b[33m[ssh exited with code 255, reconnecting in 1s...]\x1b[0m\r\n"
        );
        assert_eq!(format_backoff(Duration::from_millis(1500)), "1500ms");
    }
}
