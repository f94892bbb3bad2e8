//! Local-terminal display host.
//!
//! Puts the controlling terminal in raw mode and wires it to a single
//! session window: keystrokes go to the session, session output goes to
//! stdout, and size changes are forwarded as resizes. `Ctrl-]` closes the
//! window, which ends the process.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use tether_pty::{ConnectionState, DroppedFile, Geometry, SessionRegistry, TerminalEvent, WindowId};

/// The only window this host drives.
pub const WINDOW: WindowId = 1;

/// `Ctrl-]`, the same escape telnet uses.
pub const CLOSE_KEY: u8 = 0x1d;

const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Restores cooked mode when dropped.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            log::error!("failed to restore terminal: {e}");
        }
    }
}

/// What to do with a chunk of local keyboard input.
#[derive(Debug, PartialEq, Eq)]
enum Keys<'a> {
    Forward(&'a [u8]),
    /// Forward the bytes before the close key, then close the window.
    Close(&'a [u8]),
}

fn split_close_key(data: &[u8]) -> Keys<'_> {
    match data.iter().position(|b| *b == CLOSE_KEY) {
        Some(pos) => Keys::Close(&data[..pos]),
        None => Keys::Forward(data),
    }
}

/// Blocking stdin reads happen on their own thread. The channel closes on
/// EOF or a read error.
fn start_stdin_thread(input: mpsc::UnboundedSender<Vec<u8>>) -> io::Result<()> {
    std::thread::Builder::new()
        .name("tether-stdin".into())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 4096];
            loop {
                let n = match stdin.read(&mut buf) {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("stdin read failed: {e}");
                        return;
                    }
                };
                if input.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
        })?;
    Ok(())
}

fn local_geometry() -> Geometry {
    match crossterm::terminal::size() {
        Ok((cols, rows)) => Geometry::new(cols, rows),
        Err(e) => {
            log::warn!("could not read terminal size, using default: {e}");
            Geometry::default()
        }
    }
}

/// Run the window until its session reports `Closed`.
///
/// `uploads` are sent once the first connection comes up, as if they had
/// been dropped onto the window.
pub async fn run(
    registry: Arc<SessionRegistry>,
    uploads: Vec<DroppedFile>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut geometry = local_geometry();
    let mut events = registry.create_session(WINDOW, geometry)?;

    let _raw = RawMode::enable()?;
    let (input_tx, mut input_rx) = mpsc::unbounded_channel();
    start_stdin_thread(input_tx)?;

    let mut resize_tick = tokio::time::interval(RESIZE_POLL_INTERVAL);
    resize_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending_uploads = (!uploads.is_empty()).then_some(uploads);
    let mut input_open = true;
    let mut stdout = io::stdout();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(TerminalEvent::Output { data }) => {
                    stdout.write_all(&data)?;
                    stdout.flush()?;
                }
                Some(TerminalEvent::StateChanged { state }) => {
                    log::info!("window {WINDOW} is {state:?}");
                    if state == ConnectionState::Connected {
                        if let Some(files) = pending_uploads.take() {
                            spawn_upload(registry.clone(), files);
                        }
                    }
                }
                Some(TerminalEvent::Closed) | None => break,
            },
            input = input_rx.recv(), if input_open => match input {
                Some(data) => match split_close_key(&data) {
                    Keys::Forward(keys) => forward(&registry, keys),
                    Keys::Close(keys) => {
                        forward(&registry, keys);
                        input_open = false;
                        registry.close_window(WINDOW);
                    }
                },
                None => {
                    input_open = false;
                    registry.close_window(WINDOW);
                }
            },
            _ = resize_tick.tick() => {
                let current = local_geometry();
                if current != geometry {
                    geometry = current;
                    if let Err(e) = registry.resize(WINDOW, geometry.cols, geometry.rows) {
                        log::debug!("resize dropped: {e}");
                    }
                }
            }
        }
    }

    registry.shutdown().await;
    Ok(())
}

fn forward(registry: &SessionRegistry, keys: &[u8]) {
    if keys.is_empty() {
        return;
    }
    // Fails only once the window is closing.
    if let Err(e) = registry.write_input(WINDOW, keys) {
        log::debug!("input dropped: {e}");
    }
}

fn spawn_upload(registry: Arc<SessionRegistry>, files: Vec<DroppedFile>) {
    tokio::spawn(async move {
        let count = files.len();
        match registry.upload_files(WINDOW, files).await {
            Ok(paths) => log::info!("uploaded {count} file(s) to window {WINDOW}: {paths:?}"),
            Err(e) => log::warn!("upload to window {WINDOW} failed: {e}"),
        }
    });
}
