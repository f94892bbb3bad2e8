use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::config::{Geometry, Tuning};
use crate::error::RegistryError;
use crate::ipc::TerminalEvent;
use crate::pty::Spawner;
use crate::session::{SessionHandle, SessionInfo};
use crate::upload::{DroppedFile, PastedImage, TransferService};

/// Opaque identifier of the window (display surface) owning a session.
pub type WindowId = u64;

/// Tracks one session per window and routes window events to it.
///
/// The registry is built once at startup with the spawner, tuning and
/// optional transfer service every session shares. Sessions never share a
/// transport: each one asks the spawner for its own.
pub struct SessionRegistry {
    spawner: Arc<dyn Spawner>,
    tuning: Tuning,
    transfer: Option<Arc<TransferService>>,
    sessions: Mutex<HashMap<WindowId, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new(spawner: Arc<dyn Spawner>, tuning: Tuning) -> Self {
        Self {
            spawner,
            tuning,
            transfer: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Enable file and image uploads.
    pub fn with_transfer(mut self, transfer: TransferService) -> Self {
        self.transfer = Some(Arc::new(transfer));
        self
    }

    /// Start a session for `window` and return its event stream.
    pub fn create_session(
        &self,
        window: WindowId,
        geometry: Geometry,
    ) -> Result<mpsc::UnboundedReceiver<TerminalEvent>, RegistryError> {
        let mut sessions = self.lock();
        if let Some(existing) = sessions.get(&window) {
            if !existing.is_closed() {
                return Err(RegistryError::SessionExists(window));
            }
        }

        let (handle, events) =
            SessionHandle::start(window, Arc::clone(&self.spawner), self.tuning, geometry);
        sessions.insert(window, handle);
        log::info!("window {window}: session created at {}x{}", geometry.cols, geometry.rows);
        Ok(events)
    }

    /// Forward keyboard (or any raw) input.
    pub fn write_input(&self, window: WindowId, data: &[u8]) -> Result<(), RegistryError> {
        self.route(window, |session| session.write(data.to_vec()))
    }

    pub fn resize(&self, window: WindowId, cols: u16, rows: u16) -> Result<(), RegistryError> {
        self.route(window, |session| session.resize(cols, rows))
    }

    pub fn paste_text(&self, window: WindowId, text: &str) -> Result<(), RegistryError> {
        self.route(window, |session| session.paste_text(text))
    }

    /// Upload dropped files and paste their remote paths into the session.
    pub async fn upload_files(
        &self,
        window: WindowId,
        files: Vec<DroppedFile>,
    ) -> Result<Vec<String>, RegistryError> {
        let transfer = self.transfer_for(window)?;
        let paths = transfer.upload_files(files).await?;
        self.send_paths(window, &paths)?;
        Ok(paths)
    }

    /// Upload pasted images and paste their remote paths into the session.
    pub async fn paste_images(
        &self,
        window: WindowId,
        images: Vec<PastedImage>,
    ) -> Result<Vec<String>, RegistryError> {
        let transfer = self.transfer_for(window)?;
        let paths = transfer.upload_images(images).await?;
        self.send_paths(window, &paths)?;
        Ok(paths)
    }

    pub async fn session_info(&self, window: WindowId) -> Result<SessionInfo, RegistryError> {
        // Queue the request under the lock, wait for the answer without it.
        let reply = {
            let sessions = self.lock();
            let session = sessions
                .get(&window)
                .ok_or(RegistryError::WindowNotFound(window))?;
            session.request_info()
        };
        match reply {
            Some(reply) => reply.await.map_err(|_| RegistryError::SessionClosed(window)),
            None => Err(RegistryError::SessionClosed(window)),
        }
    }

    /// Close the window's session and stop routing to it. Returns whether a
    /// session existed.
    pub fn close_window(&self, window: WindowId) -> bool {
        match self.lock().remove(&window) {
            Some(session) => {
                session.close();
                log::info!("window {window}: closed");
                true
            }
            None => false,
        }
    }

    /// All windows with a session, sorted.
    pub fn windows(&self) -> Vec<WindowId> {
        let mut ids: Vec<WindowId> = self.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Close every session and wait for their teardown.
    pub async fn shutdown(&self) {
        let sessions: Vec<SessionHandle> = self.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.shutdown().await;
        }
    }

    fn send_paths(&self, window: WindowId, paths: &[String]) -> Result<(), RegistryError> {
        if paths.is_empty() {
            return Ok(());
        }
        self.route(window, |session| session.send_paths(paths))
    }

    fn transfer_for(&self, window: WindowId) -> Result<Arc<TransferService>, RegistryError> {
        if !self.lock().contains_key(&window) {
            return Err(RegistryError::WindowNotFound(window));
        }
        self.transfer
            .clone()
            .ok_or(RegistryError::UploadsDisabled)
    }

    fn route(
        &self,
        window: WindowId,
        f: impl FnOnce(&SessionHandle) -> bool,
    ) -> Result<(), RegistryError> {
        let sessions = self.lock();
        let session = sessions
            .get(&window)
            .ok_or(RegistryError::WindowNotFound(window))?;
        if f(session) {
            Ok(())
        } else {
            Err(RegistryError::SessionClosed(window))
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowId, SessionHandle>> {
        // The map is only inserted into and removed from; a panic while
        // holding the lock cannot leave it half-updated.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
