//! The input-injection session: portal handshake, restore token and key
//! notifications.
//!
//! A [`PortalSession`] walks `CreateSession`, `SelectDevices` and `Start`
//! one request at a time. Failures at any step are logged and leave the
//! session `Idle`; nothing is retried. Once `Ready`, keycodes are forwarded
//! to the portal until the session is closed by either side.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::constants::RESTORE_TOKEN_KEY;
use crate::portal::{PortalError, RemoteDesktopPortal};
use crate::store::KeyValueStore;
use crate::types::{
    DeviceTypes, KeyState, PersistMode, SelectDevicesOptions, SessionEvent, SessionHandle,
    SessionOptions, SessionState, StartedSession,
};

/// Errors reported to users of a [`PortalSession`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Key input was requested without a `Ready` session.
    #[error("no authenticated remote desktop session")]
    NotAuthenticated,

    /// A handshake request failed.
    #[error("{step} failed: {source}")]
    Handshake {
        step: &'static str,
        #[source]
        source: PortalError,
    },

    /// The user granted devices, but not the keyboard.
    #[error("keyboard access was not granted (devices {devices:#x})")]
    KeyboardNotGranted { devices: u32 },
}

fn step(step: &'static str) -> impl FnOnce(PortalError) -> SessionError {
    move |source| SessionError::Handshake { step, source }
}

/// One remote desktop session per run.
pub struct PortalSession<P: RemoteDesktopPortal + 'static> {
    portal: Arc<P>,
    store: Box<dyn KeyValueStore>,
    options: SessionOptions,
    state: SessionState,
    handle: Option<SessionHandle>,
    events: mpsc::UnboundedSender<SessionEvent>,
    closed_watcher: Option<JoinHandle<()>>,
}

impl<P: RemoteDesktopPortal + 'static> PortalSession<P> {
    /// Create an idle session and the receiver for its [`SessionEvent`]s.
    pub fn new(
        portal: Arc<P>,
        store: Box<dyn KeyValueStore>,
        options: SessionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                portal,
                store,
                options,
                state: SessionState::Idle,
                handle: None,
                events,
                closed_watcher: None,
            },
            rx,
        )
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    fn persists_grant(&self) -> bool {
        self.options.persist_mode != PersistMode::DoNot
    }

    /// Run the portal handshake and return the resulting state.
    ///
    /// Does nothing while a handshake is already in flight or the session
    /// is `Ready`. On success [`SessionEvent::Ready`] is emitted once; on
    /// failure the session is back to `Idle`.
    pub async fn create_session(&mut self) -> SessionState {
        if self.state.handshake_in_flight() || self.state == SessionState::Ready {
            tracing::debug!(state = %self.state, "Session already requested, ignoring");
            return self.state;
        }

        self.state = SessionState::Connecting;
        let restore_token = if self.persists_grant() {
            self.store
                .read(RESTORE_TOKEN_KEY)
                .filter(|token| !token.is_empty())
        } else {
            None
        };
        tracing::info!(
            restore_token = restore_token.is_some(),
            "Requesting remote desktop session"
        );

        match self.handshake(restore_token).await {
            Ok(started) => self.on_started(started),
            Err(e) => {
                tracing::warn!("Remote desktop handshake abandoned: {e}");
                self.abandon().await;
            }
        }
        self.state
    }

    async fn handshake(
        &mut self,
        restore_token: Option<String>,
    ) -> Result<StartedSession, SessionError> {
        let handle = self
            .portal
            .create_session()
            .await
            .map_err(step("CreateSession"))?;
        tracing::debug!(%handle, "Session handle received");
        self.watch_closed(handle.clone());
        self.handle = Some(handle.clone());

        self.state = SessionState::DevicesSelected;
        let options = SelectDevicesOptions {
            devices: DeviceTypes::KEYBOARD,
            persist_mode: self.options.persist_mode,
            restore_token,
        };
        self.portal
            .select_devices(&handle, &options)
            .await
            .map_err(step("SelectDevices"))?;

        self.state = SessionState::Started;
        let started = self.portal.start(&handle).await.map_err(step("Start"))?;

        if !started.devices.contains(DeviceTypes::KEYBOARD) {
            return Err(SessionError::KeyboardNotGranted {
                devices: started.devices.0,
            });
        }
        if started.devices != DeviceTypes::KEYBOARD {
            tracing::warn!(
                devices = started.devices.0,
                "Portal granted more devices than requested"
            );
        }
        Ok(started)
    }

    fn on_started(&mut self, started: StartedSession) {
        if self.persists_grant() {
            let token = started.restore_token.unwrap_or_default();
            if let Err(e) = self.store.write(RESTORE_TOKEN_KEY, &token) {
                tracing::warn!("Failed to persist restore token: {e}");
            }
        }

        self.state = SessionState::Ready;
        tracing::info!("Remote desktop session ready");
        if self.events.send(SessionEvent::Ready).is_err() {
            tracing::trace!("Session event receiver dropped");
        }
    }

    /// Drop a half-built session and return to `Idle`.
    async fn abandon(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop_watcher();
            if let Err(e) = self.portal.close_session(&handle).await {
                tracing::debug!(%handle, "Closing abandoned session failed: {e}");
            }
        }
        self.state = SessionState::Idle;
    }

    fn watch_closed(&mut self, handle: SessionHandle) {
        self.stop_watcher();
        let portal = Arc::clone(&self.portal);
        let events = self.events.clone();
        self.closed_watcher = Some(tokio::spawn(async move {
            match portal.session_closed(&handle).await {
                Ok(()) => {
                    let _ = events.send(SessionEvent::Closed(handle));
                }
                Err(e) => tracing::debug!(%handle, "Stopped watching session: {e}"),
            }
        }));
    }

    fn stop_watcher(&mut self) {
        if let Some(watcher) = self.closed_watcher.take() {
            watcher.abort();
        }
    }

    /// Apply an event received from this session's channel.
    pub fn handle_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Ready => {}
            SessionEvent::Closed(handle) if self.handle.as_ref() == Some(handle) => {
                tracing::info!(%handle, "Remote desktop session closed by the portal");
                self.handle = None;
                self.closed_watcher = None;
                self.state = SessionState::Closed;
            }
            SessionEvent::Closed(handle) => {
                tracing::debug!(%handle, "Ignoring close of another session");
            }
        }
    }

    /// Press the key with evdev `code`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotAuthenticated`] unless the session is
    /// `Ready`. Portal failures are logged, not returned.
    pub async fn key_press(&self, code: u32) -> Result<(), SessionError> {
        self.notify(code, KeyState::Pressed).await
    }

    /// Release the key with evdev `code`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotAuthenticated`] unless the session is
    /// `Ready`.
    pub async fn key_release(&self, code: u32) -> Result<(), SessionError> {
        self.notify(code, KeyState::Released).await
    }

    /// Press, wait the tap delay, release.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotAuthenticated`] unless the session is
    /// `Ready`.
    pub async fn send_key(&self, code: u32) -> Result<(), SessionError> {
        self.key_press(code).await?;
        tokio::time::sleep(self.options.tap_delay).await;
        self.key_release(code).await
    }

    async fn notify(&self, code: u32, state: KeyState) -> Result<(), SessionError> {
        let handle = match (&self.handle, self.state) {
            (Some(handle), SessionState::Ready) => handle,
            _ => return Err(SessionError::NotAuthenticated),
        };
        tracing::trace!(code, ?state, "Keycode");
        if let Err(e) = self
            .portal
            .notify_keyboard_keycode(handle, code, state)
            .await
        {
            tracing::warn!(code, ?state, "Keycode notification failed: {e}");
        }
        Ok(())
    }

    /// Close the portal session, if any.
    pub async fn close(&mut self) {
        self.stop_watcher();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.portal.close_session(&handle).await {
                tracing::debug!(%handle, "Closing session failed: {e}");
            }
        }
        self.state = SessionState::Closed;
    }
}

impl<P: RemoteDesktopPortal + 'static> Drop for PortalSession<P> {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}
