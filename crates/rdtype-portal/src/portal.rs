//! The `RemoteDesktop` portal requests rdtype issues, and their ashpd
//! backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ashpd::desktop::remote_desktop::{self, DeviceType, RemoteDesktop};
use ashpd::desktop::{ResponseError, Session};
use ashpd::enumflags2::BitFlags;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::constants::PORTAL_BUS_NAME;
use crate::types::{
    DeviceTypes, KeyState, PersistMode, SelectDevicesOptions, SessionHandle, StartedSession,
};

/// Requests of the `org.freedesktop.portal.RemoteDesktop` interface.
///
/// Request/response calls resolve once the portal has answered; a non-zero
/// response code is reported as [`PortalError::ResponseRejected`].
#[async_trait]
pub trait RemoteDesktopPortal: Send + Sync {
    /// `CreateSession`. Handle tokens are generated by the backend.
    async fn create_session(&self) -> Result<SessionHandle, PortalError>;

    /// `SelectDevices`.
    async fn select_devices(
        &self,
        handle: &SessionHandle,
        options: &SelectDevicesOptions,
    ) -> Result<(), PortalError>;

    /// `Start`, with no parent window.
    async fn start(&self, handle: &SessionHandle) -> Result<StartedSession, PortalError>;

    /// `NotifyKeyboardKeycode` with an evdev keycode.
    async fn notify_keyboard_keycode(
        &self,
        handle: &SessionHandle,
        keycode: u32,
        state: KeyState,
    ) -> Result<(), PortalError>;

    /// Resolves when the portal emits `Closed` for the session.
    async fn session_closed(&self, handle: &SessionHandle) -> Result<(), PortalError>;

    /// `Session.Close`.
    async fn close_session(&self, handle: &SessionHandle) -> Result<(), PortalError>;
}

/// Errors from portal requests.
#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// The request could not be issued or the reply was malformed.
    #[error("portal request failed: {0}")]
    RequestFailed(String),

    /// The portal answered with a non-zero response code.
    #[error("portal rejected the request (response {code})")]
    ResponseRejected { code: u32 },

    /// No session is known under the given handle.
    #[error("unknown portal session")]
    UnknownSession,

    /// The portal service is not reachable.
    #[error("desktop portal unavailable: {0}")]
    Unavailable(String),
}

impl From<ashpd::Error> for PortalError {
    fn from(e: ashpd::Error) -> Self {
        match e {
            ashpd::Error::Response(ResponseError::Cancelled) => Self::ResponseRejected { code: 1 },
            ashpd::Error::Response(ResponseError::Other) => Self::ResponseRejected { code: 2 },
            other => Self::RequestFailed(other.to_string()),
        }
    }
}

type RemoteDesktopSession = Session<'static, RemoteDesktop<'static>>;

/// Production backend over ashpd's `RemoteDesktop` proxy.
pub struct AshpdPortal {
    proxy: RemoteDesktop<'static>,
    sessions: Mutex<HashMap<SessionHandle, Arc<RemoteDesktopSession>>>,
    next_session: AtomicU64,
}

impl AshpdPortal {
    /// Connect to the session bus and create the `RemoteDesktop` proxy.
    ///
    /// # Errors
    ///
    /// Returns [`PortalError::Unavailable`] if the proxy cannot be created.
    pub async fn new() -> Result<Self, PortalError> {
        let proxy = RemoteDesktop::new()
            .await
            .map_err(|e| PortalError::Unavailable(format!("RemoteDesktop proxy: {e}")))?;
        Ok(Self {
            proxy,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    async fn session(&self, handle: &SessionHandle) -> Result<Arc<RemoteDesktopSession>, PortalError> {
        self.sessions
            .lock()
            .await
            .get(handle)
            .cloned()
            .ok_or(PortalError::UnknownSession)
    }
}

/// Local key for a portal session. ashpd keeps the object path private.
fn session_handle(serial: u64) -> SessionHandle {
    SessionHandle(format!("rdtype-session-{serial}"))
}

fn device_flags(devices: DeviceTypes) -> BitFlags<DeviceType> {
    BitFlags::from_bits_truncate(devices.0)
}

fn persist_mode(mode: PersistMode) -> ashpd::desktop::PersistMode {
    match mode {
        PersistMode::DoNot => ashpd::desktop::PersistMode::DoNot,
        PersistMode::Application => ashpd::desktop::PersistMode::Application,
        PersistMode::ExplicitlyRevoked => ashpd::desktop::PersistMode::ExplicitlyRevoked,
    }
}

fn key_state(state: KeyState) -> remote_desktop::KeyState {
    match state {
        KeyState::Pressed => remote_desktop::KeyState::Pressed,
        KeyState::Released => remote_desktop::KeyState::Released,
    }
}

#[async_trait]
impl RemoteDesktopPortal for AshpdPortal {
    async fn create_session(&self) -> Result<SessionHandle, PortalError> {
        let session = self.proxy.create_session().await?;
        let handle = session_handle(self.next_session.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(%handle, "Portal session created");
        self.sessions
            .lock()
            .await
            .insert(handle.clone(), Arc::new(session));
        Ok(handle)
    }

    async fn select_devices(
        &self,
        handle: &SessionHandle,
        options: &SelectDevicesOptions,
    ) -> Result<(), PortalError> {
        let session = self.session(handle).await?;
        self.proxy
            .select_devices(
                &session,
                device_flags(options.devices),
                options.restore_token.as_deref(),
                persist_mode(options.persist_mode),
            )
            .await?
            .response()?;
        Ok(())
    }

    async fn start(&self, handle: &SessionHandle) -> Result<StartedSession, PortalError> {
        let session = self.session(handle).await?;
        let selected = self.proxy.start(&session, None).await?.response()?;
        Ok(StartedSession {
            devices: DeviceTypes(selected.devices().bits()),
            restore_token: selected.restore_token().map(str::to_owned),
        })
    }

    async fn notify_keyboard_keycode(
        &self,
        handle: &SessionHandle,
        keycode: u32,
        state: KeyState,
    ) -> Result<(), PortalError> {
        let session = self.session(handle).await?;
        let keycode = i32::try_from(keycode)
            .map_err(|_| PortalError::RequestFailed(format!("keycode {keycode} out of range")))?;
        self.proxy
            .notify_keyboard_keycode(&session, keycode, key_state(state))
            .await?;
        Ok(())
    }

    async fn session_closed(&self, handle: &SessionHandle) -> Result<(), PortalError> {
        let session = self.session(handle).await?;
        let closed = session.receive_closed().await?;
        futures::pin_mut!(closed);
        if closed.next().await.is_some() {
            self.sessions.lock().await.remove(handle);
            Ok(())
        } else {
            Err(PortalError::RequestFailed(
                "session Closed signal stream ended".into(),
            ))
        }
    }

    async fn close_session(&self, handle: &SessionHandle) -> Result<(), PortalError> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(handle)
            .ok_or(PortalError::UnknownSession)?;
        session.close().await?;
        tracing::debug!(%handle, "Portal session closed");
        Ok(())
    }
}

/// Whether the desktop portal service is running or can be activated.
///
/// # Errors
///
/// Returns [`PortalError::Unavailable`] if the session bus cannot be
/// reached or queried.
pub async fn portal_available() -> Result<bool, PortalError> {
    let unavailable = |e: &dyn std::fmt::Display| PortalError::Unavailable(e.to_string());

    let conn = zbus::Connection::session()
        .await
        .map_err(|e| unavailable(&e))?;
    let dbus = zbus::fdo::DBusProxy::new(&conn)
        .await
        .map_err(|e| unavailable(&e))?;
    let name = zbus::names::BusName::try_from(PORTAL_BUS_NAME).map_err(|e| unavailable(&e))?;

    if dbus.name_has_owner(name).await.map_err(|e| unavailable(&e))? {
        return Ok(true);
    }

    let activatable = dbus
        .list_activatable_names()
        .await
        .map_err(|e| unavailable(&e))?;
    let found = activatable
        .iter()
        .any(|name| name.as_str() == PORTAL_BUS_NAME);
    if !found {
        tracing::debug!("{PORTAL_BUS_NAME} is neither owned nor activatable");
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_errors_map_to_codes() {
        let cancelled = PortalError::from(ashpd::Error::Response(ResponseError::Cancelled));
        assert!(matches!(cancelled, PortalError::ResponseRejected { code: 1 }));

        let other = PortalError::from(ashpd::Error::Response(ResponseError::Other));
        assert!(matches!(other, PortalError::ResponseRejected { code: 2 }));
    }

    #[test]
    fn device_flags_keep_known_classes() {
        let flags = device_flags(DeviceTypes::KEYBOARD | DeviceTypes(8));
        assert_eq!(flags, BitFlags::from(DeviceType::Keyboard));
        assert_eq!(device_flags(DeviceTypes::KEYBOARD | DeviceTypes::POINTER).bits(), 3);
    }

    #[test]
    fn session_handles_are_distinct() {
        let counter = AtomicU64::new(1);
        let first = session_handle(counter.fetch_add(1, Ordering::Relaxed));
        let second = session_handle(counter.fetch_add(1, Ordering::Relaxed));
        assert_eq!(first, SessionHandle("rdtype-session-1".into()));
        assert_ne!(first, second);
    }

    #[test]
    fn rejection_message_names_code() {
        let err = PortalError::ResponseRejected { code: 2 };
        assert_eq!(err.to_string(), "portal rejected the request (response 2)");
    }
}
