use std::time::Duration;

/// Lifecycle of the portal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session and no handshake running.
    #[default]
    Idle,
    /// `CreateSession` issued.
    Connecting,
    /// `SelectDevices` issued.
    DevicesSelected,
    /// `Start` issued, waiting for the user's grant.
    Started,
    /// Input may be injected.
    Ready,
    /// The portal or the user closed the session.
    Closed,
}

impl SessionState {
    /// Whether a handshake is between `CreateSession` and its final `Start`
    /// response.
    #[must_use]
    pub fn handshake_in_flight(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::DevicesSelected | Self::Started
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DevicesSelected => write!(f, "DevicesSelected"),
            Self::Started => write!(f, "Started"),
            Self::Ready => write!(f, "Ready"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Key identifying one portal session within this process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub String);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notifications delivered to the owner of a [`PortalSession`](crate::PortalSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The handshake completed and input may be injected.
    Ready,
    /// The portal closed the session with this handle.
    Closed(SessionHandle),
}

/// Bitmask of portal device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceTypes(pub u32);

impl DeviceTypes {
    pub const KEYBOARD: Self = Self(1);
    pub const POINTER: Self = Self(2);
    pub const TOUCHSCREEN: Self = Self(4);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for DeviceTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// How long the portal should remember a granted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistMode {
    /// Forget the grant when the session ends.
    DoNot,
    /// Remember the grant while the application runs.
    Application,
    /// Remember the grant until the user revokes it.
    #[default]
    ExplicitlyRevoked,
}

/// Key state sent with a keycode notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Released,
    Pressed,
}

/// Arguments of a `SelectDevices` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectDevicesOptions {
    pub devices: DeviceTypes,
    pub persist_mode: PersistMode,
    /// Token from an earlier grant, never empty when present.
    pub restore_token: Option<String>,
}

/// Result of a successful `Start` request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartedSession {
    pub devices: DeviceTypes,
    pub restore_token: Option<String>,
}

/// Tunables of a [`PortalSession`](crate::PortalSession).
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Persist mode requested in `SelectDevices`. With
    /// [`PersistMode::DoNot`] the restore token is neither read nor written.
    pub persist_mode: PersistMode,
    /// Delay between press and release of a tapped key.
    pub tap_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            persist_mode: PersistMode::ExplicitlyRevoked,
            tap_delay: Duration::from_millis(20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_states() {
        assert!(!SessionState::Idle.handshake_in_flight());
        assert!(SessionState::Connecting.handshake_in_flight());
        assert!(SessionState::DevicesSelected.handshake_in_flight());
        assert!(SessionState::Started.handshake_in_flight());
        assert!(!SessionState::Ready.handshake_in_flight());
        assert!(!SessionState::Closed.handshake_in_flight());
    }

    #[test]
    fn device_mask() {
        let granted = DeviceTypes::KEYBOARD | DeviceTypes::POINTER;
        assert!(granted.contains(DeviceTypes::KEYBOARD));
        assert!(!granted.contains(DeviceTypes::TOUCHSCREEN));
        assert!(!DeviceTypes::POINTER.contains(DeviceTypes::KEYBOARD));
    }
}
