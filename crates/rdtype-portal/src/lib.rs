//! `RemoteDesktop` portal session handling for rdtype.
//!
//! [`PortalSession`] authenticates an input-injection session through the
//! XDG desktop portal, remembering the grant in a [`StateFile`] so later
//! runs skip the permission dialog, and forwards evdev keycodes once the
//! session is ready.

pub mod constants;
pub mod portal;
pub mod session;
pub mod store;
pub mod types;

pub use portal::{portal_available, AshpdPortal, PortalError, RemoteDesktopPortal};
pub use session::{PortalSession, SessionError};
pub use store::{default_state_path, KeyValueStore, StateFile, StoreError};
pub use types::{
    DeviceTypes, KeyState, PersistMode, SelectDevicesOptions, SessionEvent, SessionHandle,
    SessionOptions, SessionState, StartedSession,
};
