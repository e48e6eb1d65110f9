/// Well-known bus name of the XDG desktop portal.
pub const PORTAL_BUS_NAME: &str = "org.freedesktop.portal.Desktop";

/// Directory under the XDG state (or local data) dir holding rdtype state.
pub const STATE_DIR: &str = "rdtype";

/// State file name.
pub const STATE_FILE: &str = "state.toml";

/// Group of the state file that holds session entries.
pub const SESSION_GROUP: &str = "session";

/// Key of the persisted restore token.
pub const RESTORE_TOKEN_KEY: &str = "RestoreToken";
