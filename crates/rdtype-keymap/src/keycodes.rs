//! Linux evdev keycodes used when synthesizing key sequences.
//!
//! The RemoteDesktop portal takes evdev keycodes, while XKB keymaps number
//! keys with an offset of 8 on top of them.

/// Offset between XKB keycodes and Linux evdev keycodes.
pub const EVDEV_OFFSET: u32 = 8;

pub const KEY_LEFTCTRL: u32 = 29;
pub const KEY_LEFTSHIFT: u32 = 42;
/// AltGr on layouts that map ISO Level 3 to the right Alt key.
pub const KEY_RIGHTALT: u32 = 100;
pub const KEY_U: u32 = 22;
pub const KEY_SPACE: u32 = 57;

/// Convert an XKB keycode to the evdev keycode the portal expects.
///
/// Returns `None` for keycodes below the evdev offset, which no real
/// keymap assigns to a key.
#[must_use]
pub fn xkb_to_evdev(keycode: u32) -> Option<u32> {
    keycode.checked_sub(EVDEV_OFFSET)
}

/// Human-readable name for the handful of keys this crate emits itself.
#[must_use]
pub fn modifier_name(code: u32) -> Option<&'static str> {
    let name = match code {
        KEY_LEFTCTRL => "Left Ctrl",
        KEY_LEFTSHIFT => "Left Shift",
        KEY_RIGHTALT => "AltGr",
        KEY_U => "U",
        KEY_SPACE => "Space",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xkb_to_evdev() {
        // <AC01> (A on US layouts): XKB 38 -> evdev 30
        assert_eq!(xkb_to_evdev(38), Some(30));
        // <SPCE>: XKB 65 -> evdev 57
        assert_eq!(xkb_to_evdev(65), Some(KEY_SPACE));
        // <RALT>: XKB 108 -> evdev 100
        assert_eq!(xkb_to_evdev(108), Some(KEY_RIGHTALT));
    }

    #[test]
    fn test_below_offset_returns_none() {
        assert_eq!(xkb_to_evdev(0), None);
        assert_eq!(xkb_to_evdev(7), None);
        assert_eq!(xkb_to_evdev(8), Some(0));
    }

    #[test]
    fn test_modifier_names() {
        assert_eq!(modifier_name(KEY_LEFTSHIFT), Some("Left Shift"));
        assert_eq!(modifier_name(KEY_RIGHTALT), Some("AltGr"));
        assert_eq!(modifier_name(30), None);
    }
}
