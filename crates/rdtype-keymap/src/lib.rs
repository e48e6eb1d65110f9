//! Keyboard layout discovery and text translation for rdtype.
//!
//! - [`provider`]: Wayland thread that reports the compositor's keymap
//! - [`tracker`]: compiles keymap events into layouts on the main loop
//! - [`xkb`]: keysym lookups against a compiled keymap
//! - [`translate`]: text to key actions, with Unicode entry fallback
//! - [`keycodes`]: evdev keycodes used for modifiers

pub mod keycodes;
pub mod provider;
pub mod tracker;
pub mod translate;
pub mod xkb;

#[cfg(test)]
mod testdata;

pub use provider::{KeymapEvent, KeymapProvider, ProviderError};
pub use tracker::LayoutTracker;
pub use translate::{
    translate, KeyAction, KeyMapping, Keysym, KeysymResolver, Translation, TranslationFailure,
    TranslationStatus,
};
pub use xkb::{KeymapError, XkbLayout};
