//! Text to key action translation.
//!
//! Every character is resolved to a keysym, then to the physical key and
//! shift level that produce it on the active layout. Characters without a
//! key fall back to Unicode entry: Ctrl+Shift+U, the lower-case hex code
//! point, then Space to commit.

use std::fmt;

use crate::keycodes::{modifier_name, KEY_LEFTCTRL, KEY_LEFTSHIFT, KEY_RIGHTALT, KEY_SPACE, KEY_U};

/// An XKB keysym value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Keysym(pub u32);

/// Physical key and level producing a keysym on the active layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMapping {
    /// Evdev keycode.
    pub code: u32,
    /// Shift level: 0 none, 1 Shift, 2 AltGr, 3 Shift+AltGr.
    pub level: u32,
}

/// Lookups a layout has to answer for translation.
pub trait KeysymResolver {
    /// Keysym for a Unicode scalar value, if one exists.
    fn keysym_for(&self, ch: char) -> Option<Keysym>;

    /// First key/level on the active layout that produces `keysym`.
    fn key_mapping(&self, keysym: Keysym) -> Option<KeyMapping>;
}

/// A single key event to replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Press(u32),
    Release(u32),
    /// Press followed by release after the tap delay.
    Tap(u32),
}

impl fmt::Display for KeyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (verb, code) = match *self {
            Self::Press(code) => ("press", code),
            Self::Release(code) => ("release", code),
            Self::Tap(code) => ("tap", code),
        };
        match modifier_name(code) {
            Some(name) => write!(f, "{verb} {name}"),
            None => write!(f, "{verb} {code}"),
        }
    }
}

/// Why a character could not be translated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslationFailure {
    #[error("no keysym for character {}", code_point(.ch))]
    NoKeysym { ch: char },

    #[error("unsupported key level {} for {} (key code {code})", one_based(.level), code_point(.ch))]
    UnsupportedLevel { ch: char, code: u32, level: u32 },

    #[error("hex digit '{digit}' of {} is not on the layout", code_point(.ch))]
    UnmappedHexDigit { ch: char, digit: char },
}

fn code_point(ch: &char) -> String {
    format!("U+{:04X}", u32::from(*ch))
}

fn one_based(level: &u32) -> u32 {
    level + 1
}

/// Overall result of a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationStatus {
    Ok,
    Partial { failures: usize },
}

/// Key actions for a whole text plus the characters that were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Translation {
    pub actions: Vec<KeyAction>,
    pub failures: Vec<TranslationFailure>,
}

impl Translation {
    #[must_use]
    pub fn status(&self) -> TranslationStatus {
        if self.failures.is_empty() {
            TranslationStatus::Ok
        } else {
            TranslationStatus::Partial {
                failures: self.failures.len(),
            }
        }
    }
}

/// Translate `text` into key actions using `resolver`.
///
/// Characters that fail are recorded in [`Translation::failures`] and
/// contribute no actions; every other character is still translated.
pub fn translate<R: KeysymResolver + ?Sized>(resolver: &R, text: &str) -> Translation {
    let mut translation = Translation::default();

    for ch in text.chars() {
        match translate_char(resolver, ch) {
            Ok(actions) => translation.actions.extend(actions),
            Err(failure) => {
                if matches!(failure, TranslationFailure::UnmappedHexDigit { .. }) {
                    tracing::error!("{failure}");
                } else {
                    tracing::warn!("{failure}");
                }
                translation.failures.push(failure);
            }
        }
    }

    tracing::debug!(
        chars = text.chars().count(),
        actions = translation.actions.len(),
        failures = translation.failures.len(),
        "Text translated"
    );
    translation
}

fn translate_char<R: KeysymResolver + ?Sized>(
    resolver: &R,
    ch: char,
) -> Result<Vec<KeyAction>, TranslationFailure> {
    let keysym = resolver
        .keysym_for(ch)
        .ok_or(TranslationFailure::NoKeysym { ch })?;

    match resolver.key_mapping(keysym) {
        Some(mapping) => {
            tracing::trace!(?ch, code = mapping.code, level = mapping.level, "Direct key");
            leveled_tap(ch, mapping)
        }
        None => {
            tracing::trace!(?ch, "No key on layout, using Unicode entry");
            unicode_entry(resolver, ch)
        }
    }
}

/// Tap `mapping.code` wrapped in the modifiers its level needs.
///
/// Modifiers nest: Shift is pressed before AltGr and released after it.
fn leveled_tap(ch: char, mapping: KeyMapping) -> Result<Vec<KeyAction>, TranslationFailure> {
    use KeyAction::{Press, Release, Tap};

    let code = mapping.code;
    let actions = match mapping.level {
        0 => vec![Tap(code)],
        1 => vec![Press(KEY_LEFTSHIFT), Tap(code), Release(KEY_LEFTSHIFT)],
        2 => vec![Press(KEY_RIGHTALT), Tap(code), Release(KEY_RIGHTALT)],
        3 => vec![
            Press(KEY_LEFTSHIFT),
            Press(KEY_RIGHTALT),
            Tap(code),
            Release(KEY_RIGHTALT),
            Release(KEY_LEFTSHIFT),
        ],
        level => return Err(TranslationFailure::UnsupportedLevel { ch, code, level }),
    };
    Ok(actions)
}

/// Ctrl+Shift+U, the hex code point, Space.
fn unicode_entry<R: KeysymResolver + ?Sized>(
    resolver: &R,
    ch: char,
) -> Result<Vec<KeyAction>, TranslationFailure> {
    use KeyAction::{Press, Release, Tap};

    let hex = format!("{:x}", u32::from(ch));
    let mut actions = Vec::with_capacity(hex.len() + 6);
    actions.extend([
        Press(KEY_LEFTCTRL),
        Press(KEY_LEFTSHIFT),
        Tap(KEY_U),
        Release(KEY_LEFTCTRL),
        Release(KEY_LEFTSHIFT),
    ]);

    for digit in hex.chars() {
        let mapping = resolver
            .keysym_for(digit)
            .and_then(|keysym| resolver.key_mapping(keysym))
            .ok_or(TranslationFailure::UnmappedHexDigit { ch, digit })?;
        actions.push(Tap(mapping.code));
    }

    actions.push(Tap(KEY_SPACE));
    Ok(actions)
}
