//! Keysym lookups against a compiled XKB keymap.

use xkbcommon::xkb;

use crate::keycodes::xkb_to_evdev;
use crate::translate::{KeyMapping, Keysym, KeysymResolver};

/// A compiled keymap plus the layout group that is currently active.
pub struct XkbLayout {
    keymap: xkb::Keymap,
    state: xkb::State,
}

impl XkbLayout {
    /// Compile the keymap text the compositor sent over `wl_keyboard`.
    ///
    /// The blob is the NUL-terminated XKB v1 text of the keymap.
    ///
    /// # Errors
    ///
    /// Returns [`KeymapError::Encoding`] if the blob is not UTF-8 and
    /// [`KeymapError::Compile`] if xkbcommon rejects it.
    pub fn from_blob(context: &xkb::Context, blob: &[u8], group: u32) -> Result<Self, KeymapError> {
        let end = blob.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let text = std::str::from_utf8(&blob[..end])
            .map_err(|_| KeymapError::Encoding)?
            .to_owned();

        let keymap = xkb::Keymap::new_from_string(
            context,
            text,
            xkb::KEYMAP_FORMAT_TEXT_V1,
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )
        .ok_or(KeymapError::Compile)?;

        Ok(Self::with_group(keymap, group))
    }

    /// Build a layout over an already compiled keymap with `group` locked.
    #[must_use]
    pub fn with_group(keymap: xkb::Keymap, group: u32) -> Self {
        let mut state = xkb::State::new(&keymap);
        state.update_mask(0, 0, 0, 0, 0, group);
        Self { keymap, state }
    }

    /// The compiled keymap, shared by reference count.
    #[must_use]
    pub fn keymap(&self) -> &xkb::Keymap {
        &self.keymap
    }

    /// Layout group searched by [`KeysymResolver::key_mapping`].
    #[must_use]
    pub fn active_group(&self) -> u32 {
        self.state.serialize_layout(xkb::STATE_LAYOUT_EFFECTIVE)
    }
}

impl KeysymResolver for XkbLayout {
    fn keysym_for(&self, ch: char) -> Option<Keysym> {
        let keysym = xkb::utf32_to_keysym(u32::from(ch));
        if keysym.raw() == xkb::keysyms::KEY_NoSymbol {
            None
        } else {
            Some(Keysym(keysym.raw()))
        }
    }

    fn key_mapping(&self, keysym: Keysym) -> Option<KeyMapping> {
        let layout = self.active_group();
        let min = self.keymap.min_keycode().raw();
        let max = self.keymap.max_keycode().raw();

        for raw in min..=max {
            let keycode = xkb::Keycode::new(raw);
            let levels = self.keymap.num_levels_for_key(keycode, layout);
            for level in 0..levels {
                let syms = self.keymap.key_get_syms_by_level(keycode, layout, level);
                if syms.iter().any(|sym| sym.raw() == keysym.0) {
                    let code = xkb_to_evdev(raw)?;
                    return Some(KeyMapping { code, level });
                }
            }
        }
        None
    }
}

/// Errors from compiling a keymap.
#[derive(Debug, thiserror::Error)]
pub enum KeymapError {
    /// The keymap blob is not valid UTF-8 text.
    #[error("keymap is not valid UTF-8")]
    Encoding,

    /// xkbcommon could not compile the keymap text.
    #[error("failed to compile keymap")]
    Compile,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdata::TEST_KEYMAP;

    fn layout() -> XkbLayout {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let mut blob = TEST_KEYMAP.as_bytes().to_vec();
        blob.push(0);
        XkbLayout::from_blob(&context, &blob, 0).expect("test keymap compiles")
    }

    fn mapping(layout: &XkbLayout, ch: char) -> Option<KeyMapping> {
        layout.key_mapping(layout.keysym_for(ch)?)
    }

    #[test]
    fn resolves_levels() {
        let layout = layout();
        assert_eq!(mapping(&layout, 'a'), Some(KeyMapping { code: 30, level: 0 }));
        assert_eq!(mapping(&layout, 'A'), Some(KeyMapping { code: 30, level: 1 }));
        assert_eq!(mapping(&layout, 'æ'), Some(KeyMapping { code: 30, level: 2 }));
        assert_eq!(mapping(&layout, 'Æ'), Some(KeyMapping { code: 30, level: 3 }));
        assert_eq!(mapping(&layout, '@'), Some(KeyMapping { code: 3, level: 1 }));
        assert_eq!(mapping(&layout, ' '), Some(KeyMapping { code: 57, level: 0 }));
    }

    #[test]
    fn missing_key_has_no_mapping() {
        let layout = layout();
        let euro = layout.keysym_for('€').expect("euro has a keysym");
        assert_eq!(layout.key_mapping(euro), None);
    }

    #[test]
    fn noncharacters_have_no_keysym() {
        let layout = layout();
        assert_eq!(layout.keysym_for('\u{FFFE}'), None);
        assert_eq!(layout.keysym_for('\u{FDD0}'), None);
    }

    #[test]
    fn translation_skips_character_without_keysym() {
        use crate::translate::{translate, KeyAction, TranslationFailure, TranslationStatus};

        let translation = translate(&layout(), "a\u{FFFE}A");
        assert_eq!(
            translation.actions,
            [
                KeyAction::Tap(30),
                KeyAction::Press(42),
                KeyAction::Tap(30),
                KeyAction::Release(42),
            ]
        );
        assert_eq!(
            translation.failures,
            [TranslationFailure::NoKeysym { ch: '\u{FFFE}' }]
        );
        assert_eq!(translation.status(), TranslationStatus::Partial { failures: 1 });
    }

    #[test]
    fn keysyms_follow_code_points() {
        let layout = layout();
        assert_eq!(layout.keysym_for('a'), Some(Keysym(0x61)));
        assert_eq!(layout.keysym_for('é'), Some(Keysym(0xe9)));
        // No legacy keysym: the code point with the Unicode bit set.
        assert_eq!(layout.keysym_for('中'), Some(Keysym(0x0100_4e2d)));
    }

    #[test]
    fn garbage_blob_fails_to_compile() {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        assert!(matches!(
            XkbLayout::from_blob(&context, b"not a keymap\0", 0),
            Err(KeymapError::Compile)
        ));
        assert!(matches!(
            XkbLayout::from_blob(&context, &[0xff, 0xfe, 0x00], 0),
            Err(KeymapError::Encoding)
        ));
    }
}
