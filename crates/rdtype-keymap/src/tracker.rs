//! Turns raw keymap events into compiled layouts on the main loop.
//!
//! xkbcommon objects are not `Send`, so compilation happens here rather
//! than on the Wayland thread.

use tokio::sync::mpsc;
use xkbcommon::xkb;

use crate::provider::KeymapEvent;
use crate::xkb::XkbLayout;

/// Follows the compositor's keymap and active group.
pub struct LayoutTracker {
    context: xkb::Context,
    events: mpsc::UnboundedReceiver<KeymapEvent>,
    keymap: Option<xkb::Keymap>,
    group: u32,
}

impl LayoutTracker {
    #[must_use]
    pub fn new(events: mpsc::UnboundedReceiver<KeymapEvent>) -> Self {
        Self {
            context: xkb::Context::new(xkb::CONTEXT_NO_FLAGS),
            events,
            keymap: None,
            group: 0,
        }
    }

    /// Wait for the next usable layout.
    ///
    /// Returns `None` once the keymap provider has gone away. Cancel safe.
    pub async fn next_layout(&mut self) -> Option<XkbLayout> {
        while let Some(event) = self.events.recv().await {
            if let Some(layout) = self.apply(event) {
                return Some(layout);
            }
        }
        None
    }

    fn apply(&mut self, event: KeymapEvent) -> Option<XkbLayout> {
        match event {
            KeymapEvent::KeymapChanged(blob) => {
                match XkbLayout::from_blob(&self.context, &blob, self.group) {
                    Ok(layout) => {
                        tracing::info!(bytes = blob.len(), group = self.group, "Keyboard layout updated");
                        self.keymap = Some(layout.keymap().clone());
                        Some(layout)
                    }
                    Err(e) => {
                        tracing::warn!("Ignoring keymap from compositor: {e}");
                        None
                    }
                }
            }
            KeymapEvent::GroupChanged(group) => {
                tracing::debug!(group, "Active layout group changed");
                self.group = group;
                self.keymap
                    .clone()
                    .map(|keymap| XkbLayout::with_group(keymap, group))
            }
            KeymapEvent::KeyboardAvailable(available) => {
                tracing::debug!(available, "Keyboard capability changed");
                None
            }
        }
    }
}
