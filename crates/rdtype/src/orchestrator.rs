//! Drives one run: wait for a layout and an authenticated session, then
//! type the text.

use std::future::Future;
use std::time::Duration;

use rdtype_keymap::{
    translate, KeyAction, KeysymResolver, LayoutTracker, TranslationFailure, XkbLayout,
};
use rdtype_portal::{
    PortalSession, RemoteDesktopPortal, SessionError, SessionEvent, SessionState,
};
use tokio::sync::mpsc;

/// Source of keyboard layouts, newest last.
#[allow(async_fn_in_trait)]
pub trait LayoutFeed {
    type Layout: KeysymResolver;

    /// Next layout, or `None` once no more will arrive. Must be cancel safe.
    async fn next_layout(&mut self) -> Option<Self::Layout>;
}

impl LayoutFeed for LayoutTracker {
    type Layout = XkbLayout;

    async fn next_layout(&mut self) -> Option<XkbLayout> {
        LayoutTracker::next_layout(self).await
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every character was typed.
    Typed,
    /// Typing finished but some characters were skipped.
    PartiallyTyped { failures: Vec<TranslationFailure> },
    /// No session could be authenticated, or it went away while typing.
    NotAuthenticated,
    /// The compositor never provided a keymap.
    KeymapUnavailable,
    /// Stopped by a shutdown request; held keys were released.
    Interrupted,
}

impl Outcome {
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Typed => 0,
            Self::NotAuthenticated | Self::KeymapUnavailable => 1,
            Self::PartiallyTyped { .. } => 2,
            Self::Interrupted => 130,
        }
    }
}

pub struct Orchestrator<P: RemoteDesktopPortal + 'static, F: LayoutFeed> {
    session: PortalSession<P>,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    layouts: F,
    action_delay: Duration,
    /// Keys pressed through the session and not yet released.
    held: Vec<u32>,
}

impl<P: RemoteDesktopPortal + 'static, F: LayoutFeed> Orchestrator<P, F> {
    pub fn new(
        session: PortalSession<P>,
        session_events: mpsc::UnboundedReceiver<SessionEvent>,
        layouts: F,
        action_delay: Duration,
    ) -> Self {
        Self {
            session,
            session_events,
            layouts,
            action_delay,
            held: Vec::new(),
        }
    }

    /// Type `text` and close the session.
    ///
    /// When `shutdown` resolves first, keys still held are released before
    /// the session is closed.
    pub async fn run(mut self, text: &str, shutdown: impl Future<Output = ()>) -> Outcome {
        tokio::pin!(shutdown);
        let outcome = tokio::select! {
            biased;

            () = &mut shutdown => {
                tracing::info!(held = self.held.len(), "Shutdown requested, releasing held keys");
                Outcome::Interrupted
            }
            outcome = self.type_text(text) => outcome,
        };

        self.release_held().await;
        self.session.close().await;
        outcome
    }

    async fn type_text(&mut self, text: &str) -> Outcome {
        let layout = match self.wait_until_ready().await {
            Ok(layout) => layout,
            Err(outcome) => return outcome,
        };

        let translation = translate(&layout, text);
        tracing::info!(actions = translation.actions.len(), "Replaying key actions");

        match self.replay(&translation.actions).await {
            Err(e) => {
                tracing::error!("Typing aborted: {e}");
                Outcome::NotAuthenticated
            }
            Ok(()) if translation.failures.is_empty() => Outcome::Typed,
            Ok(()) => Outcome::PartiallyTyped {
                failures: translation.failures,
            },
        }
    }

    /// Wait for both a layout and a `Ready` session.
    ///
    /// The session is requested once, when the first layout arrives.
    async fn wait_until_ready(&mut self) -> Result<F::Layout, Outcome> {
        let mut layout: Option<F::Layout> = None;
        let mut layouts_ended = false;
        let mut ready = false;

        loop {
            if ready {
                if let Some(layout) = layout.take() {
                    return Ok(layout);
                }
            }

            tokio::select! {
                biased;

                next = self.layouts.next_layout(), if !layouts_ended => match next {
                    Some(next) => {
                        let first = layout.is_none();
                        layout = Some(next);
                        if first && !ready {
                            tracing::debug!("First layout received, requesting session");
                            let state = self.session.create_session().await;
                            if state != SessionState::Ready {
                                tracing::error!(%state, "Remote desktop session was not granted");
                                return Err(Outcome::NotAuthenticated);
                            }
                        }
                    }
                    None => {
                        layouts_ended = true;
                        if layout.is_none() {
                            tracing::error!("Keymap provider ended before sending a keymap");
                            return Err(Outcome::KeymapUnavailable);
                        }
                    }
                },

                event = self.session_events.recv() => match event {
                    Some(event) => {
                        self.session.handle_event(&event);
                        match event {
                            SessionEvent::Ready => ready = true,
                            SessionEvent::Closed(_) if !self.session.is_ready() => {
                                return Err(Outcome::NotAuthenticated);
                            }
                            SessionEvent::Closed(_) => {}
                        }
                    }
                    None => return Err(Outcome::NotAuthenticated),
                },
            }
        }
    }

    /// Replay `actions` in order through the session.
    async fn replay(&mut self, actions: &[KeyAction]) -> Result<(), SessionError> {
        if !self.session.is_ready() {
            return Err(SessionError::NotAuthenticated);
        }

        for action in actions {
            while let Ok(event) = self.session_events.try_recv() {
                self.session.handle_event(&event);
            }

            tracing::trace!(%action, "Replaying");
            // Keys are recorded as held before the request goes out, so an
            // interrupted request still gets a release.
            match *action {
                KeyAction::Press(code) => {
                    self.held.push(code);
                    self.session.key_press(code).await?;
                }
                KeyAction::Release(code) => {
                    self.session.key_release(code).await?;
                    self.forget_held(code);
                }
                KeyAction::Tap(code) => {
                    self.held.push(code);
                    self.session.send_key(code).await?;
                    self.forget_held(code);
                }
            }

            if !self.action_delay.is_zero() {
                tokio::time::sleep(self.action_delay).await;
            }
        }
        Ok(())
    }

    fn forget_held(&mut self, code: u32) {
        if let Some(i) = self.held.iter().rposition(|&held| held == code) {
            self.held.remove(i);
        }
    }

    /// Release held keys, most recent first.
    async fn release_held(&mut self) {
        while let Some(code) = self.held.pop() {
            if let Err(e) = self.session.key_release(code).await {
                tracing::debug!(code, "Cannot release held key: {e}");
                self.held.clear();
            }
        }
    }
}
