//! Keymap discovery over the Wayland seat keyboard.
//!
//! The Wayland connection lives on a dedicated OS thread. It binds the
//! first seat, creates a keyboard when the seat has one and forwards the
//! keymap the compositor sends. Events reach the async side by value over
//! a tokio channel; the thread is told to stop over a command channel.

use std::os::fd::OwnedFd;
use std::os::unix::fs::FileExt;
use std::sync::mpsc as std_mpsc;

use rustix::event::{PollFd, PollFlags};
use tokio::sync::mpsc;
use wayland_client::protocol::{wl_keyboard, wl_registry, wl_seat};
use wayland_client::{Connection, Dispatch, Proxy, QueueHandle, WEnum};

/// Highest `wl_seat` version this client understands.
const SEAT_VERSION: u32 = 7;

/// How long the thread blocks on the socket before checking for commands.
const POLL_TIMEOUT_MS: i32 = 100;

/// Events delivered from the Wayland thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeymapEvent {
    /// The seat gained or lost its keyboard capability.
    KeyboardAvailable(bool),
    /// A new keymap, as the raw XKB v1 text blob.
    KeymapChanged(Vec<u8>),
    /// The active layout group changed.
    GroupChanged(u32),
}

/// Commands accepted by the Wayland thread.
#[derive(Debug)]
pub enum ProviderCommand {
    Shutdown,
}

/// Handle to the Wayland keymap thread.
pub struct KeymapProvider {
    commands: std_mpsc::Sender<ProviderCommand>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl KeymapProvider {
    /// Connect to the compositor named by the environment and start the
    /// keymap thread.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Connect`] when no Wayland compositor can be
    /// reached and [`ProviderError::Io`] if the thread cannot be spawned.
    pub fn spawn() -> Result<(Self, mpsc::UnboundedReceiver<KeymapEvent>), ProviderError> {
        let conn = Connection::connect_to_env()?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = std_mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("wayland-keymap".into())
            .spawn(move || {
                if let Err(e) = run_wayland_loop(&conn, event_tx, &command_rx) {
                    tracing::error!("Wayland keymap thread exited with error: {e}");
                }
            })?;

        Ok((
            Self {
                commands: command_tx,
                thread: Some(thread),
            },
            event_rx,
        ))
    }

    /// Stop the Wayland thread and join it.
    pub fn stop(&mut self) {
        let _ = self.commands.send(ProviderCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for KeymapProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run the Wayland event loop until shut down or the receiver goes away.
fn run_wayland_loop(
    conn: &Connection,
    events: mpsc::UnboundedSender<KeymapEvent>,
    commands: &std_mpsc::Receiver<ProviderCommand>,
) -> Result<(), ProviderError> {
    let mut queue = conn.new_event_queue();
    let qh = queue.handle();
    let _registry = conn.display().get_registry(&qh, ());
    let mut watcher = KeyboardWatcher::new(events);

    loop {
        match commands.try_recv() {
            Ok(ProviderCommand::Shutdown) | Err(std_mpsc::TryRecvError::Disconnected) => {
                tracing::debug!("Wayland keymap thread shutting down");
                return Ok(());
            }
            Err(std_mpsc::TryRecvError::Empty) => {}
        }

        queue.dispatch_pending(&mut watcher)?;
        if watcher.events.is_closed() {
            return Ok(());
        }
        queue.flush()?;

        let Some(guard) = queue.prepare_read() else {
            continue;
        };

        let readable = {
            let fd = guard.connection_fd();
            let mut fds = [PollFd::new(&fd, PollFlags::IN)];
            match rustix::event::poll(&mut fds, POLL_TIMEOUT_MS) {
                Ok(n) => n > 0,
                Err(rustix::io::Errno::INTR) => false,
                Err(e) => return Err(ProviderError::Io(e.into())),
            }
        };

        if readable {
            match guard.read() {
                Ok(_) => {}
                Err(wayland_client::backend::WaylandError::Io(e))
                    if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Dispatch state owned by the Wayland thread.
struct KeyboardWatcher {
    events: mpsc::UnboundedSender<KeymapEvent>,
    seat: Option<wl_seat::WlSeat>,
    keyboard: Option<wl_keyboard::WlKeyboard>,
    group: Option<u32>,
}

impl KeyboardWatcher {
    fn new(events: mpsc::UnboundedSender<KeymapEvent>) -> Self {
        Self {
            events,
            seat: None,
            keyboard: None,
            group: None,
        }
    }

    fn emit(&self, event: KeymapEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Keymap receiver dropped");
        }
    }

    fn set_keyboard_capability(
        &mut self,
        seat: &wl_seat::WlSeat,
        has_keyboard: bool,
        qh: &QueueHandle<Self>,
    ) {
        match (has_keyboard, self.keyboard.take()) {
            (true, None) => {
                tracing::debug!("Seat has a keyboard, listening for keymaps");
                self.keyboard = Some(seat.get_keyboard(qh, ()));
                self.emit(KeymapEvent::KeyboardAvailable(true));
            }
            (false, Some(keyboard)) => {
                tracing::info!("Seat lost its keyboard");
                if keyboard.version() >= 3 {
                    keyboard.release();
                }
                self.group = None;
                self.emit(KeymapEvent::KeyboardAvailable(false));
            }
            (_, keyboard) => self.keyboard = keyboard,
        }
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for KeyboardWatcher {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        {
            if interface == "wl_seat" && state.seat.is_none() {
                tracing::debug!(name, version, "Binding seat");
                state.seat = Some(registry.bind::<wl_seat::WlSeat, _, _>(
                    name,
                    version.min(SEAT_VERSION),
                    qh,
                    (),
                ));
            }
        }
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for KeyboardWatcher {
    fn event(
        state: &mut Self,
        seat: &wl_seat::WlSeat,
        event: wl_seat::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_seat::Event::Capabilities {
            capabilities: WEnum::Value(capabilities),
        } = event
        {
            let has_keyboard = capabilities.contains(wl_seat::Capability::Keyboard);
            state.set_keyboard_capability(seat, has_keyboard, qh);
        }
    }
}

impl Dispatch<wl_keyboard::WlKeyboard, ()> for KeyboardWatcher {
    fn event(
        state: &mut Self,
        _keyboard: &wl_keyboard::WlKeyboard,
        event: wl_keyboard::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_keyboard::Event::Keymap {
                format: WEnum::Value(wl_keyboard::KeymapFormat::XkbV1),
                fd,
                size,
            } => match read_keymap(fd, size) {
                Ok(blob) => {
                    tracing::debug!(size, "Received keymap");
                    state.emit(KeymapEvent::KeymapChanged(blob));
                }
                Err(e) => tracing::warn!("Failed to read keymap: {e}"),
            },
            wl_keyboard::Event::Keymap { format, .. } => {
                tracing::warn!(?format, "Unsupported keymap format");
            }
            wl_keyboard::Event::Modifiers { group, .. } => {
                if state.group != Some(group) {
                    state.group = Some(group);
                    state.emit(KeymapEvent::GroupChanged(group));
                }
            }
            _ => {}
        }
    }
}

/// Read `size` bytes of keymap from the shared fd.
///
/// Uses positional reads: the fd may be shared with other clients, so its
/// offset must not move.
fn read_keymap(fd: OwnedFd, size: u32) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::from(fd);
    let mut blob = vec![0u8; size as usize];
    file.read_exact_at(&mut blob, 0)?;
    Ok(blob)
}

/// Errors from the Wayland keymap thread.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to connect to Wayland: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    #[error("Wayland dispatch error: {0}")]
    Dispatch(#[from] wayland_client::DispatchError),

    #[error("Wayland error: {0}")]
    Wayland(#[from] wayland_client::backend::WaylandError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
