//! Supervision of named push channels.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::event::StreamEvent;
use crate::auth::AuthSignal;
use crate::config::ChannelConfig;
use crate::error::{ChannelError, TransportError};
use crate::transport::Transport;

/// Lifecycle state of a managed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
    Error,
    ReconnectWait,
}

/// Consumer callbacks for one channel.
///
/// `on_message` is required; `on_open` and `on_error` are optional.
/// All callbacks are invoked from the channel's supervisor task.
///
/// # Example
///
/// ```
/// use uplink::ChannelCallbacks;
///
/// let callbacks = ChannelCallbacks::new(|event| {
///     println!("{}: {:?}", event.event_type, event.payload);
/// })
/// .on_open(|| println!("stream open"))
/// .on_error(|err| eprintln!("stream error: {err}"));
/// ```
#[derive(Clone)]
pub struct ChannelCallbacks {
    on_message: Arc<dyn Fn(StreamEvent) + Send + Sync>,
    on_open: Option<Arc<dyn Fn() + Send + Sync>>,
    on_error: Option<Arc<dyn Fn(&ChannelError) + Send + Sync>>,
}

impl ChannelCallbacks {
    pub fn new<F>(on_message: F) -> Self
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        Self {
            on_message: Arc::new(on_message),
            on_open: None,
            on_error: None,
        }
    }

    pub fn on_open<F>(mut self, on_open: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(on_open));
        self
    }

    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&ChannelError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    fn opened(&self) {
        if let Some(on_open) = &self.on_open {
            on_open();
        }
    }

    fn failed(&self, err: &ChannelError) {
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }
}

impl std::fmt::Debug for ChannelCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCallbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Opens, supervises, and automatically recovers named push channels.
///
/// At most one live handle exists per name: starting a stream that
/// already exists closes the old handle before opening the new one.
/// Reconnection is bounded and fixed-delay; once attempts are exhausted
/// the channel closes permanently and must be restarted explicitly.
/// Cloning is cheap; all clones share the channel map.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    auth: AuthSignal,
    config: ChannelConfig,
    channels: Mutex<HashMap<String, ChannelHandle>>,
}

struct ChannelHandle {
    state: Arc<Mutex<ChannelState>>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ChannelManager {
    pub fn new(transport: Arc<dyn Transport>, auth: AuthSignal, config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                auth,
                config,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open a named push channel, replacing any live handle for `name`.
    ///
    /// Returns whether a start was attempted: `false` (with a warning
    /// and an `Unauthorized` callback) when the process is not
    /// authenticated, in which case no handle is created.
    pub fn start_stream(&self, name: &str, callbacks: ChannelCallbacks) -> bool {
        if !self.inner.auth.is_authenticated() {
            warn!(channel = name, "refusing to open stream before authentication");
            callbacks.failed(&ChannelError::Unauthorized);
            return false;
        }

        // The old handle, if any, goes down before the new one comes up.
        self.close_stream(name);

        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(Mutex::new(ChannelState::Connecting));
        let task = tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            name.to_string(),
            callbacks,
            state.clone(),
            stop_rx,
        ));

        self.inner.channels.lock().insert(
            name.to_string(),
            ChannelHandle {
                state,
                stop: stop_tx,
                task,
            },
        );
        debug!(channel = name, "stream starting");
        true
    }

    /// Close a channel immediately, cancelling any pending reconnect.
    /// Closing an absent or already-closed channel is a no-op.
    pub fn close_stream(&self, name: &str) {
        let handle = self.inner.channels.lock().remove(name);
        if let Some(handle) = handle {
            handle.shut_down();
            debug!(channel = name, "stream closed");
        }
    }

    /// Close every live channel. Deterministic and safe to call
    /// repeatedly; used on logout and process exit.
    pub fn close_all_streams(&self) {
        let drained: Vec<(String, ChannelHandle)> =
            self.inner.channels.lock().drain().collect();
        for (name, handle) in drained {
            handle.shut_down();
            info!(channel = %name, "stream closed during teardown");
        }
    }

    /// Names of all channels with a live handle.
    pub fn active_streams(&self) -> Vec<String> {
        self.inner.channels.lock().keys().cloned().collect()
    }

    /// Current lifecycle state of a channel, if it has a live handle.
    pub fn stream_state(&self, name: &str) -> Option<ChannelState> {
        self.inner
            .channels
            .lock()
            .get(name)
            .map(|handle| *handle.state.lock())
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("active", &self.active_streams())
            .finish()
    }
}

impl ChannelHandle {
    fn shut_down(self) {
        let _ = self.stop.send(true);
        self.task.abort();
        *self.state.lock() = ChannelState::Closed;
    }
}

/// Per-channel supervisor: connect, pump messages, reconnect within
/// bounds, give up cleanly.
async fn supervise(
    inner: Weak<ManagerInner>,
    name: String,
    callbacks: ChannelCallbacks,
    state: Arc<Mutex<ChannelState>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;

    loop {
        let Some(strong) = inner.upgrade() else { return };
        let transport = strong.transport.clone();
        let config = strong.config.clone();
        drop(strong);

        *state.lock() = ChannelState::Connecting;
        let opened = tokio::select! {
            opened = transport.open_stream(&name) => opened,
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
                continue;
            }
        };

        let failure = match opened {
            Ok(mut frames) => {
                *state.lock() = ChannelState::Open;
                attempts = 0;
                info!(channel = %name, "stream open");
                callbacks.opened();

                loop {
                    tokio::select! {
                        frame = frames.next() => match frame {
                            Some(Ok(raw)) => match StreamEvent::parse(&raw) {
                                Ok(event) => (callbacks.on_message)(event),
                                Err(err) => {
                                    // One bad message must not kill the subscription.
                                    warn!(channel = %name, %err, "dropping malformed event");
                                }
                            },
                            Some(Err(err)) => break ChannelError::Transport(err),
                            None => break ChannelError::Transport(TransportError::Other(
                                "stream ended".to_string(),
                            )),
                        },
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                return;
                            }
                        }
                    }
                }
            }
            Err(err) => ChannelError::Transport(err),
        };

        *state.lock() = ChannelState::Error;
        warn!(channel = %name, error = %failure, "stream error");
        callbacks.failed(&failure);

        attempts += 1;
        if attempts > config.max_reconnect_attempts {
            let exhausted = ChannelError::Exhausted {
                attempts: attempts - 1,
            };
            error!(channel = %name, "reconnect attempts exhausted; closing channel");
            *state.lock() = ChannelState::Closed;
            callbacks.failed(&exhausted);
            remove_own_registration(&inner, &name, &state);
            return;
        }

        *state.lock() = ChannelState::ReconnectWait;
        debug!(channel = %name, attempt = attempts, "waiting before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay()) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    return;
                }
            }
        }

        let authenticated = inner
            .upgrade()
            .map(|strong| strong.auth.is_authenticated())
            .unwrap_or(false);
        if !authenticated {
            info!(channel = %name, "authentication lost; abandoning reconnect");
            *state.lock() = ChannelState::Closed;
            remove_own_registration(&inner, &name, &state);
            return;
        }
    }
}

/// Drop this channel's map entry, but only if the entry is still ours:
/// the name may have been reused by a replacement handle.
fn remove_own_registration(
    inner: &Weak<ManagerInner>,
    name: &str,
    state: &Arc<Mutex<ChannelState>>,
) {
    if let Some(strong) = inner.upgrade() {
        let mut channels = strong.channels.lock();
        let ours = channels
            .get(name)
            .is_some_and(|handle| Arc::ptr_eq(&handle.state, state));
        if ours {
            channels.remove(name);
        }
    }
}
