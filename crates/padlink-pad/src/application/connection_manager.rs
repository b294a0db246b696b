//! ConnectionManager: selects one active transport and multiplexes input
//! dispatch onto it.
//!
//! Exactly one `ConnectionManager` is constructed at process start and
//! passed by reference to every consumer — there is no ambient global.  It
//! owns at most one live transport; switching modes fully stops the old
//! transport before the new one starts, so two transports never contend for
//! the same report stream.
//!
//! The manager aggregates the active transport's [`ConnectionState`] into a
//! single `watch` channel the UI layer observes, and turns
//! [`LogicalInputState`] snapshots into wire bytes using the active
//! transport's report layout and the configured trigger policy.

use std::sync::{Arc, Mutex, RwLock};

use padlink_core::discovery::DeviceDescriptor;
use padlink_core::{encode_report, ConnectionState, LogicalInputState, TriggerPolicy};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::application::transport::Transport;

/// The persisted transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Classic HID device profile to bonded peers.
    Classic,
    /// Encrypted-link (low-energy) HID peripheral service.
    Ble,
    /// UDP discovery + relay to a virtual-device server.
    #[default]
    Udp,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Classic => "classic",
            Self::Ble => "ble",
            Self::Udp => "udp",
        };
        f.write_str(s)
    }
}

/// Constructs the transport for a mode.  Injected so tests can substitute
/// recording transports and `main` can wire platform-backed ones.
pub type TransportFactory = dyn Fn(TransportMode) -> Arc<dyn Transport> + Send + Sync;

/// The currently active transport plus the task mirroring its state channel.
struct ActiveTransport {
    transport: Arc<dyn Transport>,
    state_forwarder: JoinHandle<()>,
}

/// The connection manager.  See the module docs for the ownership rules.
pub struct ConnectionManager {
    factory: Box<TransportFactory>,
    trigger_policy: TriggerPolicy,
    /// Read on every dispatch; written only while `switch_lock` is held.
    active: RwLock<Option<ActiveTransport>>,
    /// Serializes mode switches: the prior transport must fully stop before
    /// the next one starts.
    switch_lock: tokio::sync::Mutex<()>,
    mode: Mutex<Option<TransportMode>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// Creates the manager and returns it with the aggregated state channel.
    pub fn new(
        factory: Box<TransportFactory>,
        trigger_policy: TriggerPolicy,
    ) -> (Self, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let mgr = Self {
            factory,
            trigger_policy,
            active: RwLock::new(None),
            switch_lock: tokio::sync::Mutex::new(()),
            mode: Mutex::new(None),
            state_tx,
        };
        (mgr, state_rx)
    }

    /// Returns the currently selected mode, if any transport is active.
    pub fn current_mode(&self) -> Option<TransportMode> {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switches to `mode`: stops the current transport (best-effort),
    /// swaps the reference, and initializes the new one.
    ///
    /// Initialization failure leaves the new transport installed in the
    /// `Error` state — transports recover on their own (resume checks,
    /// re-advertising), so installing is the correct behaviour.
    pub async fn switch_mode(&self, mode: TransportMode) {
        let _guard = self.switch_lock.lock().await;

        if self.current_mode() == Some(mode) {
            info!("transport mode {mode} already active");
            return;
        }

        self.stop_active().await;

        info!("switching transport mode to {mode}");
        let transport = (self.factory)(mode);

        if let Err(e) = transport.initialize().await {
            // Logged only: transient platform failures surface through the
            // transport's own state channel as Error.
            error!("failed to initialize {mode} transport: {e}");
        }

        let state_forwarder = spawn_state_forwarder(&transport, self.state_tx.clone());
        *write_lock(&self.active) = Some(ActiveTransport {
            transport,
            state_forwarder,
        });
        *self.mode.lock().unwrap_or_else(|e| e.into_inner()) = Some(mode);
    }

    /// Stops the active transport and reverts the aggregated state to
    /// `Disconnected`.
    pub async fn shutdown(&self) {
        let _guard = self.switch_lock.lock().await;
        self.stop_active().await;
        *self.mode.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    async fn stop_active(&self) {
        let previous = write_lock(&self.active).take();
        if let Some(active) = previous {
            active.state_forwarder.abort();
            active.transport.shutdown().await;
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }

    /// Encodes `state` for the active transport and queues it for delivery.
    /// A no-op without an active transport.  Never blocks.
    pub fn dispatch(&self, state: &LogicalInputState) {
        let guard = read_lock(&self.active);
        let Some(active) = guard.as_ref() else {
            return;
        };
        let bytes = encode_report(state, active.transport.report_variant(), self.trigger_policy);
        active.transport.send_report(&bytes);
    }

    /// Delegates a discovery sweep to the active transport.
    pub async fn discover(&self, window: std::time::Duration) -> Vec<DeviceDescriptor> {
        let transport = self.active_transport();
        match transport {
            Some(t) => t.discover(window).await,
            None => {
                warn!("discover requested with no active transport");
                Vec::new()
            }
        }
    }

    /// Delegates a connection attempt to the active transport.
    pub async fn connect(&self, address: &str) -> bool {
        match self.active_transport() {
            Some(t) => t.connect(address).await,
            None => false,
        }
    }

    /// Delegates a disconnect request to the active transport.
    pub async fn disconnect(&self, address: &str) {
        if let Some(t) = self.active_transport() {
            t.disconnect(address).await;
        }
    }

    fn active_transport(&self) -> Option<Arc<dyn Transport>> {
        read_lock(&self.active)
            .as_ref()
            .map(|a| Arc::clone(&a.transport))
    }
}

/// Mirrors the transport's state channel onto the manager's aggregated one.
fn spawn_state_forwarder(
    transport: &Arc<dyn Transport>,
    state_tx: watch::Sender<ConnectionState>,
) -> JoinHandle<()> {
    let mut rx = transport.connection_state();
    tokio::spawn(async move {
        state_tx.send_replace(*rx.borrow());
        while rx.changed().await.is_ok() {
            state_tx.send_replace(*rx.borrow_and_update());
        }
    })
}

/// Poison-tolerant read lock: a panicked writer cannot leave the dispatch
/// path permanently broken.
fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
