//! UDP transport: broadcast discovery plus descriptor-handshake report relay.
//!
//! Unlike the two wireless transports, this one owns real sockets and talks
//! to the PadLink server process rather than to a host's input stack.  Two
//! independent roles:
//!
//! - **Discovery**: broadcast the ASCII request to the subnet, then collect
//!   JSON announcements over a bounded window.  Replies are deduplicated by
//!   address with the newest timestamp winning.  The sweep never blocks
//!   beyond its window.
//! - **Data path**: `connect` sends the 6-axis descriptor prefixed with the
//!   handshake magic to the peer's data port and waits (bounded) for the
//!   literal acknowledgment.  Timeout or a mismatched reply fails the
//!   attempt and leaves no state behind.  On success the socket becomes the
//!   send path and a liveness poll starts: every two seconds it resends the
//!   last report — byte-identical — or the neutral report if nothing has
//!   been sent yet.  The poll keeps NAT/conntrack entries warm and doubles
//!   as peer-loss detection: a send failure flips the connection state.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use padlink_core::descriptor::NETWORK_REPORT_DESCRIPTOR;
use padlink_core::discovery::{
    DeviceDescriptor, DeviceInfo, DiscoveredDevices, DATA_PORT, DESCRIPTOR_ACK, DESCRIPTOR_MAGIC,
    DISCOVERY_PORT, DISCOVER_REQUEST, HANDSHAKE_TIMEOUT_SECS, LIVENESS_INTERVAL_SECS,
};
use padlink_core::{
    encode_report, ConnectionState, LogicalInputState, ReportVariant, TriggerPolicy,
};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::application::transport::{Transport, TransportError};

/// Socket parameters; the timing knobs exist so tests can shrink them.
#[derive(Debug, Clone)]
pub struct UdpTransportConfig {
    /// Port discovery requests are broadcast to.
    pub discovery_port: u16,
    /// Peer port for the handshake and report datagrams.
    pub data_port: u16,
    /// Bound on waiting for the descriptor acknowledgment.
    pub handshake_timeout: Duration,
    /// Liveness poll period.
    pub liveness_interval: Duration,
}

impl Default for UdpTransportConfig {
    fn default() -> Self {
        Self {
            discovery_port: DISCOVERY_PORT,
            data_port: DATA_PORT,
            handshake_timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            liveness_interval: Duration::from_secs(LIVENESS_INTERVAL_SECS),
        }
    }
}

struct ActivePath {
    peer: SocketAddr,
    liveness_task: JoinHandle<()>,
}

/// The UDP transport.
pub struct UdpTransport {
    config: UdpTransportConfig,
    state_tx: watch::Sender<ConnectionState>,
    /// Last queued report; the liveness poll resends exactly these bytes.
    last_report: Arc<Mutex<Option<Vec<u8>>>>,
    /// The connected data socket, readable from the sync send path.
    active_socket: Arc<Mutex<Option<Arc<UdpSocket>>>>,
    path: tokio::sync::Mutex<Option<ActivePath>>,
}

impl UdpTransport {
    pub fn new(config: UdpTransportConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            state_tx,
            last_report: Arc::new(Mutex::new(None)),
            active_socket: Arc::new(Mutex::new(None)),
            path: tokio::sync::Mutex::new(None),
        }
    }

    /// Resolves a peer address string: either `ip` (the configured data port
    /// is appended) or an explicit `ip:port`.
    fn resolve_peer(&self, address: &str) -> Option<SocketAddr> {
        if let Ok(addr) = address.parse::<SocketAddr>() {
            return Some(addr);
        }
        address
            .parse::<std::net::IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.config.data_port))
    }

    async fn teardown_path(&self) {
        let mut path = self.path.lock().await;
        if let Some(active) = path.take() {
            active.liveness_task.abort();
            debug!("data path to {} closed", active.peer);
        }
        *lock(&self.active_socket) = None;
    }
}

/// The payload the liveness poll falls back to before any input was sampled.
fn neutral_report() -> Vec<u8> {
    encode_report(
        &LogicalInputState::NEUTRAL,
        ReportVariant::Extended,
        TriggerPolicy::PreferAnalog,
    )
}

#[async_trait]
impl Transport for UdpTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        // Nothing to acquire up front: discovery and data sockets are
        // created per sweep / per connection.
        self.state_tx.send_replace(ConnectionState::Disconnected);
        Ok(())
    }

    async fn shutdown(&self) {
        self.teardown_path().await;
        *lock(&self.last_report) = None;
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("udp transport stopped");
    }

    async fn discover(&self, window: Duration) -> Vec<DeviceDescriptor> {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                warn!("discovery socket bind failed: {e}");
                self.state_tx.send_replace(ConnectionState::Error);
                return Vec::new();
            }
        };
        if let Err(e) = socket.set_broadcast(true) {
            warn!("enabling broadcast failed: {e}");
        }

        let was_connected = lock(&self.active_socket).is_some();
        if !was_connected {
            self.state_tx.send_replace(ConnectionState::Discovering);
        }

        let target = SocketAddr::from(([255, 255, 255, 255], self.config.discovery_port));
        if let Err(e) = socket.send_to(DISCOVER_REQUEST.as_bytes(), target).await {
            warn!("discovery broadcast failed: {e}");
        }

        // Bounded accumulation: collect replies (and unsolicited
        // self-broadcasts) until the window closes.
        let deadline = Instant::now() + window;
        let mut found = DiscoveredDevices::new();
        let mut buf = vec![0u8; 1024];
        loop {
            let (len, src) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    debug!("discovery recv error: {e}");
                    continue;
                }
                Err(_) => break, // window closed
            };
            match serde_json::from_slice::<DeviceInfo>(&buf[..len]) {
                Ok(info) => {
                    debug!("announcement from {src}: {info:?}");
                    found.merge(info.into());
                }
                Err(e) => debug!("undecodable discovery datagram from {src}: {e}"),
            }
        }

        if !was_connected {
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
        let devices = found.into_sorted_vec();
        info!("discovery sweep found {} device(s)", devices.len());
        devices
    }

    async fn connect(&self, address: &str) -> bool {
        let Some(peer) = self.resolve_peer(address) else {
            warn!("connect: unparsable peer address {address:?}");
            return false;
        };

        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                warn!("data socket bind failed: {e}");
                return false;
            }
        };
        if let Err(e) = socket.connect(peer).await {
            warn!("data socket connect to {peer} failed: {e}");
            return false;
        }

        // A failed attempt must leave no state change behind, so remember
        // what to restore before announcing Connecting.
        let prior_state = *self.state_tx.borrow();
        self.state_tx.send_replace(ConnectionState::Connecting);

        // Descriptor handshake: magic + the 6-axis descriptor.
        let mut handshake = DESCRIPTOR_MAGIC.to_vec();
        handshake.extend_from_slice(NETWORK_REPORT_DESCRIPTOR);
        if let Err(e) = socket.send(&handshake).await {
            warn!("handshake send to {peer} failed: {e}");
            self.state_tx.send_replace(prior_state);
            return false;
        }

        let mut buf = [0u8; 64];
        let ack = tokio::time::timeout(self.config.handshake_timeout, socket.recv(&mut buf)).await;
        match ack {
            Ok(Ok(len)) if &buf[..len] == DESCRIPTOR_ACK => {
                info!("descriptor acknowledged by {peer}");
            }
            Ok(Ok(len)) => {
                warn!(
                    "handshake mismatch from {peer}: {:?}",
                    String::from_utf8_lossy(&buf[..len])
                );
                self.state_tx.send_replace(prior_state);
                return false;
            }
            Ok(Err(e)) => {
                warn!("handshake recv error from {peer}: {e}");
                self.state_tx.send_replace(prior_state);
                return false;
            }
            Err(_) => {
                warn!(
                    "no descriptor acknowledgment from {peer} within {:?}",
                    self.config.handshake_timeout
                );
                self.state_tx.send_replace(prior_state);
                return false;
            }
        }

        // Success: the socket becomes the send path, the liveness poll
        // starts, and any previous path is torn down.
        self.teardown_path().await;

        let socket = Arc::new(socket);
        let liveness_task = spawn_liveness_poll(
            Arc::clone(&socket),
            Arc::clone(&self.last_report),
            Arc::clone(&self.active_socket),
            self.state_tx.clone(),
            self.config.liveness_interval,
        );

        *lock(&self.active_socket) = Some(socket);
        *self.path.lock().await = Some(ActivePath {
            peer,
            liveness_task,
        });
        self.state_tx.send_replace(ConnectionState::Connected);
        true
    }

    async fn disconnect(&self, _address: &str) {
        self.teardown_path().await;
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    fn send_report(&self, report: &[u8]) {
        *lock(&self.last_report) = Some(report.to_vec());
        let socket = lock(&self.active_socket).clone();
        let Some(socket) = socket else {
            return; // not connected: sends are dropped
        };
        if let Err(e) = socket.try_send(report) {
            warn!("report send failed: {e}");
            *lock(&self.active_socket) = None;
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn report_variant(&self) -> ReportVariant {
        ReportVariant::Extended
    }

    fn supports_discovery(&self) -> bool {
        true
    }
}

/// Spawns the 2s liveness poll.  Cancelable; a cancellation racing an
/// in-flight tick only costs one duplicate (idempotent) datagram.
fn spawn_liveness_poll(
    socket: Arc<UdpSocket>,
    last_report: Arc<Mutex<Option<Vec<u8>>>>,
    active_socket: Arc<Mutex<Option<Arc<UdpSocket>>>>,
    state_tx: watch::Sender<ConnectionState>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the poll starts one
        // full period after the handshake.
        interval.tick().await;
        loop {
            interval.tick().await;
            let payload = lock(&last_report).clone().unwrap_or_else(neutral_report);
            if let Err(e) = socket.send(&payload).await {
                warn!("liveness poll send failed, marking disconnected: {e}");
                *lock(&active_socket) = None;
                state_tx.send_replace(ConnectionState::Disconnected);
                break;
            }
        }
    })
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
