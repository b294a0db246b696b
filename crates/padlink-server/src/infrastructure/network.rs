//! UDP services of the virtual-device server: the discovery responder, the
//! active self-broadcaster, and the data-port relay loop.
//!
//! Three persistent loops over two sockets:
//!
//! - **Discovery responder** (default port 2242): answers `"discover"`
//!   requests (or anything mentioning `device_info`) with the server's
//!   [`DeviceInfo`] JSON, unicast back to the requester.
//! - **Broadcaster** (same socket): while no client is delivering input —
//!   never connected, or silent past the 5s timeout — announces the same
//!   JSON to the limited broadcast address every 2s, refreshing the local
//!   IP and timestamp each tick.
//! - **Data loop** (default port 2243): feeds every datagram to the
//!   [`RelaySession`], sends the literal acknowledgment for handshakes, and
//!   logs rejected lengths.
//!
//! Failing to *bind* either port is the one fatal startup error the server
//! has; everything afterwards is best-effort.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use padlink_core::discovery::{
    is_discovery_request, DeviceInfo, BROADCAST_INTERVAL_SECS, DESCRIPTOR_ACK,
};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::application::relay::{DeviceSink, Disposition, RelaySession};

/// Error type for socket setup.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// A required UDP port could not be bound — the fatal startup case.
    #[error("failed to bind UDP socket on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Binds one of the server's UDP ports on all interfaces.
///
/// # Errors
///
/// Returns [`NetworkError::BindFailed`] when the port is unavailable.
pub async fn bind_port(port: u16) -> Result<UdpSocket, NetworkError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    UdpSocket::bind(addr)
        .await
        .map_err(|source| NetworkError::BindFailed { addr, source })
}

/// Determines the local IPv4 address peers can reach us at.
///
/// Uses the routing-probe idiom: "connecting" a UDP socket selects the
/// outbound interface without sending a packet.  Falls back to loopback
/// when no route exists.
pub fn local_ip() -> String {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| s.connect("8.8.8.8:80").map(|()| s))
        .and_then(|s| s.local_addr());
    match probe {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => "127.0.0.1".to_string(),
    }
}

/// The current Unix timestamp in seconds.
fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Builds the announcement body with a fresh address and timestamp.
fn announcement(device_name: &str) -> DeviceInfo {
    DeviceInfo {
        ip: local_ip(),
        device_name: device_name.to_string(),
        timestamp: now_unix(),
    }
}

// ── Discovery responder ───────────────────────────────────────────────────────

/// Answers discovery requests until `running` clears.
pub async fn run_discovery_responder(
    socket: Arc<UdpSocket>,
    device_name: String,
    running: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; 1024];
    info!("discovery responder listening");
    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    warn!("discovery recv error: {e}");
                }
                continue;
            }
        };
        if !is_discovery_request(&buf[..len]) {
            debug!("non-discovery datagram from {src}, ignored");
            continue;
        }
        match serde_json::to_vec(&announcement(&device_name)) {
            Ok(reply) => {
                if let Err(e) = socket.send_to(&reply, src).await {
                    warn!("failed to answer discovery from {src}: {e}");
                } else {
                    debug!("sent device info to {src}");
                }
            }
            Err(e) => warn!("failed to serialize device info: {e}"),
        }
    }
    info!("discovery responder stopped");
}

// ── Active broadcaster ────────────────────────────────────────────────────────

/// Announces the server's presence to the subnet while no client is
/// delivering input.  Each tick also applies the silence policy to the
/// session.
pub async fn run_broadcaster<S: DeviceSink>(
    socket: Arc<UdpSocket>,
    session: Arc<Mutex<RelaySession<S>>>,
    device_name: String,
    broadcast_port: u16,
    running: Arc<AtomicBool>,
) {
    if let Err(e) = socket.set_broadcast(true) {
        warn!("enabling broadcast failed: {e}");
    }
    let target = SocketAddr::from((Ipv4Addr::BROADCAST, broadcast_port));
    let mut interval = tokio::time::interval(Duration::from_secs(BROADCAST_INTERVAL_SECS));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while running.load(Ordering::Relaxed) {
        interval.tick().await;

        let should_announce = {
            let mut session = lock(&session);
            session.check_liveness(Instant::now());
            !session.is_connected()
        };
        if !should_announce {
            continue;
        }

        match serde_json::to_vec(&announcement(&device_name)) {
            Ok(payload) => {
                if let Err(e) = socket.send_to(&payload, target).await {
                    warn!("broadcast failed: {e}");
                } else {
                    debug!("broadcast announcement sent");
                }
            }
            Err(e) => warn!("failed to serialize announcement: {e}"),
        }
    }
    info!("broadcaster stopped");
}

// ── Data loop ─────────────────────────────────────────────────────────────────

/// Drives the relay session from the data port until `running` clears.
pub async fn run_data_loop<S: DeviceSink>(
    socket: Arc<UdpSocket>,
    session: Arc<Mutex<RelaySession<S>>>,
    running: Arc<AtomicBool>,
) {
    // Descriptors dominate the datagram size; 8 KiB leaves generous room.
    let mut buf = vec![0u8; 8192];
    info!("report relay listening");
    while running.load(Ordering::Relaxed) {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                if running.load(Ordering::Relaxed) {
                    warn!("data recv error: {e}");
                }
                continue;
            }
        };

        let disposition = lock(&session).handle_datagram(&buf[..len], Instant::now());
        match disposition {
            Disposition::AckHandshake => {
                if let Err(e) = socket.send_to(DESCRIPTOR_ACK, src).await {
                    warn!("failed to send descriptor acknowledgment to {src}: {e}");
                } else {
                    info!("descriptor acknowledged to {src}");
                }
            }
            Disposition::ReportAccepted => {}
            Disposition::Rejected => {
                warn!("received {len} bytes from {src}, expected 8, 10 or a descriptor");
            }
        }
    }
    info!("report relay stopped");
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
