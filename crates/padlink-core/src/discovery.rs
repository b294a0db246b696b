//! Discovery and handshake wire format shared by the UDP transport and the
//! virtual-device server.
//!
//! Two fixed UDP ports are used (defaults below):
//!
//! - **Discovery (2242)** — a client broadcasts the ASCII request
//!   `"discover"`; any listening server replies with its [`DeviceInfo`] as
//!   JSON.  Servers additionally self-broadcast the same JSON to the subnet
//!   every two seconds while unconnected.
//! - **Data (2243)** — a client opens the path with the descriptor
//!   handshake `"DESC" + <descriptor bytes>` and expects the literal reply
//!   `"DESC_OK"`; afterwards raw report datagrams flow on the same socket.
//!
//! Everything in this module is pure data and parsing — the sockets live in
//! the application crates.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── Ports and timing ──────────────────────────────────────────────────────────

/// Default UDP port for discovery requests and self-broadcasts.
pub const DISCOVERY_PORT: u16 = 2242;

/// Default UDP port for the descriptor handshake and report relay.
pub const DATA_PORT: u16 = 2243;

/// Interval between server self-broadcasts while unconnected.
pub const BROADCAST_INTERVAL_SECS: u64 = 2;

/// Input silence after which the server considers the client gone and
/// resumes broadcasting.
pub const SILENCE_TIMEOUT_SECS: u64 = 5;

/// Bounded window a client-side discovery sweep collects replies for, and
/// the limit on waiting for the descriptor acknowledgment.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;

/// Interval of the client-side liveness poll on an established data path.
pub const LIVENESS_INTERVAL_SECS: u64 = 2;

// ── Wire tokens ───────────────────────────────────────────────────────────────

/// The ASCII discovery request body (matched case-insensitively).
pub const DISCOVER_REQUEST: &str = "discover";

/// Any payload containing this token is also treated as a discovery request.
pub const DEVICE_INFO_TOKEN: &str = "device_info";

/// Magic prefix of the descriptor handshake packet.
pub const DESCRIPTOR_MAGIC: &[u8; 4] = b"DESC";

/// Literal acknowledgment the server sends for every descriptor handshake.
pub const DESCRIPTOR_ACK: &[u8] = b"DESC_OK";

/// Returns `true` if `payload` is a discovery request: the exact word
/// `discover` (any case, surrounding whitespace ignored) or anything
/// containing the `device_info` token.
pub fn is_discovery_request(payload: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(payload) else {
        return false;
    };
    text.trim().eq_ignore_ascii_case(DISCOVER_REQUEST) || text.contains(DEVICE_INFO_TOKEN)
}

/// Splits a data-port datagram into its descriptor payload if it carries the
/// handshake magic.  Returns `None` for anything else (report datagrams are
/// distinguished by length and the absence of the magic).
pub fn descriptor_payload(datagram: &[u8]) -> Option<&[u8]> {
    if datagram.len() > DESCRIPTOR_MAGIC.len() && datagram.starts_with(DESCRIPTOR_MAGIC) {
        Some(&datagram[DESCRIPTOR_MAGIC.len()..])
    } else {
        None
    }
}

// ── Device announcements ──────────────────────────────────────────────────────

/// The JSON body of a discovery reply or self-broadcast.
///
/// The field names are the wire contract; do not rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// IPv4 address the server is reachable at.
    pub ip: String,
    /// Human-readable device name to show in the picker.
    pub device_name: String,
    /// Unix seconds at which this announcement was produced.  Newer
    /// announcements supersede older ones for the same address.
    pub timestamp: i64,
}

/// A discovered peer, as surfaced to the UI layer.
///
/// Identity is the address: for UDP peers the IPv4 string, for wireless
/// peers the platform device address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Peer address; the dedup key.
    pub address: String,
    /// Display name.
    pub name: String,
    /// Unix seconds of the most recent announcement.
    pub timestamp: i64,
}

impl From<DeviceInfo> for DeviceDescriptor {
    fn from(info: DeviceInfo) -> Self {
        Self {
            address: info.ip,
            name: info.device_name,
            timestamp: info.timestamp,
        }
    }
}

/// Accumulates discovery responses over a sweep, deduplicating by address.
///
/// Two announcements from the same address collapse to one entry; the newer
/// timestamp wins (equal timestamps keep the latest announcement, which may
/// have a changed name).
#[derive(Debug, Default)]
pub struct DiscoveredDevices {
    devices: HashMap<String, DeviceDescriptor>,
}

impl DiscoveredDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one announcement into the set.  Returns `true` if the set
    /// changed (new address, or a newer announcement for a known one).
    pub fn merge(&mut self, device: DeviceDescriptor) -> bool {
        match self.devices.get(&device.address) {
            Some(existing) if existing.timestamp > device.timestamp => false,
            _ => {
                self.devices.insert(device.address.clone(), device);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Consumes the set, returning entries sorted by address for a stable
    /// picker order.
    pub fn into_sorted_vec(self) -> Vec<DeviceDescriptor> {
        let mut v: Vec<_> = self.devices.into_values().collect();
        v.sort_by(|a, b| a.address.cmp(&b.address));
        v
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
