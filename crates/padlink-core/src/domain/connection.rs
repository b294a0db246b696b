//! The connection-state vocabulary shared by all transports.
//!
//! Each transport runs its own richer internal state machine (profile
//! registration, advertising, bonding, handshaking); what it exposes upward
//! is this five-state summary.  The connection manager re-publishes the
//! active transport's state to the UI layer without translation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transport connection state as observed by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not initialized, or cleanly torn down.
    #[default]
    Disconnected,
    /// Actively looking for peers: UDP discovery in flight, or advertising /
    /// waiting for a profile-level connection on the wireless transports.
    Discovering,
    /// A specific peer connection attempt (or pairing handshake) is in
    /// progress.
    Connecting,
    /// Reports are deliverable to at least one peer.
    Connected,
    /// A transient transport error was observed.  Never terminal: the
    /// transport keeps running and may leave this state on its own.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Bonding state of an encrypted-link peer.
///
/// Created on the first connection attempt and cleared on disconnect.  Only
/// the encrypted-link transport tracks this; the paired-profile transport
/// talks exclusively to already-bonded peers, and UDP has no bonding at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BondState {
    /// No long-term keys exchanged with the peer.
    #[default]
    None,
    /// The platform pairing handshake is in flight.
    Bonding,
    /// Long-term keys exist; the link can be encrypted.
    Bonded,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
