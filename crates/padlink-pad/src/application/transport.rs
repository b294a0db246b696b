//! The transport contract implemented by all three report delivery paths.
//!
//! A transport owns one pairing/connection state machine and one wire
//! format.  The connection manager holds exactly one transport at a time and
//! drives it exclusively through this trait — it never inspects the concrete
//! type.  Where transports genuinely differ in capability (the classic
//! profile can list bonded peers, UDP can sweep the subnet), the difference
//! is expressed as a capability query, not a downcast.
//!
//! # Send-path contract
//!
//! [`Transport::send_report`] is called from the input-sampling loop and
//! must never block: implementations enqueue or fire-and-forget.  Delivery
//! failures are logged and surfaced through the connection-state channel;
//! they are never returned to the sampling caller.

use std::time::Duration;

use async_trait::async_trait;
use padlink_core::discovery::DeviceDescriptor;
use padlink_core::{ConnectionState, ReportVariant};
use thiserror::Error;
use tokio::sync::watch;

/// Errors surfaced by transport lifecycle operations.
///
/// Only `initialize` reports errors to the caller; everything on the data
/// path is best-effort.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The platform facility backing the transport could not be acquired.
    #[error("transport initialization failed: {0}")]
    Initialize(String),
    /// The operation is not supported by this transport (see the capability
    /// queries before calling).
    #[error("operation not supported by this transport")]
    NotSupported,
}

/// The contract shared by the classic-profile, encrypted-link, and UDP
/// transports.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Brings the transport up: registers with the platform profile, starts
    /// advertising, or binds sockets.  Implementations whose platform
    /// reports the outcome via callback resolve this once the callback
    /// arrives or the request was handed off.
    async fn initialize(&self) -> Result<(), TransportError>;

    /// Tears the transport down, releasing platform handles and cancelling
    /// timers.  Best-effort: errors are logged, never returned.
    async fn shutdown(&self);

    /// Sweeps for reachable peers over a bounded window and returns the
    /// deduplicated result.  Never blocks beyond `window`.
    ///
    /// Transports without a discovery mechanism return their known-peers
    /// list (see [`Transport::supports_discovery`]).
    async fn discover(&self, window: Duration) -> Vec<DeviceDescriptor>;

    /// Attempts to connect to the peer with the given address.  Returns
    /// `false` when the attempt fails or the transport is not ready; no
    /// partial state is retained on failure.
    async fn connect(&self, address: &str) -> bool;

    /// Requests disconnection from the peer.  A logged no-op when the peer
    /// is unknown or the transport is not ready.
    async fn disconnect(&self, address: &str);

    /// Queues one encoded report for delivery.  Non-blocking,
    /// fire-and-forget; a no-op when no peer can currently receive.
    fn send_report(&self, report: &[u8]);

    /// The connection-state channel this transport publishes on.
    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    /// The report layout peers of this transport expect.
    fn report_variant(&self) -> ReportVariant;

    /// Whether [`Transport::discover`] returns the platform's bonded-peer
    /// list rather than performing an active sweep.
    fn supports_paired_device_list(&self) -> bool {
        false
    }

    /// Whether [`Transport::discover`] performs an active network sweep.
    fn supports_discovery(&self) -> bool {
        false
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // A minimal transport used to pin down the trait's default capability
    // answers and object safety.
    struct NullTransport {
        state: watch::Sender<ConnectionState>,
    }

    impl NullTransport {
        fn new() -> Self {
            let (state, _) = watch::channel(ConnectionState::Disconnected);
            Self { state }
        }
    }

    #[async_trait]
    impl Transport for NullTransport {
        async fn initialize(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn shutdown(&self) {}
        async fn discover(&self, _window: Duration) -> Vec<DeviceDescriptor> {
            Vec::new()
        }
        async fn connect(&self, _address: &str) -> bool {
            false
        }
        async fn disconnect(&self, _address: &str) {}
        fn send_report(&self, _report: &[u8]) {}
        fn connection_state(&self) -> watch::Receiver<ConnectionState> {
            self.state.subscribe()
        }
        fn report_variant(&self) -> ReportVariant {
            ReportVariant::Compact
        }
    }

    #[tokio::test]
    async fn test_trait_is_object_safe_and_defaults_deny_capabilities() {
        let transport: std::sync::Arc<dyn Transport> = std::sync::Arc::new(NullTransport::new());
        assert!(!transport.supports_paired_device_list());
        assert!(!transport.supports_discovery());
        assert!(transport.initialize().await.is_ok());
        assert_eq!(
            *transport.connection_state().borrow(),
            ConnectionState::Disconnected
        );
    }
}
