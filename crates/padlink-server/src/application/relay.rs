//! The relay session: classifies inbound datagrams, gates device creation,
//! and tracks client liveness.
//!
//! The network loops own the sockets; this state machine owns the decisions.
//! It is deliberately free of I/O so the whole protocol surface — handshake
//! gating, create-once semantics, verbatim forwarding, the 5-second silence
//! policy — is testable against a recording [`DeviceSink`].
//!
//! # Datagram classification
//!
//! A data-port datagram is one of three things:
//!
//! - A **descriptor handshake**: the 4-byte magic followed by descriptor
//!   bytes.  Always acknowledged.  The kernel device is created on the
//!   *first* handshake only — clients re-handshake after reconnects and the
//!   device must survive that.
//! - A **report**: exactly 8 or 10 bytes, no magic.  Forwarded verbatim,
//!   leading report-id byte included, into the kernel device.
//! - **Anything else**: logged and dropped at the boundary.

use std::time::{Duration, Instant};

use padlink_core::discovery::{descriptor_payload, SILENCE_TIMEOUT_SECS};
use padlink_core::uhid::UhidError;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from the kernel-device sink.
#[derive(Debug, Error)]
pub enum DeviceSinkError {
    /// Writing to the kernel interface failed.
    #[error("kernel interface error: {0}")]
    Io(#[from] std::io::Error),
    /// The event could not be constructed.
    #[error(transparent)]
    Encoding(#[from] UhidError),
}

/// The kernel virtual-device handle as the session sees it.
///
/// Implemented over `/dev/uhid` in the infrastructure layer and by
/// recording fakes in tests.
pub trait DeviceSink: Send {
    /// Issues the device-creation command embedding `descriptor`.
    fn create_device(&mut self, descriptor: &[u8]) -> Result<(), DeviceSinkError>;

    /// Forwards one report verbatim (report-id byte included).
    fn forward_report(&mut self, report: &[u8]) -> Result<(), DeviceSinkError>;

    /// Issues the device-destroy command.
    fn destroy_device(&mut self) -> Result<(), DeviceSinkError>;
}

/// What the network loop should do with the datagram it just handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Reply with the literal acknowledgment string.
    AckHandshake,
    /// Report consumed (forwarded, or dropped because no device exists yet).
    ReportAccepted,
    /// Wrong length and no magic: drop.
    Rejected,
}

/// Valid report datagram lengths: the 4-axis compatibility layout and the
/// 6-axis layout.
const REPORT_LENGTHS: [usize; 2] = [8, 10];

/// Per-client session state of the relay.
pub struct RelaySession<S: DeviceSink> {
    /// `None` when the kernel interface could not be provisioned — the
    /// server then runs degraded: discovery and handshakes still work.
    sink: Option<S>,
    device_created: bool,
    descriptor: Option<Vec<u8>>,
    connected: bool,
    last_input: Option<Instant>,
    silence_timeout: Duration,
}

impl<S: DeviceSink> RelaySession<S> {
    pub fn new(sink: Option<S>) -> Self {
        Self::with_silence_timeout(sink, Duration::from_secs(SILENCE_TIMEOUT_SECS))
    }

    pub fn with_silence_timeout(sink: Option<S>, silence_timeout: Duration) -> Self {
        Self {
            sink,
            device_created: false,
            descriptor: None,
            connected: false,
            last_input: None,
            silence_timeout,
        }
    }

    /// Classifies and processes one data-port datagram.
    pub fn handle_datagram(&mut self, data: &[u8], now: Instant) -> Disposition {
        if let Some(descriptor) = descriptor_payload(data) {
            self.handle_handshake(descriptor);
            return Disposition::AckHandshake;
        }
        if REPORT_LENGTHS.contains(&data.len()) {
            self.handle_report(data, now);
            return Disposition::ReportAccepted;
        }
        Disposition::Rejected
    }

    fn handle_handshake(&mut self, descriptor: &[u8]) {
        info!("received HID descriptor ({} bytes)", descriptor.len());
        self.descriptor = Some(descriptor.to_vec());

        match (&mut self.sink, self.device_created) {
            (Some(sink), false) => match sink.create_device(descriptor) {
                Ok(()) => {
                    info!("virtual device created");
                    self.device_created = true;
                }
                Err(e) => warn!("virtual device creation failed: {e}"),
            },
            (Some(_), true) => debug!("device already created, handshake re-acknowledged"),
            (None, _) => warn!("kernel interface unavailable, handshake acknowledged only"),
        }
    }

    fn handle_report(&mut self, report: &[u8], now: Instant) {
        self.last_input = Some(now);
        if !self.connected {
            self.connected = true;
            info!("client connected");
        }

        match (&mut self.sink, self.device_created) {
            (Some(sink), true) => {
                if let Err(e) = sink.forward_report(report) {
                    warn!("report forward failed: {e}");
                }
            }
            (Some(_), false) => debug!("report before device creation, ignored"),
            (None, _) => debug!("report with no kernel interface, ignored"),
        }
    }

    /// Applies the silence policy.  Returns `true` when the session just
    /// transitioned to disconnected (the caller resumes broadcasting).
    pub fn check_liveness(&mut self, now: Instant) -> bool {
        if !self.connected {
            return false;
        }
        let silent = self
            .last_input
            .map_or(true, |t| now.duration_since(t) > self.silence_timeout);
        if silent {
            self.connected = false;
            warn!("connection timeout, resuming broadcast");
            return true;
        }
        false
    }

    /// Whether any well-formed report arrived within the silence window.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the kernel device exists.
    pub fn device_created(&self) -> bool {
        self.device_created
    }

    /// The descriptor from the last handshake, if any.
    pub fn descriptor(&self) -> Option<&[u8]> {
        self.descriptor.as_deref()
    }

    /// Destroys the kernel device if one was created.  Called once at
    /// shutdown, before the handle is closed.
    pub fn shutdown(&mut self) {
        if self.device_created {
            if let Some(sink) = &mut self.sink {
                match sink.destroy_device() {
                    Ok(()) => info!("virtual device destroyed"),
                    Err(e) => warn!("virtual device destroy failed: {e}"),
                }
            }
            self.device_created = false;
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
