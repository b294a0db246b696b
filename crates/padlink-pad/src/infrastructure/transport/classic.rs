//! Classic HID-device-profile transport.
//!
//! The handheld registers itself with the platform's HID device profile as a
//! gamepad, then sends interrupt-channel reports to whichever bonded peers
//! the profile reports as connected.  The platform owns pairing and the
//! actual radio link; this module owns the registration lifecycle and the
//! report fan-out.
//!
//! # State machine
//!
//! ```text
//! Uninitialized → Registering → Idle/Advertising ↔ Connected(per peer)
//!                      ↑                                   │
//!                      └──────── Unregistering ←───────────┘
//! ```
//!
//! Registration is asynchronous: `register_app` only submits the request,
//! and the outcome arrives later as a [`ProfileEvent::AppStatusChanged`]
//! callback.  The platform may also *revoke* the handle at any time (screen
//! lock is the classic case); a periodic resume check re-registers whenever
//! the service believes it should be active but the handle is gone.
//!
//! # Callback serialization
//!
//! Platform callbacks arrive on arbitrary threads.  Every callback is
//! posted as a [`ProfileEvent`] onto one `mpsc` queue and drained by a
//! single task, so callbacks and application-driven sends never mutate the
//! transport state concurrently — the shared fields sit behind one mutex
//! with no lock ordering to get wrong.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use padlink_core::descriptor::WIRELESS_REPORT_DESCRIPTOR;
use padlink_core::discovery::DeviceDescriptor;
use padlink_core::report::REPORT_ID;
use padlink_core::{ConnectionState, ReportVariant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::transport::{Transport, TransportError};

/// Resend period of the last report while at least one peer is connected.
/// Hosts drop idle interrupt channels; staying under 100ms keeps them warm.
const KEEPALIVE_PERIOD: Duration = Duration::from_millis(75);

/// Period of the handle-revocation resume check.
const RESUME_CHECK_PERIOD: Duration = Duration::from_secs(1);

/// HID minor device class for a gamepad, used in the SDP record.
const SUBCLASS_GAMEPAD: u8 = 0x08;

/// Device-class hint requested while discoverable: peripheral major class,
/// gamepad minor class.
const DEVICE_CLASS_GAMEPAD: u32 = 0x0000_0508;

// ── Platform seam ─────────────────────────────────────────────────────────────

/// Errors reported by the platform HID profile.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The profile handle is not (or no longer) available.
    #[error("profile handle unavailable")]
    HandleUnavailable,
    /// Any other platform-side failure.
    #[error("platform profile error: {0}")]
    Platform(String),
}

/// The SDP record describing this device to the peer during registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpRecord {
    pub name: String,
    pub description: String,
    pub provider: String,
    /// HID minor device class advertised to the peer.
    pub subclass: u8,
    /// HID report descriptor embedded in the record.
    pub descriptor: Vec<u8>,
}

impl SdpRecord {
    /// The gamepad record used by this transport.
    pub fn gamepad(device_name: &str) -> Self {
        Self {
            name: device_name.to_string(),
            description: "PadLink virtual gamepad".to_string(),
            provider: "PadLink".to_string(),
            subclass: SUBCLASS_GAMEPAD,
            descriptor: WIRELESS_REPORT_DESCRIPTOR.to_vec(),
        }
    }
}

/// Quality-of-service parameters requested at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QosSettings {
    /// 1 = best effort, 2 = guaranteed.
    pub service_type: u8,
    /// Token rate in bytes/second.
    pub token_rate: u32,
    /// Token bucket size in bytes.
    pub token_bucket_size: u32,
    /// Peak bandwidth in bytes/second (0 = unspecified).
    pub peak_bandwidth: u32,
    /// Acceptable latency in microseconds.
    pub latency_us: u32,
    /// Acceptable delay variation in microseconds.
    pub delay_variation_us: u32,
}

impl QosSettings {
    /// Latency-favouring settings for input reports: small packets, 11.25ms
    /// target latency.
    pub fn low_latency() -> Self {
        Self {
            service_type: 1,
            token_rate: 800,
            token_bucket_size: 9,
            peak_bandwidth: 0,
            latency_us: 11_250,
            delay_variation_us: u32::MAX,
        }
    }
}

/// Link state of one peer as reported by the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Callback events the platform posts onto the transport's queue.
#[derive(Debug, Clone)]
pub enum ProfileEvent {
    /// Registration outcome, and later revocations: `registered == false`
    /// with active intent means the platform took the handle away.
    AppStatusChanged { registered: bool },
    /// A peer's profile-level link state changed.
    ConnectionChanged {
        address: String,
        state: PeerLinkState,
    },
}

/// The platform HID-device-profile facility.
///
/// Implementations submit requests to the OS and deliver their callbacks as
/// [`ProfileEvent`]s on the sender handed to
/// [`HidDeviceProfile::register_app`].  All methods are non-blocking
/// submissions.
pub trait HidDeviceProfile: Send + Sync {
    /// Registers the app with the profile.  The outcome arrives as an
    /// `AppStatusChanged` event on `events`.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] when the request itself cannot be submitted.
    fn register_app(
        &self,
        record: &SdpRecord,
        qos: &QosSettings,
        events: mpsc::UnboundedSender<ProfileEvent>,
    ) -> Result<(), ProfileError>;

    /// Unregisters the app; best-effort.
    fn unregister_app(&self) -> Result<(), ProfileError>;

    /// Whether the platform still holds our registration.  May flip to
    /// `false` without any callback when the handle is revoked.
    fn has_handle(&self) -> bool;

    /// Requests a profile-level connection to a bonded peer.
    fn connect(&self, address: &str) -> Result<(), ProfileError>;

    /// Requests a profile-level disconnect.
    fn disconnect(&self, address: &str) -> Result<(), ProfileError>;

    /// Sends one interrupt-channel report.  Fire-and-forget; the return
    /// value only reflects submission.
    fn send_report(&self, address: &str, report_id: u8, data: &[u8]) -> bool;

    /// Peers the profile currently reports as connected.
    fn connected_peers(&self) -> Vec<String>;

    /// Previously bonded peers, for the device picker.
    fn bonded_peers(&self) -> Vec<DeviceDescriptor>;

    /// Best-effort adjustment of the discovery-time device-class hint so
    /// hosts list the handheld as a gamepad while pairing.  Platforms that
    /// forbid this silently refuse; failure is never an error.
    fn request_device_class_hint(&self, _device_class: u32) -> bool {
        false
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ClassicShared {
    /// The service's intent: `true` between initialize and shutdown.  The
    /// resume check compares this against `profile.has_handle()`.
    should_be_registered: bool,
    /// Whether the platform currently confirms our registration.
    registered: bool,
    /// Peers the profile reports as connected.
    connected: Vec<String>,
    /// Last report queued, resent by the keepalive tick.
    last_report: Option<Vec<u8>>,
}

/// State and logic shared between the public transport object and its
/// background tasks.
struct Inner {
    profile: Arc<dyn HidDeviceProfile>,
    device_name: String,
    shared: Mutex<ClassicShared>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::UnboundedSender<ProfileEvent>,
}

impl Inner {
    /// Applies one callback event to the transport state.  Runs on the
    /// single pump task; tests call it directly.
    fn handle_event(&self, event: ProfileEvent) {
        match event {
            ProfileEvent::AppStatusChanged { registered } => {
                let state = {
                    let mut shared = lock(&self.shared);
                    shared.registered = registered;
                    if registered {
                        info!("HID profile registration confirmed");
                        if shared.connected.is_empty() {
                            ConnectionState::Discovering
                        } else {
                            ConnectionState::Connected
                        }
                    } else {
                        shared.connected.clear();
                        if shared.should_be_registered {
                            warn!("HID profile handle revoked by platform");
                        }
                        ConnectionState::Disconnected
                    }
                };
                self.state_tx.send_replace(state);
            }
            ProfileEvent::ConnectionChanged { address, state } => {
                debug!("peer {address}: link state {state:?}");
                let published = {
                    let mut shared = lock(&self.shared);
                    match state {
                        PeerLinkState::Connected => {
                            if !shared.connected.contains(&address) {
                                shared.connected.push(address);
                            }
                            ConnectionState::Connected
                        }
                        PeerLinkState::Connecting => ConnectionState::Connecting,
                        PeerLinkState::Disconnected | PeerLinkState::Disconnecting => {
                            shared.connected.retain(|a| a != &address);
                            if !shared.connected.is_empty() {
                                ConnectionState::Connected
                            } else if shared.registered {
                                ConnectionState::Discovering
                            } else {
                                ConnectionState::Disconnected
                            }
                        }
                    }
                };
                self.state_tx.send_replace(published);
            }
        }
    }

    /// One resume-check tick: re-register when the platform dropped our
    /// handle while the service still wants to be active.
    fn resume_tick(&self) {
        let needs_reregister = {
            let shared = lock(&self.shared);
            shared.should_be_registered && !self.profile.has_handle()
        };
        if needs_reregister {
            warn!("profile handle absent during resume check; re-registering");
            self.submit_registration();
        }
    }

    /// One keepalive tick: resend the exact bytes of the last report to all
    /// connected peers.
    fn keepalive_tick(&self) {
        let (peers, report) = {
            let shared = lock(&self.shared);
            if !shared.registered || shared.connected.is_empty() {
                return;
            }
            match &shared.last_report {
                Some(r) => (shared.connected.clone(), r.clone()),
                None => return,
            }
        };
        for peer in &peers {
            self.profile.send_report(peer, REPORT_ID, &report);
        }
    }

    fn submit_registration(&self) {
        let record = SdpRecord::gamepad(&self.device_name);
        let qos = QosSettings::low_latency();
        // Optional, best-effort: ask the platform to present us as a gamepad
        // in discovery listings.  May silently no-op.
        self.profile.request_device_class_hint(DEVICE_CLASS_GAMEPAD);
        if let Err(e) = self
            .profile
            .register_app(&record, &qos, self.events_tx.clone())
        {
            warn!("HID profile registration submission failed: {e}");
            self.state_tx.send_replace(ConnectionState::Error);
        }
    }
}

/// The classic-profile transport.
pub struct ClassicHidTransport {
    inner: Arc<Inner>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ProfileEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClassicHidTransport {
    pub fn new(profile: Arc<dyn HidDeviceProfile>, device_name: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                profile,
                device_name: device_name.into(),
                shared: Mutex::new(ClassicShared::default()),
                state_tx,
                events_tx,
            }),
            events_rx: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The sender platform glue uses to post callback events.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ProfileEvent> {
        self.inner.events_tx.clone()
    }

    #[cfg(test)]
    pub(crate) fn handle_event(&self, event: ProfileEvent) {
        self.inner.handle_event(event);
    }

    #[cfg(test)]
    pub(crate) fn resume_tick(&self) {
        self.inner.resume_tick();
    }

    #[cfg(test)]
    pub(crate) fn keepalive_tick(&self) {
        self.inner.keepalive_tick();
    }
}

#[async_trait]
impl Transport for ClassicHidTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        lock(&self.inner.shared).should_be_registered = true;
        self.inner.state_tx.send_replace(ConnectionState::Discovering);

        let mut tasks = lock(&self.tasks);

        // Pump: serialize all platform callbacks onto this one task.
        if let Some(mut rx) = lock(&self.events_rx).take() {
            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    inner.handle_event(event);
                }
            }));
        }

        self.inner.submit_registration();

        // Keepalive and resume timers; both cancelable via shutdown, and a
        // cancellation racing an in-flight tick is harmless since resends
        // are idempotent.
        tasks.push(spawn_tick(&self.inner, KEEPALIVE_PERIOD, Inner::keepalive_tick));
        tasks.push(spawn_tick(&self.inner, RESUME_CHECK_PERIOD, Inner::resume_tick));
        Ok(())
    }

    async fn shutdown(&self) {
        {
            let mut shared = lock(&self.inner.shared);
            shared.should_be_registered = false;
            shared.registered = false;
            shared.connected.clear();
            shared.last_report = None;
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        if let Err(e) = self.inner.profile.unregister_app() {
            debug!("unregister_app during shutdown: {e}");
        }
        self.inner.state_tx.send_replace(ConnectionState::Disconnected);
        info!("classic transport stopped");
    }

    async fn discover(&self, _window: Duration) -> Vec<DeviceDescriptor> {
        // No active sweep on this transport: pairing happens in the platform
        // settings, so the picker lists the already-bonded peers.
        self.inner.profile.bonded_peers()
    }

    async fn connect(&self, address: &str) -> bool {
        if !lock(&self.inner.shared).registered {
            // Callers are expected to check connection_state() first.
            warn!("connect({address}) ignored: profile handle unavailable");
            return false;
        }
        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        match self.inner.profile.connect(address) {
            Ok(()) => true,
            Err(e) => {
                warn!("profile connect({address}) failed: {e}");
                false
            }
        }
    }

    async fn disconnect(&self, address: &str) {
        if !lock(&self.inner.shared).registered {
            warn!("disconnect({address}) ignored: profile handle unavailable");
            return;
        }
        if let Err(e) = self.inner.profile.disconnect(address) {
            warn!("profile disconnect({address}) failed: {e}");
        }
    }

    fn send_report(&self, report: &[u8]) {
        let peers = {
            let mut shared = lock(&self.inner.shared);
            shared.last_report = Some(report.to_vec());
            if !shared.registered || shared.connected.is_empty() {
                return; // zero connected peers: nothing to send to
            }
            shared.connected.clone()
        };
        for peer in &peers {
            self.inner.profile.send_report(peer, REPORT_ID, report);
        }
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    fn report_variant(&self) -> ReportVariant {
        ReportVariant::Compact
    }

    fn supports_paired_device_list(&self) -> bool {
        true
    }
}

/// Spawns a cancelable periodic tick calling `tick` on the shared core.
fn spawn_tick(
    inner: &Arc<Inner>,
    period: Duration,
    tick: fn(&Inner),
) -> JoinHandle<()> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            tick(&inner);
        }
    })
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
