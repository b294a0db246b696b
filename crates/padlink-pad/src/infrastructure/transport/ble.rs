//! Encrypted-link HID transport: a peripheral-role GATT service set.
//!
//! The handheld runs as a connectable peripheral exposing the four standard
//! capability groups a HID-over-GATT gamepad needs: generic access (name and
//! gamepad appearance), the HID service itself (information, report map,
//! control point, protocol mode, and the input report with change
//! notification), device information, and battery.
//!
//! Every HID-related characteristic demands an encrypted link.  That single
//! requirement is what forces pairing: the host cannot even read the report
//! map, let alone subscribe to input reports, before the platform has
//! completed its bonding handshake.
//!
//! # State machine
//!
//! ```text
//! Idle → Advertising → Connected/Unbonded → Bonded → Ready
//!   ↑         ↑              (pairing)    (subscribed)  │
//!   └─────────┴────────────── disconnect ───────────────┘
//! ```
//!
//! Bonding-state changes and subscription changes arrive as *independent*
//! platform events, in either order.  The upward-facing `Connected` state is
//! published only once both hold, and [`Transport::send_report`] re-checks
//! both predicates on every call — the platform silently drops notifications
//! to unsubscribed or unbonded peers, so sending earlier would only feign
//! progress.
//!
//! Advertising-start failures (already started, payload too large, feature
//! unsupported, internal error, too many advertisers) are all non-fatal:
//! they map to the `Error` state and the transport keeps running.  The
//! payload-too-large case is mitigated structurally — the advertisement
//! carries only the 16-bit HID service identifier, never the descriptor.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use padlink_core::descriptor::WIRELESS_REPORT_DESCRIPTOR;
use padlink_core::discovery::DeviceDescriptor;
use padlink_core::{BondState, ConnectionState, LogicalInputState, ReportVariant};
use padlink_core::{encode_report, TriggerPolicy};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::transport::{Transport, TransportError};

/// Resend period of the last report while the link is Ready.
const KEEPALIVE_PERIOD: Duration = Duration::from_millis(75);

/// Default battery level reported until the platform supplies a reading.
const DEFAULT_BATTERY_LEVEL: u8 = 100;

// ── Standard identifiers ──────────────────────────────────────────────────────

/// 16-bit assigned numbers for the services, characteristics, and
/// descriptors this transport exposes.
pub mod uuids {
    pub const GENERIC_ACCESS_SERVICE: u16 = 0x1800;
    pub const DEVICE_NAME: u16 = 0x2A00;
    pub const APPEARANCE: u16 = 0x2A01;

    pub const HID_SERVICE: u16 = 0x1812;
    pub const HID_INFORMATION: u16 = 0x2A4A;
    pub const REPORT_MAP: u16 = 0x2A4B;
    pub const HID_CONTROL_POINT: u16 = 0x2A4C;
    pub const REPORT: u16 = 0x2A4D;
    pub const PROTOCOL_MODE: u16 = 0x2A4E;

    pub const DEVICE_INFORMATION_SERVICE: u16 = 0x180A;
    pub const MANUFACTURER_NAME: u16 = 0x2A29;
    pub const PNP_ID: u16 = 0x2A50;

    pub const BATTERY_SERVICE: u16 = 0x180F;
    pub const BATTERY_LEVEL: u16 = 0x2A19;

    pub const CLIENT_CHARACTERISTIC_CONFIG: u16 = 0x2902;
    pub const REPORT_REFERENCE: u16 = 0x2908;

    /// Appearance value signalling "gamepad" to scanners.
    pub const APPEARANCE_GAMEPAD: u16 = 0x03C4;
}

/// Characteristic property bits (GATT).
pub mod props {
    pub const READ: u8 = 0x02;
    pub const WRITE_NO_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
}

/// Attribute permission bits.  The `_ENCRYPTED` variants are what force the
/// pairing handshake before access.
pub mod perms {
    pub const READ: u8 = 0x01;
    pub const READ_ENCRYPTED: u8 = 0x02;
    pub const WRITE: u8 = 0x10;
    pub const WRITE_ENCRYPTED: u8 = 0x20;
}

// ── GATT table model ──────────────────────────────────────────────────────────

/// A descriptor attached to a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattDescriptor {
    pub uuid: u16,
    pub permissions: u8,
}

/// One characteristic in the published table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: u16,
    pub properties: u8,
    pub permissions: u8,
    pub descriptors: Vec<GattDescriptor>,
}

/// One service group in the published table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: u16,
    pub characteristics: Vec<GattCharacteristic>,
}

/// Builds the four capability groups.  The report-map characteristic serves
/// the 4-axis descriptor; its bytes never appear in the advertisement.
pub fn build_gatt_services() -> Vec<GattService> {
    vec![
        GattService {
            uuid: uuids::GENERIC_ACCESS_SERVICE,
            characteristics: vec![
                GattCharacteristic {
                    uuid: uuids::DEVICE_NAME,
                    properties: props::READ,
                    permissions: perms::READ,
                    descriptors: Vec::new(),
                },
                GattCharacteristic {
                    uuid: uuids::APPEARANCE,
                    properties: props::READ,
                    permissions: perms::READ,
                    descriptors: Vec::new(),
                },
            ],
        },
        GattService {
            uuid: uuids::HID_SERVICE,
            characteristics: vec![
                GattCharacteristic {
                    uuid: uuids::HID_INFORMATION,
                    properties: props::READ,
                    permissions: perms::READ_ENCRYPTED,
                    descriptors: Vec::new(),
                },
                GattCharacteristic {
                    uuid: uuids::REPORT_MAP,
                    properties: props::READ,
                    permissions: perms::READ_ENCRYPTED,
                    descriptors: Vec::new(),
                },
                GattCharacteristic {
                    uuid: uuids::HID_CONTROL_POINT,
                    properties: props::WRITE_NO_RESPONSE,
                    permissions: perms::WRITE_ENCRYPTED,
                    descriptors: Vec::new(),
                },
                GattCharacteristic {
                    uuid: uuids::PROTOCOL_MODE,
                    properties: props::READ | props::WRITE_NO_RESPONSE,
                    permissions: perms::READ_ENCRYPTED | perms::WRITE_ENCRYPTED,
                    descriptors: Vec::new(),
                },
                GattCharacteristic {
                    uuid: uuids::REPORT,
                    properties: props::READ | props::NOTIFY,
                    permissions: perms::READ_ENCRYPTED,
                    descriptors: vec![
                        GattDescriptor {
                            uuid: uuids::CLIENT_CHARACTERISTIC_CONFIG,
                            permissions: perms::READ_ENCRYPTED | perms::WRITE_ENCRYPTED,
                        },
                        GattDescriptor {
                            uuid: uuids::REPORT_REFERENCE,
                            permissions: perms::READ_ENCRYPTED,
                        },
                    ],
                },
            ],
        },
        GattService {
            uuid: uuids::DEVICE_INFORMATION_SERVICE,
            characteristics: vec![
                GattCharacteristic {
                    uuid: uuids::MANUFACTURER_NAME,
                    properties: props::READ,
                    permissions: perms::READ,
                    descriptors: Vec::new(),
                },
                GattCharacteristic {
                    uuid: uuids::PNP_ID,
                    properties: props::READ,
                    permissions: perms::READ,
                    descriptors: Vec::new(),
                },
            ],
        },
        GattService {
            uuid: uuids::BATTERY_SERVICE,
            characteristics: vec![GattCharacteristic {
                uuid: uuids::BATTERY_LEVEL,
                properties: props::READ | props::NOTIFY,
                permissions: perms::READ,
                descriptors: vec![GattDescriptor {
                    uuid: uuids::CLIENT_CHARACTERISTIC_CONFIG,
                    permissions: perms::READ | perms::WRITE,
                }],
            }],
        },
    ]
}

// ── Platform seam ─────────────────────────────────────────────────────────────

/// Non-fatal advertising-start failures reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdvertiseError {
    #[error("advertising already started")]
    AlreadyStarted,
    #[error("advertising payload too large")]
    DataTooLarge,
    #[error("advertising not supported on this platform")]
    FeatureUnsupported,
    #[error("internal advertising error")]
    InternalError,
    #[error("too many concurrent advertisers")]
    TooManyAdvertisers,
}

/// Errors from table publication.
#[derive(Debug, Error)]
pub enum GattError {
    #[error("gatt server unavailable")]
    ServerUnavailable,
    #[error("platform gatt error: {0}")]
    Platform(String),
}

/// Advertising parameters.  Only the service identifier is advertised —
/// never the descriptor — to stay inside the legacy payload limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub service_uuid: u16,
    pub connectable: bool,
    pub include_name: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            service_uuid: uuids::HID_SERVICE,
            connectable: true,
            include_name: true,
        }
    }
}

/// Outcome of a characteristic or descriptor access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    InsufficientEncryption,
    RequestNotSupported,
}

/// Platform callback events, posted onto the transport's single queue.
#[derive(Debug, Clone)]
pub enum GattEvent {
    AdvertisingStarted,
    AdvertisingFailed(AdvertiseError),
    PeerConnected {
        address: String,
    },
    PeerDisconnected {
        address: String,
    },
    BondStateChanged {
        address: String,
        state: BondState,
    },
    /// A central read a characteristic value.
    CharacteristicRead {
        address: String,
        request_id: u32,
        uuid: u16,
    },
    /// A central wrote a characteristic value.
    CharacteristicWrite {
        address: String,
        request_id: u32,
        uuid: u16,
        value: Vec<u8>,
        response_needed: bool,
    },
    /// A central wrote a descriptor (subscription changes arrive here, as
    /// writes to the client characteristic configuration).
    DescriptorWrite {
        address: String,
        request_id: u32,
        characteristic: u16,
        descriptor: u16,
        value: Vec<u8>,
        response_needed: bool,
    },
}

/// The platform GATT peripheral facility.
pub trait GattPeripheral: Send + Sync {
    /// Publishes the service table.
    ///
    /// # Errors
    ///
    /// Returns [`GattError`] when the server cannot be acquired.
    fn publish_services(
        &self,
        services: &[GattService],
        events: mpsc::UnboundedSender<GattEvent>,
    ) -> Result<(), GattError>;

    /// Removes the published table; best-effort.
    fn unpublish_services(&self);

    /// Starts advertising.  A synchronous `Err` reports submission failure;
    /// asynchronous outcomes arrive as `AdvertisingStarted` /
    /// `AdvertisingFailed` events.
    fn start_advertising(&self, settings: &AdvertiseSettings) -> Result<(), AdvertiseError>;

    /// Stops advertising; best-effort.
    fn stop_advertising(&self);

    /// Sends a value-changed notification.  Fire-and-forget; the return
    /// value only reflects submission.
    fn notify(&self, address: &str, characteristic: u16, value: &[u8]) -> bool;

    /// Answers a pending access request.
    fn respond(&self, address: &str, request_id: u32, status: AccessStatus, value: &[u8]);
}

// ── Transport ─────────────────────────────────────────────────────────────────

struct PeerState {
    address: String,
    bond: BondState,
    notifications_enabled: bool,
}

struct BleShared {
    /// `true` between initialize and shutdown: disconnects re-start
    /// advertising only while this holds.
    advertising_intent: bool,
    advertising: bool,
    peer: Option<PeerState>,
    last_report: Option<Vec<u8>>,
    /// 0 = boot protocol, 1 = report protocol.
    protocol_mode: u8,
    battery_level: u8,
}

impl Default for BleShared {
    fn default() -> Self {
        Self {
            advertising_intent: false,
            advertising: false,
            peer: None,
            last_report: None,
            protocol_mode: 1,
            battery_level: DEFAULT_BATTERY_LEVEL,
        }
    }
}

struct Inner {
    peripheral: Arc<dyn GattPeripheral>,
    device_name: String,
    shared: Mutex<BleShared>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: mpsc::UnboundedSender<GattEvent>,
}

impl Inner {
    /// Recomputes and publishes the upward-facing state from the shared
    /// fields.  `Connected` requires bonded AND subscribed.
    fn publish_state(&self) {
        let state = {
            let shared = lock(&self.shared);
            match &shared.peer {
                Some(p) if p.bond == BondState::Bonded && p.notifications_enabled => {
                    ConnectionState::Connected
                }
                Some(_) => ConnectionState::Connecting,
                None if shared.advertising => ConnectionState::Discovering,
                None => ConnectionState::Disconnected,
            }
        };
        self.state_tx.send_replace(state);
    }

    fn handle_event(&self, event: GattEvent) {
        match event {
            GattEvent::AdvertisingStarted => {
                lock(&self.shared).advertising = true;
                info!("advertising started");
                self.publish_state();
            }
            GattEvent::AdvertisingFailed(e) => {
                // Surfaced as Error only; the transport keeps running.
                lock(&self.shared).advertising = false;
                warn!("advertising start failed: {e}");
                self.state_tx.send_replace(ConnectionState::Error);
            }
            GattEvent::PeerConnected { address } => {
                info!("peer {address} connected (unbonded)");
                let mut shared = lock(&self.shared);
                shared.peer = Some(PeerState {
                    address,
                    bond: BondState::None,
                    notifications_enabled: false,
                });
                drop(shared);
                self.publish_state();
            }
            GattEvent::PeerDisconnected { address } => {
                info!("peer {address} disconnected");
                let restart = {
                    let mut shared = lock(&self.shared);
                    // Bond state is cleared with the peer entry.
                    shared.peer = None;
                    shared.advertising = false;
                    shared.advertising_intent
                };
                if restart {
                    self.submit_advertising();
                }
                self.publish_state();
            }
            GattEvent::BondStateChanged { address, state } => {
                debug!("peer {address}: bond state {state:?}");
                {
                    let mut shared = lock(&self.shared);
                    if let Some(peer) = shared.peer.as_mut() {
                        if peer.address == address {
                            peer.bond = state;
                        }
                    }
                }
                self.publish_state();
            }
            GattEvent::CharacteristicRead {
                address,
                request_id,
                uuid,
            } => self.handle_read(&address, request_id, uuid),
            GattEvent::CharacteristicWrite {
                address,
                request_id,
                uuid,
                value,
                response_needed,
            } => self.handle_write(&address, request_id, uuid, &value, response_needed),
            GattEvent::DescriptorWrite {
                address,
                request_id,
                characteristic,
                descriptor,
                value,
                response_needed,
            } => self.handle_descriptor_write(
                &address,
                request_id,
                characteristic,
                descriptor,
                &value,
                response_needed,
            ),
        }
    }

    fn handle_read(&self, address: &str, request_id: u32, uuid: u16) {
        let (status, value): (AccessStatus, Vec<u8>) = match uuid {
            uuids::DEVICE_NAME => (AccessStatus::Success, self.device_name.as_bytes().to_vec()),
            uuids::APPEARANCE => (
                AccessStatus::Success,
                uuids::APPEARANCE_GAMEPAD.to_le_bytes().to_vec(),
            ),
            uuids::REPORT_MAP => {
                // The platform enforces link encryption before delivering
                // this read, but the bond is re-checked here: the report map
                // is the one attribute that must never leak pre-pairing.
                if self.peer_bonded(address) {
                    (AccessStatus::Success, WIRELESS_REPORT_DESCRIPTOR.to_vec())
                } else {
                    (AccessStatus::InsufficientEncryption, Vec::new())
                }
            }
            uuids::HID_INFORMATION => {
                // bcdHID 1.11 (LE), country 0, flags: remote wake +
                // normally connectable.
                (AccessStatus::Success, vec![0x11, 0x01, 0x00, 0x03])
            }
            uuids::PROTOCOL_MODE => {
                (AccessStatus::Success, vec![lock(&self.shared).protocol_mode])
            }
            uuids::REPORT => {
                let shared = lock(&self.shared);
                let report = shared.last_report.clone().unwrap_or_else(|| {
                    encode_report(
                        &LogicalInputState::NEUTRAL,
                        ReportVariant::Compact,
                        TriggerPolicy::PreferAnalog,
                    )
                });
                (AccessStatus::Success, report)
            }
            uuids::BATTERY_LEVEL => (AccessStatus::Success, vec![lock(&self.shared).battery_level]),
            uuids::MANUFACTURER_NAME => (AccessStatus::Success, b"PadLink".to_vec()),
            uuids::PNP_ID => {
                // Vendor-ID source 0x02 (USB-IF), vendor 0x046D, product 0,
                // version 0x0100 — matches the identity the UDP server
                // reports for the same virtual device.
                (
                    AccessStatus::Success,
                    vec![0x02, 0x6D, 0x04, 0x00, 0x00, 0x00, 0x01],
                )
            }
            other => {
                debug!("read of unsupported characteristic {other:#06X}");
                (AccessStatus::RequestNotSupported, Vec::new())
            }
        };
        self.peripheral.respond(address, request_id, status, &value);
    }

    fn handle_write(
        &self,
        address: &str,
        request_id: u32,
        uuid: u16,
        value: &[u8],
        response_needed: bool,
    ) {
        let status = match uuid {
            uuids::HID_CONTROL_POINT => {
                // 0 = suspend, 1 = exit suspend.  Logged only; the input
                // surface keeps sampling either way.
                match value.first() {
                    Some(0) => debug!("host requested suspend"),
                    Some(1) => debug!("host requested exit-suspend"),
                    _ => debug!("control point write with unexpected value {value:02X?}"),
                }
                AccessStatus::Success
            }
            uuids::PROTOCOL_MODE => match value {
                [mode @ (0 | 1)] => {
                    lock(&self.shared).protocol_mode = *mode;
                    AccessStatus::Success
                }
                _ => AccessStatus::WriteNotPermitted,
            },
            other => {
                debug!("write to unsupported characteristic {other:#06X}");
                AccessStatus::RequestNotSupported
            }
        };
        if response_needed {
            self.peripheral.respond(address, request_id, status, &[]);
        }
    }

    fn handle_descriptor_write(
        &self,
        address: &str,
        request_id: u32,
        characteristic: u16,
        descriptor: u16,
        value: &[u8],
        response_needed: bool,
    ) {
        let status = if descriptor == uuids::CLIENT_CHARACTERISTIC_CONFIG
            && characteristic == uuids::REPORT
        {
            match value {
                [0x01, 0x00] => {
                    info!("peer {address} subscribed to input reports");
                    self.set_subscription(address, true);
                    AccessStatus::Success
                }
                [0x00, 0x00] => {
                    info!("peer {address} unsubscribed from input reports");
                    self.set_subscription(address, false);
                    AccessStatus::Success
                }
                _ => AccessStatus::WriteNotPermitted,
            }
        } else if descriptor == uuids::CLIENT_CHARACTERISTIC_CONFIG {
            // Battery-level CCC and any future ones: accept, nothing to track.
            AccessStatus::Success
        } else {
            AccessStatus::RequestNotSupported
        };
        if response_needed {
            self.peripheral.respond(address, request_id, status, &[]);
        }
    }

    fn set_subscription(&self, address: &str, enabled: bool) {
        {
            let mut shared = lock(&self.shared);
            if let Some(peer) = shared.peer.as_mut() {
                if peer.address == address {
                    peer.notifications_enabled = enabled;
                }
            }
        }
        self.publish_state();
    }

    fn peer_bonded(&self, address: &str) -> bool {
        let shared = lock(&self.shared);
        shared
            .peer
            .as_ref()
            .is_some_and(|p| p.address == address && p.bond == BondState::Bonded)
    }

    fn submit_advertising(&self) {
        match self.peripheral.start_advertising(&AdvertiseSettings::default()) {
            Ok(()) => {}
            Err(e) => {
                warn!("advertising submission failed: {e}");
                self.state_tx.send_replace(ConnectionState::Error);
            }
        }
    }

    /// One keepalive tick: renotify the last report while Ready.
    fn keepalive_tick(&self) {
        let (address, report) = {
            let shared = lock(&self.shared);
            let Some(peer) = shared.peer.as_ref() else {
                return;
            };
            if peer.bond != BondState::Bonded || !peer.notifications_enabled {
                return;
            }
            match &shared.last_report {
                Some(r) => (peer.address.clone(), r.clone()),
                None => return,
            }
        };
        self.peripheral.notify(&address, uuids::REPORT, &report);
    }
}

/// The encrypted-link transport.
pub struct BleHidTransport {
    inner: Arc<Inner>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<GattEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BleHidTransport {
    pub fn new(peripheral: Arc<dyn GattPeripheral>, device_name: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                peripheral,
                device_name: device_name.into(),
                shared: Mutex::new(BleShared::default()),
                state_tx,
                events_tx,
            }),
            events_rx: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The sender platform glue uses to post callback events.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<GattEvent> {
        self.inner.events_tx.clone()
    }

    /// Updates the battery level served from the battery service.
    pub fn set_battery_level(&self, percent: u8) {
        lock(&self.inner.shared).battery_level = percent.min(100);
    }

    #[cfg(test)]
    pub(crate) fn handle_event(&self, event: GattEvent) {
        self.inner.handle_event(event);
    }

    #[cfg(test)]
    pub(crate) fn keepalive_tick(&self) {
        self.inner.keepalive_tick();
    }
}

#[async_trait]
impl Transport for BleHidTransport {
    async fn initialize(&self) -> Result<(), TransportError> {
        lock(&self.inner.shared).advertising_intent = true;

        let services = build_gatt_services();
        if let Err(e) = self
            .inner
            .peripheral
            .publish_services(&services, self.inner.events_tx.clone())
        {
            self.inner.state_tx.send_replace(ConnectionState::Error);
            return Err(TransportError::Initialize(e.to_string()));
        }

        let mut tasks = lock(&self.tasks);

        // Pump: all platform callbacks drain through this one task.
        if let Some(mut rx) = lock(&self.events_rx).take() {
            let inner = Arc::clone(&self.inner);
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    inner.handle_event(event);
                }
            }));
        }

        self.inner.submit_advertising();

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(KEEPALIVE_PERIOD);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                inner.keepalive_tick();
            }
        }));
        Ok(())
    }

    async fn shutdown(&self) {
        {
            let mut shared = lock(&self.inner.shared);
            shared.advertising_intent = false;
            shared.advertising = false;
            shared.peer = None;
            shared.last_report = None;
        }
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.inner.peripheral.stop_advertising();
        self.inner.peripheral.unpublish_services();
        self.inner.state_tx.send_replace(ConnectionState::Disconnected);
        info!("encrypted-link transport stopped");
    }

    async fn discover(&self, _window: Duration) -> Vec<DeviceDescriptor> {
        // Peripherals do not scan: the host finds us.  Expose the connected
        // peer, if any, so the picker can show it.
        let shared = lock(&self.inner.shared);
        shared
            .peer
            .as_ref()
            .map(|p| {
                vec![DeviceDescriptor {
                    address: p.address.clone(),
                    name: "connected host".to_string(),
                    timestamp: 0,
                }]
            })
            .unwrap_or_default()
    }

    async fn connect(&self, address: &str) -> bool {
        // Connection is central-initiated on this transport; the handheld
        // can only advertise and wait.
        debug!("connect({address}) ignored: peripheral role is connectable, not connecting");
        false
    }

    async fn disconnect(&self, address: &str) {
        debug!("disconnect({address}): clearing peer state, link teardown is host-driven");
        {
            let mut shared = lock(&self.inner.shared);
            if shared
                .peer
                .as_ref()
                .is_some_and(|p| p.address == address)
            {
                shared.peer = None;
            }
        }
        self.inner.publish_state();
    }

    fn send_report(&self, report: &[u8]) {
        // Both predicates re-checked on every send: bonding and subscription
        // change independently and the platform silently drops notifications
        // when either is missing.
        let target = {
            let mut shared = lock(&self.inner.shared);
            shared.last_report = Some(report.to_vec());
            match shared.peer.as_ref() {
                Some(p) if p.bond == BondState::Bonded && p.notifications_enabled => {
                    Some(p.address.clone())
                }
                _ => None,
            }
        };
        if let Some(address) = target {
            self.inner.peripheral.notify(&address, uuids::REPORT, report);
        }
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    fn report_variant(&self) -> ReportVariant {
        ReportVariant::Compact
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakePeripheral {
        published: Mutex<Vec<GattService>>,
        advertise_calls: AtomicUsize,
        fail_advertising_with: Mutex<Option<AdvertiseError>>,
        stopped_advertising: AtomicBool,
        notifications: Mutex<Vec<(String, u16, Vec<u8>)>>,
        responses: Mutex<Vec<(u32, AccessStatus, Vec<u8>)>>,
    }

    impl GattPeripheral for FakePeripheral {
        fn publish_services(
            &self,
            services: &[GattService],
            _events: mpsc::UnboundedSender<GattEvent>,
        ) -> Result<(), GattError> {
            *self.published.lock().unwrap() = services.to_vec();
            Ok(())
        }

        fn unpublish_services(&self) {}

        fn start_advertising(&self, settings: &AdvertiseSettings) -> Result<(), AdvertiseError> {
            assert_eq!(
                settings.service_uuid,
                uuids::HID_SERVICE,
                "only the service identifier may be advertised"
            );
            self.advertise_calls.fetch_add(1, Ordering::SeqCst);
            match *self.fail_advertising_with.lock().unwrap() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn stop_advertising(&self) {
            self.stopped_advertising.store(true, Ordering::SeqCst);
        }

        fn notify(&self, address: &str, characteristic: u16, value: &[u8]) -> bool {
            self.notifications
                .lock()
                .unwrap()
                .push((address.to_string(), characteristic, value.to_vec()));
            true
        }

        fn respond(&self, _address: &str, request_id: u32, status: AccessStatus, value: &[u8]) {
            self.responses
                .lock()
                .unwrap()
                .push((request_id, status, value.to_vec()));
        }
    }

    const PEER: &str = "11:22:33:44:55:66";

    fn make_transport() -> (BleHidTransport, Arc<FakePeripheral>) {
        let peripheral = Arc::new(FakePeripheral::default());
        let transport = BleHidTransport::new(
            Arc::clone(&peripheral) as Arc<dyn GattPeripheral>,
            "PadLink",
        );
        (transport, peripheral)
    }

    fn connect_peer(transport: &BleHidTransport) {
        transport.handle_event(GattEvent::PeerConnected {
            address: PEER.to_string(),
        });
    }

    fn bond_peer(transport: &BleHidTransport) {
        transport.handle_event(GattEvent::BondStateChanged {
            address: PEER.to_string(),
            state: BondState::Bonded,
        });
    }

    fn subscribe_peer(transport: &BleHidTransport) {
        transport.handle_event(GattEvent::DescriptorWrite {
            address: PEER.to_string(),
            request_id: 7,
            characteristic: uuids::REPORT,
            descriptor: uuids::CLIENT_CHARACTERISTIC_CONFIG,
            value: vec![0x01, 0x00],
            response_needed: true,
        });
    }

    // ── GATT table shape ─────────────────────────────────────────────────────

    #[test]
    fn test_gatt_table_exposes_all_four_capability_groups() {
        let services = build_gatt_services();
        let uuids_present: Vec<u16> = services.iter().map(|s| s.uuid).collect();
        assert_eq!(
            uuids_present,
            vec![
                uuids::GENERIC_ACCESS_SERVICE,
                uuids::HID_SERVICE,
                uuids::DEVICE_INFORMATION_SERVICE,
                uuids::BATTERY_SERVICE,
            ]
        );
    }

    #[test]
    fn test_hid_characteristics_all_require_encryption() {
        let services = build_gatt_services();
        let hid = services
            .iter()
            .find(|s| s.uuid == uuids::HID_SERVICE)
            .unwrap();
        for c in &hid.characteristics {
            assert!(
                c.permissions & (perms::READ_ENCRYPTED | perms::WRITE_ENCRYPTED) != 0,
                "characteristic {:#06X} must require an encrypted link",
                c.uuid
            );
        }
    }

    #[test]
    fn test_input_report_characteristic_notifies_and_carries_ccc() {
        let services = build_gatt_services();
        let report = services
            .iter()
            .flat_map(|s| &s.characteristics)
            .find(|c| c.uuid == uuids::REPORT)
            .unwrap();
        assert!(report.properties & props::NOTIFY != 0);
        assert!(report
            .descriptors
            .iter()
            .any(|d| d.uuid == uuids::CLIENT_CHARACTERISTIC_CONFIG));
        assert!(report
            .descriptors
            .iter()
            .any(|d| d.uuid == uuids::REPORT_REFERENCE));
    }

    // ── Send gating invariant ────────────────────────────────────────────────

    #[test]
    fn test_send_is_noop_when_neither_bonded_nor_subscribed() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        transport.send_report(&[0u8; 7]);
        assert!(peripheral.notifications.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_is_noop_when_bonded_but_not_subscribed() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        bond_peer(&transport);
        transport.send_report(&[0u8; 7]);
        assert!(peripheral.notifications.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_is_noop_when_subscribed_but_not_bonded() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        subscribe_peer(&transport);
        transport.send_report(&[0u8; 7]);
        assert!(peripheral.notifications.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_notifies_once_bonded_and_subscribed() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        bond_peer(&transport);
        subscribe_peer(&transport);

        let report = [10u8, 20, 30, 40, 1, 0, 8];
        transport.send_report(&report);

        let sent = peripheral.notifications.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, PEER);
        assert_eq!(sent[0].1, uuids::REPORT);
        assert_eq!(sent[0].2, report.to_vec());
    }

    #[test]
    fn test_unsubscribe_regates_sends() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        bond_peer(&transport);
        subscribe_peer(&transport);
        transport.handle_event(GattEvent::DescriptorWrite {
            address: PEER.to_string(),
            request_id: 8,
            characteristic: uuids::REPORT,
            descriptor: uuids::CLIENT_CHARACTERISTIC_CONFIG,
            value: vec![0x00, 0x00],
            response_needed: false,
        });

        transport.send_report(&[0u8; 7]);
        assert!(
            peripheral.notifications.lock().unwrap().is_empty(),
            "sends must re-check the subscription on every call"
        );
    }

    // ── Upward state ─────────────────────────────────────────────────────────

    #[test]
    fn test_connected_state_fires_only_once_both_predicates_hold() {
        let (transport, _peripheral) = make_transport();
        let rx = transport.connection_state();

        connect_peer(&transport);
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);

        bond_peer(&transport);
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);

        subscribe_peer(&transport);
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }

    #[test]
    fn test_subscription_before_bonding_also_completes_on_bond() {
        // The two events are independent and may arrive in either order.
        let (transport, _peripheral) = make_transport();
        let rx = transport.connection_state();
        connect_peer(&transport);
        subscribe_peer(&transport);
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);
        bond_peer(&transport);
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
    }

    #[test]
    fn test_disconnect_clears_bond_and_restarts_advertising() {
        let (transport, peripheral) = make_transport();
        lock(&transport.inner.shared).advertising_intent = true;
        connect_peer(&transport);
        bond_peer(&transport);
        subscribe_peer(&transport);

        transport.handle_event(GattEvent::PeerDisconnected {
            address: PEER.to_string(),
        });

        assert!(peripheral.advertise_calls.load(Ordering::SeqCst) >= 1);
        // A reconnecting peer starts unbonded again.
        connect_peer(&transport);
        transport.send_report(&[0u8; 7]);
        assert!(peripheral.notifications.lock().unwrap().is_empty());
    }

    #[test]
    fn test_advertising_failure_maps_to_error_state_without_terminating() {
        let (transport, peripheral) = make_transport();
        for err in [
            AdvertiseError::AlreadyStarted,
            AdvertiseError::DataTooLarge,
            AdvertiseError::FeatureUnsupported,
            AdvertiseError::InternalError,
            AdvertiseError::TooManyAdvertisers,
        ] {
            transport.handle_event(GattEvent::AdvertisingFailed(err));
            assert_eq!(
                *transport.connection_state().borrow(),
                ConnectionState::Error
            );
        }
        // The transport still works afterwards.
        connect_peer(&transport);
        bond_peer(&transport);
        subscribe_peer(&transport);
        transport.send_report(&[1u8; 7]);
        assert_eq!(peripheral.notifications.lock().unwrap().len(), 1);
    }

    // ── Characteristic access ────────────────────────────────────────────────

    fn last_response(peripheral: &FakePeripheral) -> (u32, AccessStatus, Vec<u8>) {
        peripheral.responses.lock().unwrap().last().unwrap().clone()
    }

    #[test]
    fn test_report_map_read_requires_bonding() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        transport.handle_event(GattEvent::CharacteristicRead {
            address: PEER.to_string(),
            request_id: 1,
            uuid: uuids::REPORT_MAP,
        });
        let (_, status, _) = last_response(&peripheral);
        assert_eq!(status, AccessStatus::InsufficientEncryption);
    }

    #[test]
    fn test_report_map_read_returns_descriptor_once_bonded() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        bond_peer(&transport);
        transport.handle_event(GattEvent::CharacteristicRead {
            address: PEER.to_string(),
            request_id: 2,
            uuid: uuids::REPORT_MAP,
        });
        let (_, status, value) = last_response(&peripheral);
        assert_eq!(status, AccessStatus::Success);
        assert_eq!(value, WIRELESS_REPORT_DESCRIPTOR.to_vec());
    }

    #[test]
    fn test_appearance_read_signals_gamepad() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        transport.handle_event(GattEvent::CharacteristicRead {
            address: PEER.to_string(),
            request_id: 3,
            uuid: uuids::APPEARANCE,
        });
        let (_, status, value) = last_response(&peripheral);
        assert_eq!(status, AccessStatus::Success);
        assert_eq!(value, uuids::APPEARANCE_GAMEPAD.to_le_bytes().to_vec());
    }

    #[test]
    fn test_unsupported_characteristic_access_is_rejected_not_dropped() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        transport.handle_event(GattEvent::CharacteristicRead {
            address: PEER.to_string(),
            request_id: 4,
            uuid: 0x2AFF,
        });
        let (_, status, _) = last_response(&peripheral);
        assert_eq!(status, AccessStatus::RequestNotSupported);
    }

    #[test]
    fn test_protocol_mode_write_round_trips_through_read() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        transport.handle_event(GattEvent::CharacteristicWrite {
            address: PEER.to_string(),
            request_id: 5,
            uuid: uuids::PROTOCOL_MODE,
            value: vec![0x00],
            response_needed: true,
        });
        transport.handle_event(GattEvent::CharacteristicRead {
            address: PEER.to_string(),
            request_id: 6,
            uuid: uuids::PROTOCOL_MODE,
        });
        let (_, status, value) = last_response(&peripheral);
        assert_eq!(status, AccessStatus::Success);
        assert_eq!(value, vec![0x00]);
    }

    #[test]
    fn test_malformed_ccc_write_is_not_permitted() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        transport.handle_event(GattEvent::DescriptorWrite {
            address: PEER.to_string(),
            request_id: 9,
            characteristic: uuids::REPORT,
            descriptor: uuids::CLIENT_CHARACTERISTIC_CONFIG,
            value: vec![0xAB],
            response_needed: true,
        });
        let (_, status, _) = last_response(&peripheral);
        assert_eq!(status, AccessStatus::WriteNotPermitted);
    }

    #[test]
    fn test_battery_level_read_reflects_set_value() {
        let (transport, peripheral) = make_transport();
        transport.set_battery_level(42);
        connect_peer(&transport);
        transport.handle_event(GattEvent::CharacteristicRead {
            address: PEER.to_string(),
            request_id: 10,
            uuid: uuids::BATTERY_LEVEL,
        });
        let (_, status, value) = last_response(&peripheral);
        assert_eq!(status, AccessStatus::Success);
        assert_eq!(value, vec![42]);
    }

    // ── Keepalive ────────────────────────────────────────────────────────────

    #[test]
    fn test_keepalive_resends_identical_bytes_while_ready() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        bond_peer(&transport);
        subscribe_peer(&transport);

        let report = [3u8, 1, 4, 1, 5, 0, 8];
        transport.send_report(&report);
        transport.keepalive_tick();

        let sent = peripheral.notifications.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].2, sent[1].2);
    }

    #[test]
    fn test_keepalive_is_gated_by_the_same_predicates_as_send() {
        let (transport, peripheral) = make_transport();
        connect_peer(&transport);
        bond_peer(&transport);
        transport.send_report(&[0u8; 7]); // stored but not sent
        transport.keepalive_tick();
        assert!(peripheral.notifications.lock().unwrap().is_empty());
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_initialize_publishes_services_and_starts_advertising() {
        let (transport, peripheral) = make_transport();
        transport.initialize().await.unwrap();
        assert_eq!(peripheral.published.lock().unwrap().len(), 4);
        assert_eq!(peripheral.advertise_calls.load(Ordering::SeqCst), 1);
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_synchronous_advertising_failure_publishes_error() {
        let (transport, peripheral) = make_transport();
        *peripheral.fail_advertising_with.lock().unwrap() =
            Some(AdvertiseError::TooManyAdvertisers);
        transport.initialize().await.unwrap();
        assert_eq!(
            *transport.connection_state().borrow(),
            ConnectionState::Error
        );
        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_advertising_and_clears_peer() {
        let (transport, peripheral) = make_transport();
        transport.initialize().await.unwrap();
        connect_peer(&transport);
        bond_peer(&transport);
        subscribe_peer(&transport);

        transport.shutdown().await;

        assert!(peripheral.stopped_advertising.load(Ordering::SeqCst));
        assert_eq!(
            *transport.connection_state().borrow(),
            ConnectionState::Disconnected
        );
        transport.send_report(&[0u8; 7]);
        assert!(peripheral.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connect_is_refused_in_peripheral_role() {
        let (transport, _peripheral) = make_transport();
        assert!(!transport.connect(PEER).await);
    }

    #[test]
    fn test_report_variant_is_compact() {
        let (transport, _peripheral) = make_transport();
        assert_eq!(transport.report_variant(), ReportVariant::Compact);
    }
}
