//! Platform radio-stack bindings.
//!
//! The classic-profile and encrypted-link transports are driven through the
//! [`HidDeviceProfile`] and [`GattPeripheral`] seams.  On the handheld
//! target the build supplies implementations bound to the platform
//! Bluetooth stack; this module provides the desktop/CI stand-ins so the
//! binary links and the UDP transport remains fully functional everywhere.
//!
//! Both stand-ins behave like a platform whose radio facility is absent:
//! registration and service publication report unavailability, which the
//! transports surface as the `Error` connection state without terminating.

use tokio::sync::mpsc;

use padlink_core::discovery::DeviceDescriptor;

use crate::infrastructure::transport::ble::{
    AccessStatus, AdvertiseError, AdvertiseSettings, GattError, GattEvent, GattPeripheral,
    GattService,
};
use crate::infrastructure::transport::classic::{
    HidDeviceProfile, ProfileError, ProfileEvent, QosSettings, SdpRecord,
};

/// A HID-device-profile stand-in for targets without a radio stack.
pub struct UnavailableHidProfile;

impl HidDeviceProfile for UnavailableHidProfile {
    fn register_app(
        &self,
        _record: &SdpRecord,
        _qos: &QosSettings,
        _events: mpsc::UnboundedSender<ProfileEvent>,
    ) -> Result<(), ProfileError> {
        Err(ProfileError::HandleUnavailable)
    }

    fn unregister_app(&self) -> Result<(), ProfileError> {
        Ok(())
    }

    fn has_handle(&self) -> bool {
        false
    }

    fn connect(&self, _address: &str) -> Result<(), ProfileError> {
        Err(ProfileError::HandleUnavailable)
    }

    fn disconnect(&self, _address: &str) -> Result<(), ProfileError> {
        Err(ProfileError::HandleUnavailable)
    }

    fn send_report(&self, _address: &str, _report_id: u8, _data: &[u8]) -> bool {
        false
    }

    fn connected_peers(&self) -> Vec<String> {
        Vec::new()
    }

    fn bonded_peers(&self) -> Vec<DeviceDescriptor> {
        Vec::new()
    }
}

/// A GATT-peripheral stand-in for targets without a radio stack.
pub struct UnavailableGattPeripheral;

impl GattPeripheral for UnavailableGattPeripheral {
    fn publish_services(
        &self,
        _services: &[GattService],
        _events: mpsc::UnboundedSender<GattEvent>,
    ) -> Result<(), GattError> {
        Err(GattError::ServerUnavailable)
    }

    fn unpublish_services(&self) {}

    fn start_advertising(&self, _settings: &AdvertiseSettings) -> Result<(), AdvertiseError> {
        Err(AdvertiseError::FeatureUnsupported)
    }

    fn stop_advertising(&self) {}

    fn notify(&self, _address: &str, _characteristic: u16, _value: &[u8]) -> bool {
        false
    }

    fn respond(&self, _address: &str, _request_id: u32, _status: AccessStatus, _value: &[u8]) {}
}

// ── Tests ─────────────────────────────────────────────────────────────────────
