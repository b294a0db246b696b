//! HID report descriptors for the emulated gamepad.
//!
//! A report descriptor is a byte table, defined by the USB HID spec, that
//! tells the receiving host how to parse incoming reports: which usages the
//! device exposes, at which bit offsets, with which value ranges.  The host
//! never sees our Rust types — only these tables and the raw report bytes.
//!
//! Two variants exist:
//!
//! - [`WIRELESS_REPORT_DESCRIPTOR`]: 4 axes (X/Y/Z/Rz), 16 buttons, hat.
//!   Served as the report map of the encrypted-link HID service and as the
//!   SDP descriptor of the classic profile registration.  Kept small because
//!   the encrypted-link report map is read over a constrained link.
//! - [`NETWORK_REPORT_DESCRIPTOR`]: identical but 6 axes, adding the Rx/Ry
//!   trigger axes.  Sent in the UDP descriptor handshake; the server embeds
//!   it verbatim in the kernel device-creation command.
//!
//! Both declare report ID 1.  The axis declaration order matches the wire
//! layouts in [`crate::report`] exactly: the extended layout's
//! `lx, ly, rx, l2, r2, ry` corresponds to X, Y, Z, Rx, Ry, Rz.

use crate::report::ReportVariant;

/// 4-axis descriptor used by the classic-profile and encrypted-link
/// transports.
pub const WIRELESS_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Game Pad)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x01, //   Report ID (1)
    // Sticks: X, Y, Z, Rz — one byte each, 0-255
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x30, //   Usage (X)
    0x09, 0x31, //   Usage (Y)
    0x09, 0x32, //   Usage (Z)
    0x09, 0x35, //   Usage (Rz)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x04, //   Report Count (4)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // 16 buttons, one bit each
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, //   Usage Minimum (Button 1)
    0x29, 0x10, //   Usage Maximum (Button 16)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x10, //   Report Count (16)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Hat switch: one byte, 0-7 plus null state 8
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x39, //   Usage (Hat switch)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x07, //   Logical Maximum (7)
    0x35, 0x00, //   Physical Minimum (0)
    0x46, 0x3B, 0x01, //   Physical Maximum (315)
    0x65, 0x14, //   Unit (Degrees)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x42, //   Input (Data, Variable, Absolute, Null State)
    0xC0, // End Collection
];

/// 6-axis descriptor sent over the UDP handshake: adds the Rx/Ry trigger
/// axes between Z and Rz, matching the extended report layout.
pub const NETWORK_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x05, // Usage (Game Pad)
    0xA1, 0x01, // Collection (Application)
    0x85, 0x01, //   Report ID (1)
    // Axes: X, Y, Z (right stick horizontal), Rx/Ry (triggers), Rz
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x30, //   Usage (X)
    0x09, 0x31, //   Usage (Y)
    0x09, 0x32, //   Usage (Z)
    0x09, 0x33, //   Usage (Rx)
    0x09, 0x34, //   Usage (Ry)
    0x09, 0x35, //   Usage (Rz)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x06, //   Report Count (6)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // 16 buttons, one bit each
    0x05, 0x09, //   Usage Page (Button)
    0x19, 0x01, //   Usage Minimum (Button 1)
    0x29, 0x10, //   Usage Maximum (Button 16)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x10, //   Report Count (16)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    // Hat switch: one byte, 0-7 plus null state 8
    0x05, 0x01, //   Usage Page (Generic Desktop)
    0x09, 0x39, //   Usage (Hat switch)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x07, //   Logical Maximum (7)
    0x35, 0x00, //   Physical Minimum (0)
    0x46, 0x3B, 0x01, //   Physical Maximum (315)
    0x65, 0x14, //   Unit (Degrees)
    0x75, 0x08, //   Report Size (8)
    0x95, 0x01, //   Report Count (1)
    0x81, 0x42, //   Input (Data, Variable, Absolute, Null State)
    0xC0, // End Collection
];

/// Returns the descriptor a transport using `variant` must present to its
/// peer.  The compact and prefixed layouts both describe the 4-axis device;
/// only the extended layout needs the trigger axes declared.
pub fn descriptor_for_variant(variant: ReportVariant) -> &'static [u8] {
    match variant {
        ReportVariant::Compact | ReportVariant::Prefixed => WIRELESS_REPORT_DESCRIPTOR,
        ReportVariant::Extended => NETWORK_REPORT_DESCRIPTOR,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
