//! Binary layout of the Linux `/dev/uhid` kernel events the server writes.
//!
//! # What is uhid? (for beginners)
//!
//! `uhid` is a kernel facility that lets a user-space process create and
//! drive an emulated HID device through a character device.  You open
//! `/dev/uhid`, write a CREATE2 event carrying the device identity and a HID
//! report descriptor, and the kernel materializes an input device that the
//! rest of the system cannot distinguish from real hardware.  Every INPUT2
//! event you write afterwards is delivered as if the device had sent a
//! report; reading from the file yields kernel-originated lifecycle events.
//!
//! The wire format is the C `struct uhid_event`: a 4-byte little-endian type
//! field followed by a union of request structs.  The offsets below must
//! match the kernel's structure layout exactly — one byte off and the kernel
//! rejects the write or, worse, misparses the descriptor.
//!
//! ```text
//! CREATE2 (type=11):
//!   [type:u32][name:128][phys:64][uniq:64][rd_size:u16][bus:u16]
//!   [vendor:u32][product:u32][version:u32][country:u32][rd_data:4096]
//! INPUT2  (type=12):
//!   [type:u32][size:u16][data:size bytes, report-id included]
//! DESTROY (type=1):
//!   [type:u32]
//! ```

use thiserror::Error;

// ── Event types ───────────────────────────────────────────────────────────────

/// `UHID_CREATE2` request type.
pub const UHID_CREATE2: u32 = 11;
/// `UHID_INPUT2` request type.
pub const UHID_INPUT2: u32 = 12;
/// `UHID_DESTROY` request type.
pub const UHID_DESTROY: u32 = 1;

/// Maximum report-descriptor / input payload size (`UHID_DATA_MAX`).
pub const UHID_DATA_MAX: usize = 4096;

/// Size of the full `struct uhid_event` buffer:
/// 4 + 128 + 64 + 64 + 2 + 2 + 4 + 4 + 4 + 4 + 4096.
pub const UHID_EVENT_SIZE: usize = 4380;

const NAME_LEN: usize = 128;
const PHYS_LEN: usize = 64;
const UNIQ_LEN: usize = 64;

// Field offsets inside the CREATE2 event buffer.
const OFF_NAME: usize = 4;
const OFF_PHYS: usize = OFF_NAME + NAME_LEN; // 132
const OFF_UNIQ: usize = OFF_PHYS + PHYS_LEN; // 196
const OFF_RD_SIZE: usize = OFF_UNIQ + UNIQ_LEN; // 260
const OFF_BUS: usize = OFF_RD_SIZE + 2; // 262
const OFF_VENDOR: usize = OFF_BUS + 2; // 264
const OFF_PRODUCT: usize = OFF_VENDOR + 4; // 268
const OFF_VERSION: usize = OFF_PRODUCT + 4; // 272
const OFF_COUNTRY: usize = OFF_VERSION + 4; // 276
const OFF_RD_DATA: usize = OFF_COUNTRY + 4; // 280

// INPUT2 offsets.
const OFF_INPUT_SIZE: usize = 4;
const OFF_INPUT_DATA: usize = 6;

/// `BUS_USB` from `linux/input.h`.
pub const BUS_USB: u16 = 0x03;
/// `BUS_BLUETOOTH` from `linux/input.h`.
pub const BUS_BLUETOOTH: u16 = 0x05;

/// Errors from event construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UhidError {
    /// The report descriptor exceeds `UHID_DATA_MAX`.
    #[error("descriptor too large: {0} bytes (max {UHID_DATA_MAX})")]
    DescriptorTooLarge(usize),
    /// An input payload was empty or exceeded `UHID_DATA_MAX`.
    #[error("invalid input payload length: {0}")]
    InvalidInputLength(usize),
}

// ── Device identity ───────────────────────────────────────────────────────────

/// Identity fields embedded in the CREATE2 event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device name shown by the host (`name[128]`, NUL-padded, truncated to
    /// 127 bytes so a terminator always remains).
    pub name: String,
    /// Physical location string (`phys[64]`).
    pub phys: String,
    /// Unique identifier string (`uniq[64]`).
    pub uniq: String,
    /// Bus type ([`BUS_USB`] / [`BUS_BLUETOOTH`]).
    pub bus: u16,
    /// Vendor ID.
    pub vendor: u32,
    /// Product ID.
    pub product: u32,
    /// Version number.
    pub version: u32,
    /// HID country code.
    pub country: u32,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            name: "PadLink Virtual Controller".to_string(),
            phys: "uhid-padlink".to_string(),
            uniq: "padlink-001".to_string(),
            bus: BUS_USB,
            vendor: 0x046D,
            product: 0x0000,
            version: 0x0100,
            country: 0,
        }
    }
}

// ── Event encoding ────────────────────────────────────────────────────────────

/// Builds the CREATE2 event embedding `identity` and the report descriptor.
///
/// # Errors
///
/// Returns [`UhidError::DescriptorTooLarge`] when the descriptor exceeds
/// `UHID_DATA_MAX`.
pub fn encode_create2(identity: &DeviceIdentity, descriptor: &[u8]) -> Result<Vec<u8>, UhidError> {
    if descriptor.len() > UHID_DATA_MAX {
        return Err(UhidError::DescriptorTooLarge(descriptor.len()));
    }

    let mut event = vec![0u8; UHID_EVENT_SIZE];
    event[0..4].copy_from_slice(&UHID_CREATE2.to_le_bytes());

    copy_padded(&mut event[OFF_NAME..OFF_NAME + NAME_LEN], identity.name.as_bytes());
    copy_padded(&mut event[OFF_PHYS..OFF_PHYS + PHYS_LEN], identity.phys.as_bytes());
    copy_padded(&mut event[OFF_UNIQ..OFF_UNIQ + UNIQ_LEN], identity.uniq.as_bytes());

    let rd_size = descriptor.len() as u16;
    event[OFF_RD_SIZE..OFF_RD_SIZE + 2].copy_from_slice(&rd_size.to_le_bytes());
    event[OFF_BUS..OFF_BUS + 2].copy_from_slice(&identity.bus.to_le_bytes());
    event[OFF_VENDOR..OFF_VENDOR + 4].copy_from_slice(&identity.vendor.to_le_bytes());
    event[OFF_PRODUCT..OFF_PRODUCT + 4].copy_from_slice(&identity.product.to_le_bytes());
    event[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&identity.version.to_le_bytes());
    event[OFF_COUNTRY..OFF_COUNTRY + 4].copy_from_slice(&identity.country.to_le_bytes());
    event[OFF_RD_DATA..OFF_RD_DATA + descriptor.len()].copy_from_slice(descriptor);

    Ok(event)
}

/// Builds the INPUT2 event forwarding `report` verbatim (report-id byte
/// included — the kernel expects it as the first data byte when the
/// descriptor declares report IDs).
///
/// # Errors
///
/// Returns [`UhidError::InvalidInputLength`] for an empty or oversized
/// payload.
pub fn encode_input2(report: &[u8]) -> Result<Vec<u8>, UhidError> {
    if report.is_empty() || report.len() > UHID_DATA_MAX {
        return Err(UhidError::InvalidInputLength(report.len()));
    }

    let mut event = vec![0u8; UHID_EVENT_SIZE];
    event[0..4].copy_from_slice(&UHID_INPUT2.to_le_bytes());
    let size = report.len() as u16;
    event[OFF_INPUT_SIZE..OFF_INPUT_SIZE + 2].copy_from_slice(&size.to_le_bytes());
    event[OFF_INPUT_DATA..OFF_INPUT_DATA + report.len()].copy_from_slice(report);
    Ok(event)
}

/// Builds the DESTROY event (type only, no payload).
pub fn encode_destroy() -> [u8; 4] {
    UHID_DESTROY.to_le_bytes()
}

/// Copies `src` into `dst`, truncating to leave at least one NUL byte.
fn copy_padded(dst: &mut [u8], src: &[u8]) {
    let n = src.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&src[..n]);
}

// ── Kernel-originated events ──────────────────────────────────────────────────

/// Lifecycle events the kernel writes back on the uhid file descriptor.
///
/// The server drains these for diagnostics only; it never answers
/// GET_REPORT / SET_REPORT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelEvent {
    /// The kernel started the device (`UHID_START`).
    Start,
    /// The kernel stopped the device (`UHID_STOP`).
    Stop,
    /// An application opened the device node (`UHID_OPEN`).
    Open,
    /// The last application closed the device node (`UHID_CLOSE`).
    Close,
    /// An output report arrived from the host (`UHID_OUTPUT`).
    Output,
    /// The kernel requested a report (`UHID_GET_REPORT`).
    GetReport,
    /// The kernel pushed a report (`UHID_SET_REPORT`).
    SetReport,
    /// Any other (or future) event type.
    Other(u32),
}

/// Parses the event-type field of a kernel read.  Returns `None` when the
/// buffer is too short to carry a type.
pub fn parse_kernel_event(buf: &[u8]) -> Option<KernelEvent> {
    if buf.len() < 4 {
        return None;
    }
    let ty = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    Some(match ty {
        0 => KernelEvent::Start,
        1 => KernelEvent::Stop,
        5 => KernelEvent::Open,
        6 => KernelEvent::Close,
        7 => KernelEvent::Output,
        8 => KernelEvent::GetReport,
        9 => KernelEvent::SetReport,
        other => KernelEvent::Other(other),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
