//! # padlink-core
//!
//! Shared library for PadLink containing the logical gamepad input model, the
//! HID report codec, the HID report descriptors, the UDP discovery wire
//! types, and the kernel uhid event encoding.
//!
//! This crate is used by both the handheld application (`padlink-pad`) and
//! the virtual-device server (`padlink-server`).  It has zero dependencies on
//! sockets, device files, or platform APIs.
//!
//! # Architecture overview (for beginners)
//!
//! PadLink turns a handheld device into the input source for an emulated
//! game controller.  The handheld samples the on-screen controls into a
//! [`LogicalInputState`], encodes it into a fixed-layout HID report, and
//! ships the bytes over whichever transport is active.  On the network
//! transport the receiving server forwards those bytes, unchanged, into a
//! kernel virtual HID device — at which point the host OS sees a real
//! gamepad.
//!
//! This crate defines the pieces both sides must agree on:
//!
//! - **`domain`** – Pure input model with no OS dependencies: the button
//!   mask, stick axes, trigger axes, and hat direction, plus the shared
//!   connection-state vocabulary.
//!
//! - **`report`** – How a [`LogicalInputState`] becomes wire bytes.  Three
//!   fixed layouts exist (7, 8, and 10 bytes) depending on transport and
//!   axis count.
//!
//! - **`descriptor`** – The HID report descriptors: static byte tables that
//!   tell the receiving host how to parse the reports.
//!
//! - **`discovery`** – The JSON device-announcement format and the magic
//!   strings of the UDP descriptor handshake.
//!
//! - **`uhid`** – The binary layout of the Linux `/dev/uhid` events the
//!   server writes (CREATE2, INPUT2, DESTROY).

pub mod descriptor;
pub mod discovery;
pub mod domain;
pub mod report;
pub mod uhid;

// Re-export the most-used types at the crate root so callers can write
// `padlink_core::LogicalInputState` instead of the full module path.
pub use domain::connection::{BondState, ConnectionState};
pub use domain::input::{buttons, HatDirection, LogicalInputState};
pub use report::{decode_report, encode_report, ReportError, ReportVariant, TriggerPolicy};
