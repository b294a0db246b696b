//! The logical gamepad input state sampled from the on-screen controls.
//!
//! The input surface mutates one [`LogicalInputState`] continuously; the
//! transports only ever read it.  Values are stored pre-clamped so the report
//! codec never has to fail: axes are `u8` by construction and the hat is a
//! closed enum.

use serde::{Deserialize, Serialize};

/// Named bits of the 16-bit button mask.
///
/// The bit positions are part of the wire contract: the low byte is sent as
/// `buttonsLo`, the high byte as `buttonsHi`.
pub mod buttons {
    /// Face button A (south).
    pub const A: u16 = 1 << 0;
    /// Face button B (east).
    pub const B: u16 = 1 << 1;
    /// Face button X (west).
    pub const X: u16 = 1 << 2;
    /// Face button Y (north).
    pub const Y: u16 = 1 << 3;
    /// Left shoulder bumper.
    pub const L1: u16 = 1 << 4;
    /// Right shoulder bumper.
    pub const R1: u16 = 1 << 5;
    /// Legacy digital left trigger.  On the 6-axis network layout the analog
    /// `l2` axis carries the trigger; this bit is the digital fallback.
    pub const L2: u16 = 1 << 6;
    /// Legacy digital right trigger.
    pub const R2: u16 = 1 << 7;
    /// Select / back / view.
    pub const SELECT: u16 = 1 << 8;
    /// Start / menu.
    pub const START: u16 = 1 << 9;
    /// Left stick click.
    pub const L3: u16 = 1 << 10;
    /// Right stick click.
    pub const R3: u16 = 1 << 11;
    /// Home / guide.
    pub const HOME: u16 = 1 << 12;
}

/// Axis value representing a centered stick.
pub const AXIS_CENTER: u8 = 127;

/// Hat-switch direction: the HID 8-way-plus-null encoding of a D-pad.
///
/// Values 0–7 walk clockwise from north; 8 is the null state (nothing
/// pressed).  The numeric values are sent on the wire verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum HatDirection {
    North = 0,
    NorthEast = 1,
    East = 2,
    SouthEast = 3,
    South = 4,
    SouthWest = 5,
    West = 6,
    NorthWest = 7,
    #[default]
    Center = 8,
}

impl HatDirection {
    /// Converts a raw wire value back into a direction.
    ///
    /// Returns `None` for values above 8, which are not valid hat states.
    pub fn from_wire(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::North,
            1 => Self::NorthEast,
            2 => Self::East,
            3 => Self::SouthEast,
            4 => Self::South,
            5 => Self::SouthWest,
            6 => Self::West,
            7 => Self::NorthWest,
            8 => Self::Center,
            _ => return None,
        })
    }

    /// The wire byte for this direction.
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// The complete logical state of the emulated controller at one instant.
///
/// All axes are `[0, 255]` with 127 = center for sticks and 0 = released for
/// triggers.  The struct is `Copy` so transports can snapshot it without
/// locking the input surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalInputState {
    /// 16-bit button mask; see [`buttons`] for bit assignments.
    pub buttons: u16,
    /// Left stick horizontal axis.
    pub lx: u8,
    /// Left stick vertical axis.
    pub ly: u8,
    /// Right stick horizontal axis.
    pub rx: u8,
    /// Right stick vertical axis.
    pub ry: u8,
    /// Analog left trigger (0 = released, 255 = fully pressed).
    pub l2: u8,
    /// Analog right trigger.
    pub r2: u8,
    /// Hat-switch direction.
    pub hat: HatDirection,
}

impl LogicalInputState {
    /// The neutral state: sticks centered, triggers released, no buttons,
    /// hat in the null state.  Used as the liveness-poll payload before any
    /// real input has been sampled.
    pub const NEUTRAL: Self = Self {
        buttons: 0,
        lx: AXIS_CENTER,
        ly: AXIS_CENTER,
        rx: AXIS_CENTER,
        ry: AXIS_CENTER,
        l2: 0,
        r2: 0,
        hat: HatDirection::Center,
    };

    /// Returns `true` if the given button bit(s) are all set.
    pub fn is_pressed(&self, mask: u16) -> bool {
        self.buttons & mask == mask
    }

    /// Sets or clears the given button bit(s).
    pub fn set_button(&mut self, mask: u16, pressed: bool) {
        if pressed {
            self.buttons |= mask;
        } else {
            self.buttons &= !mask;
        }
    }

    /// Sets the left stick from floating-point coordinates in `[-1.0, 1.0]`.
    ///
    /// Values outside the range are clamped.  `(0.0, 0.0)` maps to the
    /// center value 127.
    pub fn set_left_stick(&mut self, x: f32, y: f32) {
        self.lx = axis_from_float(x);
        self.ly = axis_from_float(y);
    }

    /// Sets the right stick from floating-point coordinates in `[-1.0, 1.0]`.
    pub fn set_right_stick(&mut self, x: f32, y: f32) {
        self.rx = axis_from_float(x);
        self.ry = axis_from_float(y);
    }

    /// Sets the analog triggers from floating-point values in `[0.0, 1.0]`.
    pub fn set_triggers(&mut self, left: f32, right: f32) {
        self.l2 = trigger_from_float(left);
        self.r2 = trigger_from_float(right);
    }
}

impl Default for LogicalInputState {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Maps `[-1.0, 1.0]` onto `[0, 255]` with 0.0 → 127.
fn axis_from_float(v: f32) -> u8 {
    let clamped = v.clamp(-1.0, 1.0);
    (127.0 + clamped * if clamped >= 0.0 { 128.0 } else { 127.0 }).round() as u8
}

/// Maps `[0.0, 1.0]` onto `[0, 255]`.
fn trigger_from_float(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

// ── Tests ─────────────────────────────────────────────────────────────────────
