//! HID report codec: [`LogicalInputState`] ⇄ wire bytes.
//!
//! Three fixed layouts exist, selected by transport:
//!
//! ```text
//! Compact  (7 bytes):  [lx][ly][rx][ry][btnLo][btnHi][hat]
//! Prefixed (8 bytes):  [id=1] + Compact
//! Extended (10 bytes): [id=1][lx][ly][rx][l2][r2][ry][btnLo][btnHi][hat]
//! ```
//!
//! The classic HID profile and the encrypted-link characteristic both carry
//! the report ID out-of-band, so their payload is the 7-byte compact form.
//! The UDP datagram path embeds the ID: 8 bytes for the 4-axis compatibility
//! layout, 10 bytes for the 6-axis layout with trigger axes.
//!
//! Encoding is deterministic and never fails — the input state is clamped by
//! construction.  Decoding is the server-side diagnostic inverse and *can*
//! fail on wrong lengths or out-of-range hat values.

use thiserror::Error;

use crate::domain::input::{buttons, HatDirection, LogicalInputState};

/// The fixed report layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportVariant {
    /// 7 bytes, no report-id byte.  Classic profile and encrypted link.
    Compact,
    /// 8 bytes, report-id 1 prefix.  UDP 4-axis compatibility layout.
    Prefixed,
    /// 10 bytes, report-id 1 prefix plus the two trigger axes.  UDP 6-axis.
    Extended,
}

impl ReportVariant {
    /// The exact encoded length of this variant.
    pub const fn wire_len(self) -> usize {
        match self {
            Self::Compact => 7,
            Self::Prefixed => 8,
            Self::Extended => 10,
        }
    }
}

/// The report-id byte used by the prefixed layouts.
pub const REPORT_ID: u8 = 1;

/// How the `Extended` encoder resolves a conflict between the analog trigger
/// axes and the legacy digital trigger bits ([`buttons::L2`]/[`buttons::R2`]).
///
/// The two input models genuinely conflict — an on-screen control layout may
/// drive either — so the precedence is an explicit, persisted policy rather
/// than a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerPolicy {
    /// The analog value wins.  A set legacy bit only forces 255 when the
    /// analog axis reads 0 (a purely digital layout).
    #[default]
    PreferAnalog,
    /// The legacy bit wins: set forces 255, clear forces 0, regardless of
    /// the analog value.
    PreferDigital,
}

/// Errors produced when decoding a report.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    /// The byte length matches none of the fixed layouts.
    #[error("invalid report length {0}: expected 7, 8, or 10 bytes")]
    InvalidLength(usize),
    /// The hat byte is above the null-state value 8.
    #[error("invalid hat value {0}: expected 0..=8")]
    InvalidHat(u8),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes `state` into the given layout.
///
/// Deterministic and side-effect-free: the same state always yields
/// byte-identical output, which is what lets the liveness poll resend the
/// previously sent buffer verbatim.
///
/// The `Extended` layout applies `policy` to the trigger bytes; the other
/// layouts ignore it (their trigger input is the legacy bits in the mask).
pub fn encode_report(
    state: &LogicalInputState,
    variant: ReportVariant,
    policy: TriggerPolicy,
) -> Vec<u8> {
    let [btn_lo, btn_hi] = state.buttons.to_le_bytes();
    let hat = state.hat.to_wire();

    match variant {
        ReportVariant::Compact => {
            vec![state.lx, state.ly, state.rx, state.ry, btn_lo, btn_hi, hat]
        }
        ReportVariant::Prefixed => {
            vec![
                REPORT_ID, state.lx, state.ly, state.rx, state.ry, btn_lo, btn_hi, hat,
            ]
        }
        ReportVariant::Extended => {
            let l2 = resolve_trigger(state.l2, state.is_pressed(buttons::L2), policy);
            let r2 = resolve_trigger(state.r2, state.is_pressed(buttons::R2), policy);
            vec![
                REPORT_ID, state.lx, state.ly, state.rx, l2, r2, state.ry, btn_lo, btn_hi, hat,
            ]
        }
    }
}

/// Applies the trigger policy to one axis.
fn resolve_trigger(analog: u8, legacy_bit: bool, policy: TriggerPolicy) -> u8 {
    match policy {
        TriggerPolicy::PreferAnalog => {
            if analog != 0 {
                analog
            } else if legacy_bit {
                255
            } else {
                0
            }
        }
        TriggerPolicy::PreferDigital => {
            if legacy_bit {
                255
            } else {
                0
            }
        }
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes a report of any of the three layouts back into a
/// [`LogicalInputState`], distinguishing the layout by length.
///
/// Used server-side for diagnostics and by the round-trip tests.  The
/// report-id byte of the prefixed layouts is not validated — the relay path
/// forwards datagrams verbatim regardless of their id byte.
///
/// # Errors
///
/// Returns [`ReportError`] on an unrecognized length or an out-of-range hat
/// value.
pub fn decode_report(bytes: &[u8]) -> Result<LogicalInputState, ReportError> {
    match bytes.len() {
        7 => decode_compact(bytes),
        8 => decode_compact(&bytes[1..]),
        10 => decode_extended(bytes),
        other => Err(ReportError::InvalidLength(other)),
    }
}

/// Decodes the 7-byte compact body (`bytes` excludes any report-id prefix).
fn decode_compact(bytes: &[u8]) -> Result<LogicalInputState, ReportError> {
    let hat = HatDirection::from_wire(bytes[6]).ok_or(ReportError::InvalidHat(bytes[6]))?;
    Ok(LogicalInputState {
        lx: bytes[0],
        ly: bytes[1],
        rx: bytes[2],
        ry: bytes[3],
        buttons: u16::from_le_bytes([bytes[4], bytes[5]]),
        l2: 0,
        r2: 0,
        hat,
    })
}

/// Decodes the 10-byte extended layout (`bytes` includes the id byte).
fn decode_extended(bytes: &[u8]) -> Result<LogicalInputState, ReportError> {
    let hat = HatDirection::from_wire(bytes[9]).ok_or(ReportError::InvalidHat(bytes[9]))?;
    Ok(LogicalInputState {
        lx: bytes[1],
        ly: bytes[2],
        rx: bytes[3],
        l2: bytes[4],
        r2: bytes[5],
        ry: bytes[6],
        buttons: u16::from_le_bytes([bytes[7], bytes[8]]),
        hat,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> LogicalInputState {
        LogicalInputState {
            buttons: buttons::A | buttons::START,
            lx: 10,
            ly: 200,
            rx: 127,
            ry: 54,
            l2: 0,
            r2: 99,
            hat: HatDirection::East,
        }
    }

    // ── Lengths and layout ───────────────────────────────────────────────────

    #[test]
    fn test_encode_produces_exact_wire_length_for_every_variant() {
        let state = sample_state();
        for variant in [
            ReportVariant::Compact,
            ReportVariant::Prefixed,
            ReportVariant::Extended,
        ] {
            let bytes = encode_report(&state, variant, TriggerPolicy::default());
            assert_eq!(bytes.len(), variant.wire_len(), "variant {variant:?}");
        }
    }

    #[test]
    fn test_prefixed_variants_carry_report_id_one() {
        let state = sample_state();
        let prefixed = encode_report(&state, ReportVariant::Prefixed, TriggerPolicy::default());
        let extended = encode_report(&state, ReportVariant::Extended, TriggerPolicy::default());
        assert_eq!(prefixed[0], REPORT_ID);
        assert_eq!(extended[0], REPORT_ID);
    }

    #[test]
    fn test_compact_layout_field_order() {
        let state = sample_state();
        let bytes = encode_report(&state, ReportVariant::Compact, TriggerPolicy::default());
        // [lx][ly][rx][ry][btnLo][btnHi][hat]
        assert_eq!(bytes, vec![10, 200, 127, 54, 0b0000_0001, 0b0000_0010, 2]);
    }

    #[test]
    fn test_extended_layout_field_order_places_triggers_between_rx_and_ry() {
        let state = sample_state();
        let bytes = encode_report(&state, ReportVariant::Extended, TriggerPolicy::PreferAnalog);
        // [id][lx][ly][rx][l2][r2][ry][btnLo][btnHi][hat]
        assert_eq!(
            bytes,
            vec![1, 10, 200, 127, 0, 99, 54, 0b0000_0001, 0b0000_0010, 2]
        );
    }

    #[test]
    fn test_neutral_state_prefixed_encoding_matches_wire_reference() {
        let bytes = encode_report(
            &LogicalInputState::NEUTRAL,
            ReportVariant::Prefixed,
            TriggerPolicy::default(),
        );
        assert_eq!(bytes, vec![1, 127, 127, 127, 127, 0, 0, 8]);
    }

    // ── Determinism ──────────────────────────────────────────────────────────

    #[test]
    fn test_encoding_same_state_twice_is_byte_identical() {
        let state = sample_state();
        let a = encode_report(&state, ReportVariant::Extended, TriggerPolicy::default());
        let b = encode_report(&state, ReportVariant::Extended, TriggerPolicy::default());
        assert_eq!(a, b);
    }

    // ── Round trips ──────────────────────────────────────────────────────────

    #[test]
    fn test_compact_round_trip_recovers_buttons_axes_and_hat() {
        let state = sample_state();
        let bytes = encode_report(&state, ReportVariant::Compact, TriggerPolicy::default());
        let decoded = decode_report(&bytes).unwrap();
        assert_eq!(decoded.buttons, state.buttons);
        assert_eq!(
            (decoded.lx, decoded.ly, decoded.rx, decoded.ry),
            (state.lx, state.ly, state.rx, state.ry)
        );
        assert_eq!(decoded.hat, state.hat);
    }

    #[test]
    fn test_extended_round_trip_recovers_triggers() {
        let mut state = sample_state();
        state.l2 = 31;
        let bytes = encode_report(&state, ReportVariant::Extended, TriggerPolicy::PreferAnalog);
        let decoded = decode_report(&bytes).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_prefixed_round_trip_recovers_state_without_triggers() {
        let mut state = sample_state();
        state.r2 = 0; // the prefixed layout carries no trigger axes
        let bytes = encode_report(&state, ReportVariant::Prefixed, TriggerPolicy::default());
        assert_eq!(decode_report(&bytes).unwrap(), state);
    }

    // ── Trigger policy ───────────────────────────────────────────────────────

    #[test]
    fn test_prefer_analog_passes_analog_value_through() {
        let mut state = LogicalInputState::NEUTRAL;
        state.l2 = 80;
        state.set_button(buttons::L2, true); // bit set but analog wins
        let bytes = encode_report(&state, ReportVariant::Extended, TriggerPolicy::PreferAnalog);
        assert_eq!(bytes[4], 80);
    }

    #[test]
    fn test_prefer_analog_falls_back_to_digital_bit_when_axis_is_zero() {
        let mut state = LogicalInputState::NEUTRAL;
        state.set_button(buttons::R2, true);
        let bytes = encode_report(&state, ReportVariant::Extended, TriggerPolicy::PreferAnalog);
        assert_eq!(bytes[5], 255);
    }

    #[test]
    fn test_prefer_digital_forces_full_scale_from_the_bit() {
        let mut state = LogicalInputState::NEUTRAL;
        state.l2 = 80; // ignored under PreferDigital
        state.set_button(buttons::L2, true);
        let bytes = encode_report(&state, ReportVariant::Extended, TriggerPolicy::PreferDigital);
        assert_eq!(bytes[4], 255);
    }

    #[test]
    fn test_prefer_digital_forces_zero_when_bit_clear() {
        let mut state = LogicalInputState::NEUTRAL;
        state.r2 = 200; // ignored under PreferDigital
        let bytes = encode_report(&state, ReportVariant::Extended, TriggerPolicy::PreferDigital);
        assert_eq!(bytes[5], 0);
    }

    // ── Decode errors ────────────────────────────────────────────────────────

    #[test]
    fn test_decode_rejects_wrong_lengths() {
        assert_eq!(decode_report(&[]), Err(ReportError::InvalidLength(0)));
        assert_eq!(
            decode_report(&[0u8; 9]),
            Err(ReportError::InvalidLength(9))
        );
        assert_eq!(
            decode_report(&[0u8; 11]),
            Err(ReportError::InvalidLength(11))
        );
    }

    #[test]
    fn test_decode_rejects_out_of_range_hat() {
        let mut bytes = encode_report(
            &LogicalInputState::NEUTRAL,
            ReportVariant::Prefixed,
            TriggerPolicy::default(),
        );
        *bytes.last_mut().unwrap() = 9;
        assert_eq!(decode_report(&bytes), Err(ReportError::InvalidHat(9)));
    }
}
