//! Bitrate to bit timing translation
//!
//! The table targets a 48 MHz CAN clock with a sample point of 87.5%
//! (86.7% at 800 kbit/s). Rates outside the table, or devices running any
//! other clock, are rejected rather than approximated.

use crate::error::{GsUsbError, Result};
use crate::structures::DeviceBitTiming;

/// CAN clock the translation table is valid for
pub const BITTIMING_CLOCK_HZ: u32 = 48_000_000;

const PROP_SEG: u32 = 1;
const PHASE_SEG2: u32 = 2;
const SJW: u32 = 1;

/// (bitrate, prescaler, prop_seg + phase_seg1)
const BITRATE_TABLE: [(u32, u32, u32); 10] = [
    (10_000, 300, 13),
    (20_000, 150, 13),
    (50_000, 60, 13),
    (83_333, 36, 13),
    (100_000, 30, 13),
    (125_000, 24, 13),
    (250_000, 12, 13),
    (500_000, 6, 13),
    (800_000, 4, 12),
    (1_000_000, 3, 13),
];

/// Bitrates the translator accepts, in ascending order
pub fn supported_bitrates() -> impl Iterator<Item = u32> {
    BITRATE_TABLE.iter().map(|&(bitrate, _, _)| bitrate)
}

/// Look up the timing for a bitrate, ignoring the device clock
pub fn lookup(bitrate: u32) -> Option<DeviceBitTiming> {
    BITRATE_TABLE
        .iter()
        .find(|&&(rate, _, _)| rate == bitrate)
        .map(|&(_, brp, tseg1)| {
            DeviceBitTiming::new(PROP_SEG, tseg1 - PROP_SEG, PHASE_SEG2, SJW, brp)
        })
}

/// Translate a bitrate into timing for a device running at `clock_hz`
///
/// An unknown bitrate is reported before the clock is checked.
pub fn bit_timing_for(bitrate: u32, clock_hz: u32) -> Result<DeviceBitTiming> {
    let timing = lookup(bitrate).ok_or(GsUsbError::UnsupportedBitrate { bitrate })?;

    if clock_hz != BITTIMING_CLOCK_HZ {
        return Err(GsUsbError::ClockMismatch {
            clock_hz,
            expected_hz: BITTIMING_CLOCK_HZ,
        });
    }

    Ok(timing)
}
