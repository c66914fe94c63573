//! Bit-level transmit primitives.
//!
//! All bit shaping toggles between output-low and input-high (see
//! [`Line`](crate::Line)); the low time selects the bit value, the line is
//! released for the remainder of the 2400 us slot.

use crate::line::{
    Line, HIGH_BIT_US, LOW_BIT_US, SAFE_SAMPLE_US, START_BIT_HIGH_US, START_BIT_LOW_US,
    TOTAL_BIT_US,
};

/// Emit one data bit.
pub(crate) fn send_bit<L: Line>(line: &L, value: bool) {
    let low_us = if value { HIGH_BIT_US } else { LOW_BIT_US };
    line.set_output_low();
    line.delay_us(low_us);
    line.set_input_high();
    line.delay_us(TOTAL_BIT_US - low_us);
}

/// Emit a logic 1 and read the line back at the safe-sample point
/// (1050 us into the bit).
///
/// Serves two purposes: arbitration (we meant to send 1 but read 0, so a
/// lower-address initiator is also driving) and the ACK slot (we released
/// the line, a follower pulling it low reads as 0).
pub(crate) fn send_high_and_test<L: Line>(line: &L) -> bool {
    line.set_output_low();
    line.delay_us(HIGH_BIT_US);
    line.set_input_high();
    line.delay_us(SAFE_SAMPLE_US - HIGH_BIT_US);
    let level = line.is_high();
    line.delay_us(TOTAL_BIT_US - SAFE_SAMPLE_US);
    level
}

/// Emit the start bit: low for 3700 us, released for 800 us.
///
/// The released phase is sampled twice; reading low in either half means
/// another initiator started concurrently. Returns `false` on collision.
pub(crate) fn send_start_bit<L: Line>(line: &L) -> bool {
    line.set_output_low();
    line.delay_us(START_BIT_LOW_US);
    line.set_input_high();
    line.delay_us(START_BIT_HIGH_US / 2);
    let first = line.is_high();
    line.delay_us(START_BIT_HIGH_US / 2);
    let second = line.is_high();
    first && second
}
