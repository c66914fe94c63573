//! Simulated CEC line for host tests: a virtual microsecond clock, a
//! recording of every pin operation, and scripted windows where a far-end
//! talker drives the line low.

use core::cell::RefCell;
use std::vec::Vec;

use crate::line::Line;

struct SimState {
    now: u32,
    output_low: bool,
    /// `(time, drove_low)` for every pin-mode switch we performed.
    ops: Vec<(u32, bool)>,
    /// `[start, end)` windows where an external talker holds the line low.
    external_low: Vec<(u32, u32)>,
    /// Explicit line level, for receiver tests that feed edges directly.
    level_override: Option<bool>,
}

pub(crate) struct SimLine {
    state: RefCell<SimState>,
}

impl SimLine {
    pub(crate) fn new() -> Self {
        SimLine {
            state: RefCell::new(SimState {
                now: 0,
                output_low: false,
                ops: Vec::new(),
                external_low: Vec::new(),
                level_override: None,
            }),
        }
    }

    /// Script an external talker driving the line low over `[from, to)`.
    pub(crate) fn drive_low(&self, from: u32, to: u32) {
        self.state.borrow_mut().external_low.push((from, to));
    }

    pub(crate) fn set_now(&self, now: u32) {
        self.state.borrow_mut().now = now;
    }

    pub(crate) fn now(&self) -> u32 {
        self.state.borrow().now
    }

    /// Pin the observed line level, bypassing the scripted windows.
    pub(crate) fn set_level(&self, high: bool) {
        self.state.borrow_mut().level_override = Some(high);
    }

    pub(crate) fn ops(&self) -> Vec<(u32, bool)> {
        self.state.borrow().ops.clone()
    }

    /// Whether we ever drove the line low.
    pub(crate) fn transmitted(&self) -> bool {
        self.state.borrow().ops.iter().any(|&(_, low)| low)
    }
}

impl Line for SimLine {
    fn set_input_high(&self) {
        let mut state = self.state.borrow_mut();
        let now = state.now;
        state.output_low = false;
        state.ops.push((now, false));
    }

    fn set_output_low(&self) {
        let mut state = self.state.borrow_mut();
        let now = state.now;
        state.output_low = true;
        state.ops.push((now, true));
    }

    fn is_high(&self) -> bool {
        let state = self.state.borrow();
        if let Some(level) = state.level_override {
            return level;
        }
        if state.output_low {
            return false;
        }
        !state
            .external_low
            .iter()
            .any(|&(from, to)| (from..to).contains(&state.now))
    }

    fn now_us(&self) -> u32 {
        self.state.borrow().now
    }

    fn delay_us(&self, us: u32) {
        self.state.borrow_mut().now += us;
    }
}

/// Reconstruct the frames we transmitted from the recorded pin operations.
///
/// Pulses longer than the start-bit threshold open a new frame; everything
/// else is grouped into 10-bit blocks (8 data bits, EOM, ACK slot) and the
/// data bits are reassembled MSB-first.
pub(crate) fn decode_tx_frames(ops: &[(u32, bool)]) -> Vec<Vec<u8>> {
    let mut frames: Vec<Vec<u8>> = Vec::new();
    let mut bits: Vec<bool> = Vec::new();
    let mut in_frame = false;
    let mut low_at = None;

    let finish = |bits: &mut Vec<bool>, frames: &mut Vec<Vec<u8>>, in_frame: bool| {
        if !in_frame {
            return;
        }
        let mut bytes = Vec::new();
        for block in bits.chunks(10) {
            if block.len() < 9 {
                break;
            }
            let mut byte = 0u8;
            for &bit in &block[..8] {
                byte = (byte << 1) | u8::from(bit);
            }
            bytes.push(byte);
        }
        frames.push(bytes);
        bits.clear();
    };

    for &(t, low) in ops {
        match (low, low_at) {
            (true, None) => low_at = Some(t),
            (false, Some(start)) => {
                let width = t - start;
                low_at = None;
                if width > 3500 {
                    finish(&mut bits, &mut frames, in_frame);
                    in_frame = true;
                } else if in_frame {
                    bits.push((400..=800).contains(&width));
                }
            }
            _ => {}
        }
    }
    finish(&mut bits, &mut frames, in_frame);
    frames
}
