//! Edge-driven receiver state machine.
//!
//! Runs inside the GPIO edge interrupt. Falling edges stamp the shared
//! timestamp (the transmitter's signal-free reference) and perform any
//! queued ACK injection; rising edges classify the finished low pulse and
//! advance the bit/byte/frame reassembly.

use core::sync::atomic::Ordering;

use crate::frame::{CecFrame, LogicalAddress, MAX_FRAME_LEN};
use crate::line::{
    Line, HIGH_BIT_MAX_US, HIGH_BIT_MIN_US, LOW_BIT_US, START_BIT_MIN_US,
};
use crate::Shared;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum ReceiverState {
    Idle,
    ReceivingByte,
    WaitingForEom,
    WaitingForAck,
    WaitingForEomAck,
}

pub(crate) struct Receiver {
    address: LogicalAddress,
    monitor: bool,
    state: ReceiverState,
    bit_counter: u8,
    byte_buffer: u8,
    frame_buffer: heapless::Vec<u8, MAX_FRAME_LEN>,
    ack_queued: bool,
    saw_falling_edge: bool,
}

impl Receiver {
    pub(crate) fn new(address: LogicalAddress, monitor: bool) -> Self {
        Receiver {
            address,
            monitor,
            state: ReceiverState::Idle,
            bit_counter: 0,
            byte_buffer: 0,
            frame_buffer: heapless::Vec::new(),
            ack_queued: false,
            saw_falling_edge: false,
        }
    }

    fn reset(&mut self) {
        self.bit_counter = 0;
        self.byte_buffer = 0;
        self.frame_buffer.clear();
    }

    /// Handle one edge of the CEC pin. Must be called on every edge, from
    /// interrupt context; runs to completion without blocking on anything
    /// but the 1.5 ms ACK low time.
    pub(crate) fn on_edge<L: Line>(&mut self, line: &L, shared: &Shared) {
        let now = line.now_us();

        if !line.is_high() {
            // Falling edge: start of a low pulse.
            shared.last_falling_edge_us.store(now, Ordering::Relaxed);
            self.saw_falling_edge = true;

            if self.ack_queued && !self.monitor {
                // The talker opened the ACK slot by driving low; extend
                // that low to the logic-0 duration to acknowledge.
                self.ack_queued = false;
                line.set_output_low();
                line.delay_us(LOW_BIT_US);
                line.set_input_high();
            }
            return;
        }

        // Rising edge: classify the pulse that just ended.
        if !self.saw_falling_edge {
            return;
        }
        let pulse_us = now.wrapping_sub(shared.last_falling_edge_us.load(Ordering::Relaxed));

        if pulse_us > START_BIT_MIN_US {
            self.reset();
            self.ack_queued = false;
            self.state = ReceiverState::ReceivingByte;
            return;
        }

        let value = (HIGH_BIT_MIN_US..=HIGH_BIT_MAX_US).contains(&pulse_us);

        match self.state {
            ReceiverState::ReceivingByte => {
                self.byte_buffer = (self.byte_buffer << 1) | u8::from(value);
                self.bit_counter += 1;
                if self.bit_counter >= 8 {
                    // Drop bytes past the maximum frame size; the frame is
                    // still delivered with what fits.
                    let _ = self.frame_buffer.push(self.byte_buffer);
                    self.bit_counter = 0;
                    self.byte_buffer = 0;
                    self.state = ReceiverState::WaitingForEom;
                }
            }

            ReceiverState::WaitingForEom => {
                let destination = LogicalAddress(self.frame_buffer[0] & 0x0F);
                if destination == self.address && !destination.is_broadcast() && !self.monitor {
                    self.ack_queued = true;
                }

                let eom = value;
                if eom {
                    let frame = CecFrame::from_buffer(self.frame_buffer.clone());
                    if !shared.queue.push(&frame) {
                        warn!("receive queue full, dropping frame");
                    }
                    self.reset();
                    self.state = ReceiverState::WaitingForEomAck;
                } else {
                    self.state = ReceiverState::WaitingForAck;
                }
            }

            ReceiverState::WaitingForAck => {
                self.state = ReceiverState::ReceivingByte;
            }

            ReceiverState::WaitingForEomAck => {
                self.state = ReceiverState::Idle;
            }

            ReceiverState::Idle => {
                self.reset();
                self.state = ReceiverState::ReceivingByte;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::{HIGH_BIT_US, START_BIT_HIGH_US, START_BIT_LOW_US, TOTAL_BIT_US};
    use crate::sim::SimLine;

    struct Rig {
        line: SimLine,
        shared: Shared,
        rx: Receiver,
        t: u32,
    }

    impl Rig {
        fn new(address: u8, monitor: bool) -> Self {
            Rig {
                line: SimLine::new(),
                shared: Shared::new(),
                rx: Receiver::new(LogicalAddress(address), monitor),
                t: 10_000,
            }
        }

        fn edge(&mut self, t: u32, level: bool) {
            self.line.set_now(t);
            self.line.set_level(level);
            self.rx.on_edge(&self.line, &self.shared);
        }

        /// One low pulse of `width`, then the line is high again. Advances
        /// the cursor by a full bit period.
        fn pulse(&mut self, width: u32) {
            let start = self.t;
            self.edge(start, false);
            // ACK injection advances the simulated clock; never go backwards.
            let rise = self.line.now().max(start + width);
            self.edge(rise, true);
            self.t = start + TOTAL_BIT_US;
        }

        fn start_bit(&mut self) {
            let start = self.t;
            self.edge(start, false);
            self.edge(start + START_BIT_LOW_US, true);
            self.t = start + START_BIT_LOW_US + START_BIT_HIGH_US;
        }

        fn bit(&mut self, value: bool) {
            self.pulse(if value { HIGH_BIT_US } else { LOW_BIT_US });
        }

        /// Feed a byte MSB-first, its EOM bit, and the ACK slot (opened by
        /// the talker with a short low).
        fn byte(&mut self, value: u8, eom: bool) {
            for bit in (0..8).rev() {
                self.bit((value >> bit) & 1 == 1);
            }
            self.bit(eom);
            self.bit(true); // ACK slot: talker emits a 1, follower may extend
        }

        fn feed_frame(&mut self, bytes: &[u8]) {
            self.start_bit();
            let last = bytes.len() - 1;
            for (idx, byte) in bytes.iter().enumerate() {
                self.byte(*byte, idx == last);
            }
        }

        /// Low pulses we drove on the line (ACK injections), as
        /// `(start, duration)` pairs.
        fn injected_lows(&self) -> std::vec::Vec<(u32, u32)> {
            let ops = self.line.ops();
            let mut out = std::vec::Vec::new();
            let mut low_at = None;
            for (t, low) in ops {
                match (low, low_at) {
                    (true, None) => low_at = Some(t),
                    (false, Some(start)) => {
                        out.push((start, t - start));
                        low_at = None;
                    }
                    _ => {}
                }
            }
            out
        }
    }

    #[test]
    fn reassembles_directed_frame_and_acks_each_byte() {
        let mut rig = Rig::new(4, false);
        rig.feed_frame(&[0x04, 0x9F]);

        let frame = unwrap!(rig.shared.queue.pop());
        assert_eq!(frame.as_bytes(), &[0x04, 0x9F]);
        assert_eq!(frame.initiator(), LogicalAddress(0));
        assert_eq!(frame.destination(), LogicalAddress(4));

        // Exactly one injected low per byte, each the logic-0 duration.
        let lows = rig.injected_lows();
        assert_eq!(lows.len(), 2);
        for (_, width) in lows {
            assert_eq!(width, LOW_BIT_US);
        }
    }

    #[test]
    fn ping_is_enqueued_without_ack_when_not_ours() {
        let mut rig = Rig::new(4, false);
        rig.feed_frame(&[0x40]); // 4 -> 0, not addressed to us
        let frame = unwrap!(rig.shared.queue.pop());
        assert!(frame.is_ping());
        assert!(rig.injected_lows().is_empty());
    }

    #[test]
    fn broadcast_is_never_acked() {
        let mut rig = Rig::new(4, false);
        rig.feed_frame(&[0x0F, 0x36]);
        assert!(rig.shared.queue.pop().is_some());
        assert!(rig.injected_lows().is_empty());
    }

    #[test]
    fn monitor_mode_suppresses_ack() {
        let mut rig = Rig::new(4, true);
        rig.feed_frame(&[0x04, 0x9F]);
        assert!(rig.shared.queue.pop().is_some());
        assert!(rig.injected_lows().is_empty());
    }

    #[test]
    fn start_bit_resets_partial_frame() {
        let mut rig = Rig::new(4, false);
        rig.start_bit();
        for _ in 0..4 {
            rig.bit(true); // half a byte, then the talker restarts
        }
        rig.feed_frame(&[0x40]);
        let frame = unwrap!(rig.shared.queue.pop());
        assert_eq!(frame.as_bytes(), &[0x40]);
        assert!(rig.shared.queue.pop().is_none());
    }

    #[test]
    fn unrecognized_pulse_width_reads_as_zero() {
        let mut rig = Rig::new(4, false);
        rig.start_bit();
        // 0x40 sent with a malformed '1' pulse (1000 us) in bit 6
        rig.bit(false);
        rig.pulse(1000);
        for _ in 0..6 {
            rig.bit(false);
        }
        rig.bit(true); // EOM
        rig.bit(true); // ACK slot
        let frame = unwrap!(rig.shared.queue.pop());
        assert_eq!(frame.as_bytes(), &[0x00]);
    }

    #[test]
    fn falling_edge_updates_shared_timestamp() {
        let mut rig = Rig::new(4, false);
        rig.edge(123_456, false);
        assert_eq!(
            rig.shared.last_falling_edge_us.load(Ordering::Relaxed),
            123_456
        );
    }
}
