//! Frame transmission: signal-free wait, arbitration, ACK check, retries.

use core::sync::atomic::Ordering;

use num_enum::IntoPrimitive;

use crate::bit;
use crate::frame::{CecFrame, LogicalAddress};
use crate::line::{Line, TOTAL_BIT_US};
use crate::Shared;

/// Maximum number of transmission attempts for one frame.
const MAX_ATTEMPTS: u8 = 5;

/// Transmission failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// Arbitration lost on the initiator nibble, or another initiator
    /// started concurrently with our start bit.
    BusCollision,
    /// Unicast frame not acknowledged, or broadcast frame rejected.
    NoAck,
    /// Still failing after the full retry budget.
    RetriesExhausted,
    /// The device is in monitor mode and never transmits.
    MonitorMode,
    /// More payload bytes than a CEC frame can carry.
    FrameTooLong,
}

/// Signal Free Time before a transmission may begin, in bit periods
/// (CEC 9.1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
enum SignalFree {
    /// We were the most recent talker on the bus.
    PresentInitiator = 7,
    /// Somebody else talked last.
    NewInitiator = 5,
    /// Retrying our own failed attempt.
    Retransmission = 3,
}

impl SignalFree {
    fn required_idle_us(self) -> u32 {
        u32::from(u8::from(self)) * TOTAL_BIT_US
    }
}

pub(crate) struct TxState {
    /// Stamped at the end of every attempt, failed ones included, so
    /// back-off measures from the most recent bus activity.
    pub(crate) last_sent_us: u32,
}

impl TxState {
    pub(crate) fn new() -> Self {
        TxState { last_sent_us: 0 }
    }
}

/// Transmit handle. Exclusive (`&mut`) access serializes sends; message
/// trigger callbacks receive one to emit replies.
pub struct Sender<'a, L: Line> {
    pub(crate) line: &'a L,
    pub(crate) tx: &'a mut TxState,
    pub(crate) shared: &'a Shared,
    pub(crate) address: LogicalAddress,
    pub(crate) monitor: bool,
}

impl<'a, L: Line> Sender<'a, L> {
    /// Our claimed logical address.
    pub fn address(&self) -> LogicalAddress {
        self.address
    }

    /// Send `data` (opcode plus operands; empty for a ping) from `source`
    /// to `destination`, with the standard CEC retransmission policy.
    pub fn send(
        &mut self,
        source: LogicalAddress,
        destination: LogicalAddress,
        data: &[u8],
    ) -> Result<(), SendError> {
        if self.monitor {
            return Err(SendError::MonitorMode);
        }
        let frame =
            CecFrame::new(source, destination, data).ok_or(SendError::FrameTooLong)?;
        let is_broadcast = destination.is_broadcast();

        let mut free = self.initial_signal_free();
        let mut attempt: u8 = 0;
        loop {
            self.wait_signal_free(free);

            // Interrupts stay masked from start bit to final ACK so the
            // edge handler cannot perturb the bit timing. The bus is
            // half-duplex; edges missed here would have been our own.
            let result = critical_section::with(|_| self.transmit_once(&frame, is_broadcast));
            self.tx.last_sent_us = self.line.now_us();

            match result {
                Ok(()) => return Ok(()),
                Err(_) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        error!(
                            "send {} -> {} failed after {} attempts",
                            source.0, destination.0, MAX_ATTEMPTS
                        );
                        return Err(SendError::RetriesExhausted);
                    }
                    free = SignalFree::Retransmission;
                }
            }
        }
    }

    /// Reply helper for trigger callbacks and the built-in handler: send
    /// from our own address.
    pub fn reply(&mut self, destination: LogicalAddress, data: &[u8]) -> Result<(), SendError> {
        self.send(self.address, destination, data)
    }

    fn initial_signal_free(&self) -> SignalFree {
        let now = self.line.now_us();
        let since_fall =
            now.wrapping_sub(self.shared.last_falling_edge_us.load(Ordering::Relaxed));
        let since_sent = now.wrapping_sub(self.tx.last_sent_us);
        if since_sent < since_fall {
            SignalFree::PresentInitiator
        } else {
            SignalFree::NewInitiator
        }
    }

    /// Busy-wait until the bus has been idle for the required number of
    /// bit periods. Looped, because another talker may produce falling
    /// edges while we wait and push the idle anchor forward.
    fn wait_signal_free(&self, free: SignalFree) {
        let required = free.required_idle_us();
        loop {
            let now = self.line.now_us();
            let since_fall =
                now.wrapping_sub(self.shared.last_falling_edge_us.load(Ordering::Relaxed));
            let since_sent = now.wrapping_sub(self.tx.last_sent_us);
            let idle = since_fall.min(since_sent);
            if idle >= required {
                return;
            }
            self.line.delay_us(required - idle);
        }
    }

    /// One pass over the frame: start bit, data bits with arbitration on
    /// the initiator nibble, EOM, ACK. Runs with interrupts masked.
    pub(crate) fn transmit_once(
        &self,
        frame: &CecFrame,
        is_broadcast: bool,
    ) -> Result<(), SendError> {
        if !bit::send_start_bit(self.line) {
            return Err(SendError::BusCollision);
        }

        let bytes = frame.as_bytes();
        let last = bytes.len() - 1;
        for (index, byte) in bytes.iter().enumerate() {
            for bit_index in (0..8u8).rev() {
                let value = (byte >> bit_index) & 1 == 1;
                if index == 0 && bit_index >= 4 && value {
                    // Initiator nibble: emit the 1 and read the line back.
                    // A low reading means a lower-address initiator is
                    // also driving; it wins the bus.
                    if !bit::send_high_and_test(self.line) {
                        return Err(SendError::BusCollision);
                    }
                } else {
                    bit::send_bit(self.line, value);
                }
            }

            bit::send_bit(self.line, index == last); // EOM

            // ACK slot: we emit a 1 and sample. Unicast: a follower pulls
            // the line low (reads 0). Broadcast: any device objecting
            // pulls low, so the line must stay high.
            let level = bit::send_high_and_test(self.line);
            if level != is_broadcast {
                return Err(SendError::NoAck);
            }
        }
        Ok(())
    }
}
