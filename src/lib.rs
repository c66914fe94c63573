//! # hdmi-cec
//!
//! A bit-banged HDMI-CEC bus engine for microcontrollers with a single
//! GPIO tied to the CEC line. CEC is a single-wire, half-duplex,
//! multi-drop bus: the line idles high through a pull-up and any talker
//! may pull it low, so both directions are realized by switching one pin
//! between input-with-pullup and output-low.
//!
//! ## Architecture
//!
//! ```text
//!             edge IRQ                       cooperative loop
//!                |                                  |
//!                v                                  v
//! wire ──> CecInterrupt ──> frame ring ──> CecDevice::poll ──> triggers
//!           (receiver)       (SPSC)         (dispatcher)   └─> built-in
//!                                                               replies
//!                                                                  |
//! wire <──────────────────── Sender <──────────────────────────────┘
//!                        (transmitter)
//! ```
//!
//! * The **receiver** runs inside the GPIO edge interrupt: it measures
//!   low-pulse widths, reassembles bits into bytes and bytes into frames,
//!   and acknowledges bytes addressed to this device by stretching the
//!   ACK-slot low pulse.
//! * Completed frames cross into the main loop through a lock-free
//!   single-producer / single-consumer ring; the interrupt never
//!   allocates and never blocks.
//! * The **dispatcher** filters frames by address, fires registered
//!   message triggers, and answers the mandatory CEC queries (CEC
//!   version, power status, OSD name, physical address) with a Feature
//!   Abort fallback for everything unrecognized.
//! * The **transmitter** waits for the CEC signal-free time, arbitrates
//!   on the initiator nibble while sending, verifies the ACK slot, and
//!   retries with the standard CEC policy. The send pass masks
//!   interrupts so reception cannot perturb bit timing.
//!
//! ## Wiring
//!
//! Construct an [`HdmiCec`] from a [`Line`] implementation and a
//! [`Config`], then [`split`](HdmiCec::split) it: route every edge of the
//! CEC pin to [`CecInterrupt::on_edge`], and drive
//! [`CecDevice::poll`] from the main loop. On the RP2040 the `embassy-rp`
//! feature provides a ready-made [`Line`].
//!
//! When no physical address is configured, read it from the sink's EDID
//! over DDC with [`DdcReader`] before claiming the bus.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
pub(crate) mod fmt;

mod bit;
#[cfg(feature = "decoder")]
mod decode;
mod device;
mod edid;
mod frame;
mod line;
mod queue;
#[cfg(feature = "embassy-rp")]
mod rp;
mod rx;
#[cfg(test)]
pub(crate) mod sim;
mod tx;

use core::sync::atomic::AtomicU32;

pub use device::{
    CecDevice, CecInterrupt, Config, HdmiCec, MessageCallback, MessageFilter, TriggerListFull,
    MAX_OSD_NAME_LEN, MAX_TRIGGERS,
};
pub use edid::{physical_address_from_cea, DdcReader, EdidError};
pub use frame::{CecFrame, DeviceType, LogicalAddress, Opcode, MAX_FRAME_LEN};
pub use line::Line;
pub use tx::{SendError, Sender};

#[cfg(feature = "decoder")]
pub use decode::decode;
#[cfg(feature = "embassy-rp")]
pub use rp::RpLine;

/// State shared between the interrupt half and the main-loop half.
pub(crate) struct Shared {
    pub(crate) queue: queue::FrameQueue,
    /// Timestamp of the most recent falling edge the interrupt observed;
    /// the transmitter's signal-free anchor. A single u32 store/load per
    /// side keeps it tear-free on 32-bit targets.
    pub(crate) last_falling_edge_us: AtomicU32,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Shared {
            queue: queue::FrameQueue::new(),
            last_falling_edge_us: AtomicU32::new(0),
        }
    }
}
