//! RP2040 [`Line`] implementation over embassy-rp.
//!
//! The RP2040 GPIO cannot keep its pull-up active in open-drain output
//! mode, so the line is realized with a [`Flex`] pin flipped between
//! input-with-pullup ("released high") and output-low.

use core::cell::UnsafeCell;

use embassy_rp::gpio::{Flex, Pull};
use embassy_time::{block_for, Duration, Instant};

use crate::line::Line;

pub struct RpLine {
    pin: UnsafeCell<Flex<'static>>,
}

// Calls come from the GPIO edge interrupt and, with interrupts masked,
// from the transmit pass; on the single-core-owner setup this crate
// prescribes they never overlap, so the UnsafeCell is never aliased
// mutably. See the `Line` contract.
unsafe impl Send for RpLine {}
unsafe impl Sync for RpLine {}

impl RpLine {
    pub fn new(mut pin: Flex<'static>) -> Self {
        pin.set_pull(Pull::Up);
        pin.set_as_input();
        RpLine {
            pin: UnsafeCell::new(pin),
        }
    }
}

impl Line for RpLine {
    fn set_input_high(&self) {
        let pin = unsafe { &mut *self.pin.get() };
        pin.set_as_input();
    }

    fn set_output_low(&self) {
        let pin = unsafe { &mut *self.pin.get() };
        pin.set_low();
        pin.set_as_output();
    }

    fn is_high(&self) -> bool {
        let pin = unsafe { &mut *self.pin.get() };
        pin.is_high()
    }

    fn now_us(&self) -> u32 {
        Instant::now().as_micros() as u32
    }

    fn delay_us(&self, us: u32) {
        block_for(Duration::from_micros(u64::from(us)));
    }
}
