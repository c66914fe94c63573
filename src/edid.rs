//! Physical address discovery over DDC.
//!
//! A sink publishes its EDID on the DDC I2C bus; the CEC physical address
//! of the port we are plugged into lives in the HDMI vendor-specific data
//! block of the first CEA-861 extension. Used at setup when the
//! configuration does not pin a physical address.

use embedded_hal::i2c::I2c;

/// EDID blocks are read from this bus address.
const EDID_ADDRESS: u8 = 0x50;
/// Segment pointer register for EDIDs larger than two blocks.
const SEGMENT_POINTER_ADDRESS: u8 = 0x30;

const BLOCK_LEN: usize = 128;
const EDID_HEADER: [u8; 8] = [0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
/// CEA-861 extension tag.
const CEA_EXTENSION_TAG: u8 = 0x02;
/// Vendor-specific data block tag inside a CEA-861 block.
const VSDB_TAG: u8 = 3;
/// IEEE registration identifier of HDMI Licensing, LLC.
const HDMI_IDENTIFIER: u32 = 0x000C03;

/// Why no physical address could be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EdidError<E> {
    /// Bus error talking to the sink.
    I2c(E),
    /// The base block carries no extensions, so no CEA-861 block either.
    NoExtensionBlocks,
    /// The first extension is not a CEA-861 block.
    NotCea861,
    /// No HDMI vendor-specific data block in the extension.
    NoPhysicalAddress,
}

impl<E> From<E> for EdidError<E> {
    fn from(err: E) -> Self {
        EdidError::I2c(err)
    }
}

/// Reads the sink's EDID over DDC and extracts the physical address.
pub struct DdcReader<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> DdcReader<I2C> {
    pub fn new(i2c: I2C) -> Self {
        DdcReader { i2c }
    }

    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Read the 16-bit physical address of the port we hang off.
    ///
    /// Header or checksum problems in the base block are logged but not
    /// fatal; sinks with marginal EDID proms are common enough.
    pub fn read_physical_address(&mut self) -> Result<u16, EdidError<I2C::Error>> {
        // Segment pointer 0 covers blocks 0 and 1. Sinks without segment
        // support may refuse the write; that is fine.
        let _ = self.i2c.write(SEGMENT_POINTER_ADDRESS, &[0x00]);

        let mut base = [0u8; BLOCK_LEN];
        self.i2c.write_read(EDID_ADDRESS, &[0x00], &mut base)?;

        if base[..8] != EDID_HEADER {
            warn!("invalid EDID header");
        }
        if !block_checksum_ok(&base) {
            warn!("EDID base block checksum error");
        }
        debug!("EDID version: {}.{}", base[0x12], base[0x13]);

        if base[0x7E] == 0 {
            return Err(EdidError::NoExtensionBlocks);
        }

        let mut extension = [0u8; BLOCK_LEN];
        self.i2c
            .write_read(EDID_ADDRESS, &[BLOCK_LEN as u8], &mut extension)?;

        if extension[0] != CEA_EXTENSION_TAG {
            return Err(EdidError::NotCea861);
        }
        if !block_checksum_ok(&extension) {
            warn!("EDID extension block checksum error");
        }

        physical_address_from_cea(&extension).ok_or(EdidError::NoPhysicalAddress)
    }
}

/// Every EDID block sums to zero modulo 256.
fn block_checksum_ok(block: &[u8; BLOCK_LEN]) -> bool {
    block.iter().fold(0u8, |sum, &b| sum.wrapping_add(b)) == 0
}

/// Walk the data block collection of a CEA-861 extension and pull the
/// physical address out of the HDMI vendor-specific data block.
pub fn physical_address_from_cea(block: &[u8; BLOCK_LEN]) -> Option<u16> {
    if block[0] != CEA_EXTENSION_TAG {
        return None;
    }
    // Byte 2 points at the detailed timing descriptors; the data block
    // collection sits between byte 4 and there.
    let collection_end = match block[2] as usize {
        0 => BLOCK_LEN,
        end if end < 4 => return None,
        end => end.min(BLOCK_LEN),
    };

    let mut offset = 4;
    while offset < collection_end {
        let header = block[offset];
        let tag = header >> 5;
        let len = (header & 0x1F) as usize;
        let payload_end = offset + 1 + len;
        if payload_end > collection_end {
            return None;
        }
        if tag == VSDB_TAG && len >= 5 {
            let identifier = u32::from(block[offset + 3]) << 16
                | u32::from(block[offset + 2]) << 8
                | u32::from(block[offset + 1]);
            if identifier == HDMI_IDENTIFIER {
                return Some(u16::from(block[offset + 4]) << 8 | u16::from(block[offset + 5]));
            }
        }
        offset = payload_end;
    }
    None
}
