#![no_std]

/// Number of output lines on the FTDI adapter, one per bit of every byte written.
pub const OUTPUT_LINES: usize = 8;

/// Every byte written drives all lines at once, so at most 8 strands (7 when one line is the clock).
pub const MAX_STRANDS: usize = OUTPUT_LINES;

// FTDI line bit masks
pub const FTDI_TX: u8 = 0x01;
pub const FTDI_RX: u8 = 0x02;
pub const FTDI_RTS: u8 = 0x04;
pub const FTDI_CTS: u8 = 0x08;
pub const FTDI_DTR: u8 = 0x10;
pub const FTDI_DSR: u8 = 0x20;
pub const FTDI_DCD: u8 = 0x40;
pub const FTDI_RI: u8 = 0x80;

/// Default line assignment per strand.
///
/// Strand 2 drives DTR and RTS together: the FTDI cable and most third-party
/// adapters expose a different one of the two in the last header position.
/// Strands 3 to 5 take the remaining free lines (DSR, DCD, RI) so up to six strands
/// work without any `set_strand_pin` call. Strands 6 and 7 have no free line by default
/// and must be assigned.
pub const DEFAULT_STRAND_PINS: [u8; MAX_STRANDS] = [
	FTDI_TX,
	FTDI_RX,
	FTDI_DTR | FTDI_RTS,
	FTDI_DSR,
	FTDI_DCD,
	FTDI_RI,
	0,
	0,
];

/// Default line carrying the software clock.
pub const DEFAULT_CLOCK_PIN: u8 = FTDI_CTS;

/// OR'd into the strand count at the C boundary to select the CBUS hardware clock.
pub const CBUS_CLOCK_FLAG: i32 = 8;

pub const BITS_PER_PIXEL: usize = 32;
/// Software clock: each bit is a clock-low byte followed by a clock-high byte.
pub const BITBANG_BYTES_PER_PIXEL: usize = BITS_PER_PIXEL * 2;
/// Hardware clock: one byte per bit.
pub const CBUS_BYTES_PER_PIXEL: usize = BITS_PER_PIXEL;

/// Remap entry for a pixel that is wired but should stay off.
pub const PIXEL_UNUSED: i32 = -1;
/// Remap entry for a position with no pixel attached.
pub const PIXEL_DISCONNECTED: i32 = -2;

/// Highest rate the FT232R accepts in bit-bang mode.
pub const DEFAULT_BAUD_RATE: u32 = 3_090_000;

/// Gamma installed by `open` unless configured otherwise.
pub const DEFAULT_GAMMA: f64 = 2.4;

/// Builds a packed `0x00RRGGBB` pixel.
#[inline]
pub const fn rgb(r: u8, g: u8, b: u8) -> u32 {
	((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Packs one color into the 32-bit P9813 word, sent MSB first.
///
/// Layout: `[1 1 ~B7 ~B6 ~G7 ~G6 ~R7 ~R6] [B] [G] [R]`. The flag byte is the
/// checksum the chip uses to recognize the start of a pixel.
#[inline]
pub const fn pixel_word(r: u8, g: u8, b: u8) -> u32 {
	let flag = 0xC0 | ((!b & 0xC0) >> 2) | ((!g & 0xC0) >> 4) | ((!r & 0xC0) >> 6);

	((flag as u32) << 24) | ((b as u32) << 16) | ((g as u32) << 8) | r as u32
}

/// Word for a pixel that is off.
pub const PIXEL_OFF_WORD: u32 = pixel_word(0, 0, 0);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn off_pixel_is_all_flag_bits() {
		assert_eq!(PIXEL_OFF_WORD, 0xFF00_0000);
	}

	#[test]
	fn flag_inverts_top_bits() {
		// every top bit set: only the two leading ones remain
		assert_eq!(pixel_word(0xFF, 0xFF, 0xFF), 0xC0FF_FFFF);
		// red 0x80 clears the R7 flag bit
		assert_eq!(pixel_word(0x80, 0, 0), 0xFD00_0080);
		assert_eq!(pixel_word(0, 0x40, 0), 0xFB00_4000);
		assert_eq!(pixel_word(0, 0, 0xC0), 0xCFC0_0000);
	}

	#[test]
	fn packs_rgb() {
		assert_eq!(rgb(0x12, 0x34, 0x56), 0x0012_3456);
	}

	#[test]
	fn default_pins_keep_the_classic_wiring() {
		// the first three strands and the clock sit where TCL adapters put them
		assert_eq!(DEFAULT_STRAND_PINS[..3], [FTDI_TX, FTDI_RX, FTDI_DTR | FTDI_RTS]);
		assert_eq!(DEFAULT_CLOCK_PIN, FTDI_CTS);

		// the extra strands only take lines nothing else uses
		let mut used = DEFAULT_CLOCK_PIN;
		for pins in DEFAULT_STRAND_PINS {
			assert_eq!(used & pins, 0);
			used |= pins;
		}
		assert_eq!(used, 0xFF);
		assert_eq!(DEFAULT_STRAND_PINS[6..], [0, 0]);
	}
}
