//! P9813 wire format.
//!
//! A P9813 strand is a two-wire (clock + data) shift register: each pixel consumes a 32-bit
//! word, MSB first, sampled on the rising clock edge, see [`pixel_word`]. Thirty-two zero
//! bits after the last pixel latch the shifted data onto the LEDs.
//!
//! The FTDI adapter updates all eight of its output lines with every byte written, so the
//! frame is laid out like a player piano roll: output byte `k` holds bit `k` of the current
//! pixel word of every strand, each strand on its own line mask. Strands therefore shift in
//! parallel and a frame is as long as one strand, regardless of how many strands there are.

use serial_p9813_shared::{
	pixel_word,
	BITS_PER_PIXEL,
	DEFAULT_CLOCK_PIN,
	DEFAULT_STRAND_PINS,
	MAX_STRANDS,
};

use crate::{frame::Slot, gamma::GammaTable, try_filled, ClockMode, Error, Result};

/// Which output lines carry which strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrandPins {
	data:  [u8; MAX_STRANDS],
	clock: u8,
}

impl Default for StrandPins {
	fn default() -> Self {
		Self {
			data:  DEFAULT_STRAND_PINS,
			clock: DEFAULT_CLOCK_PIN,
		}
	}
}

impl StrandPins {
	pub fn strand(&self, strand: usize) -> Option<u8> {
		self.data.get(strand).copied()
	}

	pub fn clock(&self) -> u8 {
		self.clock
	}
}

#[derive(Debug, Clone)]
pub struct FrameEncoder {
	clock:             ClockMode,
	strands:           usize,
	pixels_per_strand: usize,
	pins:              StrandPins,
	frame:             Vec<u8>,
}

impl FrameEncoder {
	pub fn new(clock: ClockMode, strands: usize, pixels_per_strand: usize) -> Result<Self> {
		if strands > MAX_STRANDS {
			return Err(Error::InvalidParameter(format!("{strands} strands, at most {MAX_STRANDS}")));
		}
		let frame_len = pixels_per_strand
			.checked_add(1)
			.and_then(|n| n.checked_mul(clock.bytes_per_pixel()))
			.ok_or_else(|| Error::InvalidParameter(format!("{pixels_per_strand} pixels per strand")))?;

		let pins = StrandPins::default();
		let mut frame = try_filled(0u8, frame_len)?;
		write_clock(clock, pins.clock, &mut frame);

		Ok(Self {
			clock,
			strands,
			pixels_per_strand,
			pins,
			frame,
		})
	}

	pub fn pins(&self) -> &StrandPins {
		&self.pins
	}

	/// Strands in use that have no output line assigned and will stay dark.
	pub fn unassigned_strands(&self) -> impl Iterator<Item = usize> + '_ {
		(0..self.strands).filter(|&s| self.pins.data[s] == 0)
	}

	/// Assigns one or more output lines (OR'd masks) to a strand. Applies from the next frame on.
	pub fn set_strand_pin(&mut self, strand: usize, bits: u8) -> Result<()> {
		if strand >= self.strands {
			return Err(Error::InvalidParameter(format!(
				"strand {strand} is outside 0..{}",
				self.strands
			)));
		}
		if bits == 0 {
			return Err(Error::InvalidParameter(format!("strand {strand} needs at least one output line")));
		}
		if self.clock == ClockMode::Bitbang && bits & self.pins.clock != 0 {
			return Err(Error::InvalidParameter(format!(
				"lines {bits:#04x} overlap the clock line {:#04x}",
				self.pins.clock
			)));
		}

		self.pins.data[strand] = bits;
		Ok(())
	}

	/// Moves the software clock to other line(s). Only meaningful with [`ClockMode::Bitbang`].
	pub fn set_clock_pin(&mut self, bits: u8) -> Result<()> {
		if self.clock != ClockMode::Bitbang {
			return Err(Error::InvalidParameter("the CBUS clock has no output line to assign".into()));
		}
		if bits == 0 {
			return Err(Error::InvalidParameter("the clock needs at least one output line".into()));
		}
		if let Some(strand) = (0..self.strands).find(|&s| self.pins.data[s] & bits != 0) {
			return Err(Error::InvalidParameter(format!(
				"clock lines {bits:#04x} overlap strand {strand}"
			)));
		}

		self.pins.clock = bits;
		Ok(())
	}

	pub fn bytes_per_pixel(&self) -> usize {
		self.clock.bytes_per_pixel()
	}

	/// Encoded frame length, latch included.
	pub fn frame_len(&self) -> usize {
		(self.pixels_per_strand + 1) * self.bytes_per_pixel()
	}

	/// Data bits shifted into the strands per frame, summed over all strands.
	pub fn frame_bits(&self) -> u64 {
		(self.pixels_per_strand as u64 + 1) * (BITS_PER_PIXEL * self.strands) as u64
	}

	/// The latch sequence alone: 32 zero bits, clocked.
	pub fn latch(&self) -> Vec<u8> {
		let mut latch = vec![0u8; self.bytes_per_pixel()];
		write_clock(self.clock, self.pins.clock, &mut latch);
		latch
	}

	/// Last encoded frame.
	pub fn frame(&self) -> &[u8] {
		&self.frame
	}

	/// Encodes physical-order `slots` (strand-major, one strand after the other) into
	/// the sideways wire layout and returns the encoded frame.
	pub fn encode(&mut self, slots: &[Slot], gamma: &GammaTable) -> &[u8] {
		debug_assert_eq!(slots.len(), self.strands * self.pixels_per_strand);

		let bytes_per_pixel = self.bytes_per_pixel();

		// clock ticks are rendered up front, every bit slot needs them whether or not a
		// strand sets a data bit there
		let frame_len = self.frame_len();
		self.frame.clear();
		self.frame.resize(frame_len, 0);
		write_clock(self.clock, self.pins.clock, &mut self.frame);

		for (strand, pixels) in slots.chunks(self.pixels_per_strand).enumerate().take(self.strands) {
			let mask = self.pins.data[strand];
			if mask == 0 {
				continue;
			}

			for (p, slot) in pixels.iter().enumerate() {
				let color = slot.output(gamma);
				let word = pixel_word(color.r, color.g, color.b);
				let out = &mut self.frame[p * bytes_per_pixel..(p + 1) * bytes_per_pixel];

				match self.clock {
					ClockMode::Bitbang => {
						for (bit, pair) in out.chunks_exact_mut(2).enumerate() {
							if word & (0x8000_0000 >> bit) != 0 {
								pair[0] |= mask;
								pair[1] |= mask;
							}
						}
					}
					ClockMode::Cbus => {
						for (bit, byte) in out.iter_mut().enumerate() {
							if word & (0x8000_0000 >> bit) != 0 {
								*byte |= mask;
							}
						}
					}
				}
			}
		}

		&self.frame
	}

	/// Reads the pixel words of one strand back out of an encoded frame.
	pub fn unpack(&self, frame: &[u8], strand: usize) -> Vec<u32> {
		let Some(mask) = self.pins.strand(strand).filter(|&m| m != 0) else {
			return Vec::new();
		};
		let step = match self.clock {
			ClockMode::Bitbang => 2,
			ClockMode::Cbus => 1,
		};

		frame
			.chunks_exact(self.bytes_per_pixel())
			.take(self.pixels_per_strand)
			.map(|pixel| {
				pixel
					.iter()
					.step_by(step)
					.fold(0u32, |word, byte| (word << 1) | u32::from(byte & mask != 0))
			})
			.collect()
	}

}

/// Sets the clock line on every second byte, so each bit goes out as clock low then clock high.
fn write_clock(clock: ClockMode, pin: u8, out: &mut [u8]) {
	if clock == ClockMode::Bitbang {
		for tick in out.iter_mut().skip(1).step_by(2) {
			*tick = pin;
		}
	}
}

#[cfg(test)]
mod tests {
	use serial_p9813_shared::{FTDI_CTS, FTDI_DSR, FTDI_RX, FTDI_TX, PIXEL_OFF_WORD};

	use super::*;
	use crate::frame::Rgb;

	fn lit(packed: u32) -> Slot {
		Slot::Lit(Rgb::from_packed(packed))
	}

	#[test]
	fn frame_length_includes_latch() {
		assert_eq!(FrameEncoder::new(ClockMode::Bitbang, 2, 10).unwrap().frame_len(), 11 * 64);
		assert_eq!(FrameEncoder::new(ClockMode::Cbus, 8, 10).unwrap().frame_len(), 11 * 32);
	}

	#[test]
	fn impossible_sizes_are_rejected() {
		assert!(matches!(
			FrameEncoder::new(ClockMode::Bitbang, 1, usize::MAX),
			Err(Error::InvalidParameter(_))
		));
		assert!(matches!(
			FrameEncoder::new(ClockMode::Cbus, 1, usize::MAX / 2),
			Err(Error::InvalidParameter(_))
		));
		assert!(matches!(FrameEncoder::new(ClockMode::Cbus, 9, 1), Err(Error::InvalidParameter(_))));
	}

	#[test]
	fn cbus_layout_is_one_byte_per_bit() {
		let mut encoder = FrameEncoder::new(ClockMode::Cbus, 1, 1).unwrap();
		let frame = encoder.encode(&[lit(0xFF0000)], &GammaTable::identity()).to_vec();

		// full red: flag byte 1111_1100, 16 zero bits for blue and green, eight ones
		let expected_bits = pixel_word(0xFF, 0, 0);
		assert_eq!(expected_bits, 0xFC00_00FF);
		for bit in 0..32 {
			let set = expected_bits & (0x8000_0000 >> bit) != 0;
			assert_eq!(frame[bit], if set { FTDI_TX } else { 0 }, "bit {bit}");
		}
		assert!(frame[32..].iter().all(|&b| b == 0), "latch must be zeros");
	}

	#[test]
	fn bitbang_layout_clocks_every_bit() {
		let mut encoder = FrameEncoder::new(ClockMode::Bitbang, 1, 1).unwrap();
		let frame = encoder.encode(&[Slot::Unused], &GammaTable::identity()).to_vec();

		// off pixel: eight ones then 24 zeros
		for bit in 0..32 {
			let data = if bit < 8 { FTDI_TX } else { 0 };
			assert_eq!(frame[bit * 2], data);
			assert_eq!(frame[bit * 2 + 1], data | FTDI_CTS);
		}
		assert_eq!(&frame[64..], encoder.latch().as_slice());
	}

	#[test]
	fn strands_share_bytes_on_their_own_lines() {
		let mut encoder = FrameEncoder::new(ClockMode::Cbus, 2, 2).unwrap();
		let slots = [lit(0x102030), lit(0x405060), lit(0xFFFFFF), Slot::Unused];
		let frame = encoder.encode(&slots, &GammaTable::identity()).to_vec();

		assert_eq!(encoder.unpack(&frame, 0), [pixel_word(0x10, 0x20, 0x30), pixel_word(0x40, 0x50, 0x60)]);
		assert_eq!(encoder.unpack(&frame, 1), [pixel_word(0xFF, 0xFF, 0xFF), PIXEL_OFF_WORD]);
		assert!(frame.iter().all(|&b| b & !(FTDI_TX | FTDI_RX) == 0));
	}

	#[test]
	fn gamma_is_applied_before_packing() {
		let mut encoder = FrameEncoder::new(ClockMode::Bitbang, 1, 1).unwrap();
		let gamma = GammaTable::new(&crate::GammaCurve::Simple(2.2)).unwrap();
		let frame = encoder.encode(&[lit(0x808080)], &gamma).to_vec();

		assert_eq!(encoder.unpack(&frame, 0), [pixel_word(56, 56, 56)]);
	}

	#[test]
	fn reassigned_strand_moves_lines() {
		let mut encoder = FrameEncoder::new(ClockMode::Bitbang, 2, 1).unwrap();
		encoder.set_strand_pin(1, FTDI_DSR).unwrap();
		let frame = encoder.encode(&[Slot::Unused, lit(0xFFFFFF)], &GammaTable::identity()).to_vec();

		assert!(frame.iter().all(|&b| b & FTDI_RX == 0));
		assert_eq!(encoder.unpack(&frame, 1), [0xC0FF_FFFF]);
	}

	#[test]
	fn pin_validation() {
		let mut encoder = FrameEncoder::new(ClockMode::Bitbang, 2, 1).unwrap();

		assert!(encoder.set_strand_pin(2, FTDI_TX).is_err());
		assert!(encoder.set_strand_pin(0, 0).is_err());
		assert!(encoder.set_strand_pin(0, FTDI_CTS).is_err());
		assert!(encoder.set_clock_pin(FTDI_TX).is_err());
		assert!(encoder.set_clock_pin(FTDI_DSR).is_ok());
		assert!(encoder.set_strand_pin(0, FTDI_CTS).is_ok());

		let mut cbus = FrameEncoder::new(ClockMode::Cbus, 8, 1).unwrap();
		assert!(cbus.set_strand_pin(7, FTDI_CTS).is_ok());
		assert!(cbus.set_clock_pin(FTDI_CTS).is_err());
	}

	#[test]
	fn default_pins_leave_last_strands_unassigned() {
		let encoder = FrameEncoder::new(ClockMode::Bitbang, 7, 1).unwrap();
		assert_eq!(encoder.unassigned_strands().collect::<Vec<_>>(), [6]);
	}
}
