//! Physical-order pixel state.
//!
//! Animation code usually thinks in a logical layout (rows, a single line, ...) while the
//! strands are wired in whatever order was convenient, serpentine zig-zags being the usual
//! case. A remap table translates one into the other.

use serial_p9813_shared::{PIXEL_DISCONNECTED, PIXEL_UNUSED};

use crate::{gamma::GammaTable, try_filled, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
	pub r: u8,
	pub g: u8,
	pub b: u8,
}

impl Rgb {
	pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

	/// Unpacks a `0x00RRGGBB` pixel; the top byte is ignored.
	#[inline]
	pub fn from_packed(pixel: u32) -> Self {
		Self {
			r: (pixel >> 16) as u8,
			g: (pixel >> 8) as u8,
			b: pixel as u8,
		}
	}

	#[inline]
	pub fn packed(self) -> u32 {
		serial_p9813_shared::rgb(self.r, self.g, self.b)
	}
}

/// What a physical position on a strand shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
	Lit(Rgb),
	/// A pixel is attached but kept off.
	Unused,
	/// No pixel is attached here; the position only pads a shorter strand.
	Disconnected,
}

impl Slot {
	/// Color put on the wire, after gamma correction. Unlit slots are black.
	#[inline]
	pub fn output(self, gamma: &GammaTable) -> Rgb {
		match self {
			Slot::Lit(color) => gamma.apply(color),
			Slot::Unused | Slot::Disconnected => Rgb::BLACK,
		}
	}
}

/// One slot per physical pixel, strand-major: strand `s`, pixel `p` is at `s * pixels_per_strand + p`.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
	slots: Vec<Slot>,
}

impl FrameBuffer {
	pub fn new(total_pixels: usize) -> Result<Self> {
		Ok(Self {
			slots: try_filled(Slot::Unused, total_pixels)?,
		})
	}

	pub fn len(&self) -> usize {
		self.slots.len()
	}

	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	pub fn slots(&self) -> &[Slot] {
		&self.slots
	}

	/// Turns every pixel off.
	pub fn load_blank(&mut self) {
		self.slots.fill(Slot::Unused);
	}

	/// Loads packed `0x00RRGGBB` pixels.
	///
	/// Without a remap pixel `i` goes to physical position `i`. With one, physical
	/// position `i` shows `pixels[remap[i]]`, or stays dark for [`PIXEL_UNUSED`] and
	/// [`PIXEL_DISCONNECTED`]. Several positions may show the same pixel.
	///
	/// Everything is validated before the buffer is touched, so a rejected frame
	/// leaves the previous one intact.
	pub fn load(&mut self, pixels: &[u32], remap: Option<&[i32]>) -> Result<()> {
		let total = self.slots.len();
		if pixels.len() != total {
			return Err(Error::SizeMismatch {
				expected: total,
				actual:   pixels.len(),
			});
		}

		let Some(remap) = remap else {
			for (slot, pixel) in self.slots.iter_mut().zip(pixels) {
				*slot = Slot::Lit(Rgb::from_packed(*pixel));
			}
			return Ok(());
		};

		if remap.len() != pixels.len() {
			return Err(Error::SizeMismatch {
				expected: pixels.len(),
				actual:   remap.len(),
			});
		}
		if let Some((position, index)) = remap
			.iter()
			.enumerate()
			.find(|&(_, &index)| !is_valid_entry(index, total))
		{
			return Err(Error::InvalidParameter(format!(
				"remap entry {index} at position {position} is outside 0..{total}"
			)));
		}

		for (slot, &index) in self.slots.iter_mut().zip(remap) {
			*slot = match index {
				PIXEL_UNUSED => Slot::Unused,
				PIXEL_DISCONNECTED => Slot::Disconnected,
				index => Slot::Lit(Rgb::from_packed(pixels[index as usize])),
			};
		}

		Ok(())
	}
}

fn is_valid_entry(index: i32, total: usize) -> bool {
	index == PIXEL_UNUSED
		|| index == PIXEL_DISCONNECTED
		|| usize::try_from(index).map_or(false, |index| index < total)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unpacks_channels() {
		assert_eq!(Rgb::from_packed(0xAA12_3456), Rgb { r: 0x12, g: 0x34, b: 0x56 });
		assert_eq!(Rgb { r: 0x12, g: 0x34, b: 0x56 }.packed(), 0x0012_3456);
	}

	#[test]
	fn loads_in_logical_order_without_remap() {
		let mut frame = FrameBuffer::new(3).unwrap();
		frame.load(&[1, 2, 3], None).unwrap();

		let blues: Vec<_> = frame.slots().iter().map(|s| s.output(&GammaTable::identity()).b).collect();
		assert_eq!(blues, [1, 2, 3]);
	}

	#[test]
	fn remap_gathers_pixels() {
		let mut frame = FrameBuffer::new(4).unwrap();
		frame.load(&[10, 20, 30, 40], Some(&[3, 0, 0, PIXEL_DISCONNECTED][..])).unwrap();

		assert_eq!(frame.slots(), &[
			Slot::Lit(Rgb::from_packed(40)),
			Slot::Lit(Rgb::from_packed(10)),
			Slot::Lit(Rgb::from_packed(10)),
			Slot::Disconnected,
		]);
	}

	#[test]
	fn rejects_wrong_pixel_count() {
		let mut frame = FrameBuffer::new(5).unwrap();
		let err = frame.load(&[0; 4], None).unwrap_err();

		assert!(matches!(err, Error::SizeMismatch { expected: 5, actual: 4 }));
	}

	#[test]
	fn rejects_wrong_remap_length() {
		let mut frame = FrameBuffer::new(3).unwrap();
		let err = frame.load(&[0; 3], Some(&[0, 1][..])).unwrap_err();

		assert!(matches!(err, Error::SizeMismatch { expected: 3, actual: 2 }));
	}

	#[test]
	fn bad_remap_keeps_previous_frame() {
		let mut frame = FrameBuffer::new(2).unwrap();
		frame.load(&[7, 7], None).unwrap();

		assert!(matches!(frame.load(&[1, 1], Some(&[0, 2][..])), Err(Error::InvalidParameter(_))));
		assert!(matches!(frame.load(&[1, 1], Some(&[-3, 0][..])), Err(Error::InvalidParameter(_))));
		assert_eq!(frame.slots(), &[Slot::Lit(Rgb::from_packed(7)); 2]);
	}

	#[test]
	fn blank_turns_everything_off() {
		let mut frame = FrameBuffer::new(2).unwrap();
		frame.load(&[0xFFFFFF; 2], None).unwrap();
		frame.load_blank();

		assert_eq!(frame.slots(), &[Slot::Unused; 2]);
	}

	#[test]
	fn unallocatable_buffer_is_an_error() {
		assert!(matches!(FrameBuffer::new(usize::MAX), Err(Error::OutOfMemory(_))));
	}
}
