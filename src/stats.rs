//! Frame statistics: throughput, frame rate and estimated current draw.

use std::{
	fmt,
	time::{Duration, Instant},
};

use crate::frame::{Rgb, Slot};

const SECONDS_PER_HOUR: f64 = 60.0 * 60.0;

/// Current readings (mA at 5 V) of a test strand, used to estimate the draw of a frame.
///
/// Each `*_ma` reading is the total for `pixels` pixels all showing that color at full
/// brightness, including the `off_ma` the driver chips draw on their own. Combined colors
/// draw less than the sum of their parts, which the pairwise readings capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
	pub pixels:        u32,
	pub off_ma:        f64,
	pub red_ma:        f64,
	pub green_ma:      f64,
	pub blue_ma:       f64,
	pub red_green_ma:  f64,
	pub green_blue_ma: f64,
	pub red_blue_ma:   f64,
}

impl Default for Calibration {
	/// Readings of a 25 pixel strand.
	fn default() -> Self {
		Self {
			pixels:        25,
			off_ma:        15.0,
			red_ma:        510.0,
			green_ma:      491.0,
			blue_ma:       491.0,
			red_green_ma:  956.0,
			green_blue_ma: 929.0,
			red_blue_ma:   957.0,
		}
	}
}

impl Calibration {
	/// Draw of one pixel that is attached but off.
	pub fn off_pixel_ma(&self) -> f64 {
		self.off_ma / f64::from(self.pixels)
	}

	/// Estimated draw of one pixel showing `color` (after gamma correction).
	pub fn pixel_ma(&self, color: Rgb) -> f64 {
		let n = f64::from(self.pixels);
		let red = self.red_ma - self.off_ma;
		let green = self.green_ma - self.off_ma;
		let blue = self.blue_ma - self.off_ma;

		let combo_rg = (self.red_green_ma - self.off_ma) / (red + green);
		let combo_gb = (self.green_blue_ma - self.off_ma) / (green + blue);
		let combo_rb = (self.red_blue_ma - self.off_ma) / (red + blue);

		let (r, g, b) = (f64::from(color.r), f64::from(color.g), f64::from(color.b));
		let full = 255.0 * 255.0;

		let linear = (r * red + g * green + b * blue) / n / 255.0;
		let overlap = (1.0 - r * g / full * (1.0 - combo_rg))
			* (1.0 - g * b / full * (1.0 - combo_gb))
			* (1.0 - r * b / full * (1.0 - combo_rb));

		self.off_pixel_ma() + linear * overlap
	}

	/// Draw of one physical slot showing `color`.
	pub fn slot_ma(&self, slot: Slot, color: Rgb) -> f64 {
		match slot {
			Slot::Disconnected => 0.0,
			Slot::Unused => self.off_pixel_ma(),
			Slot::Lit(_) => self.pixel_ma(color),
		}
	}
}

/// One successfully written frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameSample {
	pub bytes:      usize,
	pub bits:       u64,
	pub io_time:    Duration,
	pub finished:   Instant,
	pub current_ma: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
	/// Frames written.
	pub frames:           u64,
	/// Refreshes that failed.
	pub errors:           u64,
	/// Bits shifted into the strands by the last frame.
	pub bits:             u64,
	pub bits_total:       u64,
	pub bytes_written:    u64,
	/// Write speed of the last frame in bits/s.
	pub bps:              u64,
	pub bps_avg:          u64,
	pub io_time:          Duration,
	pub io_time_total:    Duration,
	/// Time between the end of the previous frame and the end of the last one.
	pub frame_time:       Duration,
	pub frame_time_total: Duration,
	pub fps:              f64,
	pub fps_avg:          f64,
	/// Estimated draw of the last frame in mA.
	pub ma:               f64,
	pub ma_avg:           f64,
	pub ma_max:           f64,
	/// Charge used while the previous frame was shown, in mAh.
	pub mah:              f64,
	pub mah_total:        f64,

	last_frame_end: Option<Instant>,
}

impl Stats {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn reset(&mut self) {
		*self = Self::default();
	}

	pub(crate) fn record_error(&mut self) {
		self.errors += 1;
	}

	pub(crate) fn record_frame(&mut self, sample: FrameSample) {
		self.bits = sample.bits;
		self.bits_total += sample.bits;
		self.bytes_written += sample.bytes as u64;

		self.io_time = sample.io_time;
		if sample.io_time.is_zero() {
			self.bps = 0;
		} else {
			self.bps = (sample.bits as f64 / sample.io_time.as_secs_f64()) as u64;
			self.io_time_total += sample.io_time;
		}
		self.bps_avg = if self.io_time_total.is_zero() {
			self.bps
		} else {
			(self.bits_total as f64 / self.io_time_total.as_secs_f64()) as u64
		};

		if let Some(previous) = self.last_frame_end {
			self.frame_time = sample.finished.saturating_duration_since(previous);
			if self.frame_time.is_zero() {
				self.fps = 0.0;
			} else {
				self.fps = 1.0 / self.frame_time.as_secs_f64();
				self.frame_time_total += self.frame_time;
			}

			let total_secs = self.frame_time_total.as_secs_f64();
			if total_secs > 0.0 {
				self.fps_avg = self.frames as f64 / total_secs;
			}

			// the previous frame was on display for frame_time, charge it at its own draw
			self.mah = self.ma * self.frame_time.as_secs_f64() / SECONDS_PER_HOUR;
			self.mah_total += self.mah;
			if total_secs > 0.0 {
				self.ma_avg = self.mah_total * SECONDS_PER_HOUR / total_secs;
			}
		}

		self.ma = sample.current_ma;
		self.ma_max = self.ma_max.max(sample.current_ma);
		self.last_frame_end = Some(sample.finished);
		self.frames += 1;
	}
}

impl fmt::Display for Stats {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "Total frames               : {}", self.frames)?;
		writeln!(f, "Failed refreshes           : {}", self.errors)?;
		writeln!(f, "Bits in this frame         : {}", self.bits)?;
		writeln!(f, "Total bits output          : {}", self.bits_total)?;
		writeln!(f, "Total bytes written        : {}", self.bytes_written)?;
		writeln!(f, "Write speed for this frame : {} bits/sec", self.bps)?;
		writeln!(f, "Average write speed        : {} bits/sec", self.bps_avg)?;
		writeln!(f, "I/O time for this frame    : {} uS", self.io_time.as_micros())?;
		writeln!(f, "Total time for this frame  : {} uS", self.frame_time.as_micros())?;
		writeln!(f, "Total I/O time, all frames : {} uS", self.io_time_total.as_micros())?;
		writeln!(
			f,
			"Total time, all frames     : {} uS ({} seconds)",
			self.frame_time_total.as_micros(),
			self.frame_time_total.as_secs()
		)?;
		writeln!(f, "FPS for this frame         : {:.1}", self.fps)?;
		writeln!(f, "Average frames/second      : {:.1}", self.fps_avg)?;
		writeln!(f, "Current use for this frame : {:.3} mA (@5.0V)", self.ma)?;
		writeln!(f, "Average current            : {:.3} mA (@5.0V)", self.ma_avg)?;
		writeln!(f, "Peak current               : {:.3} mA (@5.0V)", self.ma_max)?;
		writeln!(f, "Charge for prior frame     : {:.6} mAH (@5.0V)", self.mah)?;
		write!(f, "Total charge, all frames   : {:.3} mAH (@5.0V)", self.mah_total)
	}
}
