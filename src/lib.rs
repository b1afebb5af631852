//! Drive strands of P9813 ("Total Control Lighting") RGB pixels through an FTDI
//! USB serial adapter.
//!
//! Every byte written to the adapter sets all eight of its output lines at once, so
//! a frame is packed "sideways": byte `k` holds bit `k` of the current pixel of every
//! strand, each strand on its own line, with the clock on another line (or provided by
//! the adapter's CBUS pin in [`ClockMode::Cbus`]).
//!
//! ```no_run
//! use serial_p9813::{rgb, Config, FtdiConnector, StrandController};
//!
//! # fn main() -> serial_p9813::Result<()> {
//! let mut strands = StrandController::new(FtdiConnector::first());
//! strands.open(Config::new(2, 25))?;
//! strands.set_gamma(2.2)?;
//! strands.refresh(&[rgb(255, 128, 0); 50])?;
//! strands.close()?;
//! # Ok(())
//! # }
//! ```

use std::{collections::TryReserveError, io};

pub use serial_p9813_shared::{
	rgb,
	FTDI_CTS,
	FTDI_DCD,
	FTDI_DSR,
	FTDI_DTR,
	FTDI_RI,
	FTDI_RTS,
	FTDI_RX,
	FTDI_TX,
	PIXEL_DISCONNECTED,
	PIXEL_UNUSED,
};
use serial_p9813_shared::{
	BITBANG_BYTES_PER_PIXEL,
	CBUS_BYTES_PER_PIXEL,
	DEFAULT_GAMMA,
	MAX_STRANDS,
};

pub mod controller;
pub mod encoder;
pub mod ffi;
pub mod frame;
pub mod gamma;
pub mod stats;
pub mod status;
#[cfg(feature = "tokio")]
pub mod tokio;
pub mod transport;

pub use controller::{ControllerState, StrandController};
pub use encoder::{FrameEncoder, StrandPins};
pub use frame::{FrameBuffer, Rgb, Slot};
pub use gamma::{ChannelCurve, GammaCurve, GammaTable};
pub use stats::{Calibration, Stats};
pub use status::Status;
pub use transport::{Connector, FtdiConnector, FtdiTransport, MemoryTransport, Transport};

/// Upper bound for one encoded frame (latch included), 262143 pixels per strand with the
/// software clock.
pub const MAX_FRAME_BYTES: usize = 1 << 24;

/// How the serial clock reaches the strands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
	/// The clock is toggled in software on one of the output lines.
	#[default]
	Bitbang,
	/// The adapter's CBUS pin is configured to emit the clock. Twice the throughput and
	/// all eight lines are free for data, but it needs a specially configured FTDI chip.
	Cbus,
}

impl ClockMode {
	pub fn bytes_per_pixel(self) -> usize {
		match self {
			ClockMode::Bitbang => BITBANG_BYTES_PER_PIXEL,
			ClockMode::Cbus => CBUS_BYTES_PER_PIXEL,
		}
	}

	pub fn max_strands(self) -> usize {
		match self {
			ClockMode::Bitbang => MAX_STRANDS - 1,
			ClockMode::Cbus => MAX_STRANDS,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
	pub strands:           usize,
	/// Pixels in the longest strand.
	pub pixels_per_strand: usize,
	pub clock:             ClockMode,
	/// Curve installed when the controller opens.
	pub gamma:             GammaCurve,
	/// Send an all-off frame right after opening.
	pub blank_on_open:     bool,
	pub calibration:       Calibration,
}

impl Config {
	pub fn new(strands: usize, pixels_per_strand: usize) -> Self {
		Self {
			strands,
			pixels_per_strand,
			clock: ClockMode::default(),
			gamma: GammaCurve::Simple(DEFAULT_GAMMA),
			blank_on_open: true,
			calibration: Calibration::default(),
		}
	}

	pub fn with_clock(mut self, clock: ClockMode) -> Self {
		self.clock = clock;
		self
	}

	pub fn with_gamma(mut self, gamma: GammaCurve) -> Self {
		self.gamma = gamma;
		self
	}

	pub fn total_pixels(&self) -> usize {
		self.strands.saturating_mul(self.pixels_per_strand)
	}

	/// Encoded frame length, or `None` if it does not fit in memory.
	pub fn frame_len(&self) -> Option<usize> {
		self.pixels_per_strand
			.checked_add(1)?
			.checked_mul(self.clock.bytes_per_pixel())
	}

	pub(crate) fn validate(&self) -> Result<()> {
		if self.strands == 0 || self.pixels_per_strand == 0 {
			return Err(Error::InvalidParameter(format!(
				"strand and pixel counts must be positive (got {} strands of {} pixels)",
				self.strands, self.pixels_per_strand
			)));
		}
		if self.strands > self.clock.max_strands() {
			return Err(Error::InvalidParameter(format!(
				"{:?} clock drives at most {} strands (got {})",
				self.clock,
				self.clock.max_strands(),
				self.strands
			)));
		}
		match self.frame_len() {
			Some(len) if len <= MAX_FRAME_BYTES => {}
			_ => {
				return Err(Error::InvalidParameter(format!(
					"{} pixels per strand exceed the {MAX_FRAME_BYTES} byte frame limit",
					self.pixels_per_strand
				)))
			}
		}
		self.gamma.validate()
	}
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("invalid parameter: {0}")]
	InvalidParameter(String),
	#[error("expected {expected} entries, got {actual}")]
	SizeMismatch { expected: usize, actual: usize },
	#[error("controller is not open")]
	NotOpen,
	#[error("controller was already opened, create a new one to reopen")]
	AlreadyOpen,
	#[error("could not open device: {0}")]
	DeviceUnavailable(String),
	#[error("transport error: {0}")]
	Transport(#[from] io::Error),
	#[error("no frame has been sent yet")]
	NoFrameYet,
	#[error("could not allocate frame buffers: {0}")]
	OutOfMemory(#[from] TryReserveError),
}

impl Error {
	pub fn status(&self) -> Status {
		match self {
			Error::InvalidParameter(_) => Status::InvalidParameter,
			Error::SizeMismatch { .. } => Status::SizeMismatch,
			Error::NotOpen => Status::NotOpen,
			Error::AlreadyOpen => Status::AlreadyOpen,
			Error::DeviceUnavailable(_) => Status::DeviceUnavailable,
			Error::Transport(_) => Status::TransportError,
			Error::NoFrameYet => Status::NoFrameYet,
			Error::OutOfMemory(_) => Status::OutOfMemory,
		}
	}
}

// D2XX statuses only surface while opening and configuring the adapter, writes go through io::Error.
impl From<libftd2xx::FtStatus> for Error {
	fn from(e: libftd2xx::FtStatus) -> Self {
		Error::DeviceUnavailable(format!("{e:?}"))
	}
}

/// `vec![value; len]` that reports a failed allocation instead of aborting.
pub(crate) fn try_filled<T: Clone>(value: T, len: usize) -> Result<Vec<T>> {
	let mut buf = Vec::new();
	buf.try_reserve_exact(len)?;
	buf.resize(len, value);
	Ok(buf)
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn oversized_frames_are_rejected() {
		let huge = Config::new(1, usize::MAX / 2);
		assert_eq!(huge.frame_len(), None);
		assert!(matches!(huge.validate(), Err(Error::InvalidParameter(_))));

		let too_long = Config::new(1, MAX_FRAME_BYTES / BITBANG_BYTES_PER_PIXEL);
		assert!(matches!(too_long.validate(), Err(Error::InvalidParameter(_))));

		let largest = Config::new(7, MAX_FRAME_BYTES / BITBANG_BYTES_PER_PIXEL - 1);
		assert_eq!(largest.frame_len(), Some(MAX_FRAME_BYTES));
		largest.validate().unwrap();
	}

	#[test]
	fn failed_allocation_is_an_error() {
		let result = try_filled(0u8, usize::MAX);
		assert!(matches!(result, Err(Error::OutOfMemory(_))));
		assert_eq!(result.unwrap_err().status(), Status::OutOfMemory);

		assert_eq!(try_filled(7u8, 3).unwrap(), [7, 7, 7]);
	}
}
