//! Integer status codes for callers on the other side of a C boundary.

use std::fmt;

use tracing::{error, info};

use crate::{Error, Result};

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
	Ok = 0,
	/// Gamma exponent, channel range, strand or pin out of range.
	InvalidParameter = 1,
	/// Pixel buffer or remap table length differs from the configured pixel count.
	SizeMismatch = 2,
	/// The controller is not open.
	NotOpen = 3,
	/// The serial device could not be opened.
	DeviceUnavailable = 4,
	/// A write failed or timed out; the refresh may be retried.
	TransportError = 5,
	/// Nothing to re-send yet.
	NoFrameYet = 6,
	/// `open` on a controller that was opened before.
	AlreadyOpen = 7,
	/// Frame buffers could not be allocated.
	OutOfMemory = 8,
}

impl Status {
	pub fn code(self) -> i32 {
		self as i32
	}

	pub fn from_code(code: i32) -> Option<Self> {
		Some(match code {
			0 => Status::Ok,
			1 => Status::InvalidParameter,
			2 => Status::SizeMismatch,
			3 => Status::NotOpen,
			4 => Status::DeviceUnavailable,
			5 => Status::TransportError,
			6 => Status::NoFrameYet,
			7 => Status::AlreadyOpen,
			8 => Status::OutOfMemory,
			_ => return None,
		})
	}

	pub fn from_result<T>(result: &Result<T>) -> Self {
		match result {
			Ok(_) => Status::Ok,
			Err(e) => e.status(),
		}
	}

	pub fn description(self) -> &'static str {
		match self {
			Status::Ok => "Function completed successfully -- no error.",
			Status::InvalidParameter => "ERROR: Parameter out of range.",
			Status::SizeMismatch => "ERROR: Pixel buffer or remap table does not match the configured pixel count.",
			Status::NotOpen => "ERROR: Strands are not open. Call open first, or create a new controller after close.",
			Status::DeviceUnavailable => {
				"ERROR: Could not open FTDI device. Is the USB cable connected? Is another program already using the \
				 device?"
			}
			Status::TransportError => "ERROR: Failed to write to FTDI device. Has it been disconnected?",
			Status::NoFrameYet => "ERROR: No frame has been sent yet, nothing to refresh.",
			Status::AlreadyOpen => "ERROR: Strands were already opened. Create a new controller to reopen.",
			Status::OutOfMemory => "ERROR: Could not allocate space for the pixel buffers.",
		}
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.description())
	}
}

impl From<&Error> for Status {
	fn from(e: &Error) -> Self {
		e.status()
	}
}

/// Logs a human readable description of a status code.
pub fn print_error(code: i32) {
	match Status::from_code(code) {
		Some(Status::Ok) => info!(code, "{}", Status::Ok),
		Some(status) => error!(code, "{status}"),
		None => error!(code, "unknown status code"),
	}
}
