//! Byte stream to the FTDI adapter.
//!
//! The adapter runs in asynchronous bit-bang mode: every byte it receives is replayed on
//! its eight output lines at the configured rate. Everything device specific stays behind
//! [`Transport`], the controller only ever hands it complete encoded frames.

use std::{collections::VecDeque, io, time::Duration};

use libftd2xx::{BitMode, Ftdi, FtdiCommon, TimeoutError};
use serial_p9813_shared::DEFAULT_BAUD_RATE;
use tracing::{info, warn};

use crate::{Error, Result};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Every line is an output, whether a strand uses it or not.
const ALL_OUTPUTS: u8 = 0xFF;

/// An open connection to the adapter.
pub trait Transport {
	/// Writes a whole frame. Must give up with an error instead of blocking indefinitely.
	fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// Opens a [`Transport`]; called once by `StrandController::open`.
pub trait Connector {
	type Transport: Transport;

	fn connect(&mut self) -> Result<Self::Transport>;
}

impl<F, T> Connector for F
where
	F: FnMut() -> Result<T>,
	T: Transport,
{
	type Transport = T;

	fn connect(&mut self) -> Result<T> {
		self()
	}
}

/// Opens an FTDI adapter through the D2XX driver, either by serial number or the first one.
#[derive(Debug, Clone)]
pub struct FtdiConnector {
	pub serial_number: Option<String>,
	pub baud_rate:     u32,
	/// Upper bound for writing one frame.
	pub timeout:       Duration,
}

impl FtdiConnector {
	pub fn new(serial_number: impl Into<String>) -> Self {
		Self {
			serial_number: Some(serial_number.into()),
			..Self::first()
		}
	}

	/// Connects to the first adapter the driver lists.
	pub fn first() -> Self {
		Self {
			serial_number: None,
			baud_rate:     DEFAULT_BAUD_RATE,
			timeout:       DEFAULT_WRITE_TIMEOUT,
		}
	}

	pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
		self.baud_rate = baud_rate;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}
}

impl Connector for FtdiConnector {
	type Transport = FtdiTransport;

	fn connect(&mut self) -> Result<FtdiTransport> {
		FtdiTransport::open(self.serial_number.as_deref(), self.baud_rate, self.timeout)
	}
}

pub struct FtdiTransport {
	name:   String,
	device: Ftdi,
}

impl FtdiTransport {
	/// Opens the adapter and switches it to asynchronous bit-bang mode.
	///
	/// Failing to enter bit-bang mode is fatal. A refused baud rate only logs a warning,
	/// the adapter then keeps running at its default rate.
	pub fn open(serial_number: Option<&str>, baud_rate: u32, timeout: Duration) -> Result<Self> {
		let name = serial_number.unwrap_or("first FTDI adapter").to_string();
		let opened = match serial_number {
			Some(serial_number) => Ftdi::with_serial_number(serial_number),
			None => Ftdi::new(),
		};
		let mut device = opened.map_err(|e| Error::DeviceUnavailable(format!("opening {name}: {e:?}")))?;

		device
			.set_bit_mode(ALL_OUTPUTS, BitMode::AsyncBitbang)
			.map_err(|e| Error::DeviceUnavailable(format!("enabling async bit-bang mode on {name}: {e:?}")))?;

		if let Err(e) = device.set_baud_rate(baud_rate) {
			warn!(device = %name, baud_rate, error = ?e, "could not set baud rate, keeping the default");
		}
		device.set_timeouts(timeout, timeout)?;

		// drop anything a previous user left queued
		device.purge_all()?;

		info!(device = %name, baud_rate, "opened FTDI adapter in bit-bang mode");

		Ok(Self { name, device })
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

impl Transport for FtdiTransport {
	fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
		match self.device.write_all(frame) {
			Ok(()) => Ok(()),
			Err(e @ TimeoutError::Timeout { .. }) => {
				warn!(device = %self.name, error = ?e, "FTDI write timeout");
				Err(io::Error::new(io::ErrorKind::TimedOut, format!("{e:?}")))
			}
			Err(e) => {
				warn!(device = %self.name, error = ?e, "FTDI write failed");
				Err(io::Error::new(io::ErrorKind::Other, format!("{e:?}")))
			}
		}
	}
}

impl std::fmt::Debug for FtdiTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FtdiTransport").field("name", &self.name).finish_non_exhaustive()
	}
}

/// Keeps the most recent frames in memory and counts the rest, so it can stand in for
/// hardware in tests and in dry runs of any length.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
	writes:      VecDeque<Vec<u8>>,
	history:     usize,
	written:     u64,
	fail_writes: bool,
}

impl Default for MemoryTransport {
	fn default() -> Self {
		Self::with_history(Self::DEFAULT_HISTORY)
	}
}

impl MemoryTransport {
	pub const DEFAULT_HISTORY: usize = 16;

	pub fn new() -> Self {
		Self::default()
	}

	/// Keeps at most `history` frames; `0` only counts.
	pub fn with_history(history: usize) -> Self {
		Self {
			writes: VecDeque::with_capacity(history),
			history,
			written: 0,
			fail_writes: false,
		}
	}

	/// The most recent writes, oldest first.
	pub fn writes(&self) -> &VecDeque<Vec<u8>> {
		&self.writes
	}

	pub fn last_write(&self) -> Option<&[u8]> {
		self.writes.back().map(Vec::as_slice)
	}

	/// Every successful write so far, including those no longer kept.
	pub fn written(&self) -> u64 {
		self.written
	}

	/// Makes subsequent writes fail as if the adapter had been unplugged.
	pub fn set_fail_writes(&mut self, fail: bool) {
		self.fail_writes = fail;
	}
}

impl Transport for MemoryTransport {
	fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
		if self.fail_writes {
			return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
		}

		self.written += 1;
		if self.history == 0 {
			return Ok(());
		}
		if self.writes.len() == self.history {
			if let Some(mut oldest) = self.writes.pop_front() {
				oldest.clear();
				oldest.extend_from_slice(frame);
				self.writes.push_back(oldest);
				return Ok(());
			}
		}
		self.writes.push_back(frame.to_vec());
		Ok(())
	}
}
