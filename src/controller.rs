use std::{
	mem,
	time::{Duration, Instant},
};

use tracing::{debug, info, trace, warn};

use crate::{
	encoder::{FrameEncoder, StrandPins},
	frame::FrameBuffer,
	gamma::{ChannelCurve, GammaCurve, GammaTable},
	stats::{FrameSample, Stats},
	transport::{Connector, Transport},
	Config,
	Error,
	Result,
};

/// Where a controller is in its lifecycle. A closed controller stays closed; open a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
	Unopened,
	Open,
	Closed,
}

/// What to put on the strands.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Source<'a> {
	Blank,
	Pixels { pixels: &'a [u32], remap: Option<&'a [i32]> },
}

#[derive(Debug)]
struct SentFrame {
	bytes:      Vec<u8>,
	current_ma: f64,
}

/// Everything tied to one open configuration, independent of how bytes reach the device.
#[derive(Debug)]
pub(crate) struct Session {
	config:     Config,
	gamma:      GammaTable,
	buffer:     FrameBuffer,
	encoder:    FrameEncoder,
	pending_ma: f64,
	last_frame: Option<SentFrame>,
}

impl Session {
	pub(crate) fn new(config: Config) -> Result<Self> {
		config.validate()?;

		let gamma = GammaTable::new(&config.gamma)?;
		let encoder = FrameEncoder::new(config.clock, config.strands, config.pixels_per_strand)?;
		for strand in encoder.unassigned_strands() {
			warn!(strand, "strand has no output line assigned and stays dark until set_strand_pin");
		}

		Ok(Self {
			buffer: FrameBuffer::new(config.total_pixels())?,
			gamma,
			encoder,
			pending_ma: 0.0,
			last_frame: None,
			config,
		})
	}

	pub(crate) fn config(&self) -> &Config {
		&self.config
	}

	pub(crate) fn pins(&self) -> &StrandPins {
		self.encoder.pins()
	}

	pub(crate) fn latch(&self) -> Vec<u8> {
		self.encoder.latch()
	}

	pub(crate) fn set_gamma(&mut self, curve: GammaCurve) -> Result<()> {
		// built completely before it replaces the active table
		self.gamma = GammaTable::new(&curve)?;
		debug!(?curve, "gamma curve installed");
		Ok(())
	}

	pub(crate) fn set_strand_pin(&mut self, strand: usize, bits: u8) -> Result<()> {
		self.encoder.set_strand_pin(strand, bits)
	}

	pub(crate) fn set_clock_pin(&mut self, bits: u8) -> Result<()> {
		self.encoder.set_clock_pin(bits)
	}

	/// Loads, corrects and encodes a frame, returning the bytes to write.
	pub(crate) fn prepare(&mut self, source: Source<'_>) -> Result<&[u8]> {
		match source {
			Source::Blank => self.buffer.load_blank(),
			Source::Pixels { pixels, remap } => self.buffer.load(pixels, remap)?,
		}

		let calibration = self.config.calibration;
		self.pending_ma = self
			.buffer
			.slots()
			.iter()
			.map(|&slot| calibration.slot_ma(slot, slot.output(&self.gamma)))
			.sum();

		Ok(self.encoder.encode(self.buffer.slots(), &self.gamma))
	}

	/// Marks the prepared frame as written.
	pub(crate) fn commit(&mut self, io_time: Duration, finished: Instant) -> FrameSample {
		let frame = self.encoder.frame();
		let last = self.last_frame.get_or_insert_with(|| SentFrame {
			bytes:      Vec::with_capacity(frame.len()),
			current_ma: 0.0,
		});
		last.bytes.clear();
		last.bytes.extend_from_slice(frame);
		last.current_ma = self.pending_ma;

		self.sample(frame.len(), self.pending_ma, io_time, finished)
	}

	pub(crate) fn last_frame(&self) -> Result<&[u8]> {
		self.last_frame.as_ref().map(|f| f.bytes.as_slice()).ok_or(Error::NoFrameYet)
	}

	pub(crate) fn resent(&self, io_time: Duration, finished: Instant) -> FrameSample {
		let (bytes, current_ma) = self
			.last_frame
			.as_ref()
			.map_or((0, 0.0), |f| (f.bytes.len(), f.current_ma));

		self.sample(bytes, current_ma, io_time, finished)
	}

	fn sample(&self, bytes: usize, current_ma: f64, io_time: Duration, finished: Instant) -> FrameSample {
		FrameSample {
			bytes,
			bits: self.encoder.frame_bits(),
			io_time,
			finished,
			current_ma,
		}
	}
}

enum State<T> {
	Unopened,
	Open { session: Session, transport: T },
	Closed,
}

/// Owns the strands: configuration, gamma, pin assignment, the transport and statistics.
///
/// Methods take `&mut self`, so one owner drives the strands at a time. Every fallible
/// operation reports through [`Error`]; use [`Error::status`] for integer codes.
pub struct StrandController<C: Connector> {
	connector: C,
	state:     State<C::Transport>,
	stats:     Stats,
}

impl<C: Connector> StrandController<C> {
	pub fn new(connector: C) -> Self {
		Self {
			connector,
			state: State::Unopened,
			stats: Stats::new(),
		}
	}

	/// Continues counting from `stats`, e.g. those of a previous, closed controller.
	pub fn with_stats(mut self, stats: Stats) -> Self {
		self.stats = stats;
		self
	}

	pub fn state(&self) -> ControllerState {
		match self.state {
			State::Unopened => ControllerState::Unopened,
			State::Open { .. } => ControllerState::Open,
			State::Closed => ControllerState::Closed,
		}
	}

	pub fn is_open(&self) -> bool {
		self.state() == ControllerState::Open
	}

	/// Validates the configuration, connects, latches and (by default) blanks the strands.
	///
	/// On failure the controller stays unopened and can be opened again.
	pub fn open(&mut self, config: Config) -> Result<()> {
		if !matches!(self.state, State::Unopened) {
			return Err(Error::AlreadyOpen);
		}

		let mut session = Session::new(config)?;
		let mut transport = self.connector.connect()?;

		// latch before any pixel data so the strands start in sync
		transport.write_frame(&session.latch())?;
		if session.config().blank_on_open {
			let frame = session.prepare(Source::Blank)?;
			transport.write_frame(frame)?;
		}

		info!(
			strands = session.config().strands,
			pixels_per_strand = session.config().pixels_per_strand,
			clock = ?session.config().clock,
			"strands open"
		);
		self.state = State::Open { session, transport };

		Ok(())
	}

	/// Disables gamma correction.
	pub fn set_gamma_identity(&mut self) -> Result<()> {
		self.set_gamma_curve(GammaCurve::Identity)
	}

	/// One gamma exponent for all channels, `g > 0`.
	pub fn set_gamma(&mut self, g: f64) -> Result<()> {
		self.set_gamma_curve(GammaCurve::Simple(g))
	}

	/// Separate output range and exponent per channel.
	pub fn set_gamma_channels(&mut self, red: ChannelCurve, green: ChannelCurve, blue: ChannelCurve) -> Result<()> {
		self.set_gamma_curve(GammaCurve::Channels([red, green, blue]))
	}

	/// Takes effect with the next refresh.
	pub fn set_gamma_curve(&mut self, curve: GammaCurve) -> Result<()> {
		self.session_mut()?.set_gamma(curve)
	}

	/// Assigns output line(s) to `strand`. Takes effect with the next refresh.
	pub fn set_strand_pin(&mut self, strand: usize, bits: u8) -> Result<()> {
		self.session_mut()?.set_strand_pin(strand, bits)
	}

	/// Moves the software clock to other line(s), see [`crate::ClockMode::Bitbang`].
	pub fn set_clock_pin(&mut self, bits: u8) -> Result<()> {
		self.session_mut()?.set_clock_pin(bits)
	}

	/// Shows `pixels` (packed `0x00RRGGBB`, strand-major, one per configured pixel).
	pub fn refresh(&mut self, pixels: &[u32]) -> Result<()> {
		self.send(Source::Pixels { pixels, remap: None })
	}

	/// Shows `pixels` with physical position `i` taking `pixels[remap[i]]`.
	///
	/// See [`FrameBuffer::load`] for the remap rules.
	pub fn refresh_remapped(&mut self, pixels: &[u32], remap: &[i32]) -> Result<()> {
		self.send(Source::Pixels {
			pixels,
			remap: Some(remap),
		})
	}

	/// Turns all pixels off.
	pub fn refresh_blank(&mut self) -> Result<()> {
		self.send(Source::Blank)
	}

	/// Writes the last successfully sent frame again.
	pub fn refresh_last(&mut self) -> Result<()> {
		let result = self.try_resend();
		if result.is_err() {
			self.stats.record_error();
		}
		result
	}

	/// Releases the transport. Closing a controller that is not open reports [`Error::NotOpen`].
	pub fn close(&mut self) -> Result<()> {
		if !matches!(self.state, State::Open { .. }) {
			debug!(state = ?self.state(), "close on a controller that is not open");
			return Err(Error::NotOpen);
		}

		if let State::Open { transport, .. } = mem::replace(&mut self.state, State::Closed) {
			drop(transport);
			info!("strands closed");
		}

		Ok(())
	}

	pub fn config(&self) -> Option<&Config> {
		match &self.state {
			State::Open { session, .. } => Some(session.config()),
			_ => None,
		}
	}

	pub fn pins(&self) -> Option<&StrandPins> {
		match &self.state {
			State::Open { session, .. } => Some(session.pins()),
			_ => None,
		}
	}

	pub fn transport(&self) -> Option<&C::Transport> {
		match &self.state {
			State::Open { transport, .. } => Some(transport),
			_ => None,
		}
	}

	pub fn transport_mut(&mut self) -> Option<&mut C::Transport> {
		match &mut self.state {
			State::Open { transport, .. } => Some(transport),
			_ => None,
		}
	}

	pub fn stats(&self) -> &Stats {
		&self.stats
	}

	pub fn init_stats(&mut self) {
		self.stats.reset();
	}

	/// Logs the statistics, one line per counter.
	pub fn print_stats(&self) {
		for line in self.stats.to_string().lines() {
			info!(target: "serial_p9813::stats", "{line}");
		}
	}

	fn session_mut(&mut self) -> Result<&mut Session> {
		match &mut self.state {
			State::Open { session, .. } => Ok(session),
			_ => Err(Error::NotOpen),
		}
	}

	fn send(&mut self, source: Source<'_>) -> Result<()> {
		let result = self.try_send(source);
		if result.is_err() {
			self.stats.record_error();
		}
		result
	}

	fn try_send(&mut self, source: Source<'_>) -> Result<()> {
		let State::Open { session, transport } = &mut self.state else {
			return Err(Error::NotOpen);
		};

		let frame = session.prepare(source)?;
		let started = Instant::now();
		transport.write_frame(frame)?;
		let finished = Instant::now();

		trace!(bytes = frame.len(), io_time = ?(finished - started), "frame written");
		let sample = session.commit(finished - started, finished);
		self.stats.record_frame(sample);

		Ok(())
	}

	fn try_resend(&mut self) -> Result<()> {
		let State::Open { session, transport } = &mut self.state else {
			return Err(Error::NotOpen);
		};

		let frame = session.last_frame()?;
		let started = Instant::now();
		transport.write_frame(frame)?;
		let finished = Instant::now();

		self.stats.record_frame(session.resent(finished - started, finished));

		Ok(())
	}
}

impl<C: Connector> std::fmt::Debug for StrandController<C> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StrandController")
			.field("state", &self.state())
			.field("config", &self.config())
			.field("stats", &self.stats)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::MemoryTransport;

	fn memory() -> StrandController<impl Connector<Transport = MemoryTransport>> {
		StrandController::new(|| Ok::<_, Error>(MemoryTransport::new()))
	}

	#[test]
	fn open_latches_then_blanks() {
		let mut strands = memory();
		strands.open(Config::new(1, 3)).unwrap();

		let writes = strands.transport().unwrap().writes();
		assert_eq!(writes.len(), 2);
		assert_eq!(writes[0].len(), 64);
		assert_eq!(writes[1].len(), 4 * 64);
		// opening does not count as a frame
		assert_eq!(strands.stats().frames, 0);
	}

	#[test]
	fn open_without_blank_only_latches() {
		let mut strands = memory();
		let config = Config {
			blank_on_open: false,
			..Config::new(1, 3)
		};
		strands.open(config).unwrap();

		assert_eq!(strands.transport().unwrap().writes().len(), 1);
	}

	#[test]
	fn failed_connect_leaves_controller_unopened() {
		let mut strands = StrandController::new(|| -> Result<MemoryTransport> {
			Err(Error::DeviceUnavailable("unplugged".into()))
		});

		assert!(matches!(strands.open(Config::new(1, 1)), Err(Error::DeviceUnavailable(_))));
		assert_eq!(strands.state(), ControllerState::Unopened);
	}

	#[test]
	fn oversized_open_is_an_error_not_a_panic() {
		let mut strands = memory();

		let result = strands.open(Config::new(1, usize::MAX / 2));
		assert_eq!(result.unwrap_err().status(), crate::Status::InvalidParameter);
		assert_eq!(strands.state(), ControllerState::Unopened);

		let result = strands.open(Config::new(7, crate::MAX_FRAME_BYTES));
		assert!(matches!(result, Err(Error::InvalidParameter(_))));
		assert!(strands.transport().is_none());
	}

	#[test]
	fn failed_refresh_only_counts_an_error() {
		let mut strands = memory();
		strands.open(Config::new(1, 2)).unwrap();
		strands.refresh(&[0xFFFFFF, 0]).unwrap();
		let before = strands.stats().clone();

		strands.transport_mut().unwrap().set_fail_writes(true);
		assert!(matches!(strands.refresh(&[0, 0]), Err(Error::Transport(_))));

		let after = strands.stats();
		assert_eq!(after.errors, before.errors + 1);
		assert_eq!(after.frames, before.frames);
		assert_eq!(after.bytes_written, before.bytes_written);

		// the last good frame is still what gets re-sent
		strands.transport_mut().unwrap().set_fail_writes(false);
		strands.refresh_last().unwrap();
		let writes = strands.transport().unwrap().writes();
		assert_eq!(writes[writes.len() - 1], writes[writes.len() - 2]);
	}

	#[test]
	fn gamma_replacement_is_all_or_nothing() {
		let mut strands = memory();
		strands.open(Config::new(1, 1).with_gamma(GammaCurve::Identity)).unwrap();

		let bad = ChannelCurve::new(10, 5, 2.0);
		let good = ChannelCurve::new(0, 255, 1.0);
		assert!(strands.set_gamma_channels(good, bad, good).is_err());

		strands.refresh(&[0x808080]).unwrap();
		let frame = strands.transport().unwrap().last_write().unwrap().to_vec();
		let encoder = FrameEncoder::new(crate::ClockMode::Bitbang, 1, 1).unwrap();
		assert_eq!(encoder.unpack(&frame, 0), [serial_p9813_shared::pixel_word(0x80, 0x80, 0x80)]);
	}

	#[test]
	fn blank_frame_estimates_idle_current() {
		let mut strands = memory();
		strands.open(Config::new(1, 25)).unwrap();
		strands.refresh_blank().unwrap();

		assert!((strands.stats().ma - 15.0).abs() < 1e-9);
	}
}
