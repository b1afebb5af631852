use std::{
	io,
	mem,
	sync::{Arc, Mutex, PoisonError},
	time::{Duration, Instant},
};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::{
	controller::{ControllerState, Session, Source},
	encoder::StrandPins,
	gamma::{ChannelCurve, GammaCurve},
	stats::Stats,
	transport::{Connector, Transport, DEFAULT_WRITE_TIMEOUT},
	Config,
	Error,
	Result,
};

/// Async counterpart of [`crate::Transport`].
pub trait AsyncTransport {
	fn write_frame(&mut self, frame: &[u8]) -> impl std::future::Future<Output = io::Result<()>> + Send;
}

/// Any tokio writer, e.g. a pipe to a simulator or `tokio::io::duplex` in tests.
#[derive(Debug)]
pub struct StreamTransport<W>(pub W);

impl<W: AsyncWrite + Unpin + Send> AsyncTransport for StreamTransport<W> {
	async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
		self.0.write_all(frame).await?;
		self.0.flush().await
	}
}

/// Runs a blocking [`Transport`] (the FTDI adapter) on tokio's blocking thread pool.
///
/// A write that the controller gave up on still finishes in the background; the next one
/// waits for it.
pub struct BlockingTransport<T> {
	inner: Arc<Mutex<T>>,
}

impl<T> BlockingTransport<T> {
	pub fn new(transport: T) -> Self {
		Self {
			inner: Arc::new(Mutex::new(transport)),
		}
	}
}

impl<T: Transport + Send + 'static> AsyncTransport for BlockingTransport<T> {
	async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
		let inner = Arc::clone(&self.inner);
		let frame = frame.to_vec();

		tokio::task::spawn_blocking(move || {
			inner.lock().unwrap_or_else(PoisonError::into_inner).write_frame(&frame)
		})
		.await
		.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
	}
}

enum State<T> {
	Unopened(T),
	Open { session: Session, transport: T },
	Closed,
}

/// Async counterpart of [`crate::StrandController`].
///
/// The transport is handed over up front; `open` validates the configuration, latches and
/// blanks. Each write is bounded by the configured timeout.
pub struct StrandController<T> {
	state:   State<T>,
	timeout: Duration,
	stats:   Stats,
}

impl<T> StrandController<BlockingTransport<T>>
where
	T: Transport + Send + 'static,
{
	/// Connects a blocking transport, e.g. an [`crate::FtdiConnector`], off the runtime threads.
	pub async fn connect<C>(mut connector: C) -> Result<Self>
	where
		C: Connector<Transport = T> + Send + 'static,
	{
		let transport = tokio::task::spawn_blocking(move || connector.connect())
			.await
			.map_err(|e| Error::DeviceUnavailable(e.to_string()))??;

		Ok(Self::new(BlockingTransport::new(transport)))
	}
}

impl<T: AsyncTransport> StrandController<T> {
	pub fn new(transport: T) -> Self {
		Self {
			state:   State::Unopened(transport),
			timeout: DEFAULT_WRITE_TIMEOUT,
			stats:   Stats::new(),
		}
	}

	/// Upper bound for writing one frame.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn state(&self) -> ControllerState {
		match self.state {
			State::Unopened(_) => ControllerState::Unopened,
			State::Open { .. } => ControllerState::Open,
			State::Closed => ControllerState::Closed,
		}
	}

	pub fn is_open(&self) -> bool {
		self.state() == ControllerState::Open
	}

	/// On failure the controller stays unopened and can be opened again.
	pub async fn open(&mut self, config: Config) -> Result<()> {
		let State::Unopened(transport) = &mut self.state else {
			return Err(Error::AlreadyOpen);
		};

		let mut session = Session::new(config)?;
		write_frame(transport, &session.latch(), self.timeout).await?;
		if session.config().blank_on_open {
			let frame = session.prepare(Source::Blank)?;
			write_frame(transport, frame, self.timeout).await?;
		}

		info!(
			strands = session.config().strands,
			pixels_per_strand = session.config().pixels_per_strand,
			clock = ?session.config().clock,
			"strands open"
		);
		if let State::Unopened(transport) = mem::replace(&mut self.state, State::Closed) {
			self.state = State::Open { session, transport };
		}

		Ok(())
	}

	pub fn set_gamma_identity(&mut self) -> Result<()> {
		self.set_gamma_curve(GammaCurve::Identity)
	}

	pub fn set_gamma(&mut self, g: f64) -> Result<()> {
		self.set_gamma_curve(GammaCurve::Simple(g))
	}

	pub fn set_gamma_channels(&mut self, red: ChannelCurve, green: ChannelCurve, blue: ChannelCurve) -> Result<()> {
		self.set_gamma_curve(GammaCurve::Channels([red, green, blue]))
	}

	pub fn set_gamma_curve(&mut self, curve: GammaCurve) -> Result<()> {
		self.session_mut()?.set_gamma(curve)
	}

	pub fn set_strand_pin(&mut self, strand: usize, bits: u8) -> Result<()> {
		self.session_mut()?.set_strand_pin(strand, bits)
	}

	pub fn set_clock_pin(&mut self, bits: u8) -> Result<()> {
		self.session_mut()?.set_clock_pin(bits)
	}

	pub async fn refresh(&mut self, pixels: &[u32]) -> Result<()> {
		self.send(Source::Pixels { pixels, remap: None }).await
	}

	pub async fn refresh_remapped(&mut self, pixels: &[u32], remap: &[i32]) -> Result<()> {
		self.send(Source::Pixels {
			pixels,
			remap: Some(remap),
		})
		.await
	}

	pub async fn refresh_blank(&mut self) -> Result<()> {
		self.send(Source::Blank).await
	}

	/// Writes the last successfully sent frame again.
	pub async fn refresh_last(&mut self) -> Result<()> {
		let result = self.try_resend().await;
		if result.is_err() {
			self.stats.record_error();
		}
		result
	}

	pub fn close(&mut self) -> Result<()> {
		if !matches!(self.state, State::Open { .. }) {
			debug!(state = ?self.state(), "close on a controller that is not open");
			return Err(Error::NotOpen);
		}

		self.state = State::Closed;
		info!("strands closed");

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

	pub fn transport(&self) -> Option<&T> {
		match &self.state {
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

	async fn send(&mut self, source: Source<'_>) -> Result<()> {
		let result = self.try_send(source).await;
		if result.is_err() {
			self.stats.record_error();
		}
		result
	}

	async fn try_send(&mut self, source: Source<'_>) -> Result<()> {
		let State::Open { session, transport } = &mut self.state else {
			return Err(Error::NotOpen);
		};

		let frame = session.prepare(source)?;
		let started = Instant::now();
		write_frame(transport, frame, self.timeout).await?;
		let finished = Instant::now();

		let sample = session.commit(finished - started, finished);
		self.stats.record_frame(sample);

		Ok(())
	}

	async fn try_resend(&mut self) -> Result<()> {
		let State::Open { session, transport } = &mut self.state else {
			return Err(Error::NotOpen);
		};

		let frame = session.last_frame()?;
		let started = Instant::now();
		write_frame(transport, frame, self.timeout).await?;
		let finished = Instant::now();

		self.stats.record_frame(session.resent(finished - started, finished));

		Ok(())
	}
}

async fn write_frame<T: AsyncTransport>(transport: &mut T, frame: &[u8], timeout: Duration) -> io::Result<()> {
	match tokio::time::timeout(timeout, transport.write_frame(frame)).await {
		Ok(result) => result,
		Err(_) => {
			warn!("serial timeout");
			Err(io::ErrorKind::TimedOut.into())
		}
	}
}

#[cfg(test)]
mod tests {
	use tokio::io::{duplex, AsyncReadExt, DuplexStream};

	use super::*;
	use crate::{rgb, Status};

	fn piped(buffer: usize) -> (StrandController<StreamTransport<DuplexStream>>, DuplexStream) {
		let (ours, theirs) = duplex(buffer);
		(StrandController::new(StreamTransport(ours)), theirs)
	}

	#[tokio::test]
	async fn open_latches_then_blanks() {
		let (mut strands, mut device) = piped(4096);
		strands.open(Config::new(1, 3)).await.unwrap();

		let mut written = vec![0u8; 64 + 4 * 64];
		device.read_exact(&mut written).await.unwrap();
		assert!(written[..64].iter().step_by(2).all(|&b| b == 0));
		assert_eq!(strands.stats().frames, 0);
		assert_eq!(strands.config().map(|c| c.strands), Some(1));
	}

	#[tokio::test]
	async fn refresh_before_open_is_not_open() {
		let (mut strands, _device) = piped(4096);

		assert!(matches!(strands.refresh(&[0; 3]).await, Err(Error::NotOpen)));
		assert!(matches!(strands.set_gamma_identity(), Err(Error::NotOpen)));
		assert_eq!(strands.stats().errors, 1);
		assert!(matches!(strands.close(), Err(Error::NotOpen)));
	}

	#[tokio::test]
	async fn refresh_counts_frames() {
		let (mut strands, mut device) = piped(1 << 16);
		strands.open(Config::new(2, 4)).await.unwrap();
		strands.set_gamma_channels(
			ChannelCurve::new(0, 255, 1.0),
			ChannelCurve::new(0, 255, 1.0),
			ChannelCurve::new(0, 128, 1.0),
		)
		.unwrap();
		strands.refresh(&[rgb(1, 2, 3); 8]).await.unwrap();

		let mut written = vec![0u8; 64 + 5 * 64 * 2];
		device.read_exact(&mut written).await.unwrap();
		assert_eq!(strands.stats().frames, 1);
		assert_eq!(strands.stats().bytes_written, 5 * 64);
	}

	#[tokio::test]
	async fn stalled_device_times_out() {
		// room for the latch only, nobody reads the rest
		let (strands, _device) = piped(64);
		let mut strands = strands.with_timeout(Duration::from_millis(20));
		let config = Config {
			blank_on_open: false,
			..Config::new(1, 2)
		};
		strands.open(config).await.unwrap();

		let err = strands.refresh(&[0xFFFFFF; 2]).await.unwrap_err();
		assert_eq!(err.status(), Status::TransportError);
		assert_eq!(strands.stats().errors, 1);
		assert_eq!(strands.stats().frames, 0);
		assert!(strands.is_open());
	}

	#[tokio::test]
	async fn refresh_last_resends_the_same_bytes() {
		let (mut strands, mut device) = piped(1 << 16);
		strands.open(Config::new(1, 2)).await.unwrap();
		let mut opening = vec![0u8; 64 + 3 * 64];
		device.read_exact(&mut opening).await.unwrap();

		assert!(matches!(strands.refresh_last().await, Err(Error::NoFrameYet)));

		strands.refresh(&[rgb(200, 0, 9), 0]).await.unwrap();
		strands.refresh_last().await.unwrap();

		let mut first = vec![0u8; 3 * 64];
		let mut second = vec![0u8; 3 * 64];
		device.read_exact(&mut first).await.unwrap();
		device.read_exact(&mut second).await.unwrap();
		assert_eq!(first, second);
		assert_eq!(strands.stats().frames, 2);
		assert_eq!(strands.stats().errors, 1);
	}

	#[tokio::test]
	async fn closed_controller_stays_closed() {
		let (mut strands, _device) = piped(4096);
		strands.open(Config::new(1, 1)).await.unwrap();
		strands.close().unwrap();

		assert!(matches!(strands.open(Config::new(1, 1)).await, Err(Error::AlreadyOpen)));
		assert!(matches!(strands.refresh_blank().await, Err(Error::NotOpen)));
		assert_eq!(strands.state(), ControllerState::Closed);
	}

	#[tokio::test]
	async fn blocking_transports_run_off_the_runtime() {
		let memory = crate::MemoryTransport::new();
		let mut strands = StrandController::new(BlockingTransport::new(memory));
		strands.open(Config::new(1, 2)).await.unwrap();
		strands.refresh(&[0, 0]).await.unwrap();

		let memory = strands.transport().unwrap().inner.lock().unwrap();
		assert_eq!(memory.written(), 3);
		assert_eq!(memory.last_write().map(<[u8]>::len), Some(3 * 64));
	}
}
