//! C ABI over one process-wide controller.
//!
//! Every function returns a [`Status`] code (0 on success) except the `void` ones. Call
//! [`tc_init_stats`] once at startup, before the first [`tc_open`]; statistics then keep
//! accumulating across open/close cycles until the next [`tc_init_stats`].
//!
//! The first call to [`tc_open`], [`tc_init_stats`] or one of the print functions routes
//! the crate's log output to stdout (filtered by `RUST_LOG`, `info` by default). That is
//! where [`tc_print_stats`] and [`tc_print_error`] write. A host that installed its own
//! `tracing` subscriber keeps it.
//!
//! The adapter is picked by the serial number in the `SERIAL_P9813_DEVICE` environment
//! variable, or the first FTDI adapter when it is not set.

use std::{
	env,
	ffi::{c_float, c_int},
	slice,
	sync::{Mutex, MutexGuard, Once, PoisonError},
};

use serial_p9813_shared::CBUS_CLOCK_FLAG;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::{
	controller::StrandController,
	gamma::ChannelCurve,
	stats::Stats,
	status::{self, Status},
	transport::FtdiConnector,
	ClockMode,
	Config,
	Error,
	Result,
};

pub const DEVICE_ENV: &str = "SERIAL_P9813_DEVICE";

struct Registry {
	strands: Option<StrandController<FtdiConnector>>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry { strands: None });
static LOGGING: Once = Once::new();

fn registry() -> MutexGuard<'static, Registry> {
	REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

fn init_logging() {
	LOGGING.call_once(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
		// fails only when the host already installed a subscriber
		let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
	});
}

fn to_status(result: Result<()>) -> c_int {
	match result {
		Ok(()) => Status::Ok.code(),
		Err(e) => {
			debug!(error = %e, "call failed");
			e.status().code()
		}
	}
}

fn with_strands(f: impl FnOnce(&mut StrandController<FtdiConnector>) -> Result<()>) -> c_int {
	let mut registry = registry();
	let result = match registry.strands.as_mut() {
		Some(strands) => f(strands),
		None => Err(Error::NotOpen),
	};
	to_status(result)
}

/// Strand counts 8 and up select the CBUS clock, `8 | n` meaning `n` strands (8 alone meaning 8).
fn decode_strands(value: c_int) -> Result<(usize, ClockMode)> {
	match value {
		1..=7 => Ok((value as usize, ClockMode::Bitbang)),
		CBUS_CLOCK_FLAG => Ok((8, ClockMode::Cbus)),
		9..=16 => Ok(((value - CBUS_CLOCK_FLAG) as usize, ClockMode::Cbus)),
		_ => Err(Error::InvalidParameter(format!("strand count {value} is outside 1..=16"))),
	}
}

fn channel(min: c_int, max: c_int, gamma: c_float) -> Result<ChannelCurve> {
	let level = |v: c_int| {
		u8::try_from(v).map_err(|_| Error::InvalidParameter(format!("channel level {v} is outside 0..=255")))
	};

	Ok(ChannelCurve::new(level(min)?, level(max)?, f64::from(gamma)))
}

/// # Safety
///
/// `ptr` must be null or valid for reads of `len` elements.
unsafe fn borrow<'a, T>(ptr: *const T, len: usize) -> Result<&'a [T]> {
	if ptr.is_null() {
		return Err(Error::InvalidParameter("null buffer".into()));
	}
	Ok(slice::from_raw_parts(ptr, len))
}

fn open(strands: c_int, pixels_per_strand: c_int) -> Result<()> {
	let (strands, clock) = decode_strands(strands)?;
	let pixels_per_strand = usize::try_from(pixels_per_strand)
		.ok()
		.filter(|&p| p > 0)
		.ok_or_else(|| Error::InvalidParameter(format!("pixel count {pixels_per_strand} must be positive")))?;

	let mut registry = registry();
	if registry.strands.as_ref().is_some_and(StrandController::is_open) {
		return Err(Error::AlreadyOpen);
	}

	let connector = match env::var(DEVICE_ENV) {
		Ok(path) => FtdiConnector::new(path),
		Err(_) => FtdiConnector::first(),
	};
	let stats = registry.strands.take().map(|s| s.stats().clone()).unwrap_or_default();

	let controller = registry
		.strands
		.insert(StrandController::new(connector).with_stats(stats));
	controller.open(Config::new(strands, pixels_per_strand).with_clock(clock))
}

#[no_mangle]
pub extern "C" fn tc_open(strands: c_int, pixels_per_strand: c_int) -> c_int {
	init_logging();
	to_status(open(strands, pixels_per_strand))
}

#[no_mangle]
pub extern "C" fn tc_set_gamma_identity() -> c_int {
	with_strands(|s| s.set_gamma_identity())
}

#[no_mangle]
pub extern "C" fn tc_set_gamma_simple(g: c_float) -> c_int {
	with_strands(|s| s.set_gamma(f64::from(g)))
}

#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn tc_set_gamma(
	r_min: c_int,
	r_max: c_int,
	r_gamma: c_float,
	g_min: c_int,
	g_max: c_int,
	g_gamma: c_float,
	b_min: c_int,
	b_max: c_int,
	b_gamma: c_float,
) -> c_int {
	with_strands(|s| {
		s.set_gamma_channels(
			channel(r_min, r_max, r_gamma)?,
			channel(g_min, g_max, g_gamma)?,
			channel(b_min, b_max, b_gamma)?,
		)
	})
}

#[no_mangle]
pub extern "C" fn tc_refresh_last() -> c_int {
	with_strands(|s| s.refresh_last())
}

/// # Safety
///
/// `pixels` must be null or valid for reads of `len` packed `0x00RRGGBB` values.
#[no_mangle]
pub unsafe extern "C" fn tc_refresh(pixels: *const u32, len: usize) -> c_int {
	with_strands(|s| s.refresh(borrow(pixels, len)?))
}

/// # Safety
///
/// `pixels` must be null or valid for reads of `len` values, `remap` for `remap_len`.
#[no_mangle]
pub unsafe extern "C" fn tc_refresh_remapped(
	pixels: *const u32,
	len: usize,
	remap: *const c_int,
	remap_len: usize,
) -> c_int {
	with_strands(|s| s.refresh_remapped(borrow(pixels, len)?, borrow(remap, remap_len)?))
}

#[no_mangle]
pub extern "C" fn tc_set_strand_pin(strand: c_int, bit: c_int) -> c_int {
	with_strands(|s| {
		let strand = usize::try_from(strand).map_err(|_| Error::InvalidParameter(format!("strand {strand}")))?;
		let bits = u8::try_from(bit).map_err(|_| Error::InvalidParameter(format!("pin mask {bit:#x} exceeds 8 lines")))?;
		s.set_strand_pin(strand, bits)
	})
}

/// Closing twice, or before opening, is logged and otherwise ignored.
#[no_mangle]
pub extern "C" fn tc_close() {
	let status = with_strands(|s| s.close());
	if status != Status::Ok.code() {
		debug!(status, "close ignored");
	}
}

#[no_mangle]
pub extern "C" fn tc_init_stats() {
	init_logging();
	if let Some(strands) = registry().strands.as_mut() {
		strands.init_stats();
	}
}

#[no_mangle]
pub extern "C" fn tc_print_stats() {
	init_logging();
	let registry = registry();
	match registry.strands.as_ref() {
		Some(strands) => strands.print_stats(),
		None => {
			for line in Stats::new().to_string().lines() {
				info!(target: "serial_p9813::stats", "{line}");
			}
		}
	}
}

#[no_mangle]
pub extern "C" fn tc_print_error(status: c_int) {
	init_logging();
	status::print_error(status);
}
