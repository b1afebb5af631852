//! Shows a brightness ramp through the gamma table, the same ramp on every strand.
//!
//! Only one strand worth of pixels is supplied; the remap table points every
//! strand's positions at it.
//!
//! `cargo run --example ramp -- [strands] [pixels-per-strand] [gamma] [serial-number]`

use std::{thread, time::Duration};

use eyre::WrapErr;
use serial_p9813::{rgb, Config, FtdiConnector, StrandController, PIXEL_UNUSED};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> eyre::Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let mut args = std::env::args().skip(1);
	let strands: usize = args.next().map(|s| s.parse()).transpose().wrap_err("strand count")?.unwrap_or(2);
	let pixels_per_strand: usize =
		args.next().map(|s| s.parse()).transpose().wrap_err("pixel count")?.unwrap_or(25);
	let gamma: f64 = args.next().map(|s| s.parse()).transpose().wrap_err("gamma")?.unwrap_or(2.4);
	let connector = match args.next() {
		Some(serial_number) => FtdiConnector::new(serial_number),
		None => FtdiConnector::first(),
	};

	let mut controller = StrandController::new(connector);
	controller.open(Config::new(strands, pixels_per_strand))?;
	controller.set_gamma(gamma)?;

	let total = strands * pixels_per_strand;

	// physical position i shows logical pixel i % pixels_per_strand
	let remap: Vec<i32> = (0..total).map(|i| (i % pixels_per_strand) as i32).collect();

	let mut pixels = vec![0u32; total];
	for (i, pixel) in pixels.iter_mut().take(pixels_per_strand).enumerate() {
		let level = (i * 255 / pixels_per_strand.saturating_sub(1).max(1)) as u8;
		*pixel = rgb(level, level, level);
	}

	controller.refresh_remapped(&pixels, &remap)?;
	info!(gamma, "ramp shown");
	thread::sleep(Duration::from_secs(2));

	// every other pixel off, to check the strands are wired in order
	let sparse: Vec<i32> = remap
		.iter()
		.enumerate()
		.map(|(i, &logical)| if i % 2 == 0 { logical } else { PIXEL_UNUSED })
		.collect();
	controller.refresh_remapped(&pixels, &sparse)?;
	thread::sleep(Duration::from_secs(2));

	controller.refresh_last()?;
	controller.print_stats();
	controller.close()?;

	Ok(())
}
