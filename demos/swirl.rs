//! Soothing, continuously changing colors across every pixel.
//!
//! `cargo run --example swirl -- [strands] [pixels-per-strand] [serial-number]`

use std::time::{Duration, Instant};

use eyre::WrapErr;
use serial_p9813::{rgb, Config, FtdiConnector, StrandController};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> eyre::Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let mut args = std::env::args().skip(1);
	let strands: usize = args.next().map(|s| s.parse()).transpose().wrap_err("strand count")?.unwrap_or(1);
	let pixels_per_strand: usize =
		args.next().map(|s| s.parse()).transpose().wrap_err("pixel count")?.unwrap_or(25);
	let connector = match args.next() {
		Some(serial_number) => FtdiConnector::new(serial_number),
		None => FtdiConnector::first(),
	};

	let mut controller = StrandController::new(connector);
	controller.open(Config::new(strands, pixels_per_strand))?;
	info!(strands, pixels_per_strand, "running, ctrl-c to stop");

	let mut pixels = vec![0u32; strands * pixels_per_strand];
	let mut last_print = Instant::now();
	let mut x = 0.0f64;

	loop {
		let mut s1 = x.sin() * 11.0;
		let mut s2 = (x * 0.857 - 0.214).sin() * -13.0;
		let mut s3 = (x * -0.923 + 1.428).sin() * 17.0;

		for pixel in pixels.iter_mut() {
			*pixel = rgb(level(s1), level(s2), level(s3));
			s1 += 0.273;
			s2 -= 0.231;
			s3 += 0.428;
		}

		if let Err(e) = controller.refresh(&pixels) {
			error!(status = e.status().code(), "{}", e.status());
		}

		if last_print.elapsed() >= Duration::from_secs(1) {
			controller.print_stats();
			last_print = Instant::now();
		}

		x += pixels_per_strand as f64 / 20000.0;
	}
}

fn level(phase: f64) -> u8 {
	((phase.sin() + 1.0) * 127.5) as u8
}
