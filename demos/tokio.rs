//! The swirl demo on the async controller.
//!
//! `cargo run --example tokio --features tokio -- [strands] [pixels-per-strand]`

use std::time::Duration;

use eyre::WrapErr;
use serial_p9813::{rgb, tokio::StrandController, Config, FtdiConnector};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let mut args = std::env::args().skip(1);
	let strands: usize = args.next().map(|s| s.parse()).transpose().wrap_err("strand count")?.unwrap_or(1);
	let pixels_per_strand: usize =
		args.next().map(|s| s.parse()).transpose().wrap_err("pixel count")?.unwrap_or(25);

	let connector = match std::env::var("SERIAL_P9813_DEVICE") {
		Ok(serial_number) => FtdiConnector::new(serial_number),
		Err(_) => FtdiConnector::first(),
	};
	let mut controller = StrandController::connect(connector).await?;
	controller.open(Config::new(strands, pixels_per_strand)).await?;

	let mut pixels = vec![0u32; strands * pixels_per_strand];
	let mut ticker = tokio::time::interval(Duration::from_millis(20));
	let mut stats = tokio::time::interval(Duration::from_secs(1));
	let mut x = 0.0f64;

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				for (i, pixel) in pixels.iter_mut().enumerate() {
					let phase = x + i as f64 * 0.273;
					*pixel = rgb(level(phase), level(phase * 0.857 + 2.0), level(phase * -0.923 + 4.0));
				}
				if let Err(e) = controller.refresh(&pixels).await {
					error!(status = e.status().code(), "{}", e.status());
				}
				x += 0.05;
			}
			_ = stats.tick() => {
				let s = controller.stats();
				info!(frames = s.frames, errors = s.errors, fps = s.fps, ma = s.ma, "stats");
			}
			_ = tokio::signal::ctrl_c() => break,
		}
	}

	controller.close()?;

	Ok(())
}

fn level(phase: f64) -> u8 {
	((phase.sin() + 1.0) * 127.5) as u8
}
