//! Gamma correction.
//!
//! P9813 pixels map color values linearly to PWM duty cycle, which the eye perceives as
//! far too bright in the low and mid range. A gamma curve > 1.0 pushes those values down.

use crate::{frame::Rgb, Error, Result};

/// Output range and exponent for one color channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCurve {
	/// Output for input 0.
	pub min:   u8,
	/// Output for input 255.
	pub max:   u8,
	pub gamma: f64,
}

impl ChannelCurve {
	pub fn new(min: u8, max: u8, gamma: f64) -> Self {
		Self { min, max, gamma }
	}

	fn validate(&self) -> Result<()> {
		validate_exponent(self.gamma)?;
		if self.min > self.max {
			return Err(Error::InvalidParameter(format!(
				"channel minimum {} is above maximum {}",
				self.min, self.max
			)));
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GammaCurve {
	/// No correction.
	Identity,
	/// One exponent for all channels over the full 0-255 range.
	Simple(f64),
	/// Independent red, green and blue curves, for color balancing.
	Channels([ChannelCurve; 3]),
}

impl GammaCurve {
	pub fn validate(&self) -> Result<()> {
		match self {
			GammaCurve::Identity => Ok(()),
			GammaCurve::Simple(g) => validate_exponent(*g),
			GammaCurve::Channels(channels) => channels.iter().try_for_each(ChannelCurve::validate),
		}
	}
}

fn validate_exponent(g: f64) -> Result<()> {
	// also rejects NaN
	if !(g > 0.0) || g.is_infinite() {
		return Err(Error::InvalidParameter(format!("gamma must be a positive number, got {g}")));
	}
	Ok(())
}

/// Precomputed input to output lookup for each channel.
#[derive(Clone, PartialEq, Eq)]
pub struct GammaTable {
	red:   [u8; 256],
	green: [u8; 256],
	blue:  [u8; 256],
}

impl GammaTable {
	pub fn identity() -> Self {
		let mut ramp = [0u8; 256];
		for (i, v) in ramp.iter_mut().enumerate() {
			*v = i as u8;
		}

		Self {
			red:   ramp,
			green: ramp,
			blue:  ramp,
		}
	}

	/// Builds the full table for `curve`; fails without side effects on invalid curves.
	pub fn new(curve: &GammaCurve) -> Result<Self> {
		curve.validate()?;

		Ok(match curve {
			GammaCurve::Identity => Self::identity(),
			GammaCurve::Simple(g) => {
				let ramp = channel_ramp(&ChannelCurve::new(0, 255, *g));
				Self {
					red:   ramp,
					green: ramp,
					blue:  ramp,
				}
			}
			GammaCurve::Channels([r, g, b]) => Self {
				red:   channel_ramp(r),
				green: channel_ramp(g),
				blue:  channel_ramp(b),
			},
		})
	}

	#[inline]
	pub fn apply(&self, color: Rgb) -> Rgb {
		Rgb {
			r: self.red[color.r as usize],
			g: self.green[color.g as usize],
			b: self.blue[color.b as usize],
		}
	}
}

impl Default for GammaTable {
	fn default() -> Self {
		Self::identity()
	}
}

impl std::fmt::Debug for GammaTable {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("GammaTable")
			.field("red[128]", &self.red[128])
			.field("green[128]", &self.green[128])
			.field("blue[128]", &self.blue[128])
			.finish()
	}
}

fn channel_ramp(curve: &ChannelCurve) -> [u8; 256] {
	let range = f64::from(curve.max - curve.min);
	let mut ramp = [0u8; 256];

	for (i, v) in ramp.iter_mut().enumerate() {
		let level = i as f64 / 255.0;
		*v = curve.min + (range * level.powf(curve.gamma)).round() as u8;
	}

	ramp
}

#[cfg(test)]
mod tests {
	use super::*;

	fn gray(v: u8) -> Rgb {
		Rgb { r: v, g: v, b: v }
	}

	#[test]
	fn identity_is_a_no_op() {
		let table = GammaTable::new(&GammaCurve::Identity).unwrap();
		for v in 0..=255u8 {
			assert_eq!(table.apply(gray(v)), gray(v));
		}
	}

	#[test]
	fn linear_gamma_matches_identity() {
		assert_eq!(GammaTable::new(&GammaCurve::Simple(1.0)).unwrap(), GammaTable::identity());
	}

	#[test]
	fn simple_gamma_keeps_endpoints() {
		let table = GammaTable::new(&GammaCurve::Simple(2.2)).unwrap();

		assert_eq!(table.apply(gray(0)), gray(0));
		assert_eq!(table.apply(gray(255)), gray(255));
		assert_eq!(table.apply(gray(128)), gray(56));
	}

	#[test]
	fn channels_are_scaled_into_their_range() {
		let table = GammaTable::new(&GammaCurve::Channels([
			ChannelCurve::new(10, 20, 1.0),
			ChannelCurve::new(0, 255, 1.0),
			ChannelCurve::new(0, 100, 1.0),
		]))
		.unwrap();

		assert_eq!(table.apply(gray(0)), Rgb { r: 10, g: 0, b: 0 });
		assert_eq!(table.apply(gray(255)), Rgb { r: 20, g: 255, b: 100 });
	}

	#[test]
	fn rejects_non_positive_exponents() {
		for g in [0.0, -1.0, f64::NAN, f64::INFINITY] {
			assert!(matches!(
				GammaTable::new(&GammaCurve::Simple(g)),
				Err(Error::InvalidParameter(_))
			));
		}
	}

	#[test]
	fn rejects_inverted_range() {
		let curve = GammaCurve::Channels([
			ChannelCurve::new(0, 255, 2.0),
			ChannelCurve::new(200, 100, 2.0),
			ChannelCurve::new(0, 255, 2.0),
		]);

		assert!(matches!(GammaTable::new(&curve), Err(Error::InvalidParameter(_))));
	}
}
