//! mx-dsp: block effects for the mixdown engine
//!
//! Modules:
//! - `params` - modulable parameter maps with cosine ramps
//! - `reverb` - three-tap algorithmic reverb with persistent tails
//! - `delay` - single-tap delay
//! - `dynamics` - envelope-follower compressor
//! - `eq` - 4th-order Butterworth filter EQ (lowpass/highpass/bandpass)
//! - `limiter` - hard clip with sign preservation
//! - `analysis` - block peak/RMS
//! - `interp` - fractional-position cubic interpolation

pub mod analysis;
pub mod delay;
pub mod dynamics;
pub mod eq;
pub mod interp;
pub mod limiter;
pub mod params;
pub mod reverb;

pub use analysis::{block_peak, block_rms};
pub use delay::Delay;
pub use dynamics::Compressor;
pub use eq::{EqFilter, EqKind};
pub use interp::cubic_interp;
pub use limiter::hard_clip;
pub use params::{ramp_samples, ModParams};
pub use reverb::Reverb;

use mx_core::Sample;

/// Block effect applied to one node's stereo signal.
///
/// An effect processes both channels of a period-length block in place,
/// keeping whatever per-channel state it needs across blocks. Modulable
/// effects additionally expose a parameter map whose values ramp toward
/// targets over a time window; the mixer calls [`Effect::advance`] once per
/// block, before processing, to move those ramps forward.
pub trait Effect: Send {
    /// Short identifier used in logs and effect lookups
    fn name(&self) -> &'static str;

    /// Advance parameter ramps by `samples` (one period per block)
    fn advance(&mut self, _samples: usize) {}

    /// Ramp the named parameters toward new values over `fade_secs`.
    /// Unknown parameter names are ignored; `fade_secs <= 0` snaps.
    fn update_params(&mut self, _params: &[(&str, f32)], _fade_secs: f32) {}

    /// Read a parameter's current (possibly mid-ramp) value
    fn param(&self, _name: &str) -> Option<f32> {
        None
    }

    /// Process one block in place
    fn process_block(&mut self, left: &mut [Sample], right: &mut [Sample]);

    /// Clear all internal signal state
    fn reset(&mut self) {}
}

/// Pass-through effect, useful for wiring checks on return buses
#[derive(Debug, Default)]
pub struct Unity;

impl Effect for Unity {
    fn name(&self) -> &'static str {
        "unity"
    }

    fn process_block(&mut self, _left: &mut [Sample], _right: &mut [Sample]) {}
}
