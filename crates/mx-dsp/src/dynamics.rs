//! Dynamics: envelope-follower compressor

use mx_core::Sample;

use crate::params::ModParams;
use crate::Effect;

/// Per-channel envelope follower with separate attack/release smoothing
#[derive(Debug, Clone, Copy, Default)]
struct EnvelopeFollower {
    envelope: f32,
}

impl EnvelopeFollower {
    #[inline]
    fn process(&mut self, input: Sample, attack_coeff: f32, release_coeff: f32) -> f32 {
        let abs_input = input.abs();
        let coeff = if abs_input > self.envelope {
            attack_coeff
        } else {
            release_coeff
        };
        self.envelope = abs_input + coeff * (self.envelope - abs_input);
        self.envelope
    }
}

/// Modulable compressor with parameters `threshold` (linear), `ratio`,
/// `attack` and `release` (seconds).
///
/// Gain reduction is computed in the linear domain: when the envelope
/// exceeds the threshold, the excess is scaled by 1/ratio.
pub struct Compressor {
    params: ModParams,
    followers: [EnvelopeFollower; 2],
    sample_rate: u32,
}

impl Compressor {
    pub fn new(sample_rate: u32, threshold: f32, ratio: f32, attack: f32, release: f32) -> Self {
        Self {
            params: ModParams::new(
                sample_rate,
                &[
                    ("threshold", threshold.clamp(0.0, 1.0)),
                    ("ratio", ratio.max(1.0)),
                    ("attack", attack.max(0.0)),
                    ("release", release.max(0.0)),
                ],
            ),
            followers: [EnvelopeFollower::default(); 2],
            sample_rate,
        }
    }

    #[inline]
    fn time_coeff(&self, seconds: f32) -> f32 {
        let samples = (seconds.max(1e-4) * self.sample_rate as f32).max(1.0);
        (-1.0 / samples).exp()
    }
}

impl Effect for Compressor {
    fn name(&self) -> &'static str {
        "compressor"
    }

    fn advance(&mut self, samples: usize) {
        self.params.advance(samples);
    }

    fn update_params(&mut self, params: &[(&str, f32)], fade_secs: f32) {
        self.params.set_targets(params, fade_secs);
    }

    fn param(&self, name: &str) -> Option<f32> {
        self.params.contains(name).then(|| self.params.get(name))
    }

    fn process_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        let threshold = self.params.get("threshold").max(1e-6);
        let ratio = self.params.get("ratio").max(1.0);
        let attack_coeff = self.time_coeff(self.params.get("attack"));
        let release_coeff = self.time_coeff(self.params.get("release"));

        let [fl, fr] = &mut self.followers;
        for (channel, follower) in [(left, fl), (right, fr)] {
            for sample in channel.iter_mut() {
                let env = follower.process(*sample, attack_coeff, release_coeff);
                if env > threshold {
                    let reduced = threshold + (env - threshold) / ratio;
                    *sample *= reduced / env;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.followers = [EnvelopeFollower::default(); 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_threshold_untouched() {
        let mut comp = Compressor::new(44100, 0.5, 4.0, 0.001, 0.05);
        let mut left = vec![0.1; 512];
        let mut right = vec![0.1; 512];
        comp.process_block(&mut left, &mut right);
        assert!(left.iter().all(|&s| (s - 0.1).abs() < 1e-4));
    }

    #[test]
    fn test_loud_signal_reduced() {
        let mut comp = Compressor::new(44100, 0.25, 4.0, 0.0005, 0.1);
        let mut left = vec![1.0; 4096];
        let mut right = vec![1.0; 4096];
        comp.process_block(&mut left, &mut right);

        // Past the attack, gain should settle near (t + (1-t)/r) / 1.0
        let settled = left[4095];
        let expected = 0.25 + 0.75 / 4.0;
        assert!((settled - expected).abs() < 0.01, "settled at {settled}");
    }
}
