//! Three-tap algorithmic reverb
//!
//! Fixed early-reflection taps at {1323, 2205, 3087} frames with damped
//! decay coefficients. Tap histories are persistent per-channel rings, so
//! tails carry across block boundaries.

use mx_core::Sample;

use crate::params::ModParams;
use crate::Effect;

const TAPS: [usize; 3] = [1323, 2205, 3087];
const TAP_DECAYS: [f32; 3] = [0.6, 0.4, 0.3];

/// Power of two above the longest tap, for mask indexing
const HISTORY_LEN: usize = 4096;

/// Modulable reverb with parameters `room_size`, `damping`, `wet_level`,
/// `dry_level`
pub struct Reverb {
    params: ModParams,
    history: [Box<[Sample]>; 2],
    write_pos: usize,
}

impl Reverb {
    pub fn new(
        sample_rate: u32,
        room_size: f32,
        damping: f32,
        wet_level: f32,
        dry_level: f32,
    ) -> Self {
        Self {
            params: ModParams::new(
                sample_rate,
                &[
                    ("room_size", room_size.clamp(0.0, 1.0)),
                    ("damping", damping.clamp(0.0, 1.0)),
                    ("wet_level", wet_level.clamp(0.0, 1.0)),
                    ("dry_level", dry_level.clamp(0.0, 1.0)),
                ],
            ),
            history: [
                vec![0.0; HISTORY_LEN].into_boxed_slice(),
                vec![0.0; HISTORY_LEN].into_boxed_slice(),
            ],
            write_pos: 0,
        }
    }

    fn process_channel(
        channel: &mut [Sample],
        history: &mut [Sample],
        mut write_pos: usize,
        room_size: f32,
        damping: f32,
        wet_level: f32,
        dry_level: f32,
    ) -> usize {
        let damp = 1.0 - damping;
        for sample in channel.iter_mut() {
            let x = *sample;
            history[write_pos] = x;

            let mut wet = 0.0;
            for (tap, base) in TAPS.iter().zip(TAP_DECAYS.iter()) {
                let idx = (write_pos + HISTORY_LEN - tap) & (HISTORY_LEN - 1);
                wet += base * damp * history[idx];
            }

            *sample = dry_level * x + wet_level * wet * room_size;
            write_pos = (write_pos + 1) & (HISTORY_LEN - 1);
        }
        write_pos
    }
}

impl Effect for Reverb {
    fn name(&self) -> &'static str {
        "reverb"
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
        let room_size = self.params.get("room_size");
        let damping = self.params.get("damping");
        let wet_level = self.params.get("wet_level");
        let dry_level = self.params.get("dry_level");

        let next = Self::process_channel(
            left,
            &mut self.history[0],
            self.write_pos,
            room_size,
            damping,
            wet_level,
            dry_level,
        );
        Self::process_channel(
            right,
            &mut self.history[1],
            self.write_pos,
            room_size,
            damping,
            wet_level,
            dry_level,
        );
        self.write_pos = next;
    }

    fn reset(&mut self) {
        for h in &mut self.history {
            h.fill(0.0);
        }
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_only_passes_signal() {
        let mut reverb = Reverb::new(44100, 0.5, 0.5, 0.0, 1.0);
        let mut left = vec![0.25; 256];
        let mut right = vec![-0.25; 256];
        reverb.process_block(&mut left, &mut right);
        assert!(left.iter().all(|&s| (s - 0.25).abs() < 1e-7));
        assert!(right.iter().all(|&s| (s + 0.25).abs() < 1e-7));
    }

    #[test]
    fn test_tail_crosses_block_boundary() {
        let mut reverb = Reverb::new(44100, 1.0, 0.0, 1.0, 0.0);

        // One impulse, then silence: the first tap lands 1323 frames later,
        // i.e. in the second 1024-frame block.
        let mut left = vec![0.0; 1024];
        let mut right = vec![0.0; 1024];
        left[0] = 1.0;
        right[0] = 1.0;
        reverb.process_block(&mut left, &mut right);
        assert!(left.iter().all(|&s| s == 0.0));

        let mut left2 = vec![0.0; 1024];
        let mut right2 = vec![0.0; 1024];
        reverb.process_block(&mut left2, &mut right2);
        assert!((left2[1323 - 1024] - 0.6).abs() < 1e-6);
        assert!((right2[1323 - 1024] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_damping_kills_wet() {
        let mut reverb = Reverb::new(44100, 1.0, 1.0, 1.0, 0.0);
        let mut left = vec![0.5; 4096];
        let mut right = vec![0.5; 4096];
        reverb.process_block(&mut left, &mut right);
        assert!(left.iter().all(|&s| s.abs() < 1e-7));
    }
}
