//! EQ filter: 4th-order Butterworth lowpass/highpass/bandpass
//!
//! Coefficient design comes from the `biquad` crate; this module only
//! drives parameter updates and blends the filtered signal back in:
//! `out = x + (filt(x) - x) * (10^(gain/20) - 1)`.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use mx_core::Sample;

use crate::params::ModParams;
use crate::Effect;

/// Section Q values for a 4th-order Butterworth cascade
const SECTION_Q: [f32; 2] = [0.541_196_1, 1.306_563];

/// Filter variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqKind {
    Lowpass,
    Highpass,
    Bandpass,
}

impl EqKind {
    fn to_biquad(self) -> Type<f32> {
        match self {
            EqKind::Lowpass => Type::LowPass,
            EqKind::Highpass => Type::HighPass,
            EqKind::Bandpass => Type::BandPass,
        }
    }
}

/// Modulable EQ filter with parameters `frequency` (Hz), `q`, `gain` (dB)
pub struct EqFilter {
    kind: EqKind,
    params: ModParams,
    sections: [[DirectForm2Transposed<f32>; 2]; 2],
    last_frequency: f32,
    last_q: f32,
    sample_rate: u32,
}

impl EqFilter {
    pub fn new(sample_rate: u32, kind: EqKind, frequency: f32, q: f32, gain: f32) -> Self {
        let frequency = Self::clamp_frequency(frequency, sample_rate);
        let q = q.max(0.1);

        let coeffs = Self::design(kind, frequency, q, sample_rate);
        let sections = [
            [
                DirectForm2Transposed::<f32>::new(coeffs[0]),
                DirectForm2Transposed::<f32>::new(coeffs[1]),
            ],
            [
                DirectForm2Transposed::<f32>::new(coeffs[0]),
                DirectForm2Transposed::<f32>::new(coeffs[1]),
            ],
        ];

        Self {
            kind,
            params: ModParams::new(
                sample_rate,
                &[("frequency", frequency), ("q", q), ("gain", gain)],
            ),
            sections,
            last_frequency: frequency,
            last_q: q,
            sample_rate,
        }
    }

    pub fn kind(&self) -> EqKind {
        self.kind
    }

    fn clamp_frequency(frequency: f32, sample_rate: u32) -> f32 {
        frequency.clamp(10.0, sample_rate as f32 * 0.49)
    }

    /// Design the two cascade sections for the current parameters
    fn design(kind: EqKind, frequency: f32, q: f32, sample_rate: u32) -> [Coefficients<f32>; 2] {
        let fs = (sample_rate as f32).hz();
        let f0 = frequency.hz();
        std::array::from_fn(|i| {
            Coefficients::<f32>::from_params(kind.to_biquad(), fs, f0, SECTION_Q[i] * q)
                .unwrap_or(Coefficients {
                    a1: 0.0,
                    a2: 0.0,
                    b0: 1.0,
                    b1: 0.0,
                    b2: 0.0,
                })
        })
    }

    fn refresh_coefficients(&mut self) {
        let frequency = Self::clamp_frequency(self.params.get("frequency"), self.sample_rate);
        let q = self.params.get("q").max(0.1);
        if frequency == self.last_frequency && q == self.last_q {
            return;
        }
        let coeffs = Self::design(self.kind, frequency, q, self.sample_rate);
        for channel in &mut self.sections {
            channel[0].update_coefficients(coeffs[0]);
            channel[1].update_coefficients(coeffs[1]);
        }
        self.last_frequency = frequency;
        self.last_q = q;
    }
}

impl Effect for EqFilter {
    fn name(&self) -> &'static str {
        "eq_filter"
    }

    fn advance(&mut self, samples: usize) {
        self.params.advance(samples);
        self.refresh_coefficients();
    }

    fn update_params(&mut self, params: &[(&str, f32)], fade_secs: f32) {
        self.params.set_targets(params, fade_secs);
        self.refresh_coefficients();
    }

    fn param(&self, name: &str) -> Option<f32> {
        self.params.contains(name).then(|| self.params.get(name))
    }

    fn process_block(&mut self, left: &mut [Sample], right: &mut [Sample]) {
        // gain = 0 dB leaves the signal untouched
        let blend = 10.0f32.powf(self.params.get("gain") / 20.0) - 1.0;

        let [ch_l, ch_r] = &mut self.sections;
        for (channel, sections) in [(left, ch_l), (right, ch_r)] {
            for sample in channel.iter_mut() {
                let x = *sample;
                let stage = sections[0].run(x);
                let filtered = sections[1].run(stage);
                *sample = x + (filtered - x) * blend;
            }
        }
    }

    fn reset(&mut self) {
        for channel in &mut self.sections {
            for section in channel.iter_mut() {
                section.reset_state();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_gain_is_identity() {
        let mut eq = EqFilter::new(44100, EqKind::Lowpass, 1000.0, 1.0, 0.0);
        let input: Vec<Sample> = (0..256).map(|i| ((i as f32) * 0.37).sin() * 0.5).collect();
        let mut left = input.clone();
        let mut right = input.clone();
        eq.process_block(&mut left, &mut right);
        for (out, inp) in left.iter().zip(input.iter()) {
            assert!((out - inp).abs() < 1e-6);
        }
    }

    #[test]
    fn test_lowpass_blend_attenuates_highs() {
        let rate = 44100;
        // blend = 10^(6.0206/20) - 1 = 1, so the output is exactly the
        // lowpass signal; a tone far above the cutoff should lose level.
        let mut eq = EqFilter::new(rate, EqKind::Lowpass, 500.0, 1.0, 6.0206);
        let freq = 8000.0f32;
        let step = 2.0 * std::f32::consts::PI * freq / rate as f32;
        let input: Vec<Sample> = (0..4096).map(|i| (step * i as f32).sin() * 0.5).collect();
        let mut left = input.clone();
        let mut right = input.clone();
        eq.process_block(&mut left, &mut right);

        let out_peak = crate::block_peak(&left[2048..]);
        assert!(out_peak < 0.5 * 0.9, "peak {out_peak}");
    }
}
