//! Procedural test signals

use rand::Rng;

use crate::clip::ClipSource;

/// Sine wave clip at `freq` Hz for `dur` seconds
pub fn generate_sine_wave(freq: f32, dur: f32, sample_rate: u32, amp: f32) -> ClipSource {
    let frames = (dur.max(0.0) as f64 * sample_rate as f64).round() as usize;
    let step = 2.0 * std::f64::consts::PI * freq as f64 / sample_rate as f64;
    let samples: Vec<f32> = (0..frames)
        .map(|i| ((i as f64 * step).sin() as f32) * amp)
        .collect();
    ClipSource::new("", samples.clone(), samples, sample_rate)
}

/// Uniform white noise clip for `dur` seconds
pub fn generate_white_noise(dur: f32, sample_rate: u32, amp: f32) -> ClipSource {
    let frames = (dur.max(0.0) as f64 * sample_rate as f64).round() as usize;
    let mut rng = rand::thread_rng();
    let left: Vec<f32> = (0..frames).map(|_| rng.gen_range(-1.0..=1.0) * amp).collect();
    let right: Vec<f32> = (0..frames).map(|_| rng.gen_range(-1.0..=1.0) * amp).collect();
    ClipSource::new("", left, right, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;

    #[test]
    fn test_sine_length_and_peak() {
        let clip = generate_sine_wave(441.0, 1.0, 44100, 0.5);
        assert_eq!(clip.frames(), 44100);
        assert_eq!(clip.sample_rate(), 44100);

        let peak = clip_peak(&clip);
        assert!((peak - 0.5).abs() < 1e-3, "peak {peak}");
    }

    #[test]
    fn test_noise_stays_in_range() {
        let clip = generate_white_noise(0.1, 44100, 0.25);
        assert_eq!(clip.frames(), 4410);
        assert!(clip_peak(&clip) <= 0.25 + 1e-6);
    }

    fn clip_peak(clip: &ClipSource) -> f32 {
        use crate::source::PlayState;

        clip.play(0.0);
        let mut ctl = clip.ctl().lock();
        let mut peak = 0.0f32;
        let mut left = vec![0.0; 1024];
        let mut right = vec![0.0; 1024];
        while ctl.state == PlayState::Playing {
            left.fill(0.0);
            right.fill(0.0);
            clip.render_add(&mut ctl, &mut left, &mut right, 1.0);
            peak = peak.max(mx_dsp::block_peak(&left));
        }
        peak
    }
}
