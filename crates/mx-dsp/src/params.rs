//! Modulable effect parameters
//!
//! Each modulable effect holds a `ModParams`: a fixed set of named values,
//! a target set, and a ramp counter. While ramping, every value moves from
//! its captured start toward its target along a raised-cosine curve; at
//! completion the values snap to the targets exactly.

use std::collections::HashMap;

/// Convert a fade time in seconds to a sample count at the engine rate
#[inline]
pub fn ramp_samples(seconds: f32, sample_rate: u32) -> u64 {
    if seconds <= 0.0 {
        0
    } else {
        (seconds as f64 * sample_rate as f64).round() as u64
    }
}

/// Raised-cosine ramp position for `done` of `total` samples
#[inline]
pub fn cosine_position(done: u64, total: u64) -> f32 {
    if total == 0 || done >= total {
        return 1.0;
    }
    let x = done as f64 / total as f64;
    (0.5 * (1.0 - (std::f64::consts::PI * x).cos())) as f32
}

/// Named parameter set with cosine-interpolated ramps toward targets.
///
/// The key set is fixed at construction; updates to unknown names are
/// ignored, so ramp advancement never allocates.
#[derive(Debug, Clone)]
pub struct ModParams {
    current: HashMap<String, f32>,
    start: HashMap<String, f32>,
    target: HashMap<String, f32>,
    ramp_total: u64,
    ramp_done: u64,
    sample_rate: u32,
}

impl ModParams {
    pub fn new(sample_rate: u32, defaults: &[(&str, f32)]) -> Self {
        let map: HashMap<String, f32> = defaults
            .iter()
            .map(|&(name, value)| (name.to_string(), value))
            .collect();
        Self {
            current: map.clone(),
            start: map.clone(),
            target: map,
            ramp_total: 0,
            ramp_done: 0,
            sample_rate,
        }
    }

    /// Current (possibly mid-ramp) value of a parameter
    #[inline]
    pub fn get(&self, name: &str) -> f32 {
        self.current.get(name).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.current.contains_key(name)
    }

    /// Begin ramping the named parameters toward new values over
    /// `fade_secs`. A non-positive fade snaps immediately. Names not in
    /// the set are ignored; parameters not named keep ramping toward their
    /// previous targets from their current values.
    pub fn set_targets(&mut self, params: &[(&str, f32)], fade_secs: f32) {
        for (name, value) in self.current.iter() {
            self.start.insert(name.clone(), *value);
        }
        for &(name, value) in params {
            if let Some(slot) = self.target.get_mut(name) {
                *slot = value;
            }
        }

        let total = ramp_samples(fade_secs, self.sample_rate);
        if total == 0 {
            for (name, value) in self.target.iter() {
                self.current.insert(name.clone(), *value);
                self.start.insert(name.clone(), *value);
            }
            self.ramp_total = 0;
            self.ramp_done = 0;
        } else {
            self.ramp_total = total;
            self.ramp_done = 0;
        }
    }

    /// Advance the ramp by `samples`, interpolating or snapping
    pub fn advance(&mut self, samples: usize) {
        if self.ramp_total == 0 {
            return;
        }
        self.ramp_done = self.ramp_done.saturating_add(samples as u64);
        if self.ramp_done >= self.ramp_total {
            for (name, value) in self.target.iter() {
                if let Some(slot) = self.current.get_mut(name) {
                    *slot = *value;
                }
            }
            self.ramp_total = 0;
            self.ramp_done = 0;
            return;
        }

        let t = cosine_position(self.ramp_done, self.ramp_total);
        for (name, target) in self.target.iter() {
            let from = self.start.get(name).copied().unwrap_or(*target);
            if let Some(slot) = self.current.get_mut(name) {
                *slot = from + (target - from) * t;
            }
        }
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.ramp_total != 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ramp_samples_rounds() {
        assert_eq!(ramp_samples(0.1, 44100), 4410);
        assert_eq!(ramp_samples(0.0, 44100), 0);
        assert_eq!(ramp_samples(-1.0, 48000), 0);
    }

    #[test]
    fn test_snap_without_fade() {
        let mut p = ModParams::new(44100, &[("wet_level", 0.5)]);
        p.set_targets(&[("wet_level", 0.9)], 0.0);
        assert_eq!(p.get("wet_level"), 0.9);
        assert!(!p.is_ramping());
    }

    #[test]
    fn test_cosine_midpoint() {
        let mut p = ModParams::new(1000, &[("x", 0.0)]);
        p.set_targets(&[("x", 1.0)], 1.0);

        // Halfway through a cosine ramp sits exactly at the midpoint.
        p.advance(500);
        assert!((p.get("x") - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_ramp_terminates_exactly() {
        let mut p = ModParams::new(44100, &[("x", 0.2)]);
        p.set_targets(&[("x", 0.8)], 0.05);

        let total = ramp_samples(0.05, 44100);
        let mut advanced = 0;
        while advanced < total + 1024 {
            p.advance(1024);
            advanced += 1024;
        }
        assert_eq!(p.get("x"), 0.8);
        assert!(!p.is_ramping());
    }

    #[test]
    fn test_unknown_name_ignored() {
        let mut p = ModParams::new(44100, &[("x", 0.2)]);
        p.set_targets(&[("bogus", 3.0)], 0.0);
        assert_eq!(p.get("x"), 0.2);
        assert!(!p.contains("bogus"));
    }

    #[test]
    fn test_monotone_ramp() {
        let mut p = ModParams::new(1000, &[("x", 0.0)]);
        p.set_targets(&[("x", 1.0)], 1.0);

        let mut last = 0.0;
        for _ in 0..10 {
            p.advance(100);
            let v = p.get("x");
            assert!(v >= last);
            last = v;
        }
        assert_eq!(last, 1.0);
    }
}
