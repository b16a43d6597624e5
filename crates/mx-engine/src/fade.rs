//! Volume fades
//!
//! Every fader node (source, group, bus) holds a `VolumeRamp`: a current
//! volume moving toward a target along a raised-cosine curve over a fixed
//! sample count. The mixer advances each ramp by one period per block; the
//! volume used for a block is the value after that advance, so a completed
//! ramp lands exactly on its target.

use mx_dsp::params::cosine_position;

/// Volume range shared by sources, groups, buses and the master
pub const VOLUME_MAX: f32 = 2.0;

#[derive(Debug, Clone)]
pub struct VolumeRamp {
    current: f32,
    from: f32,
    target: f32,
    total: u64,
    done: u64,
}

impl VolumeRamp {
    pub fn new(volume: f32) -> Self {
        let v = volume.clamp(0.0, VOLUME_MAX);
        Self {
            current: v,
            from: v,
            target: v,
            total: 0,
            done: 0,
        }
    }

    /// Jump to a volume, cancelling any fade
    pub fn set(&mut self, volume: f32) {
        let v = volume.clamp(0.0, VOLUME_MAX);
        self.current = v;
        self.from = v;
        self.target = v;
        self.total = 0;
        self.done = 0;
    }

    /// Fade from the current volume to `target` over `samples`
    pub fn fade_to(&mut self, target: f32, samples: u64) {
        let target = target.clamp(0.0, VOLUME_MAX);
        if samples == 0 {
            self.set(target);
            return;
        }
        self.from = self.current;
        self.target = target;
        self.total = samples;
        self.done = 0;
    }

    /// Fade to `target` starting from silence (play/resume with fade-in)
    pub fn fade_from_zero(&mut self, target: f32, samples: u64) {
        self.current = 0.0;
        self.fade_to(target, samples);
    }

    /// Advance by `samples` and return the volume to use for this block
    pub fn advance(&mut self, samples: u64) -> f32 {
        if self.total != 0 {
            self.done = self.done.saturating_add(samples);
            if self.done >= self.total {
                self.current = self.target;
                self.total = 0;
                self.done = 0;
            } else {
                let t = cosine_position(self.done, self.total);
                self.current = self.from + (self.target - self.from) * t;
            }
        }
        self.current
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_fading(&self) -> bool {
        self.total != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_clamps() {
        let mut ramp = VolumeRamp::new(1.0);
        ramp.set(5.0);
        assert_eq!(ramp.current(), VOLUME_MAX);
        ramp.set(-1.0);
        assert_eq!(ramp.current(), 0.0);
    }

    #[test]
    fn test_fade_out_is_monotone_and_exact() {
        let mut ramp = VolumeRamp::new(0.8);
        ramp.fade_to(0.0, 4410);

        let mut last = 0.8;
        let mut advanced = 0u64;
        while advanced < 4410 {
            let v = ramp.advance(1024);
            advanced += 1024;
            assert!(v <= last);
            last = v;
        }
        assert_eq!(ramp.current(), 0.0);
        assert!(!ramp.is_fading());
    }

    #[test]
    fn test_zero_sample_fade_snaps() {
        let mut ramp = VolumeRamp::new(0.0);
        ramp.fade_to(1.5, 0);
        assert_eq!(ramp.current(), 1.5);
    }
}
