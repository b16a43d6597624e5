//! Engine metrics, observed from the master block
//!
//! All fields are atomics so any thread can snapshot them while the
//! workers run. Peaks are ballistic: each block the held value decays by
//! 0.95 and then takes the max with the block peak.

use std::sync::atomic::{AtomicU64, Ordering};

use mx_core::{AtomicF32, Sample};
use mx_dsp::{block_peak, block_rms};

/// Per-block peak decay factor
const PEAK_DECAY: f32 = 0.95;

#[derive(Debug, Default)]
pub struct Metrics {
    peak_l: AtomicF32,
    peak_r: AtomicF32,
    rms_l: AtomicF32,
    rms_r: AtomicF32,
    clip_count: AtomicU64,
    underruns: AtomicU64,
    cpu_usage: AtomicF32,
    blocks_delivered: AtomicU64,
}

/// Point-in-time copy of the metrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub peak: [f32; 2],
    pub rms: [f32; 2],
    pub clip_count: u64,
    pub underruns: u64,
    /// Mix wall time / period duration, in percent
    pub cpu_usage: f32,
    pub blocks_delivered: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update peak/RMS from the finished master block; `clipped` reports
    /// whether the pre-limiter peak reached unity
    pub(crate) fn update_block(&self, left: &[Sample], right: &[Sample], clipped: bool) {
        let peak_l = block_peak(left).max(self.peak_l.load() * PEAK_DECAY);
        let peak_r = block_peak(right).max(self.peak_r.load() * PEAK_DECAY);
        self.peak_l.store(peak_l);
        self.peak_r.store(peak_r);
        self.rms_l.store(block_rms(left));
        self.rms_r.store(block_rms(right));
        if clipped {
            self.clip_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn set_cpu_usage(&self, percent: f32) {
        self.cpu_usage.store(percent);
    }

    pub(crate) fn note_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_block_delivered(&self) {
        self.blocks_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            peak: [self.peak_l.load(), self.peak_r.load()],
            rms: [self.rms_l.load(), self.rms_r.load()],
            clip_count: self.clip_count.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            cpu_usage: self.cpu_usage.load(),
            blocks_delivered: self.blocks_delivered.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.peak_l.store(0.0);
        self.peak_r.store(0.0);
        self.rms_l.store(0.0);
        self.rms_r.store(0.0);
        self.clip_count.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.cpu_usage.store(0.0);
        self.blocks_delivered.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ballistic_peak_decays() {
        let metrics = Metrics::new();
        let loud = [0.8f32; 16];
        let quiet = [0.0f32; 16];

        metrics.update_block(&loud, &loud, false);
        assert_eq!(metrics.snapshot().peak, [0.8, 0.8]);

        metrics.update_block(&quiet, &quiet, false);
        let peak = metrics.snapshot().peak[0];
        assert!((peak - 0.8 * 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_clip_counting() {
        let metrics = Metrics::new();
        let block = [0.5f32; 8];
        metrics.update_block(&block, &block, true);
        metrics.update_block(&block, &block, false);
        metrics.update_block(&block, &block, true);
        assert_eq!(metrics.snapshot().clip_count, 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let metrics = Metrics::new();
        metrics.update_block(&[1.0f32; 4], &[1.0f32; 4], true);
        metrics.note_underrun();
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.peak, [0.0, 0.0]);
        assert_eq!(snap.clip_count, 0);
        assert_eq!(snap.underruns, 0);
    }
}
