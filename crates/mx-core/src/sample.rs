//! Sample type and stereo block buffer

use std::sync::atomic::{AtomicU32, Ordering};

/// Type alias for audio samples (f32 everywhere: storage, mixing, output)
pub type Sample = f32;

/// Split-channel stereo buffer of a fixed block length
#[derive(Debug, Clone)]
pub struct StereoBlock {
    left: Vec<Sample>,
    right: Vec<Sample>,
}

impl StereoBlock {
    pub fn new(frames: usize) -> Self {
        Self {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    /// Number of frames in the block
    #[inline]
    pub fn frames(&self) -> usize {
        self.left.len()
    }

    #[inline]
    pub fn left(&self) -> &[Sample] {
        &self.left
    }

    #[inline]
    pub fn right(&self) -> &[Sample] {
        &self.right
    }

    #[inline]
    pub fn left_mut(&mut self) -> &mut [Sample] {
        &mut self.left
    }

    #[inline]
    pub fn right_mut(&mut self) -> &mut [Sample] {
        &mut self.right
    }

    #[inline]
    pub fn channels(&self) -> (&[Sample], &[Sample]) {
        (&self.left, &self.right)
    }

    #[inline]
    pub fn channels_mut(&mut self) -> (&mut [Sample], &mut [Sample]) {
        (&mut self.left, &mut self.right)
    }

    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }

    /// Sum another block into this one, scaled by `gain`
    pub fn add_scaled(&mut self, other: &StereoBlock, gain: Sample) {
        debug_assert_eq!(self.frames(), other.frames());
        for (dst, &src) in self.left.iter_mut().zip(other.left.iter()) {
            *dst += src * gain;
        }
        for (dst, &src) in self.right.iter_mut().zip(other.right.iter()) {
            *dst += src * gain;
        }
    }

    /// Overwrite this block with another, scaled by `gain`
    pub fn copy_scaled(&mut self, other: &StereoBlock, gain: Sample) {
        debug_assert_eq!(self.frames(), other.frames());
        for (dst, &src) in self.left.iter_mut().zip(other.left.iter()) {
            *dst = src * gain;
        }
        for (dst, &src) in self.right.iter_mut().zip(other.right.iter()) {
            *dst = src * gain;
        }
    }

    /// Scale both channels in place
    pub fn scale(&mut self, gain: Sample) {
        for s in &mut self.left {
            *s *= gain;
        }
        for s in &mut self.right {
            *s *= gain;
        }
    }

    /// Interleave into an L/R sample slice of `frames * 2` length
    pub fn interleave_into(&self, out: &mut [Sample]) {
        debug_assert_eq!(out.len(), self.frames() * 2);
        for (i, chunk) in out.chunks_exact_mut(2).enumerate() {
            chunk[0] = self.left[i];
            chunk[1] = self.right[i];
        }
    }
}

/// Atomic float stored as raw bits, for lock-free metering
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_scaled() {
        let mut a = StereoBlock::new(4);
        let mut b = StereoBlock::new(4);
        b.left_mut().fill(0.5);
        b.right_mut().fill(-0.5);

        a.add_scaled(&b, 2.0);
        assert_eq!(a.left(), &[1.0; 4]);
        assert_eq!(a.right(), &[-1.0; 4]);
    }

    #[test]
    fn test_interleave() {
        let mut block = StereoBlock::new(2);
        block.left_mut().copy_from_slice(&[1.0, 3.0]);
        block.right_mut().copy_from_slice(&[2.0, 4.0]);

        let mut out = [0.0; 4];
        block.interleave_into(&mut out);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_atomic_f32_roundtrip() {
        let a = AtomicF32::new(0.25);
        assert_eq!(a.load(), 0.25);
        a.store(-1.5);
        assert_eq!(a.load(), -1.5);
    }
}
