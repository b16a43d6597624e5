//! Per-block signal measurement

use mx_core::Sample;

/// Absolute peak of a block
#[inline]
pub fn block_peak(block: &[Sample]) -> f32 {
    block.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()))
}

/// Root-mean-square of a block
pub fn block_rms(block: &[Sample]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = block.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / block.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_uses_absolute_value() {
        assert_eq!(block_peak(&[0.1, -0.9, 0.5]), 0.9);
        assert_eq!(block_peak(&[]), 0.0);
    }

    #[test]
    fn test_rms_of_constant() {
        let block = [0.5f32; 64];
        assert!((block_rms(&block) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rms_of_square_wave() {
        let block = [0.5, -0.5, 0.5, -0.5];
        assert!((block_rms(&block) - 0.5).abs() < 1e-6);
    }
}
