//! mx-core: sample types and buffers shared by the mixdown crates

mod sample;

pub use sample::{AtomicF32, Sample, StereoBlock};
