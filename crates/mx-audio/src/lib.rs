//! mx-audio: sound-card output using cpal
//!
//! The engine talks to the device through the narrow [`OutputSink`]
//! contract: a blocking `write` of one interleaved stereo block. The
//! cpal-backed [`DeviceSink`] keeps the (non-`Send`) stream on a dedicated
//! device thread and feeds it through an SPSC sample ring, so the sink
//! handle itself can live on the engine's output worker.

mod device;
mod error;
mod sink;

pub use device::{find_output_device, output_device_names};
pub use error::{AudioError, AudioResult};
pub use sink::DeviceSink;

use mx_core::Sample;

/// Output stream configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub sample_rate: u32,
    /// Frames per block
    pub period: usize,
    /// Device name; `None` selects the default output device
    pub device: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            period: 1024,
            device: None,
        }
    }
}

/// Destination for mixed blocks.
///
/// `write` blocks until the sink has consumed the block; an error means the
/// block was dropped (the caller counts it as an underrun and moves on).
pub trait OutputSink: Send {
    fn write(&mut self, interleaved: &[Sample]) -> AudioResult<()>;
}
