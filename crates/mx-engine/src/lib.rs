//! mx-engine: the real-time mixing engine
//!
//! A block-based mixer walks sources -> groups -> buses -> aux sends ->
//! master once per period and hands finished stereo blocks to an output
//! pump over a bounded SPSC ring. Control-plane calls (play, seek, volume,
//! solo/mute, effect edits) may come from any thread and serialize on the
//! per-node mutexes the mixer also takes.
//!
//! ```no_run
//! use mx_engine::{generate_sine_wave, AudioSystem, EngineConfig, Source};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), mx_engine::EngineError> {
//! let mut sys = AudioSystem::new(EngineConfig::default())?;
//! let group = sys.create_group("tones");
//! let bus = sys.create_bus("main");
//! bus.add_group(group.clone());
//! sys.add_bus(bus);
//!
//! let sine = Arc::new(generate_sine_wave(441.0, 1.0, sys.sample_rate(), 0.5));
//! sys.add_to_group("tones", sine.clone())?;
//! sys.start()?;
//! sine.play(0.1);
//! # Ok(())
//! # }
//! ```

mod bus;
mod clip;
mod error;
mod fade;
mod generate;
mod group;
mod metrics;
mod mixer;
mod output;
mod source;
mod streaming;
mod system;

pub use bus::{Bus, BusState};
pub use clip::ClipSource;
pub use error::{EngineError, EngineResult};
pub use fade::{VolumeRamp, VOLUME_MAX};
pub use generate::{generate_sine_wave, generate_white_noise};
pub use group::{Group, GroupState};
pub use metrics::{Metrics, MetricsSnapshot};
pub use source::{PlayState, Source, SourceCtl, SPEED_MAX, SPEED_MIN};
pub use streaming::StreamedSource;
pub use system::{AudioSystem, EngineConfig};

// Effect factories come from mx-dsp; re-exported so callers wire chains
// without a second import.
pub use mx_audio::{output_device_names, OutputSink};
pub use mx_dsp::{Compressor, Delay, Effect, EqFilter, EqKind, Reverb, Unity};
