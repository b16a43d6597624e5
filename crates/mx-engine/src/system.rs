//! The owning aggregate: graph, workers, device, lifecycle
//!
//! `AudioSystem` owns the routing graph, the master settings, the metrics,
//! the preallocated mixer scratch, and the output sink. `start` spawns the
//! mixer and pump workers; `stop` drains and joins them (their scratch and
//! sink come back through the join handles); `close` is terminal and
//! releases the device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mx_audio::{DeviceSink, OutputConfig, OutputSink};
use mx_core::Sample;
use mx_dsp::Effect;
use rtrb::RingBuffer;

use crate::bus::{Bus, Graph};
use crate::clip::ClipSource;
use crate::error::{EngineError, EngineResult};
use crate::group::Group;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::mixer::{MasterCtl, Mixer, MixerScratch};
use crate::output::run_pump;
use crate::source::Source;
use crate::streaming::StreamedSource;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per block
    pub period: usize,
    /// Handoff queue depth between mixer and pump, in blocks
    pub queue_blocks: usize,
    /// Output device name; `None` selects the default device
    pub output_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            period: 1024,
            queue_blocks: 64,
            output_device: None,
        }
    }
}

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifeState {
    Fresh,
    Running,
    Paused,
    Closed,
}

pub struct AudioSystem {
    config: EngineConfig,
    graph: Arc<Graph>,
    master: Arc<MasterCtl>,
    metrics: Arc<Metrics>,
    running: Arc<AtomicBool>,
    /// Set by a worker that hit a programming error; fatal for the system
    failed: Arc<AtomicBool>,
    life: LifeState,
    sink: Option<Box<dyn OutputSink>>,
    scratch: Option<MixerScratch>,
    mixer_handle: Option<JoinHandle<MixerScratch>>,
    pump_handle: Option<JoinHandle<Box<dyn OutputSink>>>,
}

impl AudioSystem {
    /// Open the configured output device and build a system around it
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let sink = DeviceSink::open(&OutputConfig {
            sample_rate: config.sample_rate,
            period: config.period,
            device: config.output_device.clone(),
        })?;
        Ok(Self::with_output(config, Box::new(sink)))
    }

    /// Build a system around any output sink (tests use a capture sink)
    pub fn with_output(config: EngineConfig, sink: Box<dyn OutputSink>) -> Self {
        let scratch = MixerScratch::new(config.period);
        Self {
            config,
            graph: Arc::new(Graph::new()),
            master: Arc::new(MasterCtl::new()),
            metrics: Arc::new(Metrics::new()),
            running: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
            life: LifeState::Fresh,
            sink: Some(sink),
            scratch: Some(scratch),
            mixer_handle: None,
            pump_handle: None,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn period(&self) -> usize {
        self.config.period
    }

    // ─── Lifecycle ─────────────────────────────────────────────────────

    /// Spawn the mixer and pump workers (Fresh or Paused -> Running)
    pub fn start(&mut self) -> EngineResult<()> {
        match self.life {
            LifeState::Closed => return Err(EngineError::Closed),
            LifeState::Running => return Ok(()),
            LifeState::Fresh | LifeState::Paused => {}
        }
        if self.failed.load(Ordering::Acquire) {
            return Err(EngineError::WorkerPanic);
        }

        let scratch = self
            .scratch
            .take()
            .unwrap_or_else(|| MixerScratch::new(self.config.period));
        let sink = self.sink.take().ok_or(EngineError::Closed)?;

        let (tx, rx) =
            RingBuffer::<Sample>::new(self.config.queue_blocks * self.config.period * 2);
        self.running.store(true, Ordering::Release);

        let mixer = Mixer::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.master),
            Arc::clone(&self.metrics),
            scratch,
            self.config.period,
            self.config.sample_rate,
        );
        let running = Arc::clone(&self.running);
        let failed = Arc::clone(&self.failed);
        let mixer_handle = thread::Builder::new()
            .name("mixdown-mixer".to_string())
            .spawn(move || mixer.run(running, failed, tx))
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        let running = Arc::clone(&self.running);
        let metrics = Arc::clone(&self.metrics);
        let period = self.config.period;
        let pump_handle = thread::Builder::new()
            .name("mixdown-output".to_string())
            .spawn(move || run_pump(sink, rx, running, metrics, period));

        let pump_handle = match pump_handle {
            Ok(handle) => handle,
            Err(e) => {
                // Roll the mixer back so the system stays usable.
                self.running.store(false, Ordering::Release);
                if let Ok(scratch) = mixer_handle.join() {
                    self.scratch = Some(scratch);
                }
                return Err(EngineError::Spawn(e.to_string()));
            }
        };

        self.mixer_handle = Some(mixer_handle);
        self.pump_handle = Some(pump_handle);
        self.life = LifeState::Running;
        Ok(())
    }

    /// Clear the running flag and wait for both workers to drain and exit
    /// (Running -> Paused)
    pub fn stop(&mut self) -> EngineResult<()> {
        match self.life {
            LifeState::Closed => return Err(EngineError::Closed),
            LifeState::Fresh | LifeState::Paused => return Ok(()),
            LifeState::Running => {}
        }

        self.running.store(false, Ordering::Release);
        let mut panicked = false;

        if let Some(handle) = self.mixer_handle.take() {
            match handle.join() {
                Ok(scratch) => self.scratch = Some(scratch),
                Err(_) => panicked = true,
            }
        }
        if let Some(handle) = self.pump_handle.take() {
            match handle.join() {
                Ok(sink) => self.sink = Some(sink),
                Err(_) => panicked = true,
            }
        }

        if panicked || self.failed.load(Ordering::Acquire) {
            // A dead worker is fatal: release the device, terminal state.
            self.sink = None;
            self.life = LifeState::Closed;
            return Err(EngineError::WorkerPanic);
        }

        self.life = LifeState::Paused;
        Ok(())
    }

    /// Stop if needed, release the device, and enter the terminal state
    pub fn close(&mut self) -> EngineResult<()> {
        if self.life == LifeState::Closed {
            return Ok(());
        }
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.mixer_handle.take() {
            if let Ok(scratch) = handle.join() {
                self.scratch = Some(scratch);
            }
        }
        if let Some(handle) = self.pump_handle.take() {
            let _ = handle.join();
        }
        self.sink = None;
        self.life = LifeState::Closed;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.life == LifeState::Running && self.running.load(Ordering::Acquire)
    }

    // ─── Graph ─────────────────────────────────────────────────────────

    pub fn create_group(&self, id: &str) -> Arc<Group> {
        Group::new(id, self.config.sample_rate)
    }

    pub fn create_bus(&self, id: &str) -> Arc<Bus> {
        Bus::new(id, self.config.sample_rate)
    }

    /// Attach a bus as a main bus
    pub fn add_bus(&self, bus: Arc<Bus>) {
        self.graph.buses.lock().push(bus);
    }

    /// Register a bus in the aux registry under its identifier
    pub fn add_aux_bus(&self, bus: Arc<Bus>) {
        self.graph.aux.lock().insert(bus.id().to_string(), bus);
    }

    pub fn remove_bus(&self, id: &str) -> bool {
        let mut buses = self.graph.buses.lock();
        let before = buses.len();
        buses.retain(|b| b.id() != id);
        buses.len() != before
    }

    pub fn remove_aux_bus(&self, id: &str) -> bool {
        self.graph.aux.lock().remove(id).is_some()
    }

    pub fn add_to_bus(&self, bus_id: &str, group: Arc<Group>) -> EngineResult<()> {
        let bus = self
            .graph
            .find_bus(bus_id)
            .ok_or_else(|| EngineError::NoSuchNode(bus_id.to_string()))?;
        bus.add_group(group);
        Ok(())
    }

    /// Append a source to a group. Sources whose native rate differs from
    /// the engine rate are refused: rate conversion is not part of the
    /// engine, so a mismatch is a configuration error.
    pub fn add_to_group(&self, group_id: &str, source: Arc<dyn Source>) -> EngineResult<()> {
        if source.sample_rate() != self.config.sample_rate {
            return Err(EngineError::SampleRateMismatch {
                source_rate: source.sample_rate(),
                engine_rate: self.config.sample_rate,
            });
        }
        let group = self
            .graph
            .find_group(group_id)
            .ok_or_else(|| EngineError::NoSuchNode(group_id.to_string()))?;
        group.add_source(source);
        Ok(())
    }

    pub fn remove_group(&self, group_id: &str) -> bool {
        let buses: Vec<Arc<Bus>> = self.graph.buses.lock().clone();
        buses.iter().any(|bus| bus.remove_group(group_id))
    }

    pub fn remove_from_group(&self, group_id: &str, source_id: &str) -> EngineResult<bool> {
        let group = self
            .graph
            .find_group(group_id)
            .ok_or_else(|| EngineError::NoSuchNode(group_id.to_string()))?;
        Ok(group.remove_source(source_id))
    }

    // ─── Sends ─────────────────────────────────────────────────────────

    /// Route a bus's post-effect signal into an aux bus at `level`
    pub fn add_send(&self, bus_id: &str, aux_id: &str, level: f32) -> EngineResult<()> {
        let bus = self
            .graph
            .find_bus(bus_id)
            .ok_or_else(|| EngineError::NoSuchNode(bus_id.to_string()))?;
        if self.graph.find_aux(aux_id).is_none() {
            return Err(EngineError::NoSuchNode(aux_id.to_string()));
        }
        bus.set_send(aux_id, level);
        Ok(())
    }

    pub fn remove_send(&self, bus_id: &str, aux_id: &str) -> EngineResult<bool> {
        let bus = self
            .graph
            .find_bus(bus_id)
            .ok_or_else(|| EngineError::NoSuchNode(bus_id.to_string()))?;
        Ok(bus.remove_send(aux_id))
    }

    // ─── Flags and effects ─────────────────────────────────────────────

    pub fn set_solo(&self, node_id: &str, solo: bool) -> EngineResult<()> {
        if let Some(bus) = self.graph.find_bus_any(node_id) {
            bus.set_solo(solo);
            return Ok(());
        }
        if let Some(group) = self.graph.find_group(node_id) {
            group.set_solo(solo);
            return Ok(());
        }
        Err(EngineError::NoSuchNode(node_id.to_string()))
    }

    pub fn set_mute(&self, node_id: &str, mute: bool) -> EngineResult<()> {
        if let Some(bus) = self.graph.find_bus_any(node_id) {
            bus.set_mute(mute);
            return Ok(());
        }
        if let Some(group) = self.graph.find_group(node_id) {
            group.set_mute(mute);
            return Ok(());
        }
        Err(EngineError::NoSuchNode(node_id.to_string()))
    }

    /// Append an effect to a bus, aux bus, or group chain
    pub fn add_effect(&self, node_id: &str, effect: Box<dyn Effect>) -> EngineResult<()> {
        if let Some(bus) = self.graph.find_bus_any(node_id) {
            bus.add_effect(effect);
            return Ok(());
        }
        if let Some(group) = self.graph.find_group(node_id) {
            group.add_effect(effect);
            return Ok(());
        }
        Err(EngineError::NoSuchNode(node_id.to_string()))
    }

    pub fn remove_effect(&self, node_id: &str, index: usize) -> EngineResult<()> {
        let removed = if let Some(bus) = self.graph.find_bus_any(node_id) {
            bus.remove_effect(index)
        } else if let Some(group) = self.graph.find_group(node_id) {
            group.remove_effect(index)
        } else {
            return Err(EngineError::NoSuchNode(node_id.to_string()));
        };
        if removed {
            Ok(())
        } else {
            Err(EngineError::NoSuchEffect(node_id.to_string(), index))
        }
    }

    /// Ramp the parameters of the effect at `index` on a node over `fade`
    /// seconds
    pub fn update_effect_params(
        &self,
        node_id: &str,
        index: usize,
        params: &[(&str, f32)],
        fade: f32,
    ) -> EngineResult<()> {
        let update = |effects: &mut Vec<Box<dyn Effect>>| -> bool {
            match effects.get_mut(index) {
                Some(effect) => {
                    effect.update_params(params, fade);
                    true
                }
                None => false,
            }
        };

        let updated = if let Some(bus) = self.graph.find_bus_any(node_id) {
            update(&mut bus.inner().lock().effects)
        } else if let Some(group) = self.graph.find_group(node_id) {
            update(&mut group.inner().lock().effects)
        } else {
            return Err(EngineError::NoSuchNode(node_id.to_string()));
        };
        if updated {
            Ok(())
        } else {
            Err(EngineError::NoSuchEffect(node_id.to_string(), index))
        }
    }

    // ─── Sources ───────────────────────────────────────────────────────

    /// Load a file as a source: fully decoded, or disk-streamed when
    /// `stream` is set
    pub fn load_audio(
        &self,
        path: &str,
        id: &str,
        stream: bool,
    ) -> EngineResult<Arc<dyn Source>> {
        let source: Arc<dyn Source> = if stream {
            Arc::new(StreamedSource::open(path, id, self.config.period)?)
        } else {
            Arc::new(ClipSource::load(path, id)?)
        };
        Ok(source)
    }

    pub fn find_source(&self, id: &str) -> Option<Arc<dyn Source>> {
        self.graph.find_source(id)
    }

    pub fn list_all_sources(&self) -> Vec<Arc<dyn Source>> {
        let mut out = Vec::new();
        let buses: Vec<Arc<Bus>> = self.graph.buses.lock().clone();
        for bus in buses {
            let groups: Vec<Arc<Group>> = bus.inner().lock().groups.clone();
            for group in groups {
                out.extend(group.inner().lock().sources.iter().cloned());
            }
        }
        out
    }

    // ─── Master and observation ────────────────────────────────────────

    /// Master volume, clamped to [0, 2]
    pub fn set_master_volume(&self, volume: f32) {
        self.master.volume.store(volume.clamp(0.0, 2.0));
    }

    pub fn master_volume(&self) -> f32 {
        self.master.volume.load()
    }

    /// Enable or disable the output limiter; threshold clamps into (0, 1]
    pub fn set_limiter(&self, enabled: bool, threshold: f32) {
        self.master
            .limiter_threshold
            .store(threshold.clamp(1e-6, 1.0));
        self.master.limiter_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_handle_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioSystem>();
    }

    #[test]
    fn test_lifecycle_without_start() {
        struct NullSink;
        impl OutputSink for NullSink {
            fn write(&mut self, _block: &[Sample]) -> mx_audio::AudioResult<()> {
                Ok(())
            }
        }

        let mut sys = AudioSystem::with_output(EngineConfig::default(), Box::new(NullSink));
        assert!(!sys.is_running());
        assert!(sys.stop().is_ok());
        assert!(sys.close().is_ok());
        // Closed is terminal.
        assert!(matches!(sys.start(), Err(EngineError::Closed)));
        assert!(sys.close().is_ok());
    }

    #[test]
    fn test_node_lookup_errors() {
        struct NullSink;
        impl OutputSink for NullSink {
            fn write(&mut self, _block: &[Sample]) -> mx_audio::AudioResult<()> {
                Ok(())
            }
        }

        let sys = AudioSystem::with_output(EngineConfig::default(), Box::new(NullSink));
        assert!(matches!(
            sys.set_solo("ghost", true),
            Err(EngineError::NoSuchNode(_))
        ));

        let bus = sys.create_bus("main");
        sys.add_bus(bus);
        // Sends may only target registered aux buses.
        assert!(matches!(
            sys.add_send("main", "rev", 1.0),
            Err(EngineError::NoSuchNode(_))
        ));

        let aux = sys.create_bus("rev");
        sys.add_aux_bus(aux);
        assert!(sys.add_send("main", "rev", 1.0).is_ok());
    }
}
