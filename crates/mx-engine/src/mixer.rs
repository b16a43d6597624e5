//! The block mixer
//!
//! Once per period the mixer walks buses -> groups -> sources into four
//! preallocated scratch blocks, applies per-node fades and effect chains,
//! routes sends into aux buses, scales by the master volume, limits, and
//! hands the finished block to the output pump over an SPSC ring.
//!
//! Node mutexes are taken in a fixed order (bus list, bus, group, source;
//! aux map and aux bus only while a main bus is held or alone), so control
//! callers and the mix walk never deadlock. The walk itself performs no
//! heap allocation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mx_core::{AtomicF32, Sample, StereoBlock};
use mx_dsp::{block_peak, hard_clip};
use rtrb::Producer;

use crate::bus::Graph;
use crate::group::GroupState;
use crate::metrics::Metrics;
use crate::source::PlayState;

/// Backoff while the handoff ring is full
const QUEUE_FULL_BACKOFF: Duration = Duration::from_micros(500);

/// Master-stage settings, shared with the control plane
pub(crate) struct MasterCtl {
    pub volume: AtomicF32,
    pub limiter_enabled: AtomicBool,
    pub limiter_threshold: AtomicF32,
}

impl MasterCtl {
    pub fn new() -> Self {
        Self {
            volume: AtomicF32::new(1.0),
            limiter_enabled: AtomicBool::new(false),
            limiter_threshold: AtomicF32::new(1.0),
        }
    }
}

/// The four scratch blocks plus the interleave buffer, allocated once at
/// system construction and reused for every period
pub(crate) struct MixerScratch {
    master: StereoBlock,
    bus: StereoBlock,
    group: StereoBlock,
    aux: StereoBlock,
    interleaved: Vec<Sample>,
}

impl MixerScratch {
    pub fn new(period: usize) -> Self {
        Self {
            master: StereoBlock::new(period),
            bus: StereoBlock::new(period),
            group: StereoBlock::new(period),
            aux: StereoBlock::new(period),
            interleaved: vec![0.0; period * 2],
        }
    }
}

pub(crate) struct Mixer {
    graph: Arc<Graph>,
    master: Arc<MasterCtl>,
    metrics: Arc<Metrics>,
    scratch: MixerScratch,
    period: usize,
    sample_rate: u32,
}

impl Mixer {
    pub fn new(
        graph: Arc<Graph>,
        master: Arc<MasterCtl>,
        metrics: Arc<Metrics>,
        scratch: MixerScratch,
        period: usize,
        sample_rate: u32,
    ) -> Self {
        Self {
            graph,
            master,
            metrics,
            scratch,
            period,
            sample_rate,
        }
    }

    /// Produce one master block into the scratch
    fn mix_once(&mut self) {
        let period = self.period as u64;
        self.scratch.master.clear();

        // Aux nodes advance their fades and effect ramps once per period,
        // independent of how many sends feed them.
        {
            let aux = self.graph.aux.lock();
            for aux_bus in aux.values() {
                let mut state = aux_bus.inner().lock();
                if state.mute {
                    continue;
                }
                state.ramp.advance(period);
                for effect in state.effects.iter_mut() {
                    effect.advance(self.period);
                }
            }
        }

        let buses = self.graph.buses.lock();
        let has_solo_bus = buses.iter().any(|b| b.inner().lock().solo);

        for bus in buses.iter() {
            let mut bus_state = bus.inner().lock();
            if bus_state.mute || (has_solo_bus && !bus_state.solo) {
                continue;
            }

            self.scratch.bus.clear();
            let bus_volume = bus_state.ramp.advance(period);

            let has_solo_group = bus_state.groups.iter().any(|g| g.inner().lock().solo);
            for group in bus_state.groups.iter() {
                let mut group_state = group.inner().lock();
                if group_state.mute || (has_solo_group && !group_state.solo) {
                    continue;
                }

                self.scratch.group.clear();
                let group_volume = group_state.ramp.advance(period);

                let GroupState {
                    sources, effects, ..
                } = &mut *group_state;

                for source in sources.iter() {
                    let mut ctl = source.ctl().lock();
                    if ctl.state != PlayState::Playing {
                        continue;
                    }
                    let source_volume = ctl.advance_block(period);
                    // A fade-out completing this block may have just
                    // paused or stopped the source.
                    if ctl.state == PlayState::Playing {
                        let (left, right) = self.scratch.group.channels_mut();
                        source.render_add(&mut ctl, left, right, source_volume);
                    }
                }

                let (left, right) = self.scratch.group.channels_mut();
                for effect in effects.iter_mut() {
                    effect.advance(self.period);
                    effect.process_block(left, right);
                }

                self.scratch.bus.add_scaled(&self.scratch.group, group_volume);
            }

            {
                let (left, right) = self.scratch.bus.channels_mut();
                for effect in bus_state.effects.iter_mut() {
                    effect.advance(self.period);
                    effect.process_block(left, right);
                }
            }

            // Sends tap the post-effect bus signal, before its dry sum.
            if !bus_state.sends.is_empty() {
                let aux_map = self.graph.aux.lock();
                for (aux_id, level) in bus_state.sends.iter() {
                    let Some(aux_bus) = aux_map.get(aux_id) else {
                        continue;
                    };
                    let mut aux_state = aux_bus.inner().lock();
                    if aux_state.mute {
                        continue;
                    }
                    self.scratch.aux.copy_scaled(&self.scratch.bus, *level);
                    let (left, right) = self.scratch.aux.channels_mut();
                    for effect in aux_state.effects.iter_mut() {
                        effect.process_block(left, right);
                    }
                    let aux_volume = aux_state.ramp.current();
                    self.scratch.master.add_scaled(&self.scratch.aux, aux_volume);
                }
            }

            self.scratch.master.add_scaled(&self.scratch.bus, bus_volume);
        }
        drop(buses);

        self.scratch.master.scale(self.master.volume.load());

        let (left, right) = self.scratch.master.channels_mut();
        let pre_peak = block_peak(left).max(block_peak(right));
        let clipped = pre_peak >= 1.0;

        if self.master.limiter_enabled.load(Ordering::Relaxed) {
            let threshold = self.master.limiter_threshold.load();
            hard_clip(left, threshold);
            hard_clip(right, threshold);
        }

        let (left, right) = self.scratch.master.channels();
        self.metrics.update_block(left, right, clipped);
    }

    /// Worker loop: one block per iteration until the running flag clears.
    /// Returns the scratch so a later `start` reuses the same buffers.
    pub fn run(
        mut self,
        running: Arc<AtomicBool>,
        failed: Arc<AtomicBool>,
        mut tx: Producer<Sample>,
    ) -> MixerScratch {
        let period_secs = self.period as f64 / self.sample_rate as f64;

        while running.load(Ordering::Acquire) {
            let begin = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| self.mix_once()));
            if outcome.is_err() {
                log::error!("mixer worker panicked; shutting the engine down");
                failed.store(true, Ordering::Release);
                running.store(false, Ordering::Release);
                break;
            }

            let cpu = begin.elapsed().as_secs_f64() / period_secs * 100.0;
            self.metrics.set_cpu_usage(cpu as f32);

            self.scratch
                .master
                .interleave_into(&mut self.scratch.interleaved);

            // Bounded handoff: a full ring suspends the mixer until the
            // pump drains it (backpressure).
            'block: for &sample in self.scratch.interleaved.iter() {
                loop {
                    if !running.load(Ordering::Acquire) {
                        break 'block;
                    }
                    match tx.push(sample) {
                        Ok(()) => break,
                        Err(_) => std::thread::sleep(QUEUE_FULL_BACKOFF),
                    }
                }
            }
        }

        self.scratch
    }
}
