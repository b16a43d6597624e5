//! Source control contract
//!
//! Both source variants share one control-plane state (`SourceCtl`) behind
//! a per-source mutex, and expose the same frame-producing contract to the
//! mixer. All control operations are O(1): they mutate the state and return;
//! nothing here touches the disk (streamed sources defer decoder moves to
//! the next refill on the mix thread).

use std::sync::atomic::{AtomicU64, Ordering};

use mx_core::Sample;
use mx_dsp::params::ramp_samples;
use parking_lot::Mutex;

use crate::fade::VolumeRamp;

/// Playback state of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
}

/// State transition scheduled for when a fade-out completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterFade {
    Pause,
    Stop,
}

/// Speed multiplier bounds
pub const SPEED_MIN: f32 = 0.1;
pub const SPEED_MAX: f32 = 4.0;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Auto-generate a source identifier when the caller supplies none
pub(crate) fn auto_source_id(supplied: &str) -> String {
    if supplied.is_empty() {
        format!("src-{}", NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    } else {
        supplied.to_string()
    }
}

/// Control-plane state shared by all source variants
#[derive(Debug)]
pub struct SourceCtl {
    pub state: PlayState,
    /// Fractional read position in frames; speed is the per-frame step
    pub cursor: f64,
    pub speed: f32,
    pub ramp: VolumeRamp,
    /// Volume the ramp returns to after a fade-in (set by `set_volume`)
    pub setpoint: f32,
    pub looping: bool,
    pub loop_start: u64,
    pub loop_end: u64,
    pub(crate) after_fade: Option<AfterFade>,
    /// Streamed sources reposition their decoder here on the next refill
    pub(crate) pending_seek: Option<u64>,
    pub sample_rate: u32,
}

impl SourceCtl {
    pub(crate) fn new(sample_rate: u32, length: u64) -> Self {
        Self {
            state: PlayState::Stopped,
            cursor: 0.0,
            speed: 1.0,
            ramp: VolumeRamp::new(1.0),
            setpoint: 1.0,
            looping: false,
            loop_start: 0,
            loop_end: length,
            after_fade: None,
            pending_seek: None,
            sample_rate,
        }
    }

    /// Advance the fade by one period and resolve a completed fade-out's
    /// deferred transition. Returns the volume to use for this block.
    pub(crate) fn advance_block(&mut self, period: u64) -> f32 {
        let volume = self.ramp.advance(period);
        if !self.ramp.is_fading() {
            if let Some(action) = self.after_fade.take() {
                match action {
                    AfterFade::Pause => self.state = PlayState::Paused,
                    AfterFade::Stop => {
                        self.state = PlayState::Stopped;
                        self.cursor = self.loop_start as f64;
                        self.pending_seek = Some(self.loop_start);
                    }
                }
            }
        }
        volume
    }

    fn fade_samples(&self, seconds: f32) -> u64 {
        ramp_samples(seconds, self.sample_rate)
    }
}

/// A producer of stereo frames with a uniform control surface.
///
/// The control operations are provided methods over [`SourceCtl`]; variants
/// only implement identification, the frame pull, and (for streamed
/// sources) whatever bookkeeping a cursor move needs beyond the shared
/// state.
pub trait Source: Send + Sync {
    fn id(&self) -> &str;

    fn ctl(&self) -> &Mutex<SourceCtl>;

    /// Native rate of the decoded signal; must equal the engine rate
    fn sample_rate(&self) -> u32;

    /// Total frames, when known (streams without a declared length return
    /// `None`)
    fn length(&self) -> Option<u64>;

    /// Mix one block into `left`/`right` at `gain`, advancing the cursor
    /// by `frames * speed`. Called by the mixer with the ctl lock held and
    /// `state == Playing`.
    fn render_add(
        &self,
        ctl: &mut SourceCtl,
        left: &mut [Sample],
        right: &mut [Sample],
        gain: f32,
    );

    /// Start from the loop start offset, optionally fading in
    fn play(&self, fade_in: f32) {
        let mut ctl = self.ctl().lock();
        ctl.cursor = ctl.loop_start as f64;
        ctl.pending_seek = Some(ctl.loop_start);
        ctl.after_fade = None;
        ctl.state = PlayState::Playing;
        let samples = ctl.fade_samples(fade_in);
        let target = ctl.setpoint;
        if samples > 0 {
            ctl.ramp.fade_from_zero(target, samples);
        } else {
            ctl.ramp.set(target);
        }
    }

    /// Pause, optionally fading out first (the cursor is preserved)
    fn pause(&self, fade_out: f32) {
        let mut ctl = self.ctl().lock();
        if ctl.state != PlayState::Playing {
            return;
        }
        let samples = ctl.fade_samples(fade_out);
        if samples == 0 {
            ctl.state = PlayState::Paused;
        } else {
            ctl.ramp.fade_to(0.0, samples);
            ctl.after_fade = Some(AfterFade::Pause);
        }
    }

    /// Resume from the current cursor, optionally fading in
    fn resume(&self, fade_in: f32) {
        let mut ctl = self.ctl().lock();
        ctl.after_fade = None;
        ctl.state = PlayState::Playing;
        let samples = ctl.fade_samples(fade_in);
        let target = ctl.setpoint;
        if samples > 0 {
            ctl.ramp.fade_from_zero(target, samples);
        } else {
            ctl.ramp.set(target);
        }
    }

    /// Stop and rewind to the loop start, optionally fading out first
    fn stop(&self, fade_out: f32) {
        let mut ctl = self.ctl().lock();
        if ctl.state == PlayState::Stopped {
            return;
        }
        let samples = ctl.fade_samples(fade_out);
        if samples == 0 || ctl.state == PlayState::Paused {
            ctl.state = PlayState::Stopped;
            ctl.cursor = ctl.loop_start as f64;
            ctl.pending_seek = Some(ctl.loop_start);
            let target = ctl.setpoint;
            ctl.ramp.set(target);
        } else {
            ctl.ramp.fade_to(0.0, samples);
            ctl.after_fade = Some(AfterFade::Stop);
        }
    }

    /// Move the cursor to `frame`, clamped to the loop window. Streamed
    /// sources invalidate their ring and reposition the decoder on the next
    /// mix period.
    fn seek(&self, frame: u64) {
        let mut ctl = self.ctl().lock();
        let clamped = frame.clamp(ctl.loop_start, ctl.loop_end);
        ctl.cursor = clamped as f64;
        ctl.pending_seek = Some(clamped);
    }

    fn set_speed(&self, speed: f32) {
        self.ctl().lock().speed = speed.clamp(SPEED_MIN, SPEED_MAX);
    }

    /// Set the volume, optionally ramping over `fade` seconds
    fn set_volume(&self, volume: f32, fade: f32) {
        let mut ctl = self.ctl().lock();
        ctl.setpoint = volume.clamp(0.0, crate::fade::VOLUME_MAX);
        let samples = ctl.fade_samples(fade);
        let target = ctl.setpoint;
        if samples > 0 {
            ctl.ramp.fade_to(target, samples);
        } else {
            ctl.ramp.set(target);
        }
    }

    /// Configure looping; `end` defaults to the source length
    fn set_loop(&self, looping: bool, start: u64, end: Option<u64>) {
        let length = self.length().unwrap_or(u64::MAX);
        let mut ctl = self.ctl().lock();
        ctl.looping = looping;
        ctl.loop_start = start.min(length);
        ctl.loop_end = end.unwrap_or(length).clamp(ctl.loop_start, length);
    }

    /// Ramp from silence up to the volume setpoint
    fn fade_in(&self, seconds: f32) {
        let mut ctl = self.ctl().lock();
        let samples = ctl.fade_samples(seconds);
        let target = ctl.setpoint;
        if samples > 0 {
            ctl.ramp.fade_from_zero(target, samples);
        } else {
            ctl.ramp.set(target);
        }
    }

    /// Ramp down to silence (state is unchanged)
    fn fade_out(&self, seconds: f32) {
        let mut ctl = self.ctl().lock();
        let samples = ctl.fade_samples(seconds);
        if samples > 0 {
            ctl.ramp.fade_to(0.0, samples);
        } else {
            ctl.ramp.set(0.0);
        }
    }

    /// Back to a stopped, unfaded state; loop config and speed survive
    fn reset(&self) {
        let mut ctl = self.ctl().lock();
        ctl.state = PlayState::Stopped;
        ctl.cursor = ctl.loop_start as f64;
        ctl.pending_seek = Some(ctl.loop_start);
        ctl.after_fade = None;
        let target = ctl.setpoint;
        ctl.ramp.set(target);
    }

    /// Current playback state
    fn state(&self) -> PlayState {
        self.ctl().lock().state
    }
}
