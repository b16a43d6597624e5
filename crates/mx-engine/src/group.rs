//! Source groups

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mx_dsp::params::ramp_samples;
use mx_dsp::Effect;
use parking_lot::Mutex;

use crate::fade::VolumeRamp;
use crate::source::Source;

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// Mutable node state, serialized by the group's mutex
pub struct GroupState {
    pub sources: Vec<Arc<dyn Source>>,
    pub ramp: VolumeRamp,
    pub effects: Vec<Box<dyn Effect>>,
    pub solo: bool,
    pub mute: bool,
}

/// An ordered collection of sources sharing a fader, an effect chain and
/// solo/mute flags
pub struct Group {
    id: String,
    sample_rate: u32,
    inner: Mutex<GroupState>,
}

impl Group {
    pub fn new(id: &str, sample_rate: u32) -> Arc<Self> {
        let id = if id.is_empty() {
            format!("grp-{}", NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed))
        } else {
            id.to_string()
        };
        Arc::new(Self {
            id,
            sample_rate,
            inner: Mutex::new(GroupState {
                sources: Vec::new(),
                ramp: VolumeRamp::new(1.0),
                effects: Vec::new(),
                solo: false,
                mute: false,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn inner(&self) -> &Mutex<GroupState> {
        &self.inner
    }

    pub fn add_source(&self, source: Arc<dyn Source>) {
        self.inner.lock().sources.push(source);
    }

    /// Remove a source by identifier; true when something was removed
    pub fn remove_source(&self, source_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.sources.len();
        inner.sources.retain(|s| s.id() != source_id);
        inner.sources.len() != before
    }

    pub fn set_volume(&self, volume: f32, fade_secs: f32) {
        let mut inner = self.inner.lock();
        let samples = ramp_samples(fade_secs, self.sample_rate);
        if samples > 0 {
            inner.ramp.fade_to(volume, samples);
        } else {
            inner.ramp.set(volume);
        }
    }

    pub fn volume(&self) -> f32 {
        self.inner.lock().ramp.current()
    }

    pub fn set_solo(&self, solo: bool) {
        self.inner.lock().solo = solo;
    }

    pub fn set_mute(&self, mute: bool) {
        self.inner.lock().mute = mute;
    }

    pub fn add_effect(&self, effect: Box<dyn Effect>) {
        self.inner.lock().effects.push(effect);
    }

    /// Remove the effect at `index`; true when it existed
    pub fn remove_effect(&self, index: usize) -> bool {
        let mut inner = self.inner.lock();
        if index < inner.effects.len() {
            inner.effects.remove(index);
            true
        } else {
            false
        }
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .sources
            .iter()
            .map(|s| s.id().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::generate_sine_wave;

    #[test]
    fn test_remove_by_id() {
        let group = Group::new("g", 44100);
        let a: Arc<dyn Source> = Arc::new(generate_sine_wave(440.0, 0.01, 44100, 0.5));
        let id = a.id().to_string();
        group.add_source(a);
        group.add_source(Arc::new(generate_sine_wave(220.0, 0.01, 44100, 0.5)));

        assert!(group.remove_source(&id));
        assert!(!group.remove_source(&id));
        assert_eq!(group.source_ids().len(), 1);
    }

    #[test]
    fn test_auto_id() {
        let a = Group::new("", 44100);
        let b = Group::new("", 44100);
        assert!(a.id().starts_with("grp-"));
        assert_ne!(a.id(), b.id());
    }
}
