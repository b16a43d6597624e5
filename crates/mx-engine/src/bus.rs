//! Buses and the aux-bus registry
//!
//! A bus owns an ordered list of groups plus its own fader, effect chain
//! and solo/mute flags, and maps aux-bus identifiers to send levels. Aux
//! buses are structurally the same type, but live in a separate registry,
//! carry no groups, and are never iterated as main buses. Sends are one-hop:
//! main bus to aux only; send entries on aux buses are ignored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mx_dsp::params::ramp_samples;
use mx_dsp::Effect;
use parking_lot::Mutex;

use crate::fade::VolumeRamp;
use crate::group::Group;

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(1);

/// Mutable node state, serialized by the bus's mutex
pub struct BusState {
    pub groups: Vec<Arc<Group>>,
    pub ramp: VolumeRamp,
    pub effects: Vec<Box<dyn Effect>>,
    /// Ordered (aux id, level in [0, 1]) pairs
    pub sends: Vec<(String, f32)>,
    pub solo: bool,
    pub mute: bool,
}

pub struct Bus {
    id: String,
    sample_rate: u32,
    inner: Mutex<BusState>,
}

impl Bus {
    pub fn new(id: &str, sample_rate: u32) -> Arc<Self> {
        let id = if id.is_empty() {
            format!("bus-{}", NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed))
        } else {
            id.to_string()
        };
        Arc::new(Self {
            id,
            sample_rate,
            inner: Mutex::new(BusState {
                groups: Vec::new(),
                ramp: VolumeRamp::new(1.0),
                effects: Vec::new(),
                sends: Vec::new(),
                solo: false,
                mute: false,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn inner(&self) -> &Mutex<BusState> {
        &self.inner
    }

    pub fn add_group(&self, group: Arc<Group>) {
        self.inner.lock().groups.push(group);
    }

    pub fn remove_group(&self, group_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.groups.len();
        inner.groups.retain(|g| g.id() != group_id);
        inner.groups.len() != before
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

    pub fn remove_effect(&self, index: usize) -> bool {
        let mut inner = self.inner.lock();
        if index < inner.effects.len() {
            inner.effects.remove(index);
            true
        } else {
            false
        }
    }

    /// Set (or replace) the send level into an aux bus, clamped to [0, 1]
    pub fn set_send(&self, aux_id: &str, level: f32) {
        let level = level.clamp(0.0, 1.0);
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.sends.iter_mut().find(|(id, _)| id == aux_id) {
            entry.1 = level;
        } else {
            inner.sends.push((aux_id.to_string(), level));
        }
    }

    pub fn remove_send(&self, aux_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.sends.len();
        inner.sends.retain(|(id, _)| id != aux_id);
        inner.sends.len() != before
    }
}

/// The routing graph: ordered main buses plus the aux registry
pub(crate) struct Graph {
    pub buses: Mutex<Vec<Arc<Bus>>>,
    pub aux: Mutex<HashMap<String, Arc<Bus>>>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            buses: Mutex::new(Vec::new()),
            aux: Mutex::new(HashMap::new()),
        }
    }

    /// Main bus by id
    pub fn find_bus(&self, id: &str) -> Option<Arc<Bus>> {
        self.buses.lock().iter().find(|b| b.id() == id).cloned()
    }

    /// Aux bus by id
    pub fn find_aux(&self, id: &str) -> Option<Arc<Bus>> {
        self.aux.lock().get(id).cloned()
    }

    /// Main or aux bus by id
    pub fn find_bus_any(&self, id: &str) -> Option<Arc<Bus>> {
        self.find_bus(id).or_else(|| self.find_aux(id))
    }

    pub fn find_group(&self, id: &str) -> Option<Arc<Group>> {
        let buses = self.buses.lock();
        for bus in buses.iter() {
            let found = bus
                .inner()
                .lock()
                .groups
                .iter()
                .find(|g| g.id() == id)
                .cloned();
            if found.is_some() {
                return found;
            }
        }
        None
    }

    pub fn find_source(&self, id: &str) -> Option<Arc<dyn crate::source::Source>> {
        let buses = self.buses.lock();
        for bus in buses.iter() {
            let groups: Vec<Arc<Group>> = bus.inner().lock().groups.clone();
            for group in groups {
                let found = group
                    .inner()
                    .lock()
                    .sources
                    .iter()
                    .find(|s| s.id() == id)
                    .cloned();
                if found.is_some() {
                    return found;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_clamps_and_replaces() {
        let bus = Bus::new("b", 44100);
        bus.set_send("rev", 2.0);
        assert_eq!(bus.inner().lock().sends, vec![("rev".to_string(), 1.0)]);
        bus.set_send("rev", 0.25);
        assert_eq!(bus.inner().lock().sends, vec![("rev".to_string(), 0.25)]);
        assert!(bus.remove_send("rev"));
        assert!(!bus.remove_send("rev"));
    }

    #[test]
    fn test_graph_lookup() {
        let graph = Graph::new();
        let bus = Bus::new("main", 44100);
        let group = Group::new("drums", 44100);
        bus.add_group(group);
        graph.buses.lock().push(bus);

        let aux = Bus::new("rev", 44100);
        graph.aux.lock().insert(aux.id().to_string(), aux);

        assert!(graph.find_bus("main").is_some());
        assert!(graph.find_bus("rev").is_none());
        assert!(graph.find_aux("rev").is_some());
        assert!(graph.find_bus_any("rev").is_some());
        assert!(graph.find_group("drums").is_some());
        assert!(graph.find_group("nope").is_none());
    }
}
