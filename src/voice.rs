//! Voice management: one oscillator and one gain envelope per sounding pitch.
//!
//! The manager only speaks to the audio device through [`AudioDevice`], so it
//! can be driven by the real graph in [`crate::audio`] or by a recorder in
//! tests.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::arbitration::VoiceDiff;
use crate::frequency::Frequency;
use crate::signal::Signal;

/// Handle to a node inside an audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// The scheduling contract of the host audio graph.
///
/// Times are in seconds on the device clock. Parameter calls act on the node's
/// primary parameter: gain for gain nodes, frequency for oscillators, pan for
/// the panner.
pub trait AudioDevice {
    fn current_time(&self) -> f64;
    fn create_oscillator(&mut self, frequency: f64) -> NodeId;
    fn create_gain(&mut self, gain: f32) -> NodeId;
    /// Sets a parameter immediately, dropping pending automation.
    fn set_value(&mut self, node: NodeId, value: f32);
    fn set_value_at_time(&mut self, node: NodeId, value: f32, time: f64);
    fn linear_ramp_to_value_at_time(&mut self, node: NodeId, value: f32, time: f64);
    fn connect(&mut self, source: NodeId, destination: NodeId);
    fn start(&mut self, node: NodeId, time: f64);
    fn stop(&mut self, node: NodeId, time: f64);
}

/// Persistent nodes voices connect into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routing {
    pub master: NodeId,
    pub distortion: NodeId,
    pub panner: NodeId,
}

/// Attack and release ramps applied to every voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f64,
    pub peak: f32,
    pub release: f64,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            attack: 0.1,
            peak: 0.6,
            release: 0.3,
        }
    }
}

/// A sounding note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub oscillator: NodeId,
    pub gain: NodeId,
    pub distorted: bool,
}

pub struct VoiceManager<D> {
    device: D,
    routing: Routing,
    envelope: Envelope,
    voices: BTreeMap<Frequency, Voice>,
    keys: Signal<BTreeSet<Frequency>>,
}

impl<D: AudioDevice> VoiceManager<D> {
    pub fn new(device: D, routing: Routing, envelope: Envelope) -> Self {
        Self {
            device,
            routing,
            envelope,
            voices: BTreeMap::new(),
            keys: Signal::new(BTreeSet::new()),
        }
    }

    /// Starts a voice for `frequency` unless one already exists.
    ///
    /// The voice goes through the shared wave shaper when `distorted` is set;
    /// the routing is fixed for the voice's whole life.
    pub fn start_voice(&mut self, frequency: Frequency, distorted: bool) -> bool {
        if self.voices.contains_key(&frequency) {
            return false;
        }

        let now = self.device.current_time();
        let oscillator = self.device.create_oscillator(frequency.hz());
        let gain = self.device.create_gain(0.0);
        self.device.set_value_at_time(gain, 0.0, now);
        self.device
            .linear_ramp_to_value_at_time(gain, self.envelope.peak, now + self.envelope.attack);

        self.device.connect(oscillator, gain);
        let output = if distorted {
            self.routing.distortion
        } else {
            self.routing.master
        };
        self.device.connect(gain, output);
        self.device.start(oscillator, now);

        debug!(%frequency, distorted, "voice started");
        self.voices.insert(
            frequency,
            Voice {
                oscillator,
                gain,
                distorted,
            },
        );
        self.publish();
        true
    }

    /// Releases the voice for `frequency`, if any.
    ///
    /// The entry leaves the map at once; the nodes fade out over the release
    /// window and are disposed by the graph after their scheduled stop.
    pub fn stop_voice(&mut self, frequency: Frequency) -> bool {
        let Some(voice) = self.voices.remove(&frequency) else {
            return false;
        };

        let end = self.device.current_time() + self.envelope.release;
        self.device.linear_ramp_to_value_at_time(voice.gain, 0.0, end);
        self.device.stop(voice.oscillator, end);

        debug!(%frequency, "voice released");
        self.publish();
        true
    }

    /// Applies an arbitration result: stops first, then starts.
    pub fn apply(&mut self, diff: &VoiceDiff, distorted: bool) {
        for frequency in &diff.stop {
            self.stop_voice(*frequency);
        }
        for frequency in &diff.start {
            self.start_voice(*frequency, distorted);
        }
    }

    /// Releases every voice.
    pub fn stop_all(&mut self) {
        let sounding: Vec<Frequency> = self.voices.keys().copied().collect();
        for frequency in sounding {
            self.stop_voice(frequency);
        }
    }

    pub fn contains(&self, frequency: Frequency) -> bool {
        self.voices.contains_key(&frequency)
    }

    pub fn voice(&self, frequency: Frequency) -> Option<&Voice> {
        self.voices.get(&frequency)
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn frequencies(&self) -> BTreeSet<Frequency> {
        self.voices.keys().copied().collect()
    }

    /// Sounding frequencies, re-published on every insert and delete.
    pub fn keys(&self) -> &Signal<BTreeSet<Frequency>> {
        &self.keys
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn routing(&self) -> Routing {
        self.routing
    }

    fn publish(&self) {
        self.keys.replace(self.frequencies());
    }
}


#[cfg(test)]
mod tests {
    use super::recording::{routing, Call, RecordingDevice, DISTORTION, MASTER};
    use super::*;

    fn manager() -> VoiceManager<RecordingDevice> {
        VoiceManager::new(RecordingDevice::new(), routing(), Envelope::default())
    }

    #[test]
    fn start_ramps_in_and_connects_to_master() {
        let mut voices = manager();
        voices.device_mut().now = 2.0;
        let c4 = Frequency::of_key(40);

        assert!(voices.start_voice(c4, false));
        let voice = *voices.voice(c4).unwrap();
        let device = voices.device();

        assert!(device
            .calls
            .contains(&Call::Oscillator(voice.oscillator, c4.hz())));
        assert!(device.calls.contains(&Call::SetValueAt(voice.gain, 0.0, 2.0)));
        assert!(device.calls.contains(&Call::RampTo(voice.gain, 0.6, 2.1)));
        assert!(device.calls.contains(&Call::Start(voice.oscillator, 2.0)));
        assert_eq!(device.destinations(voice.oscillator), vec![voice.gain]);
        assert_eq!(device.destinations(voice.gain), vec![MASTER]);
    }

    #[test]
    fn start_is_idempotent() {
        let mut voices = manager();
        let c4 = Frequency::of_key(40);

        assert!(voices.start_voice(c4, false));
        assert!(!voices.start_voice(c4, false));
        assert_eq!(voices.len(), 1);
        assert_eq!(voices.device().oscillators(), 1);
    }

    #[test]
    fn stop_ramps_out_and_schedules_stop() {
        let mut voices = manager();
        let c4 = Frequency::of_key(40);
        voices.start_voice(c4, false);
        let voice = *voices.voice(c4).unwrap();

        voices.device_mut().now = 1.0;
        assert!(voices.stop_voice(c4));
        assert!(!voices.contains(c4));

        let device = voices.device();
        assert!(device.calls.contains(&Call::RampTo(voice.gain, 0.0, 1.3)));
        assert!(device.calls.contains(&Call::Stop(voice.oscillator, 1.3)));
    }

    #[test]
    fn stopping_absent_voice_is_a_no_op() {
        let mut voices = manager();
        let a4 = Frequency::of_key(49);
        assert!(!voices.stop_voice(a4));
        assert!(!voices.stop_voice(a4));
        assert!(voices.device().calls.is_empty());
    }

    #[test]
    fn distortion_is_fixed_at_start() {
        let mut voices = manager();
        let clean = Frequency::of_key(40);
        let dirty = Frequency::of_key(44);

        voices.start_voice(clean, false);
        voices.start_voice(dirty, true);

        let clean_gain = voices.voice(clean).unwrap().gain;
        let dirty_gain = voices.voice(dirty).unwrap().gain;
        assert_eq!(voices.device().destinations(clean_gain), vec![MASTER]);
        assert_eq!(voices.device().destinations(dirty_gain), vec![DISTORTION]);
        assert!(voices.voice(dirty).unwrap().distorted);
    }

    #[test]
    fn restart_during_release_creates_a_second_voice() {
        let mut voices = manager();
        let c4 = Frequency::of_key(40);
        voices.start_voice(c4, false);
        voices.stop_voice(c4);
        voices.start_voice(c4, false);

        assert_eq!(voices.len(), 1);
        assert_eq!(voices.device().oscillators(), 2);
    }

    #[test]
    fn key_view_follows_inserts_and_deletes() {
        let mut voices = manager();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = std::rc::Rc::clone(&seen);
        let _sub = voices
            .keys()
            .subscribe(move |keys| sink.borrow_mut().push(keys.len()));

        voices.start_voice(Frequency::of_key(40), false);
        voices.start_voice(Frequency::of_key(44), false);
        voices.stop_all();

        assert_eq!(*seen.borrow(), vec![0, 1, 2, 1, 0]);
        assert!(voices.is_empty());
    }
}
