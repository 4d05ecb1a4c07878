//! Decides which pitches must sound.
//!
//! Each input source contributes a set of frequencies. Their union is the
//! authoritative sounding set; after every change it is diffed against the live
//! voices and the difference is applied. Converging on the diff rather than
//! replaying individual events keeps voices equal to the sounding set no matter
//! how key, pointer and MIDI events interleave.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use tracing::trace;

use crate::frequency::{key_at, Frequency};
use crate::input::{key_offset, PointerNotes};
use crate::signal::{Lifetime, Signal};
use crate::voice::{AudioDevice, VoiceManager};

/// Frequencies for the held letter keys at `octave`. Keys that would fall off
/// the instrument are skipped.
pub fn physical_frequencies(keys: &BTreeSet<String>, octave: i32) -> BTreeSet<Frequency> {
    keys.iter()
        .filter_map(|key| key_offset(key))
        .filter_map(|offset| key_at(octave, offset))
        .map(Frequency::of_key)
        .collect()
}

pub fn midi_frequencies(keys: &BTreeSet<u8>) -> BTreeSet<Frequency> {
    keys.iter().copied().map(Frequency::of_key).collect()
}

/// Union of every source's frequencies.
pub fn sounding_set<'a>(sources: impl IntoIterator<Item = &'a BTreeSet<Frequency>>) -> BTreeSet<Frequency> {
    sources.into_iter().flatten().copied().collect()
}

/// Voices to start and stop to make the live voices match `sounding`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceDiff {
    pub start: Vec<Frequency>,
    pub stop: Vec<Frequency>,
}

impl VoiceDiff {
    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.stop.is_empty()
    }
}

pub fn diff(sounding: &BTreeSet<Frequency>, voices: &BTreeSet<Frequency>) -> VoiceDiff {
    VoiceDiff {
        start: sounding.difference(voices).copied().collect(),
        stop: voices.difference(sounding).copied().collect(),
    }
}

/// Signals feeding the arbiter.
#[derive(Clone)]
pub struct ArbiterInputs {
    pub physical_keys: Signal<BTreeSet<String>>,
    pub octave: Signal<i32>,
    pub pointer: PointerNotes,
    pub midi_keys: Signal<BTreeSet<u8>>,
    pub distortion: Signal<bool>,
}

/// Keeps `voices` in step with the inputs for as long as `lifetime` lasts.
/// Returns the authoritative sounding set.
pub fn bind<D: AudioDevice + 'static>(
    inputs: &ArbiterInputs,
    voices: &Rc<RefCell<VoiceManager<D>>>,
    lifetime: &Lifetime,
) -> Signal<BTreeSet<Frequency>> {
    let physical = Signal::new(BTreeSet::new());
    let midi = Signal::new(BTreeSet::new());
    let sounding = Signal::new(BTreeSet::new());

    // physical keys follow the latest octave, not the one at key-down
    {
        let keys = inputs.physical_keys.clone();
        let octave = inputs.octave.clone();
        let physical = physical.clone();
        let recompute = move || {
            let frequencies = keys.with(|keys| physical_frequencies(keys, octave.get()));
            physical.set(frequencies);
        };
        let on_keys = recompute.clone();
        lifetime.hold(inputs.physical_keys.subscribe_changes(move |_| on_keys()));
        let on_octave = recompute.clone();
        lifetime.hold(inputs.octave.subscribe_changes(move |_| on_octave()));
        recompute();
    }

    {
        let midi = midi.clone();
        lifetime.hold(inputs.midi_keys.subscribe(move |keys| {
            midi.set(midi_frequencies(keys));
        }));
    }

    let recompute = {
        let physical = physical.clone();
        let pointer = inputs.pointer.active.clone();
        let midi = midi.clone();
        let sounding = sounding.clone();
        move || {
            let union = sounding_set([&physical.get(), &pointer.get(), &midi.get()]);
            sounding.set(union);
        }
    };
    for source in [&physical, &inputs.pointer.active, &midi] {
        let recompute = recompute.clone();
        lifetime.hold(source.subscribe_changes(move |_| recompute()));
    }
    recompute();

    let voices = Rc::clone(voices);
    let distortion = inputs.distortion.clone();
    lifetime.hold(sounding.subscribe(move |sounding| {
        let mut voices = voices.borrow_mut();
        let changes = diff(sounding, &voices.frequencies());
        if changes.is_empty() {
            return;
        }
        trace!(start = changes.start.len(), stop = changes.stop.len(), "applying voice diff");
        voices.apply(&changes, distortion.get());
    }));

    sounding
}
