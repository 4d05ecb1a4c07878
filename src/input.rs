//! Input aggregation: turns raw UI events into normalized value streams.
//!
//! The shell pushes [`UiEvent`]s into an [`EventSource`]; everything here
//! subscribes to that source for the lifetime of the mounted keyboard.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::rc::Rc;

use tracing::debug;

use crate::frequency::{Frequency, KEY_COUNT};
use crate::keyset::{Action, KeySetReducer};
use crate::signal::{Lifetime, Signal, Subject};

/// Raw events delivered by the shell.
///
/// Key labels follow browser conventions: letters as typed, arrows as
/// `ArrowUp`/`ArrowDown`/`ArrowLeft`/`ArrowRight`.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    KeyDown(String),
    KeyUp(String),
    /// Committed text of the octave field.
    OctaveChange(String),
    VolumeInput(String),
    PanInput(String),
    DistortionToggle(bool),
    PointerDown(Frequency),
    /// The pointer is over a key (pressed or not).
    PointerMove(Frequency),
    PointerUp,
    PointerLeaveKeyboard,
    /// Note on/off from a MIDI device, as a 1-based key index.
    Midi(Action, u8),
    PlayClick,
    FileSelected(PathBuf),
}

pub type EventSource = Subject<UiEvent>;

/// Letter keys played from the computer keyboard and their offsets inside the
/// octave window (C = 4).
pub const WATCHED_KEYS: [(&str, i32); 13] = [
    ("a", 4),
    ("w", 5),
    ("s", 6),
    ("e", 7),
    ("d", 8),
    ("f", 9),
    ("t", 10),
    ("g", 11),
    ("y", 12),
    ("h", 13),
    ("u", 14),
    ("j", 15),
    ("k", 16),
];

pub fn key_offset(label: &str) -> Option<i32> {
    WATCHED_KEYS
        .iter()
        .find(|(key, _)| *key == label)
        .map(|(_, offset)| *offset)
}

/// A numeric value accepted by a [`RangedControl`].
pub trait ControlValue: Copy + PartialOrd + 'static {
    /// Parses trimmed text input, `None` when it is not a usable number.
    fn parse_input(raw: &str) -> Option<Self>;

    /// `self` moved `direction` steps of `step`.
    fn stepped(self, step: Self, direction: i32) -> Self;

    fn is_number(self) -> bool {
        true
    }
}

impl ControlValue for i32 {
    /// Whole numbers written either way, "4" or "4.0".
    fn parse_input(raw: &str) -> Option<Self> {
        let value = raw.parse::<f64>().ok()?;
        let whole = value.fract() == 0.0 && (f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&value);
        whole.then_some(value as i32)
    }

    fn stepped(self, step: Self, direction: i32) -> Self {
        self.saturating_add(step.saturating_mul(direction))
    }
}

impl ControlValue for f64 {
    fn parse_input(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }

    fn stepped(self, step: Self, direction: i32) -> Self {
        // keep slider resolution so 1.9 + 0.1 lands on 2.0
        ((self + step * f64::from(direction)) * 100.0).round() / 100.0
    }

    fn is_number(self) -> bool {
        !self.is_nan()
    }
}

/// A bounded value with a replaying signal. Out-of-range or unparsable input
/// is dropped and the last good value stays in effect.
#[derive(Clone)]
pub struct RangedControl<T> {
    value: Signal<T>,
    min: T,
    max: T,
    step: T,
}

impl<T: ControlValue> RangedControl<T> {
    pub fn new(seed: T, min: T, max: T, step: T) -> Self {
        Self {
            value: Signal::new(seed),
            min,
            max,
            step,
        }
    }

    pub fn accept(&self, value: T) -> bool {
        if !value.is_number() || value < self.min || value > self.max {
            debug!("control value out of range, ignored");
            return false;
        }
        self.value.set(value)
    }

    pub fn accept_raw(&self, raw: &str) -> bool {
        match T::parse_input(raw.trim()) {
            Some(value) => self.accept(value),
            None => {
                debug!(raw, "control input is not a number, ignored");
                false
            }
        }
    }

    /// Moves the latest value by `direction` steps.
    pub fn nudge(&self, direction: i32) -> bool {
        self.accept(self.value.get().stepped(self.step, direction))
    }

    pub fn get(&self) -> T {
        self.value.get()
    }

    pub fn signal(&self) -> &Signal<T> {
        &self.value
    }
}

pub const OCTAVE_RANGE: (i32, i32) = (0, 7);
pub const VOLUME_RANGE: (f64, f64) = (0.0, 2.0);
pub const PAN_RANGE: (f64, f64) = (-1.0, 1.0);
pub const VOLUME_STEP: f64 = 0.1;

/// Starting values for the controls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSeeds {
    pub octave: i32,
    pub volume: f64,
    pub pan: f64,
}

impl Default for ControlSeeds {
    fn default() -> Self {
        Self {
            octave: 3,
            volume: 0.5,
            pan: 0.0,
        }
    }
}

/// Octave, volume, pan and the distortion switch.
#[derive(Clone)]
pub struct Controls {
    pub octave: RangedControl<i32>,
    pub volume: RangedControl<f64>,
    pub pan: RangedControl<f64>,
    pub distortion: Signal<bool>,
}

impl Controls {
    pub fn new(seeds: ControlSeeds) -> Self {
        Self {
            octave: RangedControl::new(seeds.octave, OCTAVE_RANGE.0, OCTAVE_RANGE.1, 1),
            volume: RangedControl::new(seeds.volume, VOLUME_RANGE.0, VOLUME_RANGE.1, VOLUME_STEP),
            pan: RangedControl::new(seeds.pan, PAN_RANGE.0, PAN_RANGE.1, 0.01),
            distortion: Signal::new(false),
        }
    }

    /// Routes field edits and arrow-key nudges from `events` into the controls.
    pub fn bind(&self, events: &EventSource, lifetime: &Lifetime) {
        let controls = self.clone();
        lifetime.hold(events.subscribe(move |event| match event {
            UiEvent::OctaveChange(raw) => {
                controls.octave.accept_raw(raw);
            }
            UiEvent::VolumeInput(raw) => {
                controls.volume.accept_raw(raw);
            }
            UiEvent::PanInput(raw) => {
                controls.pan.accept_raw(raw);
            }
            UiEvent::DistortionToggle(on) => {
                controls.distortion.set(*on);
            }
            UiEvent::KeyDown(key) => match key.as_str() {
                "ArrowUp" => {
                    controls.octave.nudge(1);
                }
                "ArrowDown" => {
                    controls.octave.nudge(-1);
                }
                "ArrowRight" => {
                    controls.volume.nudge(1);
                }
                "ArrowLeft" => {
                    controls.volume.nudge(-1);
                }
                _ => {}
            },
            _ => {}
        }));
    }
}

/// Letter keys currently held on the computer keyboard.
///
/// Key-downs outside [`WATCHED_KEYS`] are ignored; every key-up is forwarded
/// since deleting an absent key changes nothing.
pub fn physical_keys(events: &EventSource, lifetime: &Lifetime) -> Signal<BTreeSet<String>> {
    let actions = Subject::new();
    let (keys, reduce) = KeySetReducer::new().bind(&actions);
    lifetime.hold(reduce);
    lifetime.hold(events.subscribe(move |event| match event {
        UiEvent::KeyDown(key) => {
            let key = key.to_lowercase();
            if key_offset(&key).is_some() {
                actions.emit((Action::Add, key));
            }
        }
        UiEvent::KeyUp(key) => actions.emit((Action::Delete, key.to_lowercase())),
        _ => {}
    }));
    keys
}

/// Keys held on an external MIDI device.
pub fn midi_keys(events: &EventSource, lifetime: &Lifetime) -> Signal<BTreeSet<u8>> {
    let actions = Subject::new();
    let (keys, reduce) = KeySetReducer::new().bind(&actions);
    lifetime.hold(reduce);
    lifetime.hold(events.subscribe(move |event| {
        if let UiEvent::Midi(action, key) = event {
            if (1..=KEY_COUNT).contains(key) {
                actions.emit((*action, *key));
            }
        }
    }));
    keys
}

/// Tracks the single note played by dragging over the on-screen keys.
///
/// Pressing starts the note under the pointer; moving while pressed switches
/// to the hovered key; releasing or leaving the keyboard stops it.
#[derive(Debug, Default)]
pub struct PointerTracker {
    pressed: bool,
    current: Option<Frequency>,
}

impl PointerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions on the pointer key set caused by `event`.
    pub fn handle(&mut self, event: &UiEvent) -> Vec<(Action, Frequency)> {
        match event {
            UiEvent::PointerDown(frequency) => {
                self.pressed = true;
                self.switch_to(*frequency)
            }
            UiEvent::PointerMove(frequency) if self.pressed => self.switch_to(*frequency),
            UiEvent::PointerUp | UiEvent::PointerLeaveKeyboard => {
                self.pressed = false;
                self.current
                    .take()
                    .map(|previous| vec![(Action::Delete, previous)])
                    .unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }

    pub fn current(&self) -> Option<Frequency> {
        self.current
    }

    fn switch_to(&mut self, frequency: Frequency) -> Vec<(Action, Frequency)> {
        match self.current.replace(frequency) {
            Some(previous) if previous == frequency => Vec::new(),
            Some(previous) => vec![(Action::Delete, previous), (Action::Add, frequency)],
            None => vec![(Action::Add, frequency)],
        }
    }
}

/// Pointer-driven note state.
#[derive(Clone)]
pub struct PointerNotes {
    /// The frequency under the pressed pointer, if any.
    pub note: Signal<Option<Frequency>>,
    /// Pointer frequencies that should sound (at most one).
    pub active: Signal<BTreeSet<Frequency>>,
}

pub fn pointer_notes(events: &EventSource, lifetime: &Lifetime) -> PointerNotes {
    let actions = Subject::new();
    let (active, reduce) = KeySetReducer::quiet_when_idle().bind(&actions);
    lifetime.hold(reduce);

    let note = Signal::new(None);
    let output = note.clone();
    let tracker = Rc::new(RefCell::new(PointerTracker::new()));
    lifetime.hold(events.subscribe(move |event| {
        let (transitions, current) = {
            let mut tracker = tracker.borrow_mut();
            let transitions = tracker.handle(event);
            (transitions, tracker.current())
        };
        if transitions.is_empty() {
            return;
        }
        output.set(current);
        for action in transitions {
            actions.emit(action);
        }
    }));

    PointerNotes { note, active }
}
