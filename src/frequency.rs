//! Equal-tempered frequencies for an 88-key piano and the black-key layout.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Number of keys on the instrument.
pub const KEY_COUNT: u8 = 88;

/// Key index of A4.
pub const REFERENCE_KEY: u8 = 49;

/// Pitch of the reference key in Hz.
pub const REFERENCE_PITCH: f64 = 440.0;

/// Semitones between octaves.
pub const OCTAVE_SPAN: i32 = 12;

/// Names of the 13 keys shown in the visible window, starting at C.
pub const NOTE_NAMES: [&str; 13] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B", "C",
];

/// Frequency of a 1-based key index.
///
/// `440 * 2^((key - 49) / 12)`, so key 49 is exactly 440 Hz.
pub fn frequency_of(key: i32) -> f64 {
    2f64.powf(f64::from(key - i32::from(REFERENCE_KEY)) / 12.0) * REFERENCE_PITCH
}

/// A pitch in Hz usable as a set/map key.
///
/// Two frequencies are equal when their bit patterns are equal. Every frequency
/// in the program is produced by [`frequency_of`], so the same key always yields
/// the same bits.
#[derive(Debug, Clone, Copy)]
pub struct Frequency(f64);

impl Frequency {
    pub fn new(hz: f64) -> Self {
        Self(hz)
    }

    /// Frequency of a 1-based key index.
    pub fn of_key(key: u8) -> Self {
        Self(frequency_of(i32::from(key)))
    }

    pub fn hz(self) -> f64 {
        self.0
    }
}

impl PartialEq for Frequency {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for Frequency {}

impl Hash for Frequency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl PartialOrd for Frequency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frequency {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} Hz", self.0)
    }
}

/// Absolute key index for an offset within the octave window, if it exists on
/// the instrument.
pub fn key_at(octave: i32, offset: i32) -> Option<u8> {
    let index = offset + octave * OCTAVE_SPAN;
    u8::try_from(index)
        .ok()
        .filter(|key| (1..=KEY_COUNT).contains(key))
}

/// A visible key of the on-screen keyboard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleKey {
    pub index: u8,
    pub frequency: Frequency,
    pub name: &'static str,
    pub black: bool,
}

/// The 88-key layout: every key's frequency and which of them are black.
///
/// Immutable after construction.
#[derive(Debug, Clone)]
pub struct PianoKeys {
    black: BTreeSet<Frequency>,
}

impl PianoKeys {
    pub fn new() -> Self {
        Self {
            black: walk_black_keys(),
        }
    }

    pub fn black_keys(&self) -> &BTreeSet<Frequency> {
        &self.black
    }

    pub fn is_black(&self, frequency: Frequency) -> bool {
        self.black.contains(&frequency)
    }

    /// The 13-key window (C to C) for an octave. Keys past the end of the
    /// instrument are left out.
    pub fn window(&self, octave: i32) -> Vec<VisibleKey> {
        NOTE_NAMES
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                let index = key_at(octave, i as i32 + 4)?;
                let frequency = Frequency::of_key(index);
                Some(VisibleKey {
                    index,
                    frequency,
                    name,
                    black: self.is_black(frequency),
                })
            })
            .collect()
    }
}

impl Default for PianoKeys {
    fn default() -> Self {
        Self::new()
    }
}

/// Walks the keyboard from key 4 (C1) and marks the black keys.
///
/// Black keys on a piano come in groups of two and three separated by pairs of
/// adjacent white keys (E-F and B-C), so the walk tracks the white run, whether
/// the last group had two blacks, and the position inside the 13-step octave.
fn walk_black_keys() -> BTreeSet<Frequency> {
    let mut black = BTreeSet::new();
    // A#0 sits below the first full octave.
    black.insert(Frequency::of_key(2));

    let mut position_in_octave = 1;
    let mut last_group_was_two = false;
    let mut black_run = 0;
    let mut previous_was_white = false;

    let mut index = 4;
    while index <= KEY_COUNT {
        if previous_was_white {
            black.insert(Frequency::of_key(index));
            previous_was_white = false;
            black_run += 1;
        } else {
            previous_was_white = true;
        }

        if (black_run == 2 && !last_group_was_two) || black_run == 3 {
            last_group_was_two = !last_group_was_two;
            black_run = 0;
            // skip the second white of the E-F / B-C pair
            index += 1;
            position_in_octave += 1;
        }

        if position_in_octave == 13 {
            position_in_octave = 1;
            last_group_was_two = false;
            previous_was_white = true;
            black_run = 0;
        }
        position_in_octave += 1;
        index += 1;
    }

    black
}
