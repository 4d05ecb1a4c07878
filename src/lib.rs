//! An 88-key virtual piano: computer keyboard, mouse and MIDI input drive a
//! polyphonic sine synth with optional distortion and a live waveform view.

pub mod arbitration;
pub mod audio;
pub mod config;
pub mod error;
pub mod frequency;
pub mod input;
pub mod keyset;
pub mod midi;
pub mod playback;
pub mod signal;
pub mod state;
pub mod ui;
pub mod visual;
pub mod voice;

pub use error::{Error, Result};
