use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::Level;

use crate::audio::GraphConfig;
use crate::error::{Error, Result};
use crate::input::{ControlSeeds, OCTAVE_RANGE, PAN_RANGE, VOLUME_RANGE};
use crate::visual::{DEFAULT_SAMPLE_PERIOD_MS, DEFAULT_TAIL_TICKS};

#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "virtual-keyboard")]
#[command(about = "Play an 88-key piano from the computer keyboard, the mouse or a MIDI device", long_about = None)]
pub struct Config {
    /// Starting octave, 0-7
    #[arg(short, long, default_value = "3")]
    pub octave: i32,

    /// Starting master volume, 0.0-2.0
    #[arg(long, default_value = "0.5")]
    pub volume: f64,

    /// Starting stereo pan, -1.0 (left) to 1.0 (right)
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    pub pan: f64,

    /// MIDI input port index
    #[arg(long, default_value = "0")]
    pub midi_port: usize,

    /// Do not listen for MIDI input
    #[arg(long)]
    pub no_midi: bool,

    /// Analyser window in samples (power of two, 32-32768)
    #[arg(long, default_value = "4096")]
    pub fft_size: usize,

    /// Waveform sampling period in milliseconds
    #[arg(long, default_value_t = DEFAULT_SAMPLE_PERIOD_MS)]
    pub sample_period_ms: u64,

    /// Samples taken after the last note is released
    #[arg(long, default_value_t = DEFAULT_TAIL_TICKS)]
    pub tail_ticks: u32,

    /// WAV file to load for playback at startup
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Log warnings and errors only
    #[arg(short, long)]
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["virtual-keyboard"])
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !(OCTAVE_RANGE.0..=OCTAVE_RANGE.1).contains(&self.octave) {
            return Err(Error::InvalidConfig(format!(
                "octave {} outside {}..={}",
                self.octave, OCTAVE_RANGE.0, OCTAVE_RANGE.1
            )));
        }
        if !(VOLUME_RANGE.0..=VOLUME_RANGE.1).contains(&self.volume) {
            return Err(Error::InvalidConfig(format!(
                "volume {} outside {}..={}",
                self.volume, VOLUME_RANGE.0, VOLUME_RANGE.1
            )));
        }
        if !(PAN_RANGE.0..=PAN_RANGE.1).contains(&self.pan) {
            return Err(Error::InvalidConfig(format!(
                "pan {} outside {}..={}",
                self.pan, PAN_RANGE.0, PAN_RANGE.1
            )));
        }
        if !self.fft_size.is_power_of_two() || !(32..=32768).contains(&self.fft_size) {
            return Err(Error::InvalidConfig(format!(
                "fft size {} must be a power of two between 32 and 32768",
                self.fft_size
            )));
        }
        if self.sample_period_ms == 0 {
            return Err(Error::InvalidConfig("sample period must be at least 1 ms".to_string()));
        }
        Ok(())
    }

    pub fn seeds(&self) -> ControlSeeds {
        ControlSeeds {
            octave: self.octave,
            volume: self.volume,
            pan: self.pan,
        }
    }

    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            fft_size: self.fft_size,
            volume: self.volume as f32,
            pan: self.pan as f32,
        }
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    pub fn log_level(&self) -> Level {
        if self.verbose {
            Level::DEBUG
        } else if self.quiet {
            Level::WARN
        } else {
            Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_seeds() {
        let config = Config::default();
        assert_eq!(config.seeds(), ControlSeeds::default());
        assert_eq!(config.fft_size, 4096);
        assert_eq!(config.sample_period(), Duration::from_millis(10));
        assert_eq!(config.tail_ticks, 50);
        assert_eq!(config.tail_ticks, DEFAULT_TAIL_TICKS);
        assert_eq!(config.sample_period_ms, DEFAULT_SAMPLE_PERIOD_MS);
        assert_eq!(config.log_level(), Level::INFO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_negative_pan_and_flags() {
        let config = Config::parse_from([
            "virtual-keyboard",
            "--pan",
            "-0.25",
            "--octave",
            "5",
            "--no-midi",
            "-v",
        ]);
        assert_eq!(config.pan, -0.25);
        assert_eq!(config.octave, 5);
        assert!(config.no_midi);
        assert_eq!(config.log_level(), Level::DEBUG);
    }

    #[test]
    fn verbose_conflicts_with_quiet() {
        assert!(Config::try_parse_from(["virtual-keyboard", "-v", "-q"]).is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_seeds() {
        let bad = [
            Config {
                octave: 8,
                ..Config::default()
            },
            Config {
                volume: 2.5,
                ..Config::default()
            },
            Config {
                pan: -1.5,
                ..Config::default()
            },
            Config {
                fft_size: 1000,
                ..Config::default()
            },
            Config {
                sample_period_ms: 0,
                ..Config::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
    }
}
