//! Looping playback of a user-chosen WAV file through the master gain.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use hound::SampleFormat;
use tokio::runtime::Handle;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{info, warn};

use crate::audio::{AudioContext, ContextState};
use crate::error::{Error, Result};
use crate::input::{EventSource, UiEvent};
use crate::signal::{Lifetime, Signal};
use crate::voice::{AudioDevice, NodeId};

/// A decoded file, mixed down to mono in [-1, 1].
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate.max(1)))
    }
}

pub fn decode_wav(path: &Path) -> Result<DecodedAudio> {
    let decode_error = |e| Error::Decode(path.to_path_buf(), e);
    let mut reader = hound::WavReader::open(path).map_err(decode_error)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(decode_error)?,
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<_, _>>()
                .map_err(decode_error)?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let samples: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    if samples.is_empty() {
        return Err(Error::EmptyAudio(path.to_path_buf()));
    }

    Ok(DecodedAudio {
        samples: samples.into(),
        sample_rate: spec.sample_rate,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackStatus {
    /// No file chosen yet.
    Empty,
    Loading(PathBuf),
    Ready { path: PathBuf, duration: Duration },
    /// The last file could not be decoded; playback stays disabled.
    Unavailable(String),
}

impl PlaybackStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, PlaybackStatus::Ready { .. })
    }
}

/// Decodes files off the UI thread and owns the resulting buffer source.
pub struct Player {
    runtime: Handle,
    status: Signal<PlaybackStatus>,
    pending: Option<(PathBuf, oneshot::Receiver<Result<DecodedAudio>>)>,
    source: Option<NodeId>,
}

impl Player {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            status: Signal::new(PlaybackStatus::Empty),
            pending: None,
            source: None,
        }
    }

    pub fn status(&self) -> &Signal<PlaybackStatus> {
        &self.status
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    /// Starts decoding `path`. A load still in flight is abandoned.
    pub fn load(&mut self, path: PathBuf) {
        info!("Decoding {}", path.display());
        let (tx, rx) = oneshot::channel();
        let target = path.clone();
        self.runtime.spawn_blocking(move || {
            let _ = tx.send(decode_wav(&target));
        });
        self.pending = Some((path.clone(), rx));
        self.status.set(PlaybackStatus::Loading(path));
    }

    /// Picks up a finished decode. On success the old source is stopped and a
    /// new looping source is started into the master gain.
    pub fn poll(&mut self, context: &mut AudioContext) {
        let Some((path, mut rx)) = self.pending.take() else {
            return;
        };
        let decoded = match rx.try_recv() {
            Ok(decoded) => decoded,
            Err(TryRecvError::Empty) => {
                self.pending = Some((path, rx));
                return;
            }
            Err(TryRecvError::Closed) => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "decoder exited without a result",
            ))),
        };

        match decoded {
            Ok(audio) => {
                let now = context.current_time();
                if let Some(previous) = self.source.take() {
                    context.stop(previous, now);
                }
                let duration = audio.duration();
                let source = context.create_buffer_source(audio.samples, audio.sample_rate);
                context.connect(source, context.routing().master);
                context.start(source, now);
                self.source = Some(source);
                info!("Playback ready: {} ({:.1}s)", path.display(), duration.as_secs_f64());
                self.status.set(PlaybackStatus::Ready { path, duration });
            }
            Err(e) => {
                warn!("No playback available: {}", e);
                self.status.set(PlaybackStatus::Unavailable(e.to_string()));
            }
        }
    }

    /// Play/Pause: flips the context between running and suspended.
    pub fn toggle(&self, context: &AudioContext) {
        if !self.status.with(PlaybackStatus::is_ready) {
            return;
        }
        match context.state().get() {
            ContextState::Running => context.suspend(),
            ContextState::Suspended => context.resume(),
            ContextState::Closed => {}
        }
    }
}

/// Routes file selections and Play/Pause clicks from `events` to `player`.
pub fn bind(player: &Rc<RefCell<Player>>, context: &AudioContext, events: &EventSource, lifetime: &Lifetime) {
    let player = Rc::clone(player);
    let context = context.clone();
    lifetime.hold(events.subscribe(move |event| match event {
        UiEvent::FileSelected(path) => player.borrow_mut().load(path.clone()),
        UiEvent::PlayClick => player.borrow().toggle(&context),
        _ => {}
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{lock_graph, GraphConfig};
    use std::io::Write;
    use tempfile::tempdir;

    fn write_stereo_wav(path: &Path, frames: &[(i16, i16)]) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for (left, right) in frames {
            writer.write_sample(*left).unwrap();
            writer.write_sample(*right).unwrap();
        }
        writer.finalize().unwrap();
    }

    async fn settle(player: &mut Player, context: &mut AudioContext) {
        for _ in 0..200 {
            player.poll(context);
            if !matches!(player.status().get(), PlaybackStatus::Loading(_)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("decode did not finish");
    }

    #[test]
    fn decode_mixes_channels_to_mono() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_stereo_wav(&path, &[(16384, 0), (-16384, -16384), (0, 8192)]);

        let audio = decode_wav(&path).unwrap();
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(&*audio.samples, &[0.25, -0.5, 0.125]);
    }

    #[test]
    fn decode_reports_missing_and_corrupt_files() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.wav");
        assert!(matches!(decode_wav(&missing), Err(Error::Decode(..))));

        let corrupt = dir.path().join("corrupt.wav");
        std::fs::File::create(&corrupt)
            .unwrap()
            .write_all(b"definitely not RIFF data")
            .unwrap();
        assert!(matches!(decode_wav(&corrupt), Err(Error::Decode(..))));
    }

    #[test]
    fn decode_rejects_empty_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        write_stereo_wav(&path, &[]);
        assert!(matches!(decode_wav(&path), Err(Error::EmptyAudio(_))));
    }

    #[tokio::test]
    async fn loaded_file_enables_play_pause() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        write_stereo_wav(&path, &[(1000, 1000); 800]);

        let mut context = AudioContext::new(GraphConfig::default());
        let mut player = Player::new(Handle::current());
        player.toggle(&context);
        assert_eq!(context.state().get(), ContextState::Running);

        player.load(path.clone());
        settle(&mut player, &mut context).await;

        match player.status().get() {
            PlaybackStatus::Ready { path: loaded, duration } => {
                assert_eq!(loaded, path);
                assert!((duration.as_secs_f64() - 0.1).abs() < 1e-6);
            }
            other => panic!("unexpected status {:?}", other),
        }
        let source = player.source().unwrap();
        assert!(lock_graph(&context.graph()).contains(source));

        player.toggle(&context);
        assert_eq!(context.state().get(), ContextState::Suspended);
        player.toggle(&context);
        assert_eq!(context.state().get(), ContextState::Running);
    }

    #[tokio::test]
    async fn bound_events_load_and_toggle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        write_stereo_wav(&path, &[(-2000, 2000); 80]);

        let mut context = AudioContext::new(GraphConfig::default());
        let player = Rc::new(RefCell::new(Player::new(Handle::current())));
        let events = EventSource::new();
        let lifetime = Lifetime::new();
        bind(&player, &context, &events, &lifetime);

        events.emit(UiEvent::FileSelected(path));
        settle(&mut player.borrow_mut(), &mut context).await;
        assert!(player.borrow().status().get().is_ready());

        events.emit(UiEvent::PlayClick);
        assert_eq!(context.state().get(), ContextState::Suspended);

        lifetime.end();
        events.emit(UiEvent::PlayClick);
        assert_eq!(context.state().get(), ContextState::Suspended);
    }

    #[tokio::test]
    async fn failed_decode_leaves_playback_unavailable() {
        let dir = tempdir().unwrap();
        let mut context = AudioContext::new(GraphConfig::default());
        let mut player = Player::new(Handle::current());

        player.load(dir.path().join("nope.wav"));
        settle(&mut player, &mut context).await;

        assert!(matches!(player.status().get(), PlaybackStatus::Unavailable(_)));
        assert!(player.source().is_none());
        player.toggle(&context);
        assert_eq!(context.state().get(), ContextState::Running);
    }
}
