//! Waveform display: a sampler task reads the analyser on a fixed period and
//! hands each buffer to a renderer thread that draws it onto a shared surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use egui::{pos2, Color32, ColorImage, Pos2};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::audio::{lock_graph, SharedGraph};

pub const DEFAULT_TAIL_TICKS: u32 = 50;
pub const DEFAULT_SAMPLE_PERIOD_MS: u64 = 10;

pub const BACKGROUND: Color32 = Color32::from_rgb(200, 200, 200);
pub const TRACE: Color32 = Color32::BLACK;
pub const LINE_WIDTH: f32 = 2.0;

/// When to sample: continuously while voices sound, then for a fixed number of
/// ticks after the last one stops so the trace settles to a flat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Idle,
    Active,
    Tail(u32),
}

#[derive(Debug, Clone)]
pub struct SamplingCadence {
    state: Cadence,
    tail_ticks: u32,
}

impl SamplingCadence {
    pub fn new(tail_ticks: u32) -> Self {
        Self {
            state: Cadence::Idle,
            tail_ticks,
        }
    }

    pub fn state(&self) -> Cadence {
        self.state
    }

    pub fn is_sampling(&self) -> bool {
        self.state != Cadence::Idle
    }

    pub fn on_voice_count(&mut self, count: usize) {
        self.state = match (count, self.state) {
            (0, Cadence::Active) => Cadence::Tail(self.tail_ticks),
            (0, state) => state,
            _ => Cadence::Active,
        };
    }

    /// Advances one timer tick. Returns whether this tick takes a sample.
    pub fn tick(&mut self) -> bool {
        match self.state {
            Cadence::Idle => false,
            Cadence::Active => true,
            Cadence::Tail(0) => {
                self.state = Cadence::Idle;
                false
            }
            Cadence::Tail(n) => {
                self.state = Cadence::Tail(n - 1);
                true
            }
        }
    }
}

/// Drawing target owned by the renderer. The UI only reads it.
#[derive(Clone)]
pub struct Surface {
    image: Arc<Mutex<ColorImage>>,
    version: Arc<AtomicU64>,
}

impl Surface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            image: Arc::new(Mutex::new(ColorImage::new([width, height], BACKGROUND))),
            version: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn size(&self) -> [usize; 2] {
        self.lock().size
    }

    /// Bumped after every completed frame.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ColorImage {
        self.lock().clone()
    }

    fn draw(&self, samples: &[u8]) {
        draw_trace(&mut self.lock(), samples);
        self.version.fetch_add(1, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, ColorImage> {
        self.image.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Messages for the renderer. The surface is sent once; every sample buffer
/// moves into the channel and is not touched by the sender again.
pub enum RenderMessage {
    Surface(Surface),
    Samples(Box<[u8]>),
}

/// Clears `image` and draws `samples` as a polyline around the vertical centre.
pub fn draw_trace(image: &mut ColorImage, samples: &[u8]) {
    image.pixels.fill(BACKGROUND);
    if samples.is_empty() {
        return;
    }
    let [w, h] = image.size;
    let (width, height) = (w as f32, h as f32);
    let slice = width / samples.len() as f32;

    let mut points: Vec<Pos2> = samples
        .iter()
        .enumerate()
        .map(|(i, byte)| {
            let v = f32::from(*byte) / 128.0;
            pos2(i as f32 * slice, v * height / 2.0)
        })
        .collect();
    points.push(pos2(width, height / 2.0));

    for pair in points.windows(2) {
        stroke_segment(image, pair[0], pair[1], LINE_WIDTH, TRACE);
    }
}

fn stroke_segment(image: &mut ColorImage, from: Pos2, to: Pos2, width: f32, color: Color32) {
    let delta = to - from;
    let steps = delta.x.abs().max(delta.y.abs()).ceil().max(1.0) as usize;
    let half = width / 2.0;
    let [w, h] = image.size;
    for step in 0..=steps {
        let p = from + delta * (step as f32 / steps as f32);
        let x0 = (p.x - half).floor().max(0.0) as usize;
        let y0 = (p.y - half).floor().max(0.0) as usize;
        let x1 = ((p.x + half).floor().max(0.0) as usize).min(w);
        let y1 = ((p.y + half).floor().max(0.0) as usize).min(h);
        for y in y0..y1 {
            for x in x0..x1 {
                image.pixels[y * w + x] = color;
            }
        }
    }
}

fn sample(graph: &SharedGraph) -> Box<[u8]> {
    let graph = lock_graph(graph);
    let analyser = graph.analyser();
    let mut buffer = vec![0u8; analyser.frequency_bin_count()];
    analyser.byte_time_domain_data(&mut buffer);
    buffer.into_boxed_slice()
}

/// Samples the analyser every `period` according to [`SamplingCadence`],
/// driven by the live voice count. Ends when either channel closes.
pub async fn run_sampler(
    graph: SharedGraph,
    mut voices: watch::Receiver<usize>,
    renderer: mpsc::UnboundedSender<RenderMessage>,
    period: Duration,
    tail_ticks: u32,
) {
    let mut cadence = SamplingCadence::new(tail_ticks);
    cadence.on_voice_count(*voices.borrow_and_update());

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = voices.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *voices.borrow_and_update();
                cadence.on_voice_count(count);
                debug!(count, state = ?cadence.state(), "sampler cadence updated");
            }
            _ = ticker.tick(), if cadence.is_sampling() => {
                if !cadence.tick() {
                    continue;
                }
                if renderer.send(RenderMessage::Samples(sample(&graph))).is_err() {
                    break;
                }
            }
        }
    }
    info!("Waveform sampler stopped");
}

/// Draws incoming sample buffers on a dedicated thread until the channel
/// closes. Buffers arriving before the surface are discarded.
pub async fn run_renderer(mut messages: mpsc::UnboundedReceiver<RenderMessage>) {
    let result = tokio::task::spawn_blocking(move || {
        let mut surface: Option<Surface> = None;
        while let Some(message) = messages.blocking_recv() {
            match message {
                RenderMessage::Surface(target) => {
                    info!(size = ?target.size(), "Renderer received drawing surface");
                    surface = Some(target);
                }
                RenderMessage::Samples(samples) => match &surface {
                    Some(surface) => surface.draw(&samples),
                    None => debug!("No surface yet, dropping {} samples", samples.len()),
                },
            }
        }
        info!("Waveform renderer stopped");
    })
    .await;

    if let Err(e) = result {
        error!("Waveform renderer failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioGraph, GraphConfig};

    fn shared_graph(fft_size: usize) -> SharedGraph {
        Arc::new(Mutex::new(AudioGraph::new(GraphConfig {
            fft_size,
            ..GraphConfig::default()
        })))
    }

    #[test]
    fn tail_samples_exactly_the_configured_ticks() {
        let mut cadence = SamplingCadence::new(DEFAULT_TAIL_TICKS);
        assert!(!cadence.tick());

        cadence.on_voice_count(2);
        for _ in 0..500 {
            assert!(cadence.tick());
        }
        cadence.on_voice_count(0);
        let mut samples = 0;
        while cadence.tick() {
            samples += 1;
        }
        assert_eq!(samples, 50);
        assert_eq!(cadence.state(), Cadence::Idle);
        assert!(!cadence.tick());
    }

    #[test]
    fn new_note_during_tail_resumes_sampling() {
        let mut cadence = SamplingCadence::new(3);
        cadence.on_voice_count(1);
        cadence.on_voice_count(0);
        cadence.tick();
        cadence.on_voice_count(1);
        assert_eq!(cadence.state(), Cadence::Active);

        cadence.on_voice_count(0);
        assert_eq!(cadence.state(), Cadence::Tail(3));
        // repeated empty notifications do not restart the tail
        cadence.tick();
        cadence.on_voice_count(0);
        assert_eq!(cadence.state(), Cadence::Tail(2));
    }

    #[test]
    fn flat_signal_draws_centre_line() {
        let mut image = ColorImage::new([40, 20], Color32::RED);
        draw_trace(&mut image, &[128; 16]);

        assert_eq!(image[(0, 0)], BACKGROUND);
        assert_eq!(image[(39, 19)], BACKGROUND);
        for x in [0, 10, 20, 38] {
            assert_eq!(image[(x, 9)], TRACE);
            assert_eq!(image[(x, 10)], TRACE);
            assert_eq!(image[(x, 5)], BACKGROUND);
        }
    }

    #[test]
    fn trace_maps_bytes_to_height() {
        let mut image = ColorImage::new([40, 20], BACKGROUND);
        // full negative swing sits at the top edge
        draw_trace(&mut image, &[0, 0, 0, 0]);
        assert_eq!(image[(1, 0)], TRACE);
        assert_eq!(image[(5, 10)], BACKGROUND);
        // the final segment returns to the centre on the right edge
        assert_eq!(image[(39, 9)], TRACE);
    }

    #[test]
    fn empty_buffer_only_clears() {
        let mut image = ColorImage::new([4, 4], Color32::RED);
        draw_trace(&mut image, &[]);
        assert!(image.pixels.iter().all(|p| *p == BACKGROUND));
    }

    #[tokio::test]
    async fn renderer_draws_after_surface_arrives() {
        let (tx, rx) = mpsc::unbounded_channel();
        let renderer = tokio::spawn(run_renderer(rx));
        let surface = Surface::new(32, 16);

        tx.send(RenderMessage::Samples(vec![128; 8].into_boxed_slice())).unwrap();
        tx.send(RenderMessage::Surface(surface.clone())).unwrap();
        tx.send(RenderMessage::Samples(vec![128; 8].into_boxed_slice())).unwrap();
        drop(tx);
        renderer.await.unwrap();

        assert_eq!(surface.version(), 1);
        assert_eq!(surface.snapshot()[(4, 8)], TRACE);
    }

    #[tokio::test]
    async fn sampler_sends_bin_count_buffers_while_voices_sound() {
        let graph = shared_graph(256);
        let (voices_tx, voices_rx) = watch::channel(1usize);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sampler = tokio::spawn(run_sampler(graph, voices_rx, tx, Duration::from_millis(1), 5));

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match message {
            RenderMessage::Samples(samples) => {
                assert_eq!(samples.len(), 128);
                assert!(samples.iter().all(|b| *b == 128));
            }
            RenderMessage::Surface(_) => panic!("sampler never sends a surface"),
        }

        drop(voices_tx);
        tokio::time::timeout(Duration::from_secs(1), sampler)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn idle_sampler_stays_quiet() {
        let (_voices_tx, voices_rx) = watch::channel(0usize);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sampler = tokio::spawn(run_sampler(shared_graph(64), voices_rx, tx, Duration::from_millis(1), 5));

        let waited = tokio::time::timeout(Duration::from_millis(30), rx.recv()).await;
        assert!(waited.is_err());
        sampler.abort();
    }
}
