use std::f64::consts::PI;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    StreamConfig,
};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::Error;
use crate::signal::Signal;
use crate::voice::{AudioDevice, NodeId, Routing};

/// Shape parameter of the distortion curve.
pub const DISTORTION_AMOUNT: f64 = 4000.0;

/// Entries in the distortion curve table.
pub const CURVE_LENGTH: usize = 44_100;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

pub const DEFAULT_FFT_SIZE: usize = 4096;

/// Sigmoid transfer curve for the wave shaper, `x` spanning [-1, 1).
pub fn distortion_curve(amount: f64, length: usize) -> Vec<f32> {
    let deg = PI / 180.0;
    (0..length)
        .map(|i| {
            let x = (i as f64 * 2.0) / length as f64 - 1.0;
            (((3.0 + amount) * x * 20.0 * deg) / (PI + amount * x.abs())) as f32
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ParamEvent {
    time: f64,
    value: f32,
    ramp: bool,
}

/// A parameter with scheduled automation.
///
/// `set_value_at_time` holds a value from its time on; a linear ramp moves
/// from the previous event's time and value to its own.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParam {
    value: f32,
    anchor: f64,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    pub fn new(value: f32) -> Self {
        Self {
            value,
            anchor: 0.0,
            events: Vec::new(),
        }
    }

    pub fn set_value(&mut self, value: f32, now: f64) {
        self.value = value;
        self.anchor = now;
        self.events.clear();
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent {
            time,
            value,
            ramp: false,
        });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent {
            time,
            value,
            ramp: true,
        });
    }

    fn insert(&mut self, event: ParamEvent) {
        let at = self
            .events
            .iter()
            .position(|e| e.time > event.time)
            .unwrap_or(self.events.len());
        self.events.insert(at, event);
    }

    pub fn value_at(&self, time: f64) -> f32 {
        let (mut from_time, mut from_value) = (self.anchor, self.value);
        for event in &self.events {
            if event.time <= time {
                from_time = event.time;
                from_value = event.value;
                continue;
            }
            if !event.ramp {
                return from_value;
            }
            let span = event.time - from_time;
            if span <= 0.0 {
                return event.value;
            }
            let progress = ((time - from_time) / span).clamp(0.0, 1.0) as f32;
            return from_value + (event.value - from_value) * progress;
        }
        from_value
    }

    /// Folds events at or before `now` into the base value.
    pub fn advance(&mut self, now: f64) {
        let passed = self.events.iter().take_while(|e| e.time <= now).count();
        if passed == 0 {
            return;
        }
        let last = self.events[passed - 1];
        self.value = last.value;
        self.anchor = last.time;
        self.events.drain(..passed);
    }
}

#[derive(Debug, Clone)]
struct Schedule {
    start: Option<f64>,
    stop: Option<f64>,
}

impl Schedule {
    fn idle() -> Self {
        Self {
            start: None,
            stop: None,
        }
    }

    fn is_playing(&self, time: f64) -> bool {
        self.start.is_some_and(|start| time >= start) && self.stop.map_or(true, |stop| time < stop)
    }

    fn is_finished(&self, now: f64) -> bool {
        self.stop.is_some_and(|stop| stop <= now)
    }
}

#[derive(Debug, Clone)]
struct Oscillator {
    frequency: AudioParam,
    phase: f64,
    schedule: Schedule,
}

#[derive(Debug, Clone)]
struct BufferSource {
    samples: Arc<[f32]>,
    sample_rate: f64,
    position: f64,
    looping: bool,
    schedule: Schedule,
}

impl BufferSource {
    fn next_sample(&mut self, output_rate: f64) -> f32 {
        let len = self.samples.len();
        if len == 0 || (!self.looping && self.position >= len as f64) {
            return 0.0;
        }
        let index = self.position.floor() as usize % len;
        let next = (index + 1) % len;
        let frac = self.position.fract() as f32;
        let sample = self.samples[index] + (self.samples[next] - self.samples[index]) * frac;

        self.position += self.sample_rate / output_rate;
        if self.looping && self.position >= len as f64 {
            self.position -= len as f64;
        }
        sample
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Oscillator(Oscillator),
    Gain(AudioParam),
    WaveShaper(Arc<[f32]>),
    BufferSource(BufferSource),
    /// Mono pass-through; the pan is applied when writing device channels.
    Panner(AudioParam),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    inputs: Vec<NodeId>,
    buffer: Vec<f32>,
    /// Created for a single voice or playback; removed once it goes quiet.
    transient: bool,
    /// Has ever had an input connected.
    fed: bool,
}

impl Node {
    fn new(kind: NodeKind, transient: bool) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            buffer: Vec::new(),
            transient,
            fed: false,
        }
    }

    fn is_finished(&self, now: f64) -> bool {
        match &self.kind {
            NodeKind::Oscillator(osc) => osc.schedule.is_finished(now),
            NodeKind::BufferSource(source) => source.schedule.is_finished(now),
            NodeKind::Gain(_) => self.transient && self.fed && self.inputs.is_empty(),
            _ => false,
        }
    }

    fn process(&mut self, buffer: &mut [f32], first_frame: u64, sample_rate: f64) {
        let time_of = |i: usize| (first_frame + i as u64) as f64 / sample_rate;
        match &mut self.kind {
            NodeKind::Oscillator(osc) => {
                for (i, sample) in buffer.iter_mut().enumerate() {
                    let t = time_of(i);
                    if !osc.schedule.is_playing(t) {
                        *sample = 0.0;
                        continue;
                    }
                    *sample = (osc.phase * 2.0 * PI).sin() as f32;
                    osc.phase = (osc.phase + f64::from(osc.frequency.value_at(t)) / sample_rate) % 1.0;
                }
            }
            NodeKind::Gain(gain) => {
                for (i, sample) in buffer.iter_mut().enumerate() {
                    *sample *= gain.value_at(time_of(i));
                }
            }
            NodeKind::WaveShaper(curve) => {
                for sample in buffer.iter_mut() {
                    *sample = shape(curve, *sample);
                }
            }
            NodeKind::BufferSource(source) => {
                for (i, sample) in buffer.iter_mut().enumerate() {
                    *sample = if source.schedule.is_playing(time_of(i)) {
                        source.next_sample(sample_rate)
                    } else {
                        0.0
                    };
                }
            }
            NodeKind::Panner(_) => {}
        }
    }

    fn advance(&mut self, now: f64) {
        match &mut self.kind {
            NodeKind::Oscillator(osc) => osc.frequency.advance(now),
            NodeKind::Gain(param) | NodeKind::Panner(param) => param.advance(now),
            _ => {}
        }
    }
}

/// Wave-shaper lookup with linear interpolation between table entries.
fn shape(curve: &[f32], x: f32) -> f32 {
    match curve.len() {
        0 => x,
        1 => curve[0],
        len => {
            let position = ((x.clamp(-1.0, 1.0) + 1.0) * 0.5) * (len - 1) as f32;
            let index = position.floor() as usize;
            if index >= len - 1 {
                return curve[len - 1];
            }
            let frac = position - index as f32;
            curve[index] + (curve[index + 1] - curve[index]) * frac
        }
    }
}

/// Keeps the most recent `fft_size` samples of the master output.
#[derive(Debug, Clone)]
pub struct Analyser {
    ring: Vec<f32>,
    write: usize,
}

impl Analyser {
    pub fn new(fft_size: usize) -> Self {
        Self {
            ring: vec![0.0; fft_size.max(2)],
            write: 0,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.ring.len()
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.ring.len() / 2
    }

    fn push(&mut self, sample: f32) {
        self.ring[self.write] = sample;
        self.write = (self.write + 1) % self.ring.len();
    }

    /// Fills `out` with the latest samples, oldest first, as unsigned bytes
    /// centred on 128.
    pub fn byte_time_domain_data(&self, out: &mut [u8]) {
        let size = self.ring.len();
        let count = out.len().min(size);
        let start = (self.write + size - count) % size;
        for (i, byte) in out.iter_mut().take(count).enumerate() {
            let sample = self.ring[(start + i) % size];
            *byte = (128.0 * (1.0 + f64::from(sample))).floor().clamp(0.0, 255.0) as u8;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Suspended,
    Running,
    Closed,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Suspended => write!(f, "suspended"),
            ContextState::Running => write!(f, "running"),
            ContextState::Closed => write!(f, "closed"),
        }
    }
}

/// Settings for the persistent part of the graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphConfig {
    pub fft_size: usize,
    pub volume: f32,
    pub pan: f32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            volume: 0.5,
            pan: 0.0,
        }
    }
}

/// The node graph: voices feed the master gain (directly or through the shared
/// wave shaper), the master feeds the panner and the analyser.
pub struct AudioGraph {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    routing: Routing,
    analyser: Analyser,
    sample_rate: f64,
    frames: u64,
    state: ContextState,
    order: Vec<NodeId>,
    visited: Vec<bool>,
}

pub type SharedGraph = Arc<Mutex<AudioGraph>>;

/// Locks the graph, recovering it if the audio thread panicked mid-render.
pub fn lock_graph(graph: &SharedGraph) -> MutexGuard<'_, AudioGraph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioGraph {
    pub fn new(config: GraphConfig) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            free: Vec::new(),
            routing: Routing {
                master: NodeId(0),
                distortion: NodeId(0),
                panner: NodeId(0),
            },
            analyser: Analyser::new(config.fft_size),
            sample_rate: f64::from(DEFAULT_SAMPLE_RATE),
            frames: 0,
            state: ContextState::Running,
            order: Vec::new(),
            visited: Vec::new(),
        };

        let master = graph.insert(Node::new(NodeKind::Gain(AudioParam::new(config.volume)), false));
        let curve: Arc<[f32]> = distortion_curve(DISTORTION_AMOUNT, CURVE_LENGTH).into();
        let distortion = graph.insert(Node::new(NodeKind::WaveShaper(curve), false));
        let panner = graph.insert(Node::new(NodeKind::Panner(AudioParam::new(config.pan)), false));
        graph.routing = Routing {
            master,
            distortion,
            panner,
        };
        graph.connect(distortion, master);
        graph.connect(master, panner);
        graph
    }

    pub fn routing(&self) -> Routing {
        self.routing
    }

    pub fn analyser(&self) -> &Analyser {
        &self.analyser
    }

    pub fn current_time(&self) -> f64 {
        self.frames as f64 / self.sample_rate
    }

    /// Adopts the device rate. Call before the first render.
    pub fn set_sample_rate(&mut self, rate: u32) {
        let now = self.current_time();
        self.sample_rate = f64::from(rate.max(1));
        self.frames = (now * self.sample_rate).round() as u64;
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn set_state(&mut self, state: ContextState) {
        if self.state != ContextState::Closed {
            self.state = state;
        }
    }

    /// Nodes currently alive, persistent ones included.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn create_oscillator(&mut self, frequency: f64) -> NodeId {
        self.insert(Node::new(
            NodeKind::Oscillator(Oscillator {
                frequency: AudioParam::new(frequency as f32),
                phase: 0.0,
                schedule: Schedule::idle(),
            }),
            true,
        ))
    }

    pub fn create_gain(&mut self, gain: f32) -> NodeId {
        let mut param = AudioParam::new(gain);
        param.anchor = self.current_time();
        self.insert(Node::new(NodeKind::Gain(param), true))
    }

    pub fn create_buffer_source(&mut self, samples: Arc<[f32]>, sample_rate: u32, looping: bool) -> NodeId {
        self.insert(Node::new(
            NodeKind::BufferSource(BufferSource {
                samples,
                sample_rate: f64::from(sample_rate.max(1)),
                position: 0.0,
                looping,
                schedule: Schedule::idle(),
            }),
            true,
        ))
    }

    pub fn connect(&mut self, source: NodeId, destination: NodeId) {
        if !self.contains(source) {
            return;
        }
        if let Some(node) = self.node_mut(destination) {
            if !node.inputs.contains(&source) {
                node.inputs.push(source);
                node.fed = true;
            }
        }
    }

    pub fn set_value(&mut self, id: NodeId, value: f32) {
        let now = self.current_time();
        if let Some(param) = self.param_mut(id) {
            param.set_value(value, now);
        }
    }

    pub fn set_value_at_time(&mut self, id: NodeId, value: f32, time: f64) {
        if let Some(param) = self.param_mut(id) {
            param.set_value_at_time(value, time);
        }
    }

    pub fn linear_ramp_to_value_at_time(&mut self, id: NodeId, value: f32, time: f64) {
        if let Some(param) = self.param_mut(id) {
            param.linear_ramp_to_value_at_time(value, time);
        }
    }

    /// Current value of a node's primary parameter.
    pub fn value(&self, id: NodeId) -> Option<f32> {
        let now = self.current_time();
        match &self.node(id)?.kind {
            NodeKind::Gain(param) | NodeKind::Panner(param) => Some(param.value_at(now)),
            NodeKind::Oscillator(osc) => Some(osc.frequency.value_at(now)),
            _ => None,
        }
    }

    pub fn start(&mut self, id: NodeId, time: f64) {
        if let Some(schedule) = self.schedule_mut(id) {
            schedule.start = Some(time);
        }
    }

    pub fn stop(&mut self, id: NodeId, time: f64) {
        if let Some(schedule) = self.schedule_mut(id) {
            schedule.stop = Some(time);
        }
    }

    /// Renders interleaved frames for the device. A suspended or closed
    /// context outputs silence and its clock stands still.
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        if self.state != ContextState::Running {
            output.fill(0.0);
            return;
        }
        let frames = output.len() / channels;
        self.process_block(frames);

        let panner = self.routing.panner;
        let mono = match self.node_mut(panner) {
            Some(Node {
                kind: NodeKind::Panner(_),
                buffer,
                ..
            }) => std::mem::take(buffer),
            _ => {
                output.fill(0.0);
                return;
            }
        };

        for (i, frame) in output.chunks_mut(channels).enumerate() {
            let sample = mono.get(i).copied().unwrap_or(0.0);
            self.analyser.push(sample);
            let t = (self.frames + i as u64) as f64 / self.sample_rate;
            let (left, right) = equal_power(self.pan_at(t), sample);
            match frame {
                [only] => *only = sample,
                [l, r, rest @ ..] => {
                    *l = left;
                    *r = right;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }
        if let Some(node) = self.node_mut(panner) {
            node.buffer = mono;
        }

        self.frames += frames as u64;
        let now = self.current_time();
        for node in self.nodes.iter_mut().flatten() {
            node.advance(now);
        }
        self.dispose_finished(now);
    }

    fn process_block(&mut self, frames: usize) {
        let size = self.nodes.len();
        self.visited.clear();
        self.visited.resize(size, false);
        let mut order = std::mem::take(&mut self.order);
        order.clear();
        self.collect_order(self.routing.panner, &mut order);

        for &id in &order {
            let Some(node) = self.node_mut(id) else {
                continue;
            };
            let mut buffer = std::mem::take(&mut node.buffer);
            let inputs = std::mem::take(&mut node.inputs);
            buffer.clear();
            buffer.resize(frames, 0.0);
            for input in &inputs {
                if let Some(source) = self.node(*input) {
                    for (out, sample) in buffer.iter_mut().zip(&source.buffer) {
                        *out += sample;
                    }
                }
            }
            let (first_frame, rate) = (self.frames, self.sample_rate);
            if let Some(node) = self.node_mut(id) {
                node.process(&mut buffer, first_frame, rate);
                node.buffer = buffer;
                node.inputs = inputs;
            }
        }
        self.order = order;
    }

    fn pan_at(&self, time: f64) -> f32 {
        match self.node(self.routing.panner) {
            Some(Node {
                kind: NodeKind::Panner(param),
                ..
            }) => param.value_at(time),
            _ => 0.0,
        }
    }

    fn collect_order(&mut self, id: NodeId, order: &mut Vec<NodeId>) {
        if id.0 >= self.visited.len() || self.visited[id.0] {
            return;
        }
        self.visited[id.0] = true;
        let mut next = 0;
        while let Some(input) = self.node(id).and_then(|node| node.inputs.get(next)).copied() {
            self.collect_order(input, order);
            next += 1;
        }
        order.push(id);
    }

    /// Frees every finished node and unhooks it from its consumers. Repeats
    /// until a pass frees nothing, since unhooking can finish a gain whose only
    /// input just went away.
    fn dispose_finished(&mut self, now: f64) {
        loop {
            let mut disposed = 0;
            for (index, slot) in self.nodes.iter_mut().enumerate() {
                if slot.as_ref().is_some_and(|node| node.is_finished(now)) {
                    *slot = None;
                    self.free.push(index);
                    disposed += 1;
                }
            }
            if disposed == 0 {
                return;
            }
            debug!(count = disposed, "disposed finished nodes");
            for index in 0..self.nodes.len() {
                let Some(node) = self.nodes[index].as_mut() else {
                    continue;
                };
                let mut inputs = std::mem::take(&mut node.inputs);
                inputs.retain(|input| self.node(*input).is_some());
                if let Some(node) = self.nodes[index].as_mut() {
                    node.inputs = inputs;
                }
            }
        }
    }

    fn insert(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    fn param_mut(&mut self, id: NodeId) -> Option<&mut AudioParam> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Gain(param) | NodeKind::Panner(param) => Some(param),
            NodeKind::Oscillator(osc) => Some(&mut osc.frequency),
            _ => None,
        }
    }

    fn schedule_mut(&mut self, id: NodeId) -> Option<&mut Schedule> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Oscillator(osc) => Some(&mut osc.schedule),
            NodeKind::BufferSource(source) => Some(&mut source.schedule),
            _ => None,
        }
    }
}

/// Equal-power stereo placement of a mono sample, `pan` in [-1, 1].
fn equal_power(pan: f32, sample: f32) -> (f32, f32) {
    let x = (f64::from(pan.clamp(-1.0, 1.0)) + 1.0) / 2.0;
    let left = (x * PI / 2.0).cos() as f32;
    let right = (x * PI / 2.0).sin() as f32;
    (sample * left, sample * right)
}

/// UI-thread handle to the shared graph.
///
/// Every call locks the graph briefly; the output thread holds the same lock
/// only while rendering one device buffer.
#[derive(Clone)]
pub struct AudioContext {
    graph: SharedGraph,
    routing: Routing,
    state: Signal<ContextState>,
}

impl AudioContext {
    pub fn new(config: GraphConfig) -> Self {
        let graph = AudioGraph::new(config);
        let routing = graph.routing();
        let state = Signal::new(graph.state());
        Self {
            graph: Arc::new(Mutex::new(graph)),
            routing,
            state,
        }
    }

    /// The graph, for the output thread and the analyser sampler.
    pub fn graph(&self) -> SharedGraph {
        Arc::clone(&self.graph)
    }

    pub fn routing(&self) -> Routing {
        self.routing
    }

    /// Context state, re-published on every transition.
    pub fn state(&self) -> &Signal<ContextState> {
        &self.state
    }

    pub fn resume(&self) {
        self.transition(ContextState::Running);
    }

    pub fn suspend(&self) {
        self.transition(ContextState::Suspended);
    }

    pub fn close(&self) {
        self.transition(ContextState::Closed);
    }

    fn transition(&self, state: ContextState) {
        let actual = {
            let mut graph = lock_graph(&self.graph);
            graph.set_state(state);
            graph.state()
        };
        if self.state.set(actual) {
            info!(state = %actual, "audio context state changed");
        }
    }

    pub fn create_buffer_source(&mut self, samples: Arc<[f32]>, sample_rate: u32) -> NodeId {
        lock_graph(&self.graph).create_buffer_source(samples, sample_rate, true)
    }
}

impl AudioDevice for AudioContext {
    fn current_time(&self) -> f64 {
        lock_graph(&self.graph).current_time()
    }

    fn create_oscillator(&mut self, frequency: f64) -> NodeId {
        lock_graph(&self.graph).create_oscillator(frequency)
    }

    fn create_gain(&mut self, gain: f32) -> NodeId {
        lock_graph(&self.graph).create_gain(gain)
    }

    fn set_value(&mut self, node: NodeId, value: f32) {
        lock_graph(&self.graph).set_value(node, value);
    }

    fn set_value_at_time(&mut self, node: NodeId, value: f32, time: f64) {
        lock_graph(&self.graph).set_value_at_time(node, value, time);
    }

    fn linear_ramp_to_value_at_time(&mut self, node: NodeId, value: f32, time: f64) {
        lock_graph(&self.graph).linear_ramp_to_value_at_time(node, value, time);
    }

    fn connect(&mut self, source: NodeId, destination: NodeId) {
        lock_graph(&self.graph).connect(source, destination);
    }

    fn start(&mut self, node: NodeId, time: f64) {
        lock_graph(&self.graph).start(node, time);
    }

    fn stop(&mut self, node: NodeId, time: f64) {
        lock_graph(&self.graph).stop(node, time);
    }
}

/// Plays the graph on the default output device until `shutdown` fires or
/// its sender is dropped.
pub async fn run_audio_output(graph: SharedGraph, shutdown: oneshot::Receiver<()>) {
    let result = tokio::task::spawn_blocking(move || -> Result<(), Error> {
        let stream = open_output_stream(graph)?;

        info!("Starting audio stream...");
        stream.play()?;

        // The stream plays for as long as it is alive.
        let _ = shutdown.blocking_recv();
        info!("Audio stream stopped");
        Ok(())
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Audio output failed: {}", e),
        Err(e) => error!("Audio output task failed: {}", e),
    }
}

fn open_output_stream(graph: SharedGraph) -> Result<cpal::Stream, Error> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(Error::NoOutputDevice)?;
    info!(
        "Default output device found: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported_config = device.default_output_config()?;
    let config = StreamConfig {
        channels: supported_config.channels(),
        sample_rate: supported_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    info!("Audio stream configuration: {:?}", config);

    lock_graph(&graph).set_sample_rate(config.sample_rate.0);
    let channels = usize::from(config.channels);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            lock_graph(&graph).render(data, channels);
        },
        |err| {
            error!("An error occurred on the audio stream: {}", err);
        },
        None,
    )?;
    Ok(stream)
}
