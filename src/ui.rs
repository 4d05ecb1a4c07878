use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use eframe::{App, CreationContext};
use egui::{
    pos2, vec2, Align2, CentralPanel, Color32, Context, FontId, Key, Pos2, Rect, RichText, Sense,
    Stroke, TextureHandle, TextureOptions, TopBottomPanel,
};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::audio::{AudioContext, ContextState};
use crate::config::Config;
use crate::frequency::{Frequency, PianoKeys, VisibleKey};
use crate::input::{EventSource, UiEvent};
use crate::keyset::KeyAction;
use crate::playback::{self, PlaybackStatus, Player};
use crate::state::KeyboardState;
use crate::visual::{RenderMessage, Surface};
use crate::voice::Envelope;

const KEYBOARD_HEIGHT: f32 = 180.0;
const SURFACE_SIZE: [usize; 2] = [640, 160];
const BLACK_KEY_WIDTH: f32 = 0.6;
const BLACK_KEY_HEIGHT: f32 = 0.62;

const WHITE_KEY: Color32 = Color32::from_rgb(250, 250, 245);
const BLACK_KEY: Color32 = Color32::from_rgb(30, 30, 30);
const PRESSED_KEY: Color32 = Color32::from_rgb(120, 170, 230);

/// Handles the window needs from the rest of the program.
pub struct Shell {
    pub config: Config,
    pub runtime: Handle,
    pub context: AudioContext,
    pub voice_count: watch::Sender<usize>,
    pub renderer: mpsc::UnboundedSender<RenderMessage>,
    pub midi: Option<mpsc::UnboundedReceiver<KeyAction<u8>>>,
    pub output_shutdown: Option<oneshot::Sender<()>>,
}

/// The piano window.
pub struct KeyboardApp {
    state: KeyboardState<AudioContext>,
    context: AudioContext,
    player: Rc<RefCell<Player>>,
    keys: PianoKeys,
    midi: Option<mpsc::UnboundedReceiver<KeyAction<u8>>>,
    renderer: Option<mpsc::UnboundedSender<RenderMessage>>,
    surface: Surface,
    texture: Option<TextureHandle>,
    texture_version: u64,
    octave_text: String,
    file_text: String,
    hovered: Option<Frequency>,
    output_shutdown: Option<oneshot::Sender<()>>,
}

impl KeyboardApp {
    pub fn new(shell: Shell) -> Self {
        let Shell {
            config,
            runtime,
            context,
            voice_count,
            renderer,
            midi,
            output_shutdown,
        } = shell;

        let state = KeyboardState::mount(
            config.seeds(),
            context.clone(),
            context.routing(),
            Envelope::default(),
        );
        state.publish_voice_count(voice_count);

        let player = Rc::new(RefCell::new(Player::new(runtime)));
        playback::bind(&player, &context, &state.events, state.lifetime());

        let file_text = config
            .file
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        if let Some(path) = config.file {
            state.events.emit(UiEvent::FileSelected(path));
        }

        Self {
            octave_text: state.controls.octave.get().to_string(),
            state,
            context,
            player,
            keys: PianoKeys::new(),
            midi,
            renderer: Some(renderer),
            surface: Surface::new(SURFACE_SIZE[0], SURFACE_SIZE[1]),
            texture: None,
            texture_version: 0,
            file_text,
            hovered: None,
            output_shutdown,
        }
    }

    fn emit(&self, event: UiEvent) {
        self.state.events.emit(event);
    }

    fn drain_midi(&mut self) {
        let Some(midi) = self.midi.as_mut() else {
            return;
        };
        let mut notes = Vec::new();
        while let Ok(note) = midi.try_recv() {
            notes.push(note);
        }
        for (action, key) in notes {
            self.emit(UiEvent::Midi(action, key));
        }
    }

    /// Hands the surface to the renderer after the first frame.
    fn send_surface(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            if renderer.send(RenderMessage::Surface(self.surface.clone())).is_err() {
                warn!("Waveform renderer is not running");
            }
        }
    }

    fn refresh_texture(&mut self, ctx: &Context) {
        let version = self.surface.version();
        if self.texture.is_some() && version == self.texture_version {
            return;
        }
        let image = self.surface.snapshot();
        match self.texture.as_mut() {
            Some(texture) => texture.set(image, TextureOptions::LINEAR),
            None => self.texture = Some(ctx.load_texture("waveform", image, TextureOptions::LINEAR)),
        }
        self.texture_version = version;
    }

    fn controls_ui(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Octave");
            let response = ui.add(egui::TextEdit::singleline(&mut self.octave_text).desired_width(32.0));
            if response.lost_focus() {
                self.emit(UiEvent::OctaveChange(self.octave_text.clone()));
            }
            if !response.has_focus() {
                self.octave_text = self.state.controls.octave.get().to_string();
            }

            ui.separator();
            let mut volume = self.state.controls.volume.get();
            let slider = egui::Slider::new(&mut volume, 0.0..=2.0).step_by(0.01).text("Volume");
            if ui.add(slider).changed() {
                self.emit(UiEvent::VolumeInput(volume.to_string()));
            }

            ui.separator();
            let mut pan = self.state.controls.pan.get();
            ui.label(format!("Pan: {}", pan_label(pan)));
            let slider = egui::Slider::new(&mut pan, -1.0..=1.0).step_by(0.01).show_value(false);
            if ui.add(slider).changed() {
                self.emit(UiEvent::PanInput(pan.to_string()));
            }

            ui.separator();
            let mut distortion = self.state.controls.distortion.get();
            if ui.checkbox(&mut distortion, "Distort").changed() {
                self.emit(UiEvent::DistortionToggle(distortion));
            }
        });

        ui.horizontal(|ui| {
            ui.label("File");
            ui.add(egui::TextEdit::singleline(&mut self.file_text).hint_text("path/to/audio.wav"));
            if ui.button("Load").clicked() && !self.file_text.trim().is_empty() {
                self.emit(UiEvent::FileSelected(PathBuf::from(self.file_text.trim())));
            }

            let status = self.player.borrow().status().get();
            match status {
                PlaybackStatus::Empty => {}
                PlaybackStatus::Loading(_) => {
                    ui.spinner();
                }
                PlaybackStatus::Ready { .. } => {
                    let label = match self.context.state().get() {
                        ContextState::Running => "Pause",
                        _ => "Play",
                    };
                    if ui.button(label).clicked() {
                        self.emit(UiEvent::PlayClick);
                    }
                }
                PlaybackStatus::Unavailable(reason) => {
                    ui.label(RichText::new("No playback available").color(Color32::RED))
                        .on_hover_text(reason);
                }
            }
        });

        ui.horizontal(|ui| {
            let freq = self
                .state
                .pointer
                .note
                .get()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "-".to_string());
            ui.label(format!("Freq: {}", freq));
            ui.separator();
            ui.label(format!("Voices: {}", self.state.voices.borrow().len()));
            ui.separator();
            ui.label(format!("Audio: {}", self.context.state().get()));
        });
    }

    fn keyboard_ui(&mut self, ui: &mut egui::Ui) {
        let window = self.keys.window(self.state.controls.octave.get());
        let (response, painter) =
            ui.allocate_painter(vec2(ui.available_width(), KEYBOARD_HEIGHT), Sense::click_and_drag());
        let layout = layout_keys(&window, response.rect);
        let sounding = self.state.voices.borrow().keys().get();

        for (key, rect) in &layout {
            let fill = if sounding.contains(&key.frequency) {
                PRESSED_KEY
            } else if key.black {
                BLACK_KEY
            } else {
                WHITE_KEY
            };
            painter.rect_filled(*rect, 2.0, fill);
            painter.rect_stroke(*rect, 2.0, Stroke::new(1.0, Color32::DARK_GRAY));
            let text_color = if key.black { Color32::WHITE } else { Color32::BLACK };
            painter.text(
                rect.center_bottom() - vec2(0.0, 6.0),
                Align2::CENTER_BOTTOM,
                key.name,
                FontId::proportional(12.0),
                text_color,
            );
        }

        let (hover, pressed, released) = ui.input(|i| {
            (
                i.pointer.hover_pos(),
                i.pointer.primary_pressed(),
                i.pointer.primary_released(),
            )
        });
        let inside = hover.filter(|pos| response.rect.contains(*pos));
        let under = inside.and_then(|pos| key_at_pos(&layout, pos));

        if pressed {
            if let Some(frequency) = under {
                self.emit(UiEvent::PointerDown(frequency));
            }
        }
        if under.is_some() && under != self.hovered {
            if let Some(frequency) = under {
                self.emit(UiEvent::PointerMove(frequency));
            }
        }
        if released {
            self.emit(UiEvent::PointerUp);
        }
        if inside.is_none() && self.hovered.is_some() {
            self.emit(UiEvent::PointerLeaveKeyboard);
        }
        self.hovered = under;
    }
}

impl App for KeyboardApp {
    fn update(&mut self, ctx: &Context, _: &mut eframe::Frame) {
        self.drain_midi();
        self.player.borrow_mut().poll(&mut self.context);
        forward_keys(ctx, &self.state.events);
        self.refresh_texture(ctx);

        TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.heading("Virtual Keyboard");
            self.controls_ui(ui);
        });

        CentralPanel::default().show(ctx, |ui| {
            self.keyboard_ui(ui);
            ui.add_space(8.0);
            if let Some(texture) = &self.texture {
                ui.image((texture.id(), texture.size_vec2()));
            }
        });

        self.send_surface();
        ctx.request_repaint_after(Duration::from_millis(16));
    }
}

impl Drop for KeyboardApp {
    fn drop(&mut self) {
        self.state.unmount();
        self.context.close();
        if let Some(shutdown) = self.output_shutdown.take() {
            let _ = shutdown.send(());
        }
        info!("Window closed");
    }
}

/// Forwards this frame's key events to `events`. While a text field has focus
/// only releases go through, so a key held before the focus change still ends
/// its note.
pub fn forward_keys(ctx: &Context, events: &EventSource) {
    let focused = ctx.wants_keyboard_input();
    let keys: Vec<(Key, bool)> = ctx.input(|i| {
        i.events
            .iter()
            .filter_map(|event| match event {
                egui::Event::Key { key, pressed, .. } => Some((*key, *pressed)),
                _ => None,
            })
            .collect()
    });
    for (key, pressed) in keys {
        if pressed && focused {
            continue;
        }
        let Some(label) = key_label(key) else {
            continue;
        };
        events.emit(if pressed {
            UiEvent::KeyDown(label)
        } else {
            UiEvent::KeyUp(label)
        });
    }
}

/// Key label in browser naming: arrows by name, letters in lower case.
pub fn key_label(key: Key) -> Option<String> {
    let label = match key {
        Key::ArrowUp => "ArrowUp",
        Key::ArrowDown => "ArrowDown",
        Key::ArrowLeft => "ArrowLeft",
        Key::ArrowRight => "ArrowRight",
        other => {
            let name = other.name();
            if name.len() != 1 || !name.chars().all(|c| c.is_ascii_alphabetic()) {
                return None;
            }
            return Some(name.to_lowercase());
        }
    };
    Some(label.to_string())
}

/// "NN% Left", "NN% Right" or "0% Center".
pub fn pan_label(pan: f64) -> String {
    let side = if pan > 0.0 {
        "Right"
    } else if pan < 0.0 {
        "Left"
    } else {
        "Center"
    };
    format!("{}% {}", (pan.abs() * 100.0).floor(), side)
}

/// Places the visible keys inside `rect`: white keys side by side, black keys
/// narrower and shorter over the boundary they sit on. White keys come first
/// so black keys paint on top.
pub fn layout_keys(keys: &[VisibleKey], rect: Rect) -> Vec<(VisibleKey, Rect)> {
    let whites = keys.iter().filter(|k| !k.black).count().max(1);
    let white_width = rect.width() / whites as f32;
    let black_width = white_width * BLACK_KEY_WIDTH;
    let black_height = rect.height() * BLACK_KEY_HEIGHT;

    let mut white_rects = Vec::new();
    let mut black_rects = Vec::new();
    for key in keys {
        let boundary = rect.left() + white_rects.len() as f32 * white_width;
        if key.black {
            let min = pos2(boundary - black_width / 2.0, rect.top());
            black_rects.push((*key, Rect::from_min_size(min, vec2(black_width, black_height))));
        } else {
            let min = pos2(boundary, rect.top());
            white_rects.push((*key, Rect::from_min_size(min, vec2(white_width, rect.height()))));
        }
    }
    white_rects.extend(black_rects);
    white_rects
}

/// The key under `pos`, black keys taking precedence.
pub fn key_at_pos(layout: &[(VisibleKey, Rect)], pos: Pos2) -> Option<Frequency> {
    layout
        .iter()
        .rev()
        .find(|(_, rect)| rect.contains(pos))
        .map(|(key, _)| key.frequency)
}

/// Opens the window and runs it until closed.
pub fn run_ui(shell: Shell) -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([680.0, 520.0]),
        ..Default::default()
    };
    debug!("Opening window");
    eframe::run_native(
        "Virtual Keyboard",
        options,
        Box::new(|_cc: &CreationContext| Ok(Box::new(KeyboardApp::new(shell)))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn octave_layout(octave: i32) -> Vec<(VisibleKey, Rect)> {
        let window = PianoKeys::new().window(octave);
        layout_keys(&window, Rect::from_min_size(Pos2::ZERO, vec2(800.0, 200.0)))
    }

    #[test]
    fn labels_follow_browser_names() {
        assert_eq!(key_label(Key::A).as_deref(), Some("a"));
        assert_eq!(key_label(Key::K).as_deref(), Some("k"));
        assert_eq!(key_label(Key::ArrowUp).as_deref(), Some("ArrowUp"));
        assert_eq!(key_label(Key::ArrowLeft).as_deref(), Some("ArrowLeft"));
        assert_eq!(key_label(Key::Enter), None);
        assert_eq!(key_label(Key::Num1), None);
    }

    #[test]
    fn pan_readout() {
        assert_eq!(pan_label(0.0), "0% Center");
        assert_eq!(pan_label(-1.0), "100% Left");
        assert_eq!(pan_label(0.25), "25% Right");
    }

    #[test]
    fn layout_places_eight_white_and_five_black_keys() {
        let layout = octave_layout(3);
        assert_eq!(layout.len(), 13);
        assert_eq!(layout.iter().filter(|(k, _)| !k.black).count(), 8);
        assert_eq!(layout.iter().filter(|(k, _)| k.black).count(), 5);
        assert!(layout[..8].iter().all(|(k, _)| !k.black));
        assert_eq!(layout[0].0.index, 40);
        assert_eq!(layout[0].1.width(), 100.0);
    }

    #[test]
    fn black_keys_win_hit_tests() {
        let layout = octave_layout(3);
        // low on the boundary between C and D only the white keys reach
        assert_eq!(key_at_pos(&layout, pos2(50.0, 190.0)), Some(Frequency::of_key(40)));
        assert_eq!(key_at_pos(&layout, pos2(100.0, 20.0)), Some(Frequency::of_key(41)));
        assert_eq!(key_at_pos(&layout, pos2(150.0, 190.0)), Some(Frequency::of_key(42)));
        assert_eq!(key_at_pos(&layout, pos2(900.0, 20.0)), None);
    }

    #[test]
    fn top_octave_shows_only_remaining_key() {
        let layout = octave_layout(7);
        assert_eq!(layout.len(), 1);
        assert_eq!(layout[0].0.index, 88);
    }

    fn key_frame(ctx: &Context, text: &mut String, events: &EventSource, input: Vec<egui::Event>) -> bool {
        let raw = egui::RawInput {
            events: input,
            ..Default::default()
        };
        let mut focused = false;
        let _ = ctx.run(raw, |ctx| {
            CentralPanel::default().show(ctx, |ui| {
                let response = ui.add(egui::TextEdit::singleline(&mut *text).id(egui::Id::new("octave")));
                if text.is_empty() {
                    response.request_focus();
                }
            });
            forward_keys(ctx, events);
            focused = ctx.wants_keyboard_input();
        });
        focused
    }

    fn key_event(key: Key, pressed: bool) -> egui::Event {
        egui::Event::Key {
            key,
            physical_key: None,
            pressed,
            repeat: false,
            modifiers: egui::Modifiers::NONE,
        }
    }

    #[test]
    fn release_reaches_keyboard_while_text_field_is_focused() {
        use crate::input::ControlSeeds;
        use crate::voice::recording::{routing, RecordingDevice};

        let state = KeyboardState::mount(
            ControlSeeds::default(),
            RecordingDevice::new(),
            routing(),
            Envelope::default(),
        );
        state.events.emit(UiEvent::KeyDown("a".into()));
        assert_eq!(state.voices.borrow().len(), 1);

        let ctx = Context::default();
        let mut text = String::new();
        assert!(key_frame(&ctx, &mut text, &state.events, Vec::new()));

        // presses stay with the text field
        text.push('3');
        assert!(key_frame(&ctx, &mut text, &state.events, vec![key_event(Key::S, true)]));
        assert_eq!(state.voices.borrow().len(), 1);

        assert!(key_frame(&ctx, &mut text, &state.events, vec![key_event(Key::A, false)]));
        assert!(state.voices.borrow().is_empty());
        assert!(state.physical_keys.get().is_empty());
    }
}
