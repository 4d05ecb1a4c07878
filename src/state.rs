use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use tokio::sync::watch;
use tracing::info;

use crate::arbitration::{self, ArbiterInputs};
use crate::frequency::Frequency;
use crate::input::{self, ControlSeeds, Controls, EventSource, PointerNotes};
use crate::signal::{Lifetime, Signal};
use crate::voice::{AudioDevice, Envelope, Routing, VoiceManager};

/// The mounted keyboard: every stream and the voice manager, wired together
/// and bound to one [`Lifetime`].
pub struct KeyboardState<D> {
    /// Where the shell delivers raw input.
    pub events: EventSource,
    pub controls: Controls,
    pub physical_keys: Signal<BTreeSet<String>>,
    pub pointer: PointerNotes,
    pub midi_keys: Signal<BTreeSet<u8>>,
    /// Union of every input source.
    pub sounding: Signal<BTreeSet<Frequency>>,
    pub voices: Rc<RefCell<VoiceManager<D>>>,
    lifetime: Lifetime,
}

impl<D: AudioDevice + 'static> KeyboardState<D> {
    pub fn mount(seeds: ControlSeeds, device: D, routing: Routing, envelope: Envelope) -> Self {
        let events = EventSource::new();
        let lifetime = Lifetime::new();

        let controls = Controls::new(seeds);
        controls.bind(&events, &lifetime);

        let inputs = ArbiterInputs {
            physical_keys: input::physical_keys(&events, &lifetime),
            octave: controls.octave.signal().clone(),
            pointer: input::pointer_notes(&events, &lifetime),
            midi_keys: input::midi_keys(&events, &lifetime),
            distortion: controls.distortion.clone(),
        };
        let voices = Rc::new(RefCell::new(VoiceManager::new(device, routing, envelope)));
        let sounding = arbitration::bind(&inputs, &voices, &lifetime);

        // master and panner follow the controls, starting from their seeds
        {
            let voices = Rc::clone(&voices);
            lifetime.hold(controls.volume.signal().subscribe(move |volume| {
                let mut voices = voices.borrow_mut();
                let master = voices.routing().master;
                voices.device_mut().set_value(master, *volume as f32);
            }));
        }
        {
            let voices = Rc::clone(&voices);
            lifetime.hold(controls.pan.signal().subscribe(move |pan| {
                let mut voices = voices.borrow_mut();
                let panner = voices.routing().panner;
                voices.device_mut().set_value(panner, *pan as f32);
            }));
        }

        info!(
            octave = seeds.octave,
            volume = seeds.volume,
            pan = seeds.pan,
            "Keyboard mounted"
        );

        Self {
            events,
            controls,
            physical_keys: inputs.physical_keys,
            pointer: inputs.pointer,
            midi_keys: inputs.midi_keys,
            sounding,
            voices,
            lifetime,
        }
    }

    /// Publishes the live voice count to `sender` on every voice change.
    pub fn publish_voice_count(&self, sender: watch::Sender<usize>) {
        let keys = self.voices.borrow().keys().clone();
        self.lifetime.hold(keys.subscribe(move |keys| {
            sender.send_replace(keys.len());
        }));
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub fn is_mounted(&self) -> bool {
        !self.lifetime.is_ended()
    }

    /// Releases the sounding voices and detaches every listener. The release
    /// ramps still play out on the device.
    pub fn unmount(&self) {
        if self.lifetime.is_ended() {
            return;
        }
        // released before the listeners go, so the voice count reaches zero
        self.voices.borrow_mut().stop_all();
        self.lifetime.end();
        info!("Keyboard unmounted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::UiEvent;
    use crate::voice::recording::{routing, RecordingDevice, MASTER, PANNER};

    fn mount() -> KeyboardState<RecordingDevice> {
        KeyboardState::mount(
            ControlSeeds::default(),
            RecordingDevice::new(),
            routing(),
            Envelope::default(),
        )
    }

    #[test]
    fn controls_drive_master_and_panner() {
        let state = mount();
        assert_eq!(state.voices.borrow().device().last_value(MASTER), Some(0.5));
        assert_eq!(state.voices.borrow().device().last_value(PANNER), Some(0.0));

        state.events.emit(UiEvent::VolumeInput("1.5".into()));
        state.events.emit(UiEvent::PanInput("-0.5".into()));
        assert_eq!(state.voices.borrow().device().last_value(MASTER), Some(1.5));
        assert_eq!(state.voices.borrow().device().last_value(PANNER), Some(-0.5));

        // rejected input keeps the last good value
        state.events.emit(UiEvent::VolumeInput("loud".into()));
        state.events.emit(UiEvent::VolumeInput("3".into()));
        assert_eq!(state.controls.volume.get(), 1.5);
    }

    #[test]
    fn voice_count_is_published() {
        let state = mount();
        let (tx, rx) = watch::channel(usize::MAX);
        state.publish_voice_count(tx);
        assert_eq!(*rx.borrow(), 0);

        state.events.emit(UiEvent::KeyDown("a".into()));
        state.events.emit(UiEvent::KeyDown("s".into()));
        assert_eq!(*rx.borrow(), 2);
        state.events.emit(UiEvent::KeyUp("a".into()));
        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn unmount_releases_voices_and_detaches_listeners() {
        let state = mount();
        state.events.emit(UiEvent::KeyDown("a".into()));
        state.events.emit(UiEvent::KeyDown("j".into()));
        assert_eq!(state.voices.borrow().len(), 2);

        state.unmount();
        assert!(!state.is_mounted());
        assert!(state.voices.borrow().is_empty());
        assert_eq!(state.events.listener_count(), 0);

        state.events.emit(UiEvent::KeyDown("d".into()));
        assert!(state.voices.borrow().is_empty());
        assert_eq!(state.voices.borrow().device().oscillators(), 2);

        state.unmount();
    }
}
