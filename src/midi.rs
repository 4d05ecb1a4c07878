use std::time::Duration;

use midir::{Ignore, MidiInput};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frequency::KEY_COUNT;
use crate::keyset::{Action, KeyAction};

/// MIDI note 21 (A0) is key 1.
pub const NOTE_OFFSET: u8 = 20;

pub fn note_to_key(note: u8) -> Option<u8> {
    note.checked_sub(NOTE_OFFSET)
        .filter(|key| (1..=KEY_COUNT).contains(key))
}

/// Note-on/off messages on any channel; note-on with velocity 0 is a release.
pub fn parse_message(message: &[u8]) -> Option<KeyAction<u8>> {
    let &[status, note, velocity, ..] = message else {
        return None;
    };
    let action = match (status & 0xF0, velocity) {
        (0x90, v) if v > 0 => Action::Add,
        (0x80, _) | (0x90, 0) => Action::Delete,
        _ => return None,
    };
    note_to_key(note).map(|key| (action, key))
}

/// Forwards notes from MIDI input `port` until the receiving side hangs up.
pub async fn run_midi_listener(port: usize, notes: mpsc::UnboundedSender<KeyAction<u8>>) {
    let result = tokio::task::spawn_blocking(move || listen(port, notes)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("MIDI listener failed: {}", e),
        Err(e) => error!("MIDI listener task failed: {}", e),
    }
}

fn listen(port: usize, notes: mpsc::UnboundedSender<KeyAction<u8>>) -> Result<()> {
    let mut midi_input = MidiInput::new("Virtual Keyboard Input").map_err(|e| Error::Midi(e.to_string()))?;
    // Clock and active-sensing traffic never carries notes.
    midi_input.ignore(Ignore::All);

    let in_ports = midi_input.ports();
    if in_ports.is_empty() {
        warn!("No MIDI input devices found!");
        return Ok(());
    }

    info!("Available MIDI input ports:");
    for (i, port) in in_ports.iter().enumerate() {
        info!("Port {}: {}", i, midi_input.port_name(port).unwrap_or_else(|_| "Unknown".to_string()));
    }

    let in_port = in_ports
        .get(port)
        .ok_or_else(|| Error::Midi(format!("no input port {} ({} available)", port, in_ports.len())))?;
    info!("Using MIDI input: {}", midi_input.port_name(in_port).unwrap_or_else(|_| "Unknown".to_string()));

    let sender = notes.clone();
    let _conn = midi_input
        .connect(
            in_port,
            "virtual-keyboard",
            move |_, message, _| match parse_message(message) {
                Some((action, key)) => {
                    debug!(?action, key, "MIDI note");
                    let _ = sender.send((action, key));
                }
                None => debug!("Unhandled MIDI message: {:?}", message),
            },
            (),
        )
        .map_err(|e| Error::Midi(e.to_string()))?;

    info!("MIDI listener connected and running");

    // The connection lives as long as `_conn`.
    while !notes.is_closed() {
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("MIDI listener stopped");
    Ok(())
}
