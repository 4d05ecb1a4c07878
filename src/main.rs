use std::time::Duration;

use clap::Parser;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use virtual_keyboard::audio::{self, AudioContext};
use virtual_keyboard::config::Config;
use virtual_keyboard::ui::{self, Shell};
use virtual_keyboard::{midi, visual};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    tracing_subscriber::fmt().with_max_level(config.log_level()).init();
    config.validate()?;

    let runtime = tokio::runtime::Runtime::new()?;
    let context = AudioContext::new(config.graph_config());

    let (output_shutdown, shutdown) = oneshot::channel();
    runtime.spawn(audio::run_audio_output(context.graph(), shutdown));

    let (voice_count, voices) = watch::channel(0);
    let (renderer, render_messages) = mpsc::unbounded_channel();
    runtime.spawn(visual::run_renderer(render_messages));
    runtime.spawn(visual::run_sampler(
        context.graph(),
        voices,
        renderer.clone(),
        config.sample_period(),
        config.tail_ticks,
    ));

    let midi = if config.no_midi {
        None
    } else {
        let (notes, midi_notes) = mpsc::unbounded_channel();
        runtime.spawn(midi::run_midi_listener(config.midi_port, notes));
        Some(midi_notes)
    };

    let shell = Shell {
        config,
        runtime: runtime.handle().clone(),
        context,
        voice_count,
        renderer,
        midi,
        output_shutdown: Some(output_shutdown),
    };
    ui::run_ui(shell)?;

    // background listeners see their channels close and wind down
    runtime.shutdown_timeout(Duration::from_secs(1));
    info!("Exited");
    Ok(())
}
