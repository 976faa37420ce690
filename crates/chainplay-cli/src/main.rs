//! # chainplay
//!
//! Preview an audio file through a processing chain on the default (or a
//! named) output device, with interactive stop and seek.

mod cli;
mod controls;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chainplay_audio::{
    CpalBackend, DeviceBackend, FileChain, Gain, PlaybackEvent, ProcessingChain, Stage,
    StartRequest, StopReason, TransportController,
};
use chainplay_core::Settings;
use clap::Parser;
use cli::Args;
use controls::{Command, ProgressMeter, HELP};
use crossbeam_channel::{never, select};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chainplay=info,chainplay_audio=info".into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting chainplay v{}", env!("CARGO_PKG_VERSION"));

    let settings_path = match &args.settings {
        Some(path) => path.clone(),
        None => Settings::default_path()?,
    };
    let mut settings = Settings::load(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);
    settings.validate()?;
    if args.save {
        settings.save(&settings_path)?;
        info!("Saved settings to {}", settings_path.display());
    }

    let backend = Arc::new(CpalBackend::new());
    if args.list_devices {
        for name in backend.output_devices()? {
            println!("{name}");
        }
        return Ok(());
    }

    let Some(source) = args.file.clone() else {
        bail!("No file to preview");
    };

    let controller = TransportController::new(settings.playback(), backend)?;
    let chain: Arc<dyn ProcessingChain> = Arc::new(FileChain::new());
    let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(Gain::from_db(settings.gain_db))];
    let request = StartRequest {
        source,
        device: settings.device.clone(),
        channels: settings.channels,
        chain,
        stages,
        start_fraction: args.start,
    };

    controller
        .start(request.clone())
        .with_context(|| format!("Failed to play {}", request.source.display()))?;
    eprintln!("{HELP}");

    run(&controller, &request)?;
    controller.stop();
    Ok(())
}

/// Pump controller events and stdin commands until playback ends or the user
/// quits.
fn run(controller: &TransportController, request: &StartRequest) -> Result<()> {
    let events = controller.events();
    let stdin = controls::spawn_stdin_reader()?;
    let closed = never();
    let mut stdin_open = true;
    let mut meter = ProgressMeter::default();

    loop {
        let commands = if stdin_open { &stdin } else { &closed };
        select! {
            recv(events) -> event => {
                let Ok(event) = event else {
                    return Ok(());
                };
                match event {
                    PlaybackEvent::Progress(progress) => meter.draw(progress),
                    PlaybackEvent::StateChanged(state) => debug!("Transport {state:?}"),
                    PlaybackEvent::Stopped(reason) => {
                        println!();
                        meter.reset();
                        match reason {
                            StopReason::Requested | StopReason::Seek => {
                                debug!("Stopped ({reason})");
                            }
                            StopReason::EndOfSource => {
                                info!("Finished");
                                return Ok(());
                            }
                            other => {
                                warn!("Playback stopped: {other}");
                                return Ok(());
                            }
                        }
                    }
                }
            }
            recv(commands) -> command => {
                let Ok(command) = command else {
                    // stdin closed; keep playing until the source ends.
                    stdin_open = false;
                    continue;
                };
                match command {
                    Command::Quit => return Ok(()),
                    Command::Help => eprintln!("{HELP}"),
                    Command::Stop => controller.stop(),
                    Command::Play => play_from(controller, request, 0.0),
                    Command::Seek(fraction) => {
                        if controller.is_active() {
                            if let Err(e) = controller.seek(fraction) {
                                warn!("Seek failed: {e}");
                            }
                        } else {
                            play_from(controller, request, fraction);
                        }
                    }
                }
            }
        }
    }
}

fn play_from(controller: &TransportController, request: &StartRequest, fraction: f32) {
    if controller.is_active() {
        return;
    }
    let request = StartRequest {
        start_fraction: fraction,
        ..request.clone()
    };
    if let Err(e) = controller.start(request) {
        warn!("Failed to start playback: {e}");
    }
}
