/// soul-transition - play a list of files through the gapless engine
///
/// Decoders are simulated: the player drives virtual voices that advance in
/// real time, so transitions, looping and focus handling can be watched in
/// the log without an audio device.
mod commands;
mod config;
mod probe;
mod sim;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Command, HELP};
use config::CliConfig;
use sim::SimBackend;
use soul_transition::{
    AlwaysGranted, LoopingMode, PlaybackError, PlayerEvent, PlayerHandle, Subscription,
};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "soul-transition")]
#[command(about = "Gapless playback through simulated native decoders", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SOUL_TRANSITION_CONFIG")]
    config: Option<PathBuf>,

    /// Looping mode: none, track or playlist
    #[arg(short, long = "loop", value_parser = parse_looping)]
    looping: Option<LoopingMode>,

    /// Start with shuffle enabled
    #[arg(long)]
    shuffle: bool,

    /// Initial volume, 0.0 - 1.0
    #[arg(long)]
    volume: Option<f32>,

    /// Initial speed, 0.0 - 8.0
    #[arg(long)]
    speed: Option<f32>,

    /// Files to play in order
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn parse_looping(value: &str) -> std::result::Result<LoopingMode, String> {
    value.parse().map_err(|e: PlaybackError| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(mode) = cli.looping {
        config.player.looping_mode = mode;
    }
    if cli.shuffle {
        config.player.shuffle = true;
    }
    if let Some(volume) = cli.volume {
        config.player.initial_settings.volume = volume;
    }
    if let Some(speed) = cli.speed {
        config.player.initial_settings.speed = speed;
    }
    config.validate()?;

    let tracks: Vec<_> = cli
        .files
        .iter()
        .map(|path| probe::track_for(path, config.fallback_track_ms))
        .collect();
    let durations: HashMap<String, u64> = tracks
        .iter()
        .filter_map(|track| {
            let ms = u64::try_from(track.duration?.as_millis()).ok()?;
            Some((track.locator.clone(), ms))
        })
        .collect();
    info!("Loaded {} tracks", tracks.len());

    let backend = SimBackend::spawn(
        durations,
        config.fallback_track_ms,
        Duration::from_millis(config.tick_ms),
    )
    .context("Failed to start the simulated clock")?;
    let player = PlayerHandle::spawn(config.player.clone(), Box::new(backend), Box::new(AlwaysGranted))
        .context("Failed to start the player")?;

    let events = player.subscribe();
    thread::Builder::new()
        .name("event-log".to_string())
        .spawn(move || log_events(&events))
        .context("Failed to start the event logger")?;

    player.set_playlist(tracks)?;
    player.play()?;

    println!("{}", HELP);
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        match execute(&player, command) {
            Ok(()) => {}
            Err(PlaybackError::Disconnected) => {
                anyhow::bail!("Player stopped unexpectedly");
            }
            Err(e) => println!("{}", e),
        }
    }

    player.shutdown()?;
    info!("Bye");
    Ok(())
}

fn execute(player: &PlayerHandle, command: Command) -> soul_transition::Result<()> {
    match command {
        Command::PlayPause => player.play_or_pause(),
        Command::Next => player.next(),
        Command::Prev => player.prev(),
        Command::Jump(index) => player.jump_to(index),
        Command::Seek(position_ms) => player.seek(position_ms),
        Command::Looping(mode) => player.set_looping_mode(mode),
        Command::Volume(volume) => player.set_volume(volume),
        Command::Speed(speed) => player.set_speed(speed),
        Command::Position => {
            let index = player.position()?;
            let len = player.playlist_len()?;
            let position = player.current_position_ms()?.unwrap_or_default();
            let duration = player.duration_ms()?;
            let state = if player.is_playing()? {
                "playing"
            } else {
                "stopped"
            };
            match (index, duration) {
                (Some(index), Some(duration)) => println!(
                    "[{}/{}] {} / {} ({})",
                    index + 1,
                    len,
                    clock(position),
                    clock(duration),
                    state
                ),
                (Some(index), None) => {
                    println!("[{}/{}] {} ({})", index + 1, len, clock(position), state);
                }
                (None, _) => println!("nothing loaded"),
            }
            Ok(())
        }
        Command::Help => {
            println!("{}", HELP);
            Ok(())
        }
        Command::Quit => Ok(()),
    }
}

fn clock(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}:{:02}.{:03}", seconds / 60, seconds % 60, ms % 1000)
}

/// Log every event until the player goes away
fn log_events(events: &Subscription) {
    while let Ok(event) = events.receiver().recv() {
        match event {
            PlayerEvent::PlayingChanged { playing } => info!("Playing: {}", playing),
            PlayerEvent::PlaylistAdvanced { new, .. } => info!("Advanced to entry {}", new),
            PlayerEvent::PlaylistPositionChanged { new, .. } => {
                info!("Position set to {:?}", new);
            }
            PlayerEvent::PlaybackError { code } => warn!("Playback error: {:?}", code),
            PlayerEvent::DurationAvailable { duration_ms } => {
                info!("Duration {}", clock(duration_ms));
            }
            PlayerEvent::TimestampChanged { .. } | PlayerEvent::TimestampBaseChanged { .. } => {
                debug!("{:?}", event);
            }
            other => info!("{:?}", other),
        }
    }
}
