//! Player runtime
//!
//! [`PlayerHandle`] moves a [`MusicPlayer`] onto a dedicated thread that
//! drains its event loop. Commands are closures sent over a crossbeam
//! channel; accessors wait for the answer on a `bounded(1)` reply channel.
//!
//! The loop thread multiplexes three sources with `select!`: commands,
//! envelopes posted by native threads, and the earliest pending timer.

use crossbeam_channel::{at, bounded, never, select, unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, trace};

use crate::backend::DecoderBackend;
use crate::error::{PlaybackError, Result};
use crate::events::{EventBus, Subscription, SubscriptionId};
use crate::focus::AudioFocus;
use crate::looper::EventLoop;
use crate::player::MusicPlayer;
use crate::types::{LoopingMode, PlaybackSettings, PlayerConfig, Track};

type Command = Box<dyn FnOnce(&mut MusicPlayer) + Send>;

enum Request {
    Run(Command),
    Shutdown,
}

/// Thread-safe handle to a player running on its own thread
pub struct PlayerHandle {
    commands: Sender<Request>,
    bus: EventBus,
    thread: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    /// Start the player thread
    pub fn spawn(
        config: PlayerConfig,
        backend: Box<dyn DecoderBackend>,
        focus: Box<dyn AudioFocus>,
    ) -> Result<Self> {
        let event_loop = EventLoop::new();
        let player = MusicPlayer::new(config, backend, focus, event_loop.handle())?;
        let bus = player.event_bus();
        let (commands, requests) = unbounded();

        let thread = thread::Builder::new()
            .name("soul-transition".to_string())
            .spawn(move || run_loop(player, event_loop, &requests))
            .map_err(|e| PlaybackError::Runtime(format!("Failed to spawn player thread: {}", e)))?;

        info!("Player thread started");
        Ok(Self {
            commands,
            bus,
            thread: Some(thread),
        })
    }

    /// Run `command` on the player thread without waiting
    pub fn post(&self, command: impl FnOnce(&mut MusicPlayer) + Send + 'static) -> Result<()> {
        self.commands
            .send(Request::Run(Box::new(command)))
            .map_err(|_| PlaybackError::Disconnected)
    }

    /// Run `query` on the player thread and wait for its answer
    pub fn call<R>(&self, query: impl FnOnce(&mut MusicPlayer) -> R + Send + 'static) -> Result<R>
    where
        R: Send + 'static,
    {
        let (reply, answer) = bounded(1);
        self.post(move |player| {
            // The caller may have given up waiting
            let _ = reply.send(query(player));
        })?;
        answer.recv().map_err(|_| PlaybackError::Disconnected)
    }

    // ===== Events =====

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    // ===== Commands =====

    pub fn play_or_pause(&self) -> Result<()> {
        self.post(MusicPlayer::play_or_pause)
    }

    pub fn play(&self) -> Result<()> {
        self.post(MusicPlayer::play)
    }

    pub fn pause(&self) -> Result<()> {
        self.post(MusicPlayer::pause)
    }

    pub fn next(&self) -> Result<()> {
        self.post(MusicPlayer::next)
    }

    pub fn prev(&self) -> Result<()> {
        self.post(MusicPlayer::prev)
    }

    pub fn set_playlist(&self, tracks: Vec<Track>) -> Result<()> {
        self.post(move |player| player.set_playlist(tracks))
    }

    pub fn push(&self, track: Track) -> Result<()> {
        self.post(move |player| player.push(track))
    }

    pub fn set_looping_mode(&self, mode: LoopingMode) -> Result<()> {
        self.post(move |player| player.set_looping_mode(mode))
    }

    pub fn set_shuffle(&self, enabled: bool) -> Result<()> {
        self.post(move |player| player.set_shuffle(enabled))
    }

    pub fn seek(&self, position_ms: u64) -> Result<()> {
        self.call(move |player| player.seek(position_ms))?
    }

    pub fn jump_to(&self, index: usize) -> Result<()> {
        self.call(move |player| player.jump_to(index))?
    }

    pub fn insert(&self, index: usize, track: Track) -> Result<()> {
        self.call(move |player| player.insert(index, track))?
    }

    pub fn remove(&self, index: usize) -> Result<()> {
        self.call(move |player| player.remove(index))?
    }

    pub fn update_playback_settings(&self, volume: f32, speed: f32, pitch: f32) -> Result<()> {
        self.call(move |player| player.update_playback_settings(volume, speed, pitch))?
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.call(move |player| player.set_volume(volume))?
    }

    pub fn set_speed(&self, speed: f32) -> Result<()> {
        self.call(move |player| player.set_speed(speed))?
    }

    /// Release every decoder and forget the playlist
    pub fn recycle(&self) -> Result<()> {
        self.post(MusicPlayer::recycle)
    }

    // ===== Accessors =====

    pub fn current_position_ms(&self) -> Result<Option<u64>> {
        self.call(MusicPlayer::current_position_ms)
    }

    pub fn duration_ms(&self) -> Result<Option<u64>> {
        self.call(|player| player.duration_ms())
    }

    pub fn is_playing(&self) -> Result<bool> {
        self.call(|player| player.is_playing())
    }

    pub fn is_user_playing(&self) -> Result<bool> {
        self.call(|player| player.is_user_playing())
    }

    pub fn position(&self) -> Result<Option<usize>> {
        self.call(|player| player.position())
    }

    pub fn playlist_len(&self) -> Result<usize> {
        self.call(|player| player.playlist().map_or(0, |p| p.len()))
    }

    pub fn looping_mode(&self) -> Result<LoopingMode> {
        self.call(|player| player.looping_mode())
    }

    pub fn settings(&self) -> Result<PlaybackSettings> {
        self.call(|player| player.settings())
    }

    // ===== Shutdown =====

    /// Destroy the player on its thread and wait for the thread to exit
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // Already gone if the thread died
        let _ = self.commands.send(Request::Shutdown);
        thread
            .join()
            .map_err(|_| PlaybackError::Runtime("Player thread panicked".to_string()))?;
        info!("Player thread stopped");
        Ok(())
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to stop player: {}", e);
        }
    }
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

fn run_loop(mut player: MusicPlayer, mut event_loop: EventLoop, requests: &Receiver<Request>) {
    let envelopes = event_loop.receiver().clone();
    loop {
        while let Some(message) = event_loop.next_message(Instant::now()) {
            trace!("Dispatching {:?}", message);
            player.dispatch(message);
        }

        let timer = event_loop.next_deadline().map_or_else(never, at);
        select! {
            recv(requests) -> request => match request {
                Ok(Request::Run(command)) => command(&mut player),
                Ok(Request::Shutdown) | Err(_) => break,
            },
            recv(envelopes) -> envelope => {
                if let Ok(envelope) = envelope {
                    event_loop.accept(envelope);
                }
            },
            recv(timer) -> _ => {},
        }
    }

    debug!("Player loop exiting");
    player.destroy();
}
