//! Music player
//!
//! [`MusicPlayer`] is the control surface: it bundles the
//! [`TransitionEngine`], the [`PlayQueue`] it predicts from and the shared
//! [`EventBus`]. Every playlist mutation reports whether the engine's
//! prediction went stale and the player forwards that to the engine, so the
//! engine is never re-entered from inside a predictor call.
//!
//! The player is not thread-safe by itself. Drive it from the thread that
//! drains its [`EventLoop`](crate::EventLoop), or use
//! [`PlayerHandle`](crate::PlayerHandle) which does exactly that.

use tracing::{debug, info};

use crate::backend::DecoderBackend;
use crate::engine::TransitionEngine;
use crate::error::Result;
use crate::events::{EventBus, Subscription, SubscriptionId};
use crate::focus::{AudioFocus, PlaybackIntent};
use crate::looper::{LoopHandle, Message};
use crate::playlist::Playlist;
use crate::queue::{PlayQueue, PredictionChange};
use crate::types::{LoopingMode, PlaybackSettings, PlayerConfig, Track};

pub struct MusicPlayer {
    engine: TransitionEngine,
    queue: PlayQueue,
    bus: EventBus,
}

impl MusicPlayer {
    /// Create a player posting its asynchronous work to `handle`
    pub fn new(
        config: PlayerConfig,
        backend: Box<dyn DecoderBackend>,
        focus: Box<dyn AudioFocus>,
        handle: LoopHandle,
    ) -> Result<Self> {
        config.validate()?;
        let bus = EventBus::new(config.initial_settings);
        let queue = PlayQueue::new(&config, bus.clone());
        let engine = TransitionEngine::new(&config, backend, focus, handle, bus.clone());
        debug!("Music player created: {:?}", config);
        Ok(Self { engine, queue, bus })
    }

    // ===== Events =====

    /// Shared bus; clones may be handed to other threads
    pub fn event_bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Subscribe, starting with a replay of the current state
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Handle one message drained from the event loop
    pub fn dispatch(&mut self, message: Message) {
        self.engine.dispatch(message, &mut self.queue);
    }

    // ===== Transport =====

    pub fn play_or_pause(&mut self) {
        self.engine.play_or_pause(&mut self.queue);
    }

    pub fn play(&mut self) {
        self.engine.play(&mut self.queue);
    }

    pub fn pause(&mut self) {
        self.engine.pause(&mut self.queue);
    }

    /// Seek the current track
    ///
    /// Fails with [`PlaybackError::Unseekable`](crate::PlaybackError) when
    /// the track reported it cannot seek.
    pub fn seek(&mut self, position_ms: u64) -> Result<()> {
        self.engine.seek(position_ms)
    }

    /// Change volume, speed and pitch at once
    pub fn update_playback_settings(&mut self, volume: f32, speed: f32, pitch: f32) -> Result<()> {
        self.set_settings(PlaybackSettings::new(volume, speed, pitch))
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        let settings = PlaybackSettings {
            volume,
            ..self.engine.settings()
        };
        self.set_settings(settings)
    }

    pub fn set_speed(&mut self, speed: f32) -> Result<()> {
        let settings = PlaybackSettings {
            speed,
            ..self.engine.settings()
        };
        self.set_settings(settings)
    }

    pub fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        let settings = PlaybackSettings {
            pitch,
            ..self.engine.settings()
        };
        self.set_settings(settings)
    }

    fn set_settings(&mut self, settings: PlaybackSettings) -> Result<()> {
        self.engine
            .update_playback_settings(settings, &mut self.queue)
    }

    // ===== Playlist =====

    /// Replace the playlist; playback restarts at its first track
    pub fn set_playlist(&mut self, tracks: Vec<Track>) {
        info!("Loading playlist of {} tracks", tracks.len());
        let change = self.queue.set_playlist(tracks);
        self.forward(Some(change));
    }

    pub fn jump_to(&mut self, index: usize) -> Result<()> {
        let change = self.queue.jump_to(index)?;
        self.forward(change);
        Ok(())
    }

    pub fn next(&mut self) {
        let change = self.queue.next();
        self.forward(change);
    }

    pub fn prev(&mut self) {
        let change = self.queue.prev();
        self.forward(change);
    }

    pub fn insert(&mut self, index: usize, track: Track) -> Result<()> {
        let change = self.queue.insert(index, track)?;
        self.forward(change);
        Ok(())
    }

    pub fn push(&mut self, track: Track) {
        let change = self.queue.push(track);
        self.forward(change);
    }

    pub fn remove(&mut self, index: usize) -> Result<()> {
        let change = self.queue.remove(index)?;
        self.forward(change);
        Ok(())
    }

    pub fn set_looping_mode(&mut self, mode: LoopingMode) {
        let change = self.queue.set_looping_mode(mode);
        self.forward(change);
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        let change = self.queue.set_shuffle(enabled);
        self.forward(change);
    }

    fn forward(&mut self, change: Option<PredictionChange>) {
        if let Some(change) = change {
            self.engine
                .on_prediction_changed(change.current_impacted, &mut self.queue);
        }
    }

    // ===== Lifecycle =====

    /// Stop and release every native decoder
    pub fn destroy(&mut self) {
        self.engine.destroy();
    }

    /// Release everything and forget the playlist; the player stays usable
    pub fn recycle(&mut self) {
        self.engine.destroy();
        let change = self.queue.clear();
        self.forward(Some(change));
    }

    // ===== Accessors =====

    pub fn playlist(&self) -> Option<&Playlist> {
        self.queue.playlist()
    }

    pub fn position(&self) -> Option<usize> {
        self.queue.position()
    }

    pub fn looping_mode(&self) -> LoopingMode {
        self.queue.looping_mode()
    }

    pub fn is_shuffled(&self) -> bool {
        self.queue.is_shuffled()
    }

    pub fn current_position_ms(&mut self) -> Option<u64> {
        self.engine.current_position_ms()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.engine.duration_ms()
    }

    pub fn is_playing(&self) -> bool {
        self.engine.is_playing()
    }

    pub fn is_user_playing(&self) -> bool {
        self.engine.is_user_playing()
    }

    pub fn has_audio_focus(&self) -> bool {
        self.engine.has_audio_focus()
    }

    pub fn is_seekable(&self) -> bool {
        self.engine.is_seekable()
    }

    pub fn intent(&self) -> PlaybackIntent {
        self.engine.intent()
    }

    pub fn settings(&self) -> PlaybackSettings {
        self.engine.settings()
    }

    pub fn engine(&self) -> &TransitionEngine {
        &self.engine
    }
}

impl std::fmt::Debug for MusicPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicPlayer")
            .field("engine", &self.engine)
            .field("position", &self.queue.position())
            .finish()
    }
}
