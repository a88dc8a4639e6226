//! Shared helpers for the transition engine integration tests
//!
//! `ScriptedBackend` records every native call and lets a test post native
//! events for any decoder; `Harness` drives a `MusicPlayer` by pumping its
//! event loop on the test thread.

#![allow(dead_code)]

use soul_transition::{
    AlwaysGranted, AudioFocus, Decoder, DecoderBackend, DecoderError, DecoderHandle, EventLoop,
    MusicPlayer, NativeEvent, NativeEventSink, OutputAttributes, PlaybackParams, PlayerConfig,
    PlayerEvent, Subscription, Track,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

// ===== Scripted backend =====

/// Native call as seen by the backend
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetDataSource(String),
    Prepare,
    PrepareAsync,
    ApplyParams(PlaybackParams),
    SetVolume(f32),
    Pause,
    Stop,
    SeekTo(u64),
    SetLooping(bool),
    SetNext(Option<DecoderHandle>),
    Reset,
    Release,
}

#[derive(Debug)]
pub struct DecoderRecord {
    pub handle: DecoderHandle,
    pub sink: NativeEventSink,
    pub locator: Option<String>,
    pub calls: Vec<Call>,
    pub released: bool,
}

#[derive(Default)]
struct Shared {
    decoders: Vec<DecoderRecord>,
    auto_prepare: bool,
    rejected: Vec<String>,
    max_decoders: Option<usize>,
}

#[derive(Clone, Default)]
pub struct ScriptedBackend {
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `Prepared` as soon as a decoder starts preparing
    pub fn auto_prepare(self) -> Self {
        self.lock().auto_prepare = true;
        self
    }

    /// `create` fails once `max` decoders exist
    pub fn limit(self, max: usize) -> Self {
        self.lock().max_decoders = Some(max);
        self
    }

    /// `set_data_source` fails for `locator`
    pub fn reject(&self, locator: &str) {
        self.lock().rejected.push(locator.to_string());
    }

    pub fn created(&self) -> usize {
        self.lock().decoders.len()
    }

    pub fn released(&self) -> usize {
        self.lock().decoders.iter().filter(|d| d.released).count()
    }

    pub fn calls(&self, handle: DecoderHandle) -> Vec<Call> {
        self.lock()
            .decoders
            .iter()
            .find(|d| d.handle == handle)
            .map(|d| d.calls.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.lock()
            .decoders
            .iter()
            .flat_map(|d| d.calls.iter())
            .filter(|c| *c == call)
            .count()
    }

    /// Live decoder currently bound to `locator`
    pub fn handle_for(&self, locator: &str) -> Option<DecoderHandle> {
        self.lock()
            .decoders
            .iter()
            .rev()
            .find(|d| !d.released && d.locator.as_deref() == Some(locator))
            .map(|d| d.handle)
    }

    /// Post `event` as if decoder `handle` had reported it
    pub fn send(&self, handle: DecoderHandle, event: NativeEvent) {
        let sink = self
            .lock()
            .decoders
            .iter()
            .find(|d| d.handle == handle)
            .map(|d| d.sink.clone())
            .expect("unknown decoder");
        sink.send(event);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DecoderBackend for ScriptedBackend {
    fn create(&mut self, sink: NativeEventSink) -> Result<Box<dyn Decoder>, DecoderError> {
        let mut shared = self.lock();
        if shared.max_decoders.is_some_and(|max| shared.decoders.len() >= max) {
            return Err(DecoderError::Other("decoder limit reached".to_string()));
        }
        let handle = DecoderHandle(shared.decoders.len() as u64 + 1);
        shared.decoders.push(DecoderRecord {
            handle,
            sink,
            locator: None,
            calls: Vec::new(),
            released: false,
        });
        Ok(Box::new(ScriptedDecoder {
            handle,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct ScriptedDecoder {
    handle: DecoderHandle,
    shared: Arc<Mutex<Shared>>,
}

impl ScriptedDecoder {
    fn with_record<R>(&self, f: impl FnOnce(&mut DecoderRecord, bool, &[String]) -> R) -> R {
        let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let Shared {
            decoders,
            auto_prepare,
            rejected,
            ..
        } = &mut *shared;
        let record = decoders
            .iter_mut()
            .find(|d| d.handle == self.handle)
            .expect("decoder record");
        f(record, *auto_prepare, rejected.as_slice())
    }

    fn record(&self, call: Call) {
        self.with_record(|record, _, _| record.calls.push(call));
    }
}

impl Decoder for ScriptedDecoder {
    fn handle(&self) -> DecoderHandle {
        self.handle
    }

    fn set_data_source(&mut self, locator: &str) -> Result<(), DecoderError> {
        self.with_record(|record, _, rejected| {
            record.calls.push(Call::SetDataSource(locator.to_string()));
            if rejected.iter().any(|r| r == locator) {
                return Err(DecoderError::Io(locator.to_string()));
            }
            record.locator = Some(locator.to_string());
            Ok(())
        })
    }

    fn set_output_attributes(&mut self, _attributes: &OutputAttributes) {}

    fn prepare(&mut self) -> Result<(), DecoderError> {
        self.record(Call::Prepare);
        Ok(())
    }

    fn prepare_async(&mut self) -> Result<(), DecoderError> {
        let auto = self.with_record(|record, auto, _| {
            record.calls.push(Call::PrepareAsync);
            auto.then(|| record.sink.clone())
        });
        if let Some(sink) = auto {
            sink.send(NativeEvent::Prepared);
        }
        Ok(())
    }

    fn apply_playback_params(&mut self, params: PlaybackParams) -> Result<(), DecoderError> {
        self.record(Call::ApplyParams(params));
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) {
        self.record(Call::SetVolume(volume));
    }

    fn pause(&mut self) {
        self.record(Call::Pause);
    }

    fn stop(&mut self) {
        self.record(Call::Stop);
    }

    fn seek_to(&mut self, position_ms: u64) {
        self.record(Call::SeekTo(position_ms));
    }

    fn set_looping(&mut self, looping: bool) {
        self.record(Call::SetLooping(looping));
    }

    fn set_next(&mut self, next: Option<DecoderHandle>) {
        self.record(Call::SetNext(next));
    }

    fn reset(&mut self) {
        self.with_record(|record, _, _| {
            record.calls.push(Call::Reset);
            record.locator = None;
        });
    }

    fn release(&mut self) {
        self.with_record(|record, _, _| {
            record.calls.push(Call::Release);
            record.locator = None;
            record.released = true;
        });
    }

    fn duration_ms(&self) -> Option<u64> {
        Some(200_000)
    }

    fn position_ms(&self) -> u64 {
        0
    }
}

// ===== Harness =====

pub struct Harness {
    pub player: MusicPlayer,
    pub event_loop: EventLoop,
    pub backend: ScriptedBackend,
    pub events: Subscription,
}

impl Harness {
    pub fn new(config: PlayerConfig) -> Self {
        Self::with_parts(config, ScriptedBackend::new(), Box::new(AlwaysGranted))
    }

    pub fn with_parts(
        config: PlayerConfig,
        backend: ScriptedBackend,
        focus: Box<dyn AudioFocus>,
    ) -> Self {
        let event_loop = EventLoop::new();
        let player = MusicPlayer::new(
            config,
            Box::new(backend.clone()),
            focus,
            event_loop.handle(),
        )
        .expect("valid config");
        let events = player.subscribe();
        events.drain();
        Self {
            player,
            event_loop,
            backend,
            events,
        }
    }

    /// Deliver everything that is due
    pub fn pump(&mut self) {
        while let Some(message) = self.event_loop.next_message(Instant::now()) {
            self.player.dispatch(message);
        }
    }

    pub fn load(&mut self, names: &[&str]) {
        self.player.set_playlist(tracks(names));
        self.pump();
    }

    pub fn play_or_pause(&mut self) {
        self.player.play_or_pause();
        self.pump();
    }

    /// Post a native event from the decoder bound to `name` and process it
    pub fn send(&mut self, name: &str, event: NativeEvent) {
        let handle = self.handle(name);
        self.backend.send(handle, event);
        self.pump();
    }

    pub fn handle(&self, name: &str) -> DecoderHandle {
        self.backend
            .handle_for(&locator(name))
            .unwrap_or_else(|| panic!("no decoder bound to {}", name))
    }

    pub fn current(&self) -> Option<String> {
        self.player
            .engine()
            .current_session()
            .and_then(|s| s.playable())
            .map(|p| p.locator().to_string())
    }

    pub fn drain(&self) -> Vec<PlayerEvent> {
        self.events.drain()
    }
}

// ===== Helpers =====

pub fn locator(name: &str) -> String {
    format!("/music/{}.flac", name)
}

pub fn tracks(names: &[&str]) -> Vec<Track> {
    names
        .iter()
        .map(|name| Track::new(*name, locator(name)))
        .collect()
}

pub fn playing_changes(events: &[PlayerEvent]) -> Vec<bool> {
    events
        .iter()
        .filter_map(|event| match event {
            PlayerEvent::PlayingChanged { playing } => Some(*playing),
            _ => None,
        })
        .collect()
}
