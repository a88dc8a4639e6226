//! Simulated decoders
//!
//! Every decoder is a virtual voice that advances on a shared clock instead of
//! producing sound. Voices follow the native contract the player relies on:
//! preparation and seeks complete asynchronously, a wired successor starts by
//! itself when a voice runs out, and looping voices wrap around natively.

use soul_transition::{
    Decoder, DecoderBackend, DecoderError, DecoderHandle, NativeEvent, NativeEventSink,
    NativeInfo, OutputAttributes, PlaybackParams, Timestamp,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Initialized,
    Preparing,
    Prepared,
    Playing,
    Paused,
    Stopped,
}

struct Voice {
    sink: NativeEventSink,
    locator: Option<String>,
    phase: Phase,
    position_ms: f64,
    speed: f32,
    looping: bool,
    next: Option<DecoderHandle>,
    /// Reported on the next tick
    pending: Vec<NativeEvent>,
}

impl Voice {
    fn anchor(&self) -> NativeEvent {
        let rate = if self.phase == Phase::Playing {
            self.speed
        } else {
            0.0
        };
        NativeEvent::TimeDiscontinuity(Timestamp::now(self.position_ms as u64, rate))
    }
}

#[derive(Default)]
struct SimState {
    voices: HashMap<DecoderHandle, Voice>,
    durations: HashMap<String, u64>,
    fallback_ms: u64,
    next_handle: u64,
}

type Outgoing = Vec<(NativeEventSink, NativeEvent)>;

impl SimState {
    fn duration_of(&self, locator: &str) -> u64 {
        self.durations
            .get(locator)
            .copied()
            .unwrap_or(self.fallback_ms)
    }

    /// Move the clock forward by `elapsed_ms` and collect what the voices report
    fn advance(&mut self, elapsed_ms: u64) -> Outgoing {
        let mut outgoing = Outgoing::new();
        let mut hand_offs = Vec::new();

        for voice in self.voices.values_mut() {
            for event in voice.pending.drain(..) {
                if event == NativeEvent::Prepared && voice.phase == Phase::Preparing {
                    voice.phase = Phase::Prepared;
                }
                outgoing.push((voice.sink.clone(), event));
            }
        }

        let handles: Vec<DecoderHandle> = self.voices.keys().copied().collect();
        for handle in handles {
            let duration = match self.voices.get(&handle) {
                Some(voice) if voice.phase == Phase::Playing => {
                    voice.locator.as_deref().map(|l| self.duration_of(l))
                }
                _ => None,
            };
            let (Some(duration), Some(voice)) = (duration, self.voices.get_mut(&handle)) else {
                continue;
            };

            voice.position_ms += elapsed_ms as f64 * f64::from(voice.speed);
            if voice.position_ms < duration as f64 {
                continue;
            }

            if voice.looping {
                voice.position_ms %= duration.max(1) as f64;
                outgoing.push((voice.sink.clone(), voice.anchor()));
                continue;
            }

            voice.position_ms = duration as f64;
            voice.phase = Phase::Stopped;
            outgoing.push((voice.sink.clone(), NativeEvent::Completion));
            if let Some(next) = voice.next {
                hand_offs.push((next, voice.speed));
            }
        }

        for (next, speed) in hand_offs {
            match self.voices.get_mut(&next) {
                Some(voice) if voice.phase == Phase::Prepared => {
                    voice.phase = Phase::Playing;
                    voice.speed = speed;
                    outgoing.push((
                        voice.sink.clone(),
                        NativeEvent::Info(NativeInfo::StartedAsNext),
                    ));
                    outgoing.push((voice.sink.clone(), voice.anchor()));
                }
                _ => trace!("Successor {:?} was not ready", next),
            }
        }

        outgoing
    }
}

fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver(outgoing: Outgoing) {
    for (sink, event) in outgoing {
        sink.send(event);
    }
}

/// Backend handing out simulated decoders
#[derive(Clone)]
pub struct SimBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimBackend {
    /// Backend whose clock only moves through [`SimBackend::advance`]
    pub fn manual(durations: HashMap<String, u64>, fallback_ms: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                durations,
                fallback_ms,
                next_handle: 1,
                ..SimState::default()
            })),
        }
    }

    /// Backend driven by a clock thread ticking every `tick`
    ///
    /// The thread ends once the backend and all its decoders are dropped.
    pub fn spawn(
        durations: HashMap<String, u64>,
        fallback_ms: u64,
        tick: Duration,
    ) -> std::io::Result<Self> {
        let backend = Self::manual(durations, fallback_ms);
        let state = Arc::downgrade(&backend.state);
        thread::Builder::new()
            .name("sim-clock".to_string())
            .spawn(move || run_clock(&state, tick))?;
        Ok(backend)
    }

    pub fn advance(&self, elapsed: Duration) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let outgoing = lock(&self.state).advance(elapsed_ms);
        deliver(outgoing);
    }

    /// Number of decoders not yet released
    pub fn live_voices(&self) -> usize {
        lock(&self.state).voices.len()
    }

    /// Virtual position of a live decoder
    pub fn position_of(&self, handle: DecoderHandle) -> Option<u64> {
        lock(&self.state)
            .voices
            .get(&handle)
            .map(|voice| voice.position_ms as u64)
    }
}

fn run_clock(state: &Weak<Mutex<SimState>>, tick: Duration) {
    let tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
    loop {
        thread::sleep(tick);
        let Some(state) = state.upgrade() else {
            break;
        };
        let outgoing = lock(&state).advance(tick_ms);
        drop(state);
        deliver(outgoing);
    }
    debug!("Simulated clock stopped");
}

impl DecoderBackend for SimBackend {
    fn create(&mut self, sink: NativeEventSink) -> Result<Box<dyn Decoder>, DecoderError> {
        let mut state = lock(&self.state);
        let handle = DecoderHandle(state.next_handle);
        state.next_handle += 1;
        state.voices.insert(
            handle,
            Voice {
                sink,
                locator: None,
                phase: Phase::Idle,
                position_ms: 0.0,
                speed: 1.0,
                looping: false,
                next: None,
                pending: Vec::new(),
            },
        );
        trace!("Created simulated voice {:?}", handle);
        Ok(Box::new(SimDecoder {
            handle,
            state: Arc::clone(&self.state),
        }))
    }
}

struct SimDecoder {
    handle: DecoderHandle,
    state: Arc<Mutex<SimState>>,
}

impl SimDecoder {
    fn with_voice<R>(&self, f: impl FnOnce(&mut Voice) -> R) -> Result<R, DecoderError> {
        let mut state = lock(&self.state);
        state
            .voices
            .get_mut(&self.handle)
            .map(f)
            .ok_or(DecoderError::Released)
    }

    /// Run `f` on the voice, ignoring a released decoder
    fn update(&self, f: impl FnOnce(&mut Voice)) {
        if self.with_voice(f).is_err() {
            trace!("Call on released voice {:?}", self.handle);
        }
    }
}

impl Decoder for SimDecoder {
    fn handle(&self) -> DecoderHandle {
        self.handle
    }

    fn set_data_source(&mut self, locator: &str) -> Result<(), DecoderError> {
        if locator.is_empty() {
            return Err(DecoderError::InvalidArgument("empty locator".to_string()));
        }
        self.with_voice(|voice| {
            voice.locator = Some(locator.to_string());
            voice.phase = Phase::Initialized;
            voice.position_ms = 0.0;
        })
    }

    fn set_output_attributes(&mut self, _attributes: &OutputAttributes) {}

    fn prepare(&mut self) -> Result<(), DecoderError> {
        self.with_voice(|voice| voice.phase = Phase::Prepared)
    }

    fn prepare_async(&mut self) -> Result<(), DecoderError> {
        self.with_voice(|voice| {
            voice.phase = Phase::Preparing;
            voice.pending.push(NativeEvent::Prepared);
        })
    }

    fn apply_playback_params(&mut self, params: PlaybackParams) -> Result<(), DecoderError> {
        self.with_voice(|voice| {
            voice.speed = params.speed;
            voice.phase = if params.speed > 0.0 {
                Phase::Playing
            } else {
                Phase::Paused
            };
            let anchor = voice.anchor();
            voice.sink.send(anchor);
        })
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn pause(&mut self) {
        self.update(|voice| {
            voice.phase = Phase::Paused;
            let anchor = voice.anchor();
            voice.sink.send(anchor);
        });
    }

    fn stop(&mut self) {
        self.update(|voice| {
            voice.phase = Phase::Stopped;
            voice.position_ms = 0.0;
        });
    }

    fn seek_to(&mut self, position_ms: u64) {
        let duration = self
            .with_voice(|voice| voice.locator.clone())
            .ok()
            .flatten()
            .map(|locator| lock(&self.state).duration_of(&locator));
        self.update(|voice| {
            voice.position_ms = position_ms.min(duration.unwrap_or(position_ms)) as f64;
            voice.pending.push(NativeEvent::SeekComplete);
            let anchor = voice.anchor();
            voice.sink.send(anchor);
        });
    }

    fn set_looping(&mut self, looping: bool) {
        self.update(|voice| voice.looping = looping);
    }

    fn set_next(&mut self, next: Option<DecoderHandle>) {
        self.update(|voice| voice.next = next);
    }

    fn reset(&mut self) {
        self.update(|voice| {
            voice.locator = None;
            voice.phase = Phase::Idle;
            voice.position_ms = 0.0;
            voice.speed = 1.0;
            voice.looping = false;
            voice.next = None;
            voice.pending.clear();
        });
    }

    fn release(&mut self) {
        lock(&self.state).voices.remove(&self.handle);
    }

    fn duration_ms(&self) -> Option<u64> {
        let state = lock(&self.state);
        let voice = state.voices.get(&self.handle)?;
        voice.locator.as_deref().map(|l| state.duration_of(l))
    }

    fn position_ms(&self) -> u64 {
        self.with_voice(|voice| voice.position_ms as u64)
            .unwrap_or_default()
    }
}
