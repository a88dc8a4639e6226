//! Decoder session
//!
//! A [`DecoderSession`] wraps exactly one native [`Decoder`] and drives it
//! through a strict lifecycle:
//!
//! ```text
//! Idle -> Initialized -> Preparing -> Prepared -> Started <-> Paused
//!                  ^                     |            |
//!                  +------ Stopped <-----+------------+
//! ```
//!
//! `Completed` and `Error` are per-track terminal states that the session
//! leaves by recycling itself; `End` means the native resource is released.
//! `Busy` is held around every native call that blocks on another thread.
//!
//! Calling an operation in the wrong state is a bug in the owner and panics.
//! Everything the session wants to tell its owner is queued as a
//! [`SessionCallback`] and collected with [`DecoderSession::take_callbacks`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::backend::{
    Decoder, DecoderBackend, DecoderError, DecoderHandle, NativeError, NativeEvent,
    NativeEventSink, NativeInfo, PlaybackParams,
};
use crate::events::ErrorCode;
use crate::looper::{LoopHandle, Message, TaskId};
use crate::types::{monotonic_nanos, OutputAttributes, Playable, PlaybackSettings, Timestamp};

/// Identity of a session for routing native events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initialized,
    Preparing,
    Prepared,
    Started,
    Paused,
    Stopped,
    Completed,
    Error,
    End,
    Busy,
}

/// How to prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    /// Return immediately, continue on [`NativeEvent::Prepared`]
    Async,
    /// Block until the decoder is prepared
    Blocking,
}

/// Delayed work a session schedules on the event loop
#[derive(Debug, Clone, PartialEq)]
pub enum SessionTask {
    /// Live metadata whose media offset has been reached
    LiveData(String),
}

/// Why a session stopped producing audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Natural end with a native hand-off target wired
    HandedOff,
    /// Natural end with nothing wired
    EndOfContent,
    /// Ended by an error
    Failed,
}

/// Notifications from a session to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCallback {
    /// The session reset itself to `Idle`
    RecycleSelf,
    /// The session released its native resource and must be dropped
    DestroySelf,
    /// Device or internal failure, not caused by the content
    InternalError(ErrorCode),
    /// The content itself cannot be played
    TrackError(ErrorCode),
    CompletedPlaying(Completion),
    DecreasedPerformance,
    /// Played plus buffered share, 0.0 - 1.0
    BufferStatus(f32),
    Buffering(bool),
    StartedAsNext,
    MetadataUpdate,
    Unseekable,
    SeekCompleted,
    NewTimestamp(Timestamp),
    LiveData(String),
    DurationAvailable(u64),
    /// This session reached `Prepared` and can now be wired behind `owner`
    LinkReady { owner: SessionId },
}

/// Hand-off target for [`DecoderSession::set_next`]
pub enum HandOff<'a> {
    /// Nothing plays after this session
    Clear,
    /// Loop this session natively
    Loop,
    /// Start `other` automatically at the end of this session
    To(&'a mut DecoderSession),
}

/// Work to run once the session reaches `Prepared`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Continuation {
    Start,
    LinkAsNextOf(SessionId),
}

/// Native hand-off wiring of this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    None,
    Looping,
    Next(SessionId),
    Pending(SessionId),
}

/// One managed native decoder
pub struct DecoderSession {
    id: SessionId,
    decoder: Box<dyn Decoder>,
    state: SessionState,
    generation: Arc<AtomicU64>,
    handle: LoopHandle,
    attributes: OutputAttributes,
    playable: Option<Playable>,
    settings: PlaybackSettings,
    continuation: Option<Continuation>,
    link: Link,
    live_tasks: Vec<TaskId>,
    duration_ms: Option<u64>,
    last_position_ms: u64,
    seek_in_flight: bool,
    pending_seek: Option<u64>,
    seekable: bool,
    anchor: Option<Timestamp>,
    outbox: Vec<SessionCallback>,
}

impl DecoderSession {
    /// Build a session around a fresh native decoder from `backend`
    pub fn create(
        id: SessionId,
        backend: &mut dyn DecoderBackend,
        handle: LoopHandle,
        attributes: OutputAttributes,
    ) -> Result<Self, DecoderError> {
        let generation = Arc::new(AtomicU64::new(0));
        let sink = NativeEventSink::new(id, Arc::clone(&generation), handle.clone());
        let decoder = backend.create(sink)?;
        debug!("Created {} (decoder {:?})", id, decoder.handle());
        Ok(Self::from_parts(id, decoder, generation, handle, attributes))
    }

    pub(crate) fn from_parts(
        id: SessionId,
        decoder: Box<dyn Decoder>,
        generation: Arc<AtomicU64>,
        handle: LoopHandle,
        attributes: OutputAttributes,
    ) -> Self {
        Self {
            id,
            decoder,
            state: SessionState::Idle,
            generation,
            handle,
            attributes,
            playable: None,
            settings: PlaybackSettings::default(),
            continuation: None,
            link: Link::None,
            live_tasks: Vec::new(),
            duration_ms: None,
            last_position_ms: 0,
            seek_in_flight: false,
            pending_seek: None,
            seekable: true,
            anchor: None,
            outbox: Vec::new(),
        }
    }

    // ===== Accessors =====

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Events stamped with any other generation are stale
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Content bound by the last successful `initialize`
    ///
    /// Kept after the session recycles itself so that its owner can still
    /// tell which content failed.
    pub fn playable(&self) -> Option<&Playable> {
        self.playable.as_ref()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub fn settings(&self) -> PlaybackSettings {
        self.settings
    }

    pub fn decoder_handle(&self) -> DecoderHandle {
        self.decoder.handle()
    }

    /// True while a native hand-off to another session is wired
    pub fn is_handing_off(&self) -> bool {
        matches!(self.link, Link::Next(_))
    }

    /// True while the session loops natively
    pub fn is_looping(&self) -> bool {
        self.link == Link::Looping
    }

    /// Current media position, asking the decoder when it has one
    pub fn position_ms(&mut self) -> u64 {
        if matches!(
            self.state,
            SessionState::Prepared
                | SessionState::Started
                | SessionState::Paused
                | SessionState::Stopped
        ) {
            self.last_position_ms = self.decoder.position_ms();
        }
        self.last_position_ms
    }

    pub fn has_callbacks(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Drain everything queued for the owner, oldest first
    pub fn take_callbacks(&mut self) -> Vec<SessionCallback> {
        std::mem::take(&mut self.outbox)
    }

    // ===== Lifecycle =====

    /// Bind content; requires `Idle`
    pub fn initialize(&mut self, playable: Playable) -> Result<(), DecoderError> {
        self.expect_state(&[SessionState::Idle], "initialize");
        self.state = SessionState::Busy;
        match self.decoder.set_data_source(playable.locator()) {
            Ok(()) => {
                debug!("{} initialized with {}", self.id, playable);
                self.playable = Some(playable);
                self.state = SessionState::Initialized;
                Ok(())
            }
            Err(e) => {
                warn!("{} rejected {}: {}", self.id, playable, e);
                self.bump_generation();
                self.decoder.reset();
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Prepare; requires `Initialized` or `Stopped`
    ///
    /// A failure to even start preparing is reported like an asynchronous
    /// content error: the session recycles itself.
    pub fn preload(&mut self, mode: PrepareMode) {
        self.expect_state(
            &[SessionState::Initialized, SessionState::Stopped],
            "preload",
        );
        self.decoder.set_output_attributes(&self.attributes);
        match mode {
            PrepareMode::Async => {
                self.state = SessionState::Preparing;
                if let Err(e) = self.decoder.prepare_async() {
                    self.fail_preparation(&e);
                }
            }
            PrepareMode::Blocking => {
                self.state = SessionState::Busy;
                match self.decoder.prepare() {
                    Ok(()) => {
                        self.state = SessionState::Prepared;
                        self.duration_ms = self.decoder.duration_ms();
                        if let Some(duration) = self.duration_ms {
                            self.outbox.push(SessionCallback::DurationAvailable(duration));
                        }
                    }
                    Err(e) => {
                        self.state = SessionState::Error;
                        self.fail_preparation(&e);
                    }
                }
            }
        }
    }

    /// Start output, preparing first when needed
    ///
    /// With [`PrepareMode::Async`] on an unprepared session the start is
    /// deferred until the decoder reports `Prepared`.
    pub fn start(&mut self, mode: PrepareMode) {
        if matches!(
            self.state,
            SessionState::Preparing | SessionState::Initialized | SessionState::Stopped
        ) {
            if mode == PrepareMode::Async {
                self.set_continuation(Continuation::Start);
            }
            if self.state != SessionState::Preparing {
                self.preload(mode);
            }
            if mode == PrepareMode::Async || self.state != SessionState::Prepared {
                return;
            }
        }

        self.expect_state(&[SessionState::Prepared, SessionState::Paused], "start");
        self.state = SessionState::Started;
        self.sync_playback_parameters();

        if self.state == SessionState::Started {
            if let Some(target) = self.pending_seek.take() {
                self.issue_seek(target);
            }
        }
    }

    /// Pause output; a start still waiting for preparation is cancelled
    pub fn pause(&mut self) {
        match self.state {
            SessionState::Started => {
                self.state = SessionState::Paused;
                self.decoder.pause();
            }
            SessionState::Prepared | SessionState::Paused => {}
            SessionState::Preparing | SessionState::Initialized | SessionState::Stopped => {
                if self.continuation == Some(Continuation::Start) {
                    debug!("{} cancelling pending start", self.id);
                    self.continuation = None;
                }
            }
            state => panic!("{}: pause called in state {:?}", self.id, state),
        }
    }

    /// Stop output; requires `Started`, `Paused` or `Prepared`
    pub fn stop(&mut self) {
        self.expect_state(
            &[
                SessionState::Started,
                SessionState::Paused,
                SessionState::Prepared,
            ],
            "stop",
        );
        self.state = SessionState::Stopped;
        self.seek_in_flight = false;
        self.decoder.stop();
    }

    /// Seek to `target_ms`
    ///
    /// Only one seek is in flight at a time; requests made meanwhile collapse
    /// into the newest target, issued when the in-flight one completes.
    /// Before the session has started the target is kept until it does.
    pub fn seek(&mut self, target_ms: u64) {
        match self.state {
            SessionState::Started | SessionState::Paused => {
                if self.seek_in_flight {
                    self.pending_seek = Some(target_ms);
                } else {
                    self.issue_seek(target_ms);
                }
            }
            SessionState::Initialized
            | SessionState::Preparing
            | SessionState::Prepared
            | SessionState::Stopped => {
                self.pending_seek = Some(target_ms);
            }
            state => warn!("{} ignoring seek in state {:?}", self.id, state),
        }
    }

    /// Wire the gapless hand-off target
    pub fn set_next(&mut self, target: HandOff<'_>) {
        self.expect_not_state(
            &[
                SessionState::Busy,
                SessionState::Error,
                SessionState::End,
                SessionState::Completed,
            ],
            "set_next",
        );
        match target {
            HandOff::Loop => {
                self.decoder.set_next(None);
                self.decoder.set_looping(true);
                self.link = Link::Looping;
            }
            HandOff::Clear => {
                self.decoder.set_looping(false);
                self.decoder.set_next(None);
                self.link = Link::None;
            }
            HandOff::To(other) => {
                assert_ne!(other.id, self.id, "{}: use HandOff::Loop to loop", self.id);
                self.decoder.set_looping(false);
                if other.state == SessionState::Preparing {
                    other.set_continuation(Continuation::LinkAsNextOf(self.id));
                    self.decoder.set_next(None);
                    self.link = Link::Pending(other.id);
                } else {
                    other.expect_state(&[SessionState::Prepared], "hand-off target");
                    self.decoder.set_next(Some(other.decoder.handle()));
                    self.link = Link::Next(other.id);
                }
            }
        }
    }

    /// Finish a deferred hand-off once `other` reported `LinkReady`
    ///
    /// Returns false when the wiring is no longer wanted or possible.
    pub fn complete_link(&mut self, other: &DecoderSession) -> bool {
        let usable = !matches!(
            self.state,
            SessionState::Busy | SessionState::Error | SessionState::End | SessionState::Completed
        );
        if self.link == Link::Pending(other.id) && usable && other.state == SessionState::Prepared {
            self.decoder.set_next(Some(other.decoder.handle()));
            self.link = Link::Next(other.id);
            true
        } else {
            warn!(
                "{} cannot hand off to {} (link {:?}, states {:?}/{:?})",
                self.id, other.id, self.link, self.state, other.state
            );
            false
        }
    }

    /// Drop any continuation waiting for `Prepared`
    pub fn cancel_continuation(&mut self) {
        self.continuation = None;
    }

    /// Store new settings and apply what can be applied without side effects
    ///
    /// Rate and pitch are only pushed when doing so keeps the output state:
    /// speed > 0 while started, or speed == 0 while paused. Otherwise they wait
    /// for the next start; volume is applied right away.
    pub fn update_playback_settings(&mut self, settings: PlaybackSettings) {
        self.settings = settings;
        match self.state {
            SessionState::Started if settings.speed > 0.0 => self.sync_playback_parameters(),
            SessionState::Paused if settings.speed == 0.0 => self.sync_playback_parameters(),
            SessionState::Prepared | SessionState::Started | SessionState::Paused => {
                self.decoder.set_volume(settings.volume);
            }
            _ => {}
        }
    }

    /// Return to `Idle`, cancelling timers and continuations
    pub fn recycle(&mut self) {
        self.expect_not_state(&[SessionState::Busy, SessionState::End], "recycle");
        if self.state == SessionState::Idle {
            return;
        }
        self.state = SessionState::Busy;
        self.cleanup();
        self.bump_generation();
        self.decoder.reset();
        self.state = SessionState::Idle;
        debug!("{} recycled", self.id);
    }

    /// Release the native resource for good
    pub fn destroy(&mut self) {
        self.expect_not_state(&[SessionState::Busy, SessionState::End], "destroy");
        self.state = SessionState::Busy;
        self.cleanup();
        self.bump_generation();
        self.decoder.release();
        self.state = SessionState::End;
        debug!("{} destroyed", self.id);
    }

    // ===== Native events =====

    /// Handle an event posted by this session's decoder
    pub fn on_native(&mut self, event: NativeEvent) {
        if matches!(self.state, SessionState::Busy | SessionState::End) {
            debug!("{} ignoring {:?} in state {:?}", self.id, event, self.state);
            return;
        }
        trace!("{} native {:?} in state {:?}", self.id, event, self.state);
        match event {
            NativeEvent::Prepared => self.on_prepared(),
            NativeEvent::Completion => self.on_completion(),
            NativeEvent::SeekComplete => self.on_seek_complete(),
            NativeEvent::BufferingUpdate { percent } => {
                if self.state == SessionState::Started {
                    let fraction = f32::from(percent.min(100)) / 100.0;
                    self.outbox.push(SessionCallback::BufferStatus(fraction));
                }
            }
            NativeEvent::Info(info) => self.on_info(info),
            NativeEvent::Error(error) => self.on_error(error),
            NativeEvent::TimeDiscontinuity(timestamp) => {
                if matches!(self.state, SessionState::Started | SessionState::Paused) {
                    self.anchor = Some(timestamp);
                    self.last_position_ms = timestamp.media_ms;
                    self.outbox.push(SessionCallback::NewTimestamp(timestamp));
                }
            }
            NativeEvent::TimedMetadata {
                timestamp_ms,
                payload,
            } => self.on_timed_metadata(timestamp_ms, &payload),
        }
    }

    /// Handle a delayed task this session scheduled
    pub fn on_timer(&mut self, task: SessionTask) {
        match task {
            SessionTask::LiveData(text) => {
                if matches!(
                    self.state,
                    SessionState::Started | SessionState::Paused | SessionState::Stopped
                ) {
                    self.outbox.push(SessionCallback::LiveData(text));
                } else {
                    trace!("{} dropping live data in state {:?}", self.id, self.state);
                }
            }
        }
    }

    fn on_prepared(&mut self) {
        if self.state != SessionState::Preparing {
            warn!("{} prepared in unexpected state {:?}", self.id, self.state);
            return;
        }
        self.state = SessionState::Prepared;
        self.duration_ms = self.decoder.duration_ms();
        if let Some(duration) = self.duration_ms {
            self.outbox.push(SessionCallback::DurationAvailable(duration));
        }
        match self.continuation.take() {
            Some(Continuation::Start) => self.start(PrepareMode::Blocking),
            Some(Continuation::LinkAsNextOf(owner)) => {
                self.outbox.push(SessionCallback::LinkReady { owner });
            }
            None => {}
        }
    }

    fn on_completion(&mut self) {
        if matches!(
            self.state,
            SessionState::Idle | SessionState::Error | SessionState::Completed
        ) {
            warn!("{} completion in state {:?}", self.id, self.state);
            return;
        }
        let completion = if self.is_handing_off() {
            Completion::HandedOff
        } else {
            Completion::EndOfContent
        };
        self.state = SessionState::Completed;
        self.recycle_self(completion);
    }

    fn on_seek_complete(&mut self) {
        self.seek_in_flight = false;
        if let Some(target) = self.pending_seek.take() {
            if matches!(self.state, SessionState::Started | SessionState::Paused) {
                self.issue_seek(target);
                return;
            }
        }
        self.outbox.push(SessionCallback::SeekCompleted);
    }

    fn on_info(&mut self, info: NativeInfo) {
        match info {
            NativeInfo::BadInterleaving => self.outbox.push(SessionCallback::DecreasedPerformance),
            NativeInfo::BufferingStart => self.outbox.push(SessionCallback::Buffering(true)),
            NativeInfo::BufferingEnd => self.outbox.push(SessionCallback::Buffering(false)),
            NativeInfo::StartedAsNext => {
                match self.state {
                    SessionState::Prepared => self.state = SessionState::Started,
                    SessionState::Started => {}
                    state => warn!("{} started as next in state {:?}", self.id, state),
                }
                self.outbox.push(SessionCallback::StartedAsNext);
            }
            NativeInfo::MetadataUpdate => self.outbox.push(SessionCallback::MetadataUpdate),
            NativeInfo::NotSeekable => {
                self.seekable = false;
                self.outbox.push(SessionCallback::Unseekable);
            }
            NativeInfo::AudioNotPlaying => {
                self.outbox
                    .push(SessionCallback::InternalError(ErrorCode::Unknown));
            }
            NativeInfo::Unknown(code) => debug!("{} unhandled info {}", self.id, code),
        }
    }

    fn on_error(&mut self, error: NativeError) {
        self.state = SessionState::Error;
        match error {
            NativeError::ServerDied | NativeError::System => {
                self.outbox
                    .push(SessionCallback::InternalError(ErrorCode::ServerDied));
                self.destroy_self();
            }
            NativeError::Io
            | NativeError::Malformed
            | NativeError::Unsupported
            | NativeError::NotValidForProgressive => {
                let code = match error {
                    NativeError::Io => ErrorCode::Io,
                    NativeError::Malformed => ErrorCode::Malformed,
                    NativeError::Unsupported => ErrorCode::Unsupported,
                    _ => ErrorCode::NotValidForProgressive,
                };
                self.outbox.push(SessionCallback::TrackError(code));
                self.recycle_self(Completion::Failed);
            }
            NativeError::TimedOut => {
                self.outbox
                    .push(SessionCallback::InternalError(ErrorCode::TimedOut));
                self.recycle_self(Completion::Failed);
            }
            NativeError::InvalidOperation => {
                panic!("{}: native decoder reported an illegal state transition", self.id)
            }
            NativeError::Unknown(code) => {
                warn!("{} unknown native error {}", self.id, code);
                self.outbox
                    .push(SessionCallback::InternalError(ErrorCode::Unknown));
                self.destroy_self();
            }
        }
    }

    fn on_timed_metadata(&mut self, timestamp_ms: u64, payload: &[u8]) {
        if self.state != SessionState::Started {
            trace!("{} dropping timed metadata in state {:?}", self.id, self.state);
            return;
        }
        let text = String::from_utf8_lossy(payload).into_owned();
        let position = self.media_position_now();
        if timestamp_ms <= position {
            self.outbox.push(SessionCallback::LiveData(text));
            return;
        }

        let media_left = timestamp_ms - position;
        let rate = self.anchor.map_or(self.settings.speed, |anchor| anchor.rate);
        let delay = if rate > 0.0 {
            Duration::from_secs_f64(media_left as f64 / 1000.0 / f64::from(rate))
        } else {
            Duration::from_millis(media_left)
        };
        let task = self.handle.post_delayed(
            Message::SessionTimer {
                session: self.id,
                generation: self.generation(),
                task: SessionTask::LiveData(text),
            },
            delay,
        );
        self.live_tasks.push(task);
    }

    // ===== Internals =====

    fn media_position_now(&mut self) -> u64 {
        match self.anchor {
            Some(anchor) if self.state == SessionState::Started => {
                anchor.position_at(monotonic_nanos())
            }
            _ => self.position_ms(),
        }
    }

    fn issue_seek(&mut self, target_ms: u64) {
        self.seek_in_flight = true;
        self.last_position_ms = target_ms;
        self.decoder.seek_to(target_ms);
    }

    /// Apply rate, pitch and volume to the decoder
    ///
    /// The only place rate reaches the decoder; callers make sure the output
    /// state it implies matches the session state.
    fn sync_playback_parameters(&mut self) {
        let params = PlaybackParams {
            speed: self.settings.speed,
            pitch: self.settings.pitch,
        };
        match self.decoder.apply_playback_params(params) {
            Ok(()) => self.decoder.set_volume(self.settings.volume),
            Err(e) => {
                warn!("{} rejected playback params {:?}: {}", self.id, params, e);
                self.outbox
                    .push(SessionCallback::InternalError(ErrorCode::Unsupported));
                self.recycle_self(Completion::Failed);
            }
        }
    }

    fn fail_preparation(&mut self, error: &DecoderError) {
        warn!("{} failed to prepare: {}", self.id, error);
        let callback = match error {
            DecoderError::Io(_) => SessionCallback::TrackError(ErrorCode::Io),
            DecoderError::Unsupported(_) => SessionCallback::TrackError(ErrorCode::Unsupported),
            _ => SessionCallback::InternalError(ErrorCode::Unknown),
        };
        self.state = SessionState::Error;
        self.outbox.push(callback);
        self.recycle_self(Completion::Failed);
    }

    fn recycle_self(&mut self, completion: Completion) {
        self.recycle();
        self.outbox.push(SessionCallback::RecycleSelf);
        self.outbox.push(SessionCallback::CompletedPlaying(completion));
    }

    fn destroy_self(&mut self) {
        self.destroy();
        self.outbox.push(SessionCallback::DestroySelf);
        self.outbox
            .push(SessionCallback::CompletedPlaying(Completion::Failed));
    }

    fn set_continuation(&mut self, continuation: Continuation) {
        match self.continuation {
            Some(existing) if existing != continuation => panic!(
                "{}: {:?} scheduled while {:?} is pending",
                self.id, continuation, existing
            ),
            _ => self.continuation = Some(continuation),
        }
    }

    fn cleanup(&mut self) {
        for task in self.live_tasks.drain(..) {
            self.handle.cancel(task);
        }
        self.continuation = None;
        self.link = Link::None;
        self.duration_ms = None;
        self.last_position_ms = 0;
        self.seek_in_flight = false;
        self.pending_seek = None;
        self.seekable = true;
        self.anchor = None;
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn expect_state(&self, allowed: &[SessionState], operation: &str) {
        assert!(
            allowed.contains(&self.state),
            "{}: {} called in state {:?}, expected one of {:?}",
            self.id,
            operation,
            self.state,
            allowed
        );
    }

    fn expect_not_state(&self, forbidden: &[SessionState], operation: &str) {
        assert!(
            !forbidden.contains(&self.state),
            "{}: {} called in state {:?}",
            self.id,
            operation,
            self.state
        );
    }
}

impl fmt::Debug for DecoderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("playable", &self.playable)
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for DecoderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.playable {
            Some(playable) => write!(f, "{} [{}]", self.id, playable),
            None => write!(f, "{}", self.id),
        }
    }
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        if self.state != SessionState::End && self.state != SessionState::Busy {
            debug!("{} dropped without destroy, releasing decoder", self.id);
            for task in self.live_tasks.drain(..) {
                self.handle.cancel(task);
            }
            self.decoder.release();
        }
    }
}
