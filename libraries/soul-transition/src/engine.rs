//! Transition engine
//!
//! Owns up to two live [`DecoderSession`]s: the *current* one, audible or
//! about to be, and the *next* one prepared behind it so the native layer can
//! hand off without a gap. Sessions that finished go to a small pool for
//! reuse; the pool is trimmed to the configured retention.
//!
//! The engine never decides what plays. Every entry point takes the
//! [`NextTrackPredictor`] and asks it. Session callbacks are drained at the
//! end of every entry point, oldest first, until no session has anything
//! left to report.
//!
//! # Hand-off
//!
//! ```text
//! current: Started ──Completion──▶ pool
//!                         │
//! next:    Prepared ──StartedAsNext──▶ current ──▶ new lookahead
//! ```
//!
//! Completion and started-as-next may arrive in either order; `playing`
//! stays true across the hand-off. A pause in between holds the next session
//! once it starts. If the next session fails after the current one handed
//! off, its track is retried cold as current.

use std::collections::VecDeque;
use tracing::{debug, error, info, trace, warn};

use crate::backend::{DecoderBackend, DecoderError};
use crate::error::{PlaybackError, Result};
use crate::events::{ErrorCode, EventBus, PlayerEvent};
use crate::focus::{
    AudioFocus, Effect, FocusChange, FocusListener, FocusRequest, IntentEvent, PlaybackIntent,
};
use crate::looper::{LoopHandle, Message, TaskId};
use crate::predictor::{NextTrackPredictor, NoTracks};
use crate::session::{
    Completion, DecoderSession, HandOff, PrepareMode, SessionCallback, SessionId, SessionState,
};
use crate::types::{
    delay_to_next_second, monotonic_nanos, OutputAttributes, Playable, PlaybackSettings,
    PlayerConfig, Timestamp,
};

/// Delayed work the engine schedules on its own loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineTask {
    /// Report the position at the next whole second of media time
    TimestampTick,
}

/// Slot a session occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Current,
    Next,
    Pooled,
    Unknown,
}

/// Former current session whose completion decides what plays next
#[derive(Debug)]
struct Retired {
    id: SessionId,
    playable: Option<Playable>,
}

pub struct TransitionEngine {
    backend: Box<dyn DecoderBackend>,
    focus: Box<dyn AudioFocus>,
    handle: LoopHandle,
    bus: EventBus,
    output: OutputAttributes,
    pool_retention: usize,
    position_tick: bool,

    current: Option<DecoderSession>,
    next: Option<DecoderSession>,
    /// Idle sessions, oldest first
    pool: VecDeque<DecoderSession>,
    next_session_id: u64,

    intent: PlaybackIntent,
    settings: PlaybackSettings,
    seekable: bool,
    timestamp: Option<Timestamp>,
    tick: Option<TaskId>,
    retired: Option<Retired>,
    /// Lookahead content that failed to prepare; only retried once current
    failed_lookahead: Option<Playable>,
    /// The lookahead failed after the current session had already handed off
    orphaned_hand_off: bool,
}

impl TransitionEngine {
    pub fn new(
        config: &PlayerConfig,
        backend: Box<dyn DecoderBackend>,
        focus: Box<dyn AudioFocus>,
        handle: LoopHandle,
        bus: EventBus,
    ) -> Self {
        Self {
            backend,
            focus,
            handle,
            bus,
            output: config.output,
            pool_retention: config.pool_retention,
            position_tick: config.position_tick,
            current: None,
            next: None,
            pool: VecDeque::new(),
            next_session_id: 1,
            intent: PlaybackIntent::default(),
            settings: config.initial_settings,
            seekable: true,
            timestamp: None,
            tick: None,
            retired: None,
            failed_lookahead: None,
            orphaned_hand_off: false,
        }
    }

    // ===== Accessors =====

    pub fn intent(&self) -> PlaybackIntent {
        self.intent
    }

    /// Audio is flowing (or about to, once preparation finishes)
    pub fn is_playing(&self) -> bool {
        self.intent.is_playing()
    }

    pub fn is_user_playing(&self) -> bool {
        self.intent.is_user_playing()
    }

    pub fn has_audio_focus(&self) -> bool {
        self.intent.has_focus()
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }

    pub fn settings(&self) -> PlaybackSettings {
        self.settings
    }

    pub fn current_session(&self) -> Option<&DecoderSession> {
        self.current.as_ref()
    }

    pub fn next_session(&self) -> Option<&DecoderSession> {
        self.next.as_ref()
    }

    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.current.as_ref()?.duration_ms()
    }

    /// Position of the current track
    ///
    /// Extrapolated from the last timestamp while playing, otherwise asked
    /// from the session.
    pub fn current_position_ms(&mut self) -> Option<u64> {
        let playing = self.intent.is_playing();
        let timestamp = self.timestamp;
        let current = self.current.as_mut()?;
        let position = match timestamp {
            Some(timestamp) if playing => timestamp.position_at(monotonic_nanos()),
            _ => current.position_ms(),
        };
        Some(current.duration_ms().map_or(position, |d| position.min(d)))
    }

    // ===== Control =====

    pub fn play_or_pause(&mut self, predictor: &mut dyn NextTrackPredictor) {
        let event = if self.intent.is_playing() {
            IntentEvent::PausePressed
        } else {
            IntentEvent::PlayPressed
        };
        self.apply_intent(event, predictor);
        self.flush(predictor);
    }

    pub fn play(&mut self, predictor: &mut dyn NextTrackPredictor) {
        if !self.intent.is_playing() {
            self.apply_intent(IntentEvent::PlayPressed, predictor);
            self.flush(predictor);
        }
    }

    pub fn pause(&mut self, predictor: &mut dyn NextTrackPredictor) {
        self.apply_intent(IntentEvent::PausePressed, predictor);
        self.flush(predictor);
    }

    /// Seek the current track
    pub fn seek(&mut self, position_ms: u64) -> Result<()> {
        if !self.seekable {
            return Err(PlaybackError::Unseekable);
        }
        match self.current.as_mut() {
            Some(current) => {
                debug!("Seeking {} to {}ms", current.id(), position_ms);
                current.seek(position_ms);
            }
            None => debug!("Nothing to seek"),
        }
        Ok(())
    }

    /// Store new settings and forward them to the current session
    pub fn update_playback_settings(
        &mut self,
        settings: PlaybackSettings,
        predictor: &mut dyn NextTrackPredictor,
    ) -> Result<()> {
        settings.validate()?;
        if settings == self.settings {
            return Ok(());
        }
        self.settings = settings;
        if let Some(current) = self.current.as_mut() {
            current.update_playback_settings(settings);
        }
        self.bus
            .emit(PlayerEvent::PlaybackSettingsChanged { settings });
        self.flush(predictor);
        Ok(())
    }

    /// The predictor's answer went stale
    ///
    /// With `current_impacted` both sessions are dropped and playback
    /// restarts from the new prediction; otherwise only the lookahead is
    /// rebuilt.
    pub fn on_prediction_changed(
        &mut self,
        current_impacted: bool,
        predictor: &mut dyn NextTrackPredictor,
    ) {
        self.failed_lookahead = None;
        if current_impacted {
            debug!("Current track changed, rebuilding sessions");
            if let Some(next) = self.next.take() {
                self.retire_to_pool(next);
            }
            if let Some(current) = self.current.take() {
                self.retire_to_pool(current);
            }
            self.skip(predictor);
        } else {
            self.refresh_lookahead(predictor);
        }
        self.flush(predictor);
    }

    /// Handle one message from the event loop
    pub fn dispatch(&mut self, message: Message, predictor: &mut dyn NextTrackPredictor) {
        match message {
            Message::Native {
                session,
                generation,
                event,
            } => match self.live_session(session, generation) {
                Some(target) => target.on_native(event),
                None => trace!("Dropping stale {:?} for {}", event, session),
            },
            Message::SessionTimer {
                session,
                generation,
                task,
            } => match self.live_session(session, generation) {
                Some(target) => target.on_timer(task),
                None => trace!("Dropping stale {:?} for {}", task, session),
            },
            Message::EngineTimer(EngineTask::TimestampTick) => {
                self.tick = None;
                self.sync_clock();
            }
            Message::Focus(change) => {
                debug!("Audio focus change: {:?}", change);
                self.apply_intent(IntentEvent::Focus(change), predictor);
            }
        }
        self.flush(predictor);
    }

    /// Stop playback and release every native decoder
    ///
    /// The engine stays usable; new sessions are created on demand.
    pub fn destroy(&mut self) {
        info!("Releasing all decoder sessions");
        self.apply_intent(IntentEvent::PlaybackEnded, &mut NoTracks);
        self.stop_clock();

        if let Some(current) = self.current.as_mut() {
            if matches!(
                current.state(),
                SessionState::Started | SessionState::Paused | SessionState::Prepared
            ) {
                current.stop();
            }
        }
        for session in [self.current.take(), self.next.take()].into_iter().flatten() {
            self.retire_to_pool(session);
        }
        for mut session in self.pool.drain(..) {
            if session.state() != SessionState::End {
                session.destroy();
            }
        }

        self.retired = None;
        self.failed_lookahead = None;
        self.focus.abandon();
        self.intent = PlaybackIntent::default();
    }

    // ===== Intent =====

    fn apply_intent(&mut self, event: IntentEvent, predictor: &mut dyn NextTrackPredictor) {
        let before = self.intent;
        let (after, effect) = before.transition(event);
        self.intent = after;
        if before != after {
            debug!("Intent {:?} -> {:?} on {:?}", before, after, event);
        }
        self.emit_intent_flags(before, after);

        match effect {
            Effect::None => {}
            Effect::RequestFocus => self.request_focus(predictor),
            Effect::StartAudio => self.start_audio(predictor),
            Effect::PauseAudio => self.pause_audio(),
        }
        self.sync_clock();
    }

    fn emit_intent_flags(&self, before: PlaybackIntent, after: PlaybackIntent) {
        let playing = (before.is_playing() != after.is_playing()).then(|| {
            PlayerEvent::PlayingChanged {
                playing: after.is_playing(),
            }
        });
        let user = (before.is_user_playing() != after.is_user_playing()).then(|| {
            PlayerEvent::UserPlayingChanged {
                user_playing: after.is_user_playing(),
            }
        });
        // Intent rises before audio, audio falls before intent
        let ordered = if after.is_user_playing() {
            [user, playing]
        } else {
            [playing, user]
        };
        for event in ordered.into_iter().flatten() {
            self.bus.emit(event);
        }
    }

    fn request_focus(&mut self, predictor: &mut dyn NextTrackPredictor) {
        let listener = FocusListener::new(self.handle.clone());
        match self.focus.request(listener) {
            FocusRequest::Granted => {
                self.apply_intent(IntentEvent::Focus(FocusChange::Gained), predictor);
            }
            FocusRequest::Delayed => debug!("Audio focus delayed"),
            FocusRequest::Denied => {
                warn!("Audio focus denied");
                self.apply_intent(IntentEvent::FocusDenied, predictor);
            }
        }
    }

    fn start_audio(&mut self, predictor: &mut dyn NextTrackPredictor) {
        let Some(current) = self.current.as_mut() else {
            self.skip(predictor);
            return;
        };
        current.update_playback_settings(self.settings);
        match current.state() {
            SessionState::Started => {}
            SessionState::Initialized
            | SessionState::Preparing
            | SessionState::Prepared
            | SessionState::Paused
            | SessionState::Stopped => current.start(PrepareMode::Async),
            state => warn!("Cannot start {} in state {:?}", current.id(), state),
        }
    }

    fn pause_audio(&mut self) {
        if let Some(current) = self.current.as_mut() {
            match current.state() {
                SessionState::Started
                | SessionState::Prepared
                | SessionState::Paused
                | SessionState::Preparing
                | SessionState::Initialized
                | SessionState::Stopped => current.pause(),
                state => debug!("Not pausing {} in state {:?}", current.id(), state),
            }
        }
    }

    // ===== Sessions =====

    /// Make the predicted track current
    fn skip(&mut self, predictor: &mut dyn NextTrackPredictor) {
        assert!(self.current.is_none(), "skip while a session is current");
        self.stop_clock();
        self.retired = None;
        self.failed_lookahead = None;

        let mut target = predictor.predict_next_track(true);
        let mut session = match (target.as_ref(), self.next.take()) {
            (Some(wanted), Some(mut next)) if next.playable() == Some(wanted) => {
                debug!("Promoting {} for {}", next.id(), wanted);
                next.cancel_continuation();
                Some(next)
            }
            (_, stale) => {
                if let Some(stale) = stale {
                    self.retire_to_pool(stale);
                }
                None
            }
        };

        // Content that cannot even be opened is skipped like a track error
        let mut rejected: Vec<Playable> = Vec::new();
        while session.is_none() {
            let Some(candidate) = target.take() else {
                break;
            };
            if rejected.contains(&candidate) {
                warn!("No remaining track can be opened");
                break;
            }
            session = self.open_current(candidate.clone());
            if session.is_none() {
                rejected.push(candidate);
                target = predictor.predict_next_track(true);
            }
        }

        match session {
            Some(mut session) => {
                info!("Now playing {}", session);
                session.update_playback_settings(self.settings);
                if self.intent.is_playing() {
                    session.start(PrepareMode::Async);
                } else if matches!(
                    session.state(),
                    SessionState::Initialized | SessionState::Stopped
                ) {
                    session.preload(PrepareMode::Async);
                }
                let seekable = session.is_seekable();
                let duration = session.duration_ms();
                self.current = Some(session);
                self.set_seekable(seekable);
                if let Some(duration_ms) = duration {
                    self.bus.emit(PlayerEvent::DurationAvailable { duration_ms });
                }
            }
            None => {
                info!("Nothing left to play");
                self.set_seekable(true);
                self.apply_intent(IntentEvent::PlaybackEnded, predictor);
            }
        }

        self.trim_pool();
        self.refresh_lookahead(predictor);
    }

    fn open_current(&mut self, target: Playable) -> Option<DecoderSession> {
        match self.build_session(target.clone()) {
            Ok(session) => Some(session),
            Err(e) => {
                error!("Cannot open {}: {}", target, e);
                self.bus.emit(PlayerEvent::PlaybackError {
                    code: error_code(&e),
                });
                None
            }
        }
    }

    /// Rebuild the session that follows the current one
    fn refresh_lookahead(&mut self, predictor: &mut dyn NextTrackPredictor) {
        if let Some(stale) = self.next.take() {
            self.retire_to_pool(stale);
        }
        if !self.current.as_ref().is_some_and(can_link) {
            return;
        }
        if predictor.is_looping() {
            if let Some(current) = self.current.as_mut() {
                debug!("{} loops natively", current.id());
                current.set_next(HandOff::Loop);
            }
            return;
        }

        let failed = self.failed_lookahead.clone();
        let target = predictor.predict_next_track(false).filter(|target| {
            let retry = failed.as_ref() == Some(target);
            if retry {
                debug!("Not preparing failed lookahead {} again", target);
            }
            !retry
        });
        let mut next = match target {
            None => None,
            Some(target) => match self.build_session(target.clone()) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Cannot open lookahead {}: {}", target, e);
                    self.failed_lookahead = Some(target);
                    None
                }
            },
        };
        if let Some(session) = next.as_mut() {
            session.update_playback_settings(self.settings);
            session.preload(PrepareMode::Async);
        }

        let Some(current) = self.current.as_mut() else {
            return;
        };
        match next {
            Some(mut session)
                if matches!(
                    session.state(),
                    SessionState::Preparing | SessionState::Prepared
                ) =>
            {
                debug!("Preparing {} behind {}", session, current.id());
                current.set_next(HandOff::To(&mut session));
                self.next = Some(session);
            }
            Some(session) => {
                // Failed on the spot; its callbacks mark it as a failed lookahead
                current.set_next(HandOff::Clear);
                self.next = Some(session);
            }
            None => current.set_next(HandOff::Clear),
        }
    }

    /// Reuse a pooled session or create one, bound to `playable`
    fn build_session(
        &mut self,
        playable: Playable,
    ) -> std::result::Result<DecoderSession, DecoderError> {
        let mut session = match self.pool.pop_front() {
            Some(session) => session,
            None => {
                let id = SessionId(self.next_session_id);
                self.next_session_id += 1;
                DecoderSession::create(id, self.backend.as_mut(), self.handle.clone(), self.output)?
            }
        };
        if let Err(e) = session.initialize(playable) {
            self.pool.push_back(session);
            return Err(e);
        }
        Ok(session)
    }

    /// Park a session we no longer need
    fn retire_to_pool(&mut self, mut session: DecoderSession) {
        let dropped = session.take_callbacks();
        if !dropped.is_empty() {
            trace!("{} retired with {} pending callbacks", session.id(), dropped.len());
        }
        match session.state() {
            SessionState::End => {}
            SessionState::Idle => self.pool.push_back(session),
            _ => {
                session.recycle();
                self.pool.push_back(session);
            }
        }
    }

    fn trim_pool(&mut self) {
        while self.pool.len() > self.pool_retention {
            let Some(mut session) = self.pool.pop_front() else {
                break;
            };
            if session.state() != SessionState::End {
                session.destroy();
            }
        }
    }

    fn clear_hand_off(&mut self) {
        if let Some(current) = self.current.as_mut() {
            if can_link(current) && !current.is_looping() {
                current.set_next(HandOff::Clear);
            }
        }
    }

    fn set_seekable(&mut self, seekable: bool) {
        if self.seekable != seekable {
            self.seekable = seekable;
            self.bus.emit(PlayerEvent::SeekableChanged { seekable });
        }
    }

    fn role_of(&self, id: SessionId) -> Role {
        if self.current.as_ref().is_some_and(|s| s.id() == id) {
            Role::Current
        } else if self.next.as_ref().is_some_and(|s| s.id() == id) {
            Role::Next
        } else if self.pool.iter().any(|s| s.id() == id) {
            Role::Pooled
        } else {
            Role::Unknown
        }
    }

    fn live_session(&mut self, id: SessionId, generation: u64) -> Option<&mut DecoderSession> {
        self.current
            .iter_mut()
            .chain(self.next.iter_mut())
            .chain(self.pool.iter_mut())
            .find(|s| s.id() == id && s.generation() == generation)
    }

    /// Take a session out of whatever slot holds it
    fn detach(&mut self, id: SessionId, role: Role) -> Option<DecoderSession> {
        match role {
            Role::Current => {
                let session = self.current.take()?;
                self.retired = Some(Retired {
                    id,
                    playable: session.playable().cloned(),
                });
                self.stop_clock();
                Some(session)
            }
            Role::Next => {
                let session = self.next.take();
                self.clear_hand_off();
                session
            }
            Role::Pooled => {
                let index = self.pool.iter().position(|s| s.id() == id)?;
                self.pool.remove(index)
            }
            Role::Unknown => None,
        }
    }

    // ===== Callbacks =====

    fn flush(&mut self, predictor: &mut dyn NextTrackPredictor) {
        loop {
            while let Some((id, callbacks)) = self.take_pending() {
                for callback in callbacks {
                    self.on_callback(id, callback, predictor);
                }
            }
            // Only once the failed session's batch is drained, so it can be reused
            if !std::mem::take(&mut self.orphaned_hand_off) {
                break;
            }
            if self.current.is_none() && self.next.is_none() && self.retired.is_none() {
                warn!("Lookahead failed after the hand-off, advancing without it");
                self.advance(Completion::HandedOff, None, predictor);
            }
        }
    }

    fn take_pending(&mut self) -> Option<(SessionId, Vec<SessionCallback>)> {
        self.current
            .iter_mut()
            .chain(self.next.iter_mut())
            .chain(self.pool.iter_mut())
            .find(|s| s.has_callbacks())
            .map(|s| (s.id(), s.take_callbacks()))
    }

    fn on_callback(
        &mut self,
        id: SessionId,
        callback: SessionCallback,
        predictor: &mut dyn NextTrackPredictor,
    ) {
        let role = self.role_of(id);
        trace!("{} ({:?}): {:?}", id, role, callback);
        match callback {
            SessionCallback::RecycleSelf => {
                if role != Role::Pooled {
                    if let Some(session) = self.detach(id, role) {
                        self.pool.push_back(session);
                        self.trim_pool();
                    }
                }
            }
            SessionCallback::DestroySelf => {
                if self.detach(id, role).is_some() {
                    debug!("Dropped destroyed {}", id);
                }
            }
            SessionCallback::InternalError(code) | SessionCallback::TrackError(code) => {
                self.on_session_error(id, role, code);
            }
            SessionCallback::CompletedPlaying(completion) => {
                self.on_completed(id, completion, predictor);
            }
            SessionCallback::StartedAsNext => self.on_started_as_next(id, role, predictor),
            SessionCallback::LinkReady { owner } => self.on_link_ready(id, owner),
            other if role == Role::Current => self.on_current_callback(other),
            SessionCallback::DurationAvailable(_) => {}
            other => debug!("Ignoring {:?} from {} ({:?})", other, id, role),
        }
    }

    fn on_current_callback(&mut self, callback: SessionCallback) {
        let event = match callback {
            SessionCallback::DecreasedPerformance => PlayerEvent::DecreasedPerformance,
            SessionCallback::BufferStatus(fraction) => PlayerEvent::BufferProgress { fraction },
            SessionCallback::Buffering(slow) => PlayerEvent::BufferingSlowChanged { slow },
            SessionCallback::MetadataUpdate => PlayerEvent::MetadataUpdated,
            SessionCallback::LiveData(text) => PlayerEvent::LiveInfo { text },
            SessionCallback::DurationAvailable(duration_ms) => {
                PlayerEvent::DurationAvailable { duration_ms }
            }
            SessionCallback::Unseekable => {
                self.set_seekable(false);
                return;
            }
            SessionCallback::NewTimestamp(timestamp) => {
                self.set_timestamp(Some(timestamp));
                return;
            }
            SessionCallback::SeekCompleted => {
                self.bus.emit(PlayerEvent::SeekCompleted);
                if let Some(position_ms) = self.current.as_mut().map(DecoderSession::position_ms) {
                    self.bus.emit(PlayerEvent::TimestampChanged { position_ms });
                }
                return;
            }
            other => {
                debug!("Unhandled callback {:?}", other);
                return;
            }
        };
        self.bus.emit(event);
    }

    fn on_session_error(&mut self, id: SessionId, role: Role, code: ErrorCode) {
        match role {
            Role::Next => {
                warn!("Lookahead {} failed with {:?}", id, code);
                self.failed_lookahead = self.next.as_ref().and_then(|s| s.playable().cloned());
                if let Some(next) = self.next.take() {
                    self.retire_to_pool(next);
                    self.trim_pool();
                }
                self.clear_hand_off();
                if self.current.is_none() && self.retired.is_none() {
                    self.orphaned_hand_off = true;
                }
            }
            Role::Current => {
                error!("{} failed with {:?}", id, code);
                self.bus.emit(PlayerEvent::PlaybackError { code });
            }
            Role::Pooled | Role::Unknown => {
                debug!("Ignoring {:?} from {} ({:?})", code, id, role);
            }
        }
    }

    fn on_completed(
        &mut self,
        id: SessionId,
        completion: Completion,
        predictor: &mut dyn NextTrackPredictor,
    ) {
        if self.current.is_some() || !self.retired.as_ref().is_some_and(|r| r.id == id) {
            trace!("Ignoring completion of {}", id);
            return;
        }
        let failed = self.retired.take().and_then(|r| r.playable);

        if completion == Completion::HandedOff && self.next.is_some() {
            debug!("{} handed off, waiting for the next session to start", id);
            return;
        }
        if self.next.is_some() {
            self.skip(predictor);
            return;
        }
        self.advance(completion, failed, predictor);
    }

    /// Start whatever the predictor offers now that nothing is current
    fn advance(
        &mut self,
        completion: Completion,
        failed: Option<Playable>,
        predictor: &mut dyn NextTrackPredictor,
    ) {
        match predictor.predict_next_track(false) {
            None => {
                info!("Reached the end of playback");
                self.apply_intent(IntentEvent::PlaybackEnded, predictor);
                predictor.on_playback_completed();
            }
            Some(target) if completion == Completion::Failed && failed.as_ref() == Some(&target) => {
                warn!("{} keeps failing, stopping", target);
                self.apply_intent(IntentEvent::PlaybackEnded, predictor);
            }
            Some(target) => {
                if self.failed_lookahead.as_ref() == Some(&target) {
                    debug!("Retrying {} as the current track", target);
                } else {
                    warn!("No lookahead was prepared for {}, starting it cold", target);
                }
                self.skip(predictor);
            }
        }
    }

    fn on_started_as_next(
        &mut self,
        id: SessionId,
        role: Role,
        predictor: &mut dyn NextTrackPredictor,
    ) {
        if role != Role::Next {
            warn!("{} started as next but is {:?}", id, role);
            return;
        }
        let Some(session) = self.next.take() else {
            return;
        };
        if let Some(previous) = self.current.take() {
            self.retire_to_pool(previous);
        }
        self.retired = None;
        self.failed_lookahead = None;
        self.stop_clock();

        info!("Handed off to {}", session);
        let consumed = predictor.predict_next_track(true);
        if consumed.as_ref() != session.playable() {
            warn!(
                "Predictor moved to {:?} while {} took over",
                consumed,
                session
            );
        }

        let seekable = session.is_seekable();
        let duration = session.duration_ms();
        self.current = Some(session);
        let playing = self.intent.is_playing();
        if let Some(current) = self.current.as_mut() {
            current.update_playback_settings(self.settings);
            if !playing {
                // Paused between the hand-off and this start
                current.pause();
            }
        }
        self.set_seekable(seekable);
        if let Some(duration_ms) = duration {
            self.bus.emit(PlayerEvent::DurationAvailable { duration_ms });
        }

        self.refresh_lookahead(predictor);
        self.trim_pool();
    }

    fn on_link_ready(&mut self, id: SessionId, owner: SessionId) {
        match (self.current.as_mut(), self.next.as_ref()) {
            (Some(current), Some(next)) if current.id() == owner && next.id() == id => {
                if current.complete_link(next) {
                    debug!("{} will hand off to {}", owner, id);
                }
            }
            _ => debug!("Dropping stale link from {} to {}", owner, id),
        }
    }

    // ===== Position clock =====

    fn should_tick(&self) -> bool {
        self.position_tick && self.intent.is_playing() && self.timestamp.is_some()
    }

    fn sync_clock(&mut self) {
        if self.should_tick() {
            if self.tick.is_none() {
                self.on_tick();
            }
        } else if let Some(task) = self.tick.take() {
            self.handle.cancel(task);
        }
    }

    fn on_tick(&mut self) {
        let Some(timestamp) = self.timestamp else {
            return;
        };
        let mut position_ms = timestamp.position_at(monotonic_nanos());
        if let Some(duration) = self.duration_ms() {
            position_ms = position_ms.min(duration);
        }
        self.bus.emit(PlayerEvent::TimestampChanged { position_ms });
        let delay = delay_to_next_second(position_ms, timestamp.rate);
        self.tick = Some(
            self.handle
                .post_delayed(Message::EngineTimer(EngineTask::TimestampTick), delay),
        );
    }

    fn set_timestamp(&mut self, timestamp: Option<Timestamp>) {
        if self.timestamp == timestamp {
            return;
        }
        self.timestamp = timestamp;
        self.bus.emit(PlayerEvent::TimestampBaseChanged { timestamp });
        if let Some(task) = self.tick.take() {
            self.handle.cancel(task);
        }
        self.sync_clock();
    }

    fn stop_clock(&mut self) {
        self.set_timestamp(None);
    }
}

impl std::fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("intent", &self.intent)
            .field("current", &self.current.as_ref().map(DecoderSession::id))
            .field("next", &self.next.as_ref().map(DecoderSession::id))
            .field("pool", &self.pool.len())
            .field("settings", &self.settings)
            .finish()
    }
}

/// The session can have its hand-off target rewired
fn can_link(session: &DecoderSession) -> bool {
    matches!(
        session.state(),
        SessionState::Initialized
            | SessionState::Preparing
            | SessionState::Prepared
            | SessionState::Started
            | SessionState::Paused
            | SessionState::Stopped
    )
}

fn error_code(error: &DecoderError) -> ErrorCode {
    match error {
        DecoderError::Io(_) => ErrorCode::Io,
        DecoderError::Unsupported(_) => ErrorCode::Unsupported,
        _ => ErrorCode::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{Call, CallLog, RecordingBackend};
    use crate::backend::{DecoderHandle, NativeError, NativeEvent, NativeInfo, PlaybackParams};
    use crate::events::Subscription;
    use crate::focus::AlwaysGranted;
    use crate::looper::EventLoop;
    use crate::queue::PlayQueue;
    use crate::types::{LoopingMode, Track};
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    struct Fixture {
        engine: TransitionEngine,
        queue: PlayQueue,
        event_loop: EventLoop,
        backend: RecordingBackend,
        log: CallLog,
        events: Subscription,
    }

    impl Fixture {
        fn new(config: PlayerConfig) -> Self {
            Self::with_focus(config, Box::new(AlwaysGranted))
        }

        fn with_focus(config: PlayerConfig, focus: Box<dyn AudioFocus>) -> Self {
            let event_loop = EventLoop::new();
            let log = CallLog::default();
            let backend = RecordingBackend::new(log.clone());
            let bus = EventBus::new(config.initial_settings);
            let queue = PlayQueue::new(&config, bus.clone());
            let engine = TransitionEngine::new(
                &config,
                Box::new(backend.clone()),
                focus,
                event_loop.handle(),
                bus.clone(),
            );
            let events = bus.subscribe();
            events.drain();
            Self {
                engine,
                queue,
                event_loop,
                backend,
                log,
                events,
            }
        }

        fn pump(&mut self) {
            while let Some(message) = self.event_loop.next_message(Instant::now()) {
                self.engine.dispatch(message, &mut self.queue);
            }
        }

        fn load(&mut self, names: &[&str]) {
            let tracks = names
                .iter()
                .map(|name| Track::new(*name, format!("/music/{}.flac", name)))
                .collect();
            let change = self.queue.set_playlist(tracks);
            self.engine
                .on_prediction_changed(change.current_impacted, &mut self.queue);
            self.pump();
        }

        fn play(&mut self) {
            self.engine.play(&mut self.queue);
            self.pump();
        }

        fn send(&mut self, handle: u64, event: NativeEvent) {
            self.backend.send(DecoderHandle(handle), event);
            self.pump();
        }

        fn current_locator(&self) -> Option<String> {
            self.engine
                .current_session()
                .and_then(DecoderSession::playable)
                .map(|p| p.locator().to_string())
        }

        fn current_handle(&self) -> Option<u64> {
            self.engine.current_session().map(|s| s.decoder_handle().0)
        }
    }

    /// Loads a,b,c and plays until a is started with b wired behind it
    fn playing_abc() -> Fixture {
        let mut f = Fixture::new(PlayerConfig::default());
        f.load(&["a", "b", "c"]);
        f.play();
        f.send(1, NativeEvent::Prepared);
        f.send(2, NativeEvent::Prepared);
        f.events.drain();
        f
    }

    fn playing_changes(events: &[PlayerEvent]) -> Vec<bool> {
        events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::PlayingChanged { playing } => Some(*playing),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_play_starts_current_and_links_lookahead() {
        let mut f = Fixture::new(PlayerConfig::default());
        f.load(&["a", "b", "c"]);
        assert_eq!(f.backend.created(), 2);
        assert_eq!(f.current_locator().as_deref(), Some("/music/a.flac"));

        f.play();
        assert_eq!(playing_changes(&f.events.drain()), vec![true]);

        f.send(1, NativeEvent::Prepared);
        assert_eq!(
            f.engine.current_session().unwrap().state(),
            SessionState::Started
        );
        f.send(2, NativeEvent::Prepared);
        assert!(f
            .log
            .calls(DecoderHandle(1))
            .contains(&Call::SetNext(Some(DecoderHandle(2)))));
        assert!(f.engine.current_session().unwrap().is_handing_off());
    }

    #[test]
    fn test_gapless_hand_off_keeps_playing() {
        let mut f = playing_abc();

        f.send(1, NativeEvent::Completion);
        f.send(2, NativeEvent::Info(NativeInfo::StartedAsNext));

        let events = f.events.drain();
        assert!(playing_changes(&events).is_empty());
        assert!(f.engine.is_playing());
        assert_eq!(f.current_handle(), Some(2));
        assert!(events.contains(&PlayerEvent::DurationAvailable {
            duration_ms: 180_000
        }));
        assert!(events.contains(&PlayerEvent::PlaylistAdvanced {
            old: Some(0),
            new: 1
        }));
        assert!(!events
            .iter()
            .any(|e| matches!(e, PlayerEvent::PlaylistPositionChanged { .. })));

        // The finished session is reused for the new lookahead
        let next = f.engine.next_session().unwrap();
        assert_eq!(next.decoder_handle(), DecoderHandle(1));
        assert_eq!(next.playable().unwrap().locator(), "/music/c.flac");
    }

    #[test]
    fn test_started_as_next_before_completion() {
        let mut f = playing_abc();

        f.backend
            .send(DecoderHandle(2), NativeEvent::Info(NativeInfo::StartedAsNext));
        f.backend.send(DecoderHandle(1), NativeEvent::Completion);
        f.pump();

        assert!(playing_changes(&f.events.drain()).is_empty());
        assert_eq!(f.current_handle(), Some(2));
        assert_eq!(f.current_locator().as_deref(), Some("/music/b.flac"));
        assert_eq!(f.queue.position(), Some(1));
    }

    #[test]
    fn test_end_of_playlist_stops() {
        let mut f = Fixture::new(PlayerConfig::default());
        f.load(&["a"]);
        f.play();
        f.send(1, NativeEvent::Prepared);
        f.events.drain();

        f.send(1, NativeEvent::Completion);

        let events = f.events.drain();
        assert_eq!(playing_changes(&events), vec![false]);
        assert!(events.contains(&PlayerEvent::UserPlayingChanged {
            user_playing: false
        }));
        assert!(f.engine.current_session().is_none());
        assert!(!f.engine.is_user_playing());
    }

    #[test]
    fn test_single_entry_playlist_loops_natively() {
        let config = PlayerConfig {
            looping_mode: LoopingMode::Playlist,
            ..PlayerConfig::default()
        };
        let mut f = Fixture::new(config);
        f.load(&["a"]);
        f.play();
        f.send(1, NativeEvent::Prepared);

        assert_eq!(f.backend.created(), 1);
        assert!(f.log.calls(DecoderHandle(1)).contains(&Call::SetLooping(true)));
        assert!(f.engine.current_session().unwrap().is_looping());
    }

    #[test]
    fn test_lookahead_error_is_absorbed() {
        let mut f = Fixture::new(PlayerConfig::default());
        f.load(&["a", "b", "c"]);
        f.play();
        f.send(1, NativeEvent::Prepared);
        f.events.drain();

        f.send(2, NativeEvent::Error(NativeError::Malformed));

        let events = f.events.drain();
        assert!(!events
            .iter()
            .any(|e| matches!(e, PlayerEvent::PlaybackError { .. })));
        assert!(f.engine.next_session().is_none());
        assert!(f.engine.is_playing());
        // No rebuild loop for the broken lookahead
        assert_eq!(f.log.count(&Call::SetDataSource("/music/b.flac".into())), 1);

        // When a ends, b is tried again as the current track
        f.send(1, NativeEvent::Completion);
        assert_eq!(f.current_locator().as_deref(), Some("/music/b.flac"));
        assert_eq!(f.log.count(&Call::SetDataSource("/music/b.flac".into())), 2);
    }

    #[test]
    fn test_current_error_is_reported_and_skipped() {
        let mut f = playing_abc();

        f.send(1, NativeEvent::Error(NativeError::Io));

        let events = f.events.drain();
        assert!(events.contains(&PlayerEvent::PlaybackError {
            code: ErrorCode::Io
        }));
        assert_eq!(f.current_handle(), Some(2));
        assert_eq!(
            f.engine.current_session().unwrap().state(),
            SessionState::Started
        );
        assert!(f.engine.is_playing());
    }

    #[test]
    fn test_server_died_destroys_session() {
        let mut f = playing_abc();

        f.send(1, NativeEvent::Error(NativeError::ServerDied));

        assert!(f.events.drain().contains(&PlayerEvent::PlaybackError {
            code: ErrorCode::ServerDied
        }));
        assert_eq!(f.log.calls(DecoderHandle(1)).last(), Some(&Call::Release));
        assert_eq!(f.current_handle(), Some(2));
        // The destroyed session is never reused
        assert!(f.engine.next_session().unwrap().decoder_handle() != DecoderHandle(1));
    }

    #[test]
    fn test_destroy_releases_every_decoder() {
        let mut f = playing_abc();
        f.send(1, NativeEvent::Completion);
        f.send(2, NativeEvent::Info(NativeInfo::StartedAsNext));

        f.engine.destroy();

        assert_eq!(f.log.count(&Call::Release), f.backend.created());
        assert_eq!(f.engine.pool_len(), 0);
        assert!(f.engine.current_session().is_none());
        assert_eq!(playing_changes(&f.events.drain()), vec![false]);
    }

    #[test]
    fn test_unseekable_track_rejects_seek() {
        let mut f = playing_abc();
        f.engine.seek(5_000).unwrap();
        assert!(f.log.calls(DecoderHandle(1)).contains(&Call::SeekTo(5_000)));

        f.send(1, NativeEvent::Info(NativeInfo::NotSeekable));

        assert!(f
            .events
            .drain()
            .contains(&PlayerEvent::SeekableChanged { seekable: false }));
        assert!(matches!(
            f.engine.seek(1_000),
            Err(PlaybackError::Unseekable)
        ));
    }

    #[test]
    fn test_paused_settings_change_does_not_resume() {
        let mut f = playing_abc();
        f.engine.pause(&mut f.queue);
        f.events.drain();

        let faster = PlaybackSettings::new(0.5, 1.5, 1.0);
        f.engine
            .update_playback_settings(faster, &mut f.queue)
            .unwrap();
        let params = Call::ApplyParams(PlaybackParams {
            speed: 1.5,
            pitch: 1.0,
        });
        assert_eq!(f.log.count(&params), 0);
        assert!(playing_changes(&f.events.drain()).is_empty());

        f.play();
        assert_eq!(f.log.count(&params), 1);
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let mut f = playing_abc();
        let result = f
            .engine
            .update_playback_settings(PlaybackSettings::new(2.0, 1.0, 1.0), &mut f.queue);
        assert!(matches!(result, Err(PlaybackError::InvalidSettings(_))));
        assert_eq!(f.engine.settings(), PlaybackSettings::default());
    }

    #[test]
    fn test_stale_events_are_dropped() {
        let mut f = playing_abc();

        // Sent before the jump recycles both sessions
        f.backend.send(DecoderHandle(1), NativeEvent::Completion);
        let change = f.queue.jump_to(2).unwrap().unwrap();
        f.engine
            .on_prediction_changed(change.current_impacted, &mut f.queue);
        f.pump();

        assert!(f.engine.is_playing());
        assert_eq!(f.current_locator().as_deref(), Some("/music/c.flac"));
        assert!(playing_changes(&f.events.drain()).is_empty());
    }

    #[derive(Clone, Default)]
    struct DelayedFocus {
        listener: Arc<Mutex<Option<FocusListener>>>,
    }

    impl AudioFocus for DelayedFocus {
        fn request(&mut self, listener: FocusListener) -> FocusRequest {
            *self.listener.lock().unwrap() = Some(listener);
            FocusRequest::Delayed
        }

        fn abandon(&mut self) {}
    }

    #[test]
    fn test_delayed_focus_starts_once_granted() {
        let focus = DelayedFocus::default();
        let mut f = Fixture::with_focus(PlayerConfig::default(), Box::new(focus.clone()));
        f.load(&["a", "b"]);

        f.play();
        let events = f.events.drain();
        assert!(playing_changes(&events).is_empty());
        assert!(events.contains(&PlayerEvent::UserPlayingChanged { user_playing: true }));

        let listener = focus.listener.lock().unwrap().clone().unwrap();
        listener.notify(FocusChange::Gained);
        f.pump();

        assert_eq!(playing_changes(&f.events.drain()), vec![true]);
        assert!(f.engine.has_audio_focus());
    }

    #[test]
    fn test_position_ticks_only_while_playing() {
        let mut f = playing_abc();

        f.send(1, NativeEvent::TimeDiscontinuity(Timestamp::now(2_000, 1.0)));

        let events = f.events.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, PlayerEvent::TimestampBaseChanged { timestamp: Some(_) })));
        assert!(events
            .iter()
            .any(|e| matches!(e, PlayerEvent::TimestampChanged { position_ms } if *position_ms >= 2_000)));
        assert_eq!(f.event_loop.pending_timers(), 1);

        f.engine.pause(&mut f.queue);
        assert_eq!(f.event_loop.pending_timers(), 0);
    }

    #[test]
    fn test_pool_trimmed_to_retention() {
        let config = PlayerConfig {
            pool_retention: 0,
            ..PlayerConfig::default()
        };
        let mut f = Fixture::new(config);
        f.load(&["a", "b", "c"]);
        f.play();
        f.send(1, NativeEvent::Prepared);
        f.send(2, NativeEvent::Prepared);

        f.send(1, NativeEvent::Completion);
        f.send(2, NativeEvent::Info(NativeInfo::StartedAsNext));

        assert_eq!(f.engine.pool_len(), 0);
        assert_eq!(f.log.calls(DecoderHandle(1)).last(), Some(&Call::Release));
        assert_eq!(f.engine.next_session().unwrap().decoder_handle(), DecoderHandle(3));
    }
}
