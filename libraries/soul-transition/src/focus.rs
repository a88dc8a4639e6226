//! Audio focus arbitration and playback intent
//!
//! The platform grants exclusive audio output to one application at a time.
//! [`PlaybackIntent`] reconciles that grant with what the user asked for; it
//! is a pure transition function, the engine performs the returned [`Effect`].

use serde::{Deserialize, Serialize};

use crate::looper::{LoopHandle, Message};

/// Focus change reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusChange {
    Gained,
    /// Lost for good; the user has to press play again
    Lost,
    /// Lost for a while; playback resumes when focus comes back
    LostTransient,
    /// Another app plays briefly at reduced volume next to ours
    LostTransientCanDuck,
}

/// Immediate answer to a focus request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusRequest {
    Granted,
    /// Will be granted later through the listener
    Delayed,
    Denied,
}

/// Posts focus changes onto the player's event loop
#[derive(Debug, Clone)]
pub struct FocusListener {
    handle: LoopHandle,
}

impl FocusListener {
    pub(crate) fn new(handle: LoopHandle) -> Self {
        Self { handle }
    }

    /// Report a change; safe to call from any thread
    pub fn notify(&self, change: FocusChange) -> bool {
        self.handle.post(Message::Focus(change))
    }
}

/// Platform audio focus arbiter
pub trait AudioFocus: Send {
    /// Ask for exclusive output; later changes go through `listener`
    fn request(&mut self, listener: FocusListener) -> FocusRequest;

    /// Give focus back
    fn abandon(&mut self);
}

/// Arbiter for hosts that have no competing audio
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysGranted;

impl AudioFocus for AlwaysGranted {
    fn request(&mut self, _listener: FocusListener) -> FocusRequest {
        FocusRequest::Granted
    }

    fn abandon(&mut self) {}
}

/// What the user wants versus what the platform allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackIntent {
    /// Not playing; `focus_held` if the grant is still ours
    Stopped { focus_held: bool },
    /// Play pressed, focus requested but not granted yet
    WaitingForFocus,
    PlayingWithFocus,
    /// Play pressed twice while waiting, or after a transient loss
    PlayingIgnoringFocus,
    /// Paused by a transient loss; resumes on regain
    PausedByFocusLoss,
}

impl Default for PlaybackIntent {
    fn default() -> Self {
        Self::Stopped { focus_held: false }
    }
}

/// Input to [`PlaybackIntent::transition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentEvent {
    PlayPressed,
    PausePressed,
    Focus(FocusChange),
    FocusDenied,
    /// Nothing left to play, or the player is shutting down
    PlaybackEnded,
}

/// Side effect the engine has to perform after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    RequestFocus,
    StartAudio,
    PauseAudio,
}

impl PlaybackIntent {
    /// Audio is flowing
    pub fn is_playing(self) -> bool {
        matches!(self, Self::PlayingWithFocus | Self::PlayingIgnoringFocus)
    }

    /// The user wants audio, whether or not it flows
    pub fn is_user_playing(self) -> bool {
        !matches!(self, Self::Stopped { .. })
    }

    pub fn has_focus(self) -> bool {
        matches!(
            self,
            Self::Stopped { focus_held: true } | Self::PlayingWithFocus
        )
    }

    pub fn ignores_focus(self) -> bool {
        self == Self::PlayingIgnoringFocus
    }

    pub fn transition(self, event: IntentEvent) -> (Self, Effect) {
        use FocusChange::*;
        use IntentEvent::*;
        use PlaybackIntent::*;

        match (self, event) {
            (Stopped { focus_held: true }, PlayPressed) => (PlayingWithFocus, Effect::StartAudio),
            (Stopped { focus_held: false }, PlayPressed) => {
                (WaitingForFocus, Effect::RequestFocus)
            }
            (Stopped { .. }, Focus(Gained)) => (Stopped { focus_held: true }, Effect::None),
            (Stopped { .. }, Focus(Lost | LostTransient)) => {
                (Stopped { focus_held: false }, Effect::None)
            }

            (WaitingForFocus, PlayPressed) => (PlayingIgnoringFocus, Effect::StartAudio),
            (WaitingForFocus, Focus(Gained)) => (PlayingWithFocus, Effect::StartAudio),
            (WaitingForFocus, PausePressed | Focus(Lost) | FocusDenied | PlaybackEnded) => {
                (Stopped { focus_held: false }, Effect::None)
            }

            (PlayingWithFocus, PausePressed) => {
                (Stopped { focus_held: true }, Effect::PauseAudio)
            }
            (PlayingWithFocus, Focus(LostTransient)) => (PausedByFocusLoss, Effect::PauseAudio),
            (PlayingWithFocus, Focus(Lost)) => {
                (Stopped { focus_held: false }, Effect::PauseAudio)
            }
            (PlayingWithFocus, PlaybackEnded) => (Stopped { focus_held: true }, Effect::None),

            (PlayingIgnoringFocus, PausePressed | Focus(Lost)) => {
                (Stopped { focus_held: false }, Effect::PauseAudio)
            }
            (PlayingIgnoringFocus, Focus(Gained)) => (PlayingWithFocus, Effect::None),
            (PlayingIgnoringFocus, PlaybackEnded) => {
                (Stopped { focus_held: false }, Effect::None)
            }

            (PausedByFocusLoss, PlayPressed) => (PlayingIgnoringFocus, Effect::StartAudio),
            (PausedByFocusLoss, Focus(Gained)) => (PlayingWithFocus, Effect::StartAudio),
            (PausedByFocusLoss, PausePressed | Focus(Lost) | PlaybackEnded) => {
                (Stopped { focus_held: false }, Effect::None)
            }

            (state, _) => (state, Effect::None),
        }
    }
}
