//! Soul Player - Gapless Transition Engine
//!
//! Platform-agnostic gapless playback on top of native decoders.
//!
//! This crate provides:
//! - Decoder sessions with a strict, checked lifecycle
//! - Dual-session transitions (current + pre-buffered next) with native
//!   hand-off, looping and a pool of reusable sessions
//! - Audio focus handling as an explicit intent state machine
//! - Playlist position model with shuffle, history and looping modes
//! - Event bus with state replay for late subscribers
//! - A threaded runtime with blocking accessors
//!
//! # Architecture
//!
//! `soul-transition` never touches audio itself:
//! - Native decoders come in through [`DecoderBackend`] / [`Decoder`]
//! - Platform audio focus comes in through [`AudioFocus`]
//! - Everything asynchronous is serialized on one [`EventLoop`]
//!
//! ```text
//! control ──▶ MusicPlayer ──▶ PlayQueue (predicts what plays next)
//!                  │
//!                  ▼
//!          TransitionEngine ──▶ DecoderSession (current) ──▶ Decoder
//!                  │          └─▶ DecoderSession (next)    ──▶ Decoder
//!                  ▼
//!              EventBus ──▶ subscribers
//! ```
//!
//! # Example: Platform Integration
//!
//! ```rust,no_run
//! use soul_transition::{
//!     AlwaysGranted, Decoder, DecoderBackend, DecoderError, NativeEventSink, PlayerConfig,
//!     PlayerEvent, PlayerHandle, Track,
//! };
//! use std::time::Duration;
//!
//! struct MyBackend;
//!
//! impl DecoderBackend for MyBackend {
//!     fn create(&mut self, _sink: NativeEventSink) -> Result<Box<dyn Decoder>, DecoderError> {
//!         // Wrap the platform decoder; it reports through the sink
//!         unimplemented!()
//!     }
//! }
//!
//! let player = PlayerHandle::spawn(
//!     PlayerConfig::default(),
//!     Box::new(MyBackend),
//!     Box::new(AlwaysGranted),
//! )?;
//! let events = player.subscribe();
//!
//! player.set_playlist(vec![
//!     Track::new("intro", "/music/01-intro.flac"),
//!     Track::new("theme", "/music/02-theme.flac"),
//! ])?;
//! player.play_or_pause()?;
//!
//! while let Some(event) = events.recv_timeout(Duration::from_secs(1)) {
//!     if let PlayerEvent::PlayingChanged { playing } = event {
//!         println!("playing: {}", playing);
//!     }
//! }
//! player.shutdown()?;
//! # Ok::<(), soul_transition::PlaybackError>(())
//! ```
//!
//! # Example: Playlist Position
//!
//! ```rust
//! use soul_transition::{Playlist, PlaylistChange, Track};
//!
//! let mut playlist = Playlist::new(vec![
//!     Track::new("a", "/a.flac"),
//!     Track::new("b", "/b.flac"),
//!     Track::new("c", "/c.flac"),
//! ]);
//! playlist.set_position(2)?;
//!
//! // Removing the cursor entry wraps the cursor instead of moving it explicitly
//! let (_, change) = playlist.remove(2)?;
//! assert_eq!(change, PlaylistChange::ItemRemoved { index: 2 });
//! assert_eq!(playlist.position(), Some(0));
//! # Ok::<(), soul_transition::PlaybackError>(())
//! ```

mod backend;
mod engine;
mod error;
mod events;
mod focus;
mod history;
mod looper;
mod player;
mod playlist;
mod predictor;
mod queue;
mod runtime;
mod session;
mod shuffle;
pub mod types;

// Public exports
pub use backend::{
    Decoder, DecoderBackend, DecoderError, DecoderHandle, NativeError, NativeEvent,
    NativeEventSink, NativeInfo, PlaybackParams,
};
pub use engine::{EngineTask, TransitionEngine};
pub use error::{PlaybackError, Result};
pub use events::{ErrorCode, EventBus, PlayerEvent, Subscription, SubscriptionId};
pub use focus::{
    AlwaysGranted, AudioFocus, Effect, FocusChange, FocusListener, FocusRequest, IntentEvent,
    PlaybackIntent,
};
pub use history::History;
pub use looper::{EventLoop, LoopHandle, Message, TaskId};
pub use player::MusicPlayer;
pub use playlist::{Playlist, PlaylistChange, PlaylistEntry};
pub use predictor::{NextTrackPredictor, NoTracks};
pub use queue::{PlayQueue, PredictionChange};
pub use runtime::PlayerHandle;
pub use session::{
    Completion, DecoderSession, HandOff, PrepareMode, SessionCallback, SessionId, SessionState,
    SessionTask,
};
pub use shuffle::ShuffleOrder;
pub use types::{
    AudioUsage, ContentType, EntryId, LoopingMode, OutputAttributes, Playable, PlaybackSettings,
    PlayerConfig, Timestamp, Track,
};
