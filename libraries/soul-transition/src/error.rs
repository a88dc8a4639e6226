//! Error types for the transition engine

use crate::backend::DecoderError;
use thiserror::Error;

/// Errors returned by the control surface
///
/// These are rejected operations: the call had no effect on player state.
/// Misuse of the session lifecycle is a bug in the caller and panics instead.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// The active track cannot seek
    #[error("Track is not seekable")]
    Unseekable,

    /// Playlist index outside `[0, len)`
    #[error("Index {index} out of bounds for playlist of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Volume, speed or pitch outside the supported range
    #[error("Invalid playback settings: {0}")]
    InvalidSettings(String),

    /// Native decoder refused a synchronous call
    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    /// The player thread is gone
    #[error("Player runtime is not running")]
    Disconnected,

    /// The player thread could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;
