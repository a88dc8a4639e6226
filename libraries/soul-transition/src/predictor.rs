//! Next-track prediction
//!
//! The engine never looks at playlists, repeat modes or shuffle. Whenever it
//! needs to know what plays next it asks a [`NextTrackPredictor`].

use crate::types::Playable;

pub trait NextTrackPredictor {
    /// What plays after the current content
    ///
    /// The first call after a position change answers the current entry
    /// itself. With `consume` the predictor may move on to the returned
    /// entry; without it repeated calls return the same answer.
    fn predict_next_track(&mut self, consume: bool) -> Option<Playable>;

    /// The next content is the current one again (repeat track, or repeat
    /// playlist over a single entry)
    fn is_looping(&self) -> bool;

    /// The engine ran out of content
    fn on_playback_completed(&mut self);
}

/// Predictor with nothing to play
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTracks;

impl NextTrackPredictor for NoTracks {
    fn predict_next_track(&mut self, _consume: bool) -> Option<Playable> {
        None
    }

    fn is_looping(&self) -> bool {
        false
    }

    fn on_playback_completed(&mut self) {}
}
