//! Play queue
//!
//! [`PlayQueue`] is the [`NextTrackPredictor`] over a [`Playlist`]. It owns
//! the looping mode, the shuffle order and the one-shot "first entry
//! consumed" flag. Every mutation reports whether the engine's view of
//! "what plays now / next" went stale:
//!
//! - `Some(PredictionChange { current_impacted: true })`: the audible entry
//!   itself changed (playlist replaced, explicit jump, cursor entry removed)
//! - `Some(PredictionChange { current_impacted: false })`: only the lookahead
//!   changed
//! - `None`: nothing the engine cares about changed

use tracing::{debug, warn};

use crate::error::{PlaybackError, Result};
use crate::events::{EventBus, PlayerEvent};
use crate::history::History;
use crate::playlist::{Playlist, PlaylistChange};
use crate::predictor::NextTrackPredictor;
use crate::shuffle::ShuffleOrder;
use crate::types::{EntryId, LoopingMode, Playable, PlayerConfig, Track};

/// Tells the engine its prediction went stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionChange {
    pub current_impacted: bool,
}

impl PredictionChange {
    const CURRENT: Self = Self {
        current_impacted: true,
    };
    const LOOKAHEAD: Self = Self {
        current_impacted: false,
    };
}

#[derive(Debug)]
pub struct PlayQueue {
    playlist: Option<Playlist>,
    looping: LoopingMode,
    /// Present while shuffle is on
    shuffle: Option<ShuffleOrder>,
    /// The cursor entry has been handed out for playback
    consumed_first: bool,
    history: History,
    bus: EventBus,
}

impl PlayQueue {
    pub fn new(config: &PlayerConfig, bus: EventBus) -> Self {
        Self {
            playlist: None,
            looping: config.looping_mode,
            shuffle: config.shuffle.then(ShuffleOrder::default),
            consumed_first: false,
            history: History::new(config.history_size),
            bus,
        }
    }

    pub fn playlist(&self) -> Option<&Playlist> {
        self.playlist.as_ref()
    }

    pub fn position(&self) -> Option<usize> {
        self.playlist.as_ref().and_then(Playlist::position)
    }

    pub fn looping_mode(&self) -> LoopingMode {
        self.looping
    }

    pub fn is_shuffled(&self) -> bool {
        self.shuffle.is_some()
    }

    // ===== Mutations =====

    /// Replace the playlist; the cursor starts on the first track
    pub fn set_playlist(&mut self, tracks: Vec<Track>) -> PredictionChange {
        self.replace(Some(Playlist::new(tracks)))
    }

    /// Drop the playlist entirely
    pub fn clear(&mut self) -> PredictionChange {
        self.replace(None)
    }

    fn replace(&mut self, playlist: Option<Playlist>) -> PredictionChange {
        let old_len = self.playlist.as_ref().map(Playlist::len);
        let new_len = playlist.as_ref().map(Playlist::len);
        self.playlist = playlist;
        self.consumed_first = false;
        self.history.clear();
        self.reshuffle();
        debug!("Playlist replaced ({:?} -> {:?} entries)", old_len, new_len);
        self.bus
            .emit(PlayerEvent::PlaylistReplaced { old_len, new_len });
        PredictionChange::CURRENT
    }

    /// Explicitly move the cursor to `index`
    pub fn jump_to(&mut self, index: usize) -> Result<Option<PredictionChange>> {
        self.move_to(index, true)
    }

    /// Neighbouring entry; wraps only when looping the playlist
    pub fn next(&mut self) -> Option<PredictionChange> {
        let playlist = self.playlist.as_ref()?;
        let current = playlist.position()?;
        let target = self.following(playlist, current)?;
        self.move_to(target, true).ok().flatten()
    }

    /// Previous entry; while shuffling, the most recently played one
    pub fn prev(&mut self) -> Option<PredictionChange> {
        let playlist = self.playlist.as_ref()?;
        let current = playlist.position()?;
        let current_id = playlist.entry(current)?.id;

        let target = match &self.shuffle {
            Some(order) => self
                .history
                .pop_until(|id| id != current_id && playlist.index_of(id).is_some())
                .or_else(|| order.previous_before(current_id))
                .and_then(|id| playlist.index_of(id))?,
            None if current > 0 => current - 1,
            None if self.looping == LoopingMode::Playlist => playlist.len() - 1,
            None => return None,
        };
        self.move_to(target, false).ok().flatten()
    }

    /// Insert `track` before `index`
    pub fn insert(&mut self, index: usize, track: Track) -> Result<Option<PredictionChange>> {
        let before = self.lookahead_key();
        let playlist = self.playlist.get_or_insert_with(Playlist::default);
        let was_empty = playlist.is_empty();
        let change = playlist.insert(index, track)?;
        let added = playlist.entry(index).map(|entry| entry.id);
        let current = playlist.current().map(|entry| entry.id);

        if was_empty {
            self.reshuffle();
        } else if let (Some(order), Some(added)) = (self.shuffle.as_mut(), added) {
            order.insert_ahead_of(added, current);
        }
        self.emit_change(change);

        if was_empty {
            self.consumed_first = false;
            return Ok(Some(PredictionChange::CURRENT));
        }
        Ok(self.compare(before))
    }

    /// Append `track`
    pub fn push(&mut self, track: Track) -> Option<PredictionChange> {
        let len = self.playlist.as_ref().map_or(0, Playlist::len);
        // Appending is always in range
        self.insert(len, track).ok().flatten()
    }

    /// Remove the entry at `index`
    pub fn remove(&mut self, index: usize) -> Result<Option<PredictionChange>> {
        let before = self.lookahead_key();
        let playlist = self
            .playlist
            .as_mut()
            .ok_or(PlaybackError::IndexOutOfBounds { index, len: 0 })?;
        let was_current = playlist.position() == Some(index);
        let (removed, change) = playlist.remove(index)?;

        if let Some(order) = self.shuffle.as_mut() {
            order.remove(removed.id);
        }
        self.emit_change(change);

        if was_current {
            self.consumed_first = false;
            return Ok(Some(PredictionChange::CURRENT));
        }
        Ok(self.compare(before))
    }

    pub fn set_looping_mode(&mut self, mode: LoopingMode) -> Option<PredictionChange> {
        if mode == self.looping {
            return None;
        }
        let before = self.lookahead_key();
        self.looping = mode;
        self.bus.emit(PlayerEvent::LoopingModeChanged { mode });
        self.compare(before)
    }

    pub fn set_shuffle(&mut self, enabled: bool) -> Option<PredictionChange> {
        if enabled == self.is_shuffled() {
            return None;
        }
        let before = self.lookahead_key();
        self.shuffle = enabled.then(ShuffleOrder::default);
        self.reshuffle();
        self.bus.emit(PlayerEvent::ShuffleChanged { enabled });
        self.compare(before)
    }

    // ===== Internals =====

    fn move_to(&mut self, index: usize, remember: bool) -> Result<Option<PredictionChange>> {
        let playlist = self
            .playlist
            .as_mut()
            .ok_or(PlaybackError::IndexOutOfBounds { index, len: 0 })?;
        let previous = playlist.current().map(|entry| entry.id);
        let Some(change) = playlist.set_position(index)? else {
            return Ok(None);
        };

        if let (true, Some(previous)) = (remember, previous) {
            self.history.push(previous);
        }
        self.emit_change(change);
        self.consumed_first = false;
        Ok(Some(PredictionChange::CURRENT))
    }

    /// Strict successor of `current`, honouring shuffle and playlist looping
    fn following(&self, playlist: &Playlist, current: usize) -> Option<usize> {
        match &self.shuffle {
            Some(order) => {
                let id = playlist.entry(current)?.id;
                let next = order.next_after(id).or_else(|| {
                    (self.looping == LoopingMode::Playlist)
                        .then(|| order.first())
                        .flatten()
                })?;
                playlist.index_of(next)
            }
            None if current + 1 < playlist.len() => Some(current + 1),
            None if self.looping == LoopingMode::Playlist => Some(0),
            None => None,
        }
    }

    /// Index the next `predict_next_track` call answers
    fn peek(&self) -> Option<usize> {
        let playlist = self.playlist.as_ref()?;
        let current = playlist.position()?;
        if !self.consumed_first || self.is_looping() {
            return Some(current);
        }
        self.following(playlist, current)
    }

    fn lookahead_key(&self) -> (bool, Option<EntryId>) {
        let next = self
            .peek()
            .and_then(|index| self.playlist.as_ref()?.entry(index))
            .map(|entry| entry.id);
        (self.is_looping(), next)
    }

    fn compare(&self, before: (bool, Option<EntryId>)) -> Option<PredictionChange> {
        (self.lookahead_key() != before).then_some(PredictionChange::LOOKAHEAD)
    }

    fn reshuffle(&mut self) {
        if self.shuffle.is_none() {
            return;
        }
        let order = self.playlist.as_ref().map(|playlist| {
            let ids: Vec<EntryId> = playlist.entries().iter().map(|entry| entry.id).collect();
            ShuffleOrder::new(&ids, playlist.current().map(|entry| entry.id))
        });
        self.shuffle = Some(order.unwrap_or_default());
    }

    fn emit_change(&self, change: PlaylistChange) {
        let event = match change {
            PlaylistChange::PositionChanged { old, new } => {
                PlayerEvent::PlaylistPositionChanged { old, new }
            }
            PlaylistChange::ItemAdded { index } => PlayerEvent::PlaylistItemAdded { index },
            PlaylistChange::ItemRemoved { index } => PlayerEvent::PlaylistItemRemoved { index },
        };
        self.bus.emit(event);
    }
}

impl NextTrackPredictor for PlayQueue {
    fn predict_next_track(&mut self, consume: bool) -> Option<Playable> {
        let index = self.peek()?;
        let playlist = self.playlist.as_mut()?;
        let entry = playlist.entry(index)?;
        let playable = entry.playable();
        let id = entry.id;

        if !consume {
            return Some(playable);
        }
        if !self.consumed_first {
            self.consumed_first = true;
            return Some(playable);
        }
        if playlist.position() == Some(index) {
            return Some(playable);
        }

        let old = match playlist.advance_to(index) {
            Ok(old) => old,
            Err(e) => {
                warn!("Cannot advance to {}: {}", index, e);
                return None;
            }
        };
        let old_id = old.and_then(|i| playlist.entry(i)).map(|entry| entry.id);
        if let Some(old_id) = old_id {
            self.history.push(old_id);
        }
        // Wrapped past the end of the shuffle order: start a fresh round
        let wrapped = match (self.shuffle.as_ref(), old_id) {
            (Some(order), Some(old_id)) => order.next_after(old_id) != Some(id),
            _ => false,
        };
        if wrapped {
            let ids: Vec<EntryId> = playlist.entries().iter().map(|entry| entry.id).collect();
            self.shuffle = Some(ShuffleOrder::new(&ids, Some(id)));
        }
        debug!("Advanced to {} ({:?} -> {})", playable, old, index);
        self.bus
            .emit(PlayerEvent::PlaylistAdvanced { old, new: index });
        Some(playable)
    }

    fn is_looping(&self) -> bool {
        match self.looping {
            LoopingMode::Track => true,
            LoopingMode::Playlist => self.playlist.as_ref().is_some_and(|p| p.len() == 1),
            LoopingMode::None => false,
        }
    }

    fn on_playback_completed(&mut self) {
        self.consumed_first = false;
    }
}
