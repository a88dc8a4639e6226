//! Playlist position model
//!
//! An ordered list of entries with a single cursor. The cursor is always a
//! valid index, or `None` exactly when the list is empty.
//!
//! Only an explicit [`Playlist::set_position`] reports a position change.
//! Inserting or removing entries shifts the cursor structurally and reports
//! the insertion or removal instead; removing the entry under the cursor
//! moves the cursor to `old % new_len`.

use crate::error::{PlaybackError, Result};
use crate::types::{EntryId, Playable, Track};

/// One slot in the playlist
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub id: EntryId,
    pub track: Track,
}

impl PlaylistEntry {
    pub fn new(track: Track) -> Self {
        Self {
            id: EntryId::next(),
            track,
        }
    }

    /// Content handle for this entry
    pub fn playable(&self) -> Playable {
        Playable::new(self.id, self.track.locator.as_str())
    }
}

/// Structural change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistChange {
    PositionChanged {
        old: Option<usize>,
        new: Option<usize>,
    },
    ItemAdded {
        index: usize,
    },
    ItemRemoved {
        index: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
    cursor: Option<usize>,
}

impl Playlist {
    /// Playlist with the cursor on the first track (if any)
    pub fn new(tracks: Vec<Track>) -> Self {
        let entries: Vec<PlaylistEntry> = tracks.into_iter().map(PlaylistEntry::new).collect();
        let cursor = if entries.is_empty() { None } else { Some(0) };
        Self { entries, cursor }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Track at `index`, `None` out of range
    pub fn get(&self, index: usize) -> Option<&Track> {
        self.entries.get(index).map(|entry| &entry.track)
    }

    pub fn entry(&self, index: usize) -> Option<&PlaylistEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn position(&self) -> Option<usize> {
        self.cursor
    }

    /// Entry under the cursor
    pub fn current(&self) -> Option<&PlaylistEntry> {
        self.cursor.and_then(|index| self.entries.get(index))
    }

    pub fn index_of(&self, id: EntryId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    /// Explicitly move the cursor
    ///
    /// `0` on an empty list is accepted as a reset and changes nothing.
    /// Returns the change, or `None` when the cursor already was at `index`.
    pub fn set_position(&mut self, index: usize) -> Result<Option<PlaylistChange>> {
        if self.entries.is_empty() && index == 0 {
            return Ok(None);
        }
        self.check_index(index)?;
        if self.cursor == Some(index) {
            return Ok(None);
        }
        let old = self.cursor.replace(index);
        Ok(Some(PlaylistChange::PositionChanged {
            old,
            new: Some(index),
        }))
    }

    /// Move the cursor as a side effect of playing through the list
    ///
    /// Not an explicit assignment, so no change is reported. Returns the
    /// previous position.
    pub(crate) fn advance_to(&mut self, index: usize) -> Result<Option<usize>> {
        self.check_index(index)?;
        Ok(self.cursor.replace(index))
    }

    /// Insert `track` before `index` (`index == len` appends)
    pub fn insert(&mut self, index: usize, track: Track) -> Result<PlaylistChange> {
        if index > self.entries.len() {
            return Err(PlaybackError::IndexOutOfBounds {
                index,
                len: self.entries.len(),
            });
        }
        self.entries.insert(index, PlaylistEntry::new(track));
        self.cursor = match self.cursor {
            None => Some(0),
            Some(cursor) if index <= cursor => Some(cursor + 1),
            keep => keep,
        };
        Ok(PlaylistChange::ItemAdded { index })
    }

    pub fn push(&mut self, track: Track) -> PlaylistChange {
        let index = self.entries.len();
        self.entries.push(PlaylistEntry::new(track));
        if self.cursor.is_none() {
            self.cursor = Some(0);
        }
        PlaylistChange::ItemAdded { index }
    }

    /// Remove the entry at `index`
    pub fn remove(&mut self, index: usize) -> Result<(PlaylistEntry, PlaylistChange)> {
        self.check_index(index)?;
        let removed = self.entries.remove(index);
        let len = self.entries.len();
        self.cursor = match self.cursor {
            _ if len == 0 => None,
            Some(cursor) if index < cursor => Some(cursor - 1),
            Some(cursor) if index == cursor => Some(cursor % len),
            keep => keep,
        };
        Ok((removed, PlaylistChange::ItemRemoved { index }))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.entries.len() {
            return Err(PlaybackError::IndexOutOfBounds {
                index,
                len: self.entries.len(),
            });
        }
        Ok(())
    }
}
