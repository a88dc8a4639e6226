//! Core types shared by the engine, sessions and the play queue

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::error::{PlaybackError, Result};

/// Identity of one playlist entry
///
/// Two entries holding the same track are still different entries, so
/// "is this still the active item" checks compare `EntryId`s, never paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    /// Allocate a process-unique entry id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Track information held by the playlist
///
/// Only `locator` is needed for playback; the rest is carried for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Unique track identifier from the library
    pub id: String,

    /// Content locator handed to the native decoder (path or URI)
    pub locator: String,

    /// Track title
    pub title: String,

    /// Artist name
    pub artist: String,

    /// Album name (optional)
    pub album: Option<String>,

    /// Duration known from the library, if any
    pub duration: Option<Duration>,
}

impl Track {
    /// Minimal track with only an id and a locator
    pub fn new(id: impl Into<String>, locator: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            locator: locator.into(),
            artist: String::new(),
            album: None,
            duration: None,
        }
    }
}

/// Opaque handle to one piece of playable content
///
/// Holds the content locator plus the identity of the playlist entry it came
/// from. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Playable {
    entry: EntryId,
    locator: Arc<str>,
}

impl Playable {
    pub fn new(entry: EntryId, locator: impl Into<Arc<str>>) -> Self {
        Self {
            entry,
            locator: locator.into(),
        }
    }

    /// Playlist entry this content was taken from
    pub fn entry(&self) -> EntryId {
        self.entry
    }

    /// Locator resolved by the native decoder
    pub fn locator(&self) -> &str {
        &self.locator
    }
}

impl fmt::Display for Playable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.entry, self.locator)
    }
}

/// Looping mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopingMode {
    /// Stop after the last entry
    #[default]
    None,

    /// Wrap around to the first entry
    Playlist,

    /// Repeat the current entry forever
    Track,
}

impl std::str::FromStr for LoopingMode {
    type Err = PlaybackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "playlist" | "all" => Ok(Self::Playlist),
            "track" | "one" => Ok(Self::Track),
            other => Err(PlaybackError::InvalidSettings(format!(
                "unknown looping mode '{}'",
                other
            ))),
        }
    }
}

/// Volume, speed and pitch applied to the active session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Linear volume, 0.0 - 1.0
    #[serde(default = "default_unity")]
    pub volume: f32,

    /// Playback rate, 0.0 - 8.0 (0.0 holds output)
    #[serde(default = "default_unity")]
    pub speed: f32,

    /// Pitch multiplier, above 0.0 and up to 8.0
    #[serde(default = "default_unity")]
    pub pitch: f32,
}

impl PlaybackSettings {
    pub const MAX_SPEED: f32 = 8.0;
    pub const MAX_PITCH: f32 = 8.0;

    pub fn new(volume: f32, speed: f32, pitch: f32) -> Self {
        Self {
            volume,
            speed,
            pitch,
        }
    }

    /// Reject values the native decoder cannot take
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(PlaybackError::InvalidSettings(format!(
                "volume {} outside 0.0..=1.0",
                self.volume
            )));
        }
        if !(0.0..=Self::MAX_SPEED).contains(&self.speed) {
            return Err(PlaybackError::InvalidSettings(format!(
                "speed {} outside 0.0..={}",
                self.speed,
                Self::MAX_SPEED
            )));
        }
        if !(self.pitch > 0.0 && self.pitch <= Self::MAX_PITCH) {
            return Err(PlaybackError::InvalidSettings(format!(
                "pitch {} outside (0.0, {}]",
                self.pitch,
                Self::MAX_PITCH
            )));
        }
        Ok(())
    }
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

fn default_unity() -> f32 {
    1.0
}

/// Nanoseconds on the process-wide monotonic clock used by timestamp anchors
pub fn monotonic_nanos() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Ground-truth anchor reported by the decoder
///
/// The playback position at any later instant is extrapolated as
/// `media_ms + elapsed * rate` without asking the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    /// [`monotonic_nanos`] value at which `media_ms` was valid
    pub anchor_nanos: u64,

    /// Media position at the anchor, in milliseconds
    pub media_ms: u64,

    /// Playback rate since the anchor (0.0 while paused)
    pub rate: f32,
}

impl Timestamp {
    pub fn new(anchor_nanos: u64, media_ms: u64, rate: f32) -> Self {
        Self {
            anchor_nanos,
            media_ms,
            rate,
        }
    }

    /// Anchor taken now on the monotonic clock
    pub fn now(media_ms: u64, rate: f32) -> Self {
        Self::new(monotonic_nanos(), media_ms, rate)
    }

    /// Extrapolated media position at `now_nanos`
    pub fn position_at(&self, now_nanos: u64) -> u64 {
        let elapsed_ms = now_nanos.saturating_sub(self.anchor_nanos) as f64 / 1_000_000.0;
        let advanced = (elapsed_ms * f64::from(self.rate.max(0.0))) as u64;
        self.media_ms.saturating_add(advanced)
    }
}

/// Usage reported to the platform with every prepared session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioUsage {
    #[default]
    Media,
    Game,
    Assistant,
}

/// Content type reported to the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Music,
    Speech,
    Movie,
}

/// Playback attributes applied by `preload`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutputAttributes {
    #[serde(default)]
    pub usage: AudioUsage,

    #[serde(default)]
    pub content: ContentType,
}

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Idle sessions kept for reuse; extras are destroyed
    #[serde(default = "default_pool_retention")]
    pub pool_retention: usize,

    /// Settings applied before the first track starts
    #[serde(default)]
    pub initial_settings: PlaybackSettings,

    /// Looping mode at startup
    #[serde(default)]
    pub looping_mode: LoopingMode,

    /// Start with shuffle enabled
    #[serde(default)]
    pub shuffle: bool,

    /// Entries remembered for "previous" while shuffling
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Emit timestamp-changed on every whole second while playing
    #[serde(default = "default_position_tick")]
    pub position_tick: bool,

    /// Attributes passed to the platform when preparing
    #[serde(default)]
    pub output: OutputAttributes,
}

impl PlayerConfig {
    pub fn validate(&self) -> Result<()> {
        self.initial_settings.validate()?;
        if self.history_size == 0 {
            return Err(PlaybackError::InvalidSettings(
                "history_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            pool_retention: default_pool_retention(),
            initial_settings: PlaybackSettings::default(),
            looping_mode: LoopingMode::None,
            shuffle: false,
            history_size: default_history_size(),
            position_tick: default_position_tick(),
            output: OutputAttributes::default(),
        }
    }
}

fn default_pool_retention() -> usize {
    2
}

fn default_history_size() -> usize {
    50
}

fn default_position_tick() -> bool {
    true
}

/// Delay until the next whole second of media time at `rate`
pub(crate) fn delay_to_next_second(position_ms: u64, rate: f32) -> Duration {
    let remaining = 1000 - position_ms % 1000;
    if rate <= 0.0 {
        return Duration::from_millis(remaining);
    }
    Duration::from_secs_f64(remaining as f64 / 1000.0 / f64::from(rate))
}
