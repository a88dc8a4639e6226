//! Player events
//!
//! Everything observers learn about the player goes through the [`EventBus`].
//! The bus keeps a snapshot of the observable state so that a subscriber
//! attaching late first receives a replay of it (playing flags, seekable,
//! buffer progress, settings, last timestamp) and never starts blind.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::trace;

use crate::types::{LoopingMode, PlaybackSettings, Timestamp};

/// Error code carried by playback-error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    ServerDied,
    TimedOut,
    Io,
    Malformed,
    Unsupported,
    NotValidForProgressive,
    Unknown,
}

impl ErrorCode {
    /// The content is at fault, not the device
    pub fn is_track_specific(self) -> bool {
        matches!(
            self,
            Self::Io | Self::Malformed | Self::Unsupported | Self::NotValidForProgressive
        )
    }
}

/// Events emitted by the player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlayerEvent {
    /// Audio started or stopped flowing
    PlayingChanged { playing: bool },

    /// The user's intent changed (may differ from `PlayingChanged` while
    /// waiting for focus or buffering)
    UserPlayingChanged { user_playing: bool },

    /// Live metadata that became current
    LiveInfo { text: String },

    /// Playback position, emitted on seeks and every whole second
    TimestampChanged { position_ms: u64 },

    /// New extrapolation anchor; `None` when nothing is playing
    TimestampBaseChanged { timestamp: Option<Timestamp> },

    SeekableChanged { seekable: bool },

    /// Buffering is slower than playback
    BufferingSlowChanged { slow: bool },

    /// Played plus buffered share, 0.0 - 1.0
    BufferProgress { fraction: f32 },

    DecreasedPerformance,

    /// Error on the audible track
    PlaybackError { code: ErrorCode },

    DurationAvailable { duration_ms: u64 },

    PlaybackSettingsChanged { settings: PlaybackSettings },

    MetadataUpdated,

    SeekCompleted,

    /// A new playlist replaced the old one (lengths, `None` for no playlist)
    PlaylistReplaced {
        old_len: Option<usize>,
        new_len: Option<usize>,
    },

    /// Explicit cursor assignment
    PlaylistPositionChanged {
        old: Option<usize>,
        new: Option<usize>,
    },

    /// The predictor moved on to the next entry while playing through
    PlaylistAdvanced { old: Option<usize>, new: usize },

    PlaylistItemAdded { index: usize },

    PlaylistItemRemoved { index: usize },

    LoopingModeChanged { mode: LoopingMode },

    ShuffleChanged { enabled: bool },
}

/// Identity of one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    receiver: Receiver<PlayerEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn receiver(&self) -> &Receiver<PlayerEvent> {
        &self.receiver
    }

    /// Everything received so far, without blocking
    pub fn drain(&self) -> Vec<PlayerEvent> {
        self.receiver.try_iter().collect()
    }

    /// Wait for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PlayerEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

/// Observable state replayed to new subscribers
#[derive(Debug, Clone)]
struct Snapshot {
    playing: bool,
    user_playing: bool,
    seekable: bool,
    buffering_slow: bool,
    buffer_progress: f32,
    settings: PlaybackSettings,
    timestamp: Option<Timestamp>,
    position_ms: Option<u64>,
    duration_ms: Option<u64>,
}

impl Snapshot {
    fn new(settings: PlaybackSettings) -> Self {
        Self {
            playing: false,
            user_playing: false,
            seekable: true,
            buffering_slow: false,
            buffer_progress: 0.0,
            settings,
            timestamp: None,
            position_ms: None,
            duration_ms: None,
        }
    }

    fn apply(&mut self, event: &PlayerEvent) {
        match event {
            PlayerEvent::PlayingChanged { playing } => self.playing = *playing,
            PlayerEvent::UserPlayingChanged { user_playing } => self.user_playing = *user_playing,
            PlayerEvent::SeekableChanged { seekable } => self.seekable = *seekable,
            PlayerEvent::BufferingSlowChanged { slow } => self.buffering_slow = *slow,
            PlayerEvent::BufferProgress { fraction } => self.buffer_progress = *fraction,
            PlayerEvent::PlaybackSettingsChanged { settings } => self.settings = *settings,
            PlayerEvent::TimestampBaseChanged { timestamp } => {
                self.timestamp = *timestamp;
                if timestamp.is_none() {
                    self.position_ms = None;
                }
            }
            PlayerEvent::TimestampChanged { position_ms } => self.position_ms = Some(*position_ms),
            PlayerEvent::DurationAvailable { duration_ms } => self.duration_ms = Some(*duration_ms),
            _ => {}
        }
    }

    fn replay(&self) -> Vec<PlayerEvent> {
        let mut events = vec![
            PlayerEvent::PlayingChanged {
                playing: self.playing,
            },
            PlayerEvent::UserPlayingChanged {
                user_playing: self.user_playing,
            },
            PlayerEvent::SeekableChanged {
                seekable: self.seekable,
            },
            PlayerEvent::BufferingSlowChanged {
                slow: self.buffering_slow,
            },
            PlayerEvent::BufferProgress {
                fraction: self.buffer_progress,
            },
            PlayerEvent::PlaybackSettingsChanged {
                settings: self.settings,
            },
        ];
        if let Some(duration_ms) = self.duration_ms {
            events.push(PlayerEvent::DurationAvailable { duration_ms });
        }
        if self.timestamp.is_some() {
            events.push(PlayerEvent::TimestampBaseChanged {
                timestamp: self.timestamp,
            });
        }
        if let Some(position_ms) = self.position_ms {
            events.push(PlayerEvent::TimestampChanged { position_ms });
        }
        events
    }
}

struct BusInner {
    subscribers: Vec<(SubscriptionId, Sender<PlayerEvent>)>,
    snapshot: Snapshot,
    next_id: u64,
}

/// Fan-out of player events with replay-on-subscribe
///
/// Cheap to clone; all clones share subscribers and snapshot. Safe to
/// subscribe from any thread while the player emits on its own.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new(settings: PlaybackSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                subscribers: Vec::new(),
                snapshot: Snapshot::new(settings),
                next_id: 1,
            })),
        }
    }

    /// Record `event` in the snapshot and deliver it to every subscriber
    ///
    /// Subscribers whose receiver is gone are dropped.
    pub fn emit(&self, event: PlayerEvent) {
        trace!("Event: {:?}", event);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.snapshot.apply(&event);
        inner
            .subscribers
            .retain(|(_, sender)| sender.send(event.clone()).is_ok());
    }

    /// Attach a subscriber; it receives the state replay before live events
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = unbounded();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        for event in inner.snapshot.replay() {
            // The receiver is still in our hands, this cannot fail
            let _ = sender.send(event);
        }
        inner.subscribers.push((id, sender));
        Subscription { id, receiver }
    }

    /// Detach a subscriber; returns false if it was not attached
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub, _)| *sub != id);
        inner.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(PlaybackSettings::default())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_receives_replay_first() {
        let bus = EventBus::default();
        bus.emit(PlayerEvent::PlayingChanged { playing: true });
        bus.emit(PlayerEvent::SeekableChanged { seekable: false });

        let sub = bus.subscribe();
        let events = sub.drain();
        assert_eq!(events[0], PlayerEvent::PlayingChanged { playing: true });
        assert!(events.contains(&PlayerEvent::SeekableChanged { seekable: false }));
        assert!(events.contains(&PlayerEvent::PlaybackSettingsChanged {
            settings: PlaybackSettings::default()
        }));
        // No anchor yet, so no timestamp replay
        assert!(!events
            .iter()
            .any(|e| matches!(e, PlayerEvent::TimestampBaseChanged { .. })));
    }

    #[test]
    fn test_replay_includes_timestamp_and_duration() {
        let bus = EventBus::default();
        let ts = Timestamp::new(0, 1_000, 1.0);
        bus.emit(PlayerEvent::DurationAvailable { duration_ms: 5_000 });
        bus.emit(PlayerEvent::TimestampBaseChanged {
            timestamp: Some(ts),
        });
        bus.emit(PlayerEvent::TimestampChanged { position_ms: 2_000 });

        let events = bus.subscribe().drain();
        assert!(events.contains(&PlayerEvent::DurationAvailable { duration_ms: 5_000 }));
        assert!(events.contains(&PlayerEvent::TimestampBaseChanged {
            timestamp: Some(ts)
        }));
        assert_eq!(
            events.last(),
            Some(&PlayerEvent::TimestampChanged { position_ms: 2_000 })
        );
    }

    #[test]
    fn test_live_events_follow_replay_in_order() {
        let bus = EventBus::default();
        let sub = bus.subscribe();
        let replayed = sub.drain().len();
        assert_eq!(replayed, 6);

        bus.emit(PlayerEvent::PlaylistItemAdded { index: 0 });
        bus.emit(PlayerEvent::PlaylistItemAdded { index: 1 });
        assert_eq!(
            sub.drain(),
            vec![
                PlayerEvent::PlaylistItemAdded { index: 0 },
                PlayerEvent::PlaylistItemAdded { index: 1 },
            ]
        );
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::default();
        let kept = bus.subscribe();
        let dropped = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(dropped);
        bus.emit(PlayerEvent::DecreasedPerformance);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(kept.drain().contains(&PlayerEvent::DecreasedPerformance));
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::default();
        let sub = bus.subscribe();
        assert!(bus.unsubscribe(sub.id()));
        assert!(!bus.unsubscribe(sub.id()));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_clones_share_subscribers() {
        let bus = EventBus::default();
        let other = bus.clone();
        let sub = bus.subscribe();
        sub.drain();

        other.emit(PlayerEvent::SeekCompleted);
        assert_eq!(sub.drain(), vec![PlayerEvent::SeekCompleted]);
    }

    #[test]
    fn test_error_code_classes() {
        assert!(ErrorCode::Malformed.is_track_specific());
        assert!(ErrorCode::Io.is_track_specific());
        assert!(!ErrorCode::ServerDied.is_track_specific());
        assert!(!ErrorCode::TimedOut.is_track_specific());
    }

    #[test]
    fn test_events_serialize() {
        let json = serde_json::to_string(&PlayerEvent::PlaybackError {
            code: ErrorCode::Malformed,
        })
        .unwrap();
        assert_eq!(json, r#"{"PlaybackError":{"code":"Malformed"}}"#);
    }
}
