//! Serialized event stream
//!
//! All engine and session state is owned by whoever drains an [`EventLoop`].
//! Native decoder threads, audio-focus callbacks and delayed tasks never touch
//! that state directly: they post a [`Message`] through a [`LoopHandle`] and
//! the loop hands it back to the owner in order.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::NativeEvent;
use crate::engine::EngineTask;
use crate::focus::FocusChange;
use crate::session::{SessionId, SessionTask};

/// Handle of a delayed message, used to cancel it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Unit of work on the serialized stream
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Event reported by a session's native decoder
    Native {
        session: SessionId,
        generation: u64,
        event: NativeEvent,
    },

    /// Delayed task scheduled by a session
    SessionTimer {
        session: SessionId,
        generation: u64,
        task: SessionTask,
    },

    /// Delayed task scheduled by the engine
    EngineTimer(EngineTask),

    /// Platform audio-focus change
    Focus(FocusChange),
}

#[derive(Debug)]
pub(crate) enum Envelope {
    Post(Message),
    Delayed {
        id: TaskId,
        due: Instant,
        message: Message,
    },
    Cancel(TaskId),
}

/// Sending side of the event loop
///
/// Cheap to clone and safe to move onto native threads.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    sender: Sender<Envelope>,
    next_task: Arc<AtomicU64>,
}

impl LoopHandle {
    /// Queue a message behind everything already posted
    ///
    /// Returns false when the loop has been dropped.
    pub fn post(&self, message: Message) -> bool {
        self.sender.send(Envelope::Post(message)).is_ok()
    }

    /// Queue a message to be delivered once `delay` has elapsed
    pub fn post_delayed(&self, message: Message, delay: Duration) -> TaskId {
        let id = TaskId(self.next_task.fetch_add(1, Ordering::Relaxed));
        let due = Instant::now() + delay;
        // A dropped loop will never deliver it; the id stays valid to cancel.
        let _ = self.sender.send(Envelope::Delayed { id, due, message });
        id
    }

    /// Cancel a delayed message; unknown or already delivered ids are ignored
    pub fn cancel(&self, id: TaskId) {
        let _ = self.sender.send(Envelope::Cancel(id));
    }
}

/// Receiving side of the event loop
#[derive(Debug)]
pub struct EventLoop {
    sender: Sender<Envelope>,
    receiver: Receiver<Envelope>,
    ready: VecDeque<Message>,
    timers: BinaryHeap<Reverse<(Instant, TaskId)>>,
    delayed: HashMap<TaskId, Message>,
    next_task: Arc<AtomicU64>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            ready: VecDeque::new(),
            timers: BinaryHeap::new(),
            delayed: HashMap::new(),
            next_task: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            sender: self.sender.clone(),
            next_task: Arc::clone(&self.next_task),
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<Envelope> {
        &self.receiver
    }

    pub(crate) fn accept(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Post(message) => self.ready.push_back(message),
            Envelope::Delayed { id, due, message } => {
                self.delayed.insert(id, message);
                self.timers.push(Reverse((due, id)));
            }
            Envelope::Cancel(id) => {
                self.delayed.remove(&id);
            }
        }
    }

    fn drain(&mut self) {
        while let Ok(envelope) = self.receiver.try_recv() {
            self.accept(envelope);
        }
    }

    /// Next message to process at `now`
    ///
    /// Everything posted so far is drained first, so a cancellation posted
    /// before this call always wins over its timer. Immediate messages come
    /// out in FIFO order ahead of timers; due timers come out by deadline.
    pub fn next_message(&mut self, now: Instant) -> Option<Message> {
        self.drain();
        if let Some(message) = self.ready.pop_front() {
            return Some(message);
        }
        while let Some(Reverse((due, id))) = self.timers.peek().copied() {
            if due > now {
                break;
            }
            self.timers.pop();
            if let Some(message) = self.delayed.remove(&id) {
                return Some(message);
            }
        }
        None
    }

    /// Earliest deadline among timers that are still pending
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((due, id))) = self.timers.peek().copied() {
            if self.delayed.contains_key(&id) {
                return Some(due);
            }
            self.timers.pop();
        }
        None
    }

    /// Number of delayed messages not yet delivered or cancelled
    pub fn pending_timers(&mut self) -> usize {
        self.drain();
        self.delayed.len()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn focus(change: FocusChange) -> Message {
        Message::Focus(change)
    }

    #[test]
    fn test_posts_are_fifo() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();

        assert!(handle.post(focus(FocusChange::Gained)));
        assert!(handle.post(focus(FocusChange::LostTransient)));

        let now = Instant::now();
        assert_eq!(
            event_loop.next_message(now),
            Some(focus(FocusChange::Gained))
        );
        assert_eq!(
            event_loop.next_message(now),
            Some(focus(FocusChange::LostTransient))
        );
        assert_eq!(event_loop.next_message(now), None);
    }

    #[test]
    fn test_delayed_message_waits_for_deadline() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();

        handle.post_delayed(focus(FocusChange::Gained), Duration::from_secs(5));

        assert_eq!(event_loop.next_message(Instant::now()), None);
        assert!(event_loop.next_deadline().is_some());

        let later = Instant::now() + Duration::from_secs(6);
        assert_eq!(
            event_loop.next_message(later),
            Some(focus(FocusChange::Gained))
        );
        assert_eq!(event_loop.next_deadline(), None);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();

        let id = handle.post_delayed(focus(FocusChange::Lost), Duration::from_millis(10));
        handle.cancel(id);

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(event_loop.next_message(later), None);
        assert_eq!(event_loop.pending_timers(), 0);
        assert_eq!(event_loop.next_deadline(), None);
    }

    #[test]
    fn test_immediate_messages_run_before_due_timers() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();

        handle.post_delayed(focus(FocusChange::Lost), Duration::ZERO);
        handle.post(focus(FocusChange::Gained));

        let later = Instant::now() + Duration::from_millis(1);
        assert_eq!(
            event_loop.next_message(later),
            Some(focus(FocusChange::Gained))
        );
        assert_eq!(
            event_loop.next_message(later),
            Some(focus(FocusChange::Lost))
        );
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();

        handle.post_delayed(focus(FocusChange::Lost), Duration::from_millis(200));
        handle.post_delayed(focus(FocusChange::Gained), Duration::from_millis(100));

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(
            event_loop.next_message(later),
            Some(focus(FocusChange::Gained))
        );
        assert_eq!(
            event_loop.next_message(later),
            Some(focus(FocusChange::Lost))
        );
    }

    #[test]
    fn test_handle_posts_from_other_threads() {
        let mut event_loop = EventLoop::new();
        let handle = event_loop.handle();

        let worker = std::thread::spawn(move || {
            for _ in 0..10 {
                handle.post(focus(FocusChange::Gained));
            }
        });
        worker.join().unwrap();

        let now = Instant::now();
        let mut count = 0;
        while event_loop.next_message(now).is_some() {
            count += 1;
        }
        assert_eq!(count, 10);
    }
}
