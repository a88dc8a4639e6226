//! Native decoder seam
//!
//! A platform provides a [`DecoderBackend`] that builds [`Decoder`]s. Each
//! decoder wraps one native decode/playback unit. Synchronous calls go through
//! the trait; everything the native side reports later is posted as a
//! [`NativeEvent`] through the decoder's [`NativeEventSink`], which marshals
//! it onto the serialized event stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::looper::{LoopHandle, Message};
use crate::session::SessionId;
use crate::types::{OutputAttributes, Timestamp};

/// Backend-assigned identity of a native decoder
///
/// Used to wire gapless hand-off between two decoders of the same backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DecoderHandle(pub u64);

/// Synchronous native failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecoderError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Unsupported content: {0}")]
    Unsupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Decoder already released")]
    Released,

    #[error("{0}")]
    Other(String),
}

/// Rate and pitch applied together; see [`Decoder::apply_playback_params`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackParams {
    pub speed: f32,
    pub pitch: f32,
}

/// One native decode/playback unit
pub trait Decoder: Send {
    /// Identity used by [`Decoder::set_next`] on other decoders
    fn handle(&self) -> DecoderHandle;

    /// Bind content; blocks until the locator has been accepted
    fn set_data_source(&mut self, locator: &str) -> Result<(), DecoderError>;

    fn set_output_attributes(&mut self, attributes: &OutputAttributes);

    /// Prepare on the calling thread
    fn prepare(&mut self) -> Result<(), DecoderError>;

    /// Start preparing; completion is reported as [`NativeEvent::Prepared`]
    fn prepare_async(&mut self) -> Result<(), DecoderError>;

    /// Apply rate and pitch
    ///
    /// Couples with output state: a speed above zero resumes output, a speed
    /// of zero pauses it.
    fn apply_playback_params(&mut self, params: PlaybackParams) -> Result<(), DecoderError>;

    fn set_volume(&mut self, volume: f32);

    fn pause(&mut self);

    fn stop(&mut self);

    /// Completion is reported as [`NativeEvent::SeekComplete`]
    fn seek_to(&mut self, position_ms: u64);

    /// Loop the current content natively
    fn set_looping(&mut self, looping: bool);

    /// Decoder to start automatically when this one reaches its end
    fn set_next(&mut self, next: Option<DecoderHandle>);

    /// Return to the unbound state, dropping pending native callbacks
    fn reset(&mut self);

    /// Free the native resource; no call is valid afterwards
    fn release(&mut self);

    fn duration_ms(&self) -> Option<u64>;

    fn position_ms(&self) -> u64;
}

/// Factory for native decoders
pub trait DecoderBackend: Send {
    /// Build a decoder that reports through `sink`
    fn create(&mut self, sink: NativeEventSink) -> Result<Box<dyn Decoder>, DecoderError>;
}

/// Native error reported asynchronously
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeError {
    /// The media service died
    ServerDied,
    /// Low-level system error
    System,
    /// An operation took too long
    TimedOut,
    /// File or network I/O failed
    Io,
    /// Bitstream does not conform to its format
    Malformed,
    /// Format or codec not supported
    Unsupported,
    /// Container is not laid out for progressive playback
    NotValidForProgressive,
    /// The native player was driven through an illegal state transition
    InvalidOperation,
    /// Anything else, with the raw native code
    Unknown(i32),
}

/// Informational native event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeInfo {
    /// Content is badly interleaved; playback may stutter
    BadInterleaving,
    BufferingStart,
    BufferingEnd,
    /// The decoder started automatically as the hand-off target
    StartedAsNext,
    MetadataUpdate,
    NotSeekable,
    /// Output has stopped although the decoder is started
    AudioNotPlaying,
    Unknown(i32),
}

/// Everything a native decoder reports after the fact
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    Prepared,
    Completion,
    SeekComplete,
    /// Played plus buffered share of the content, in percent
    BufferingUpdate {
        percent: u8,
    },
    Info(NativeInfo),
    Error(NativeError),
    /// New ground-truth timestamp anchor
    TimeDiscontinuity(Timestamp),
    /// Metadata that becomes current at `timestamp_ms` of media time
    TimedMetadata {
        timestamp_ms: u64,
        payload: Vec<u8>,
    },
}

/// Where a native decoder posts its events
///
/// Every event is stamped with the owning session's generation at send time.
/// The session bumps its generation on reset and release, so anything the
/// native side sent before that is recognised as stale and dropped.
#[derive(Debug, Clone)]
pub struct NativeEventSink {
    session: SessionId,
    generation: Arc<AtomicU64>,
    handle: LoopHandle,
}

impl NativeEventSink {
    pub(crate) fn new(session: SessionId, generation: Arc<AtomicU64>, handle: LoopHandle) -> Self {
        Self {
            session,
            generation,
            handle,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Marshal an event onto the serialized stream
    pub fn send(&self, event: NativeEvent) {
        let generation = self.generation.load(Ordering::Acquire);
        if !self.handle.post(Message::Native {
            session: self.session,
            generation,
            event,
        }) {
            tracing::trace!("Dropping native event for {}: loop is gone", self.session);
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording decoder for unit tests

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        SetDataSource(String),
        SetOutputAttributes,
        Prepare,
        PrepareAsync,
        ApplyParams(PlaybackParams),
        SetVolume(f32),
        Pause,
        Stop,
        SeekTo(u64),
        SetLooping(bool),
        SetNext(Option<DecoderHandle>),
        Reset,
        Release,
    }

    #[derive(Debug, Clone, Default)]
    pub struct CallLog(Arc<Mutex<Vec<(DecoderHandle, Call)>>>);

    impl CallLog {
        pub fn calls(&self, handle: DecoderHandle) -> Vec<Call> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _)| *h == handle)
                .map(|(_, c)| c.clone())
                .collect()
        }

        pub fn count(&self, call: &Call) -> usize {
            self.0.lock().unwrap().iter().filter(|(_, c)| c == call).count()
        }

        fn push(&self, handle: DecoderHandle, call: Call) {
            self.0.lock().unwrap().push((handle, call));
        }
    }

    pub struct RecordingDecoder {
        pub handle: DecoderHandle,
        pub log: CallLog,
        pub duration_ms: Option<u64>,
        pub position_ms: u64,
        pub fail_params: bool,
        pub fail_data_source: bool,
    }

    /// Backend handing out [`RecordingDecoder`]s and keeping their sinks
    #[derive(Clone, Default)]
    pub struct RecordingBackend {
        pub log: CallLog,
        sinks: Arc<Mutex<Vec<(DecoderHandle, NativeEventSink)>>>,
    }

    impl RecordingBackend {
        pub fn new(log: CallLog) -> Self {
            Self {
                log,
                sinks: Arc::default(),
            }
        }

        /// Post `event` as if decoder `handle` had reported it
        pub fn send(&self, handle: DecoderHandle, event: NativeEvent) {
            let sinks = self.sinks.lock().unwrap();
            let (_, sink) = sinks.iter().find(|(h, _)| *h == handle).unwrap();
            sink.send(event);
        }

        pub fn created(&self) -> usize {
            self.sinks.lock().unwrap().len()
        }
    }

    impl DecoderBackend for RecordingBackend {
        fn create(&mut self, sink: NativeEventSink) -> Result<Box<dyn Decoder>, DecoderError> {
            let mut sinks = self.sinks.lock().unwrap();
            let id = sinks.len() as u64 + 1;
            sinks.push((DecoderHandle(id), sink));
            Ok(Box::new(RecordingDecoder::new(id, self.log.clone())))
        }
    }

    impl RecordingDecoder {
        pub fn new(id: u64, log: CallLog) -> Self {
            Self {
                handle: DecoderHandle(id),
                log,
                duration_ms: Some(180_000),
                position_ms: 0,
                fail_params: false,
                fail_data_source: false,
            }
        }
    }

    impl Decoder for RecordingDecoder {
        fn handle(&self) -> DecoderHandle {
            self.handle
        }

        fn set_data_source(&mut self, locator: &str) -> Result<(), DecoderError> {
            self.log
                .push(self.handle, Call::SetDataSource(locator.to_string()));
            if self.fail_data_source {
                return Err(DecoderError::Io(locator.to_string()));
            }
            Ok(())
        }

        fn set_output_attributes(&mut self, _attributes: &OutputAttributes) {
            self.log.push(self.handle, Call::SetOutputAttributes);
        }

        fn prepare(&mut self) -> Result<(), DecoderError> {
            self.log.push(self.handle, Call::Prepare);
            Ok(())
        }

        fn prepare_async(&mut self) -> Result<(), DecoderError> {
            self.log.push(self.handle, Call::PrepareAsync);
            Ok(())
        }

        fn apply_playback_params(&mut self, params: PlaybackParams) -> Result<(), DecoderError> {
            self.log.push(self.handle, Call::ApplyParams(params));
            if self.fail_params {
                return Err(DecoderError::InvalidArgument("speed".to_string()));
            }
            Ok(())
        }

        fn set_volume(&mut self, volume: f32) {
            self.log.push(self.handle, Call::SetVolume(volume));
        }

        fn pause(&mut self) {
            self.log.push(self.handle, Call::Pause);
        }

        fn stop(&mut self) {
            self.log.push(self.handle, Call::Stop);
        }

        fn seek_to(&mut self, position_ms: u64) {
            self.log.push(self.handle, Call::SeekTo(position_ms));
        }

        fn set_looping(&mut self, looping: bool) {
            self.log.push(self.handle, Call::SetLooping(looping));
        }

        fn set_next(&mut self, next: Option<DecoderHandle>) {
            self.log.push(self.handle, Call::SetNext(next));
        }

        fn reset(&mut self) {
            self.log.push(self.handle, Call::Reset);
        }

        fn release(&mut self) {
            self.log.push(self.handle, Call::Release);
        }

        fn duration_ms(&self) -> Option<u64> {
            self.duration_ms
        }

        fn position_ms(&self) -> u64 {
            self.position_ms
        }
    }
}
