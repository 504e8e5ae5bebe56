//! Acquisition session: lifecycle, state machine and producer thread.
//!
//! ```text
//!   Idle ──start()──▶ Running ──stop() / end of stream──▶ Stopped
//!                        │                                   ▲
//!                        └──I/O or decode error──▶ Failed ──stop()
//! ```
//!
//! While Running, a dedicated thread reads chunks from the acquisition
//! source, decodes them and pushes the events into the session's
//! [`EventQueue`]. Consumers pop from the queue on their own threads; the
//! queue reports end of stream once the producer has finished, and
//! [`Session::failure`] tells a failed run apart from a completed one.

use crate::config::SessionConfig;
use crate::decoder::{DecodeError, DecoderOptions, Evt3Decoder};
use crate::queue::EventQueue;
use crate::source::{
    self, AcquisitionSource, DevNodeDriver, DeviceDriver, Fetch, SourceError, SourceKind,
    SourceTarget,
};
use crate::types::{Event, SensorMetadata};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
    Failed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Stopped,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),

    #[error("acquisition I/O error: {0}")]
    Io(#[source] SourceError),

    #[error("corrupt event stream: {0}")]
    CorruptStream(#[from] DecodeError),

    #[error("cannot {operation} a session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Snapshot of acquisition counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub chunks_read: u64,
    pub bytes_read: u64,
    pub events_decoded: u64,
    /// Events evicted from the queue under the drop-oldest policy
    pub events_dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    chunks: AtomicU64,
    bytes: AtomicU64,
    events: AtomicU64,
}

/// State shared between the controller and the producer thread.
#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    cancel: AtomicBool,
    end_of_stream: AtomicBool,
    failure: Mutex<Option<Arc<SessionError>>>,
    metadata: Mutex<Option<SensorMetadata>>,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// One open-to-close acquisition run.
///
/// `Session` is `Sync`: share it (for example in an `Arc`) to consume events
/// or call [`Session::stop`] from several threads.
pub struct Session {
    target: SourceTarget,
    config: SessionConfig,
    driver: Arc<dyn DeviceDriver>,
    queue: Arc<EventQueue>,
    shared: Arc<Shared>,
    producer: Mutex<Option<JoinHandle<()>>>,
    started_at: OnceLock<Instant>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.target)
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl Session {
    /// Creates an idle session. Devices are looked up through the
    /// device-node driver described by `config.device`.
    pub fn new(target: SourceTarget, config: SessionConfig) -> Self {
        let driver = DevNodeDriver::new(&config.device.dir, config.device.prefix.clone());
        Self::with_driver(target, config, Arc::new(driver))
    }

    /// Creates an idle session using a specific device driver.
    pub fn with_driver(
        target: SourceTarget,
        config: SessionConfig,
        driver: Arc<dyn DeviceDriver>,
    ) -> Self {
        let queue = Arc::new(EventQueue::new(
            config.queue.capacity,
            config.queue.overflow,
        ));
        Self {
            target,
            config,
            driver,
            queue,
            shared: Arc::new(Shared {
                state: AtomicU8::new(SessionState::Idle as u8),
                cancel: AtomicBool::new(false),
                end_of_stream: AtomicBool::new(false),
                failure: Mutex::new(None),
                metadata: Mutex::new(None),
                counters: Counters::default(),
            }),
            producer: Mutex::new(None),
            started_at: OnceLock::new(),
        }
    }

    /// Opens the source and starts the producer thread.
    ///
    /// Only valid from Idle. If the source cannot be opened the session
    /// stays Idle and the error is returned as `SourceUnavailable`.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut producer = self.producer.lock();

        let state = self.shared.state();
        if state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                operation: "start",
                state,
            });
        }

        let source = source::open(&self.target, &self.config, self.driver.as_ref()).map_err(|e| {
            warn!("Cannot open {}: {}", self.target, e);
            SessionError::SourceUnavailable(e)
        })?;

        let decoder = Evt3Decoder::with_options(self.decoder_options(source.as_ref()));
        let worker = Producer {
            source,
            decoder,
            queue: Arc::clone(&self.queue),
            shared: Arc::clone(&self.shared),
        };

        self.shared.set_state(SessionState::Running);
        let handle = thread::Builder::new()
            .name("evcap-producer".to_string())
            .spawn(move || worker.run());

        match handle {
            Ok(handle) => {
                *producer = Some(handle);
                let _ = self.started_at.set(Instant::now());
                info!("Acquisition started from {}", self.target);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(SessionState::Idle);
                Err(SessionError::Spawn(e))
            }
        }
    }

    fn decoder_options(&self, source: &dyn AcquisitionSource) -> DecoderOptions {
        let configured = self.config.acquisition.geometry();
        match source.kind() {
            SourceKind::File => DecoderOptions {
                expect_header: true,
                geometry: configured.unwrap_or_default(),
            },
            SourceKind::Device => {
                DecoderOptions::live(source.geometry().or(configured).unwrap_or_default())
            }
        }
    }

    /// Stops acquisition and releases the source.
    ///
    /// Valid from Running or Failed; a no-op once Stopped. Returns after the
    /// producer thread has exited, whichever thread calls it.
    pub fn stop(&self) -> Result<(), SessionError> {
        let mut producer = self.producer.lock();

        let state = self.shared.state();
        match state {
            SessionState::Idle => {
                return Err(SessionError::InvalidState {
                    operation: "stop",
                    state,
                })
            }
            SessionState::Stopped if producer.is_none() => return Ok(()),
            _ => {}
        }

        self.shared.cancel.store(true, Ordering::Release);
        self.queue.close();

        if let Some(handle) = producer.take() {
            debug!("Waiting for acquisition thread to exit...");
            if handle.join().is_err() {
                error!("Acquisition thread panicked");
            }
        }

        self.shared.set_state(SessionState::Stopped);
        info!(
            "Acquisition stopped ({} events decoded)",
            self.shared.counters.events.load(Ordering::Relaxed)
        );
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// True only while Running. Never blocks.
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Pops the next event, blocking until one is available.
    ///
    /// Returns `None` at the end of the stream: the source is exhausted, the
    /// session was stopped, or it failed (see [`Session::failure`]).
    pub fn next_event(&self) -> Option<Event> {
        self.queue.pop()
    }

    /// Blocking iterator over the remaining events.
    pub fn events(&self) -> Events<'_> {
        Events { queue: &self.queue }
    }

    /// The session's event queue, for additional consumer threads.
    pub fn queue(&self) -> Arc<EventQueue> {
        Arc::clone(&self.queue)
    }

    /// The error that moved the session to Failed. Kept after `stop`.
    pub fn failure(&self) -> Option<Arc<SessionError>> {
        self.shared.failure.lock().clone()
    }

    /// Sensor geometry, once the stream header (if any) has been read.
    pub fn metadata(&self) -> Option<SensorMetadata> {
        *self.shared.metadata.lock()
    }

    pub fn stats(&self) -> SessionStats {
        let counters = &self.shared.counters;
        SessionStats {
            chunks_read: counters.chunks.load(Ordering::Relaxed),
            bytes_read: counters.bytes.load(Ordering::Relaxed),
            events_decoded: counters.events.load(Ordering::Relaxed),
            events_dropped: self.queue.dropped(),
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.target.kind()
    }

    pub fn target(&self) -> &SourceTarget {
        &self.target
    }

    /// When `start` succeeded.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at.get().copied()
    }

    /// True if the source reported end of stream.
    pub fn reached_end_of_stream(&self) -> bool {
        self.shared.end_of_stream.load(Ordering::Acquire)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state() != SessionState::Idle {
            let _ = self.stop();
        }
    }
}

/// Blocking iterator returned by [`Session::events`].
pub struct Events<'a> {
    queue: &'a EventQueue,
}

impl Iterator for Events<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.queue.pop()
    }
}

enum Exit {
    EndOfStream,
    Cancelled,
}

/// The acquisition thread: source → decoder → queue.
struct Producer {
    source: Box<dyn AcquisitionSource>,
    decoder: Evt3Decoder,
    queue: Arc<EventQueue>,
    shared: Arc<Shared>,
}

impl Producer {
    fn run(mut self) {
        let result = self.pump();
        self.source.close();

        match result {
            Ok(Exit::EndOfStream) => {
                self.shared.end_of_stream.store(true, Ordering::Release);
                if self
                    .shared
                    .transition(SessionState::Running, SessionState::Stopped)
                {
                    info!(
                        "End of stream after {} events",
                        self.shared.counters.events.load(Ordering::Relaxed)
                    );
                }
            }
            Ok(Exit::Cancelled) => debug!("Acquisition cancelled"),
            Err(e) => {
                warn!("Acquisition failed: {}", e);
                *self.shared.failure.lock() = Some(Arc::new(e));
                self.shared
                    .transition(SessionState::Running, SessionState::Failed);
            }
        }

        // State is final before consumers see the end of the stream
        self.queue.close();
    }

    fn pump(&mut self) -> Result<Exit, SessionError> {
        let counters = &self.shared.counters;
        loop {
            if self.shared.cancel.load(Ordering::Acquire) {
                return Ok(Exit::Cancelled);
            }

            let chunk = match self.source.read_chunk().map_err(SessionError::Io)? {
                Fetch::Chunk(chunk) => chunk,
                Fetch::Pending => continue,
                Fetch::EndOfStream => {
                    self.decoder.finish()?;
                    self.publish_metadata();
                    return Ok(Exit::EndOfStream);
                }
            };

            counters.chunks.fetch_add(1, Ordering::Relaxed);
            counters
                .bytes
                .fetch_add(chunk.len() as u64, Ordering::Relaxed);

            // Events decoded ahead of a corrupt word are still delivered
            let mut events = Vec::with_capacity(chunk.len() / 2);
            let decoded = self.decoder.decode_into(chunk.as_bytes(), &mut events);
            self.publish_metadata();

            if !events.is_empty() {
                counters
                    .events
                    .fetch_add(events.len() as u64, Ordering::Relaxed);
                if self.queue.push_batch(events).is_err() {
                    return Ok(Exit::Cancelled);
                }
            }
            decoded?;
        }
    }

    fn publish_metadata(&self) {
        if !self.decoder.header_complete() {
            return;
        }
        let mut metadata = self.shared.metadata.lock();
        if metadata.is_none() {
            let geometry = self.decoder.metadata();
            debug!("Sensor geometry {}x{}", geometry.width, geometry.height);
            *metadata = Some(geometry);
        }
    }
}
