//! Acquisition core for event cameras producing EVT 3.0 data.
//!
//! This crate opens a live device or a recorded `.raw` file, decodes the EVT
//! 3.0 word stream into [`Event`]s on a producer thread, and hands them to
//! consumers through a bounded [`EventQueue`]. A [`Session`] owns the whole
//! pipeline and its Idle / Running / Stopped / Failed lifecycle.
//!
//! # Example
//!
//! ```no_run
//! use evcap_core::{Session, SessionConfig, SourceTarget};
//!
//! let session = Session::new(SourceTarget::File("recording.raw".into()), SessionConfig::default());
//! session.start().unwrap();
//!
//! let mut count = 0u64;
//! for _event in session.events() {
//!     count += 1;
//! }
//! session.stop().unwrap();
//!
//! println!("Read {} events", count);
//! if let Some(meta) = session.metadata() {
//!     println!("Sensor: {}x{}", meta.width, meta.height);
//! }
//! ```
//!
//! The decoder can also be used on its own:
//!
//! ```no_run
//! use evcap_core::Evt3Decoder;
//!
//! let mut decoder = Evt3Decoder::new();
//! let result = decoder.decode_file("recording.raw").unwrap();
//! println!("Decoded {} CD events", result.cd_events().count());
//! ```
//!
//! # Features
//!
//! - Full EVT 3.0 support including vectorized events and trigger events
//! - Streaming decode across arbitrary chunk boundaries
//! - Bounded queue with blocking or drop-oldest overflow
//! - File and device sources behind one trait
//! - Region, time window and polarity filtering
//! - CSV and binary output writers

pub mod config;
pub mod decoder;
pub mod filter;
pub mod header;
pub mod output;
pub mod parser;
pub mod queue;
pub mod session;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use config::{ConfigError, SessionConfig};
pub use decoder::{DecodeError, DecoderOptions, Evt3Decoder};
pub use filter::{EventFilter, FilterError};
pub use output::{FieldOrder, OutputError};
pub use queue::{EventQueue, OverflowPolicy, QueueClosed, Recv};
pub use session::{Session, SessionError, SessionState, SessionStats};
pub use source::{DeviceSelector, SourceError, SourceKind, SourceTarget};
pub use types::{DecodeResult, Event, EventKind, Polarity, RawChunk, SensorMetadata};
