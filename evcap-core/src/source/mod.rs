//! Acquisition sources: where raw event bytes come from.
//!
//! A source is either a recorded file being replayed or a live device reached
//! through a [`DeviceDriver`]. Both produce [`RawChunk`]s for the decoder and
//! are used through the [`AcquisitionSource`] trait.

pub mod device;
pub mod file;

pub use device::{DevNodeDriver, DeviceDriver, DeviceInfo, DeviceLink, DeviceSource};
pub use file::FileSource;

use crate::config::SessionConfig;
use crate::types::{RawChunk, SensorMetadata};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by acquisition sources.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("no event camera found")]
    NoDevice,

    #[error("device {0:?} not found")]
    DeviceNotFound(String),

    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("device enumeration failed: {0}")]
    Enumerate(#[source] std::io::Error),

    #[error("device {0:?} disconnected")]
    Disconnected(String),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// True for errors raised while opening (as opposed to while reading).
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::NoDevice | Self::DeviceNotFound(_) | Self::Open { .. } | Self::Enumerate(_)
        )
    }
}

/// Which kind of source backs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Device,
    File,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => f.write_str("device"),
            Self::File => f.write_str("file"),
        }
    }
}

/// Selects a live device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// First device reported by the driver.
    FirstAvailable,
    /// Device with the given driver identifier.
    Id(String),
}

/// What to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTarget {
    Device(DeviceSelector),
    File(PathBuf),
}

impl SourceTarget {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Device(_) => SourceKind::Device,
            Self::File(_) => SourceKind::File,
        }
    }
}

impl fmt::Display for SourceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(DeviceSelector::FirstAvailable) => f.write_str("first available device"),
            Self::Device(DeviceSelector::Id(id)) => write!(f, "device {}", id),
            Self::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// Result of a single read.
#[derive(Debug, PartialEq, Eq)]
pub enum Fetch {
    Chunk(RawChunk),
    /// No data within the poll interval; the source is still live.
    Pending,
    /// The recording has been fully read.
    EndOfStream,
}

/// A producer of raw event bytes.
pub trait AcquisitionSource: Send {
    fn kind(&self) -> SourceKind;

    /// Reads the next chunk.
    ///
    /// File sources never return `Pending`. Device sources wait at most the
    /// configured poll interval before returning `Pending`, and report a
    /// disconnect as an error.
    fn read_chunk(&mut self) -> Result<Fetch, SourceError>;

    /// Releases the underlying handle. Calling it again has no effect, and
    /// reads after close return `EndOfStream`.
    fn close(&mut self);

    /// Sensor geometry known before decoding, if any.
    fn geometry(&self) -> Option<SensorMetadata> {
        None
    }
}

/// Opens the source named by `target`.
pub fn open(
    target: &SourceTarget,
    config: &SessionConfig,
    driver: &dyn DeviceDriver,
) -> Result<Box<dyn AcquisitionSource>, SourceError> {
    match target {
        SourceTarget::File(path) => Ok(Box::new(FileSource::open(
            path,
            config.acquisition.chunk_size,
        )?)),
        SourceTarget::Device(selector) => Ok(Box::new(DeviceSource::open(
            driver,
            selector,
            config.acquisition.chunk_size,
            config.acquisition.poll_interval(),
        )?)),
    }
}
