//! Live device acquisition.
//!
//! The driver layer is abstracted behind two traits: a [`DeviceDriver`]
//! enumerates and opens cameras, and a [`DeviceLink`] delivers raw bytes from
//! one opened camera. [`DevNodeDriver`] is the default driver, reading camera
//! device nodes such as `/dev/evcam0`.

use super::{AcquisitionSource, DeviceSelector, Fetch, SourceError, SourceKind};
use crate::types::{RawChunk, SensorMetadata};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Description of an attached camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Driver-specific identifier passed to `DeviceDriver::open`
    pub id: String,
    /// Human-readable description
    pub description: String,
    /// Sensor geometry, if the driver reports it
    pub geometry: Option<SensorMetadata>,
}

/// Enumerates and opens cameras.
pub trait DeviceDriver: Send + Sync {
    /// Lists attached cameras in a stable order.
    fn enumerate(&self) -> io::Result<Vec<DeviceInfo>>;

    /// Opens a camera by identifier. An unknown identifier is reported with
    /// `io::ErrorKind::NotFound`.
    fn open(&self, id: &str) -> io::Result<Box<dyn DeviceLink>>;
}

/// Raw byte delivery from one opened camera.
pub trait DeviceLink: Send {
    fn info(&self) -> &DeviceInfo;

    /// Reads up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and `Ok(Some(0))` once
    /// the camera has disconnected.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;

    /// Releases the camera.
    fn close(&mut self) {}
}

/// Acquisition source backed by a live camera.
pub struct DeviceSource {
    info: DeviceInfo,
    link: Option<Box<dyn DeviceLink>>,
    chunk_size: usize,
    poll_interval: Duration,
}

impl DeviceSource {
    /// Resolves `selector` against the driver and opens the camera.
    pub fn open(
        driver: &dyn DeviceDriver,
        selector: &DeviceSelector,
        chunk_size: usize,
        poll_interval: Duration,
    ) -> Result<Self, SourceError> {
        let id = match selector {
            DeviceSelector::FirstAvailable => {
                let devices = driver.enumerate().map_err(SourceError::Enumerate)?;
                debug!("Found {} camera(s)", devices.len());
                devices.into_iter().next().ok_or(SourceError::NoDevice)?.id
            }
            DeviceSelector::Id(id) => id.clone(),
        };

        let link = driver.open(&id).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                SourceError::DeviceNotFound(id.clone())
            } else {
                SourceError::Open {
                    path: PathBuf::from(&id),
                    source: e,
                }
            }
        })?;

        let info = link.info().clone();
        info!("Opened camera {} ({})", info.id, info.description);

        Ok(Self {
            info,
            link: Some(link),
            chunk_size: chunk_size.max(1),
            poll_interval,
        })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

impl AcquisitionSource for DeviceSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Device
    }

    fn read_chunk(&mut self) -> Result<Fetch, SourceError> {
        let Some(link) = self.link.as_mut() else {
            return Ok(Fetch::EndOfStream);
        };

        let mut buffer = vec![0u8; self.chunk_size];
        match link.read(&mut buffer, self.poll_interval) {
            Ok(None) => Ok(Fetch::Pending),
            Ok(Some(0)) => {
                warn!("Camera {} disconnected", self.info.id);
                Err(SourceError::Disconnected(self.info.id.clone()))
            }
            Ok(Some(n)) => {
                buffer.truncate(n);
                Ok(Fetch::Chunk(RawChunk::new(buffer)))
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Fetch::Pending),
            Err(e) => Err(SourceError::Io(e)),
        }
    }

    fn close(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            info!("Released camera {}", self.info.id);
        }
    }

    fn geometry(&self) -> Option<SensorMetadata> {
        self.info.geometry
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Size of each blocking read issued against a device node.
const NODE_READ_SIZE: usize = 64 * 1024;

/// Depth of the hand-off between a node's reader thread and the link.
const NODE_BACKLOG: usize = 8;

/// Driver for cameras exposed as character device nodes.
///
/// Every entry of `dir` whose name starts with `prefix` is a camera; its file
/// name is the device identifier.
#[derive(Debug, Clone)]
pub struct DevNodeDriver {
    dir: PathBuf,
    prefix: String,
}

impl Default for DevNodeDriver {
    fn default() -> Self {
        Self::new("/dev", "evcam")
    }
}

impl DevNodeDriver {
    pub fn new<P: AsRef<Path>>(dir: P, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            prefix: prefix.into(),
        }
    }

    fn node_path(&self, id: &str) -> io::Result<PathBuf> {
        if !id.starts_with(&self.prefix) || id.contains(std::path::MAIN_SEPARATOR) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a camera node", id),
            ));
        }
        Ok(self.dir.join(id))
    }
}

impl DeviceDriver for DevNodeDriver {
    fn enumerate(&self) -> io::Result<Vec<DeviceInfo>> {
        let mut devices = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&self.prefix) {
                devices.push(DeviceInfo {
                    description: entry.path().display().to_string(),
                    id: name,
                    geometry: None,
                });
            }
        }
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    fn open(&self, id: &str) -> io::Result<Box<dyn DeviceLink>> {
        let path = self.node_path(id)?;
        let file = File::open(&path)?;
        let info = DeviceInfo {
            id: id.to_string(),
            description: path.display().to_string(),
            geometry: None,
        };
        Ok(Box::new(DevNodeLink::spawn(file, info)?))
    }
}

/// Device node link. A reader thread performs the blocking reads so that
/// `read` can honour its timeout.
struct DevNodeLink {
    info: DeviceInfo,
    rx: Option<Receiver<io::Result<Vec<u8>>>>,
    pending: Vec<u8>,
    offset: usize,
}

impl DevNodeLink {
    fn spawn(file: File, info: DeviceInfo) -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(NODE_BACKLOG);
        thread::Builder::new()
            .name(format!("evcap-node-{}", info.id))
            .spawn(move || pump_node(file, tx))?;
        Ok(Self {
            info,
            rx: Some(rx),
            pending: Vec::new(),
            offset: 0,
        })
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        n
    }
}

/// Reads the node until EOF, an error, or the link going away.
fn pump_node(mut file: File, tx: SyncSender<io::Result<Vec<u8>>>) {
    loop {
        let mut buf = vec![0u8; NODE_READ_SIZE];
        match file.read(&mut buf) {
            // dropping the sender reports the disconnect
            Ok(0) => break,
            Ok(n) => {
                buf.truncate(n);
                if tx.send(Ok(buf)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

impl DeviceLink for DevNodeLink {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if self.offset < self.pending.len() {
            return Ok(Some(self.take_pending(buf)));
        }
        let Some(rx) = self.rx.as_ref() else {
            return Ok(Some(0));
        };

        match rx.recv_timeout(timeout) {
            Ok(Ok(data)) => {
                self.pending = data;
                self.offset = 0;
                Ok(Some(self.take_pending(buf)))
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Ok(Some(0)),
        }
    }

    fn close(&mut self) {
        // The reader thread exits on its next send
        self.rx = None;
        self.pending.clear();
        self.offset = 0;
    }
}
