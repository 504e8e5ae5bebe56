//! Shared fixtures: EVT 3.0 word builders, recordings on disk and a scripted
//! device driver.

#![allow(dead_code)]

use evcap_core::source::{DeviceDriver, DeviceInfo, DeviceLink};
use evcap_core::SensorMetadata;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

pub fn time_high(value: u16) -> u16 {
    0x8000 | (value & 0x0FFF)
}

pub fn time_low(value: u16) -> u16 {
    0x6000 | (value & 0x0FFF)
}

pub fn addr_y(y: u16) -> u16 {
    y & 0x07FF
}

pub fn addr_x(x: u16, polarity: u8) -> u16 {
    0x2000 | (u16::from(polarity & 1) << 11) | (x & 0x07FF)
}

pub fn vect_base_x(x: u16, polarity: u8) -> u16 {
    0x3000 | (u16::from(polarity & 1) << 11) | (x & 0x07FF)
}

pub fn vect_12(mask: u16) -> u16 {
    0x4000 | (mask & 0x0FFF)
}

pub fn vect_8(mask: u8) -> u16 {
    0x5000 | u16::from(mask)
}

pub fn ext_trigger(channel: u8, value: u8) -> u16 {
    0xA000 | (u16::from(channel & 0x0F) << 8) | u16::from(value & 1)
}

pub fn to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

pub fn header(width: u32, height: u32) -> Vec<u8> {
    format!(
        "% evt 3.0\n% format EVT3;width={};height={}\n% end\n",
        width, height
    )
    .into_bytes()
}

/// Writes a recording with a 640x480 header followed by `words`.
pub fn recording(words: &[u16]) -> NamedTempFile {
    let mut data = header(640, 480);
    data.extend(to_bytes(words));
    write_file(&data)
}

pub fn write_file(data: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
    file
}

/// `count` CD events on row 5 with strictly increasing timestamps.
pub fn cd_stream(count: u16) -> Vec<u16> {
    let mut words = vec![time_high(0), addr_y(5)];
    for i in 0..count {
        words.push(time_low(i));
        words.push(addr_x(i % 640, (i % 2) as u8));
    }
    words
}

/// What a scripted link does once its queued reads are used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterScript {
    /// Keep timing out, like a camera watching a static scene.
    Silent,
    /// Report a disconnect.
    Disconnect,
    /// Fail the read.
    Error,
}

/// Test driver exposing one camera whose reads are scripted.
pub struct ScriptedDriver {
    info: DeviceInfo,
    reads: Mutex<Option<VecDeque<Vec<u8>>>>,
    after: AfterScript,
    pub closed: Arc<Mutex<bool>>,
}

impl ScriptedDriver {
    pub fn new(reads: Vec<Vec<u8>>, after: AfterScript) -> Self {
        Self {
            info: DeviceInfo {
                id: "scripted0".to_string(),
                description: "scripted test camera".to_string(),
                geometry: Some(SensorMetadata::new(640, 480)),
            },
            reads: Mutex::new(Some(reads.into())),
            after,
            closed: Arc::new(Mutex::new(false)),
        }
    }

    pub fn silent() -> Self {
        Self::new(Vec::new(), AfterScript::Silent)
    }
}

impl DeviceDriver for ScriptedDriver {
    fn enumerate(&self) -> io::Result<Vec<DeviceInfo>> {
        Ok(vec![self.info.clone()])
    }

    fn open(&self, id: &str) -> io::Result<Box<dyn DeviceLink>> {
        if id != self.info.id {
            return Err(io::Error::new(io::ErrorKind::NotFound, id.to_string()));
        }
        let reads = self.reads.lock().take().unwrap_or_default();
        Ok(Box::new(ScriptedLink {
            info: self.info.clone(),
            reads,
            after: self.after,
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct ScriptedLink {
    info: DeviceInfo,
    reads: VecDeque<Vec<u8>>,
    after: AfterScript,
    closed: Arc<Mutex<bool>>,
}

impl DeviceLink for ScriptedLink {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        if let Some(data) = self.reads.pop_front() {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            return Ok(Some(n));
        }
        match self.after {
            AfterScript::Silent => {
                std::thread::sleep(timeout);
                Ok(None)
            }
            AfterScript::Disconnect => Ok(Some(0)),
            AfterScript::Error => Err(io::Error::new(io::ErrorKind::Other, "usb transfer failed")),
        }
    }

    fn close(&mut self) {
        *self.closed.lock() = true;
    }
}
