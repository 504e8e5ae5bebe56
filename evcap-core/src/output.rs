//! Output format writers for acquired events.
//!
//! Writers are streaming: events are written as they are consumed from a
//! session, so a recording of any length can be exported.

use crate::types::{Event, EventKind, SensorMetadata};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Field ordering for CSV output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldOrder {
    /// x, y, p, t (default)
    #[default]
    XYPT,
    /// t, x, y, p
    TXYP,
    /// x, y, t, p
    XYTP,
    /// Custom order specified by indices
    Custom([usize; 4]),
}

impl std::str::FromStr for FieldOrder {
    type Err = OutputError;

    /// Parses a field order from a format string like "x,y,p,t" or "t,x,y,p".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<String> = s.split(',').map(|p| p.trim().to_lowercase()).collect();

        if parts.len() != 4 {
            return Err(OutputError::InvalidFormat(
                "Format must have exactly 4 fields: x, y, p, t".to_string(),
            ));
        }

        // Map field names to indices: x=0, y=1, p=2, t=3
        let mut indices = [0usize; 4];
        let mut used = [false; 4];

        for (i, part) in parts.iter().enumerate() {
            let field_idx = match part.as_str() {
                "x" => 0,
                "y" => 1,
                "p" | "pol" | "polarity" => 2,
                "t" | "time" | "timestamp" => 3,
                _ => {
                    return Err(OutputError::InvalidFormat(format!(
                        "Unknown field: {}. Use x, y, p, t",
                        part
                    )))
                }
            };

            if used[field_idx] {
                return Err(OutputError::InvalidFormat(format!(
                    "Duplicate field: {}",
                    part
                )));
            }

            indices[i] = field_idx;
            used[field_idx] = true;
        }

        Ok(match indices {
            [0, 1, 2, 3] => Self::XYPT,
            [3, 0, 1, 2] => Self::TXYP,
            [0, 1, 3, 2] => Self::XYTP,
            _ => Self::Custom(indices),
        })
    }
}

impl FieldOrder {
    fn indices(self) -> [usize; 4] {
        match self {
            Self::XYPT => [0, 1, 2, 3],
            Self::TXYP => [3, 0, 1, 2],
            Self::XYTP => [0, 1, 3, 2],
            Self::Custom(indices) => indices,
        }
    }

    /// Column names in this order, e.g. "x,y,polarity,timestamp".
    pub fn column_names(self) -> String {
        const NAMES: [&str; 4] = ["x", "y", "polarity", "timestamp"];
        self.indices()
            .iter()
            .map(|&i| NAMES[i])
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// CSV output writer for CD events.
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
    field_order: FieldOrder,
    written: u64,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a new CSV writer.
    pub fn new(writer: W, field_order: FieldOrder) -> Self {
        Self {
            writer: BufWriter::new(writer),
            field_order,
            written: 0,
        }
    }

    /// Writes the geometry header line.
    pub fn write_header(&mut self, metadata: Option<&SensorMetadata>) -> Result<(), OutputError> {
        if let Some(meta) = metadata {
            writeln!(self.writer, "%geometry:{},{}", meta.width, meta.height)?;
        }
        Ok(())
    }

    /// Writes one CD event. Trigger events are skipped.
    #[inline]
    pub fn write_event(&mut self, event: &Event) -> Result<(), OutputError> {
        if !event.is_cd() {
            return Ok(());
        }
        let values = [
            u64::from(event.x),
            u64::from(event.y),
            u64::from(event.polarity.bit()),
            event.timestamp,
        ];
        let [a, b, c, d] = self.field_order.indices().map(|i| values[i]);
        writeln!(self.writer, "{},{},{},{}", a, b, c, d)?;
        self.written += 1;
        Ok(())
    }

    /// Writes a batch of events.
    pub fn write_events(&mut self, events: &[Event]) -> Result<(), OutputError> {
        for event in events {
            self.write_event(event)?;
        }
        Ok(())
    }

    /// Number of CD events written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV writer for trigger events: `value,id,timestamp`.
pub struct TriggerCsvWriter<W: Write> {
    writer: BufWriter<W>,
    written: u64,
}

impl<W: Write> TriggerCsvWriter<W> {
    /// Creates a new trigger CSV writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    /// Writes one trigger event. CD events are skipped.
    pub fn write_event(&mut self, event: &Event) -> Result<(), OutputError> {
        if let EventKind::Trigger { channel } = event.kind {
            writeln!(
                self.writer,
                "{},{},{}",
                event.polarity.bit(),
                channel,
                event.timestamp
            )?;
            self.written += 1;
        }
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Size of the binary header in bytes.
pub const BINARY_HEADER_LEN: usize = 28;

/// Size of one binary event record in bytes. Records are packed, with no
/// trailing alignment.
pub const BINARY_RECORD_LEN: usize = 14;

/// Binary output format for CD events.
///
/// Header (little-endian): magic `EVT3BIN\0`, version u32, width u32,
/// height u32, event count u64. Each event is then written as a packed
/// record of [`BINARY_RECORD_LEN`] bytes:
/// - x: u16 (2 bytes)
/// - y: u16 (2 bytes)
/// - polarity: u8 (1 byte)
/// - padding: u8 (1 byte, always 0)
/// - timestamp: u64 (8 bytes)
///
/// The event count is not known while streaming, so a placeholder header is
/// written first and rewritten by [`BinaryWriter::finish`].
pub struct BinaryWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    count: u64,
}

impl<W: Write + Seek> BinaryWriter<W> {
    /// Creates a binary writer and reserves space for the header.
    pub fn new(writer: W) -> Result<Self, OutputError> {
        let mut this = Self {
            writer: BufWriter::new(writer),
            count: 0,
        };
        this.write_header(&SensorMetadata::default(), 0)?;
        Ok(this)
    }

    fn write_header(&mut self, metadata: &SensorMetadata, event_count: u64) -> Result<(), OutputError> {
        self.writer.write_all(b"EVT3BIN\0")?;
        self.writer.write_u32::<LittleEndian>(1)?;
        self.writer.write_u32::<LittleEndian>(metadata.width)?;
        self.writer.write_u32::<LittleEndian>(metadata.height)?;
        self.writer.write_u64::<LittleEndian>(event_count)?;
        Ok(())
    }

    /// Writes one CD event. Trigger events are skipped.
    #[inline]
    pub fn write_event(&mut self, event: &Event) -> Result<(), OutputError> {
        if !event.is_cd() {
            return Ok(());
        }
        self.writer.write_u16::<LittleEndian>(event.x)?;
        self.writer.write_u16::<LittleEndian>(event.y)?;
        self.writer.write_all(&[event.polarity.bit(), 0])?; // polarity + padding
        self.writer.write_u64::<LittleEndian>(event.timestamp)?;
        self.count += 1;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.count
    }

    /// Rewrites the header with the final geometry and event count.
    pub fn finish(mut self, metadata: &SensorMetadata) -> Result<W, OutputError> {
        self.writer.seek(SeekFrom::Start(0))?;
        let count = self.count;
        self.write_header(metadata, count)?;
        self.writer.seek(SeekFrom::End(0))?;
        self.writer
            .into_inner()
            .map_err(|e| OutputError::Io(e.into_error()))
    }
}
