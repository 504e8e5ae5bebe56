//! Stateful EVT 3.0 stream decoder.
//!
//! This module implements the EVT 3.0 decoding state machine that tracks
//! timestamp, coordinates, and polarity across events. The decoder is fed
//! [`RawChunk`]s in stream order; framing state (a partial header line or
//! the first byte of a word split across chunks) is carried to the next call,
//! so the chunk boundaries never change the decoded output.

use crate::header::{FileHeader, HeaderError, LineOutcome, MAX_HEADER_LINE};
use crate::parser::Word;
use crate::types::{DecodeResult, Event, Polarity, RawChunk, RawEventType, SensorMetadata};
use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during EVT 3.0 decoding.
///
/// Apart from `Io`, which only `decode_file` returns, every variant means the
/// stream is corrupt and decoding cannot continue.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed header: {0}")]
    Header(#[from] HeaderError),

    #[error("reserved event type 0x{nibble:X} at word {offset}")]
    ReservedType { nibble: u8, offset: u64 },

    #[error("event at ({x}, {y}) outside the {width}x{height} sensor")]
    OutOfBounds {
        x: u16,
        y: u16,
        width: u32,
        height: u32,
    },

    #[error("timestamp went backwards from {previous}us to {current}us")]
    TimestampRegression { previous: u64, current: u64 },

    #[error("stream ended in the middle of a 16-bit word")]
    TruncatedWord,
}

/// Constants for timestamp handling.
const MAX_TIMESTAMP_BASE: u64 = ((1u64 << 12) - 1) << 12; // 16773120us
const TIME_LOOP: u64 = MAX_TIMESTAMP_BASE + (1 << 12); // 16777216us
const LOOP_THRESHOLD: u64 = 10 << 12; // Threshold for loop detection

/// Buffer size for reading recordings in `decode_file`, in bytes.
const READ_BUFFER_SIZE: usize = 2_000_000;

/// Decoder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Whether the stream may start with a `%` text header. Recordings have
    /// one; live device streams do not.
    pub expect_header: bool,
    /// Geometry used when the header does not provide one.
    pub geometry: SensorMetadata,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            expect_header: true,
            geometry: SensorMetadata::default(),
        }
    }
}

impl DecoderOptions {
    /// Options for a headerless live stream with a known geometry.
    pub fn live(geometry: SensorMetadata) -> Self {
        Self {
            expect_header: false,
            geometry,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// At the start of a line that may be a header line.
    LineStart,
    /// Inside a header line.
    InLine,
    /// Decoding event words.
    Body,
}

/// Stateful EVT 3.0 decoder.
///
/// Maintains internal state to properly reconstruct the event stream according
/// to the EVT 3.0 format.
#[derive(Debug)]
pub struct Evt3Decoder {
    // Timestamp state
    time_base: u64,
    current_time: u64,
    n_time_high_loops: u64,
    first_time_base_set: bool,
    last_timestamp: u64,

    // Address/polarity state
    current_y: u16,
    current_base_x: u16,
    current_polarity: Polarity,

    // Framing state
    phase: Phase,
    line: Vec<u8>,
    carry: Option<u8>,
    words_seen: u64,

    header: FileHeader,
    options: DecoderOptions,
    metadata: SensorMetadata,
}

impl Default for Evt3Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Evt3Decoder {
    /// Creates a decoder for a recording (header allowed, Gen4 fallback geometry).
    pub fn new() -> Self {
        Self::with_options(DecoderOptions::default())
    }

    /// Creates a decoder with explicit options.
    pub fn with_options(options: DecoderOptions) -> Self {
        Self {
            time_base: 0,
            current_time: 0,
            n_time_high_loops: 0,
            first_time_base_set: false,
            last_timestamp: 0,
            current_y: 0,
            current_base_x: 0,
            current_polarity: Polarity::Off,
            phase: if options.expect_header {
                Phase::LineStart
            } else {
                Phase::Body
            },
            line: Vec::new(),
            carry: None,
            words_seen: 0,
            header: FileHeader::default(),
            options,
            metadata: options.geometry,
        }
    }

    /// Resets the decoder to its freshly constructed state.
    pub fn reset(&mut self) {
        *self = Self::with_options(self.options);
    }

    /// Sensor geometry in effect: the header's once it has been read,
    /// otherwise the configured one.
    pub fn metadata(&self) -> SensorMetadata {
        self.metadata
    }

    /// Returns true once the header (if any) has been consumed.
    pub fn header_complete(&self) -> bool {
        self.phase == Phase::Body
    }

    /// Header fields read from the stream so far.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Decodes one chunk into events, consuming the chunk.
    pub fn decode(&mut self, chunk: RawChunk) -> Result<Vec<Event>, DecodeError> {
        let mut events = Vec::with_capacity(chunk.len() / 2);
        self.decode_into(chunk.as_bytes(), &mut events)?;
        Ok(events)
    }

    /// Decodes raw bytes, appending events to `events`.
    ///
    /// This is the core decoding function that processes raw EVT 3.0 data.
    pub fn decode_into(&mut self, bytes: &[u8], events: &mut Vec<Event>) -> Result<(), DecodeError> {
        let mut bytes = bytes;

        if self.phase != Phase::Body {
            bytes = self.consume_header(bytes)?;
            if self.phase != Phase::Body {
                return Ok(());
            }
        }

        if let Some(low) = self.carry.take() {
            match bytes.split_first() {
                Some((&high, rest)) => {
                    self.decode_word(Word::from_le_bytes([low, high]), events)?;
                    bytes = rest;
                }
                None => {
                    self.carry = Some(low);
                    return Ok(());
                }
            }
        }

        let mut words = bytes.chunks_exact(2);
        for pair in &mut words {
            self.decode_word(Word(LittleEndian::read_u16(pair)), events)?;
        }
        self.carry = words.remainder().first().copied();

        Ok(())
    }

    /// Signals end of stream. Fails if the stream stopped inside a header
    /// line or a word.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        match self.phase {
            Phase::InLine => return Err(HeaderError::Unterminated.into()),
            Phase::LineStart => self.enter_body(),
            Phase::Body => {}
        }
        if self.carry.is_some() {
            return Err(DecodeError::TruncatedWord);
        }
        Ok(())
    }

    /// Consumes header bytes, returning the remainder that belongs to the body.
    fn consume_header<'a>(&mut self, mut bytes: &'a [u8]) -> Result<&'a [u8], DecodeError> {
        while let Some(&first) = bytes.first() {
            match self.phase {
                Phase::LineStart => {
                    if first != b'%' {
                        self.enter_body();
                        return Ok(bytes);
                    }
                    self.phase = Phase::InLine;
                }
                Phase::InLine => match bytes.iter().position(|&b| b == b'\n') {
                    Some(end) => {
                        self.push_line_bytes(&bytes[..end])?;
                        bytes = &bytes[end + 1..];
                        let line = std::mem::take(&mut self.line);
                        match self.header.apply_line(&line)? {
                            LineOutcome::Continue => self.phase = Phase::LineStart,
                            LineOutcome::End => {
                                self.enter_body();
                                return Ok(bytes);
                            }
                        }
                    }
                    None => {
                        self.push_line_bytes(bytes)?;
                        return Ok(&[]);
                    }
                },
                Phase::Body => return Ok(bytes),
            }
        }
        Ok(bytes)
    }

    fn push_line_bytes(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        if self.line.len() + bytes.len() > MAX_HEADER_LINE {
            return Err(HeaderError::LineTooLong.into());
        }
        self.line.extend_from_slice(bytes);
        Ok(())
    }

    fn enter_body(&mut self) {
        self.phase = Phase::Body;
        if let Some(geometry) = self.header.geometry {
            self.metadata = geometry;
        }
        debug!(
            "Header complete: {} fields, sensor {}x{}",
            self.header.fields.len(),
            self.metadata.width,
            self.metadata.height
        );
    }

    #[inline]
    fn decode_word(&mut self, word: Word, events: &mut Vec<Event>) -> Result<(), DecodeError> {
        let offset = self.words_seen;
        self.words_seen += 1;

        let kind = word.kind().ok_or(DecodeError::ReservedType {
            nibble: word.type_nibble(),
            offset,
        })?;

        // Skip until first TIME_HIGH
        if !self.first_time_base_set {
            if kind == RawEventType::TimeHigh {
                self.time_base = word.time() << 12;
                self.current_time = self.time_base;
                self.first_time_base_set = true;
            }
            return Ok(());
        }

        match kind {
            RawEventType::AddrX => {
                let event = Event::cd(
                    word.coordinate(),
                    self.current_y,
                    word.polarity(),
                    self.current_time,
                );
                self.emit(event, events)?;
            }

            RawEventType::Vect12 | RawEventType::Vect8 => {
                if let Some((valid, count)) = word.vector_mask() {
                    self.process_vector_events(valid, count, events)?;
                }
            }

            RawEventType::AddrY => {
                self.current_y = word.coordinate();
            }

            RawEventType::VectBaseX => {
                self.current_base_x = word.coordinate();
                self.current_polarity = word.polarity();
            }

            RawEventType::TimeHigh => {
                self.process_time_high(word);
            }

            RawEventType::TimeLow => {
                self.current_time = self.time_base + word.time();
            }

            RawEventType::ExtTrigger => {
                let event = Event::trigger(
                    word.trigger_channel(),
                    word.trigger_edge(),
                    self.current_time,
                );
                self.emit(event, events)?;
            }

            RawEventType::Continued4 | RawEventType::Others | RawEventType::Continued12 => {
                // Extension payloads carry no CD or trigger data
            }
        }

        Ok(())
    }

    /// Processes TIME_HIGH events with loop detection.
    #[inline]
    fn process_time_high(&mut self, word: Word) {
        let mut new_time_base = (word.time() << 12) + (self.n_time_high_loops * TIME_LOOP);

        // Detect time high loop (went back in time due to wrap)
        if self.time_base > new_time_base
            && (self.time_base - new_time_base) >= (MAX_TIMESTAMP_BASE - LOOP_THRESHOLD)
        {
            new_time_base += TIME_LOOP;
            self.n_time_high_loops += 1;
        }

        self.time_base = new_time_base;
        self.current_time = self.time_base;
    }

    /// Processes vector events (VECT_12 or VECT_8) and emits CD events.
    #[inline]
    fn process_vector_events(
        &mut self,
        valid: u16,
        count: u16,
        events: &mut Vec<Event>,
    ) -> Result<(), DecodeError> {
        let base_x = self.current_base_x;

        for bit in 0..count {
            if valid & (1 << bit) != 0 {
                let event = Event::cd(
                    base_x.saturating_add(bit),
                    self.current_y,
                    self.current_polarity,
                    self.current_time,
                );
                self.emit(event, events)?;
            }
        }

        self.current_base_x = base_x.saturating_add(count);
        Ok(())
    }

    #[inline]
    fn emit(&mut self, event: Event, events: &mut Vec<Event>) -> Result<(), DecodeError> {
        if event.is_cd() && !self.metadata.contains(event.x, event.y) {
            return Err(DecodeError::OutOfBounds {
                x: event.x,
                y: event.y,
                width: self.metadata.width,
                height: self.metadata.height,
            });
        }
        if event.timestamp < self.last_timestamp {
            return Err(DecodeError::TimestampRegression {
                previous: self.last_timestamp,
                current: event.timestamp,
            });
        }
        self.last_timestamp = event.timestamp;
        events.push(event);
        Ok(())
    }

    /// Decodes an EVT 3.0 recording from disk in one pass, without a session.
    pub fn decode_file<P: AsRef<Path>>(&mut self, path: P) -> Result<DecodeResult, DecodeError> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);

        let mut events = Vec::new();
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            self.decode_into(&buffer[..bytes_read], &mut events)?;
        }
        self.finish()?;

        Ok(DecodeResult {
            events,
            metadata: self.metadata,
        })
    }
}
