//! Core types for acquired event data.
//!
//! This module defines the decoded event record, the raw chunk handed from an
//! acquisition source to the decoder, and the raw EVT 3.0 word types.

/// Brightness change direction of a CD event, or edge direction of a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Polarity {
    /// Decrease in brightness / falling edge (-1)
    Off = 0,
    /// Increase in brightness / rising edge (+1)
    On = 1,
}

impl Polarity {
    /// Builds a polarity from the single bit stored in EVT 3.0 words.
    #[inline]
    pub fn from_bit(bit: u8) -> Self {
        if bit & 0x1 != 0 {
            Self::On
        } else {
            Self::Off
        }
    }

    /// Returns the bit value as written by the sensor (0 or 1).
    #[inline]
    pub fn bit(self) -> u8 {
        self as u8
    }

    /// Returns the signed polarity: +1 for ON, -1 for OFF.
    #[inline]
    pub fn sign(self) -> i8 {
        match self {
            Self::On => 1,
            Self::Off => -1,
        }
    }
}

/// Distinguishes pixel-change events from synchronization events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Change Detection event emitted by a pixel.
    ChangeDetection,
    /// Edge detected on an external trigger input.
    Trigger {
        /// Trigger channel ID (0-15)
        channel: u8,
    },
}

/// A decoded event.
///
/// For CD events `x`/`y` are pixel coordinates within the sensor geometry.
/// Trigger events carry no coordinates (both are 0) and use `polarity` for
/// the edge direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Timestamp in microseconds
    pub timestamp: u64,
    /// X coordinate of the pixel
    pub x: u16,
    /// Y coordinate of the pixel
    pub y: u16,
    /// Event polarity
    pub polarity: Polarity,
    /// Event type tag
    pub kind: EventKind,
}

impl Event {
    /// Creates a new CD event.
    #[inline]
    pub fn cd(x: u16, y: u16, polarity: Polarity, timestamp: u64) -> Self {
        Self {
            timestamp,
            x,
            y,
            polarity,
            kind: EventKind::ChangeDetection,
        }
    }

    /// Creates a new external trigger event.
    #[inline]
    pub fn trigger(channel: u8, edge: Polarity, timestamp: u64) -> Self {
        Self {
            timestamp,
            x: 0,
            y: 0,
            polarity: edge,
            kind: EventKind::Trigger { channel },
        }
    }

    /// Returns true for Change Detection events.
    #[inline]
    pub fn is_cd(&self) -> bool {
        self.kind == EventKind::ChangeDetection
    }

    /// Returns true for external trigger events.
    #[inline]
    pub fn is_trigger(&self) -> bool {
        matches!(self.kind, EventKind::Trigger { .. })
    }
}

/// A unit of raw bytes delivered by an acquisition source.
///
/// The decoder takes the chunk by value, so the buffer is released once it
/// has been decoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawChunk {
    data: Vec<u8>,
}

impl RawChunk {
    /// Wraps an owned byte buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Number of bytes in the chunk.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the underlying buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for RawChunk {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&[u8]> for RawChunk {
    fn from(data: &[u8]) -> Self {
        Self::new(data.to_vec())
    }
}

/// EVT 3.0 raw event types.
///
/// Each 16-bit word in the EVT 3.0 format has a 4-bit type field in the MSB
/// that identifies the event type. Values 0x1, 0x9, 0xB, 0xC and 0xD are
/// reserved and never emitted by a healthy sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RawEventType {
    /// Y coordinate and system type (0x0)
    AddrY = 0x0,
    /// Single valid event with X coordinate and polarity (0x2)
    AddrX = 0x2,
    /// Base X coordinate for subsequent vector events (0x3)
    VectBaseX = 0x3,
    /// Vector event with 12 validity bits (0x4)
    Vect12 = 0x4,
    /// Vector event with 8 validity bits (0x5)
    Vect8 = 0x5,
    /// Lower 12 bits of timestamp (0x6)
    TimeLow = 0x6,
    /// Continued event with 4 bits of data (0x7)
    Continued4 = 0x7,
    /// Upper 12 bits of timestamp (0x8)
    TimeHigh = 0x8,
    /// External trigger event (0xA)
    ExtTrigger = 0xA,
    /// Extension event type (0xE)
    Others = 0xE,
    /// Continued event with 12 bits of data (0xF)
    Continued12 = 0xF,
}

impl RawEventType {
    /// Attempts to parse an event type from a 4-bit value.
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::AddrY),
            0x2 => Some(Self::AddrX),
            0x3 => Some(Self::VectBaseX),
            0x4 => Some(Self::Vect12),
            0x5 => Some(Self::Vect8),
            0x6 => Some(Self::TimeLow),
            0x7 => Some(Self::Continued4),
            0x8 => Some(Self::TimeHigh),
            0xA => Some(Self::ExtTrigger),
            0xE => Some(Self::Others),
            0xF => Some(Self::Continued12),
            _ => None,
        }
    }
}

/// Sensor geometry, from a file header, the device driver or configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorMetadata {
    /// Sensor width in pixels
    pub width: u32,
    /// Sensor height in pixels
    pub height: u32,
}

impl SensorMetadata {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if the pixel lies inside the sensor array.
    #[inline]
    pub fn contains(&self, x: u16, y: u16) -> bool {
        u32::from(x) < self.width && u32::from(y) < self.height
    }
}

impl Default for SensorMetadata {
    fn default() -> Self {
        // Default to Gen4 sensor geometry (1280x720)
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Result of decoding a whole recording without a session.
#[derive(Debug)]
pub struct DecodeResult {
    /// Decoded events (CD and trigger) in stream order
    pub events: Vec<Event>,
    /// Sensor metadata
    pub metadata: SensorMetadata,
}

impl DecodeResult {
    /// Iterates over the Change Detection events.
    pub fn cd_events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.is_cd())
    }

    /// Iterates over the external trigger events.
    pub fn trigger_events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(|e| e.is_trigger())
    }
}
