#![allow(clippy::unusual_byte_groupings)]
//! Field access for raw EVT 3.0 16-bit words.
//!
//! A [`Word`] wraps one little-endian word of the event stream and exposes
//! the bit fields of each word type. Accessors do not check the type nibble;
//! the decoder dispatches on [`Word::kind`] first.

use crate::types::{Polarity, RawEventType};

/// One raw EVT 3.0 word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Word(pub u16);

impl Word {
    /// Reads a word from two little-endian bytes.
    #[inline]
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_le_bytes(bytes))
    }

    /// The 4-bit type nibble, bits [15:12].
    #[inline]
    pub fn type_nibble(self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    /// The decoded word type, or `None` for reserved nibbles.
    #[inline]
    pub fn kind(self) -> Option<RawEventType> {
        RawEventType::from_u8(self.type_nibble())
    }

    /// The 12-bit payload, bits [11:0].
    #[inline]
    pub fn payload(self) -> u16 {
        self.0 & 0x0FFF
    }

    // ========================================================================
    // EVT_ADDR_Y (0x0):  [15:12] type | [11] system_type | [10:0] y
    // EVT_ADDR_X (0x2):  [15:12] type | [11] polarity    | [10:0] x
    // VECT_BASE_X (0x3): [15:12] type | [11] polarity    | [10:0] x
    // ========================================================================

    /// The 11-bit coordinate shared by ADDR_Y, ADDR_X and VECT_BASE_X.
    #[inline]
    pub fn coordinate(self) -> u16 {
        self.0 & 0x07FF
    }

    /// Bit 11: polarity for ADDR_X / VECT_BASE_X.
    #[inline]
    pub fn polarity(self) -> Polarity {
        Polarity::from_bit(((self.0 >> 11) & 0x1) as u8)
    }

    // ========================================================================
    // VECT_12 (0x4): [15:12] type | [11:0] valid
    // VECT_8  (0x5): [15:12] type | [11:8] unused | [7:0] valid
    // ========================================================================

    /// Validity mask of a vector word, with the number of pixels it covers.
    #[inline]
    pub fn vector_mask(self) -> Option<(u16, u16)> {
        match self.kind()? {
            RawEventType::Vect12 => Some((self.0 & 0x0FFF, 12)),
            RawEventType::Vect8 => Some((self.0 & 0x00FF, 8)),
            _ => None,
        }
    }

    // ========================================================================
    // EVT_TIME_LOW (0x6) / EVT_TIME_HIGH (0x8): [15:12] type | [11:0] time
    // ========================================================================

    /// 12-bit time value of a TIME_LOW or TIME_HIGH word.
    #[inline]
    pub fn time(self) -> u64 {
        u64::from(self.payload())
    }

    // ========================================================================
    // EXT_TRIGGER (0xA): [15:12] type | [11:8] id | [7:1] unused | [0] value
    // ========================================================================

    /// Trigger channel ID.
    #[inline]
    pub fn trigger_channel(self) -> u8 {
        ((self.0 >> 8) & 0x0F) as u8
    }

    /// Trigger edge: ON for rising, OFF for falling.
    #[inline]
    pub fn trigger_edge(self) -> Polarity {
        Polarity::from_bit((self.0 & 0x01) as u8)
    }
}
