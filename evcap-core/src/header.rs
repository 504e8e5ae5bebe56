//! Text header of recorded EVT 3.0 files.
//!
//! Recordings start with zero or more lines beginning with `%`, for example:
//!
//! ```text
//! % date 2024-07-23 10:57:38
//! % evt 3.0
//! % format EVT3;height=720;width=1280
//! % geometry 1280x720
//! % end
//! ```
//!
//! Lines are fed one at a time by the decoder, which owns the framing. Only
//! the fields needed to decode the stream are interpreted; the rest are kept
//! verbatim.

use crate::types::SensorMetadata;
use std::collections::BTreeMap;
use thiserror::Error;

/// Longest header line accepted before the stream is declared corrupt.
pub const MAX_HEADER_LINE: usize = 4096;

/// Errors raised by a malformed header.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("header line is not valid UTF-8")]
    NotUtf8,

    #[error("unsupported event format version: {0}")]
    UnsupportedVersion(String),

    #[error("unsupported event encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("invalid {field} value in header: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("header line exceeds 4096 bytes")]
    LineTooLong,

    #[error("header line not terminated before end of stream")]
    Unterminated,
}

/// What the decoder should do after a header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// More header lines may follow.
    Continue,
    /// `% end` marker: event data starts with the next byte.
    End,
}

/// Header fields collected from a recording.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    /// Sensor geometry, from `% format` or `% geometry`
    pub geometry: Option<SensorMetadata>,
    /// Value of `% evt`, if present
    pub version: Option<String>,
    /// All `% key value` pairs, including the interpreted ones
    pub fields: BTreeMap<String, String>,
}

impl FileHeader {
    /// Interprets one header line (without its trailing newline).
    pub fn apply_line(&mut self, raw: &[u8]) -> Result<LineOutcome, HeaderError> {
        let line = std::str::from_utf8(raw).map_err(|_| HeaderError::NotUtf8)?;
        let line = line.trim_end_matches(['\r', '\n']);
        let body = line.strip_prefix('%').unwrap_or(line).trim();

        if body == "end" {
            return Ok(LineOutcome::End);
        }
        if body.is_empty() {
            return Ok(LineOutcome::Continue);
        }

        let (key, value) = match body.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (body, ""),
        };

        match key {
            "evt" => {
                if value != "3.0" && value != "3" {
                    return Err(HeaderError::UnsupportedVersion(value.to_string()));
                }
                self.version = Some(value.to_string());
            }
            "format" => self.apply_format(value)?,
            "geometry" => {
                let (w, h) = value.split_once('x').ok_or_else(|| invalid("geometry", value))?;
                self.geometry = Some(parse_geometry(w, h, value)?);
            }
            _ => {}
        }

        self.fields.insert(key.to_string(), value.to_string());
        Ok(LineOutcome::Continue)
    }

    /// Format: "% format EVT3;height=720;width=1280"
    fn apply_format(&mut self, value: &str) -> Result<(), HeaderError> {
        let mut parts = value.split(';');
        let encoding = parts.next().unwrap_or_default().trim();
        if !encoding.eq_ignore_ascii_case("EVT3") && !encoding.eq_ignore_ascii_case("EVT3.0") {
            return Err(HeaderError::UnsupportedEncoding(encoding.to_string()));
        }

        let mut width = None;
        let mut height = None;
        for part in parts {
            if let Some((name, v)) = part.split_once('=') {
                match name.trim() {
                    "width" => width = Some(v.trim()),
                    "height" => height = Some(v.trim()),
                    _ => {}
                }
            }
        }

        match (width, height) {
            (Some(w), Some(h)) => self.geometry = Some(parse_geometry(w, h, value)?),
            (None, None) => {}
            _ => return Err(invalid("format", value)),
        }
        Ok(())
    }
}

fn parse_geometry(w: &str, h: &str, raw: &str) -> Result<SensorMetadata, HeaderError> {
    match (w.trim().parse::<u32>(), h.trim().parse::<u32>()) {
        (Ok(width), Ok(height)) if width > 0 && height > 0 => {
            Ok(SensorMetadata::new(width, height))
        }
        _ => Err(invalid("geometry", raw)),
    }
}

fn invalid(field: &'static str, value: &str) -> HeaderError {
    HeaderError::InvalidValue {
        field,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        let mut header = FileHeader::default();
        let outcome = header
            .apply_line(b"% format EVT3;width=640;height=480")
            .unwrap();
        assert_eq!(outcome, LineOutcome::Continue);
        assert_eq!(header.geometry, Some(SensorMetadata::new(640, 480)));
    }

    #[test]
    fn test_geometry_line() {
        let mut header = FileHeader::default();
        header.apply_line(b"% geometry 320x240\r\n").unwrap();
        assert_eq!(header.geometry, Some(SensorMetadata::new(320, 240)));
        assert_eq!(header.fields.get("geometry").unwrap(), "320x240");
    }

    #[test]
    fn test_end_marker() {
        let mut header = FileHeader::default();
        assert_eq!(header.apply_line(b"% end").unwrap(), LineOutcome::End);
    }

    #[test]
    fn test_unknown_fields_are_kept() {
        let mut header = FileHeader::default();
        header.apply_line(b"% serial_number 00ca0009").unwrap();
        header.apply_line(b"%").unwrap();
        assert_eq!(header.fields.get("serial_number").unwrap(), "00ca0009");
        assert!(header.geometry.is_none());
    }

    #[test]
    fn test_version_check() {
        let mut header = FileHeader::default();
        header.apply_line(b"% evt 3.0").unwrap();
        assert_eq!(header.version.as_deref(), Some("3.0"));
        assert_eq!(
            header.apply_line(b"% evt 2.0"),
            Err(HeaderError::UnsupportedVersion("2.0".to_string()))
        );
    }

    #[test]
    fn test_malformed_lines() {
        let mut header = FileHeader::default();
        assert!(matches!(
            header.apply_line(b"% geometry 1280by720"),
            Err(HeaderError::InvalidValue { field: "geometry", .. })
        ));
        assert!(matches!(
            header.apply_line(b"% geometry 0x720"),
            Err(HeaderError::InvalidValue { .. })
        ));
        assert!(matches!(
            header.apply_line(b"% format EVT2;width=640;height=480"),
            Err(HeaderError::UnsupportedEncoding(_))
        ));
        assert!(matches!(
            header.apply_line(b"% format EVT3;width=640"),
            Err(HeaderError::InvalidValue { field: "format", .. })
        ));
        assert_eq!(
            header.apply_line(&[b'%', b' ', 0xFF, 0xFE]),
            Err(HeaderError::NotUtf8)
        );
    }
}
