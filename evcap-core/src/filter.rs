//! Event selection by region of interest, time window and polarity.
//!
//! All bounds are inclusive and optional; an unset bound does not restrict.
//! The time window applies to every event. Region and polarity only apply to
//! CD events, since trigger events carry no pixel.

use crate::types::{Event, Polarity};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("empty {field} range: min {min} > max {max}")]
    EmptyRange {
        field: &'static str,
        min: u64,
        max: u64,
    },
}

/// Selects the events kept for export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub x_min: Option<u16>,
    pub x_max: Option<u16>,
    pub y_min: Option<u16>,
    pub y_max: Option<u16>,
    /// Earliest timestamp kept, in microseconds
    pub t_min: Option<u64>,
    /// Latest timestamp kept, in microseconds
    pub t_max: Option<u64>,
    pub polarity: Option<Polarity>,
}

impl EventFilter {
    /// A filter that keeps every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts CD events to the rectangle `[x_min, x_max] x [y_min, y_max]`.
    pub fn with_region(mut self, x: (Option<u16>, Option<u16>), y: (Option<u16>, Option<u16>)) -> Self {
        (self.x_min, self.x_max) = x;
        (self.y_min, self.y_max) = y;
        self
    }

    /// Restricts events to `[t_min, t_max]`.
    pub fn with_time_window(mut self, t_min: Option<u64>, t_max: Option<u64>) -> Self {
        self.t_min = t_min;
        self.t_max = t_max;
        self
    }

    /// Keeps only CD events of the given polarity.
    pub fn with_polarity(mut self, polarity: Option<Polarity>) -> Self {
        self.polarity = polarity;
        self
    }

    /// Rejects ranges whose minimum exceeds their maximum.
    pub fn validate(&self) -> Result<(), FilterError> {
        fn check<T: Into<u64> + Copy>(
            field: &'static str,
            min: Option<T>,
            max: Option<T>,
        ) -> Result<(), FilterError> {
            match (min, max) {
                (Some(min), Some(max)) if min.into() > max.into() => Err(FilterError::EmptyRange {
                    field,
                    min: min.into(),
                    max: max.into(),
                }),
                _ => Ok(()),
            }
        }

        check("x", self.x_min, self.x_max)?;
        check("y", self.y_min, self.y_max)?;
        check("time", self.t_min, self.t_max)
    }

    /// True if no bound is set.
    pub fn is_pass_all(&self) -> bool {
        *self == Self::default()
    }

    /// True if `event` is kept.
    #[inline]
    pub fn matches(&self, event: &Event) -> bool {
        if !within(event.timestamp, self.t_min, self.t_max) {
            return false;
        }
        if !event.is_cd() {
            return true;
        }
        within(event.x, self.x_min, self.x_max)
            && within(event.y, self.y_min, self.y_max)
            && self.polarity.map_or(true, |p| p == event.polarity)
    }

    /// True once `event` lies after the time window. Timestamps never
    /// decrease within a session, so no later event can match.
    #[inline]
    pub fn is_past_window(&self, event: &Event) -> bool {
        self.t_max.is_some_and(|t_max| event.timestamp > t_max)
    }
}

#[inline]
fn within<T: PartialOrd>(value: T, min: Option<T>, max: Option<T>) -> bool {
    min.map_or(true, |min| value >= min) && max.map_or(true, |max| value <= max)
}
