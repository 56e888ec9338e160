#![forbid(unsafe_code)]

//! Shared leaf types for the skene media engine.

mod error;
mod ranges;
mod types;

pub use error::{MediaError, MediaErrorCode};
pub use ranges::{Range, TimeRanges, RANGE_EPSILON};
pub use types::MediaType;
