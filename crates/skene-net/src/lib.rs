#![forbid(unsafe_code)]

//! Segment loading and transport parsing for the skene media engine.
//!
//! [`SegmentLoader`] fetches addressable segments; [`HttpSegmentLoader`]
//! is the production implementation with bounded exponential backoff.
//! [`SegmentParser`] turns a transport payload into pushable chunks; the
//! concrete parser is per-transport and injected at pipeline build time.

mod error;
mod loader;
mod parser;
mod types;

pub use error::{NetError, NetResult};
pub use loader::{HttpSegmentLoader, LoadedSegment, SegmentLoader, SegmentRequest};
pub use parser::{ChunkInfos, IdentityParser, ParseError, ParsedChunk, SegmentParser};
pub use types::{NetOptions, RetryPolicy};
