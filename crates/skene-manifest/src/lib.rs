#![forbid(unsafe_code)]

//! Manifest data model and timeline-based segment indexing.
//!
//! A [`Manifest`] is a hierarchical description of a media presentation:
//! ordered [`Period`]s, each holding [`Adaptation`]s (interchangeable track
//! renditions) made of [`Representation`]s (one encoding each). Every
//! Representation exposes a [`SegmentIndex`] mapping time to addressable
//! [`Segment`]s; [`TimelineIndex`] is the `SegmentTimeline`-backed
//! implementation with lazy parsing and timeshift eviction.
//!
//! Manifest *parsing* (DASH/HLS/Smooth decoding) happens upstream; this
//! crate only decodes the raw `SegmentTimeline` element, lazily, because
//! that is on the buffering hot path.

mod adaptation;
mod error;
mod manifest;
mod period;
mod representation;
mod segment;
pub mod timeline;

pub use adaptation::Adaptation;
pub use error::{ManifestError, ManifestResult};
pub use manifest::{DecipherabilityStatus, DecipherabilityUpdate, Manifest};
pub use period::Period;
pub use representation::{Representation, SegmentIndex};
pub use segment::Segment;
pub use timeline::TimelineIndex;
