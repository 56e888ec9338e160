#![forbid(unsafe_code)]

use bytes::Bytes;
use thiserror::Error;

use crate::loader::SegmentRequest;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed segment payload: {0}")]
    Malformed(String),

    /// The payload cannot be appended to the current decoder pipeline
    /// (key rotation, manifest expiry, codec mismatch); the media source
    /// must be rebuilt.
    #[error("decoder pipeline reload required: {0}")]
    RequiresReload(String),
}

/// Media timing announced by the transport for one chunk, in ticks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkInfos {
    pub time: i64,
    pub duration: Option<i64>,
    pub timescale: u64,
}

impl ChunkInfos {
    #[must_use]
    pub fn start_secs(&self) -> f64 {
        self.time as f64 / self.timescale as f64
    }

    #[must_use]
    pub fn end_secs(&self) -> Option<f64> {
        self.duration
            .map(|d| (self.time + d) as f64 / self.timescale as f64)
    }
}

/// One pushable unit produced from a transport payload.
#[derive(Clone, Debug)]
pub enum ParsedChunk {
    /// Decoder configuration bytes, pushed before any media of the
    /// Representation.
    Init {
        data: Bytes,
        timescale: Option<u64>,
    },
    /// Media bytes with transport-reported timing.
    Media {
        data: Bytes,
        infos: Option<ChunkInfos>,
        /// Seconds to add to each sample's presentation time.
        offset: f64,
        /// Append window the transport requests, when narrower than the
        /// Period's.
        append_window: (Option<f64>, Option<f64>),
    },
}

/// Transport-specific decoding of fetched payloads into pushable chunks.
///
/// A chunked transport may yield several chunks per payload, so the result
/// is a list in push order.
pub trait SegmentParser: Send + Sync {
    fn parse(
        &self,
        request: &SegmentRequest,
        data: Bytes,
        is_chunked: bool,
    ) -> Result<Vec<ParsedChunk>, ParseError>;
}

/// Parser for transports whose payloads are already decoder-ready: the
/// whole payload becomes one chunk, timed from the segment index.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityParser;

impl SegmentParser for IdentityParser {
    fn parse(
        &self,
        request: &SegmentRequest,
        data: Bytes,
        _is_chunked: bool,
    ) -> Result<Vec<ParsedChunk>, ParseError> {
        let segment = &request.segment;
        if segment.is_init {
            return Ok(vec![ParsedChunk::Init {
                data,
                timescale: Some(segment.timescale),
            }]);
        }
        Ok(vec![ParsedChunk::Media {
            data,
            infos: Some(ChunkInfos {
                time: segment.time,
                duration: Some(segment.duration),
                timescale: segment.timescale,
            }),
            offset: 0.0,
            append_window: (None, None),
        }])
    }
}
