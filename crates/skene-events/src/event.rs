#![forbid(unsafe_code)]

use bytes::Bytes;
use skene_core::{MediaError, MediaType, TimeRanges};

/// Unified event for the buffering core.
#[derive(Clone, Debug)]
pub enum Event {
    /// Per-type buffer pipeline event.
    Buffer(BufferEvent),
    /// Multi-Period orchestration event.
    Stream(StreamEvent),
}

/// Events emitted by per-type buffer pipelines.
#[derive(Clone, Debug)]
pub enum BufferEvent {
    /// A segment reached the decoder buffer and the inventory agrees.
    AddedSegment {
        media_type: MediaType,
        period_id: String,
        representation_id: String,
        segment_id: String,
        /// Decoder-retained ranges after the append.
        buffered: TimeRanges,
        data: Bytes,
    },
    /// The target look-ahead is satisfied for this type.
    FullBuffer { media_type: MediaType },
    /// Playback re-entered an already fully-buffered region.
    ActiveBuffer { media_type: MediaType },
    /// The decoder pipeline must be torn down and rebuilt (codec or key
    /// change the buffer cannot absorb in place).
    NeedsMediaSourceReload { position: f64 },
    /// Buffered ranges of no-longer-decipherable content were flushed.
    NeedsDecipherabilityFlush { position: f64 },
}

/// Events emitted by the Period orchestrator.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// The Period under the playback cursor changed.
    ActivePeriodChanged { period_id: String },
    /// A Period's buffer for one type was destroyed.
    PeriodBufferCleared {
        media_type: MediaType,
        period_id: String,
    },
    /// One type finished buffering the whole presentation.
    BufferComplete { media_type: MediaType },
    /// A partial (xlink) Period must be loaded before buffering continues.
    NeedsLoadedPeriod {
        media_type: MediaType,
        period_id: String,
    },
    /// Every type finished buffering; playback can end.
    EndOfStream,
    /// A type left the complete state after `EndOfStream`.
    ResumeStream,
    /// Non-fatal problem surfaced to the API.
    Warning(MediaError),
}

impl From<BufferEvent> for Event {
    fn from(e: BufferEvent) -> Self {
        Self::Buffer(e)
    }
}

impl From<StreamEvent> for Event {
    fn from(e: StreamEvent) -> Self {
        Self::Stream(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_event_into_event() {
        let event: Event = BufferEvent::FullBuffer {
            media_type: MediaType::Video,
        }
        .into();
        assert!(matches!(
            event,
            Event::Buffer(BufferEvent::FullBuffer {
                media_type: MediaType::Video
            })
        ));
    }

    #[test]
    fn stream_event_into_event() {
        let event: Event = StreamEvent::EndOfStream.into();
        assert!(matches!(event, Event::Stream(StreamEvent::EndOfStream)));
    }
}
