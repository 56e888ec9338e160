#![forbid(unsafe_code)]

use skene_core::TimeRanges;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::{SinkError, SinkResult};

/// Completion signal from a decoder buffer mutation.
#[derive(Clone, Debug)]
pub enum RawBufferEvent {
    /// The last submitted mutation finished and the buffer is quiescent.
    UpdateEnd,
    /// The last submitted mutation failed.
    Error(String),
}

/// Capability set of a platform decoder buffer.
///
/// Mutations (`append_buffer`, `remove`) start asynchronously and signal
/// completion through [`RawBufferEvent`]s; at most one may be in flight.
/// Configuration setters apply immediately but are rejected while a
/// mutation is running, which is why only the owning queue task calls
/// them.
///
/// `bounds` on `append_buffer` announces the payload's time extent for
/// buffer variants that cannot derive timing from the bytes themselves
/// (the text/image shims); native buffers ignore it.
pub trait RawMediaBuffer: Send {
    fn append_buffer(&mut self, data: &[u8], bounds: Option<(f64, f64)>) -> SinkResult<()>;
    fn remove(&mut self, start: f64, end: f64) -> SinkResult<()>;
    /// Drop any in-flight mutation and reset the append state.
    fn abort(&mut self);

    fn updating(&self) -> bool;
    fn buffered(&self) -> TimeRanges;

    fn codec(&self) -> String;
    /// Attempt an in-place codec switch; `false` when the platform cannot.
    fn try_switch_codec(&mut self, codec: &str) -> bool;

    fn timestamp_offset(&self) -> f64;
    fn set_timestamp_offset(&mut self, offset: f64) -> SinkResult<()>;
    fn append_window_start(&self) -> f64;
    fn set_append_window_start(&mut self, start: f64) -> SinkResult<()>;
    /// `f64::INFINITY` when unset.
    fn append_window_end(&self) -> f64;
    fn set_append_window_end(&mut self, end: f64) -> SinkResult<()>;

    fn subscribe(&self) -> broadcast::Receiver<RawBufferEvent>;
}

/// Conforming buffer for track types without a platform decoder
/// (text/image): mutations complete immediately and `buffered` is built
/// from the announced bounds of each append.
pub struct ManualMediaBuffer {
    codec: String,
    ranges: TimeRanges,
    timestamp_offset: f64,
    append_window_start: f64,
    append_window_end: f64,
    events: broadcast::Sender<RawBufferEvent>,
}

impl ManualMediaBuffer {
    #[must_use]
    pub fn new(codec: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            codec: codec.into(),
            ranges: TimeRanges::new(),
            timestamp_offset: 0.0,
            append_window_start: 0.0,
            append_window_end: f64::INFINITY,
            events,
        }
    }
}

impl RawMediaBuffer for ManualMediaBuffer {
    fn append_buffer(&mut self, data: &[u8], bounds: Option<(f64, f64)>) -> SinkResult<()> {
        if let Some((start, end)) = bounds {
            let start = (start + self.timestamp_offset).max(self.append_window_start);
            let end = (end + self.timestamp_offset).min(self.append_window_end);
            self.ranges.insert(start, end);
            trace!(bytes = data.len(), start, end, "manual buffer append");
        } else {
            trace!(bytes = data.len(), "manual buffer append without bounds");
        }
        let _ = self.events.send(RawBufferEvent::UpdateEnd);
        Ok(())
    }

    fn remove(&mut self, start: f64, end: f64) -> SinkResult<()> {
        self.ranges.remove(start, end);
        let _ = self.events.send(RawBufferEvent::UpdateEnd);
        Ok(())
    }

    fn abort(&mut self) {}

    fn updating(&self) -> bool {
        false
    }

    fn buffered(&self) -> TimeRanges {
        self.ranges.clone()
    }

    fn codec(&self) -> String {
        self.codec.clone()
    }

    fn try_switch_codec(&mut self, codec: &str) -> bool {
        self.codec = codec.to_string();
        true
    }

    fn timestamp_offset(&self) -> f64 {
        self.timestamp_offset
    }

    fn set_timestamp_offset(&mut self, offset: f64) -> SinkResult<()> {
        self.timestamp_offset = offset;
        Ok(())
    }

    fn append_window_start(&self) -> f64 {
        self.append_window_start
    }

    fn set_append_window_start(&mut self, start: f64) -> SinkResult<()> {
        if start >= self.append_window_end {
            return Err(SinkError::Configuration(format!(
                "append window start {start} not below end {}",
                self.append_window_end
            )));
        }
        self.append_window_start = start;
        Ok(())
    }

    fn append_window_end(&self) -> f64 {
        self.append_window_end
    }

    fn set_append_window_end(&mut self, end: f64) -> SinkResult<()> {
        if end <= self.append_window_start {
            return Err(SinkError::Configuration(format!(
                "append window end {end} not above start {}",
                self.append_window_start
            )));
        }
        self.append_window_end = end;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RawBufferEvent> {
        self.events.subscribe()
    }
}
