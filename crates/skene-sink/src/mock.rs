#![forbid(unsafe_code)]

//! Configurable in-memory decoder buffer for tests.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use skene_core::TimeRanges;
use tokio::sync::broadcast;

use crate::{
    error::SinkResult,
    raw::{RawBufferEvent, RawMediaBuffer},
};

/// One recorded call against a [`MockRawBuffer`].
#[derive(Clone, Debug, PartialEq)]
pub enum MockOp {
    Append {
        bytes: Vec<u8>,
        codec: String,
        timestamp_offset: f64,
        window: (f64, f64),
    },
    Remove {
        start: f64,
        end: f64,
    },
    Abort,
    CodecSwitch {
        codec: String,
        accepted: bool,
    },
}

#[derive(Debug)]
struct MockState {
    ops: Vec<MockOp>,
    buffered: TimeRanges,
    updating: bool,
    codec: String,
    timestamp_offset: f64,
    append_window_start: f64,
    append_window_end: f64,
    fail_next_appends: u32,
    refuse_codec_switch: bool,
    completion_delay: Option<Duration>,
}

/// Decoder-buffer double with async completion, error injection and an
/// operation log. Clones share state, so tests keep one clone for
/// inspection while the queue owns the other.
#[derive(Clone)]
pub struct MockRawBuffer {
    state: Arc<Mutex<MockState>>,
    events: broadcast::Sender<RawBufferEvent>,
}

impl MockRawBuffer {
    #[must_use]
    pub fn new(codec: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Arc::new(Mutex::new(MockState {
                ops: Vec::new(),
                buffered: TimeRanges::new(),
                updating: false,
                codec: codec.into(),
                timestamp_offset: 0.0,
                append_window_start: 0.0,
                append_window_end: f64::INFINITY,
                fail_next_appends: 0,
                refuse_codec_switch: false,
                completion_delay: None,
            })),
            events,
        }
    }

    /// Complete mutations only after `delay`, off the caller's stack.
    pub fn with_completion_delay(self, delay: Duration) -> Self {
        self.state.lock().completion_delay = Some(delay);
        self
    }

    pub fn fail_next_appends(&self, count: u32) {
        self.state.lock().fail_next_appends = count;
    }

    pub fn refuse_codec_switch(&self, refuse: bool) {
        self.state.lock().refuse_codec_switch = refuse;
    }

    pub fn ops(&self) -> Vec<MockOp> {
        self.state.lock().ops.clone()
    }

    /// Recorded appends only, in submission order.
    pub fn appended_payloads(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                MockOp::Append { bytes, .. } => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn finish(&self, apply: impl FnOnce(&mut MockState) + Send + 'static, failed: Option<String>) {
        let delay = self.state.lock().completion_delay;
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let complete = move || {
            let mut guard = state.lock();
            guard.updating = false;
            match failed {
                Some(message) => {
                    let _ = events.send(RawBufferEvent::Error(message));
                }
                None => {
                    apply(&mut guard);
                    let _ = events.send(RawBufferEvent::UpdateEnd);
                }
            }
        };
        match delay {
            Some(delay) => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    complete();
                });
            }
            None => complete(),
        }
    }
}

impl RawMediaBuffer for MockRawBuffer {
    fn append_buffer(&mut self, data: &[u8], bounds: Option<(f64, f64)>) -> SinkResult<()> {
        let failed = {
            let mut state = self.state.lock();
            let codec = state.codec.clone();
            let timestamp_offset = state.timestamp_offset;
            let window = (state.append_window_start, state.append_window_end);
            state.ops.push(MockOp::Append {
                bytes: data.to_vec(),
                codec,
                timestamp_offset,
                window,
            });
            state.updating = true;
            if state.fail_next_appends > 0 {
                state.fail_next_appends -= 1;
                Some("injected append failure".to_string())
            } else {
                None
            }
        };
        let bounds = bounds.map(|(start, end)| {
            let state = self.state.lock();
            (
                (start + state.timestamp_offset).max(state.append_window_start),
                (end + state.timestamp_offset).min(state.append_window_end),
            )
        });
        self.finish(
            move |state| {
                if let Some((start, end)) = bounds {
                    state.buffered.insert(start, end);
                }
            },
            failed,
        );
        Ok(())
    }

    fn remove(&mut self, start: f64, end: f64) -> SinkResult<()> {
        {
            let mut state = self.state.lock();
            state.ops.push(MockOp::Remove { start, end });
            state.updating = true;
        }
        self.finish(
            move |state| {
                state.buffered.remove(start, end);
            },
            None,
        );
        Ok(())
    }

    fn abort(&mut self) {
        let mut state = self.state.lock();
        state.ops.push(MockOp::Abort);
        state.updating = false;
    }

    fn updating(&self) -> bool {
        self.state.lock().updating
    }

    fn buffered(&self) -> TimeRanges {
        self.state.lock().buffered.clone()
    }

    fn codec(&self) -> String {
        self.state.lock().codec.clone()
    }

    fn try_switch_codec(&mut self, codec: &str) -> bool {
        let mut state = self.state.lock();
        let accepted = !state.refuse_codec_switch;
        state.ops.push(MockOp::CodecSwitch {
            codec: codec.to_string(),
            accepted,
        });
        if accepted {
            state.codec = codec.to_string();
        }
        accepted
    }

    fn timestamp_offset(&self) -> f64 {
        self.state.lock().timestamp_offset
    }

    fn set_timestamp_offset(&mut self, offset: f64) -> SinkResult<()> {
        self.state.lock().timestamp_offset = offset;
        Ok(())
    }

    fn append_window_start(&self) -> f64 {
        self.state.lock().append_window_start
    }

    fn set_append_window_start(&mut self, start: f64) -> SinkResult<()> {
        self.state.lock().append_window_start = start;
        Ok(())
    }

    fn append_window_end(&self) -> f64 {
        self.state.lock().append_window_end
    }

    fn set_append_window_end(&mut self, end: f64) -> SinkResult<()> {
        self.state.lock().append_window_end = end;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RawBufferEvent> {
        self.events.subscribe()
    }
}
