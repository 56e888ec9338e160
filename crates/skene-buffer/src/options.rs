#![forbid(unsafe_code)]

use std::time::Duration;

use skene_core::MediaType;

/// How a quality switch replaces already-buffered content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SwitchMode {
    /// Let the next unfetched segment use the new Representation; old and
    /// new content briefly coexist in the inventory.
    #[default]
    Seamless,
    /// Drop the old Representation's retained ranges inside the Period
    /// and re-buffer them.
    Direct,
}

/// Buffering configuration, shared by every pipeline.
#[derive(Clone, Debug)]
pub struct BufferOptions {
    /// Target look-ahead in seconds.
    pub wanted_buffer_ahead: f64,
    /// Garbage-collection bound ahead of the playhead; `INFINITY` keeps
    /// everything (still capped per type).
    pub max_buffer_ahead: f64,
    /// Garbage-collection bound behind the playhead.
    pub max_buffer_behind: f64,
    pub manual_switch_mode: SwitchMode,
    /// Watchdog period of the serialised buffer queues.
    pub queue_flush_interval: Duration,
    /// Widening applied to the Period's append window so that segments
    /// touching its edges are not truncated to zero-width artifacts.
    pub append_window_security_start: f64,
    pub append_window_security_end: f64,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            wanted_buffer_ahead: 30.0,
            max_buffer_ahead: f64::INFINITY,
            max_buffer_behind: f64::INFINITY,
            manual_switch_mode: SwitchMode::Seamless,
            queue_flush_interval: Duration::from_millis(500),
            append_window_security_start: 0.1,
            append_window_security_end: 0.1,
        }
    }
}

impl BufferOptions {
    pub fn with_wanted_buffer_ahead(mut self, seconds: f64) -> Self {
        self.wanted_buffer_ahead = seconds;
        self
    }

    pub fn with_max_buffer_ahead(mut self, seconds: f64) -> Self {
        self.max_buffer_ahead = seconds;
        self
    }

    pub fn with_max_buffer_behind(mut self, seconds: f64) -> Self {
        self.max_buffer_behind = seconds;
        self
    }

    pub fn with_switch_mode(mut self, mode: SwitchMode) -> Self {
        self.manual_switch_mode = mode;
        self
    }

    /// Configured bound clamped to the per-type hard cap.
    #[must_use]
    pub fn effective_max_behind(&self, media_type: MediaType) -> f64 {
        self.max_buffer_behind.min(hard_max_behind(media_type))
    }

    #[must_use]
    pub fn effective_max_ahead(&self, media_type: MediaType) -> f64 {
        self.max_buffer_ahead.min(hard_max_ahead(media_type))
    }
}

/// Hard retention caps; custom buffers hold decoded payloads in memory,
/// so their caps are far tighter than the native ones.
fn hard_max_behind(media_type: MediaType) -> f64 {
    match media_type {
        MediaType::Audio | MediaType::Video => f64::INFINITY,
        MediaType::Text => 3.0 * 60.0 * 60.0,
        MediaType::Image => 4.0 * 60.0,
    }
}

fn hard_max_ahead(media_type: MediaType) -> f64 {
    match media_type {
        MediaType::Audio | MediaType::Video => f64::INFINITY,
        MediaType::Text => 3.0 * 60.0 * 60.0,
        MediaType::Image => 4.0 * 60.0,
    }
}
