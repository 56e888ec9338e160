#![forbid(unsafe_code)]

use std::{fmt, sync::Arc};

use crate::Segment;

/// Time→segment mapping for one Representation.
///
/// Static indexes know their full segment list up front; dynamic (live)
/// indexes grow at the tail and are evicted at the head as the timeshift
/// window advances.
pub trait SegmentIndex: Send + Sync + fmt::Debug {
    /// The initialization segment, when the Representation needs one.
    fn init_segment(&self) -> Option<Segment>;

    /// Media segments intersecting `[from, from + duration]` seconds.
    fn segments(&self, from: f64, duration: f64) -> Vec<Segment>;

    /// Start of the earliest reachable segment, in seconds.
    fn first_position(&self) -> Option<f64>;

    /// End of the latest generated segment, in seconds.
    fn last_position(&self) -> Option<f64>;

    /// Whether `segment` can still be fetched. `None` means unknown
    /// (e.g. a dynamic index that has not refreshed yet).
    fn is_segment_still_available(&self, segment: &Segment) -> Option<bool>;

    /// If `time` falls in a gap between segments, the position of the next
    /// reachable segment; `None` when there is no discontinuity at `time`.
    fn check_discontinuity(&self, time: f64) -> Option<f64>;

    /// Whether the index needs a manifest refresh to cover `[from, to]`.
    fn should_refresh(&self, from: f64, to: f64) -> bool;

    /// Whether the index will never list further segments.
    fn is_finished(&self) -> bool;

    /// Whether a loader failure with this HTTP status may just mean the
    /// index is out of sync with the server (refresh instead of failing).
    fn can_be_out_of_sync_error(&self, http_status: Option<u16>) -> bool;
}

/// One specific encoding (codec + bitrate) of a track.
#[derive(Clone)]
pub struct Representation {
    pub id: String,
    pub bitrate: u32,
    pub codec: String,
    pub mime_type: String,
    pub index: Arc<dyn SegmentIndex>,
}

impl Representation {
    /// Full codec string as a decoder buffer expects it,
    /// e.g. `video/mp4;codecs="avc1.64001f"`.
    #[must_use]
    pub fn full_mime_type(&self) -> String {
        if self.codec.is_empty() {
            self.mime_type.clone()
        } else {
            format!("{};codecs=\"{}\"", self.mime_type, self.codec)
        }
    }
}

impl fmt::Debug for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Representation")
            .field("id", &self.id)
            .field("bitrate", &self.bitrate)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}
