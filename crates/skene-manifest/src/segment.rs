#![forbid(unsafe_code)]

use url::Url;

/// One addressable media chunk.
///
/// `time` and `duration` are integer media-time ticks already aligned to
/// presentation time (the index-time offset has been subtracted by the
/// generating index), so `seconds = ticks / timescale` throughout.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub id: String,
    pub time: i64,
    pub duration: i64,
    pub timescale: u64,
    pub media_urls: Vec<Url>,
    /// Inclusive-start byte range inside the resource, when the segment is
    /// not a whole file.
    pub byte_range: Option<(u64, Option<u64>)>,
    pub is_init: bool,
}

impl Segment {
    /// Initialization segment for a Representation.
    #[must_use]
    pub fn init(id: impl Into<String>, timescale: u64, media_urls: Vec<Url>) -> Self {
        Self {
            id: id.into(),
            time: 0,
            duration: 0,
            timescale,
            media_urls,
            byte_range: None,
            is_init: true,
        }
    }

    /// Presentation start in seconds.
    #[must_use]
    pub fn start(&self) -> f64 {
        self.time as f64 / self.timescale as f64
    }

    /// Duration in seconds (zero for init segments).
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.duration as f64 / self.timescale as f64
    }

    /// Presentation end in seconds.
    #[must_use]
    pub fn end(&self) -> f64 {
        (self.time + self.duration) as f64 / self.timescale as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_conversion() {
        let seg = Segment {
            id: "video_90000".into(),
            time: 90_000,
            duration: 180_000,
            timescale: 90_000,
            media_urls: vec![],
            byte_range: None,
            is_init: false,
        };
        assert!((seg.start() - 1.0).abs() < 1e-9);
        assert!((seg.duration_secs() - 2.0).abs() < 1e-9);
        assert!((seg.end() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn init_segment_has_no_extent() {
        let seg = Segment::init("init", 90_000, vec![]);
        assert!(seg.is_init);
        assert_eq!(seg.duration, 0);
        assert_eq!(seg.start(), 0.0);
    }
}
