#![forbid(unsafe_code)]

//! `SegmentTimeline`-backed segment index.
//!
//! The timeline element is kept as raw XML until the first query, then
//! decoded once and queried in place. Dynamic (live) indexes additionally
//! evict runs from the head as the timeshift window advances; eviction is
//! monotone, a cleared run never comes back.

mod parse;

pub use parse::{parse_s_elements, resolve_entries, write_timeline, RawTimelineEntry, TimelineEntry};

use parking_lot::Mutex;
use tracing::warn;
use url::Url;

use crate::{Segment, SegmentIndex};

/// Extra ticks tolerated when deciding whether a dynamic timeline has
/// reached the Period end (one frame at 60fps, scaled).
fn end_tolerance(timescale: u64) -> f64 {
    timescale as f64 / 60.0
}

impl TimelineEntry {
    /// Number of segments in this run. Open-ended runs (`repeat_count < 0`)
    /// expand to the next run's start or the Period end.
    fn run_count(&self, next_start: Option<i64>, scaled_period_end: Option<i64>) -> i64 {
        if self.repeat_count >= 0 {
            return self.repeat_count + 1;
        }
        let limit = next_start
            .or(scaled_period_end)
            .unwrap_or(self.start + self.duration);
        let count = ((limit - self.start) as f64 / self.duration as f64).ceil() as i64;
        count.max(1)
    }

    fn run_end(&self, next_start: Option<i64>, scaled_period_end: Option<i64>) -> i64 {
        self.start + self.duration * self.run_count(next_start, scaled_period_end)
    }
}

#[derive(Debug, Default)]
struct TimelineState {
    raw: Option<String>,
    entries: Vec<TimelineEntry>,
    parsed: bool,
    /// Monotone head-eviction cursor, media ticks.
    cleared_up_to: i64,
    /// Earliest still-available presentation second, applied before every
    /// query on dynamic indexes.
    first_available: Option<f64>,
}

/// Lazily-parsed ordered segment list for one Representation.
#[derive(Debug)]
pub struct TimelineIndex {
    repr_id: String,
    timescale: u64,
    /// `presentation_time_offset − period_start × timescale`:
    /// `media_ticks = seconds × timescale + index_time_offset`.
    index_time_offset: i64,
    start_number: u64,
    init_url: Option<Url>,
    media_template: Option<String>,
    scaled_period_start: i64,
    scaled_period_end: Option<i64>,
    is_dynamic: bool,
    state: Mutex<TimelineState>,
}

pub struct TimelineIndexBuilder {
    repr_id: String,
    timescale: u64,
    period_start: f64,
    period_end: Option<f64>,
    presentation_time_offset: i64,
    start_number: u64,
    init_url: Option<Url>,
    media_template: Option<String>,
    dynamic: bool,
    timeline_xml: Option<String>,
    entries: Option<Vec<TimelineEntry>>,
}

impl TimelineIndexBuilder {
    pub fn period_start(mut self, start: f64) -> Self {
        self.period_start = start;
        self
    }

    pub fn period_end(mut self, end: f64) -> Self {
        self.period_end = Some(end);
        self
    }

    pub fn presentation_time_offset(mut self, offset: i64) -> Self {
        self.presentation_time_offset = offset;
        self
    }

    pub fn start_number(mut self, number: u64) -> Self {
        self.start_number = number;
        self
    }

    pub fn init_url(mut self, url: Url) -> Self {
        self.init_url = Some(url);
        self
    }

    /// Media URL template; `$Time$` and `$Number$` are substituted per
    /// segment.
    pub fn media_template(mut self, template: impl Into<String>) -> Self {
        self.media_template = Some(template.into());
        self
    }

    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Raw `SegmentTimeline` XML, decoded on first query.
    pub fn timeline_xml(mut self, xml: impl Into<String>) -> Self {
        self.timeline_xml = Some(xml.into());
        self
    }

    /// Pre-resolved entries (skips the lazy parse).
    pub fn entries(mut self, entries: Vec<TimelineEntry>) -> Self {
        self.entries = Some(entries);
        self
    }

    #[must_use]
    pub fn build(self) -> TimelineIndex {
        let scaled_period_start = (self.period_start * self.timescale as f64).round() as i64;
        let index_time_offset = self.presentation_time_offset - scaled_period_start;
        let scaled_period_end = self
            .period_end
            .map(|end| (end * self.timescale as f64).round() as i64 + index_time_offset);
        let state = match self.entries {
            Some(entries) => TimelineState {
                raw: None,
                entries,
                parsed: true,
                ..TimelineState::default()
            },
            None => TimelineState {
                raw: self.timeline_xml,
                ..TimelineState::default()
            },
        };
        TimelineIndex {
            repr_id: self.repr_id,
            timescale: self.timescale,
            index_time_offset,
            start_number: self.start_number,
            init_url: self.init_url,
            media_template: self.media_template,
            scaled_period_start: scaled_period_start + index_time_offset,
            scaled_period_end,
            is_dynamic: self.dynamic,
            state: Mutex::new(state),
        }
    }
}

impl TimelineIndex {
    pub fn builder(repr_id: impl Into<String>, timescale: u64) -> TimelineIndexBuilder {
        TimelineIndexBuilder {
            repr_id: repr_id.into(),
            timescale,
            period_start: 0.0,
            period_end: None,
            presentation_time_offset: 0,
            start_number: 1,
            init_url: None,
            media_template: None,
            dynamic: false,
            timeline_xml: None,
            entries: None,
        }
    }

    fn to_index_time(&self, seconds: f64) -> i64 {
        (seconds * self.timescale as f64).round() as i64 + self.index_time_offset
    }

    fn from_index_time(&self, ticks: i64) -> f64 {
        (ticks - self.index_time_offset) as f64 / self.timescale as f64
    }

    /// Advance the availability window; runs entirely before
    /// `first_available` seconds are dropped on the next query.
    pub fn set_first_available_position(&self, first_available: f64) {
        let mut state = self.state.lock();
        state.first_available = Some(
            state
                .first_available
                .map_or(first_available, |prev| prev.max(first_available)),
        );
    }

    fn ensure_ready(&self, state: &mut TimelineState) {
        if !state.parsed {
            state.parsed = true;
            if let Some(raw) = state.raw.take() {
                match parse_s_elements(&raw) {
                    Ok(entries) => {
                        state.entries = resolve_entries(
                            &entries,
                            self.scaled_period_start,
                            self.start_number,
                        );
                    }
                    Err(err) => {
                        warn!(repr = %self.repr_id, error = %err, "dropping unparsable timeline");
                    }
                }
            }
        }
        if self.is_dynamic {
            if let Some(first_available) = state.first_available {
                let cutoff = self.to_index_time(first_available);
                Self::clear_from_ticks(state, cutoff, self.scaled_period_end);
            }
        }
    }

    fn clear_from_ticks(state: &mut TimelineState, cutoff: i64, scaled_period_end: Option<i64>) {
        if cutoff <= state.cleared_up_to {
            return;
        }
        state.cleared_up_to = cutoff;
        while !state.entries.is_empty() {
            let next_start = state.entries.get(1).map(|e| e.start);
            let first = &mut state.entries[0];
            if first.run_end(next_start, scaled_period_end) <= cutoff {
                state.entries.remove(0);
                continue;
            }
            if first.start < cutoff {
                // Partially evicted run: drop the leading segments whose
                // start predates the cutoff, keeping alignment.
                let advanced = (cutoff - first.start + first.duration - 1) / first.duration;
                first.start += advanced * first.duration;
                first.first_number += advanced as u64;
                if first.repeat_count >= 0 {
                    first.repeat_count -= advanced;
                    if first.repeat_count < 0 {
                        state.entries.remove(0);
                        continue;
                    }
                }
            }
            break;
        }
    }

    fn media_urls_for(&self, media_ticks: i64, number: u64) -> Vec<Url> {
        let Some(template) = &self.media_template else {
            return Vec::new();
        };
        let resolved = template
            .replace("$Time$", &media_ticks.to_string())
            .replace("$Number$", &number.to_string());
        match Url::parse(&resolved) {
            Ok(url) => vec![url],
            Err(err) => {
                warn!(repr = %self.repr_id, url = %resolved, error = %err, "unresolvable media URL");
                Vec::new()
            }
        }
    }

    fn make_segment(&self, media_ticks: i64, duration: i64, number: u64) -> Segment {
        let presentation_ticks = media_ticks - self.index_time_offset;
        Segment {
            id: format!("{}_{}", self.repr_id, presentation_ticks),
            time: presentation_ticks,
            duration,
            timescale: self.timescale,
            media_urls: self.media_urls_for(media_ticks, number),
            byte_range: None,
            is_init: false,
        }
    }

    fn last_generated_end(state: &TimelineState, scaled_period_end: Option<i64>) -> Option<i64> {
        let last = state.entries.last()?;
        Some(last.run_end(None, scaled_period_end))
    }
}

impl SegmentIndex for TimelineIndex {
    fn init_segment(&self) -> Option<Segment> {
        self.init_url.as_ref().map(|url| {
            Segment::init(
                format!("{}_init", self.repr_id),
                self.timescale,
                vec![url.clone()],
            )
        })
    }

    fn segments(&self, from: f64, duration: f64) -> Vec<Segment> {
        let mut state = self.state.lock();
        self.ensure_ready(&mut state);

        let from_ticks = self.to_index_time(from);
        let to_ticks = self.to_index_time(from + duration);
        let entries = &state.entries;

        // Binary search for the first run that could intersect the window.
        let upper = entries.partition_point(|e| e.start <= from_ticks);
        let first_idx = upper.saturating_sub(1);

        let mut out = Vec::new();
        for (i, entry) in entries.iter().enumerate().skip(first_idx) {
            if entry.start >= to_ticks {
                break;
            }
            let next_start = entries.get(i + 1).map(|e| e.start);
            let count = entry.run_count(next_start, self.scaled_period_end);
            // First repeat index whose end is past the window start.
            let skip = if from_ticks > entry.start {
                (from_ticks - entry.start) / entry.duration
            } else {
                0
            };
            for k in skip..count {
                let seg_start = entry.start + k * entry.duration;
                if seg_start >= to_ticks {
                    break;
                }
                if seg_start + entry.duration <= from_ticks {
                    continue;
                }
                out.push(self.make_segment(
                    seg_start,
                    entry.duration,
                    entry.first_number + k as u64,
                ));
            }
        }
        out
    }

    fn first_position(&self) -> Option<f64> {
        let mut state = self.state.lock();
        self.ensure_ready(&mut state);
        state
            .entries
            .first()
            .map(|e| self.from_index_time(e.start))
    }

    fn last_position(&self) -> Option<f64> {
        let mut state = self.state.lock();
        self.ensure_ready(&mut state);
        Self::last_generated_end(&state, self.scaled_period_end)
            .map(|end| self.from_index_time(end))
    }

    fn is_segment_still_available(&self, segment: &Segment) -> Option<bool> {
        if segment.is_init {
            return Some(self.init_url.is_some());
        }
        let mut state = self.state.lock();
        self.ensure_ready(&mut state);

        let media_ticks = segment.time + self.index_time_offset;
        let first = match state.entries.first() {
            Some(first) => first,
            None => return if self.is_dynamic { None } else { Some(false) },
        };
        if media_ticks < first.start {
            return Some(false);
        }
        let entries = &state.entries;
        let upper = entries.partition_point(|e| e.start <= media_ticks);
        let entry = &entries[upper - 1];
        let next_start = entries.get(upper).map(|e| e.start);
        if media_ticks < entry.run_end(next_start, self.scaled_period_end) {
            let aligned = (media_ticks - entry.start) % entry.duration == 0
                && segment.duration == entry.duration;
            return Some(aligned);
        }
        if self.is_dynamic {
            None
        } else {
            Some(false)
        }
    }

    fn check_discontinuity(&self, time: f64) -> Option<f64> {
        let mut state = self.state.lock();
        self.ensure_ready(&mut state);

        let ticks = self.to_index_time(time);
        let entries = &state.entries;
        let upper = entries.partition_point(|e| e.start <= ticks);
        if upper == 0 {
            return None;
        }
        let entry = &entries[upper - 1];
        let next = entries.get(upper);
        let end = entry.run_end(next.map(|e| e.start), self.scaled_period_end);
        match next {
            Some(next) if ticks >= end && next.start > ticks => {
                Some(self.from_index_time(next.start))
            }
            _ => None,
        }
    }

    fn should_refresh(&self, _from: f64, to: f64) -> bool {
        if !self.is_dynamic || self.is_finished() {
            return false;
        }
        let mut state = self.state.lock();
        self.ensure_ready(&mut state);
        match Self::last_generated_end(&state, self.scaled_period_end) {
            Some(end) => self.to_index_time(to) > end,
            None => true,
        }
    }

    fn is_finished(&self) -> bool {
        if !self.is_dynamic {
            return true;
        }
        let Some(period_end) = self.scaled_period_end else {
            return false;
        };
        let mut state = self.state.lock();
        self.ensure_ready(&mut state);
        match Self::last_generated_end(&state, self.scaled_period_end) {
            Some(end) => end as f64 + end_tolerance(self.timescale) >= period_end as f64,
            None => false,
        }
    }

    fn can_be_out_of_sync_error(&self, http_status: Option<u16>) -> bool {
        self.is_dynamic && http_status == Some(404)
    }
}
