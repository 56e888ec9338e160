#![forbid(unsafe_code)]

//! Decoding of the raw `SegmentTimeline` element.
//!
//! A timeline is a sequence of `<S t="..." d="..." r="..."/>` elements.
//! Decoding is split in two steps: [`parse_s_elements`] pulls the raw
//! attribute triples out of the XML, [`resolve_entries`] applies the
//! defaulting rules (inherited start times, back-filled durations) to
//! produce concrete [`TimelineEntry`] values.

use quick_xml::{
    events::{BytesStart, Event},
    Reader, Writer,
};
use tracing::warn;

use crate::{ManifestError, ManifestResult};

/// One `<S>` element as found in the document, before defaulting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawTimelineEntry {
    pub t: Option<i64>,
    pub d: Option<i64>,
    pub r: Option<i64>,
}

/// One resolved timeline run: `repeat_count + 1` segments of `duration`
/// ticks starting at `start`. `repeat_count < 0` means "repeat until the
/// Period ends".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineEntry {
    pub start: i64,
    pub duration: i64,
    pub repeat_count: i64,
    /// Segment number of the run's first segment (for `$Number$` templates).
    pub first_number: u64,
}

/// Pull the `<S>` attribute triples out of a `SegmentTimeline` fragment.
pub fn parse_s_elements(xml: &str) -> ManifestResult<Vec<RawTimelineEntry>> {
    let mut reader = Reader::from_str(xml);
    let mut out = Vec::new();

    loop {
        match reader
            .read_event()
            .map_err(|e| ManifestError::TimelineParse(e.to_string()))?
        {
            Event::Empty(ref e) | Event::Start(ref e) if e.name().as_ref() == b"S" => {
                let mut raw = RawTimelineEntry::default();
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| ManifestError::TimelineParse(e.to_string()))?;
                    let value = attr
                        .unescape_value()
                        .map_err(|e| ManifestError::TimelineParse(e.to_string()))?;
                    let parsed = value.parse::<i64>().map_err(|_| {
                        ManifestError::InvalidAttribute {
                            attribute: "S",
                            value: value.to_string(),
                        }
                    })?;
                    match attr.key.as_ref() {
                        b"t" => raw.t = Some(parsed),
                        b"d" => raw.d = Some(parsed),
                        b"r" => raw.r = Some(parsed),
                        _ => {}
                    }
                }
                out.push(raw);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

/// Apply the timeline defaulting rules.
///
/// - missing `t` on the first entry ⇒ `default_first_start`
///   (the Period start in media ticks);
/// - missing `t` afterwards ⇒ previous run's end;
/// - missing `d` with a known next `t` ⇒ `next.t − start` (live updates
///   leave `d` off the last closed entry);
/// - missing `d` otherwise ⇒ the entry is dropped with a warning;
/// - missing `r` ⇒ 0.
pub fn resolve_entries(
    raw: &[RawTimelineEntry],
    default_first_start: i64,
    start_number: u64,
) -> Vec<TimelineEntry> {
    let mut out: Vec<TimelineEntry> = Vec::with_capacity(raw.len());
    let mut next_number = start_number;

    for (i, entry) in raw.iter().enumerate() {
        let start = match entry.t {
            Some(t) => t,
            None => match out.last() {
                Some(prev) => prev.start + prev.duration * (prev.repeat_count.max(0) + 1),
                None => default_first_start,
            },
        };

        let repeat_count = entry.r.unwrap_or(0);

        let duration = match entry.d {
            Some(d) if d > 0 => d,
            _ => match raw.get(i + 1).and_then(|next| next.t) {
                Some(next_t) if next_t > start && repeat_count == 0 => next_t - start,
                _ => {
                    warn!(
                        index = i,
                        start,
                        "timeline entry without a usable duration, dropping it"
                    );
                    continue;
                }
            },
        };

        out.push(TimelineEntry {
            start,
            duration,
            repeat_count,
            first_number: next_number,
        });
        let run_len = if repeat_count >= 0 {
            repeat_count as u64 + 1
        } else {
            // Open-ended run: no entry may follow, numbering stops here.
            1
        };
        next_number += run_len;
    }

    out
}

/// Serialise entries back to a `SegmentTimeline` fragment.
///
/// Used when re-emitting a refreshed live manifest, and by tests to check
/// the decode round-trips.
pub fn write_timeline(entries: &[TimelineEntry]) -> String {
    let mut writer = Writer::new(Vec::new());
    let _ = writer.write_event(Event::Start(BytesStart::new("SegmentTimeline")));
    for entry in entries {
        let mut s = BytesStart::new("S");
        s.push_attribute(("t", entry.start.to_string().as_str()));
        s.push_attribute(("d", entry.duration.to_string().as_str()));
        if entry.repeat_count != 0 {
            s.push_attribute(("r", entry.repeat_count.to_string().as_str()));
        }
        let _ = writer.write_event(Event::Empty(s));
    }
    let _ = writer.write_event(Event::End(quick_xml::events::BytesEnd::new(
        "SegmentTimeline",
    )));
    String::from_utf8(writer.into_inner()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuples(entries: &[TimelineEntry]) -> Vec<(i64, i64, i64)> {
        entries
            .iter()
            .map(|e| (e.start, e.duration, e.repeat_count))
            .collect()
    }

    #[test]
    fn parses_explicit_entries() {
        let raw = parse_s_elements(
            r#"<SegmentTimeline><S t="0" d="360360" r="2"/><S t="1081080" d="180180"/></SegmentTimeline>"#,
        )
        .unwrap();
        let entries = resolve_entries(&raw, 0, 1);
        assert_eq!(tuples(&entries), vec![(0, 360_360, 2), (1_081_080, 180_180, 0)]);
        assert_eq!(entries[0].first_number, 1);
        assert_eq!(entries[1].first_number, 4);
    }

    #[test]
    fn missing_t_inherits_previous_end() {
        let raw =
            parse_s_elements(r#"<S t="100" d="50" r="1"/><S d="25"/>"#).unwrap();
        let entries = resolve_entries(&raw, 0, 0);
        assert_eq!(tuples(&entries), vec![(100, 50, 1), (200, 25, 0)]);
    }

    #[test]
    fn missing_t_on_first_entry_uses_period_start() {
        let raw = parse_s_elements(r#"<S d="50"/>"#).unwrap();
        let entries = resolve_entries(&raw, 900, 0);
        assert_eq!(tuples(&entries), vec![(900, 50, 0)]);
    }

    #[test]
    fn missing_d_backfilled_from_next_t() {
        let raw = parse_s_elements(r#"<S t="0"/><S t="40" d="40"/>"#).unwrap();
        let entries = resolve_entries(&raw, 0, 0);
        assert_eq!(tuples(&entries), vec![(0, 40, 0), (40, 40, 0)]);
    }

    #[test]
    fn malformed_entry_without_duration_is_dropped() {
        let raw = parse_s_elements(r#"<S t="0" d="40"/><S t="40"/>"#).unwrap();
        let entries = resolve_entries(&raw, 0, 0);
        assert_eq!(tuples(&entries), vec![(0, 40, 0)]);
    }

    #[test]
    fn negative_repeat_is_preserved() {
        let raw = parse_s_elements(r#"<S t="0" d="40" r="-1"/>"#).unwrap();
        let entries = resolve_entries(&raw, 0, 0);
        assert_eq!(tuples(&entries), vec![(0, 40, -1)]);
    }

    #[test]
    fn rejects_non_numeric_attribute() {
        let err = parse_s_elements(r#"<S t="abc" d="40"/>"#).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidAttribute { .. }));
    }

    #[test]
    fn round_trip_preserves_tuples() {
        let source =
            r#"<SegmentTimeline><S t="0" d="360360" r="2"/><S d="180180"/><S t="1261260" d="90090" r="4"/></SegmentTimeline>"#;
        let first = resolve_entries(&parse_s_elements(source).unwrap(), 0, 0);
        let rendered = write_timeline(&first);
        let second = resolve_entries(&parse_s_elements(&rendered).unwrap(), 0, 0);
        assert_eq!(tuples(&first), tuples(&second));
    }
}
