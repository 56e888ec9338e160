#![forbid(unsafe_code)]

use skene_core::{TimeRanges, RANGE_EPSILON};
use skene_manifest::Segment;
use tracing::trace;

/// What a Representation Buffer asked to push.
#[derive(Clone, Debug)]
pub struct InsertedChunk {
    pub period_id: String,
    pub representation_id: String,
    pub segment: Segment,
    /// Requested extent in seconds.
    pub start: f64,
    pub end: f64,
}

/// One tracked stretch of pushed content.
///
/// `start`/`end` are what was requested; the `buffered_*` edges are what
/// the decoder actually retained, refreshed by
/// [`SegmentInventory::synchronize_buffered`].
#[derive(Clone, Debug)]
pub struct InventoryEntry {
    pub period_id: String,
    pub representation_id: String,
    pub segment: Segment,
    pub start: f64,
    pub end: f64,
    pub buffered_start: Option<f64>,
    pub buffered_end: Option<f64>,
}

impl InventoryEntry {
    /// Seconds the decoder currently retains of this entry.
    #[must_use]
    pub fn buffered_duration(&self) -> f64 {
        match (self.buffered_start, self.buffered_end) {
            (Some(start), Some(end)) => (end - start).max(0.0),
            _ => 0.0,
        }
    }
}

/// Reconciles "what the engine pushed" with "what the decoder kept".
///
/// Entries are kept in ascending requested start; overlapping inserts win
/// over what they cover (last-writer-wins); synchronisation against the
/// decoder's reported ranges drops entries with no retained data.
#[derive(Debug, Default)]
pub struct SegmentInventory {
    entries: Vec<InventoryEntry>,
}

impl SegmentInventory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entries(&self) -> &[InventoryEntry] {
        &self.entries
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Record a pushed chunk. Existing entries overlapped by the new
    /// requested interval are truncated or removed.
    pub fn insert_chunk(&mut self, chunk: InsertedChunk) {
        let InsertedChunk {
            period_id,
            representation_id,
            segment,
            start,
            end,
        } = chunk;
        if end <= start {
            return;
        }

        let mut rebuilt = Vec::with_capacity(self.entries.len() + 2);
        let mut inserted = false;
        for entry in self.entries.drain(..) {
            // Entirely before the new interval.
            if entry.end <= start + RANGE_EPSILON {
                rebuilt.push(entry);
                continue;
            }
            // Entirely after: emit the new entry first (ascending order).
            if entry.start >= end - RANGE_EPSILON {
                if !inserted {
                    rebuilt.push(InventoryEntry {
                        period_id: period_id.clone(),
                        representation_id: representation_id.clone(),
                        segment: segment.clone(),
                        start,
                        end,
                        buffered_start: None,
                        buffered_end: None,
                    });
                    inserted = true;
                }
                rebuilt.push(entry);
                continue;
            }
            // Overlap: keep the non-covered leftovers.
            if start - entry.start > RANGE_EPSILON {
                let mut left = entry.clone();
                left.end = start;
                left.buffered_end = None;
                rebuilt.push(left);
            }
            if entry.end - end > RANGE_EPSILON {
                if !inserted {
                    rebuilt.push(InventoryEntry {
                        period_id: period_id.clone(),
                        representation_id: representation_id.clone(),
                        segment: segment.clone(),
                        start,
                        end,
                        buffered_start: None,
                        buffered_end: None,
                    });
                    inserted = true;
                }
                let mut right = entry;
                right.start = end;
                right.buffered_start = None;
                rebuilt.push(right);
            }
        }
        if !inserted {
            rebuilt.push(InventoryEntry {
                period_id,
                representation_id,
                segment,
                start,
                end,
                buffered_start: None,
                buffered_end: None,
            });
        }
        self.entries = rebuilt;
    }

    /// Align every entry with the decoder-reported `ranges`.
    ///
    /// Single left-to-right walk over both sorted sequences (O(n+m)).
    /// An entry's buffered edges are the intersection of its requested
    /// interval with the containing range; edges within
    /// [`RANGE_EPSILON`] of the requested ones snap to them to absorb
    /// decoder rounding. Entries with no retained data are dropped.
    pub fn synchronize_buffered(&mut self, ranges: &TimeRanges) {
        let slices = ranges.as_slice();
        let mut ri = 0usize;
        let before = self.entries.len();

        self.entries.retain_mut(|entry| {
            while ri < slices.len() && slices[ri].end < entry.start + RANGE_EPSILON {
                ri += 1;
            }
            let Some(range) = slices.get(ri) else {
                return false;
            };

            let raw_start = entry.start.max(range.start);
            let raw_end = entry.end.min(range.end);
            if raw_end - raw_start <= RANGE_EPSILON {
                return false;
            }

            entry.buffered_start = Some(if (range.start - entry.start).abs() <= RANGE_EPSILON {
                entry.start
            } else {
                raw_start
            });
            entry.buffered_end = Some(if (range.end - entry.end).abs() <= RANGE_EPSILON {
                entry.end
            } else {
                raw_end
            });
            true
        });

        if self.entries.len() != before {
            trace!(
                dropped = before - self.entries.len(),
                remaining = self.entries.len(),
                "inventory entries evicted by decoder"
            );
        }
    }

    /// Retained ranges of entries matching `predicate`, for targeted
    /// removals (decipherability flushes, direct Representation switches).
    #[must_use]
    pub fn buffered_ranges_where(
        &self,
        predicate: impl Fn(&InventoryEntry) -> bool,
    ) -> Vec<(f64, f64)> {
        self.entries
            .iter()
            .filter(|e| predicate(e))
            .filter_map(|e| match (e.buffered_start, e.buffered_end) {
                (Some(start), Some(end)) if end > start => Some((start, end)),
                _ => None,
            })
            .collect()
    }

    /// Whether a segment of `representation_id` covering `[start, end)` is
    /// already tracked (pushed and not evicted).
    #[must_use]
    pub fn has_segment(&self, representation_id: &str, start: f64, end: f64) -> bool {
        self.entries.iter().any(|e| {
            e.representation_id == representation_id
                && e.start <= start + RANGE_EPSILON
                && e.end >= end - RANGE_EPSILON
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(id: &str, start: f64, end: f64) -> Segment {
        Segment {
            id: id.into(),
            time: (start * 90_000.0) as i64,
            duration: ((end - start) * 90_000.0) as i64,
            timescale: 90_000,
            media_urls: vec![],
            byte_range: None,
            is_init: false,
        }
    }

    fn chunk(repr: &str, id: &str, start: f64, end: f64) -> InsertedChunk {
        InsertedChunk {
            period_id: "p1".into(),
            representation_id: repr.into(),
            segment: segment(id, start, end),
            start,
            end,
        }
    }

    fn starts(inv: &SegmentInventory) -> Vec<f64> {
        inv.entries().iter().map(|e| e.start).collect()
    }

    #[test]
    fn inserts_stay_sorted() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s2", 4.0, 8.0));
        inv.insert_chunk(chunk("v1", "s1", 0.0, 4.0));
        inv.insert_chunk(chunk("v1", "s3", 8.0, 12.0));
        assert_eq!(starts(&inv), vec![0.0, 4.0, 8.0]);
    }

    #[test]
    fn overlapping_insert_wins_over_covered_region() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s1", 0.0, 10.0));
        inv.insert_chunk(chunk("v2", "s2", 3.0, 6.0));

        let entries = inv.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].representation_id, "v1");
        assert!((entries[0].end - 3.0).abs() < 1e-9);
        assert_eq!(entries[1].representation_id, "v2");
        assert_eq!(entries[2].representation_id, "v1");
        assert!((entries[2].start - 6.0).abs() < 1e-9);
    }

    #[test]
    fn full_overlap_removes_older_entry() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s1", 2.0, 6.0));
        inv.insert_chunk(chunk("v2", "s2", 0.0, 8.0));
        let entries = inv.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].representation_id, "v2");
    }

    #[test]
    fn synchronize_assigns_buffered_edges() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s1", 0.0, 4.0));
        inv.insert_chunk(chunk("v1", "s2", 4.0, 8.0));

        // Decoder rounded the edges slightly.
        let ranges = TimeRanges::from_pairs([(0.004, 7.996)]);
        inv.synchronize_buffered(&ranges);

        let entries = inv.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].buffered_start, Some(0.0));
        assert_eq!(entries[1].buffered_end, Some(8.0));
    }

    #[test]
    fn synchronize_drops_evicted_entries() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s1", 0.0, 4.0));
        inv.insert_chunk(chunk("v1", "s2", 4.0, 8.0));
        inv.insert_chunk(chunk("v1", "s3", 8.0, 12.0));

        // The decoder garbage-collected the head.
        let ranges = TimeRanges::from_pairs([(5.0, 12.0)]);
        inv.synchronize_buffered(&ranges);

        let entries = inv.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].buffered_start, Some(5.0));
        assert_eq!(entries[0].buffered_end, Some(8.0));
    }

    #[test]
    fn synchronize_with_empty_ranges_clears_everything() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s1", 0.0, 4.0));
        inv.synchronize_buffered(&TimeRanges::new());
        assert!(inv.entries().is_empty());
    }

    #[test]
    fn buffered_intervals_are_disjoint_after_sync() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s1", 0.0, 4.0));
        inv.insert_chunk(chunk("v2", "s2", 2.0, 6.0));
        inv.insert_chunk(chunk("v1", "s3", 6.0, 10.0));

        let ranges = TimeRanges::from_pairs([(0.0, 10.0)]);
        inv.synchronize_buffered(&ranges);

        let entries = inv.entries();
        for pair in entries.windows(2) {
            let end = pair[0].buffered_end.unwrap();
            let start = pair[1].buffered_start.unwrap();
            assert!(end <= start + RANGE_EPSILON);
        }
    }

    #[test]
    fn has_segment_tracks_pushed_content() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s1", 0.0, 4.0));
        assert!(inv.has_segment("v1", 0.0, 4.0));
        assert!(!inv.has_segment("v2", 0.0, 4.0));
        assert!(!inv.has_segment("v1", 4.0, 8.0));
    }

    #[test]
    fn buffered_ranges_where_filters_by_representation() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s1", 0.0, 4.0));
        inv.insert_chunk(chunk("v2", "s2", 4.0, 8.0));
        inv.synchronize_buffered(&TimeRanges::from_pairs([(0.0, 8.0)]));

        let ranges = inv.buffered_ranges_where(|e| e.representation_id == "v2");
        assert_eq!(ranges, vec![(4.0, 8.0)]);
    }

    #[test]
    fn reset_clears_entries() {
        let mut inv = SegmentInventory::new();
        inv.insert_chunk(chunk("v1", "s1", 0.0, 4.0));
        inv.reset();
        assert!(inv.entries().is_empty());
    }
}
