#![forbid(unsafe_code)]

//! Time-range bookkeeping in seconds.
//!
//! [`TimeRanges`] mirrors what a decoder buffer reports as its retained
//! content: a sorted list of non-overlapping `[start, end)` intervals.
//! Decoders round segment edges, so all comparisons tolerate
//! [`RANGE_EPSILON`] of drift.

/// Tolerance absorbed when comparing decoder-reported range edges
/// against the edges the engine requested (one frame at 60fps).
pub const RANGE_EPSILON: f64 = 1.0 / 60.0;

/// One contiguous `[start, end)` interval in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range {
    pub start: f64,
    pub end: f64,
}

impl Range {
    #[must_use]
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Whether `time` falls inside this range (epsilon-tolerant on edges).
    #[must_use]
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start - RANGE_EPSILON && time < self.end + RANGE_EPSILON
    }

    /// Intersection with another range, `None` when disjoint.
    #[must_use]
    pub fn intersection(&self, other: &Range) -> Option<Range> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if end > start {
            Some(Range { start, end })
        } else {
            None
        }
    }
}

/// Sorted, non-overlapping set of [`Range`]s.
///
/// Adjacent ranges within [`RANGE_EPSILON`] are merged on insertion, the
/// way decoders merge contiguous appends.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeRanges {
    ranges: Vec<Range>,
}

impl TimeRanges {
    #[must_use]
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Build from `(start, end)` pairs. Pairs are inserted one by one, so
    /// unsorted or overlapping input is normalised.
    #[must_use]
    pub fn from_pairs<I: IntoIterator<Item = (f64, f64)>>(pairs: I) -> Self {
        let mut out = Self::new();
        for (start, end) in pairs {
            out.insert(start, end);
        }
        out
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Range] {
        &self.ranges
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range> {
        self.ranges.iter()
    }

    /// Total retained duration in seconds.
    #[must_use]
    pub fn total_duration(&self) -> f64 {
        self.ranges.iter().map(Range::duration).sum()
    }

    /// Insert `[start, end)`, merging with any overlapping or
    /// epsilon-adjacent ranges.
    pub fn insert(&mut self, start: f64, end: f64) {
        if end <= start {
            return;
        }
        let mut new = Range { start, end };
        let mut merged = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;
        for r in self.ranges.drain(..) {
            if r.end + RANGE_EPSILON < new.start {
                merged.push(r);
            } else if new.end + RANGE_EPSILON < r.start {
                if !placed {
                    merged.push(new);
                    placed = true;
                }
                merged.push(r);
            } else {
                new.start = new.start.min(r.start);
                new.end = new.end.max(r.end);
            }
        }
        if !placed {
            merged.push(new);
        }
        self.ranges = merged;
    }

    /// Remove `[start, end)`, splitting ranges that straddle the removal.
    pub fn remove(&mut self, start: f64, end: f64) {
        if end <= start {
            return;
        }
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        for r in self.ranges.drain(..) {
            if r.end <= start || r.start >= end {
                out.push(r);
                continue;
            }
            if r.start < start {
                out.push(Range {
                    start: r.start,
                    end: start,
                });
            }
            if r.end > end {
                out.push(Range {
                    start: end,
                    end: r.end,
                });
            }
        }
        self.ranges = out;
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// The range containing `time`, if any.
    #[must_use]
    pub fn range_containing(&self, time: f64) -> Option<&Range> {
        self.ranges.iter().find(|r| r.contains(time))
    }

    #[must_use]
    pub fn contains_time(&self, time: f64) -> bool {
        self.range_containing(time).is_some()
    }

    /// Whether the whole `[start, end)` interval is retained, allowing
    /// epsilon-sized holes at the edges.
    #[must_use]
    pub fn covers(&self, start: f64, end: f64) -> bool {
        self.ranges.iter().any(|r| {
            r.start <= start + RANGE_EPSILON && r.end >= end - RANGE_EPSILON
        })
    }

    /// Whether any retained data intersects `[start, end)`.
    #[must_use]
    pub fn intersects(&self, start: f64, end: f64) -> bool {
        let probe = Range { start, end };
        self.ranges.iter().any(|r| r.intersection(&probe).is_some())
    }
}

impl<'a> IntoIterator for &'a TimeRanges {
    type Item = &'a Range;
    type IntoIter = std::slice::Iter<'a, Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.ranges.iter()
    }
}
