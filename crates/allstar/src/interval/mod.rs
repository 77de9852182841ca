//! # Token-Type Interval Sets
//!
//! Sets of inclusive integer intervals over token types, used for transition
//! labels, lookahead sets, and "expecting" sets in error reports.
//!
//! Token types are `i32` with `-1` reserved for EOF, so the element type here
//! is signed even though user token types start at 1.

use smallvec::SmallVec;
use std::fmt;

/// An inclusive range `start..=stop` of token types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval {
    pub start: i32,
    pub stop: i32,
}

impl Interval {
    #[must_use]
    pub const fn new(start: i32, stop: i32) -> Self {
        Self { start, stop }
    }

    /// Number of elements, 0 for an inverted pair.
    #[must_use]
    pub const fn len(&self) -> usize {
        if self.stop < self.start {
            0
        } else {
            (self.stop - self.start + 1) as usize
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.stop < self.start
    }

    #[must_use]
    pub const fn contains(&self, value: i32) -> bool {
        self.start <= value && value <= self.stop
    }

    /// True when the two intervals overlap or touch, so their union is a
    /// single interval.
    #[must_use]
    pub const fn adjacent_or_overlaps(&self, other: &Self) -> bool {
        self.start <= other.stop.saturating_add(1) && other.start <= self.stop.saturating_add(1)
    }
}

/// A sorted, coalesced set of [`Interval`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IntervalSet {
    intervals: SmallVec<[Interval; 2]>,
}

impl IntervalSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            intervals: SmallVec::new(),
        }
    }

    /// A set containing the single value `value`.
    #[must_use]
    pub fn of(value: i32) -> Self {
        let mut s = Self::new();
        s.add(value);
        s
    }

    /// A set containing `start..=stop`.
    #[must_use]
    pub fn of_range(start: i32, stop: i32) -> Self {
        let mut s = Self::new();
        s.add_range(start, stop);
        s
    }

    /// Insert a single value.
    pub fn add(&mut self, value: i32) {
        self.add_range(value, value);
    }

    /// Insert `start..=stop`, coalescing with neighbors.
    pub fn add_range(&mut self, start: i32, stop: i32) {
        if stop < start {
            return;
        }
        let mut merged = Interval::new(start, stop);
        let mut out: SmallVec<[Interval; 2]> = SmallVec::new();
        let mut placed = false;
        for iv in &self.intervals {
            if iv.adjacent_or_overlaps(&merged) {
                merged.start = merged.start.min(iv.start);
                merged.stop = merged.stop.max(iv.stop);
            } else if iv.stop < merged.start {
                out.push(*iv);
            } else {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push(*iv);
            }
        }
        if !placed {
            out.push(merged);
        }
        self.intervals = out;
    }

    /// Insert every interval of `other`.
    pub fn add_set(&mut self, other: &Self) {
        for iv in &other.intervals {
            self.add_range(iv.start, iv.stop);
        }
    }

    /// Union as a new set.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut s = self.clone();
        s.add_set(other);
        s
    }

    /// Intersection as a new set.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        let mut out = Self::new();
        for a in &self.intervals {
            for b in &other.intervals {
                let start = a.start.max(b.start);
                let stop = a.stop.min(b.stop);
                if start <= stop {
                    out.add_range(start, stop);
                }
            }
        }
        out
    }

    /// Every value of `within` that is not in `self`.
    #[must_use]
    pub fn complement(&self, within: &Self) -> Self {
        within.subtract(self)
    }

    /// Set difference as a new set.
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        let mut out = Self::new();
        for a in &self.intervals {
            let mut start = a.start;
            for b in &other.intervals {
                if b.stop < start {
                    continue;
                }
                if b.start > a.stop {
                    break;
                }
                if b.start > start {
                    out.add_range(start, b.start - 1);
                }
                start = start.max(b.stop.saturating_add(1));
            }
            if start <= a.stop {
                out.add_range(start, a.stop);
            }
        }
        out
    }

    #[must_use]
    pub fn contains(&self, value: i32) -> bool {
        // Sorted and disjoint, so a binary search on start would do; the
        // sets here are tiny.
        self.intervals.iter().any(|iv| iv.contains(value))
    }

    /// True when the set has no elements.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Total number of contained values.
    #[must_use]
    pub fn size(&self) -> usize {
        self.intervals.iter().map(Interval::len).sum()
    }

    /// The single element, if the set has exactly one.
    #[must_use]
    pub fn single_element(&self) -> Option<i32> {
        if self.size() == 1 {
            Some(self.intervals[0].start)
        } else {
            None
        }
    }

    #[must_use]
    pub fn min_element(&self) -> Option<i32> {
        self.intervals.first().map(|iv| iv.start)
    }

    #[must_use]
    pub fn max_element(&self) -> Option<i32> {
        self.intervals.last().map(|iv| iv.stop)
    }

    /// The underlying intervals, sorted and disjoint.
    #[must_use]
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Iterate contained values in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.intervals.iter().flat_map(|iv| iv.start..=iv.stop)
    }
}

impl FromIterator<i32> for IntervalSet {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        let mut s = Self::new();
        for v in iter {
            s.add(v);
        }
        s
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, iv) in self.intervals.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if iv.start == iv.stop {
                write!(f, "{}", iv.start)?;
            } else {
                write!(f, "{}..{}", iv.start, iv.stop)?;
            }
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_coalesces() {
        let mut s = IntervalSet::new();
        s.add(3);
        s.add(5);
        s.add(4);
        assert_eq!(s.intervals(), &[Interval::new(3, 5)]);
        assert_eq!(s.size(), 3);
    }

    #[test]
    fn test_add_range_merges_overlaps() {
        let mut s = IntervalSet::of_range(1, 4);
        s.add_range(10, 12);
        s.add_range(3, 11);
        assert_eq!(s.intervals(), &[Interval::new(1, 12)]);
    }

    #[test]
    fn test_disjoint_stay_sorted() {
        let mut s = IntervalSet::new();
        s.add_range(10, 12);
        s.add_range(1, 2);
        s.add(5);
        assert_eq!(
            s.intervals(),
            &[
                Interval::new(1, 2),
                Interval::new(5, 5),
                Interval::new(10, 12)
            ]
        );
    }

    #[test]
    fn test_contains() {
        let s = IntervalSet::of_range(48, 57);
        assert!(s.contains(48));
        assert!(s.contains(57));
        assert!(!s.contains(58));
        assert!(!s.contains(-1));
    }

    #[test]
    fn test_and() {
        let a = IntervalSet::of_range(1, 10);
        let b: IntervalSet = [5, 6, 20].into_iter().collect();
        let i = a.and(&b);
        assert_eq!(i.intervals(), &[Interval::new(5, 6)]);
    }

    #[test]
    fn test_subtract_and_complement() {
        let a = IntervalSet::of_range(1, 10);
        let b = IntervalSet::of_range(4, 6);
        let d = a.subtract(&b);
        assert_eq!(d.intervals(), &[Interval::new(1, 3), Interval::new(7, 10)]);

        let c = b.complement(&a);
        assert_eq!(c, d);
    }

    #[test]
    fn test_size_and_single() {
        let s = IntervalSet::of(7);
        assert_eq!(s.size(), 1);
        assert_eq!(s.single_element(), Some(7));
        assert_eq!(IntervalSet::of_range(1, 3).single_element(), None);
        assert!(IntervalSet::new().is_nil());
    }

    #[test]
    fn test_display() {
        let mut s = IntervalSet::of_range(48, 57);
        s.add(65);
        assert_eq!(s.to_string(), "{48..57, 65}");
    }

    #[test]
    fn test_iter() {
        let s: IntervalSet = [2, 3, 9].into_iter().collect();
        let values: Vec<i32> = s.iter().collect();
        assert_eq!(values, vec![2, 3, 9]);
    }

    #[test]
    fn test_eof_representable() {
        let mut s = IntervalSet::of(-1);
        s.add(1);
        assert!(s.contains(-1));
        assert_eq!(s.min_element(), Some(-1));
    }
}
