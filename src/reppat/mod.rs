/*!
# Repetition patterns and range lookups

A `RepetitionPattern` lists the dynamic instance numbers (invocations,
iterations, call instances) that share one content record, as ordered
disjoint closed ranges. `RangeLookup` flattens many patterns into one
binary-searchable table; `SortedRangeLookup` is the miss-tolerant variant
the streamed collections use to decide when to pull more segments.
*/

pub mod lookup;
pub mod sorted;

pub use lookup::RangeLookup;
pub use sorted::SortedRangeLookup;

use std::fmt;

/// Ordered disjoint closed ranges of instance numbers.
///
/// Ranges are appended in caller order and never coalesced: `{3-4,5-6}`
/// stays two ranges even though they touch. Callers must keep ranges
/// non-decreasing and disjoint; `add_instance` may extend the final range
/// by one but previously separate ranges are never joined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepetitionPattern {
    ranges: Vec<(u64, u64)>,
}

impl RepetitionPattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pattern holding the single instance `n`.
    pub fn singleton(n: u64) -> Self {
        Self { ranges: vec![(n, n)] }
    }

    /// Append the closed range `[start, end]`. Must start after the
    /// current last instance.
    pub fn add_pair(&mut self, start: u64, end: u64) {
        debug_assert!(start <= end);
        if let Some(&(_, last_end)) = self.ranges.last() {
            debug_assert!(start > last_end, "ranges must stay ordered and disjoint");
        }
        self.ranges.push((start, end));
    }

    /// Record one more instance, extending the final range when `n`
    /// directly follows it.
    pub fn add_instance(&mut self, n: u64) {
        match self.ranges.last_mut() {
            Some((_, end)) if *end + 1 == n => *end = n,
            Some(&mut (_, end)) => {
                debug_assert!(n > end, "instances must arrive in increasing order");
                self.ranges.push((n, n));
            }
            None => self.ranges.push((n, n)),
        }
    }

    pub fn pairs(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    /// Every instance number, in ascending order.
    pub fn instances(&self) -> impl Iterator<Item = u64> + '_ {
        self.ranges.iter().flat_map(|&(start, end)| start..=end)
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn instance_count(&self) -> u64 {
        self.ranges.iter().map(|&(start, end)| end - start + 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// True iff exactly one range of length one.
    pub fn is_singleton(&self) -> bool {
        self.ranges.len() == 1 && self.ranges[0].0 == self.ranges[0].1
    }

    pub fn first_instance(&self) -> Option<u64> {
        self.ranges.first().map(|&(start, _)| start)
    }

    pub fn last_instance(&self) -> Option<u64> {
        self.ranges.last().map(|&(_, end)| end)
    }

    /// Drop the lowest instance; a length-one boundary range disappears.
    pub fn remove_first_instance(&mut self) {
        if let Some((start, end)) = self.ranges.first_mut() {
            if *start == *end {
                self.ranges.remove(0);
            } else {
                *start += 1;
            }
        }
    }

    /// Drop the highest instance; a length-one boundary range disappears.
    pub fn remove_last_instance(&mut self) {
        if let Some((start, end)) = self.ranges.last_mut() {
            if *start == *end {
                self.ranges.pop();
            } else {
                *end -= 1;
            }
        }
    }

    /// True interval overlap against another ordered pattern: for each of
    /// `other`'s ranges, binary-search by range end, then test the
    /// candidate interval.
    pub fn overlaps_with(&self, other: &RepetitionPattern) -> bool {
        for &(start, end) in &other.ranges {
            let idx = self.ranges.partition_point(|&(_, e)| e < start);
            if let Some(&(s, _)) = self.ranges.get(idx) {
                if s <= end {
                    return true;
                }
            }
        }
        false
    }

    pub fn approx_size_bytes(&self) -> u64 {
        32 + 16 * self.ranges.len() as u64
    }
}

impl fmt::Display for RepetitionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, &(start, end)) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        write!(f, "}}")
    }
}
