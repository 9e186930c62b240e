/*!
# Sparse range lookup

Ordered by range end, tolerant of gaps: a lookup that falls between
ranges (or past the last one) reports a miss instead of panicking. The
streamed trace collections use a miss as the signal to pull the next
segment from the reader.
*/

use std::collections::BTreeMap;

use crate::reppat::RepetitionPattern;

/// Range table keyed by range end, supporting incremental insert and
/// removal as segments come and go.
#[derive(Debug, Clone, Default)]
pub struct SortedRangeLookup<T: Copy> {
    by_end: BTreeMap<u64, (u64, T)>,
}

impl<T: Copy> SortedRangeLookup<T> {
    pub fn new() -> Self {
        Self { by_end: BTreeMap::new() }
    }

    /// Register every range of `pattern` as owned by `owner`.
    pub fn insert(&mut self, pattern: &RepetitionPattern, owner: T) {
        for &(start, end) in pattern.pairs() {
            self.by_end.insert(end, (start, owner));
        }
    }

    /// Remove the ranges previously registered for `pattern`.
    pub fn remove(&mut self, pattern: &RepetitionPattern) {
        for &(_, end) in pattern.pairs() {
            self.by_end.remove(&end);
        }
    }

    /// Owner of the range containing `n`, or `None` when `n` falls in a
    /// gap or past the last range.
    pub fn lookup(&self, n: u64) -> Option<T> {
        let (_, &(start, owner)) = self.by_end.range(n..).next()?;
        if n < start {
            None
        } else {
            Some(owner)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_end.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_end.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(pairs: &[(u64, u64)]) -> RepetitionPattern {
        let mut rp = RepetitionPattern::new();
        for &(s, e) in pairs {
            rp.add_pair(s, e);
        }
        rp
    }

    #[test]
    fn hit_and_miss() {
        let mut lut: SortedRangeLookup<u32> = SortedRangeLookup::new();
        lut.insert(&pattern(&[(0, 2), (8, 9)]), 7);
        lut.insert(&pattern(&[(3, 4)]), 9);
        assert_eq!(lut.lookup(1), Some(7));
        assert_eq!(lut.lookup(3), Some(9));
        assert_eq!(lut.lookup(9), Some(7));
        assert_eq!(lut.lookup(5), None);
        assert_eq!(lut.lookup(10), None);
    }

    #[test]
    fn remove_drops_only_named_ranges() {
        let mut lut: SortedRangeLookup<u32> = SortedRangeLookup::new();
        let a = pattern(&[(0, 4)]);
        let b = pattern(&[(5, 6)]);
        lut.insert(&a, 1);
        lut.insert(&b, 2);
        lut.remove(&a);
        assert_eq!(lut.lookup(2), None);
        assert_eq!(lut.lookup(6), Some(2));
    }
}
