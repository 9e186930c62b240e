/*!
# Dense range lookup

Flattens many `(RepetitionPattern, owner)` pairs into one ascending
`(start, end, owner)` table. Owners are cheap copies, typically stable
indices into the collection that owns the actual records; an index stays
valid for as long as its arena entry is not removed.
*/

use std::collections::BTreeMap;

use crate::reppat::RepetitionPattern;

/// Sorted point-lookup table over instance ranges.
///
/// Built for densely covered instance spaces (every instance inside the
/// covered span belongs to some range). A lookup past the last known
/// instance is a programming or corruption error and panics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeLookup<T: Copy = usize> {
    entries: Vec<(u64, u64, T)>,
}

impl<T: Copy> RangeLookup<T> {
    /// Merge all ranges of all sources into one ordered table. Identical
    /// `(start, end)` keys collapse, the later source winning.
    pub fn build<'a, I>(sources: I) -> Self
    where
        I: IntoIterator<Item = (&'a RepetitionPattern, T)>,
    {
        let mut map: BTreeMap<(u64, u64), T> = BTreeMap::new();
        for (pattern, owner) in sources {
            for &(start, end) in pattern.pairs() {
                map.insert((start, end), owner);
            }
        }
        let entries = map
            .into_iter()
            .map(|((start, end), owner)| (start, end, owner))
            .collect();
        Self { entries }
    }

    /// Owner of the first range whose end is at least `n`.
    ///
    /// Panics when `n` lies past the last instance in the table.
    pub fn lookup(&self, n: u64) -> T {
        let idx = self.entries.partition_point(|&(_, end, _)| end < n);
        match self.entries.get(idx) {
            Some(&(_, _, owner)) => owner,
            None => panic!("instance {n} is past the last known instance"),
        }
    }

    /// Ascending `(start, end, owner)` triples.
    pub fn entries(&self) -> &[(u64, u64, T)] {
        &self.entries
    }

    /// Highest instance number covered by any range.
    pub fn last_instance(&self) -> Option<u64> {
        self.entries.last().map(|&(_, end, _)| end)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
