/*!
# Streamed Loop Trace

Lazy, bounded-memory access to one loop's entries.

Entries are pulled from the reader only when a query needs an invocation
that is not resident yet, and evicted as soon as the walk moves past their
last invocation. Consumers therefore iterate invocations mostly in
ascending order, which is what the analyses do.
*/

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::core::{LoopId, Result};
use crate::parser::LoopTraceReader;
use crate::reppat::SortedRangeLookup;

use super::entry::LoopEntry;

/// Position of a walk: one invocation inside a resident entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationCursor {
    entry_id: u64,
    invocation: u64,
}

impl InvocationCursor {
    pub fn invocation(&self) -> u64 {
        self.invocation
    }
}

/// One loop's trace entries, faulted in from a reader on demand.
pub struct StreamedLoopTrace<R> {
    loop_id: LoopId,
    entries: BTreeMap<u64, LoopEntry>,
    lut: SortedRangeLookup<u64>,
    next_id: u64,
    reader: LoopTraceReader<R>,
    exhausted: bool,
}

impl StreamedLoopTrace<BufReader<MultiGzDecoder<File>>> {
    /// Open the loop trace in a trace output directory, scoped to one loop.
    pub fn from_dir(dir: impl AsRef<Path>, loop_id: LoopId) -> Result<Self> {
        Ok(Self::new(LoopTraceReader::from_dir(dir)?, loop_id))
    }
}

impl<R: BufRead> StreamedLoopTrace<R> {
    pub fn new(reader: LoopTraceReader<R>, loop_id: LoopId) -> Self {
        StreamedLoopTrace {
            loop_id,
            entries: BTreeMap::new(),
            lut: SortedRangeLookup::new(),
            next_id: 0,
            reader,
            exhausted: false,
        }
    }

    pub fn loop_id(&self) -> LoopId {
        self.loop_id
    }

    /// Entries currently held in memory.
    pub fn resident_entries(&self) -> usize {
        self.entries.len()
    }

    /// The entry covering invocation `n`, pulling from the reader as needed.
    pub fn entry_for_invocation(&mut self, n: u64) -> Result<Option<&LoopEntry>> {
        Ok(self.resolve(n)?.and_then(|id| self.entries.get(&id)))
    }

    /// Cursor at invocation 0, or `None` for a trace with no invocations.
    pub fn first_invocation(&mut self) -> Result<Option<InvocationCursor>> {
        Ok(self.resolve(0)?.map(|entry_id| InvocationCursor {
            entry_id,
            invocation: 0,
        }))
    }

    /// Step to the next invocation, evicting the entry the cursor leaves
    /// behind once its last invocation has been consumed.
    pub fn advance(&mut self, cursor: InvocationCursor) -> Result<Option<InvocationCursor>> {
        let next = cursor.invocation + 1;
        let consumed = self
            .entries
            .get(&cursor.entry_id)
            .is_some_and(|entry| next > entry.last_invocation_number());
        if consumed {
            self.evict(cursor.entry_id);
        }
        Ok(self.resolve(next)?.map(|entry_id| InvocationCursor {
            entry_id,
            invocation: next,
        }))
    }

    /// The entry a cursor points into.
    ///
    /// Panics if the entry was already evicted, which means the cursor was
    /// kept across an `advance` past its entry.
    pub fn entry(&self, cursor: InvocationCursor) -> &LoopEntry {
        self.entries
            .get(&cursor.entry_id)
            .unwrap_or_else(|| panic!("cursor refers to an evicted entry"))
    }

    /// Find the resident entry covering `n`, pulling new entries until one
    /// does or the reader runs out.
    fn resolve(&mut self, n: u64) -> Result<Option<u64>> {
        loop {
            if let Some(id) = self.lut.lookup(n) {
                return Ok(Some(id));
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.pull_next()? {
                Some(id) => {
                    let entry = &self.entries[&id];
                    // past-the-target entry means n falls in a numbering gap
                    if entry.first_invocation_number() > n {
                        return Ok(None);
                    }
                }
                None => return Ok(None),
            }
        }
    }

    /// Pull the next entry of this loop, precompute its tables and index it.
    fn pull_next(&mut self) -> Result<Option<u64>> {
        loop {
            let Some((loop_id, mut entry)) = self.reader.next_entry()? else {
                self.exhausted = true;
                return Ok(None);
            };
            if loop_id != self.loop_id {
                continue;
            }
            entry.precompute();
            let id = self.next_id;
            self.next_id += 1;
            debug!(
                loop_id,
                invocations = %entry.invocations(),
                "pulled loop trace entry"
            );
            self.lut.insert(entry.invocations(), id);
            self.entries.insert(id, entry);
            return Ok(Some(id));
        }
    }

    fn evict(&mut self, id: u64) {
        if let Some(entry) = self.entries.remove(&id) {
            self.lut.remove(entry.invocations());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(text: &str, loop_id: LoopId) -> StreamedLoopTrace<&[u8]> {
        StreamedLoopTrace::new(LoopTraceReader::new(text.as_bytes()), loop_id)
    }

    const TWO_ENTRIES: &str = "\
9 2
{0-1} 1
{0} (1)

\nCOMPLETE
{2} 1
{0} (2)

\nCOMPLETE
";

    #[test]
    fn walk_evicts_consumed_entries() {
        let mut t = trace(TWO_ENTRIES, 9);

        let c0 = t.first_invocation().unwrap().unwrap();
        assert_eq!(c0.invocation(), 0);
        assert_eq!(t.resident_entries(), 1);
        assert!(t.entry(c0).group().contains_instruction(1));

        let c1 = t.advance(c0).unwrap().unwrap();
        assert_eq!(c1.invocation(), 1);
        assert_eq!(t.resident_entries(), 1);

        let c2 = t.advance(c1).unwrap().unwrap();
        assert_eq!(c2.invocation(), 2);
        assert_eq!(t.resident_entries(), 1);
        assert!(t.entry(c2).group().contains_instruction(2));

        assert!(t.advance(c2).unwrap().is_none());
        assert_eq!(t.resident_entries(), 0);
    }

    #[test]
    fn lookup_by_invocation_pulls_until_covered() {
        let mut t = trace(TWO_ENTRIES, 9);
        let entry = t.entry_for_invocation(2).unwrap().unwrap();
        assert_eq!(entry.invocations().pairs(), &[(2, 2)]);
        assert_eq!(t.resident_entries(), 2);
        assert!(t.entry_for_invocation(3).unwrap().is_none());
    }

    #[test]
    fn other_loops_are_skipped() {
        let text = "\
7 1
{0} 1
{0} (5)

9 1
{0} 1
{0} (6)

\nCOMPLETE
";
        let mut t = trace(text, 9);
        let entry = t.entry_for_invocation(0).unwrap().unwrap();
        assert!(entry.group().contains_instruction(6));
        assert_eq!(t.resident_entries(), 1);
    }

    #[test]
    fn empty_trace_has_no_first_invocation() {
        let mut t = trace("", 9);
        assert!(t.first_invocation().unwrap().is_none());
    }
}
