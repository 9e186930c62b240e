/*!
# Streamed Call Trace

Lazy, bounded-memory access to the call infos of the traced loop.

Mirrors the loop-side streamed collection: infos are pulled from the
reader when a query needs a loop invocation that is not resident yet and
evicted once the walk moves past their last invocation. The attribution
cache is built in place on resident infos, so a consumer walking
invocations in order pays for each cache exactly once.
*/

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::core::Result;
use crate::parser::CallTraceReader;
use crate::reppat::SortedRangeLookup;

use super::invocation::CallInvocationGroup;

/// Position of a walk: one loop invocation inside a resident info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallInfoCursor {
    entry_id: u64,
    invocation: u64,
}

impl CallInfoCursor {
    pub fn invocation(&self) -> u64 {
        self.invocation
    }
}

/// Call infos keyed by loop invocation, faulted in from a reader on demand.
pub struct StreamedCallTrace<R> {
    entries: BTreeMap<u64, CallInvocationGroup>,
    lut: SortedRangeLookup<u64>,
    next_id: u64,
    reader: CallTraceReader<R>,
    exhausted: bool,
}

impl StreamedCallTrace<BufReader<MultiGzDecoder<File>>> {
    /// Open the call trace in a trace output directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(CallTraceReader::from_dir(dir)?))
    }
}

impl<R: BufRead> StreamedCallTrace<R> {
    pub fn new(reader: CallTraceReader<R>) -> Self {
        StreamedCallTrace {
            entries: BTreeMap::new(),
            lut: SortedRangeLookup::new(),
            next_id: 0,
            reader,
            exhausted: false,
        }
    }

    /// Infos currently held in memory.
    pub fn resident_infos(&self) -> usize {
        self.entries.len()
    }

    /// The info covering loop invocation `n`, pulling from the reader as
    /// needed. `None` means no calls were recorded for that invocation.
    pub fn info_for_invocation(&mut self, n: u64) -> Result<Option<&CallInvocationGroup>> {
        Ok(self.resolve(n)?.and_then(|id| self.entries.get(&id)))
    }

    /// Mutable variant of [`info_for_invocation`](Self::info_for_invocation),
    /// for building the attribution cache in place.
    pub fn info_for_invocation_mut(
        &mut self,
        n: u64,
    ) -> Result<Option<&mut CallInvocationGroup>> {
        Ok(self.resolve(n)?.and_then(|id| self.entries.get_mut(&id)))
    }

    /// Cursor at invocation 0, or `None` for a trace with no infos.
    pub fn first_invocation(&mut self) -> Result<Option<CallInfoCursor>> {
        Ok(self.resolve(0)?.map(|entry_id| CallInfoCursor {
            entry_id,
            invocation: 0,
        }))
    }

    /// Step to the next invocation, evicting the info the cursor leaves
    /// behind once its last invocation has been consumed.
    pub fn advance(&mut self, cursor: CallInfoCursor) -> Result<Option<CallInfoCursor>> {
        let next = cursor.invocation + 1;
        let consumed = self
            .entries
            .get(&cursor.entry_id)
            .is_some_and(|info| next > info.last_invocation_number());
        if consumed {
            self.evict(cursor.entry_id);
        }
        Ok(self.resolve(next)?.map(|entry_id| CallInfoCursor {
            entry_id,
            invocation: next,
        }))
    }

    /// The info a cursor points into.
    ///
    /// Panics if the info was already evicted, which means the cursor was
    /// kept across an `advance` past its info.
    pub fn info(&self, cursor: CallInfoCursor) -> &CallInvocationGroup {
        self.entries
            .get(&cursor.entry_id)
            .unwrap_or_else(|| panic!("cursor refers to an evicted call info"))
    }

    /// Mutable variant of [`info`](Self::info).
    pub fn info_mut(&mut self, cursor: CallInfoCursor) -> &mut CallInvocationGroup {
        self.entries
            .get_mut(&cursor.entry_id)
            .unwrap_or_else(|| panic!("cursor refers to an evicted call info"))
    }

    /// Find the resident info covering `n`, pulling new infos until one
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
                    let info = &self.entries[&id];
                    // past-the-target info means n falls in a coverage gap
                    if info.first_invocation_number() > n {
                        return Ok(None);
                    }
                }
                None => return Ok(None),
            }
        }
    }

    /// Pull the next info, build its lookups and index it.
    fn pull_next(&mut self) -> Result<Option<u64>> {
        let Some(mut info) = self.reader.next_entry()? else {
            self.exhausted = true;
            return Ok(None);
        };
        info.precompute();
        let id = self.next_id;
        self.next_id += 1;
        debug!(invocations = %info.invocations(), "pulled call info");
        self.lut.insert(info.invocations(), id);
        self.entries.insert(id, info);
        Ok(Some(id))
    }

    fn evict(&mut self, id: u64) {
        if let Some(info) = self.entries.remove(&id) {
            self.lut.remove(info.invocations());
        }
    }
}
