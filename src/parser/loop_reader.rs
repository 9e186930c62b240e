/*!
# Loop Trace Reader

Streaming access to `loop_trace.txt.gz`.

The file is a sequence of dumps, each holding one section per loop. A
section is `<loop_id> <num_groups>` followed by its invocation groups, with
`COMPLETE` markers between groups and a `COMPLETE`/`INCOMPLETE` footer
closing the dump. An `INCOMPLETE` footer means the dump cut a running
invocation in two; the continuation opens the next dump and is merged back
here, so consumers only ever see whole invocations.

Two consumers share the line walker: `scan` collects instruction ids and
counts straight off the token stream, and `next_entry` builds one merged
`LoopEntry` at a time.
*/

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use serde::Serialize;
use tracing::debug;

use crate::core::{LoopId, Result, Symbol, TraceError, LOOP_TRACE_FILE};
use crate::loops::LoopEntry;
use crate::reppat::RepetitionPattern;

use super::lexer::TokenCursor;
use super::lines::{marker_status, EntryStatus, LineWalker};
use super::text::{collect_pattern_symbols, parse_patterns, parse_range_set};

/// One invocation group as it appears on disk, before a consumer interprets
/// the iteration lines.
struct RawGroup {
    loop_id: LoopId,
    invocations: RepetitionPattern,
    iter_lines: Vec<(usize, String)>,
    status: EntryStatus,
}

/// What a scan pass learns about one loop.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LoopScanSummary {
    pub instructions: BTreeSet<Symbol>,
    pub num_invocations: u64,
    pub num_entries: u64,
}

/// Scan results for a whole loop trace file.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LoopTraceScan {
    pub loops: BTreeMap<LoopId, LoopScanSummary>,
    pub dumps: u64,
}

/// Reader over a loop trace file.
pub struct LoopTraceReader<R> {
    walker: LineWalker<R>,
    section: Option<(LoopId, u64)>,
    dumps: u64,
}

impl LoopTraceReader<BufReader<MultiGzDecoder<File>>> {
    /// Open a gzip-compressed loop trace file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(MultiGzDecoder::new(file))))
    }

    /// Open the loop trace inside a trace output directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_path(dir.as_ref().join(LOOP_TRACE_FILE))
    }
}

impl<R: BufRead> LoopTraceReader<R> {
    pub fn new(reader: R) -> Self {
        LoopTraceReader {
            walker: LineWalker::new(reader),
            section: None,
            dumps: 0,
        }
    }

    /// Dump footers consumed so far.
    pub fn dumps_seen(&self) -> u64 {
        self.dumps
    }

    /// Next logical entry, with dump-boundary continuations merged in.
    ///
    /// Panics if a continuation violates the dump protocol: it must resume
    /// the same loop, share exactly the split invocation number, and merge
    /// without leftovers.
    pub fn next_entry(&mut self) -> Result<Option<(LoopId, LoopEntry)>> {
        let Some((loop_id, mut entry, mut status)) = self.next_raw_entry()? else {
            return Ok(None);
        };

        while status == EntryStatus::Incomplete {
            debug!(
                loop_id,
                invocation = entry.last_invocation_number(),
                "merging split invocation from next dump"
            );
            let line = self.walker.line_no();
            let Some((cont_id, cont, cont_status)) = self.next_raw_entry()? else {
                return Err(TraceError::UnexpectedEof { line });
            };
            if cont_id != loop_id {
                panic!(
                    "loop {cont_id} section cannot continue the split invocation of loop {loop_id}"
                );
            }
            if !entry.last_and_first_overlap(&cont) {
                panic!("continuation does not share the split invocation");
            }
            if !entry.merge_into_and_return_remaining(cont).is_empty() {
                panic!("split invocation continuation left a remainder");
            }
            status = cont_status;
        }

        Ok(Some((loop_id, entry)))
    }

    /// Walk the whole file collecting ids and counts, without building
    /// entries. Consumes the reader.
    pub fn scan(mut self) -> Result<LoopTraceScan> {
        let mut result = LoopTraceScan::default();
        while let Some(raw) = self.next_raw_group()? {
            let summary = result.loops.entry(raw.loop_id).or_default();
            if let Some(last) = raw.invocations.last_instance() {
                summary.num_invocations = summary.num_invocations.max(last + 1);
            }
            summary.num_entries += 1;
            for (line_no, line) in &raw.iter_lines {
                let mut cursor = TokenCursor::new(line, *line_no)?;
                parse_range_set(&mut cursor)?;
                collect_pattern_symbols(&mut cursor, &mut summary.instructions);
            }
        }
        result.dumps = self.dumps;
        Ok(result)
    }

    /// One entry as written, without continuation merging.
    fn next_raw_entry(&mut self) -> Result<Option<(LoopId, LoopEntry, EntryStatus)>> {
        let Some(raw) = self.next_raw_group()? else {
            return Ok(None);
        };

        let mut entry = LoopEntry::new();
        for &(start, end) in raw.invocations.pairs() {
            entry.add_invocation_range(start, end);
        }
        for (line_no, line) in &raw.iter_lines {
            let mut cursor = TokenCursor::new(line, *line_no)?;
            let ranges = parse_range_set(&mut cursor)?;
            entry.group_mut().start_iteration_group();
            for &(start, end) in ranges.pairs() {
                entry.group_mut().add_iteration_range(start, end);
            }
            for pattern in parse_patterns(&mut cursor)? {
                entry.group_mut().push_control_flow(pattern);
            }
        }

        Ok(Some((raw.loop_id, entry, raw.status)))
    }

    /// One invocation group's raw lines plus its dump status.
    fn next_raw_group(&mut self) -> Result<Option<RawGroup>> {
        let (loop_id, remaining) = match self.section {
            Some(section) => section,
            None => match self.read_section_header()? {
                Some(section) => section,
                None => return Ok(None),
            },
        };

        let (line_no, line) = self.require_line()?;
        let mut cursor = TokenCursor::new(&line, line_no)?;
        let invocations = parse_range_set(&mut cursor)?;
        let num_iter_groups = cursor.expect_number()?;
        cursor.expect_end()?;

        let mut iter_lines = Vec::with_capacity(num_iter_groups as usize);
        for _ in 0..num_iter_groups {
            iter_lines.push(self.require_line()?);
        }

        let status = self.finish_group(loop_id, remaining - 1)?;
        Ok(Some(RawGroup {
            loop_id,
            invocations,
            iter_lines,
            status,
        }))
    }

    /// Consume the separator after a group: a `COMPLETE` marker between
    /// groups, or the dump footer / next section header after the last one.
    fn finish_group(&mut self, loop_id: LoopId, remaining: u64) -> Result<EntryStatus> {
        if remaining > 0 {
            self.section = Some((loop_id, remaining));
            let (line_no, line) = self.require_line()?;
            return match marker_status(&line) {
                Some(EntryStatus::Complete) => Ok(EntryStatus::Complete),
                _ => Err(TraceError::syntax(
                    line_no,
                    "expected COMPLETE between invocation groups",
                )),
            };
        }

        self.section = None;
        match self.walker.peek_content_line()? {
            None => Err(TraceError::UnexpectedEof {
                line: self.walker.line_no(),
            }),
            Some(line) => match marker_status(line) {
                Some(status) => {
                    self.walker.next_content_line()?;
                    self.dumps += 1;
                    Ok(status)
                }
                None => Ok(EntryStatus::Complete),
            },
        }
    }

    fn read_section_header(&mut self) -> Result<Option<(LoopId, u64)>> {
        let Some((line_no, line)) = self.walker.next_content_line()? else {
            return Ok(None);
        };
        let mut cursor = TokenCursor::new(&line, line_no)?;
        let loop_id = cursor.expect_number()?;
        let num_groups = cursor.expect_number()?;
        cursor.expect_end()?;
        if num_groups == 0 {
            return Err(TraceError::syntax(
                line_no,
                "loop section with no invocation groups",
            ));
        }
        debug!(loop_id, num_groups, "parsing loop section");
        self.section = Some((loop_id, num_groups));
        Ok(Some((loop_id, num_groups)))
    }

    fn require_line(&mut self) -> Result<(usize, String)> {
        let line = self.walker.line_no();
        self.walker
            .next_content_line()?
            .ok_or(TraceError::UnexpectedEof { line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(text: &str) -> LoopTraceReader<&[u8]> {
        LoopTraceReader::new(text.as_bytes())
    }

    const TWO_GROUPS: &str = "\
9 2
{0-2} 1
{0-1} (1)(2)

\nCOMPLETE
{3} 2
{0} (3)
{1} ((1)(2),2)

\nCOMPLETE
";

    #[test]
    fn reads_groups_in_section_order() {
        let mut r = reader(TWO_GROUPS);

        let (id, first) = r.next_entry().unwrap().unwrap();
        assert_eq!(id, 9);
        assert_eq!(first.invocations().pairs(), &[(0, 2)]);
        assert_eq!(first.group().num_iteration_groups(), 1);

        let (_, second) = r.next_entry().unwrap().unwrap();
        assert_eq!(second.invocations().pairs(), &[(3, 3)]);
        assert_eq!(second.group().num_iteration_groups(), 2);
        assert_eq!(
            second.group().iteration_groups()[1].control_flow()[0].to_string(),
            "((1)(2),2)"
        );

        assert!(r.next_entry().unwrap().is_none());
        assert_eq!(r.dumps_seen(), 1);
    }

    #[test]
    fn merges_a_split_invocation_across_dumps() {
        let text = "\
9 1
{4} 1
{0-1} (1)

\nINCOMPLETE
9 1
{4} 1
{2} (2)

\nCOMPLETE
";
        let mut r = reader(text);
        let (id, entry) = r.next_entry().unwrap().unwrap();
        assert_eq!(id, 9);
        assert_eq!(entry.invocations().pairs(), &[(4, 4)]);
        assert_eq!(entry.group().num_iteration_groups(), 2);
        assert!(r.next_entry().unwrap().is_none());
        assert_eq!(r.dumps_seen(), 2);
    }

    #[test]
    fn sections_of_different_loops_keep_their_ids() {
        let text = "\
9 1
{0} 1
{0} (1)

7 1
{0} 1
{0} (2)

\nCOMPLETE
";
        let mut r = reader(text);
        assert_eq!(r.next_entry().unwrap().unwrap().0, 9);
        assert_eq!(r.next_entry().unwrap().unwrap().0, 7);
        assert!(r.next_entry().unwrap().is_none());
    }

    #[test]
    fn scan_collects_ids_and_counts_per_loop() {
        let scan = reader(TWO_GROUPS).scan().unwrap();
        assert_eq!(scan.dumps, 1);
        let summary = &scan.loops[&9];
        assert_eq!(
            summary.instructions,
            BTreeSet::from([1, 2, 3])
        );
        assert_eq!(summary.num_invocations, 4);
        assert_eq!(summary.num_entries, 2);
    }

    #[test]
    fn missing_footer_is_an_eof_error() {
        let text = "9 1\n{0} 1\n{0} (1)\n";
        let mut r = reader(text);
        assert!(matches!(
            r.next_entry(),
            Err(TraceError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn incomplete_between_groups_is_rejected() {
        let text = "9 2\n{0} 1\n{0} (1)\n\nINCOMPLETE\n{1} 1\n{0} (1)\n\nCOMPLETE\n";
        let mut r = reader(text);
        assert!(matches!(r.next_entry(), Err(TraceError::Syntax { .. })));
    }

    #[test]
    #[should_panic(expected = "does not share the split invocation")]
    fn continuation_must_share_the_invocation() {
        let text = "\
9 1
{4} 1
{0} (1)

\nINCOMPLETE
9 1
{6} 1
{1} (2)

\nCOMPLETE
";
        let mut r = reader(text);
        let _ = r.next_entry();
    }
}
