/*!
# Call Trace Reader

Streaming access to `call_trace.txt.gz`.

Every dump opens with the number of call infos it holds. An info is one
`{invocation-ranges} <num_sites>` header followed by each call site's
instance groups, and infos are separated by `COMPLETE` markers. The line
after the last info is the dump footer; `INCOMPLETE` there means the dump
cut a running loop invocation in two, and the continuation opens the next
dump. Unlike the loop file the layout is fully count driven, so no
lookahead is needed.
*/

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use serde::Serialize;
use tracing::debug;

use crate::calls::CallInvocationGroup;
use crate::core::{Result, Symbol, TraceError, CALL_TRACE_FILE};
use crate::reppat::RepetitionPattern;

use super::lexer::TokenCursor;
use super::lines::{marker_status, EntryStatus, LineWalker};
use super::text::{collect_pattern_symbols, parse_patterns, parse_range_set};

/// One call site's raw lines within an info.
struct RawSite {
    call_id: Symbol,
    group_lines: Vec<(usize, String)>,
}

/// One call info as it appears on disk.
struct RawInfo {
    invocations: RepetitionPattern,
    sites: Vec<RawSite>,
    status: EntryStatus,
}

/// What a scan pass learns about one call site.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CallScanSummary {
    pub sub_instructions: BTreeSet<Symbol>,
    pub num_instances: u64,
    pub num_groups: u64,
}

/// Scan results for a whole call trace file.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CallTraceScan {
    pub call_sites: BTreeMap<Symbol, CallScanSummary>,
    pub num_infos: u64,
    pub dumps: u64,
}

impl CallTraceScan {
    /// Union of every site's sub-instruction ids.
    pub fn sub_instruction_ids(&self) -> BTreeSet<Symbol> {
        self.call_sites
            .values()
            .flat_map(|summary| summary.sub_instructions.iter().copied())
            .collect()
    }
}

/// Reader over a call trace file.
pub struct CallTraceReader<R> {
    walker: LineWalker<R>,
    infos_left: u64,
    dumps: u64,
}

impl CallTraceReader<BufReader<MultiGzDecoder<File>>> {
    /// Open a gzip-compressed call trace file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(MultiGzDecoder::new(file))))
    }

    /// Open the call trace inside a trace output directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_path(dir.as_ref().join(CALL_TRACE_FILE))
    }
}

impl<R: BufRead> CallTraceReader<R> {
    pub fn new(reader: R) -> Self {
        CallTraceReader {
            walker: LineWalker::new(reader),
            infos_left: 0,
            dumps: 0,
        }
    }

    /// Dump footers consumed so far.
    pub fn dumps_seen(&self) -> u64 {
        self.dumps
    }

    /// Next logical call info, with dump-boundary continuations merged in.
    ///
    /// Panics if a continuation violates the dump protocol: it must share
    /// exactly the split invocation number and merge without leftovers.
    pub fn next_entry(&mut self) -> Result<Option<CallInvocationGroup>> {
        let Some((mut info, mut status)) = self.next_raw_entry()? else {
            return Ok(None);
        };

        while status == EntryStatus::Incomplete {
            debug!(
                invocation = info.last_invocation_number(),
                "merging split call info from next dump"
            );
            let line = self.walker.line_no();
            let Some((cont, cont_status)) = self.next_raw_entry()? else {
                return Err(TraceError::UnexpectedEof { line });
            };
            if !info.last_and_first_overlap(&cont) {
                panic!("call info continuation does not share the split invocation");
            }
            if !info.merge_into_and_return_remaining(cont).is_empty() {
                panic!("split invocation continuation left a remainder");
            }
            status = cont_status;
        }

        Ok(Some(info))
    }

    /// Walk the whole file collecting ids and counts, without building
    /// infos. Consumes the reader.
    pub fn scan(mut self) -> Result<CallTraceScan> {
        let mut result = CallTraceScan::default();
        while let Some(raw) = self.next_raw_info()? {
            result.num_infos += 1;
            for site in &raw.sites {
                let summary = result.call_sites.entry(site.call_id).or_default();
                let mut instances = 0;
                for (line_no, line) in &site.group_lines {
                    let mut cursor = TokenCursor::new(line, *line_no)?;
                    let ranges = parse_range_set(&mut cursor)?;
                    if let Some(last) = ranges.last_instance() {
                        instances = instances.max(last + 1);
                    }
                    collect_pattern_symbols(&mut cursor, &mut summary.sub_instructions);
                    summary.num_groups += 1;
                }
                summary.num_instances = summary.num_instances.max(instances);
            }
        }
        result.dumps = self.dumps;
        Ok(result)
    }

    /// One info as written, without continuation merging.
    fn next_raw_entry(&mut self) -> Result<Option<(CallInvocationGroup, EntryStatus)>> {
        let Some(raw) = self.next_raw_info()? else {
            return Ok(None);
        };

        let mut info = CallInvocationGroup::new();
        for &(start, end) in raw.invocations.pairs() {
            info.add_invocation_range(start, end);
        }
        for site in &raw.sites {
            let call = info.call_mut(site.call_id);
            for (line_no, line) in &site.group_lines {
                let mut cursor = TokenCursor::new(line, *line_no)?;
                let ranges = parse_range_set(&mut cursor)?;
                call.start_instance_group();
                for &(start, end) in ranges.pairs() {
                    call.add_instance_range(start, end);
                }
                for pattern in parse_patterns(&mut cursor)? {
                    call.push_control_flow(pattern);
                }
            }
        }

        Ok(Some((info, raw.status)))
    }

    /// One call info's raw lines plus its dump status. Dumps holding no
    /// infos are consumed silently.
    fn next_raw_info(&mut self) -> Result<Option<RawInfo>> {
        while self.infos_left == 0 {
            let Some((line_no, line)) = self.walker.next_content_line()? else {
                return Ok(None);
            };
            let mut cursor = TokenCursor::new(&line, line_no)?;
            let num_infos = cursor.expect_number()?;
            cursor.expect_end()?;
            debug!(num_infos, "parsing call dump");
            if num_infos == 0 {
                self.read_footer()?;
            }
            self.infos_left = num_infos;
        }

        let (line_no, line) = self.require_line()?;
        let mut cursor = TokenCursor::new(&line, line_no)?;
        let invocations = parse_range_set(&mut cursor)?;
        let num_sites = cursor.expect_number()?;
        cursor.expect_end()?;

        let mut sites = Vec::with_capacity(num_sites as usize);
        for _ in 0..num_sites {
            sites.push(self.read_site()?);
        }

        self.infos_left -= 1;
        let status = self.finish_info()?;
        Ok(Some(RawInfo {
            invocations,
            sites,
            status,
        }))
    }

    fn read_site(&mut self) -> Result<RawSite> {
        let (line_no, line) = self.require_line()?;
        let mut cursor = TokenCursor::new(&line, line_no)?;
        let call_id = cursor.expect_number()?;
        let num_groups = cursor.expect_number()?;
        cursor.expect_end()?;
        if num_groups == 0 {
            return Err(TraceError::syntax(line_no, "call site with no instance groups"));
        }

        let mut group_lines = Vec::with_capacity(num_groups as usize);
        for _ in 0..num_groups {
            group_lines.push(self.require_line()?);
        }
        Ok(RawSite {
            call_id,
            group_lines,
        })
    }

    /// Consume the separator after an info: a `COMPLETE` marker between
    /// infos, or the dump footer after the last one.
    fn finish_info(&mut self) -> Result<EntryStatus> {
        if self.infos_left == 0 {
            return self.read_footer();
        }
        let (line_no, line) = self.require_line()?;
        match marker_status(&line) {
            Some(EntryStatus::Complete) => Ok(EntryStatus::Complete),
            _ => Err(TraceError::syntax(
                line_no,
                "expected COMPLETE between call infos",
            )),
        }
    }

    fn read_footer(&mut self) -> Result<EntryStatus> {
        let (line_no, line) = self.require_line()?;
        match marker_status(&line) {
            Some(status) => {
                self.dumps += 1;
                Ok(status)
            }
            None => Err(TraceError::syntax(
                line_no,
                "expected dump footer after the last call info",
            )),
        }
    }

    fn require_line(&mut self) -> Result<(usize, String)> {
        let line = self.walker.line_no();
        self.walker
            .next_content_line()?
            .ok_or(TraceError::UnexpectedEof { line })
    }
}
