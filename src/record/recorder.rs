/*!
# Trace Recorder

The instrumentation-facing side of the crate. A `TraceRecorder` receives
loop, iteration, call and instruction events, compresses each iteration and
call body on the fly, deduplicates repeated structure at three levels
(iterations within an invocation, invocations within a loop, call tables
across invocations), and dumps everything through a [`TraceWriter`] when
memory pressure demands it or recording finishes.

A dump taken while a loop invocation is running writes an `INCOMPLETE`
footer and records the open frames' partial content without advancing any
numbering. The invocation then continues into fresh buffers; the readers
stitch the halves back together. Content recorded on either side of such a
cut is excluded from deduplication, since its groups no longer describe
whole units.
*/

use std::collections::BTreeMap;
use std::mem;
use std::time::Instant;

use tracing::{debug, warn};

use crate::calls::CallInvocationGroup;
use crate::compress::PatternCompressor;
use crate::core::{LoopId, Result, Symbol};
use crate::loops::LoopEntry;
use crate::parser::EntryStatus;
use crate::reppat::RepetitionPattern;

use super::config::RecorderConfig;
use super::writer::TraceWriter;

/// Memory accounting cadence, in recorded operations.
const MEM_CHECK_INTERVAL: u64 = 4096;

/// Wall-clock check cadence, in recorded operations.
const TIMEOUT_CHECK_INTERVAL: u64 = 1_000_000;

/// The most recently touched records, newest first, capped at the dedup
/// depth. Holds indices into an append-only store; matching a record moves
/// it back to the front.
#[derive(Debug, Default)]
struct DedupWindow {
    recent: Vec<usize>,
    depth: usize,
}

impl DedupWindow {
    fn new(depth: usize) -> Self {
        DedupWindow {
            recent: Vec::new(),
            depth,
        }
    }

    /// First recent index satisfying `matches`, promoted to the front.
    fn find(&mut self, mut matches: impl FnMut(usize) -> bool) -> Option<usize> {
        for (pos, &idx) in self.recent.iter().enumerate() {
            if matches(idx) {
                let idx = self.recent.remove(pos);
                self.recent.insert(0, idx);
                return Some(idx);
            }
        }
        None
    }

    fn admit(&mut self, idx: usize) {
        self.recent.insert(0, idx);
        self.recent.truncate(self.depth);
    }

    fn clear(&mut self) {
        self.recent.clear();
    }
}

/// Iterations (or call instances) sharing one compressed control flow.
#[derive(Debug, PartialEq)]
struct RecordedGroup {
    numbers: RepetitionPattern,
    compressor: PatternCompressor,
    /// Born from a cut unit; never a match target.
    partial: bool,
}

impl RecordedGroup {
    fn approx_size_bytes(&self) -> u64 {
        self.numbers.approx_size_bytes() + self.compressor.approx_size_bytes()
    }
}

/// Match `compressor` against the recent groups, extending the hit or
/// appending a new group. The compressor is left empty either way.
fn record_group(
    groups: &mut Vec<RecordedGroup>,
    recent: &mut DedupWindow,
    number: u64,
    compressor: &mut PatternCompressor,
    window: usize,
    attempt_match: bool,
) {
    if attempt_match {
        let probe = &*compressor;
        let existing = &*groups;
        if let Some(idx) = recent.find(|idx| !existing[idx].partial && existing[idx].compressor == *probe)
        {
            groups[idx].numbers.add_instance(number);
            compressor.clear();
            return;
        }
    }
    groups.push(RecordedGroup {
        numbers: RepetitionPattern::singleton(number),
        compressor: mem::replace(compressor, PatternCompressor::new(window)),
        partial: !attempt_match,
    });
    recent.admit(groups.len() - 1);
}

/// One recorded loop invocation and the later invocations sharing it.
#[derive(Debug)]
struct EntryRec {
    invocations: RepetitionPattern,
    groups: Vec<RecordedGroup>,
    partially_dumped: bool,
}

impl EntryRec {
    fn approx_size_bytes(&self) -> u64 {
        self.invocations.approx_size_bytes()
            + self.groups.iter().map(|g| g.approx_size_bytes()).sum::<u64>()
    }
}

/// Everything stored for one loop between dumps.
#[derive(Debug)]
struct LoopRecord {
    entries: Vec<EntryRec>,
    recent: DedupWindow,
    next_invocation: u64,
}

impl LoopRecord {
    fn new(depth: usize) -> Self {
        LoopRecord {
            entries: Vec::new(),
            recent: DedupWindow::new(depth),
            next_invocation: 0,
        }
    }
}

/// One call site's instance groups within the current loop invocation.
/// `next_instance` survives mid-invocation dumps so instance numbers keep
/// ascending; the whole record is replaced when the invocation ends.
#[derive(Debug)]
struct SiteRecord {
    groups: Vec<RecordedGroup>,
    recent: DedupWindow,
    next_instance: u64,
}

impl SiteRecord {
    fn new(depth: usize) -> Self {
        SiteRecord {
            groups: Vec::new(),
            recent: DedupWindow::new(depth),
            next_instance: 0,
        }
    }
}

/// The per-site call tables of one loop invocation, plus the invocations
/// sharing them.
#[derive(Debug)]
struct CallInfoRec {
    invocations: RepetitionPattern,
    sites: BTreeMap<Symbol, SiteRecord>,
    partially_dumped: bool,
}

impl CallInfoRec {
    fn approx_size_bytes(&self) -> u64 {
        self.invocations.approx_size_bytes()
            + self
                .sites
                .values()
                .flat_map(|s| s.groups.iter())
                .map(|g| g.approx_size_bytes())
                .sum::<u64>()
    }
}

/// Site tables match when every site has pairwise equal instance groups.
fn site_tables_match(a: &BTreeMap<Symbol, SiteRecord>, b: &BTreeMap<Symbol, SiteRecord>) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(id, site)| b.get(id).is_some_and(|other| site.groups == other.groups))
}

/// The currently running loop invocation.
#[derive(Debug)]
struct LoopFrame {
    loop_id: LoopId,
    invocation: u64,
    /// `None` until the first iteration starts.
    iteration: Option<u64>,
    compressor: PatternCompressor,
    groups: Vec<RecordedGroup>,
    recent: DedupWindow,
    partially_dumped: bool,
}

impl LoopFrame {
    /// Fold the open iteration's control flow into the group list. Keeps
    /// the iteration number, so a flush can record a partial iteration and
    /// let its tail close under the same number later.
    fn close_iteration(&mut self, window: usize) {
        let Some(iteration) = self.iteration else {
            return;
        };
        record_group(
            &mut self.groups,
            &mut self.recent,
            iteration,
            &mut self.compressor,
            window,
            true,
        );
    }
}

/// A currently running call.
#[derive(Debug)]
struct CallFrame {
    site: Symbol,
    instance: u64,
    compressor: PatternCompressor,
    partially_dumped: bool,
}

/// Records one process's loop and call activity into a trace directory.
///
/// Events arrive through the `loop_*`, `call_*` and [`instruction`]
/// methods. At most one loop invocation runs at a time; calls nest inside
/// it. Events outside a running loop are ignored, matching how
/// instrumented code behaves outside the traced region.
///
/// [`instruction`]: TraceRecorder::instruction
#[derive(Debug)]
pub struct TraceRecorder {
    config: RecorderConfig,
    writer: TraceWriter,
    loops: BTreeMap<LoopId, LoopRecord>,
    infos: Vec<CallInfoRec>,
    recent_infos: DedupWindow,
    current_calls: BTreeMap<Symbol, SiteRecord>,
    running_loop: Option<LoopFrame>,
    call_stack: Vec<CallFrame>,
    /// Loop whose section must open the next dump so the readers can stitch
    /// a cut invocation back together.
    continued_loop: Option<LoopId>,
    /// Set by a dump; the next completed call info is a continuation and
    /// must not become a dedup target.
    waiting_for_completion: bool,
    operations: u64,
    started: Instant,
    timed_out: bool,
}

impl TraceRecorder {
    /// Creates the output directory if needed. Trace files are appended
    /// to, one gzip member per dump.
    pub fn new(config: RecorderConfig) -> Result<Self> {
        let writer = TraceWriter::new(&config.output_dir)?;
        let depth = config.dedup_depth;
        Ok(TraceRecorder {
            config,
            writer,
            loops: BTreeMap::new(),
            infos: Vec::new(),
            recent_infos: DedupWindow::new(depth),
            current_calls: BTreeMap::new(),
            running_loop: None,
            call_stack: Vec::new(),
            continued_loop: None,
            waiting_for_completion: false,
            operations: 0,
            started: Instant::now(),
            timed_out: false,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Events recorded or ignored so far.
    pub fn operations(&self) -> u64 {
        self.operations
    }

    /// True once the wall-clock budget ran out; all later events are
    /// counted but ignored.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Begin invocation `n` of `loop_id`, where `n` counts from 0 per
    /// loop.
    ///
    /// Panics if a loop invocation or call is already running.
    pub fn loop_invocation_start(&mut self, loop_id: LoopId) -> Result<()> {
        if self.record_operation() {
            return Ok(());
        }
        if self.running_loop.is_some() || !self.call_stack.is_empty() {
            panic!("a loop invocation is already running");
        }
        let depth = self.config.dedup_depth;
        let window = self.config.window_len;
        let rec = self
            .loops
            .entry(loop_id)
            .or_insert_with(|| LoopRecord::new(depth));
        let invocation = rec.next_invocation;
        rec.next_invocation += 1;
        self.running_loop = Some(LoopFrame {
            loop_id,
            invocation,
            iteration: None,
            compressor: PatternCompressor::new(window),
            groups: Vec::new(),
            recent: DedupWindow::new(depth),
            partially_dumped: false,
        });
        self.check_memory()
    }

    /// Begin the next iteration, closing the previous one.
    ///
    /// Panics if no loop invocation is running or a call is still open.
    pub fn loop_iteration_start(&mut self) -> Result<()> {
        if self.record_operation() {
            return Ok(());
        }
        let window = self.config.window_len;
        let Some(frame) = self.running_loop.as_mut() else {
            panic!("no loop invocation is running");
        };
        if !self.call_stack.is_empty() {
            panic!("a call is still running at iteration start");
        }
        frame.close_iteration(window);
        frame.iteration = Some(frame.iteration.map_or(0, |i| i + 1));
        self.check_memory()
    }

    /// Record one executed instruction in the innermost open frame.
    /// Ignored while no loop invocation is running.
    pub fn instruction(&mut self, id: Symbol) -> Result<()> {
        if self.running_loop.is_none() {
            return Ok(());
        }
        if self.record_operation() {
            return Ok(());
        }
        match self.call_stack.last_mut() {
            Some(frame) => frame.compressor.insert_symbol(id),
            None => {
                if let Some(frame) = self.running_loop.as_mut() {
                    frame.compressor.insert_symbol(id);
                }
            }
        }
        if self.operations % MEM_CHECK_INTERVAL == 0 {
            self.check_memory()?;
        }
        Ok(())
    }

    /// Enter a call made from call site `call_id`. The site id lands in
    /// the caller's instruction stream; the call body is recorded
    /// separately. Ignored while no loop invocation is running.
    pub fn call_start(&mut self, call_id: Symbol) -> Result<()> {
        if self.running_loop.is_none() {
            return Ok(());
        }
        if self.record_operation() {
            return Ok(());
        }
        match self.call_stack.last_mut() {
            Some(parent) => parent.compressor.insert_symbol(call_id),
            None => {
                if let Some(frame) = self.running_loop.as_mut() {
                    frame.compressor.insert_symbol(call_id);
                }
            }
        }
        let depth = self.config.dedup_depth;
        let window = self.config.window_len;
        let site = self
            .current_calls
            .entry(call_id)
            .or_insert_with(|| SiteRecord::new(depth));
        let instance = site.next_instance;
        site.next_instance += 1;
        self.call_stack.push(CallFrame {
            site: call_id,
            instance,
            compressor: PatternCompressor::new(window),
            partially_dumped: false,
        });
        self.check_memory()
    }

    /// Leave the innermost call, recording its body as an instance group.
    /// Ignored while no loop invocation is running.
    ///
    /// Panics if no call is open.
    pub fn call_end(&mut self) -> Result<()> {
        if self.running_loop.is_none() {
            return Ok(());
        }
        if self.record_operation() {
            return Ok(());
        }
        let Some(mut frame) = self.call_stack.pop() else {
            panic!("no call is running");
        };
        let depth = self.config.dedup_depth;
        let window = self.config.window_len;
        let site = self
            .current_calls
            .entry(frame.site)
            .or_insert_with(|| SiteRecord::new(depth));
        record_group(
            &mut site.groups,
            &mut site.recent,
            frame.instance,
            &mut frame.compressor,
            window,
            !frame.partially_dumped,
        );
        self.check_memory()
    }

    /// Finish the running invocation: close the last iteration, fold the
    /// invocation into the loop's entries and the call tables into a call
    /// info, deduplicating against recent records.
    ///
    /// Panics if no loop invocation is running or a call is still open.
    pub fn loop_invocation_end(&mut self) -> Result<()> {
        if self.record_operation() {
            return Ok(());
        }
        let window = self.config.window_len;
        let depth = self.config.dedup_depth;
        let Some(mut frame) = self.running_loop.take() else {
            panic!("no loop invocation is running");
        };
        if !self.call_stack.is_empty() {
            panic!("a call is still running at loop invocation end");
        }
        frame.close_iteration(window);

        let attempt = !frame.partially_dumped;
        let rec = self
            .loops
            .entry(frame.loop_id)
            .or_insert_with(|| LoopRecord::new(depth));
        let hit = if attempt {
            let entries = &rec.entries;
            let groups = &frame.groups;
            rec.recent
                .find(|idx| !entries[idx].partially_dumped && entries[idx].groups == *groups)
        } else {
            None
        };
        match hit {
            Some(idx) => rec.entries[idx].invocations.add_instance(frame.invocation),
            None => {
                rec.entries.push(EntryRec {
                    invocations: RepetitionPattern::singleton(frame.invocation),
                    groups: mem::take(&mut frame.groups),
                    partially_dumped: !attempt,
                });
                rec.recent.admit(rec.entries.len() - 1);
            }
        }

        let attempt_info = !self.waiting_for_completion;
        let sites = mem::take(&mut self.current_calls);
        let hit = if attempt_info {
            let infos = &self.infos;
            let probe = &sites;
            self.recent_infos
                .find(|idx| !infos[idx].partially_dumped && site_tables_match(&infos[idx].sites, probe))
        } else {
            None
        };
        match hit {
            Some(idx) => self.infos[idx].invocations.add_instance(frame.invocation),
            None => {
                self.infos.push(CallInfoRec {
                    invocations: RepetitionPattern::singleton(frame.invocation),
                    sites,
                    partially_dumped: !attempt_info,
                });
                self.recent_infos.admit(self.infos.len() - 1);
            }
        }
        self.waiting_for_completion = false;
        Ok(())
    }

    /// Force a dump of everything recorded so far. With a loop invocation
    /// running, the open frames' partial content is written too and the
    /// dump footer says `INCOMPLETE`; recording then continues seamlessly.
    /// Does nothing when there is nothing to write.
    pub fn flush(&mut self) -> Result<()> {
        let window = self.config.window_len;
        let depth = self.config.dedup_depth;

        for frame in &mut self.call_stack {
            frame.partially_dumped = true;
            let site = self
                .current_calls
                .entry(frame.site)
                .or_insert_with(|| SiteRecord::new(depth));
            record_group(
                &mut site.groups,
                &mut site.recent,
                frame.instance,
                &mut frame.compressor,
                window,
                false,
            );
        }

        if let Some(frame) = self.running_loop.as_mut() {
            frame.partially_dumped = true;
            frame.close_iteration(window);
            let groups = mem::take(&mut frame.groups);
            frame.recent.clear();
            let rec = self
                .loops
                .entry(frame.loop_id)
                .or_insert_with(|| LoopRecord::new(depth));
            rec.entries.push(EntryRec {
                invocations: RepetitionPattern::singleton(frame.invocation),
                groups,
                partially_dumped: true,
            });
            rec.recent.admit(rec.entries.len() - 1);

            let mut sites = BTreeMap::new();
            for (&id, site) in self.current_calls.iter_mut() {
                sites.insert(
                    id,
                    SiteRecord {
                        groups: mem::take(&mut site.groups),
                        recent: DedupWindow::new(depth),
                        next_instance: site.next_instance,
                    },
                );
                site.recent.clear();
            }
            self.infos.push(CallInfoRec {
                invocations: RepetitionPattern::singleton(frame.invocation),
                sites,
                partially_dumped: true,
            });
            self.recent_infos.admit(self.infos.len() - 1);
        }

        let sections = self.collect_sections();
        let infos: Vec<CallInvocationGroup> = self.infos.drain(..).map(build_info).collect();
        self.recent_infos.clear();
        if sections.is_empty() && infos.is_empty() {
            return Ok(());
        }

        let status = if self.running_loop.is_some() {
            EntryStatus::Incomplete
        } else {
            EntryStatus::Complete
        };
        self.writer.write_dump(&sections, &infos, status)?;
        self.continued_loop = self.running_loop.as_ref().map(|f| f.loop_id);
        self.waiting_for_completion = true;
        Ok(())
    }

    /// Write the final dump. With the API used consistently nothing is
    /// running here and the dump is `COMPLETE`; a timed-out recording may
    /// finish mid-invocation, leaving an `INCOMPLETE` tail.
    ///
    /// Panics if a loop invocation or call is still running and the
    /// recording did not time out.
    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        if !self.timed_out && (self.running_loop.is_some() || !self.call_stack.is_empty()) {
            panic!("a loop invocation is still running at finish");
        }
        Ok(())
    }

    /// Count one event; true means recording has timed out and the event
    /// must be ignored.
    fn record_operation(&mut self) -> bool {
        self.operations += 1;
        if self.timed_out {
            return true;
        }
        if self.operations % TIMEOUT_CHECK_INTERVAL == 0 {
            if let Some(timeout) = self.config.timeout {
                if self.started.elapsed() > timeout {
                    self.timed_out = true;
                    warn!(
                        operations = self.operations,
                        "recording timed out, later events are ignored"
                    );
                    return true;
                }
            }
        }
        false
    }

    fn check_memory(&mut self) -> Result<()> {
        if self.running_loop.is_none() {
            return Ok(());
        }
        let bytes = self.approx_size_bytes();
        if bytes > self.config.max_memory_bytes {
            debug!(
                bytes,
                threshold = self.config.max_memory_bytes,
                "memory threshold exceeded, dumping trace"
            );
            self.flush()?;
        }
        Ok(())
    }

    fn approx_size_bytes(&self) -> u64 {
        let stored: u64 = self
            .loops
            .values()
            .flat_map(|rec| rec.entries.iter())
            .map(|e| e.approx_size_bytes())
            .sum();
        let infos: u64 = self.infos.iter().map(|i| i.approx_size_bytes()).sum();
        let current: u64 = self
            .current_calls
            .values()
            .flat_map(|s| s.groups.iter())
            .map(|g| g.approx_size_bytes())
            .sum();
        let frames: u64 = self
            .call_stack
            .iter()
            .map(|f| f.compressor.approx_size_bytes())
            .sum::<u64>()
            + self.running_loop.as_ref().map_or(0, |f| {
                f.compressor.approx_size_bytes()
                    + f.groups.iter().map(|g| g.approx_size_bytes()).sum::<u64>()
            });
        stored + infos + current + frames
    }

    /// Drain stored entries into writable sections. The continuation
    /// section goes first and the running loop's section last; between
    /// dumps at most one loop can hold both roles, and then it is the only
    /// section with new content.
    fn collect_sections(&mut self) -> Vec<(LoopId, Vec<LoopEntry>)> {
        let mut ids: Vec<LoopId> = self
            .loops
            .iter()
            .filter(|(_, rec)| !rec.entries.is_empty())
            .map(|(&id, _)| id)
            .collect();
        if let Some(running) = self.running_loop.as_ref().map(|f| f.loop_id) {
            if let Some(pos) = ids.iter().position(|&id| id == running) {
                let id = ids.remove(pos);
                ids.push(id);
            }
        }
        if let Some(cont) = self.continued_loop {
            if let Some(pos) = ids.iter().position(|&id| id == cont) {
                let id = ids.remove(pos);
                ids.insert(0, id);
            }
        }

        let mut sections = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rec) = self.loops.get_mut(&id) {
                let entries = rec.entries.drain(..).map(build_entry).collect();
                rec.recent.clear();
                sections.push((id, entries));
            }
        }
        sections
    }
}

fn build_entry(rec: EntryRec) -> LoopEntry {
    let mut entry = LoopEntry::new();
    for &(start, end) in rec.invocations.pairs() {
        entry.add_invocation_range(start, end);
    }
    for mut group in rec.groups {
        let target = entry.group_mut();
        target.start_iteration_group();
        for &(start, end) in group.numbers.pairs() {
            target.add_iteration_range(start, end);
        }
        for pattern in group.compressor.take_patterns() {
            target.push_control_flow(pattern);
        }
    }
    entry
}

fn build_info(rec: CallInfoRec) -> CallInvocationGroup {
    let mut info = CallInvocationGroup::new();
    for &(start, end) in rec.invocations.pairs() {
        info.add_invocation_range(start, end);
    }
    for (id, site) in rec.sites {
        if site.groups.is_empty() {
            continue;
        }
        let call = info.call_mut(id);
        for mut group in site.groups {
            call.start_instance_group();
            for &(start, end) in group.numbers.pairs() {
                call.add_instance_range(start, end);
            }
            for pattern in group.compressor.take_patterns() {
                call.push_control_flow(pattern);
            }
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::parser::{CallTraceReader, LoopTraceReader};

    fn recorder(dir: &TempDir) -> TraceRecorder {
        let config = RecorderConfig::default().with_output_dir(dir.path());
        TraceRecorder::new(config).unwrap()
    }

    fn run_invocation(rec: &mut TraceRecorder, loop_id: LoopId, iterations: &[&[Symbol]]) {
        rec.loop_invocation_start(loop_id).unwrap();
        for syms in iterations {
            rec.loop_iteration_start().unwrap();
            for &sym in *syms {
                rec.instruction(sym).unwrap();
            }
        }
        rec.loop_invocation_end().unwrap();
    }

    #[test]
    fn identical_invocations_share_one_entry() {
        let dir = TempDir::new().unwrap();
        let mut rec = recorder(&dir);
        for _ in 0..3 {
            run_invocation(&mut rec, 7, &[&[1, 2], &[1, 2]]);
        }
        run_invocation(&mut rec, 7, &[&[3]]);
        rec.finish().unwrap();

        let mut loops = LoopTraceReader::from_dir(dir.path()).unwrap();
        let (id, first) = loops.next_entry().unwrap().unwrap();
        assert_eq!(id, 7);
        assert_eq!(first.invocations().pairs(), &[(0, 2)]);
        assert_eq!(first.group().num_iteration_groups(), 1);
        assert_eq!(
            first.group().iteration_groups()[0].iterations().pairs(),
            &[(0, 1)]
        );
        let (_, second) = loops.next_entry().unwrap().unwrap();
        assert_eq!(second.invocations().pairs(), &[(3, 3)]);
        assert!(loops.next_entry().unwrap().is_none());
        assert_eq!(loops.dumps_seen(), 1);

        let mut calls = CallTraceReader::from_dir(dir.path()).unwrap();
        let info = calls.next_entry().unwrap().unwrap();
        assert_eq!(info.invocations().pairs(), &[(0, 3)]);
        assert_eq!(info.num_call_sites(), 0);
        assert!(calls.next_entry().unwrap().is_none());
    }

    #[test]
    fn alternating_iterations_form_two_groups() {
        let dir = TempDir::new().unwrap();
        let mut rec = recorder(&dir);
        run_invocation(&mut rec, 2, &[&[5], &[6], &[5], &[6], &[5]]);
        rec.finish().unwrap();

        let mut loops = LoopTraceReader::from_dir(dir.path()).unwrap();
        let (_, entry) = loops.next_entry().unwrap().unwrap();
        let groups = entry.group().iteration_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].iterations().pairs(), &[(0, 0), (2, 2), (4, 4)]);
        assert_eq!(groups[1].iterations().pairs(), &[(1, 1), (3, 3)]);
    }

    #[test]
    fn calls_record_per_site_instance_groups() {
        let dir = TempDir::new().unwrap();
        let mut rec = recorder(&dir);
        rec.loop_invocation_start(5).unwrap();
        rec.loop_iteration_start().unwrap();
        for _ in 0..2 {
            rec.call_start(100).unwrap();
            rec.instruction(7).unwrap();
            rec.call_end().unwrap();
        }
        rec.call_start(200).unwrap();
        rec.instruction(9).unwrap();
        rec.call_end().unwrap();
        rec.loop_invocation_end().unwrap();
        rec.finish().unwrap();

        let mut calls = CallTraceReader::from_dir(dir.path()).unwrap();
        let info = calls.next_entry().unwrap().unwrap();
        assert_eq!(info.invocations().pairs(), &[(0, 0)]);
        assert_eq!(info.num_call_sites(), 2);
        let groups = info.calls()[&100].instance_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].instances().pairs(), &[(0, 1)]);
        assert_eq!(groups[0].control_flow(), &[crate::compress::Pattern::leaf(7)]);
        assert_eq!(info.calls()[&200].num_instance_groups(), 1);

        let mut loops = LoopTraceReader::from_dir(dir.path()).unwrap();
        let (_, entry) = loops.next_entry().unwrap().unwrap();
        let mut stream = Vec::new();
        entry.group().iteration_groups()[0]
            .control_flow()
            .iter()
            .for_each(|p| p.expand_into(&mut stream));
        assert_eq!(stream, vec![100, 100, 200]);
    }

    #[test]
    fn memory_pressure_splits_an_invocation_across_dumps() {
        let dir = TempDir::new().unwrap();
        let config = RecorderConfig::default()
            .with_output_dir(dir.path())
            .with_max_memory_bytes(100);
        let mut rec = TraceRecorder::new(config).unwrap();

        rec.loop_invocation_start(9).unwrap();
        rec.loop_iteration_start().unwrap();
        rec.instruction(5).unwrap();
        rec.loop_iteration_start().unwrap();
        rec.instruction(6).unwrap();
        rec.loop_invocation_end().unwrap();
        rec.finish().unwrap();

        let mut loops = LoopTraceReader::from_dir(dir.path()).unwrap();
        let (id, entry) = loops.next_entry().unwrap().unwrap();
        assert_eq!(id, 9);
        assert_eq!(entry.invocations().pairs(), &[(0, 0)]);
        let groups = entry.group().iteration_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].iterations().pairs(), &[(0, 0)]);
        assert_eq!(groups[1].iterations().pairs(), &[(1, 1)]);
        assert!(loops.next_entry().unwrap().is_none());
        assert_eq!(loops.dumps_seen(), 2);

        let mut calls = CallTraceReader::from_dir(dir.path()).unwrap();
        let info = calls.next_entry().unwrap().unwrap();
        assert_eq!(info.invocations().pairs(), &[(0, 0)]);
        assert_eq!(calls.dumps_seen(), 2);
    }

    #[test]
    fn flush_mid_call_splits_the_instance_group() {
        let dir = TempDir::new().unwrap();
        let mut rec = recorder(&dir);
        rec.loop_invocation_start(9).unwrap();
        rec.loop_iteration_start().unwrap();
        rec.call_start(100).unwrap();
        rec.instruction(7).unwrap();
        rec.flush().unwrap();
        rec.instruction(8).unwrap();
        rec.call_end().unwrap();
        rec.loop_invocation_end().unwrap();
        rec.finish().unwrap();

        let mut calls = CallTraceReader::from_dir(dir.path()).unwrap();
        let info = calls.next_entry().unwrap().unwrap();
        let groups = info.calls()[&100].instance_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].instances().pairs(), &[(0, 0)]);
        assert_eq!(
            groups[0].control_flow(),
            &[
                crate::compress::Pattern::leaf(7),
                crate::compress::Pattern::leaf(8)
            ]
        );
        assert_eq!(calls.dumps_seen(), 2);

        let mut loops = LoopTraceReader::from_dir(dir.path()).unwrap();
        let (_, entry) = loops.next_entry().unwrap().unwrap();
        let groups = entry.group().iteration_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].iterations().pairs(), &[(0, 0)]);
        assert_eq!(groups[0].control_flow(), &[crate::compress::Pattern::leaf(100)]);
    }

    #[test]
    fn forced_flush_between_invocations_writes_complete_dumps() {
        let dir = TempDir::new().unwrap();
        let mut rec = recorder(&dir);
        run_invocation(&mut rec, 3, &[&[5]]);
        rec.flush().unwrap();
        run_invocation(&mut rec, 3, &[&[5]]);
        rec.finish().unwrap();

        let mut loops = LoopTraceReader::from_dir(dir.path()).unwrap();
        let (_, first) = loops.next_entry().unwrap().unwrap();
        assert_eq!(first.invocations().pairs(), &[(0, 0)]);
        let (_, second) = loops.next_entry().unwrap().unwrap();
        assert_eq!(second.invocations().pairs(), &[(1, 1)]);
        assert!(loops.next_entry().unwrap().is_none());
        assert_eq!(loops.dumps_seen(), 2);
    }

    #[test]
    fn nothing_recorded_writes_no_files() {
        let dir = TempDir::new().unwrap();
        let rec = recorder(&dir);
        rec.finish().unwrap();
        assert!(!dir.path().join(crate::core::LOOP_TRACE_FILE).exists());
        assert!(!dir.path().join(crate::core::CALL_TRACE_FILE).exists());
    }

    #[test]
    fn timeout_stops_recording() {
        let dir = TempDir::new().unwrap();
        let config = RecorderConfig::default()
            .with_output_dir(dir.path())
            .with_timeout(Some(Duration::ZERO));
        let mut rec = TraceRecorder::new(config).unwrap();
        rec.loop_invocation_start(1).unwrap();
        rec.loop_iteration_start().unwrap();
        for _ in 0..=TIMEOUT_CHECK_INTERVAL {
            rec.instruction(5).unwrap();
        }
        assert!(rec.timed_out());
        rec.finish().unwrap();
    }

    #[test]
    #[should_panic(expected = "already running")]
    fn nested_loop_invocations_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut rec = recorder(&dir);
        rec.loop_invocation_start(1).unwrap();
        let _ = rec.loop_invocation_start(2);
    }

    #[test]
    #[should_panic(expected = "no loop invocation is running")]
    fn iteration_outside_an_invocation_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut rec = recorder(&dir);
        let _ = rec.loop_iteration_start();
    }

    #[test]
    #[should_panic(expected = "no call is running")]
    fn unbalanced_call_end_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut rec = recorder(&dir);
        rec.loop_invocation_start(1).unwrap();
        rec.loop_iteration_start().unwrap();
        let _ = rec.call_end();
    }
}
