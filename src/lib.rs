/*!
# Looptrace

Compressed recording, streaming and reconstruction of loop execution
traces. An instrumented program reports loop, iteration, call and
instruction events; the recorder compresses them online into pattern
trees, deduplicates repeated structure and appends dumps to a pair of
gzip trace files. The reading side streams those files back, stitches
dump-split invocations together and answers instance-level queries
without holding a whole trace in memory.

## Core Features

- **Online pattern compression** with a bounded sliding window, so tight
  loops collapse to a few nodes regardless of iteration count
- **Three-level deduplication** of iterations, invocations and call
  tables, with recency-ordered matching against recent records
- **Bounded recording memory** via mid-invocation dumps that the readers
  merge back into seamless entries
- **Streamed reconstruction** with entry eviction, instance-to-iteration
  mapping and call attribution for sub-instructions
- **Token-level scan pass** summarizing a trace without building it
- **CLI interface** for scanning, decompression, call inspection and
  self-checks

## Architecture

```text
looptrace
├── core      - Shared identifiers, file names, error type
├── compress  - Pattern trees and the sliding-window compressor
├── reppat    - Repetition patterns and range lookup tables
├── loops     - Loop entries, invocation/iteration groups, streaming
├── calls     - Call tables, instance groups, call attribution
├── parser    - Lexer, line walker and the two trace file readers
└── record    - Recorder state machine, dump writer, configuration
```

## Usage

### CLI

```bash
# Summarize a trace directory
looptrace scan ./trace_out

# Reconstruct the instruction stream of one invocation
looptrace decompress ./trace_out --loop-id 3 --invocation 0

# Inspect call attribution for an instruction
looptrace calls ./trace_out --instruction 17

# Verify that both trace files are consistent
looptrace selfcheck ./trace_out
```

### Library

```no_run
use looptrace::loops::StreamedLoopTrace;

let mut trace = StreamedLoopTrace::from_dir("./trace_out", 3)?;
if let Some(entry) = trace.entry_for_invocation(0)? {
    println!("{} iterations", entry.group().num_iterations());
}
# Ok::<(), looptrace::TraceError>(())
```
*/

pub mod calls;
pub mod compress;
pub mod core;
pub mod loops;
pub mod parser;
pub mod record;
pub mod reppat;

// Re-export main types for convenience
pub use crate::core::{LoopId, Symbol, TraceError, CALL_TRACE_FILE, LOOP_TRACE_FILE};
pub use calls::{Call, CallInstanceGroup, CallInvocationGroup, CallSpan, StreamedCallTrace};
pub use compress::{Pattern, PatternCompressor};
pub use loops::{InvocationGroup, IterationGroup, LoopEntry, StreamedLoopTrace};
pub use parser::{CallTraceReader, CallTraceScan, EntryStatus, LoopTraceReader, LoopTraceScan};
pub use record::{RecorderConfig, TraceRecorder, TraceWriter};
pub use reppat::{RangeLookup, RepetitionPattern, SortedRangeLookup};

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Scan the trace files in a directory and summarize them in one line.
pub fn scan_trace_dir<P: AsRef<Path>>(dir: P) -> Result<String> {
    let dir = dir.as_ref();
    let loops = LoopTraceReader::from_dir(dir)
        .and_then(|reader| reader.scan())
        .with_context(|| format!("scanning loop trace in {}", dir.display()))?;
    let calls = CallTraceReader::from_dir(dir)
        .and_then(|reader| reader.scan())
        .with_context(|| format!("scanning call trace in {}", dir.display()))?;

    let instructions: BTreeSet<Symbol> = loops
        .loops
        .values()
        .flat_map(|summary| summary.instructions.iter().copied())
        .collect();
    let invocations: u64 = loops.loops.values().map(|s| s.num_invocations).sum();

    Ok(format!(
        "Scan completed: {} loops, {} invocations, {} instructions, {} call sites in {} dumps",
        loops.loops.len(),
        invocations,
        instructions.len(),
        calls.call_sites.len(),
        loops.dumps,
    ))
}

/// Reconstruct the full instruction stream of one loop invocation.
pub fn expand_invocation<P: AsRef<Path>>(
    dir: P,
    loop_id: LoopId,
    invocation: u64,
) -> Result<Vec<Symbol>> {
    let dir = dir.as_ref();
    let mut reader = LoopTraceReader::from_dir(dir)
        .with_context(|| format!("opening loop trace in {}", dir.display()))?;
    while let Some((id, mut entry)) = reader.next_entry()? {
        if id != loop_id {
            continue;
        }
        let covered = entry
            .invocations()
            .pairs()
            .iter()
            .any(|&(start, end)| start <= invocation && invocation <= end);
        if !covered {
            continue;
        }
        entry.group_mut().build_iteration_lut();
        let mut out = Vec::new();
        entry.group().expand_into(&mut out);
        return Ok(out);
    }
    bail!("loop {loop_id} has no invocation {invocation}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn record_scan_and_expand() {
        let dir = TempDir::new().unwrap();
        let config = RecorderConfig::default().with_output_dir(dir.path());
        let mut rec = TraceRecorder::new(config).unwrap();
        rec.loop_invocation_start(4).unwrap();
        for _ in 0..2 {
            rec.loop_iteration_start().unwrap();
            rec.instruction(10).unwrap();
            rec.instruction(11).unwrap();
        }
        rec.loop_invocation_end().unwrap();
        rec.finish().unwrap();

        let summary = scan_trace_dir(dir.path()).unwrap();
        assert!(summary.contains("1 loops"), "{summary}");

        let stream = expand_invocation(dir.path(), 4, 0).unwrap();
        assert_eq!(stream, vec![10, 11, 10, 11]);
    }

    #[test]
    fn expanding_a_missing_invocation_fails() {
        let dir = TempDir::new().unwrap();
        let config = RecorderConfig::default().with_output_dir(dir.path());
        let mut rec = TraceRecorder::new(config).unwrap();
        rec.loop_invocation_start(4).unwrap();
        rec.loop_iteration_start().unwrap();
        rec.instruction(10).unwrap();
        rec.loop_invocation_end().unwrap();
        rec.finish().unwrap();

        assert!(expand_invocation(dir.path(), 4, 5).is_err());
        assert!(expand_invocation(dir.path(), 9, 0).is_err());
    }
}
