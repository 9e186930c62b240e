/*!
# Trace File Parsers

Line-oriented parsers for the two persisted trace files.

## Layers

- **lexer** — logos token definition for one line of trace text, with
  line/column positions for error reporting
- **lines** — blank-skipping line walker over any `BufRead` source, plus
  the `COMPLETE`/`INCOMPLETE` marker classification
- **text** — the shared value grammar: range sets `{a,b-c,...}` and
  compressed patterns `(sym)` / `(children,count)`
- **loop_reader / call_reader** — file-level readers, each exposing a
  token-level scan pass and a merged-entry pass over the same walker

## Usage

```no_run
use looptrace::parser::LoopTraceReader;

let mut reader = LoopTraceReader::from_dir("trace_out")?;
while let Some((loop_id, entry)) = reader.next_entry()? {
    println!("loop {loop_id}: {} invocations", entry.num_invocations());
}
# Ok::<(), looptrace::TraceError>(())
```
*/

pub mod call_reader;
pub mod lexer;
pub mod lines;
pub mod loop_reader;
pub mod text;

pub use call_reader::{CallScanSummary, CallTraceReader, CallTraceScan};
pub use lexer::{TokenCursor, TraceToken};
pub use lines::EntryStatus;
pub use loop_reader::{LoopScanSummary, LoopTraceReader, LoopTraceScan};
pub use text::{parse_pattern, parse_patterns, parse_range_set};
