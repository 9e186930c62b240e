/*!
# Trace Recording

The writing half of the crate: an event-driven recorder and the dump
writer behind it.

- **config** — output directory, memory threshold, compression window,
  dedup depth and wall-clock budget, with environment overrides
- **recorder** — `TraceRecorder`, the instrumentation-facing state
  machine that compresses and deduplicates events as they arrive
- **writer** — `TraceWriter`, which appends one gzip member per dump to
  the loop and call trace files

## Usage

```no_run
use looptrace::record::{RecorderConfig, TraceRecorder};

let mut recorder = TraceRecorder::new(RecorderConfig::default())?;
recorder.loop_invocation_start(1)?;
recorder.loop_iteration_start()?;
recorder.instruction(42)?;
recorder.loop_invocation_end()?;
recorder.finish()?;
# Ok::<(), looptrace::TraceError>(())
```
*/

pub mod config;
pub mod recorder;
pub mod writer;

pub use config::RecorderConfig;
pub use recorder::TraceRecorder;
pub use writer::TraceWriter;
