/*!
# Core Module

Shared identifiers and the crate-wide error type used by the trace
reader, the streamed collections and the recorder.
*/

pub mod errors;

pub use errors::{Result, TraceError};

/// Opaque identity of an instruction or call site, the unit of compression.
pub type Symbol = u64;

/// Static identity of a traced loop.
pub type LoopId = u64;

/// Loop trace file name inside an output directory.
pub const LOOP_TRACE_FILE: &str = "loop_trace.txt.gz";

/// Call trace file name inside an output directory.
pub const CALL_TRACE_FILE: &str = "call_trace.txt.gz";
