/*!
# Loop Trace Hierarchy

The parsed form of a loop trace and its derived lookups.

A trace is a list of entries, each pairing a set of invocation numbers with
the invocation group they executed. An invocation group holds iteration
groups, each pairing iteration numbers with compressed control flow. The
sharing at both levels comes from the recorder's deduplication, so the
hierarchy stays small even for long executions.

`StreamedLoopTrace` is the usual entry point: it pulls entries lazily and
answers instance-to-iteration queries through the precomputed tables.
*/

pub mod entry;
pub mod invocation;
pub mod iteration;
pub mod stream;

pub use entry::LoopEntry;
pub use invocation::{InstanceRun, InvocationGroup};
pub use iteration::IterationGroup;
pub use stream::{InvocationCursor, StreamedLoopTrace};
