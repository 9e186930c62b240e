/*!
# Call Hierarchy

The call side of a trace: which call sites ran during each loop invocation,
how their bodies compressed, and which call instance produced which dynamic
instance of every sub-instruction.

Structures parallel the loop side. A [`CallInstanceGroup`] is the call
analogue of an iteration group, a [`Call`] collects one site's groups, and
a [`CallInvocationGroup`] is one parsed call info covering a range of loop
invocations. [`StreamedCallTrace`] pulls infos on demand and evicts them
once consumed.
*/

pub mod call;
pub mod instance;
pub mod invocation;
pub mod stream;

pub use call::Call;
pub use instance::CallInstanceGroup;
pub use invocation::{CallInvocationGroup, CallSpan};
pub use stream::{CallInfoCursor, StreamedCallTrace};
