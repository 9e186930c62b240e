/*!
# Trace error type

Recoverable failures while reading or writing trace files. Invariant
violations inside the hierarchy (merge adjacency, lookups past the last
known instance) are panics, not `TraceError`s: the reconstruction code
assumes a disciplined writer and treats such topologies as corruption
that must stop the process.
*/

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TraceError>;

#[derive(Error, Debug)]
pub enum TraceError {
    /// Malformed trace text, with the 1-based line it was found on.
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// The file ended in the middle of a structural unit.
    #[error("unexpected end of trace data at line {line}")]
    UnexpectedEof { line: usize },

    /// Structurally valid text describing an impossible trace.
    #[error("corrupt trace: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraceError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        TraceError::Syntax { line, message: message.into() }
    }
}
