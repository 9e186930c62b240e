/*!
# Pattern compression

Online compression of symbol streams into self-similar pattern trees.
`PatternCompressor` consumes one symbol at a time and maintains a bounded
sliding window of `Pattern` nodes plus an unbounded archive of nodes that
aged out of the window. Repeated sequences collapse into internal nodes
carrying a repetition count, so tight loops compress to a few nodes
regardless of iteration count.
*/

pub mod compressor;
pub mod pattern;

pub use compressor::PatternCompressor;
pub use pattern::Pattern;
