/*!
# Sliding-window pattern compressor

Symbols enter the front of a bounded window as fresh leaves; `try_match`
and `try_merge` run to a fixed point after every insertion, folding
repeats into `Pattern` nodes. When the window overflows, the oldest node
moves into the append-only archive. Decompression expands the archive
then the window, oldest to newest.
*/

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use crate::compress::Pattern;
use crate::core::Symbol;

/// Online compressor for one stream of symbols.
///
/// Two compressors compare equal when they hold the same number of
/// patterns and the patterns are pairwise equal in archive-then-window
/// order; the window length does not participate in equality.
#[derive(Debug, Clone)]
pub struct PatternCompressor {
    /// Youngest element at the front.
    window: VecDeque<Pattern>,
    /// Patterns that aged out of the window, oldest first.
    archive: Vec<Pattern>,
    max_window: usize,
}

impl PatternCompressor {
    pub fn new(max_window: usize) -> Self {
        debug_assert!(max_window >= 1);
        Self {
            window: VecDeque::new(),
            archive: Vec::new(),
            max_window,
        }
    }

    /// Feed one symbol and re-establish the compression fixed point.
    pub fn insert_symbol(&mut self, sym: Symbol) {
        self.window.push_front(Pattern::leaf(sym));
        while self.try_match() || self.try_merge() {}
        if self.window.len() > self.max_window {
            if let Some(oldest) = self.window.pop_back() {
                self.archive.push(oldest);
            }
        }
    }

    /// True when the pattern at window index `p` has exactly `p` children
    /// equal, oldest-to-newest, to the `p` youngest window entries.
    fn front_matches(&self, p: usize) -> bool {
        match &self.window[p] {
            Pattern::Seq { children, .. } if children.len() == p => children
                .iter()
                .rev()
                .zip(self.window.iter())
                .all(|(child, entry)| child == entry),
            _ => false,
        }
    }

    /// Fold the youngest window entries into an established pattern that
    /// already describes them, preferring larger patterns.
    fn try_match(&mut self) -> bool {
        if self.window.is_empty() {
            return false;
        }
        let upper = (self.max_window / 2 + 1).min(self.window.len() - 1);
        for p in (1..=upper).rev() {
            if self.front_matches(p) {
                for _ in 0..p {
                    self.window.pop_front();
                }
                match &mut self.window[0] {
                    Pattern::Seq { repetitions, .. } => *repetitions += 1,
                    Pattern::Leaf(_) => unreachable!("matched pattern has children"),
                }
                return true;
            }
        }
        false
    }

    fn is_repeated_sequence(&self, width: usize) -> bool {
        (0..width).all(|i| self.window[i] == self.window[i + width])
    }

    /// Collapse an immediately repeated sequence of any width into one
    /// internal node with two repetitions, widest first.
    fn try_merge(&mut self) -> bool {
        for width in (1..=self.window.len() / 2).rev() {
            if self.is_repeated_sequence(width) {
                let mut children: Vec<Pattern> = self.window.drain(..width).collect();
                children.reverse();
                // The second copy of the sequence is discarded.
                for _ in 0..width {
                    self.window.pop_front();
                }
                self.window.push_front(Pattern::sequence(children, 2));
                return true;
            }
        }
        false
    }

    /// All patterns, oldest to newest: archive first, then the window back
    /// to front.
    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.archive.iter().chain(self.window.iter().rev())
    }

    /// Number of pattern nodes currently held (compressed length).
    pub fn pattern_count(&self) -> usize {
        self.archive.len() + self.window.len()
    }

    /// Total number of symbols the compressor expands to.
    pub fn symbol_count(&self) -> u64 {
        self.patterns().map(Pattern::symbol_count).sum()
    }

    /// Reproduce the original symbol sequence.
    pub fn decompress(&self) -> Vec<Symbol> {
        let mut out = Vec::new();
        for pattern in self.patterns() {
            pattern.expand_into(&mut out);
        }
        out
    }

    /// Per-symbol expansion counts across archive and window.
    pub fn instance_counts(&self) -> BTreeMap<Symbol, u64> {
        let mut counts = BTreeMap::new();
        for pattern in self.patterns() {
            pattern.accumulate_counts(1, &mut counts);
        }
        counts
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty() && self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.archive.clear();
        self.window.clear();
    }

    /// Drain all patterns, oldest to newest, leaving the compressor empty.
    pub fn take_patterns(&mut self) -> Vec<Pattern> {
        let mut out: Vec<Pattern> = self.archive.drain(..).collect();
        while let Some(p) = self.window.pop_back() {
            out.push(p);
        }
        out
    }

    /// Rough in-memory footprint, used for flush-threshold accounting.
    pub fn approx_size_bytes(&self) -> u64 {
        64 + self.patterns().map(Pattern::approx_size_bytes).sum::<u64>()
    }
}

impl PartialEq for PatternCompressor {
    fn eq(&self, other: &Self) -> bool {
        self.pattern_count() == other.pattern_count()
            && self.patterns().eq(other.patterns())
    }
}

impl Eq for PatternCompressor {}

impl fmt::Display for PatternCompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pattern in self.patterns() {
            write!(f, "{pattern}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compress(window: usize, seq: &[Symbol]) -> PatternCompressor {
        let mut cfc = PatternCompressor::new(window);
        for &sym in seq {
            cfc.insert_symbol(sym);
        }
        cfc
    }

    #[test]
    fn roundtrip_identity_various_windows() {
        let seq: Vec<Symbol> = vec![1, 2, 3, 1, 2, 3, 1, 2, 3, 4, 4, 4, 5, 1, 2];
        for window in [1, 2, 3, 5, 8, 50] {
            let cfc = compress(window, &seq);
            assert_eq!(cfc.decompress(), seq, "window {window}");
        }
    }

    #[test]
    fn quad_sequence_collapses_to_single_node() {
        let seq = [10, 20, 30, 40, 10, 20, 30, 40, 10, 20, 30, 40];
        let cfc = compress(12, &seq);
        assert_eq!(cfc.pattern_count(), 1);
        let only = cfc.patterns().next().expect("one pattern");
        match only {
            Pattern::Seq { children, repetitions } => {
                assert_eq!(*repetitions, 3);
                assert_eq!(children.len(), 4);
                assert!(children.iter().all(Pattern::is_leaf));
            }
            Pattern::Leaf(_) => panic!("expected a sequence node"),
        }
        assert_eq!(cfc.decompress(), seq);
    }

    #[test]
    fn insert_reaches_fixed_point() {
        let mut cfc = compress(16, &[7, 8, 7, 8, 7, 8, 9]);
        assert!(!cfc.try_match());
        assert!(!cfc.try_merge());
    }

    #[test]
    fn repeated_single_symbol() {
        let seq = [6; 10];
        let cfc = compress(4, &seq);
        assert_eq!(cfc.decompress(), seq);
        assert_eq!(cfc.symbol_count(), 10);
        assert_eq!(cfc.instance_counts()[&6], 10);
    }

    #[test]
    fn window_overflow_archives_oldest() {
        let seq: Vec<Symbol> = (0..40).collect();
        let cfc = compress(4, &seq);
        assert_eq!(cfc.decompress(), seq);
        assert!(cfc.pattern_count() > 4);
    }

    #[test]
    fn equality_ignores_window_length() {
        let a = compress(8, &[1, 2, 1, 2]);
        let b = compress(32, &[1, 2, 1, 2]);
        assert_eq!(a, b);
        let c = compress(8, &[1, 2, 1, 3]);
        assert_ne!(a, c);
    }

    #[test]
    fn display_concatenates_patterns() {
        let cfc = compress(12, &[10, 20, 30, 40, 10, 20, 30, 40, 10, 20, 30, 40]);
        assert_eq!(cfc.to_string(), "((10)(20)(30)(40),3)");
    }
}
