/*!
# Pattern trees

A `Pattern` is either a single symbol or an ordered sequence of child
patterns repeated a number of times. Equality is structural and the tree
is owned top-down, so cloning deep-copies children.
*/

use std::collections::BTreeMap;
use std::fmt;

use crate::core::Symbol;

/// One node of a compressed symbol stream.
///
/// Serializes as `(sym)` for a leaf and `(child₁child₂...,count)` for a
/// sequence, e.g. `((10)(20),3)` for `10 20` repeated three times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Leaf(Symbol),
    Seq {
        children: Vec<Pattern>,
        repetitions: u64,
    },
}

impl Pattern {
    pub fn leaf(sym: Symbol) -> Self {
        Pattern::Leaf(sym)
    }

    /// Internal node over `children` (oldest first), repeated `repetitions`
    /// times. `children` must be non-empty and `repetitions` at least 1.
    pub fn sequence(children: Vec<Pattern>, repetitions: u64) -> Self {
        debug_assert!(!children.is_empty());
        debug_assert!(repetitions >= 1);
        Pattern::Seq { children, repetitions }
    }

    /// Number of direct children; 0 for a leaf.
    pub fn child_count(&self) -> usize {
        match self {
            Pattern::Leaf(_) => 0,
            Pattern::Seq { children, .. } => children.len(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Pattern::Leaf(_))
    }

    /// Total number of symbols this node expands to.
    pub fn symbol_count(&self) -> u64 {
        match self {
            Pattern::Leaf(_) => 1,
            Pattern::Seq { children, repetitions } => {
                repetitions * children.iter().map(Pattern::symbol_count).sum::<u64>()
            }
        }
    }

    /// Append the expanded symbol sequence to `out`.
    pub fn expand_into(&self, out: &mut Vec<Symbol>) {
        match self {
            Pattern::Leaf(sym) => out.push(*sym),
            Pattern::Seq { children, repetitions } => {
                for _ in 0..*repetitions {
                    for child in children {
                        child.expand_into(out);
                    }
                }
            }
        }
    }

    /// Add `scale` occurrences of every symbol expansion to `counts`.
    pub fn accumulate_counts(&self, scale: u64, counts: &mut BTreeMap<Symbol, u64>) {
        match self {
            Pattern::Leaf(sym) => {
                *counts.entry(*sym).or_insert(0) += scale;
            }
            Pattern::Seq { children, repetitions } => {
                for child in children {
                    child.accumulate_counts(scale * repetitions, counts);
                }
            }
        }
    }

    /// Per-symbol expansion counts of this node alone.
    pub fn instance_counts(&self) -> BTreeMap<Symbol, u64> {
        let mut counts = BTreeMap::new();
        self.accumulate_counts(1, &mut counts);
        counts
    }

    /// Rough in-memory footprint, used for flush-threshold accounting.
    pub fn approx_size_bytes(&self) -> u64 {
        match self {
            Pattern::Leaf(_) => 48,
            Pattern::Seq { children, .. } => {
                48 + children.iter().map(Pattern::approx_size_bytes).sum::<u64>()
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Leaf(sym) => write!(f, "({sym})"),
            Pattern::Seq { children, repetitions } => {
                write!(f, "(")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, ",{repetitions})")
            }
        }
    }
}
