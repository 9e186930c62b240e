/*!
# Iteration Groups

A group of loop iterations that shared the same compressed control flow.

The recorder deduplicates iterations whose compressors compare equal, so one
`IterationGroup` typically stands for many iteration numbers. The raw pattern
list is kept only until `build_instance_counts` folds it into a per-symbol
count table; after that the group answers count queries in O(log n) without
holding the patterns themselves.
*/

use std::collections::BTreeMap;
use std::fmt;

use crate::compress::Pattern;
use crate::core::Symbol;
use crate::reppat::RepetitionPattern;

/// Iterations sharing one compressed control flow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IterationGroup {
    iterations: RepetitionPattern,
    control_flow: Vec<Pattern>,
    instance_counts: BTreeMap<Symbol, u64>,
}

impl IterationGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// A group holding a single iteration number with the given control flow.
    pub fn single(iteration: u64, control_flow: Vec<Pattern>) -> Self {
        IterationGroup {
            iterations: RepetitionPattern::singleton(iteration),
            control_flow,
            instance_counts: BTreeMap::new(),
        }
    }

    /// True if no instructions were recorded for this group.
    pub fn is_empty(&self) -> bool {
        self.control_flow.is_empty() && self.instance_counts.is_empty()
    }

    pub fn add_iteration_range(&mut self, start: u64, end: u64) {
        self.iterations.add_pair(start, end);
    }

    pub fn add_iteration(&mut self, iteration: u64) {
        self.iterations.add_pair(iteration, iteration);
    }

    pub fn push_control_flow(&mut self, pattern: Pattern) {
        self.control_flow.push(pattern);
    }

    pub fn iterations(&self) -> &RepetitionPattern {
        &self.iterations
    }

    pub fn control_flow(&self) -> &[Pattern] {
        &self.control_flow
    }

    /// First iteration number covered by this group.
    ///
    /// Panics if the group covers no iterations.
    pub fn first_iteration(&self) -> u64 {
        self.iterations
            .first_instance()
            .unwrap_or_else(|| panic!("iteration group covers no iterations"))
    }

    /// Last iteration number covered by this group.
    ///
    /// Panics if the group covers no iterations.
    pub fn last_iteration(&self) -> u64 {
        self.iterations
            .last_instance()
            .unwrap_or_else(|| panic!("iteration group covers no iterations"))
    }

    pub fn is_single_iteration(&self) -> bool {
        self.iterations.is_singleton()
    }

    /// Split the first iteration number off into its own group. The control
    /// flow is cloned; both groups describe the same per-iteration trace.
    pub fn extract_first_iteration(&mut self) -> IterationGroup {
        let first = self.first_iteration();
        self.iterations.remove_first_instance();
        IterationGroup::single(first, self.control_flow.clone())
    }

    /// Split the last iteration number off into its own group.
    pub fn extract_last_iteration(&mut self) -> IterationGroup {
        let last = self.last_iteration();
        self.iterations.remove_last_instance();
        IterationGroup::single(last, self.control_flow.clone())
    }

    /// Fold the control flow into a per-symbol instance count table.
    ///
    /// The pattern list is discarded afterwards. This loses the instruction
    /// ordering but bounds memory while answering every count query the
    /// analyses need.
    pub fn build_instance_counts(&mut self) {
        self.instance_counts.clear();
        for pattern in &self.control_flow {
            pattern.accumulate_counts(1, &mut self.instance_counts);
        }
        self.control_flow.clear();
    }

    /// Number of instances of `sym` in one iteration of this group.
    ///
    /// Only meaningful after `build_instance_counts`.
    pub fn instances_per_iteration(&self, sym: Symbol) -> u64 {
        self.instance_counts.get(&sym).copied().unwrap_or(0)
    }

    pub fn instance_counts(&self) -> &BTreeMap<Symbol, u64> {
        &self.instance_counts
    }

    /// Total iterations covered, summed over all ranges.
    pub fn num_iterations(&self) -> u64 {
        self.iterations.instance_count()
    }

    pub fn approx_size_bytes(&self) -> u64 {
        let patterns: u64 = self.control_flow.iter().map(|p| p.approx_size_bytes()).sum();
        let counts = self.instance_counts.len() as u64 * 48;
        self.iterations.approx_size_bytes() + patterns + counts
    }
}

impl fmt::Display for IterationGroup {
    /// `{ranges} (pat)(pat)...` followed by a newline, the on-disk line form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.iterations)?;
        for pattern in &self.control_flow {
            write!(f, "{pattern}")?;
        }
        writeln!(f)
    }
}
