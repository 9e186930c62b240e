/*!
# Call Instance Groups

Instances of one call site that shared the same compressed body trace.
*/

use std::collections::BTreeMap;
use std::fmt;

use crate::compress::Pattern;
use crate::core::Symbol;
use crate::reppat::RepetitionPattern;

/// Call instances sharing one compressed body.
///
/// Unlike the loop-side iteration groups, the pattern list survives count
/// building. Call bodies stay expandable after the instruction attribution
/// cache has been built over them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallInstanceGroup {
    instances: RepetitionPattern,
    control_flow: Vec<Pattern>,
    instance_counts: BTreeMap<Symbol, u64>,
}

impl CallInstanceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// A group holding a single call instance with the given body.
    pub fn single(instance: u64, control_flow: Vec<Pattern>) -> Self {
        CallInstanceGroup {
            instances: RepetitionPattern::singleton(instance),
            control_flow,
            instance_counts: BTreeMap::new(),
        }
    }

    pub fn add_instance_range(&mut self, start: u64, end: u64) {
        self.instances.add_pair(start, end);
    }

    pub fn add_instance(&mut self, instance: u64) {
        self.instances.add_pair(instance, instance);
    }

    pub fn push_control_flow(&mut self, pattern: Pattern) {
        self.control_flow.push(pattern);
    }

    pub fn instances(&self) -> &RepetitionPattern {
        &self.instances
    }

    pub fn control_flow(&self) -> &[Pattern] {
        &self.control_flow
    }

    /// First call instance number covered by this group.
    ///
    /// Panics if the group covers no instances.
    pub fn first_instance(&self) -> u64 {
        self.instances
            .first_instance()
            .unwrap_or_else(|| panic!("call instance group covers no instances"))
    }

    /// Last call instance number covered by this group.
    ///
    /// Panics if the group covers no instances.
    pub fn last_instance(&self) -> u64 {
        self.instances
            .last_instance()
            .unwrap_or_else(|| panic!("call instance group covers no instances"))
    }

    pub fn is_single_instance(&self) -> bool {
        self.instances.is_singleton()
    }

    /// Split the first instance number off into its own group. The body is
    /// cloned onto both sides.
    pub fn extract_first_instance(&mut self) -> CallInstanceGroup {
        let first = self.first_instance();
        self.instances.remove_first_instance();
        CallInstanceGroup::single(first, self.control_flow.clone())
    }

    /// Split the last instance number off into its own group.
    pub fn extract_last_instance(&mut self) -> CallInstanceGroup {
        let last = self.last_instance();
        self.instances.remove_last_instance();
        CallInstanceGroup::single(last, self.control_flow.clone())
    }

    /// Fold the body into a per-symbol instance count table. The pattern
    /// list is kept.
    pub fn build_instance_counts(&mut self) {
        self.instance_counts.clear();
        for pattern in &self.control_flow {
            pattern.accumulate_counts(1, &mut self.instance_counts);
        }
    }

    /// Instances of `sym` executed by one call instance of this group.
    pub fn instances_per_call(&self, sym: Symbol) -> u64 {
        self.instance_counts.get(&sym).copied().unwrap_or(0)
    }

    pub fn instance_counts(&self) -> &BTreeMap<Symbol, u64> {
        &self.instance_counts
    }

    pub fn num_instances(&self) -> u64 {
        self.instances.instance_count()
    }

    pub fn approx_size_bytes(&self) -> u64 {
        let patterns: u64 = self.control_flow.iter().map(|p| p.approx_size_bytes()).sum();
        let counts = self.instance_counts.len() as u64 * 48;
        self.instances.approx_size_bytes() + patterns + counts
    }
}

impl fmt::Display for CallInstanceGroup {
    /// `{ranges} (pat)(pat)...` followed by a newline, the on-disk line form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.instances)?;
        for pattern in &self.control_flow {
            write!(f, "{pattern}")?;
        }
        writeln!(f)
    }
}
