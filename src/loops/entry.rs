/*!
# Loop Trace Entries

One parsed unit of the loop trace: a set of invocation numbers paired with
the invocation group they all executed.
*/

use std::fmt;

use crate::reppat::RepetitionPattern;

use super::invocation::InvocationGroup;

/// Invocation numbers plus the shared invocation group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopEntry {
    invocations: RepetitionPattern,
    group: InvocationGroup,
}

impl LoopEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// An entry covering a single invocation number.
    pub fn single(invocation: u64, group: InvocationGroup) -> Self {
        LoopEntry {
            invocations: RepetitionPattern::singleton(invocation),
            group,
        }
    }

    pub fn add_invocation_range(&mut self, start: u64, end: u64) {
        self.invocations.add_pair(start, end);
    }

    pub fn add_invocation(&mut self, invocation: u64) {
        self.invocations.add_pair(invocation, invocation);
    }

    pub fn invocations(&self) -> &RepetitionPattern {
        &self.invocations
    }

    pub fn group(&self) -> &InvocationGroup {
        &self.group
    }

    pub fn group_mut(&mut self) -> &mut InvocationGroup {
        &mut self.group
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn clear(&mut self) {
        self.invocations.clear();
        self.group.clear();
    }

    /// First invocation number covered by this entry.
    ///
    /// Panics if the entry is empty.
    pub fn first_invocation_number(&self) -> u64 {
        self.invocations
            .first_instance()
            .unwrap_or_else(|| panic!("loop entry covers no invocations"))
    }

    /// Last invocation number covered by this entry.
    ///
    /// Panics if the entry is empty.
    pub fn last_invocation_number(&self) -> u64 {
        self.invocations
            .last_instance()
            .unwrap_or_else(|| panic!("loop entry covers no invocations"))
    }

    pub fn is_single_invocation(&self) -> bool {
        self.first_invocation_number() == self.last_invocation_number()
    }

    /// True if the last invocation here is the first invocation of `other`,
    /// meaning a dump boundary cut that invocation in two.
    pub fn last_and_first_overlap(&self, other: &LoopEntry) -> bool {
        self.last_invocation_number() == other.first_invocation_number()
    }

    /// Split the first invocation number into its own entry. The group is
    /// cloned; both entries describe the same per-invocation trace.
    pub fn extract_first_invocation(&mut self) -> LoopEntry {
        let entry = LoopEntry::single(self.first_invocation_number(), self.group.clone());
        self.invocations.remove_first_instance();
        entry
    }

    /// Split the last invocation number into its own entry.
    pub fn extract_last_invocation(&mut self) -> LoopEntry {
        let entry = LoopEntry::single(self.last_invocation_number(), self.group.clone());
        self.invocations.remove_last_instance();
        entry
    }

    pub fn precompute(&mut self) {
        self.group.precompute();
    }

    pub fn num_invocations(&self) -> u64 {
        self.invocations.instance_count()
    }

    /// Merge a continuation entry whose first invocation was split off this
    /// entry's last invocation by a dump boundary.
    ///
    /// At most one invocation can be shared between the two entries. Returns
    /// the entries left over by the merge: the split-off tail of `self` when
    /// it covered several invocations, and the rest of `other` when it did.
    /// No overlap means no merging happens and `other` comes back whole.
    pub fn merge_into_and_return_remaining(&mut self, mut other: LoopEntry) -> Vec<LoopEntry> {
        let mut remaining = Vec::new();

        if other.is_empty() {
            return remaining;
        }
        if !self.last_and_first_overlap(&other) {
            remaining.push(other);
            return remaining;
        }

        if self.is_single_invocation() {
            self.group.merge_iteration_info(&mut other.group);
        } else {
            let mut tail = self.extract_last_invocation();
            tail.group.merge_iteration_info(&mut other.group);
            remaining.push(tail);
        }

        if !other.is_single_invocation() {
            other.invocations.remove_first_instance();
            remaining.push(other);
        }

        remaining
    }

    pub fn approx_size_bytes(&self) -> u64 {
        self.invocations.approx_size_bytes() + self.group.approx_size_bytes()
    }
}

impl fmt::Display for LoopEntry {
    /// The on-disk section form: ranges and group count on the first line,
    /// one line per iteration group, then a blank line.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.invocations, self.group.num_iteration_groups())?;
        write!(f, "{}", self.group)?;
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Pattern;
    use crate::loops::IterationGroup;

    fn entry(ranges: &[(u64, u64)], groups: &[(u64, &[u64])]) -> LoopEntry {
        let mut e = LoopEntry::new();
        for &(s, end) in ranges {
            e.add_invocation_range(s, end);
        }
        for &(iteration, symbols) in groups {
            let patterns = symbols.iter().map(|&s| Pattern::leaf(s)).collect();
            e.group_mut()
                .push_iteration_group(IterationGroup::single(iteration, patterns));
        }
        e
    }

    #[test]
    fn merge_without_overlap_returns_other_untouched() {
        let mut first = entry(&[(0, 3)], &[(0, &[1])]);
        let second = entry(&[(5, 6)], &[(0, &[2])]);

        let remaining = first.merge_into_and_return_remaining(second.clone());
        assert_eq!(remaining, vec![second]);
        assert_eq!(first.invocations().pairs(), &[(0, 3)]);
    }

    #[test]
    fn merge_of_two_singletons_leaves_nothing() {
        let mut first = entry(&[(4, 4)], &[(0, &[1, 2])]);
        let second = entry(&[(4, 4)], &[(1, &[3])]);

        let remaining = first.merge_into_and_return_remaining(second);
        assert!(remaining.is_empty());
        assert_eq!(first.invocations().pairs(), &[(4, 4)]);
        assert_eq!(first.group().num_iteration_groups(), 2);
    }

    #[test]
    fn merge_joins_a_cut_iteration_across_entries() {
        let mut first = entry(&[(4, 4)], &[(0, &[1])]);
        let second = entry(&[(4, 4)], &[(0, &[2])]);

        let remaining = first.merge_into_and_return_remaining(second);
        assert!(remaining.is_empty());
        assert_eq!(first.group().num_iteration_groups(), 1);
        assert_eq!(
            first.group().iteration_groups()[0].control_flow(),
            &[Pattern::leaf(1), Pattern::leaf(2)]
        );
    }

    #[test]
    fn merge_splits_a_multi_invocation_entry() {
        let mut first = entry(&[(0, 4)], &[(0, &[1])]);
        let second = entry(&[(4, 4)], &[(1, &[2])]);

        let remaining = first.merge_into_and_return_remaining(second);

        assert_eq!(first.invocations().pairs(), &[(0, 3)]);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].invocations().pairs(), &[(4, 4)]);
        assert_eq!(remaining[0].group().num_iteration_groups(), 2);
    }

    #[test]
    fn merge_trims_a_multi_invocation_continuation() {
        let mut first = entry(&[(4, 4)], &[(0, &[1])]);
        let second = entry(&[(4, 6)], &[(1, &[2])]);

        let remaining = first.merge_into_and_return_remaining(second);

        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].invocations().pairs(), &[(5, 6)]);
        assert_eq!(first.group().num_iteration_groups(), 2);
    }

    #[test]
    fn section_form_lists_each_iteration_group() {
        let e = entry(&[(0, 2), (5, 5)], &[(0, &[1, 2]), (1, &[3])]);
        assert_eq!(e.to_string(), "{0-2,5} 2\n{0} (1)(2)\n{1} (3)\n\n");
    }
}
