/*!
# Call Invocation Groups

A set of loop invocations that executed the same calls, as a per-call-site
table of [`Call`] records.

The group also owns the instruction attribution cache. Calls from different
sites interleave within one loop invocation; replaying them in iteration
order assigns every dynamic instance of every sub-instruction a contiguous
span and the call instance that produced it. `call_for_instance` then maps
an instance number back to its call with a binary search.
*/

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::core::Symbol;
use crate::loops::InvocationGroup;
use crate::reppat::RepetitionPattern;

use super::call::Call;

/// A run of one sub-instruction's dynamic instances attributed to a single
/// call instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSpan {
    pub first_instance: u64,
    pub last_instance: u64,
    pub call_id: Symbol,
    pub call_instance: u64,
}

/// Walks one call site's instances in loop iteration order.
#[derive(Debug, Clone, Copy)]
struct CallCursor {
    call_id: Symbol,
    instance: u64,
    iteration: u64,
}

/// Loop invocations sharing one call table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallInvocationGroup {
    invocations: RepetitionPattern,
    calls: BTreeMap<Symbol, Call>,
    cache: BTreeMap<Symbol, Vec<CallSpan>>,
    constant_call_sites: BTreeMap<Symbol, bool>,
    cache_built: bool,
}

impl CallInvocationGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// A group covering a single invocation number with the given call table.
    pub fn single(invocation: u64, calls: BTreeMap<Symbol, Call>) -> Self {
        CallInvocationGroup {
            invocations: RepetitionPattern::singleton(invocation),
            calls,
            cache: BTreeMap::new(),
            constant_call_sites: BTreeMap::new(),
            cache_built: false,
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

    pub fn calls(&self) -> &BTreeMap<Symbol, Call> {
        &self.calls
    }

    pub fn call(&self, call_id: Symbol) -> Option<&Call> {
        self.calls.get(&call_id)
    }

    /// The call record for a site, created empty on first use.
    pub fn call_mut(&mut self, call_id: Symbol) -> &mut Call {
        self.calls.entry(call_id).or_default()
    }

    pub fn num_call_sites(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.invocations.is_empty()
    }

    pub fn clear(&mut self) {
        self.invocations.clear();
        self.calls.clear();
        self.cache.clear();
        self.constant_call_sites.clear();
        self.cache_built = false;
    }

    /// First invocation number covered by this group.
    ///
    /// Panics if the group covers no invocations.
    pub fn first_invocation_number(&self) -> u64 {
        self.invocations
            .first_instance()
            .unwrap_or_else(|| panic!("call info covers no invocations"))
    }

    /// Last invocation number covered by this group.
    ///
    /// Panics if the group covers no invocations.
    pub fn last_invocation_number(&self) -> u64 {
        self.invocations
            .last_instance()
            .unwrap_or_else(|| panic!("call info covers no invocations"))
    }

    pub fn is_single_invocation(&self) -> bool {
        self.invocations.is_singleton()
    }

    pub fn num_invocations(&self) -> u64 {
        self.invocations.instance_count()
    }

    /// True if the last invocation here is the first invocation of `other`,
    /// meaning a dump boundary cut that invocation in two.
    pub fn last_and_first_overlap(&self, other: &CallInvocationGroup) -> bool {
        self.last_invocation_number() == other.first_invocation_number()
    }

    /// Split the first invocation number into its own group. The call table
    /// is cloned; the attribution cache is not.
    pub fn extract_first_invocation(&mut self) -> CallInvocationGroup {
        let group =
            CallInvocationGroup::single(self.first_invocation_number(), self.calls.clone());
        self.invocations.remove_first_instance();
        group
    }

    /// Split the last invocation number into its own group.
    pub fn extract_last_invocation(&mut self) -> CallInvocationGroup {
        let group =
            CallInvocationGroup::single(self.last_invocation_number(), self.calls.clone());
        self.invocations.remove_last_instance();
        group
    }

    /// Build each call site's instance lookup and body counts.
    pub fn precompute(&mut self) {
        for call in self.calls.values_mut() {
            call.precompute();
        }
    }

    /// Merge a continuation group whose first invocation was split off this
    /// group's last invocation by a dump boundary.
    ///
    /// The shared invocation's call tables are merged site by site; see
    /// [`Call::add_call`] for the boundary instance join. Returns the
    /// entries left over, as on the loop side.
    pub fn merge_into_and_return_remaining(
        &mut self,
        mut other: CallInvocationGroup,
    ) -> Vec<CallInvocationGroup> {
        let mut remaining = Vec::new();

        if other.is_empty() {
            return remaining;
        }
        if !self.last_and_first_overlap(&other) {
            remaining.push(other);
            return remaining;
        }

        if self.is_single_invocation() {
            self.merge_call_info(&mut other.calls);
        } else {
            let mut tail = self.extract_last_invocation();
            tail.merge_call_info(&mut other.calls);
            remaining.push(tail);
        }

        if !other.is_single_invocation() {
            other.invocations.remove_first_instance();
            remaining.push(other);
        }

        remaining
    }

    fn merge_call_info(&mut self, other_calls: &mut BTreeMap<Symbol, Call>) {
        for (&call_id, call) in other_calls.iter_mut() {
            self.calls.entry(call_id).or_default().add_call(call);
        }
    }

    pub fn is_cache_built(&self) -> bool {
        self.cache_built
    }

    /// Replay one loop invocation's calls in iteration order and record,
    /// for every sub-instruction, which call instance produced which span
    /// of its dynamic instances.
    ///
    /// `inv_group` is the loop side of the same invocation; it supplies the
    /// iteration of each call instance and the per-invocation call counts.
    /// `running_counts` accumulates sub-instruction totals across
    /// invocations for the caller. A cursor per call site walks its
    /// instances; the cursor on the earliest iteration goes next, ties
    /// falling to the lowest call id.
    pub fn build_call_trace_cache(
        &mut self,
        inv_group: &InvocationGroup,
        running_counts: &mut BTreeMap<Symbol, u64>,
        call_sites: &BTreeSet<Symbol>,
    ) {
        let mut cursors: Vec<CallCursor> = Vec::new();
        let mut local_counts: BTreeMap<Symbol, u64> = BTreeMap::new();

        for &call_id in call_sites {
            let recorded = self.calls.get(&call_id).map_or(false, |c| !c.is_empty());
            if recorded && inv_group.contains_instruction(call_id) {
                cursors.push(CallCursor {
                    call_id,
                    instance: 0,
                    iteration: inv_group.iteration_number(call_id, 0),
                });
            }
        }

        let calls = &self.calls;
        let cache = &mut self.cache;
        while !cursors.is_empty() {
            let next = first_minimum_iteration(&cursors);
            let CallCursor { call_id, instance, .. } = cursors[next];

            let body = calls[&call_id].instance_group_at(instance);
            for (&sym, &count) in body.instance_counts() {
                let start = local_counts.entry(sym).or_insert(0);
                cache.entry(sym).or_default().push(CallSpan {
                    first_instance: *start,
                    last_instance: *start + count - 1,
                    call_id,
                    call_instance: instance,
                });
                *start += count;
            }

            if inv_group.num_instances(call_id) - 1 == instance {
                cursors.remove(next);
            } else {
                let cursor = &mut cursors[next];
                cursor.instance += 1;
                cursor.iteration = inv_group.iteration_number(call_id, cursor.instance);
            }
        }

        for (sym, count) in local_counts {
            *running_counts.entry(sym).or_insert(0) += count;
        }
        self.cache_built = true;

        for (&sym, spans) in &self.cache {
            let first_id = spans[0].call_id;
            let constant = spans.iter().all(|span| span.call_id == first_id);
            self.constant_call_sites.insert(sym, constant);
        }
    }

    /// Attribution spans for a sub-instruction, ascending by instance.
    pub fn call_spans(&self, sym: Symbol) -> &[CallSpan] {
        self.cache.get(&sym).map_or(&[], Vec::as_slice)
    }

    /// The span covering the given dynamic instance of `sym`.
    ///
    /// Panics when the instruction has no call records here or the instance
    /// is past the last known one.
    pub fn call_for_instance(&self, sym: Symbol, instance: u64) -> &CallSpan {
        let spans = self
            .cache
            .get(&sym)
            .unwrap_or_else(|| panic!("no call records for instruction {sym}"));
        let idx = spans.partition_point(|span| span.last_instance < instance);
        spans.get(idx).unwrap_or_else(|| {
            panic!("instance {instance} of instruction {sym} is past the last known instance")
        })
    }

    /// Total dynamic instances of `sym` produced by calls in one invocation.
    pub fn num_instances(&self, sym: Symbol) -> u64 {
        self.cache
            .get(&sym)
            .and_then(|spans| spans.last())
            .map_or(0, |span| span.last_instance + 1)
    }

    /// True if every instance of `sym` came from the same call site.
    ///
    /// Panics when the instruction has no call records here.
    pub fn is_constant_call_site(&self, sym: Symbol) -> bool {
        self.constant_call_sites
            .get(&sym)
            .copied()
            .unwrap_or_else(|| panic!("no call records for instruction {sym}"))
    }

    pub fn approx_size_bytes(&self) -> u64 {
        let calls: u64 = self.calls.values().map(|c| c.approx_size_bytes()).sum();
        self.invocations.approx_size_bytes() + calls
    }
}

fn first_minimum_iteration(cursors: &[CallCursor]) -> usize {
    let mut best = 0;
    for (idx, cursor) in cursors.iter().enumerate().skip(1) {
        if cursor.iteration < cursors[best].iteration {
            best = idx;
        }
    }
    best
}

impl fmt::Display for CallInvocationGroup {
    /// The on-disk call info form: invocation ranges and site count, then
    /// each site's id followed by its call record.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.invocations, self.calls.len())?;
        for (call_id, call) in &self.calls {
            write!(f, "{call_id} {call}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Pattern;
    use crate::loops::IterationGroup;

    fn loop_group(groups: &[(&[(u64, u64)], &[Symbol])]) -> InvocationGroup {
        let mut inv = InvocationGroup::new();
        for &(ranges, symbols) in groups {
            let mut g = IterationGroup::new();
            for &(start, end) in ranges {
                g.add_iteration_range(start, end);
            }
            for &s in symbols {
                g.push_control_flow(Pattern::leaf(s));
            }
            inv.push_iteration_group(g);
        }
        inv.precompute();
        inv
    }

    fn site(group: &mut CallInvocationGroup, call_id: Symbol, instances: &[(u64, u64, &[Symbol])]) {
        let call = group.call_mut(call_id);
        for &(start, end, symbols) in instances {
            call.start_instance_group();
            call.add_instance_range(start, end);
            for &s in symbols {
                call.push_control_flow(Pattern::leaf(s));
            }
        }
    }

    #[test]
    fn cache_interleaves_sites_by_iteration() {
        // Call 100 runs twice in iterations 0 and 2, call 200 once in
        // iteration 1. Instruction 9 comes from both sites.
        let inv = loop_group(&[(&[(0, 0), (2, 2)], &[100, 100]), (&[(1, 1)], &[200])]);

        let mut group = CallInvocationGroup::new();
        group.add_invocation(0);
        site(&mut group, 100, &[(0, 1, &[7]), (2, 3, &[7, 9])]);
        site(&mut group, 200, &[(0, 0, &[9])]);
        group.precompute();

        let mut running = BTreeMap::new();
        let sites = BTreeSet::from([100, 200]);
        group.build_call_trace_cache(&inv, &mut running, &sites);

        assert!(group.is_cache_built());
        assert_eq!(
            group.call_spans(7),
            &[
                CallSpan { first_instance: 0, last_instance: 0, call_id: 100, call_instance: 0 },
                CallSpan { first_instance: 1, last_instance: 1, call_id: 100, call_instance: 1 },
                CallSpan { first_instance: 2, last_instance: 2, call_id: 100, call_instance: 2 },
                CallSpan { first_instance: 3, last_instance: 3, call_id: 100, call_instance: 3 },
            ]
        );
        assert_eq!(
            group.call_spans(9),
            &[
                CallSpan { first_instance: 0, last_instance: 0, call_id: 200, call_instance: 0 },
                CallSpan { first_instance: 1, last_instance: 1, call_id: 100, call_instance: 2 },
                CallSpan { first_instance: 2, last_instance: 2, call_id: 100, call_instance: 3 },
            ]
        );
        assert_eq!(running.get(&7), Some(&4));
        assert_eq!(running.get(&9), Some(&3));

        assert_eq!(group.num_instances(7), 4);
        assert_eq!(group.num_instances(9), 3);
        assert_eq!(group.num_instances(8), 0);
        assert!(group.is_constant_call_site(7));
        assert!(!group.is_constant_call_site(9));

        let span = group.call_for_instance(9, 1);
        assert_eq!(span.call_id, 100);
        assert_eq!(span.call_instance, 2);
    }

    #[test]
    #[should_panic(expected = "no call records for instruction")]
    fn constant_query_requires_call_records() {
        let group = CallInvocationGroup::new();
        group.is_constant_call_site(42);
    }

    #[test]
    fn merge_joins_the_shared_invocation() {
        let mut first = CallInvocationGroup::new();
        first.add_invocation_range(0, 1);
        site(&mut first, 100, &[(0, 0, &[7])]);

        let mut cont = CallInvocationGroup::new();
        cont.add_invocation_range(1, 3);
        site(&mut cont, 100, &[(0, 0, &[8])]);

        let remaining = first.merge_into_and_return_remaining(cont);

        assert_eq!(remaining.len(), 2);
        assert_eq!(first.last_invocation_number(), 0);
        assert_eq!(first.calls()[&100].instance_groups()[0].control_flow(), &[Pattern::leaf(7)]);

        let joined = &remaining[0];
        assert_eq!(joined.first_invocation_number(), 1);
        assert!(joined.is_single_invocation());
        assert_eq!(
            joined.calls()[&100].instance_groups()[0].control_flow(),
            &[Pattern::leaf(7), Pattern::leaf(8)]
        );

        assert_eq!(remaining[1].first_invocation_number(), 2);
        assert_eq!(remaining[1].last_invocation_number(), 3);
    }

    #[test]
    fn merge_without_overlap_returns_other_untouched() {
        let mut first = CallInvocationGroup::new();
        first.add_invocation(0);
        site(&mut first, 100, &[(0, 0, &[7])]);

        let mut later = CallInvocationGroup::new();
        later.add_invocation_range(4, 5);
        site(&mut later, 100, &[(0, 0, &[8])]);

        let remaining = first.merge_into_and_return_remaining(later);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].first_invocation_number(), 4);
        assert_eq!(first.calls()[&100].num_instance_groups(), 1);
    }

    #[test]
    fn info_form_lists_each_site() {
        let mut group = CallInvocationGroup::new();
        group.add_invocation_range(0, 5);
        site(&mut group, 400, &[(0, 3, &[7]), (4, 4, &[7, 8])]);
        site(&mut group, 401, &[(0, 9, &[9])]);

        assert_eq!(
            group.to_string(),
            "{0-5} 2\n400 2\n{0-3} (7)\n{4} (7)(8)\n\n401 1\n{0-9} (9)\n\n"
        );
    }
}
