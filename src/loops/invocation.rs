/*!
# Invocation Groups

A set of loop invocations that executed the same iteration structure, plus
the lookup tables derived from it.

After parsing, `precompute` builds four tables in dependency order: the
per-iteration instance counts inside each group, the iteration-number lookup,
the whole-invocation instance totals, and finally per-instruction runs of
consecutive dynamic instances. The runs are what make
`iteration_number(sym, instance)` a binary search instead of a walk over the
iteration space.
*/

use std::collections::BTreeMap;
use std::fmt;

use crate::compress::Pattern;
use crate::core::Symbol;
use crate::reppat::RangeLookup;

use super::iteration::IterationGroup;

/// A run of consecutive dynamic instances of one instruction.
///
/// Within a run every iteration contributes exactly `per_iteration`
/// instances, so the owning iteration is arithmetic from the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceRun {
    pub first_instance: u64,
    pub last_instance: u64,
    pub first_iteration: u64,
    pub per_iteration: u64,
}

/// Invocations sharing one iteration structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationGroup {
    iterations: Vec<IterationGroup>,
    iter_lut: RangeLookup<usize>,
    invocation_instances: BTreeMap<Symbol, u64>,
    instance_runs: BTreeMap<Symbol, Vec<InstanceRun>>,
}

impl InvocationGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no instructions were recorded for this invocation.
    pub fn is_empty(&self) -> bool {
        self.iterations.iter().all(|g| g.is_empty())
    }

    pub fn num_iteration_groups(&self) -> usize {
        self.iterations.len()
    }

    pub fn iteration_groups(&self) -> &[IterationGroup] {
        &self.iterations
    }

    /// Open a fresh iteration group; subsequent range and pattern pushes land
    /// in it.
    pub fn start_iteration_group(&mut self) {
        self.iterations.push(IterationGroup::new());
    }

    pub fn push_iteration_group(&mut self, group: IterationGroup) {
        self.iterations.push(group);
    }

    /// Add an iteration range to the most recently opened group.
    ///
    /// Panics if no group is open.
    pub fn add_iteration_range(&mut self, start: u64, end: u64) {
        self.open_group().add_iteration_range(start, end);
    }

    pub fn add_iteration(&mut self, iteration: u64) {
        self.open_group().add_iteration(iteration);
    }

    /// Append a control-flow pattern to the most recently opened group.
    ///
    /// Panics if no group is open.
    pub fn push_control_flow(&mut self, pattern: Pattern) {
        self.open_group().push_control_flow(pattern);
    }

    fn open_group(&mut self) -> &mut IterationGroup {
        self.iterations
            .last_mut()
            .unwrap_or_else(|| panic!("no open iteration group"))
    }

    /// Build every derived table. Discards the raw control flow inside the
    /// iteration groups in the process.
    pub fn precompute(&mut self) {
        for group in &mut self.iterations {
            group.build_instance_counts();
        }
        self.build_iteration_lut();
        self.build_invocation_instances();
        self.build_instance_runs();
    }

    /// Build only the iteration-number lookup, leaving control flow intact.
    ///
    /// Used by consumers that expand the trace back into instruction streams
    /// and therefore must not discard the patterns.
    pub fn build_iteration_lut(&mut self) {
        self.iter_lut = RangeLookup::build(
            self.iterations
                .iter()
                .enumerate()
                .map(|(idx, g)| (g.iterations(), idx)),
        );
    }

    fn build_invocation_instances(&mut self) {
        self.invocation_instances.clear();
        for group in &self.iterations {
            let num_iterations = group.num_iterations();
            for (&sym, &count) in group.instance_counts() {
                *self.invocation_instances.entry(sym).or_insert(0) += num_iterations * count;
            }
        }
    }

    /// Walk the iteration ranges in order, appending one instance run per
    /// (range, instruction) pair. A run extends the previous one when the
    /// per-iteration count is unchanged and no intervening iteration lacked
    /// the instruction.
    fn build_instance_runs(&mut self) {
        self.instance_runs.clear();
        for &(start, end, idx) in self.iter_lut.entries() {
            let group = &self.iterations[idx];
            let num_iterations = end - start + 1;
            for (&sym, &count) in group.instance_counts() {
                let runs = self.instance_runs.entry(sym).or_default();
                match runs.last_mut() {
                    None => runs.push(InstanceRun {
                        first_instance: 0,
                        last_instance: count * num_iterations - 1,
                        first_iteration: start,
                        per_iteration: count,
                    }),
                    Some(prev)
                        if prev.per_iteration == count
                            && start
                                == prev.first_iteration
                                    + (prev.last_instance - prev.first_instance + 1)
                                        / prev.per_iteration =>
                    {
                        prev.last_instance += count * num_iterations;
                    }
                    Some(prev) => {
                        let next = InstanceRun {
                            first_instance: prev.last_instance + 1,
                            last_instance: prev.last_instance + count * num_iterations,
                            first_iteration: start,
                            per_iteration: count,
                        };
                        runs.push(next);
                    }
                }
            }
        }
    }

    /// Iteration number executing the given dynamic instance.
    ///
    /// Panics if the invocation contains no instances of `sym` or if
    /// `instance` lies past the last known instance.
    pub fn iteration_number(&self, sym: Symbol, instance: u64) -> u64 {
        let runs = self
            .instance_runs
            .get(&sym)
            .unwrap_or_else(|| panic!("invocation has no instances of instruction {sym}"));
        let idx = runs.partition_point(|run| run.last_instance < instance);
        if idx == runs.len() {
            panic!("instance {instance} of instruction {sym} is past the last known instance");
        }
        let run = &runs[idx];
        let offset = instance - run.first_instance;
        run.first_iteration + offset / run.per_iteration
    }

    /// Total instances of `sym` across one invocation.
    pub fn num_instances(&self, sym: Symbol) -> u64 {
        self.invocation_instances.get(&sym).copied().unwrap_or(0)
    }

    pub fn contains_instruction(&self, sym: Symbol) -> bool {
        self.num_instances(sym) > 0
    }

    pub fn instruction_ids(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.invocation_instances.keys().copied()
    }

    /// Number of iterations in one invocation.
    pub fn num_iterations(&self) -> u64 {
        self.iter_lut.last_instance().map_or(0, |last| last + 1)
    }

    /// Iteration group executing iteration `n`.
    ///
    /// Panics if `n` lies past the last iteration.
    pub fn iteration_group_at(&self, n: u64) -> &IterationGroup {
        &self.iterations[self.iter_lut.lookup(n)]
    }

    /// Iteration ranges in iteration-number order, with the group executing
    /// each range.
    pub fn iteration_entries(&self) -> impl Iterator<Item = (u64, u64, &IterationGroup)> {
        self.iter_lut
            .entries()
            .iter()
            .map(move |&(start, end, idx)| (start, end, &self.iterations[idx]))
    }

    /// Reconstruct the instruction stream of one whole invocation.
    ///
    /// Requires the control flow to still be present, so callers use
    /// `build_iteration_lut` rather than `precompute` beforehand.
    pub fn expand_into(&self, out: &mut Vec<Symbol>) {
        for &(start, end, idx) in self.iter_lut.entries() {
            let group = &self.iterations[idx];
            for _ in start..=end {
                for pattern in group.control_flow() {
                    pattern.expand_into(out);
                }
            }
        }
    }

    /// Absorb the iteration groups of a continuation invocation.
    ///
    /// When the trailing iteration of `self` and the leading iteration of
    /// `other` carry the same number, that iteration was cut by a dump: its
    /// two halves are joined into a single group. The remaining groups of
    /// `other` are appended as they are. `other` is left holding its groups
    /// minus the first iteration of the joined one.
    pub fn merge_iteration_info(&mut self, other: &mut InvocationGroup) {
        if other.iterations.is_empty() {
            return;
        }

        let max_existing = first_max_by_last_iteration(&self.iterations);
        let min_new = first_min_by_first_iteration(&other.iterations);

        let mut joined_min_new = false;
        if let Some(max_idx) = max_existing {
            if self.iterations[max_idx].last_iteration()
                == other.iterations[min_new].first_iteration()
            {
                let working_idx = if self.iterations[max_idx].is_single_iteration() {
                    max_idx
                } else {
                    let split = self.iterations[max_idx].extract_last_iteration();
                    self.iterations.push(split);
                    self.iterations.len() - 1
                };
                for pattern in other.iterations[min_new].control_flow().to_vec() {
                    self.iterations[working_idx].push_control_flow(pattern);
                }
                joined_min_new = true;
            }
        }

        for (idx, group) in other.iterations.iter_mut().enumerate() {
            if joined_min_new && idx == min_new {
                if !group.is_single_iteration() {
                    group.extract_first_iteration();
                    self.iterations.push(group.clone());
                }
            } else {
                self.iterations.push(group.clone());
            }
        }
    }

    pub fn clear(&mut self) {
        self.iterations.clear();
        self.iter_lut.clear();
        self.invocation_instances.clear();
        self.instance_runs.clear();
    }

    pub fn approx_size_bytes(&self) -> u64 {
        self.iterations.iter().map(|g| g.approx_size_bytes()).sum()
    }

    #[cfg(test)]
    pub(crate) fn instance_runs(&self, sym: Symbol) -> &[InstanceRun] {
        &self.instance_runs[&sym]
    }
}

/// Index of the first group with the greatest last iteration.
fn first_max_by_last_iteration(groups: &[IterationGroup]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, group) in groups.iter().enumerate() {
        match best {
            None => best = Some(idx),
            Some(b) if group.last_iteration() > groups[b].last_iteration() => best = Some(idx),
            Some(_) => {}
        }
    }
    best
}

/// Index of the first group with the smallest first iteration.
fn first_min_by_first_iteration(groups: &[IterationGroup]) -> usize {
    let mut best = 0;
    for (idx, group) in groups.iter().enumerate().skip(1) {
        if group.first_iteration() < groups[best].first_iteration() {
            best = idx;
        }
    }
    best
}

impl fmt::Display for InvocationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in &self.iterations {
            write!(f, "{group}")?;
        }
        Ok(())
    }
}
