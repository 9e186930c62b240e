/*!
# Call Sites

All recorded instances of one call site within one loop invocation, held as
instance groups plus a range lookup from instance number to group.
*/

use std::fmt;

use crate::compress::Pattern;
use crate::reppat::RangeLookup;

use super::instance::CallInstanceGroup;

/// One call site's instance groups for a single loop invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    instance_groups: Vec<CallInstanceGroup>,
    lut: RangeLookup<usize>,
}

impl Call {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_groups.is_empty()
    }

    pub fn num_instance_groups(&self) -> usize {
        self.instance_groups.len()
    }

    pub fn instance_groups(&self) -> &[CallInstanceGroup] {
        &self.instance_groups
    }

    /// Open a fresh instance group; the builder calls below fill it.
    pub fn start_instance_group(&mut self) {
        self.instance_groups.push(CallInstanceGroup::new());
    }

    pub fn push_instance_group(&mut self, group: CallInstanceGroup) {
        self.instance_groups.push(group);
    }

    pub fn add_instance_range(&mut self, start: u64, end: u64) {
        self.open_group().add_instance_range(start, end);
    }

    pub fn add_instance(&mut self, instance: u64) {
        self.open_group().add_instance(instance);
    }

    pub fn push_control_flow(&mut self, pattern: Pattern) {
        self.open_group().push_control_flow(pattern);
    }

    fn open_group(&mut self) -> &mut CallInstanceGroup {
        self.instance_groups
            .last_mut()
            .unwrap_or_else(|| panic!("no open call instance group"))
    }

    /// Build the instance lookup and fold every group's body into counts.
    pub fn precompute(&mut self) {
        self.lut = RangeLookup::build(
            self.instance_groups
                .iter()
                .enumerate()
                .map(|(idx, group)| (group.instances(), idx)),
        );
        for group in &mut self.instance_groups {
            group.build_instance_counts();
        }
    }

    /// The group covering the given call instance number.
    ///
    /// Panics when the instance is past the last known one.
    pub fn instance_group_at(&self, instance: u64) -> &CallInstanceGroup {
        let idx = self.lut.lookup(instance);
        &self.instance_groups[idx]
    }

    /// Merge another record of the same call site, produced after a dump
    /// boundary cut one loop invocation in two.
    ///
    /// When the last instance here equals the first instance of `other`,
    /// both sides hold half of that call instance's body; the halves are
    /// concatenated into one group. All other groups of `other` move over
    /// unchanged.
    pub fn add_call(&mut self, other: &mut Call) {
        let mut joined_idx = None;

        if !self.instance_groups.is_empty() && !other.instance_groups.is_empty() {
            let max_idx = first_max_by_last_instance(&self.instance_groups);
            let min_idx = first_min_by_first_instance(&other.instance_groups);
            let boundary = self.instance_groups[max_idx].last_instance();
            if boundary == other.instance_groups[min_idx].first_instance() {
                let working_idx = if self.instance_groups[max_idx].is_single_instance() {
                    max_idx
                } else {
                    let tail = self.instance_groups[max_idx].extract_last_instance();
                    self.instance_groups.push(tail);
                    self.instance_groups.len() - 1
                };
                let continued = other.instance_groups[min_idx].control_flow().to_vec();
                for pattern in continued {
                    self.instance_groups[working_idx].push_control_flow(pattern);
                }
                joined_idx = Some(min_idx);
            }
        }

        for (idx, group) in other.instance_groups.iter_mut().enumerate() {
            if joined_idx == Some(idx) {
                if !group.is_single_instance() {
                    group.extract_first_instance();
                    self.instance_groups.push(group.clone());
                }
            } else {
                self.instance_groups.push(group.clone());
            }
        }
    }

    pub fn approx_size_bytes(&self) -> u64 {
        self.instance_groups.iter().map(|g| g.approx_size_bytes()).sum()
    }
}

fn first_max_by_last_instance(groups: &[CallInstanceGroup]) -> usize {
    let mut best = 0;
    for (idx, group) in groups.iter().enumerate().skip(1) {
        if group.last_instance() > groups[best].last_instance() {
            best = idx;
        }
    }
    best
}

fn first_min_by_first_instance(groups: &[CallInstanceGroup]) -> usize {
    let mut best = 0;
    for (idx, group) in groups.iter().enumerate().skip(1) {
        if group.first_instance() < groups[best].first_instance() {
            best = idx;
        }
    }
    best
}

impl fmt::Display for Call {
    /// Group count on its own line, one line per instance group, then a
    /// blank line, the on-disk call site form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.instance_groups.len())?;
        for group in &self.instance_groups {
            write!(f, "{group}")?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::Pattern;

    fn call(groups: &[(&[(u64, u64)], &[u64])]) -> Call {
        let mut c = Call::new();
        for &(ranges, symbols) in groups {
            c.start_instance_group();
            for &(start, end) in ranges {
                c.add_instance_range(start, end);
            }
            for &s in symbols {
                c.push_control_flow(Pattern::leaf(s));
            }
        }
        c
    }

    #[test]
    fn lookup_finds_the_covering_group() {
        let mut c = call(&[(&[(0, 2)], &[7]), (&[(3, 3)], &[7, 8])]);
        c.precompute();

        assert_eq!(c.instance_group_at(1).first_instance(), 0);
        assert_eq!(c.instance_group_at(3).instances_per_call(8), 1);
    }

    #[test]
    fn boundary_instance_joins_across_records() {
        let mut c = call(&[(&[(0, 2)], &[7])]);
        let mut cont = call(&[(&[(2, 2)], &[8])]);

        c.add_call(&mut cont);

        assert_eq!(c.num_instance_groups(), 2);
        assert_eq!(c.instance_groups()[0].last_instance(), 1);
        let joined = &c.instance_groups()[1];
        assert_eq!(joined.first_instance(), 2);
        assert_eq!(joined.control_flow(), &[Pattern::leaf(7), Pattern::leaf(8)]);
    }

    #[test]
    fn multi_instance_continuation_keeps_its_tail() {
        let mut c = call(&[(&[(2, 2)], &[7])]);
        let mut cont = call(&[(&[(2, 4)], &[8])]);

        c.add_call(&mut cont);

        assert_eq!(c.num_instance_groups(), 2);
        assert_eq!(c.instance_groups()[0].control_flow(), &[Pattern::leaf(7), Pattern::leaf(8)]);
        assert_eq!(c.instance_groups()[1].first_instance(), 3);
        assert_eq!(c.instance_groups()[1].last_instance(), 4);
        assert_eq!(c.instance_groups()[1].control_flow(), &[Pattern::leaf(8)]);
    }

    #[test]
    fn disjoint_records_concatenate() {
        let mut c = call(&[(&[(0, 1)], &[7])]);
        let mut late = call(&[(&[(3, 3)], &[8])]);

        c.add_call(&mut late);

        assert_eq!(c.num_instance_groups(), 2);
        assert_eq!(c.instance_groups()[1].first_instance(), 3);

        let mut empty = Call::new();
        empty.add_call(&mut c);
        assert_eq!(empty.num_instance_groups(), 2);
    }
}
