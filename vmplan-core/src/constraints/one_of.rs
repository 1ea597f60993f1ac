use std::collections::BTreeSet;
use std::fmt;

use super::{fmt_set, running_locations, PlacementConstraint};
use crate::configuration::Configuration;
use crate::engine::ReconfigurationProblem;
use crate::error::PlanResult;
use crate::solver::propagators::GroupMembership;
use crate::types::{Node, VirtualMachine};

/// The running VMs of the set are all hosted inside one of the node groups.
///
/// Constraints over the same groups share the variable selecting the group,
/// so they all end up in the same one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneOf {
    vms: Vec<VirtualMachine>,
    groups: Vec<BTreeSet<Node>>,
}

impl OneOf {
    pub fn new<'a>(
        vms: impl IntoIterator<Item = &'a VirtualMachine>,
        groups: impl IntoIterator<Item = BTreeSet<Node>>,
    ) -> Self {
        let vms: BTreeSet<_> = vms.into_iter().cloned().collect();
        Self {
            vms: vms.into_iter().collect(),
            groups: groups.into_iter().collect(),
        }
    }

    pub fn groups(&self) -> &[BTreeSet<Node>] {
        &self.groups
    }
}

impl fmt::Display for OneOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oneOf(")?;
        fmt_set(f, &self.vms)?;
        write!(f, ", {{")?;
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            fmt_set(f, group)?;
        }
        write!(f, "}})")
    }
}

impl PlacementConstraint for OneOf {
    fn inject(&self, problem: &mut ReconfigurationProblem) -> PlanResult<()> {
        let vms: Vec<&VirtualMachine> = self.vms.iter().collect();
        let (vm_ids, _) = problem.resolve(self, &vms, &[])?;
        let mut groups = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let nodes: Vec<&Node> = group.iter().collect();
            let (_, ids) = problem.resolve(self, &[], &nodes)?;
            groups.push(ids.into_iter().map(|n| n as i32).collect::<Vec<_>>());
        }

        let members: Vec<_> = vm_ids
            .into_iter()
            .filter_map(|vm| problem.running_hoster(self, vm))
            .collect();
        if members.is_empty() {
            return Ok(());
        }
        let (group, groups) = problem.group_var(groups);
        problem.post(GroupMembership::new(group, members, groups));
        Ok(())
    }

    fn is_satisfied(&self, cfg: &Configuration) -> bool {
        let hosts: BTreeSet<&Node> = running_locations(cfg, &self.vms).map(|(_, n)| n).collect();
        hosts.is_empty() || self.groups.iter().any(|g| hosts.iter().all(|n| g.contains(*n)))
    }

    fn misplaced(&self, cfg: &Configuration) -> BTreeSet<VirtualMachine> {
        if self.is_satisfied(cfg) {
            return BTreeSet::new();
        }
        running_locations(cfg, &self.vms)
            .map(|(vm, _)| vm.clone())
            .collect()
    }

    fn vms(&self) -> Vec<&VirtualMachine> {
        self.vms.iter().collect()
    }

    fn nodes(&self) -> Vec<&Node> {
        let nodes: BTreeSet<&Node> = self.groups.iter().flatten().collect();
        nodes.into_iter().collect()
    }

    fn restrict_nodes(&self, vm: &VirtualMachine, candidates: &mut BTreeSet<Node>) {
        if self.vms.contains(vm) {
            candidates.retain(|n| self.groups.iter().any(|g| g.contains(n)));
        }
    }

    fn binds_nodes(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::testing;
    use std::sync::Arc;

    fn group(nodes: &[Node]) -> BTreeSet<Node> {
        nodes.iter().cloned().collect()
    }

    #[test]
    fn test_one_of_picks_a_single_group() {
        let nodes = testing::nodes(4, 8, 8192);
        let vms = testing::vms(2, 1, 512);
        // VM1 in the first group, VM2 in the second one
        let src = testing::cluster(&nodes, &vms, &[0, 2]);
        let one_of = OneOf::new(&vms, [group(&nodes[..2]), group(&nodes[2..])]);
        assert_eq!(one_of.to_string(), "oneOf({VM1, VM2}, {{N1, N2}, {N3, N4}})");
        assert!(!one_of.is_satisfied(&src));

        let mut problem = testing::problem(&src);
        problem.inject(Arc::new(one_of.clone())).unwrap();
        let dst = testing::solve(problem).unwrap();
        assert!(one_of.is_satisfied(&dst));
    }

    #[test]
    fn test_constraints_over_the_same_groups_agree() {
        let nodes = testing::nodes(4, 8, 8192);
        let vms = testing::vms(2, 1, 512);
        let src = testing::cluster(&nodes, &vms, &[0, 2]);
        let groups = [group(&nodes[..2]), group(&nodes[2..])];
        let first = OneOf::new([&vms[0]], groups.clone());
        let second = OneOf::new([&vms[1]], groups);

        let mut problem = testing::problem(&src);
        problem.inject(Arc::new(first)).unwrap();
        problem.inject(Arc::new(second)).unwrap();
        let dst = testing::solve(problem).unwrap();
        let together = OneOf::new(&vms, [group(&nodes[..2]), group(&nodes[2..])]);
        assert!(together.is_satisfied(&dst));
    }

    #[test]
    fn test_restrict_nodes_to_groups() {
        let nodes = testing::nodes(3, 8, 8192);
        let vms = testing::vms(1, 1, 512);
        let one_of = OneOf::new(&vms, [group(&nodes[..1]), group(&nodes[1..2])]);
        let mut candidates = group(&nodes);
        one_of.restrict_nodes(&vms[0], &mut candidates);
        assert_eq!(candidates, group(&nodes[..2]));
    }
}
