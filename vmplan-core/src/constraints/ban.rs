use std::collections::BTreeSet;
use std::fmt;

use super::{fmt_set, running_locations, PlacementConstraint};
use crate::configuration::Configuration;
use crate::engine::ReconfigurationProblem;
use crate::error::PlanResult;
use crate::types::{Node, VirtualMachine};

/// The VMs may not run on any of the nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ban {
    vms: Vec<VirtualMachine>,
    nodes: BTreeSet<Node>,
}

impl Ban {
    pub fn new<'a>(
        vms: impl IntoIterator<Item = &'a VirtualMachine>,
        nodes: impl IntoIterator<Item = &'a Node>,
    ) -> Self {
        let vms: BTreeSet<_> = vms.into_iter().cloned().collect();
        Self {
            vms: vms.into_iter().collect(),
            nodes: nodes.into_iter().cloned().collect(),
        }
    }
}

impl fmt::Display for Ban {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ban(")?;
        fmt_set(f, &self.vms)?;
        write!(f, ", ")?;
        fmt_set(f, &self.nodes)?;
        write!(f, ")")
    }
}

impl PlacementConstraint for Ban {
    fn inject(&self, problem: &mut ReconfigurationProblem) -> PlanResult<()> {
        let vms: Vec<&VirtualMachine> = self.vms.iter().collect();
        let nodes: Vec<&Node> = self.nodes.iter().collect();
        let (vm_ids, node_ids) = problem.resolve(self, &vms, &nodes)?;
        let banned: BTreeSet<i32> = node_ids.into_iter().map(|n| n as i32).collect();
        for vm in vm_ids {
            if let Some(hoster) = problem.running_hoster(self, vm) {
                problem.restrict(hoster, |n| !banned.contains(&n));
            }
        }
        Ok(())
    }

    fn is_satisfied(&self, cfg: &Configuration) -> bool {
        running_locations(cfg, &self.vms).all(|(_, node)| !self.nodes.contains(node))
    }

    fn misplaced(&self, cfg: &Configuration) -> BTreeSet<VirtualMachine> {
        running_locations(cfg, &self.vms)
            .filter(|(_, node)| self.nodes.contains(*node))
            .map(|(vm, _)| vm.clone())
            .collect()
    }

    fn vms(&self) -> Vec<&VirtualMachine> {
        self.vms.iter().collect()
    }

    fn nodes(&self) -> Vec<&Node> {
        self.nodes.iter().collect()
    }

    fn restrict_nodes(&self, vm: &VirtualMachine, candidates: &mut BTreeSet<Node>) {
        if self.vms.contains(vm) {
            candidates.retain(|n| !self.nodes.contains(n));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::testing;
    use std::sync::Arc;

    #[test]
    fn test_ban_moves_vm_away() {
        let nodes = testing::nodes(2, 4, 4096);
        let vms = testing::vms(2, 1, 512);
        let src = testing::cluster(&nodes, &vms, &[0, 0]);
        let ban = Ban::new([&vms[0]], [&nodes[0]]);
        assert_eq!(ban.to_string(), "ban({VM1}, {N1})");
        assert!(!ban.is_satisfied(&src));
        assert_eq!(ban.misplaced(&src).into_iter().collect::<Vec<_>>(), vec![vms[0].clone()]);

        let mut problem = testing::problem(&src);
        problem.inject(Arc::new(ban.clone())).unwrap();
        let dst = testing::solve(problem).unwrap();
        assert!(ban.is_satisfied(&dst));
        assert_eq!(dst.location(&vms[1]), Some(&nodes[0]));
    }

    #[test]
    fn test_ban_restricts_candidates() {
        let nodes = testing::nodes(3, 4, 4096);
        let vms = testing::vms(2, 1, 512);
        let ban = Ban::new([&vms[0]], [&nodes[1]]);
        let mut candidates: BTreeSet<Node> = nodes.iter().cloned().collect();
        ban.restrict_nodes(&vms[1], &mut candidates);
        assert_eq!(candidates.len(), 3);
        ban.restrict_nodes(&vms[0], &mut candidates);
        assert!(!candidates.contains(&nodes[1]));
    }

    #[test]
    fn test_banning_every_node_is_infeasible() {
        let nodes = testing::nodes(2, 4, 4096);
        let vms = testing::vms(1, 1, 512);
        let src = testing::cluster(&nodes, &vms, &[0]);
        let mut problem = testing::problem(&src);
        problem.inject(Arc::new(Ban::new(&vms, &nodes))).unwrap();
        assert!(testing::solve(problem).is_none());
    }
}
