use std::collections::BTreeSet;
use std::fmt;

use super::{fmt_set, PlacementConstraint};
use crate::configuration::Configuration;
use crate::engine::ReconfigurationProblem;
use crate::error::PlanResult;
use crate::solver::propagators::AtMostInSet;
use crate::types::{Node, VirtualMachine};

/// At most `max` running VMs over a set of nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capacity {
    nodes: BTreeSet<Node>,
    max: usize,
}

impl Capacity {
    pub fn new<'a>(nodes: impl IntoIterator<Item = &'a Node>, max: usize) -> Self {
        Self {
            nodes: nodes.into_iter().cloned().collect(),
            max,
        }
    }

    fn hosted<'a>(&self, cfg: &'a Configuration) -> Vec<&'a VirtualMachine> {
        self.nodes
            .iter()
            .flat_map(|n| cfg.runnings_on(n))
            .collect()
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capacity(")?;
        fmt_set(f, &self.nodes)?;
        write!(f, ", {})", self.max)
    }
}

impl PlacementConstraint for Capacity {
    fn inject(&self, problem: &mut ReconfigurationProblem) -> PlanResult<()> {
        let nodes: Vec<&Node> = self.nodes.iter().collect();
        let (_, node_ids) = problem.resolve(self, &[], &nodes)?;
        let hosters = problem
            .running_hosters()
            .into_iter()
            .map(|(_, hoster)| hoster)
            .collect();
        problem.post(AtMostInSet::new(
            hosters,
            node_ids.into_iter().map(|n| n as i32),
            self.max,
        ));
        Ok(())
    }

    fn is_satisfied(&self, cfg: &Configuration) -> bool {
        self.hosted(cfg).len() <= self.max
    }

    fn misplaced(&self, cfg: &Configuration) -> BTreeSet<VirtualMachine> {
        let hosted = self.hosted(cfg);
        if hosted.len() <= self.max {
            return BTreeSet::new();
        }
        hosted.into_iter().cloned().collect()
    }

    /// Every running VM is concerned, not a fixed set
    fn vms(&self) -> Vec<&VirtualMachine> {
        Vec::new()
    }

    fn nodes(&self) -> Vec<&Node> {
        self.nodes.iter().collect()
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

    #[test]
    fn test_capacity_limits_vm_count() {
        let nodes = testing::nodes(3, 8, 8192);
        let vms = testing::vms(4, 1, 512);
        let src = testing::cluster(&nodes, &vms, &[0, 0, 1, 2]);
        let capacity = Capacity::new(&nodes[..2], 2);
        assert_eq!(capacity.to_string(), "capacity({N1, N2}, 2)");
        assert!(!capacity.is_satisfied(&src));
        assert_eq!(capacity.misplaced(&src).len(), 3);

        let mut problem = testing::problem(&src);
        problem.inject(Arc::new(capacity.clone())).unwrap();
        let dst = testing::solve(problem).unwrap();
        assert!(capacity.is_satisfied(&dst));
        assert_eq!(dst.runnings_on(&nodes[2]).len(), 2);
    }

    #[test]
    fn test_zero_capacity_empties_nodes() {
        let nodes = testing::nodes(2, 8, 8192);
        let vms = testing::vms(2, 1, 512);
        let src = testing::cluster(&nodes, &vms, &[0, 0]);
        let capacity = Capacity::new([&nodes[0]], 0);
        let mut problem = testing::problem(&src);
        problem.inject(Arc::new(capacity)).unwrap();
        let dst = testing::solve(problem).unwrap();
        assert!(dst.runnings_on(&nodes[0]).is_empty());
    }
}
