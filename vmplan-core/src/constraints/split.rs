use std::collections::BTreeSet;
use std::fmt;

use super::{fmt_set, running_locations, PlacementConstraint};
use crate::configuration::Configuration;
use crate::engine::ReconfigurationProblem;
use crate::error::PlanResult;
use crate::solver::propagators::DisjointValues;
use crate::types::{Node, VirtualMachine};

/// No node hosts running VMs of both sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    left: Vec<VirtualMachine>,
    right: Vec<VirtualMachine>,
}

impl Split {
    pub fn new<'a>(
        left: impl IntoIterator<Item = &'a VirtualMachine>,
        right: impl IntoIterator<Item = &'a VirtualMachine>,
    ) -> Self {
        let left: BTreeSet<_> = left.into_iter().cloned().collect();
        let right: BTreeSet<_> = right.into_iter().cloned().collect();
        Self {
            left: left.into_iter().collect(),
            right: right.into_iter().collect(),
        }
    }

    fn hosts(cfg: &Configuration, vms: &[VirtualMachine]) -> BTreeSet<Node> {
        running_locations(cfg, vms).map(|(_, n)| n.clone()).collect()
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "split(")?;
        fmt_set(f, &self.left)?;
        write!(f, ", ")?;
        fmt_set(f, &self.right)?;
        write!(f, ")")
    }
}

impl PlacementConstraint for Split {
    fn inject(&self, problem: &mut ReconfigurationProblem) -> PlanResult<()> {
        let left: Vec<&VirtualMachine> = self.left.iter().collect();
        let right: Vec<&VirtualMachine> = self.right.iter().collect();
        let (left, _) = problem.resolve(self, &left, &[])?;
        let (right, _) = problem.resolve(self, &right, &[])?;
        let left: Vec<_> = left
            .into_iter()
            .filter_map(|vm| problem.running_hoster(self, vm))
            .collect();
        let right: Vec<_> = right
            .into_iter()
            .filter_map(|vm| problem.running_hoster(self, vm))
            .collect();
        if !left.is_empty() && !right.is_empty() {
            problem.post(DisjointValues::new(left, right));
        }
        Ok(())
    }

    fn is_satisfied(&self, cfg: &Configuration) -> bool {
        Self::hosts(cfg, &self.left).is_disjoint(&Self::hosts(cfg, &self.right))
    }

    fn misplaced(&self, cfg: &Configuration) -> BTreeSet<VirtualMachine> {
        let shared: BTreeSet<Node> = Self::hosts(cfg, &self.left)
            .intersection(&Self::hosts(cfg, &self.right))
            .cloned()
            .collect();
        running_locations(cfg, &self.left)
            .chain(running_locations(cfg, &self.right))
            .filter(|(_, n)| shared.contains(*n))
            .map(|(vm, _)| vm.clone())
            .collect()
    }

    fn vms(&self) -> Vec<&VirtualMachine> {
        self.left.iter().chain(self.right.iter()).collect()
    }

    fn nodes(&self) -> Vec<&Node> {
        Vec::new()
    }
}
