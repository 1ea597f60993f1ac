use std::collections::BTreeSet;
use std::fmt;

use super::{fmt_set, running_locations, PlacementConstraint};
use crate::configuration::Configuration;
use crate::engine::ReconfigurationProblem;
use crate::error::PlanResult;
use crate::types::{Node, VirtualMachine};

/// The VMs may only run on the nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fence {
    vms: Vec<VirtualMachine>,
    nodes: BTreeSet<Node>,
}

impl Fence {
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

impl fmt::Display for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fence(")?;
        fmt_set(f, &self.vms)?;
        write!(f, ", ")?;
        fmt_set(f, &self.nodes)?;
        write!(f, ")")
    }
}

impl PlacementConstraint for Fence {
    fn inject(&self, problem: &mut ReconfigurationProblem) -> PlanResult<()> {
        let vms: Vec<&VirtualMachine> = self.vms.iter().collect();
        let nodes: Vec<&Node> = self.nodes.iter().collect();
        let (vm_ids, node_ids) = problem.resolve(self, &vms, &nodes)?;
        let allowed: BTreeSet<i32> = node_ids.into_iter().map(|n| n as i32).collect();
        for vm in vm_ids {
            if let Some(hoster) = problem.running_hoster(self, vm) {
                problem.restrict(hoster, |n| allowed.contains(&n));
            }
        }
        Ok(())
    }

    fn is_satisfied(&self, cfg: &Configuration) -> bool {
        running_locations(cfg, &self.vms).all(|(_, node)| self.nodes.contains(node))
    }

    fn misplaced(&self, cfg: &Configuration) -> BTreeSet<VirtualMachine> {
        running_locations(cfg, &self.vms)
            .filter(|(_, node)| !self.nodes.contains(*node))
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
            candidates.retain(|n| self.nodes.contains(n));
        }
    }
}
