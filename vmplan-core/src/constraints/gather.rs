use std::collections::BTreeSet;
use std::fmt;

use super::{fmt_set, running_locations, PlacementConstraint};
use crate::configuration::Configuration;
use crate::engine::ReconfigurationProblem;
use crate::error::PlanResult;
use crate::solver::propagators::AllEqual;
use crate::types::{Node, VirtualMachine};

/// The running VMs of the set share one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gather {
    vms: Vec<VirtualMachine>,
}

impl Gather {
    pub fn new<'a>(vms: impl IntoIterator<Item = &'a VirtualMachine>) -> Self {
        let vms: BTreeSet<_> = vms.into_iter().cloned().collect();
        Self {
            vms: vms.into_iter().collect(),
        }
    }
}

impl fmt::Display for Gather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gather(")?;
        fmt_set(f, &self.vms)?;
        write!(f, ")")
    }
}

impl PlacementConstraint for Gather {
    fn inject(&self, problem: &mut ReconfigurationProblem) -> PlanResult<()> {
        let vms: Vec<&VirtualMachine> = self.vms.iter().collect();
        let (ids, _) = problem.resolve(self, &vms, &[])?;
        let hosters: Vec<_> = ids
            .into_iter()
            .filter_map(|vm| problem.running_hoster(self, vm))
            .collect();
        if hosters.len() > 1 {
            problem.post(AllEqual::new(hosters));
        }
        Ok(())
    }

    fn is_satisfied(&self, cfg: &Configuration) -> bool {
        let nodes: BTreeSet<&Node> = running_locations(cfg, &self.vms).map(|(_, n)| n).collect();
        nodes.len() <= 1
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
        Vec::new()
    }
}
