use std::collections::BTreeSet;
use std::fmt;

use super::{fmt_set, running_locations, PlacementConstraint};
use crate::configuration::Configuration;
use crate::engine::ReconfigurationProblem;
use crate::error::PlanResult;
use crate::solver::propagators::DisjointValues;
use crate::types::{Node, VirtualMachine};

/// The VMs of the set do not share their nodes with any other running VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lonely {
    vms: Vec<VirtualMachine>,
}

impl Lonely {
    pub fn new<'a>(vms: impl IntoIterator<Item = &'a VirtualMachine>) -> Self {
        let vms: BTreeSet<_> = vms.into_iter().cloned().collect();
        Self {
            vms: vms.into_iter().collect(),
        }
    }

    fn shared_nodes<'a>(&'a self, cfg: &'a Configuration) -> BTreeSet<&'a Node> {
        running_locations(cfg, &self.vms)
            .map(|(_, n)| n)
            .filter(|n| {
                cfg.runnings_on(n)
                    .into_iter()
                    .any(|other| !self.vms.contains(other))
            })
            .collect()
    }
}

impl fmt::Display for Lonely {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lonely(")?;
        fmt_set(f, &self.vms)?;
        write!(f, ")")
    }
}

impl PlacementConstraint for Lonely {
    fn inject(&self, problem: &mut ReconfigurationProblem) -> PlanResult<()> {
        let vms: Vec<&VirtualMachine> = self.vms.iter().collect();
        let (ids, _) = problem.resolve(self, &vms, &[])?;
        let members: BTreeSet<usize> = ids.into_iter().collect();
        let mine: Vec<_> = members
            .iter()
            .filter_map(|vm| problem.running_hoster(self, *vm))
            .collect();
        let others: Vec<_> = problem
            .running_hosters()
            .into_iter()
            .filter(|(vm, _)| !members.contains(vm))
            .map(|(_, hoster)| hoster)
            .collect();
        if !mine.is_empty() && !others.is_empty() {
            problem.post(DisjointValues::new(mine, others));
        }
        Ok(())
    }

    fn is_satisfied(&self, cfg: &Configuration) -> bool {
        self.shared_nodes(cfg).is_empty()
    }

    fn misplaced(&self, cfg: &Configuration) -> BTreeSet<VirtualMachine> {
        let shared = self.shared_nodes(cfg);
        running_locations(cfg, &self.vms)
            .filter(|(_, n)| shared.contains(n))
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
