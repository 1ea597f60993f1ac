use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::{fmt_set, running_locations, PlacementConstraint};
use crate::configuration::Configuration;
use crate::engine::ReconfigurationProblem;
use crate::error::PlanResult;
use crate::solver::propagators::{AllDifferent, ConditionalPrecedence};
use crate::types::{Node, VirtualMachine};

/// Every VM of the set runs on a distinct node, at any time: a VM may only
/// arrive on a node once the other VMs of the set have left it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spread {
    vms: Vec<VirtualMachine>,
}

impl Spread {
    pub fn new<'a>(vms: impl IntoIterator<Item = &'a VirtualMachine>) -> Self {
        let vms: BTreeSet<_> = vms.into_iter().cloned().collect();
        Self {
            vms: vms.into_iter().collect(),
        }
    }
}

impl fmt::Display for Spread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spread(")?;
        fmt_set(f, &self.vms)?;
        write!(f, ")")
    }
}

impl PlacementConstraint for Spread {
    fn inject(&self, problem: &mut ReconfigurationProblem) -> PlanResult<()> {
        let vms: Vec<&VirtualMachine> = self.vms.iter().collect();
        let (ids, _) = problem.resolve(self, &vms, &[])?;
        let running: Vec<usize> = ids
            .iter()
            .copied()
            .filter(|vm| problem.running_hoster(self, *vm).is_some())
            .collect();
        if running.len() >= 2 {
            let hosters = running
                .iter()
                .filter_map(|vm| problem.vm_model(*vm).hoster)
                .collect();
            problem.post(AllDifferent::new(hosters));
        }

        // a VM arriving on a node waits until every other VM of the set has
        // released it, whether it migrates, suspends or stops
        for leaving in &ids {
            let model = problem.vm_model(*leaving).clone();
            let (Some(current), Some(_)) = (model.current, model.consuming) else {
                continue;
            };
            for arriving in running.iter().filter(|a| *a != leaving) {
                let other = problem.vm_model(*arriving).clone();
                // a VM already there is not arriving
                if other.current == Some(current) {
                    continue;
                }
                if let Some(hoster) = other.hoster {
                    problem.post(ConditionalPrecedence::new(
                        hoster,
                        current as i32,
                        model.end,
                        other.start,
                    ));
                }
            }
        }
        Ok(())
    }

    fn is_satisfied(&self, cfg: &Configuration) -> bool {
        let mut used = BTreeSet::new();
        running_locations(cfg, &self.vms).all(|(_, node)| used.insert(node.name.clone()))
    }

    fn misplaced(&self, cfg: &Configuration) -> BTreeSet<VirtualMachine> {
        let mut by_node: BTreeMap<&Node, Vec<&VirtualMachine>> = BTreeMap::new();
        for (vm, node) in running_locations(cfg, &self.vms) {
            by_node.entry(node).or_default().push(vm);
        }
        by_node
            .into_values()
            .filter(|vms| vms.len() > 1)
            .flatten()
            .cloned()
            .collect()
    }

    fn vms(&self) -> Vec<&VirtualMachine> {
        self.vms.iter().collect()
    }

    fn nodes(&self) -> Vec<&Node> {
        Vec::new()
    }
}
