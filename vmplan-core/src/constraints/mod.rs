//! Placement constraints
//!
//! A placement constraint restricts where VMs may be hosted at the end of
//! a reconfiguration. Each constraint knows how to
//!
//! - inject itself into a [`ReconfigurationProblem`],
//! - check a configuration,
//! - report the VMs it considers misplaced, used to pick the VMs allowed
//!   to move in repair mode,
//! - narrow the candidate nodes of a VM, used to partition a problem.
//!
//! Constraints only act on VMs that will be running. Other VMs are logged
//! and ignored.

pub mod ban;
pub mod capacity;
pub mod fence;
pub mod gather;
pub mod lonely;
pub mod one_of;
pub mod split;
pub mod spread;

pub use ban::Ban;
pub use capacity::Capacity;
pub use fence::Fence;
pub use gather::Gather;
pub use lonely::Lonely;
pub use one_of::OneOf;
pub use split::Split;
pub use spread::Spread;

use std::collections::BTreeSet;
use std::fmt;

use crate::configuration::Configuration;
use crate::engine::ReconfigurationProblem;
use crate::error::PlanResult;
use crate::types::{Node, VirtualMachine, VmState};

pub trait PlacementConstraint: fmt::Debug + fmt::Display + Send + Sync {
    /// Add the constraint to a problem. A failed injection leaves the
    /// problem untouched.
    fn inject(&self, problem: &mut ReconfigurationProblem) -> PlanResult<()>;

    /// Whether a configuration satisfies the constraint
    fn is_satisfied(&self, cfg: &Configuration) -> bool;

    /// VMs that have to move for `cfg` to satisfy the constraint
    fn misplaced(&self, cfg: &Configuration) -> BTreeSet<VirtualMachine>;

    /// VMs the constraint is about
    fn vms(&self) -> Vec<&VirtualMachine>;

    /// Nodes the constraint is about
    fn nodes(&self) -> Vec<&Node>;

    /// Remove from `candidates` the nodes `vm` can never be hosted on
    /// because of this constraint
    fn restrict_nodes(&self, _vm: &VirtualMachine, _candidates: &mut BTreeSet<Node>) {}

    /// Whether the constraint ties its nodes together, so that they must
    /// be planned in the same partition
    fn binds_nodes(&self) -> bool {
        false
    }
}

/// Running VMs of `vms` with their hosting node
pub(crate) fn running_locations<'a>(
    cfg: &'a Configuration,
    vms: &'a [VirtualMachine],
) -> impl Iterator<Item = (&'a VirtualMachine, &'a Node)> + 'a {
    vms.iter()
        .filter(|vm| cfg.vm_state(vm) == VmState::Running)
        .filter_map(move |vm| cfg.location(vm).map(|n| (vm, n)))
}

/// Comma separated names between braces
pub(crate) fn fmt_set<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl IntoIterator<Item = T>,
) -> fmt::Result {
    write!(f, "{{")?;
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "}}")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the constraint tests

    use crate::config::DurationConfig;
    use crate::configuration::Configuration;
    use crate::engine::{ProblemSettings, ReconfigurationProblem, TargetStates};
    use crate::solver::{SearchLimits, SearchStatus};
    use crate::types::{Node, VirtualMachine};
    use std::sync::Arc;

    pub fn nodes(count: usize, cpu: u32, memory: u32) -> Vec<Node> {
        (1..=count)
            .map(|i| Node::new(format!("N{}", i), cpu, memory))
            .collect()
    }

    pub fn vms(count: usize, cpu: u32, memory: u32) -> Vec<VirtualMachine> {
        (1..=count)
            .map(|i| VirtualMachine::new(format!("VM{}", i), cpu, memory))
            .collect()
    }

    /// Online nodes, VM `i` running on node `placement[i]`
    pub fn cluster(nodes: &[Node], vms: &[VirtualMachine], placement: &[usize]) -> Configuration {
        let mut cfg = Configuration::new();
        for node in nodes {
            cfg.add_online(node);
        }
        for (vm, n) in vms.iter().zip(placement) {
            assert!(cfg.set_run_on(vm, &nodes[*n]));
        }
        cfg
    }

    pub fn problem(src: &Configuration) -> ReconfigurationProblem {
        let settings = ProblemSettings {
            durations: Arc::new(DurationConfig::uniform(2)),
            max_horizon: 1000,
            sum_chunk_size: 100,
            manageable: None,
        };
        let targets = TargetStates::new().keep(src);
        ReconfigurationProblem::new(src, &targets, &settings).unwrap()
    }

    /// Solve a problem to optimality and return the destination
    pub fn solve(mut problem: ReconfigurationProblem) -> Option<Configuration> {
        let result = problem.solve(SearchLimits::default());
        match result.status {
            SearchStatus::Optimal => {
                let best = result.best.unwrap();
                Some(problem.extract(&best).unwrap().destination().clone())
            }
            SearchStatus::Infeasible => None,
            SearchStatus::LimitReached => panic!("unlimited search reached a limit"),
        }
    }
}
