//! Branching order of the reconfiguration search.
//!
//! Placement is decided first. VMs that cannot stay where they are come
//! first, then the biggest ones by memory demand. Each VM is preferably left
//! on its current node, otherwise sent to the first node that still has room
//! for it once the VMs able to stay are accounted for. Actions are then
//! scheduled as early as possible: boots, VM actions releasing resources,
//! relocations, VM actions taking resources, and shutdowns last.

use std::cmp::Reverse;

use super::models::{NodeTransition, VmTransition};
use super::problem::ReconfigurationProblem;
use crate::solver::{Brancher, Decision, SmallestDomain, StaticOrder, Store, VarId};

/// Order in which the start of each VM action is fixed
fn schedule_rank(transition: VmTransition) -> u8 {
    match transition {
        VmTransition::Suspend | VmTransition::Stop => 0,
        VmTransition::Relocation => 1,
        VmTransition::Resume | VmTransition::Run => 2,
        VmTransition::StaySleeping | VmTransition::StayWaiting | VmTransition::StayTerminated => 3,
    }
}

/// A VM running at the end of the plan
#[derive(Debug, Clone)]
struct Occupant {
    vm: usize,
    hoster: VarId,
    current: Option<i32>,
    demand: [i64; 2],
}

impl Occupant {
    /// Node the VM is expected to end on, if already known
    fn expected_node(&self, store: &Store) -> Option<i32> {
        store
            .value(self.hoster)
            .or_else(|| self.current.filter(|c| store.contains(self.hoster, *c)))
    }
}

/// Placement brancher. Branches on the hosters in a fixed order and picks
/// the value dynamically from the state of the store.
#[derive(Debug, Clone)]
pub(super) struct PlacementOrder {
    occupants: Vec<Occupant>,
    /// Indices of the occupants to branch on, in order
    order: Vec<usize>,
    capacities: Vec<[i64; 2]>,
}

impl PlacementOrder {
    pub(super) fn len(&self) -> usize {
        self.order.len()
    }

    /// First node of the domain with room for the occupant, assuming every
    /// other VM ends on its expected node
    fn first_fit(&self, store: &Store, idx: usize) -> Option<i32> {
        let mut load = vec![[0i64; 2]; self.capacities.len()];
        for (i, other) in self.occupants.iter().enumerate() {
            if i == idx {
                continue;
            }
            let Some(node) = other.expected_node(store) else {
                continue;
            };
            if let Some(l) = usize::try_from(node).ok().and_then(|n| load.get_mut(n)) {
                l[0] += other.demand[0];
                l[1] += other.demand[1];
            }
        }
        let demand = self.occupants[idx].demand;
        store.domain(self.occupants[idx].hoster).iter().find(|n| {
            let n = *n as usize;
            match (load.get(n), self.capacities.get(n)) {
                (Some(l), Some(c)) => (0..2).all(|d| l[d] + demand[d] <= c[d]),
                _ => false,
            }
        })
    }
}

impl Brancher for PlacementOrder {
    fn next_decision(&mut self, store: &Store) -> Option<Decision> {
        let idx = *self
            .order
            .iter()
            .find(|i| !store.is_fixed(self.occupants[**i].hoster))?;
        let occupant = &self.occupants[idx];
        let value = occupant
            .current
            .filter(|c| store.contains(occupant.hoster, *c))
            .or_else(|| self.first_fit(store, idx))
            .unwrap_or_else(|| store.lb(occupant.hoster));
        Some(Decision {
            var: occupant.hoster,
            value,
        })
    }
}

impl ReconfigurationProblem {
    pub(super) fn placement_order(&self) -> PlacementOrder {
        let store = self.solver.store();
        let occupants: Vec<Occupant> = self
            .vm_models
            .iter()
            .filter_map(|m| m.demanding.map(|slice| (m, slice)))
            .map(|(m, slice)| Occupant {
                vm: m.vm,
                hoster: slice.hoster,
                current: m.current.map(|c| c as i32),
                demand: [slice.cpu as i64, slice.memory as i64],
            })
            .collect();

        let mut order: Vec<usize> = (0..occupants.len())
            .filter(|i| !store.is_fixed(occupants[*i].hoster))
            .collect();
        order.sort_by_key(|i| {
            let occupant = &occupants[*i];
            let must_move = occupant
                .current
                .map_or(true, |c| !store.contains(occupant.hoster, c));
            let vm = &self.vms[occupant.vm];
            (!must_move, Reverse(vm.memory_demand), vm.name.clone())
        });
        PlacementOrder {
            occupants,
            order,
            capacities: self
                .nodes
                .iter()
                .map(|n| [n.cpu_capacity as i64, n.memory_capacity as i64])
                .collect(),
        }
    }

    pub(super) fn scheduling_order(&self) -> StaticOrder {
        let mut order = StaticOrder::new();
        for model in &self.node_models {
            if model.transition == NodeTransition::Boot {
                order.push(model.start, None);
            }
        }
        let mut vm_models: Vec<_> = self
            .vm_models
            .iter()
            .filter(|m| m.start != self.start)
            .collect();
        vm_models.sort_by_key(|m| (schedule_rank(m.transition), m.vm));
        for model in vm_models {
            order.push(model.start, None);
        }
        for model in &self.node_models {
            if model.transition == NodeTransition::Shutdown {
                order.push(model.start, None);
            }
        }
        order
    }

    /// Branchers of the search, in the order they are queried
    pub(super) fn branchers(&self) -> Vec<Box<dyn Brancher>> {
        vec![
            Box::new(self.placement_order()),
            Box::new(self.scheduling_order()),
            Box::new(SmallestDomain),
        ]
    }
}
