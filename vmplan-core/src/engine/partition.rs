//! Splitting a request into independent sub-problems.
//!
//! Two nodes belong to the same partition when a VM may be hosted on both,
//! when VMs of one constraint may be hosted on them, or when a constraint
//! binds them together. VMs with no candidate node follow the constraints
//! naming them. Each partition can then be planned on its own and
//! the resulting plans merged.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use super::targets::TargetStates;
use crate::configuration::Configuration;
use crate::constraints::PlacementConstraint;
use crate::types::{Node, VirtualMachine, VmState};

/// Union-find over node and VM indices
#[derive(Debug, Clone)]
struct DisjointSets {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSets {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
            rank: vec![0; len],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a].cmp(&self.rank[b]) {
            std::cmp::Ordering::Less => self.parent[a] = b,
            std::cmp::Ordering::Greater => self.parent[b] = a,
            std::cmp::Ordering::Equal => {
                self.parent[b] = a;
                self.rank[a] += 1;
            }
        }
    }

    fn union_all(&mut self, items: impl IntoIterator<Item = usize>) {
        let mut items = items.into_iter();
        if let Some(first) = items.next() {
            for other in items {
                self.union(first, other);
            }
        }
    }
}

/// An independent sub-problem
#[derive(Debug, Clone)]
pub struct Partition {
    pub source: Configuration,
    pub targets: TargetStates,
    pub constraints: Vec<Arc<dyn PlacementConstraint>>,
    /// Nodes of the request that belong to other partitions. Constraints
    /// naming them only restrict VMs that can never be hosted there.
    pub foreign_nodes: BTreeSet<Node>,
}

impl Partition {
    /// The whole request as a single partition
    pub fn whole(
        source: &Configuration,
        targets: &TargetStates,
        constraints: &[Arc<dyn PlacementConstraint>],
    ) -> Self {
        Self {
            source: source.clone(),
            targets: targets.clone(),
            constraints: constraints.to_vec(),
            foreign_nodes: BTreeSet::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.source.all_nodes().len()
    }

    pub fn num_vms(&self) -> usize {
        self.source.all_vms().len()
    }
}

/// Nodes a VM may be hosted on at the end of the reconfiguration
fn candidate_nodes(
    source: &Configuration,
    targets: &TargetStates,
    constraints: &[Arc<dyn PlacementConstraint>],
    manageable: Option<&BTreeSet<VirtualMachine>>,
    vm: &VirtualMachine,
) -> BTreeSet<Node> {
    let current = source.location(vm).cloned();
    let from = source.vm_state(vm);
    let to = targets.vm_state(vm).unwrap_or(from);
    let pinned = from == VmState::Running
        && to == VmState::Running
        && manageable.is_some_and(|set| !set.contains(vm));

    let mut candidates: BTreeSet<Node> = if to == VmState::Running && !pinned {
        source
            .all_nodes()
            .into_iter()
            .filter(|n| targets.on.contains(*n))
            .cloned()
            .collect()
    } else {
        BTreeSet::new()
    };
    for constraint in constraints {
        constraint.restrict_nodes(vm, &mut candidates);
    }
    candidates.extend(current);
    candidates
}

/// Split a request into independent partitions. There is always at least
/// one partition.
///
/// The union-find runs over nodes and VMs together: a VM is joined with its
/// candidate nodes, the VMs of a constraint are joined with each other, and
/// so are the nodes of a constraint that binds them. A constraint therefore
/// always lands in the partition holding every VM it names, including VMs
/// tied to no node such as waiting ones. Components without any node are
/// folded into the first partition.
pub fn partition(
    source: &Configuration,
    targets: &TargetStates,
    constraints: &[Arc<dyn PlacementConstraint>],
    manageable: Option<&BTreeSet<VirtualMachine>>,
) -> Vec<Partition> {
    let nodes: Vec<&Node> = source.all_nodes();
    let node_index: BTreeMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();
    let node_elem = |node: &Node| node_index.get(node.name.as_str()).copied();

    // VMs of the request, unknown ones included, after the nodes
    let mut vms: Vec<&VirtualMachine> = source.all_vms();
    vms.extend(targets.unknown_vms(source));
    let vm_index: BTreeMap<&str, usize> = vms
        .iter()
        .enumerate()
        .map(|(i, vm)| (vm.name.as_str(), nodes.len() + i))
        .collect();
    let vm_elem = |vm: &VirtualMachine| vm_index.get(vm.name.as_str()).copied();

    let mut sets = DisjointSets::new(nodes.len() + vms.len());
    for (i, vm) in vms.iter().enumerate() {
        let candidates = candidate_nodes(source, targets, constraints, manageable, vm);
        for node in candidates.iter().filter_map(|n| node_elem(n)) {
            sets.union(nodes.len() + i, node);
        }
    }
    for constraint in constraints {
        let mut elems: Vec<usize> = constraint
            .vms()
            .into_iter()
            .filter_map(|vm| vm_elem(vm))
            .collect();
        if constraint.binds_nodes() {
            elems.extend(constraint.nodes().into_iter().filter_map(|n| node_elem(n)));
        }
        sets.union_all(elems);
    }

    // components numbered by their smallest node
    let mut component_of_root: BTreeMap<usize, usize> = BTreeMap::new();
    for n in 0..nodes.len() {
        let root = sets.find(n);
        let next = component_of_root.len();
        component_of_root.entry(root).or_insert(next);
    }
    let count = component_of_root.len().max(1);
    let mut component_of = |elem: usize| {
        let root = sets.find(elem);
        component_of_root.get(&root).copied().unwrap_or(0)
    };
    let node_component: Vec<usize> = (0..nodes.len()).map(&mut component_of).collect();
    let vm_component: Vec<usize> = (0..vms.len())
        .map(|i| component_of(nodes.len() + i))
        .collect();

    let mut sources = vec![Configuration::new(); count];
    let mut node_sets = vec![BTreeSet::new(); count];
    let mut vm_sets = vec![BTreeSet::new(); count];
    for (n, node) in nodes.iter().enumerate() {
        let c = node_component[n];
        if source.is_online(node) {
            sources[c].add_online(node);
        } else {
            sources[c].add_offline(node);
        }
        node_sets[c].insert((*node).clone());
    }
    for (i, vm) in vms.iter().enumerate() {
        let c = vm_component[i];
        if source.contains_vm(vm) {
            let placed = match (source.vm_state(vm), source.location(vm)) {
                (VmState::Running, Some(node)) => sources[c].set_run_on(vm, node),
                (VmState::Sleeping, Some(node)) => sources[c].set_sleep_on(vm, node),
                _ => sources[c].add_waiting(vm),
            };
            debug_assert!(placed, "VM {} cannot be placed in its partition", vm);
        }
        vm_sets[c].insert((*vm).clone());
    }

    let mut constraint_sets: Vec<Vec<Arc<dyn PlacementConstraint>>> = vec![Vec::new(); count];
    for constraint in constraints {
        let c = constraint
            .vms()
            .into_iter()
            .find_map(|vm| vm_elem(vm))
            .or_else(|| constraint.nodes().into_iter().find_map(|n| node_elem(n)))
            .map_or(0, |elem| {
                if elem < nodes.len() {
                    node_component[elem]
                } else {
                    vm_component[elem - nodes.len()]
                }
            });
        constraint_sets[c].push(constraint.clone());
    }

    let all_nodes: BTreeSet<Node> = nodes.iter().map(|n| (*n).clone()).collect();
    let partitions: Vec<Partition> = sources
        .into_iter()
        .zip(node_sets.iter().zip(&vm_sets))
        .zip(constraint_sets)
        .map(|((source, (own_nodes, own_vms)), constraints)| Partition {
            source,
            targets: targets.restrict(own_vms, own_nodes),
            constraints,
            foreign_nodes: all_nodes.difference(own_nodes).cloned().collect(),
        })
        .collect();
    debug!(
        "{} nodes and {} VMs split into {} partitions",
        nodes.len(),
        vms.len(),
        partitions.len()
    );
    partitions
}
