//! Snapshot of a cluster: node states and VM placement.
//!
//! Nodes and VMs are stored in arenas and referenced by the `NodeId`/`VmId`
//! assigned when they are first seen. Mutators never panic: an operation
//! that would break one of the invariants below is rejected and returns
//! `false`.
//!
//! - a node is either online or offline
//! - a VM is running, sleeping or waiting, or absent (terminated)
//! - a running or sleeping VM has exactly one hosting node, which is online
//! - a node hosting VMs can neither be switched offline nor removed

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

use crate::types::{Node, NodeId, NodeState, Resource, VirtualMachine, VmId, VmState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Running(NodeId),
    Sleeping(NodeId),
    Waiting,
}

/// Which resource figure of the VMs to sum when computing a node load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    Consumption,
    Demand,
}

#[derive(Debug, Clone, Default)]
pub struct Configuration {
    nodes: Vec<Node>,
    node_ids: FxHashMap<String, NodeId>,
    node_states: Vec<Option<NodeState>>,
    running: Vec<BTreeSet<VmId>>,
    sleeping: Vec<BTreeSet<VmId>>,

    vms: Vec<VirtualMachine>,
    vm_ids: FxHashMap<String, VmId>,
    locations: Vec<Option<Location>>,
    waiting: BTreeSet<VmId>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    fn register_node(&mut self, node: &Node) -> NodeId {
        if let Some(id) = self.node_ids.get(&node.name) {
            self.nodes[id.index()] = node.clone();
            return *id;
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node.clone());
        self.node_ids.insert(node.name.clone(), id);
        self.node_states.push(None);
        self.running.push(BTreeSet::new());
        self.sleeping.push(BTreeSet::new());
        id
    }

    fn register_vm(&mut self, vm: &VirtualMachine) -> VmId {
        if let Some(id) = self.vm_ids.get(&vm.name) {
            self.vms[id.index()] = vm.clone();
            return *id;
        }
        let id = VmId(self.vms.len() as u32);
        self.vms.push(vm.clone());
        self.vm_ids.insert(vm.name.clone(), id);
        self.locations.push(None);
        id
    }

    fn detach(&mut self, vm: VmId) {
        match self.locations[vm.index()].take() {
            Some(Location::Running(n)) => {
                self.running[n.index()].remove(&vm);
            }
            Some(Location::Sleeping(n)) => {
                self.sleeping[n.index()].remove(&vm);
            }
            Some(Location::Waiting) => {
                self.waiting.remove(&vm);
            }
            None => {}
        }
    }

    fn hosts_vms(&self, node: NodeId) -> bool {
        !self.running[node.index()].is_empty() || !self.sleeping[node.index()].is_empty()
    }

    /// Set a node online, registering it if needed
    pub fn add_online(&mut self, node: &Node) -> bool {
        let id = self.register_node(node);
        self.node_states[id.index()] = Some(NodeState::Online);
        true
    }

    /// Set a node offline. Fails if the node hosts VMs.
    pub fn add_offline(&mut self, node: &Node) -> bool {
        if let Some(id) = self.node_id(node) {
            if self.hosts_vms(id) {
                return false;
            }
        }
        let id = self.register_node(node);
        self.node_states[id.index()] = Some(NodeState::Offline);
        true
    }

    /// Remove a node. Fails if the node is unknown or hosts VMs.
    pub fn remove_node(&mut self, node: &Node) -> bool {
        match self.node_id(node) {
            Some(id) if !self.hosts_vms(id) => {
                self.node_states[id.index()] = None;
                true
            }
            _ => false,
        }
    }

    fn online_id(&self, node: &Node) -> Option<NodeId> {
        self.node_id(node)
            .filter(|id| self.node_states[id.index()] == Some(NodeState::Online))
    }

    /// Run a VM on an online node, relocating it if it was elsewhere
    pub fn set_run_on(&mut self, vm: &VirtualMachine, node: &Node) -> bool {
        let Some(host) = self.online_id(node) else {
            return false;
        };
        let id = self.register_vm(vm);
        self.detach(id);
        self.running[host.index()].insert(id);
        self.locations[id.index()] = Some(Location::Running(host));
        true
    }

    /// Put a VM to sleep on an online node
    pub fn set_sleep_on(&mut self, vm: &VirtualMachine, node: &Node) -> bool {
        let Some(host) = self.online_id(node) else {
            return false;
        };
        let id = self.register_vm(vm);
        self.detach(id);
        self.sleeping[host.index()].insert(id);
        self.locations[id.index()] = Some(Location::Sleeping(host));
        true
    }

    /// Mark a VM as waiting to be run
    pub fn add_waiting(&mut self, vm: &VirtualMachine) -> bool {
        let id = self.register_vm(vm);
        self.detach(id);
        self.waiting.insert(id);
        self.locations[id.index()] = Some(Location::Waiting);
        true
    }

    /// Remove a VM (it becomes terminated). Fails if the VM is not present.
    pub fn remove_vm(&mut self, vm: &VirtualMachine) -> bool {
        match self.vm_id(vm) {
            Some(id) if self.locations[id.index()].is_some() => {
                self.detach(id);
                true
            }
            _ => false,
        }
    }

    // Identifier lookups

    pub fn node_id(&self, node: &Node) -> Option<NodeId> {
        self.node_id_by_name(&node.name)
    }

    pub fn node_id_by_name(&self, name: &str) -> Option<NodeId> {
        self.node_ids.get(name).copied()
    }

    pub fn vm_id(&self, vm: &VirtualMachine) -> Option<VmId> {
        self.vm_id_by_name(&vm.name)
    }

    pub fn vm_id_by_name(&self, name: &str) -> Option<VmId> {
        self.vm_ids.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn vm(&self, id: VmId) -> &VirtualMachine {
        &self.vms[id.index()]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.node_id_by_name(name)
            .filter(|id| self.node_states[id.index()].is_some())
            .map(|id| self.node(id))
    }

    pub fn vm_by_name(&self, name: &str) -> Option<&VirtualMachine> {
        self.vm_id_by_name(name)
            .filter(|id| self.locations[id.index()].is_some())
            .map(|id| self.vm(id))
    }

    // State queries

    pub fn contains_node(&self, node: &Node) -> bool {
        self.node_state(node).is_some()
    }

    pub fn contains_vm(&self, vm: &VirtualMachine) -> bool {
        self.vm_state(vm) != VmState::Terminated
    }

    pub fn node_state(&self, node: &Node) -> Option<NodeState> {
        self.node_id(node).and_then(|id| self.node_states[id.index()])
    }

    pub fn is_online(&self, node: &Node) -> bool {
        self.node_state(node) == Some(NodeState::Online)
    }

    pub fn is_offline(&self, node: &Node) -> bool {
        self.node_state(node) == Some(NodeState::Offline)
    }

    /// Current state of a VM. Unknown VMs are reported as terminated.
    pub fn vm_state(&self, vm: &VirtualMachine) -> VmState {
        match self.vm_id(vm).and_then(|id| self.locations[id.index()]) {
            Some(Location::Running(_)) => VmState::Running,
            Some(Location::Sleeping(_)) => VmState::Sleeping,
            Some(Location::Waiting) => VmState::Waiting,
            None => VmState::Terminated,
        }
    }

    /// The node hosting a running or sleeping VM
    pub fn location(&self, vm: &VirtualMachine) -> Option<&Node> {
        match self.vm_id(vm).and_then(|id| self.locations[id.index()]) {
            Some(Location::Running(n)) | Some(Location::Sleeping(n)) => Some(self.node(n)),
            _ => None,
        }
    }

    fn nodes_in(&self, state: NodeState) -> Vec<&Node> {
        self.node_states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == Some(state))
            .map(|(i, _)| &self.nodes[i])
            .collect()
    }

    pub fn online_nodes(&self) -> Vec<&Node> {
        self.nodes_in(NodeState::Online)
    }

    pub fn offline_nodes(&self) -> Vec<&Node> {
        self.nodes_in(NodeState::Offline)
    }

    pub fn all_nodes(&self) -> Vec<&Node> {
        self.node_states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| &self.nodes[i])
            .collect()
    }

    pub fn running_vms(&self) -> Vec<&VirtualMachine> {
        self.running
            .iter()
            .flat_map(|set| set.iter().map(|id| self.vm(*id)))
            .collect()
    }

    pub fn sleeping_vms(&self) -> Vec<&VirtualMachine> {
        self.sleeping
            .iter()
            .flat_map(|set| set.iter().map(|id| self.vm(*id)))
            .collect()
    }

    pub fn waiting_vms(&self) -> Vec<&VirtualMachine> {
        self.waiting.iter().map(|id| self.vm(*id)).collect()
    }

    pub fn all_vms(&self) -> Vec<&VirtualMachine> {
        self.locations
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_some())
            .map(|(i, _)| &self.vms[i])
            .collect()
    }

    pub fn runnings_on(&self, node: &Node) -> Vec<&VirtualMachine> {
        self.node_id(node)
            .map(|id| self.running[id.index()].iter().map(|v| self.vm(*v)).collect())
            .unwrap_or_default()
    }

    pub fn sleepings_on(&self, node: &Node) -> Vec<&VirtualMachine> {
        self.node_id(node)
            .map(|id| self.sleeping[id.index()].iter().map(|v| self.vm(*v)).collect())
            .unwrap_or_default()
    }

    // Resource accounting

    /// Sum of the running VMs' consumption or demand on a node
    pub fn load(&self, node: &Node, resource: Resource, usage: Usage) -> u64 {
        self.runnings_on(node)
            .into_iter()
            .map(|vm| match usage {
                Usage::Consumption => resource.consumption(vm) as u64,
                Usage::Demand => resource.demand(vm) as u64,
            })
            .sum()
    }

    /// Free CPU units on a node according to current consumption
    pub fn free_cpu(&self, node: &Node) -> i64 {
        node.cpu_capacity as i64 - self.load(node, Resource::Cpu, Usage::Consumption) as i64
    }

    /// Free memory on a node according to current consumption
    pub fn free_memory(&self, node: &Node) -> i64 {
        node.memory_capacity as i64
            - self.load(node, Resource::Memory, Usage::Consumption) as i64
    }

    /// The first resource for which the node is overloaded, with the load
    pub fn overload(&self, node: &Node, usage: Usage) -> Option<(Resource, u64)> {
        Resource::ALL.into_iter().find_map(|r| {
            let load = self.load(node, r, usage);
            (load > r.capacity(node) as u64).then_some((r, load))
        })
    }

    /// Online nodes whose load strictly exceeds capacity on any dimension
    pub fn overloaded_nodes(&self, usage: Usage) -> Vec<&Node> {
        self.online_nodes()
            .into_iter()
            .filter(|n| self.overload(n, usage).is_some())
            .collect()
    }

    // Merging

    /// Check whether two configurations describe disjoint parts of a cluster.
    ///
    /// VM sets must be disjoint and a node present in both must have the
    /// same state in both.
    pub fn check_mergeable(&self, other: &Configuration) -> Result<(), String> {
        for vm in other.all_vms() {
            if self.contains_vm(vm) {
                return Err(format!("VM '{}' is present in both configurations", vm));
            }
        }
        for node in other.all_nodes() {
            if let Some(state) = self.node_state(node) {
                if other.node_state(node) != Some(state) {
                    return Err(format!("node '{}' has diverging states", node));
                }
            }
        }
        Ok(())
    }

    /// Union of two mergeable configurations
    pub fn merge(&self, other: &Configuration) -> Result<Configuration, String> {
        self.check_mergeable(other)?;
        let mut merged = self.clone();
        for node in other.online_nodes() {
            merged.add_online(node);
        }
        for node in other.offline_nodes() {
            merged.add_offline(node);
        }
        for node in other.online_nodes() {
            for vm in other.runnings_on(node) {
                merged.set_run_on(vm, node);
            }
            for vm in other.sleepings_on(node) {
                merged.set_sleep_on(vm, node);
            }
        }
        for vm in other.waiting_vms() {
            merged.add_waiting(vm);
        }
        Ok(merged)
    }

    fn names<'a>(items: impl IntoIterator<Item = &'a VirtualMachine>) -> BTreeSet<&'a str> {
        items.into_iter().map(|v| v.name.as_str()).collect()
    }
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        let online = |c: &Configuration| -> BTreeSet<String> {
            c.online_nodes().into_iter().map(|n| n.name.clone()).collect()
        };
        let offline = |c: &Configuration| -> BTreeSet<String> {
            c.offline_nodes().into_iter().map(|n| n.name.clone()).collect()
        };
        if online(self) != online(other) || offline(self) != offline(other) {
            return false;
        }
        if Self::names(self.waiting_vms()) != Self::names(other.waiting_vms()) {
            return false;
        }
        self.online_nodes().into_iter().all(|n| {
            Self::names(self.runnings_on(n)) == Self::names(other.runnings_on(n))
                && Self::names(self.sleepings_on(n)) == Self::names(other.sleepings_on(n))
        })
    }
}

impl Eq for Configuration {}

impl std::fmt::Display for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for node in self.online_nodes() {
            write!(f, "{}:", node)?;
            for vm in self.runnings_on(node) {
                write!(f, " {}", vm)?;
            }
            for vm in self.sleepings_on(node) {
                write!(f, " ({})", vm)?;
            }
            writeln!(f)?;
        }
        for node in self.offline_nodes() {
            writeln!(f, "({})", node)?;
        }
        write!(f, "FARM:")?;
        for vm in self.waiting_vms() {
            write!(f, " {}", vm)?;
        }
        Ok(())
    }
}
