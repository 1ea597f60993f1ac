//! Managed elements of a cluster: physical nodes and virtual machines.
//!
//! Both are identified by their name. Resource figures travel with the
//! identity so that a `Configuration` can be cloned or partitioned without
//! looking anything up elsewhere.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Stable index of a node inside the `Configuration` that registered it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

/// Stable index of a VM inside the `Configuration` that registered it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VmId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl VmId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A physical node able to host virtual machines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Number of CPU units the node provides
    pub cpu_capacity: u32,
    /// Amount of memory the node provides (MiB)
    pub memory_capacity: u32,
}

impl Node {
    pub fn new(name: impl Into<String>, cpu_capacity: u32, memory_capacity: u32) -> Self {
        Self {
            name: name.into(),
            cpu_capacity,
            memory_capacity,
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Node {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Node {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A virtual machine.
///
/// Consumption is what the VM uses right now, demand is what it will use
/// once it is (re)placed. Demand is never lower than consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub name: String,
    pub cpu_consumption: u32,
    pub cpu_demand: u32,
    pub memory_consumption: u32,
    pub memory_demand: u32,
}

impl VirtualMachine {
    /// Create a VM whose demand equals its consumption
    pub fn new(name: impl Into<String>, cpu: u32, memory: u32) -> Self {
        Self {
            name: name.into(),
            cpu_consumption: cpu,
            cpu_demand: cpu,
            memory_consumption: memory,
            memory_demand: memory,
        }
    }

    /// Set the demand of the VM. Values below the consumption are raised to it.
    pub fn with_demand(mut self, cpu_demand: u32, memory_demand: u32) -> Self {
        self.cpu_demand = cpu_demand.max(self.cpu_consumption);
        self.memory_demand = memory_demand.max(self.memory_consumption);
        self
    }
}

impl PartialEq for VirtualMachine {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for VirtualMachine {}

impl Hash for VirtualMachine {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for VirtualMachine {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VirtualMachine {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl std::fmt::Display for VirtualMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// State of a VM in a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Running,
    Sleeping,
    Waiting,
    Terminated,
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VmState::Running => "running",
            VmState::Sleeping => "sleeping",
            VmState::Waiting => "waiting",
            VmState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// State of a node in a configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Online,
    Offline,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Online => f.write_str("online"),
            NodeState::Offline => f.write_str("offline"),
        }
    }
}

/// A resource dimension tracked by the capacity checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    pub const ALL: [Resource; 2] = [Resource::Cpu, Resource::Memory];

    pub fn name(self) -> &'static str {
        match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
        }
    }

    pub fn capacity(self, node: &Node) -> u32 {
        match self {
            Resource::Cpu => node.cpu_capacity,
            Resource::Memory => node.memory_capacity,
        }
    }

    pub fn consumption(self, vm: &VirtualMachine) -> u32 {
        match self {
            Resource::Cpu => vm.cpu_consumption,
            Resource::Memory => vm.memory_consumption,
        }
    }

    pub fn demand(self, vm: &VirtualMachine) -> u32 {
        match self {
            Resource::Cpu => vm.cpu_demand,
            Resource::Memory => vm.memory_demand,
        }
    }
}
