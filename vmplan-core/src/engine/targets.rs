use std::collections::BTreeSet;
use tracing::warn;

use crate::configuration::Configuration;
use crate::error::{PlanError, PlanResult};
use crate::types::{Node, NodeState, VirtualMachine, VmState};

/// Requested state of every VM and node at the end of the reconfiguration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStates {
    pub run: BTreeSet<VirtualMachine>,
    pub wait: BTreeSet<VirtualMachine>,
    pub sleep: BTreeSet<VirtualMachine>,
    pub stop: BTreeSet<VirtualMachine>,
    pub on: BTreeSet<Node>,
    pub off: BTreeSet<Node>,
}

impl TargetStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<'a>(mut self, vms: impl IntoIterator<Item = &'a VirtualMachine>) -> Self {
        self.run.extend(vms.into_iter().cloned());
        self
    }

    pub fn wait<'a>(mut self, vms: impl IntoIterator<Item = &'a VirtualMachine>) -> Self {
        self.wait.extend(vms.into_iter().cloned());
        self
    }

    pub fn sleep<'a>(mut self, vms: impl IntoIterator<Item = &'a VirtualMachine>) -> Self {
        self.sleep.extend(vms.into_iter().cloned());
        self
    }

    pub fn stop<'a>(mut self, vms: impl IntoIterator<Item = &'a VirtualMachine>) -> Self {
        self.stop.extend(vms.into_iter().cloned());
        self
    }

    pub fn on<'a>(mut self, nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        self.on.extend(nodes.into_iter().cloned());
        self
    }

    pub fn off<'a>(mut self, nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        self.off.extend(nodes.into_iter().cloned());
        self
    }

    /// Every element of `source` that has no requested state keeps its
    /// current one
    pub fn keep(mut self, source: &Configuration) -> Self {
        for vm in source.all_vms() {
            if self.vm_states(vm).is_empty() {
                let set = match source.vm_state(vm) {
                    VmState::Running => &mut self.run,
                    VmState::Sleeping => &mut self.sleep,
                    VmState::Waiting => &mut self.wait,
                    VmState::Terminated => &mut self.stop,
                };
                set.insert(vm.clone());
            }
        }
        for node in source.all_nodes() {
            if !self.on.contains(node) && !self.off.contains(node) {
                if source.is_online(node) {
                    self.on.insert(node.clone());
                } else {
                    self.off.insert(node.clone());
                }
            }
        }
        self
    }

    fn vm_states(&self, vm: &VirtualMachine) -> Vec<VmState> {
        [
            (&self.run, VmState::Running),
            (&self.sleep, VmState::Sleeping),
            (&self.wait, VmState::Waiting),
            (&self.stop, VmState::Terminated),
        ]
        .into_iter()
        .filter(|(set, _)| set.contains(vm))
        .map(|(_, state)| state)
        .collect()
    }

    /// The single requested state of a VM
    pub fn vm_state(&self, vm: &VirtualMachine) -> PlanResult<VmState> {
        match self.vm_states(vm).as_slice() {
            [] => Err(PlanError::UnknownResultingState {
                element: vm.name.clone(),
            }),
            [state] => Ok(*state),
            states => Err(PlanError::MultipleResultingState {
                element: vm.name.clone(),
                states: states
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// The single requested state of a node
    pub fn node_state(&self, node: &Node) -> PlanResult<NodeState> {
        match (self.on.contains(node), self.off.contains(node)) {
            (true, false) => Ok(NodeState::Online),
            (false, true) => Ok(NodeState::Offline),
            (false, false) => Err(PlanError::UnknownResultingState {
                element: node.name.clone(),
            }),
            (true, true) => Err(PlanError::MultipleResultingState {
                element: node.name.clone(),
                states: "online, offline".to_string(),
            }),
        }
    }

    /// VMs the targets mention that `source` does not know. They are
    /// considered terminated in the source.
    pub fn unknown_vms<'a>(&'a self, source: &Configuration) -> Vec<&'a VirtualMachine> {
        let mut vms: BTreeSet<&VirtualMachine> = BTreeSet::new();
        for set in [&self.run, &self.sleep, &self.wait, &self.stop] {
            vms.extend(set.iter().filter(|vm| !source.contains_vm(vm)));
        }
        vms.into_iter().collect()
    }

    /// Check the targets against the source: every source element needs
    /// exactly one state. Nodes the source does not know are ignored.
    pub fn check(&self, source: &Configuration) -> PlanResult<()> {
        for vm in source.all_vms() {
            self.vm_state(vm)?;
        }
        for vm in self.unknown_vms(source) {
            self.vm_state(vm)?;
        }
        for node in source.all_nodes() {
            self.node_state(node)?;
        }
        for node in self.on.iter().chain(self.off.iter()) {
            if !source.contains_node(node) {
                warn!("Ignoring target state of unknown node {}", node);
            }
        }
        Ok(())
    }

    /// Targets restricted to the given elements
    pub fn restrict(&self, vms: &BTreeSet<VirtualMachine>, nodes: &BTreeSet<Node>) -> Self {
        let keep_vms =
            |set: &BTreeSet<VirtualMachine>| set.intersection(vms).cloned().collect::<BTreeSet<_>>();
        let keep_nodes =
            |set: &BTreeSet<Node>| set.intersection(nodes).cloned().collect::<BTreeSet<_>>();
        Self {
            run: keep_vms(&self.run),
            wait: keep_vms(&self.wait),
            sleep: keep_vms(&self.sleep),
            stop: keep_vms(&self.stop),
            on: keep_nodes(&self.on),
            off: keep_nodes(&self.off),
        }
    }
}
