//! Action models: how each node and VM transition is expressed over
//! solver variables and slices.

use tracing::trace;

use super::problem::ReconfigurationProblem;
use super::slice::{Slice, SliceKind};
use crate::duration::DurationEvaluator;
use crate::solver::propagators::{
    ConditionalPrecedence, LessOrEqualOffset, MoveDuration, PlusEqual, ReifiedCost,
};
use crate::solver::{Domain, VarId};
use crate::types::{Node, NodeState, VirtualMachine, VmState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTransition {
    Boot,
    Shutdown,
    StayOnline,
    StayOffline,
}

impl NodeTransition {
    pub fn from_states(from: NodeState, to: NodeState) -> Self {
        match (from, to) {
            (NodeState::Offline, NodeState::Online) => NodeTransition::Boot,
            (NodeState::Online, NodeState::Offline) => NodeTransition::Shutdown,
            (NodeState::Online, NodeState::Online) => NodeTransition::StayOnline,
            (NodeState::Offline, NodeState::Offline) => NodeTransition::StayOffline,
        }
    }

    pub fn max_duration(self, node: &Node, durations: &dyn DurationEvaluator) -> u32 {
        match self {
            NodeTransition::Boot => durations.startup(node).max(1),
            NodeTransition::Shutdown => durations.shutdown(node).max(1),
            NodeTransition::StayOnline | NodeTransition::StayOffline => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeActionModel {
    pub node: usize,
    pub transition: NodeTransition,
    pub start: VarId,
    pub end: VarId,
    pub slice: Option<Slice>,
}

/// Legal VM transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmTransition {
    /// running to running, possibly on another node
    Relocation,
    Suspend,
    Resume,
    Run,
    Stop,
    StaySleeping,
    StayWaiting,
    StayTerminated,
}

impl VmTransition {
    pub fn from_states(from: VmState, to: VmState) -> Option<Self> {
        use VmState::*;
        match (from, to) {
            (Running, Running) => Some(VmTransition::Relocation),
            (Running, Sleeping) => Some(VmTransition::Suspend),
            (Running, Terminated) => Some(VmTransition::Stop),
            (Sleeping, Running) => Some(VmTransition::Resume),
            (Sleeping, Sleeping) => Some(VmTransition::StaySleeping),
            (Waiting, Running) => Some(VmTransition::Run),
            (Waiting, Waiting) => Some(VmTransition::StayWaiting),
            (Terminated, Terminated) => Some(VmTransition::StayTerminated),
            _ => None,
        }
    }

    /// Whether the VM runs once the transition is done
    pub fn ends_running(self) -> bool {
        matches!(
            self,
            VmTransition::Relocation | VmTransition::Resume | VmTransition::Run
        )
    }

    pub fn max_duration(self, vm: &VirtualMachine, durations: &dyn DurationEvaluator) -> u32 {
        match self {
            VmTransition::Relocation => durations.migration(vm).max(1),
            VmTransition::Suspend => durations.suspend(vm).max(1),
            VmTransition::Resume => durations
                .local_resume(vm)
                .max(durations.remote_resume(vm))
                .max(1),
            VmTransition::Run => durations.run(vm).max(1),
            VmTransition::Stop => durations.stop(vm).max(1),
            VmTransition::StaySleeping | VmTransition::StayWaiting | VmTransition::StayTerminated => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VmActionModel {
    pub vm: usize,
    pub transition: VmTransition,
    /// Node hosting the VM in the source
    pub current: Option<usize>,
    /// Node hosting the VM in the destination
    pub hoster: Option<VarId>,
    pub start: VarId,
    pub end: VarId,
    pub duration: VarId,
    /// Contribution to the objective, absent when statically zero
    pub cost: Option<VarId>,
    pub consuming: Option<Slice>,
    pub demanding: Option<Slice>,
}

impl ReconfigurationProblem {
    fn timed(&mut self, label: &str, duration: VarId) -> (VarId, VarId) {
        let horizon = self.horizon;
        let start = self.solver.interval_var(format!("{}.start", label), 0, horizon);
        let end = self.solver.interval_var(format!("{}.end", label), 0, horizon);
        self.solver.post(PlusEqual::new(start, duration, end));
        self.solver.post(LessOrEqualOffset::new(end, self.end, 0));
        (start, end)
    }

    pub(super) fn build_node_model(&mut self, node: usize, transition: NodeTransition) {
        let (cpu, memory) = {
            let n = &self.nodes[node];
            (n.cpu_capacity, n.memory_capacity)
        };
        let label = format!("{}.{:?}", self.nodes[node].name, transition).to_lowercase();
        let model = match transition {
            NodeTransition::Boot | NodeTransition::Shutdown => {
                let d = transition.max_duration(&self.nodes[node], self.durations.as_ref());
                let duration = self.solver.constant(format!("{}.duration", label), d as i32);
                let (start, end) = self.timed(&label, duration);
                let hoster = self.node_constant(node);
                let slice = if transition == NodeTransition::Boot {
                    Slice {
                        kind: SliceKind::Consuming,
                        hoster,
                        start: self.start,
                        end,
                        cpu,
                        memory,
                    }
                } else {
                    Slice {
                        kind: SliceKind::Demanding,
                        hoster,
                        start,
                        end: self.end,
                        cpu,
                        memory,
                    }
                };
                self.cost_terms.push(end);
                NodeActionModel {
                    node,
                    transition,
                    start,
                    end,
                    slice: Some(slice),
                }
            }
            NodeTransition::StayOnline | NodeTransition::StayOffline => NodeActionModel {
                node,
                transition,
                start: self.start,
                end: self.start,
                slice: None,
            },
        };
        if let Some(slice) = model.slice {
            self.add_slice(slice, vec![node as i32]);
        }
        trace!("Node model {} built", label);
        self.node_models.push(model);
    }

    pub(super) fn build_vm_model(&mut self, vm: usize, transition: VmTransition, manageable: bool) {
        let v = self.vms[vm].clone();
        let current = self.source_location(&v);
        let label = v.name.clone();
        let durations = self.durations.clone();
        let online = self.target_online.clone();

        let stay_on_current = |current: Option<usize>| -> Vec<i32> {
            current
                .filter(|c| online.contains(&(*c as i32)))
                .map(|c| vec![c as i32])
                .unwrap_or_default()
        };

        let mut model = VmActionModel {
            vm,
            transition,
            current,
            hoster: None,
            start: self.start,
            end: self.start,
            duration: self.start,
            cost: None,
            consuming: None,
            demanding: None,
        };

        match transition {
            VmTransition::Relocation => {
                let c = current.unwrap_or_default();
                let candidates = if manageable {
                    online.clone()
                } else {
                    stay_on_current(current)
                };
                let hoster = self.hoster_var(&label, candidates);
                let d = transition.max_duration(&v, durations.as_ref()) as i32;
                let duration = self
                    .solver
                    .new_var(format!("{}.duration", label), Domain::enumerated([0, d]));
                let (start, end) = self.timed(&label, duration);
                self.solver
                    .post(MoveDuration::new(hoster, c as i32, duration, 0, d));
                // staying without growing is a no-op, pinned at the origin
                if v.cpu_demand == v.cpu_consumption && v.memory_demand == v.memory_consumption {
                    self.solver.post(ConditionalPrecedence::new(
                        hoster,
                        c as i32,
                        start,
                        self.start,
                    ));
                }
                let cost = self
                    .solver
                    .interval_var(format!("{}.cost", label), 0, self.horizon);
                self.solver.post(ReifiedCost::new(duration, end, cost));
                model.hoster = Some(hoster);
                model.start = start;
                model.end = end;
                model.duration = duration;
                model.cost = Some(cost);
                model.consuming = Some(self.consuming_slice(c, end, &v));
                model.demanding = Some(self.demanding_slice(hoster, start, &v));
            }
            VmTransition::Suspend | VmTransition::Stop => {
                let c = current.unwrap_or_default();
                let d = transition.max_duration(&v, durations.as_ref()) as i32;
                let duration = self.solver.constant(format!("{}.duration", label), d);
                let (start, end) = self.timed(&label, duration);
                if transition == VmTransition::Suspend {
                    model.hoster = Some(self.hoster_var(&label, stay_on_current(current)));
                }
                model.start = start;
                model.end = end;
                model.duration = duration;
                model.cost = Some(end);
                model.consuming = Some(self.consuming_slice(c, end, &v));
            }
            VmTransition::Resume | VmTransition::Run => {
                let hoster = self.hoster_var(&label, online.clone());
                let duration = if transition == VmTransition::Resume {
                    let local = durations.local_resume(&v).max(1) as i32;
                    let remote = durations.remote_resume(&v).max(1) as i32;
                    let c = current.unwrap_or_default() as i32;
                    let duration = self
                        .solver
                        .new_var(format!("{}.duration", label), Domain::enumerated([local, remote]));
                    if local != remote {
                        self.solver
                            .post(MoveDuration::new(hoster, c, duration, local, remote));
                    }
                    duration
                } else {
                    let d = durations.run(&v).max(1) as i32;
                    self.solver.constant(format!("{}.duration", label), d)
                };
                let (start, end) = self.timed(&label, duration);
                model.hoster = Some(hoster);
                model.start = start;
                model.end = end;
                model.duration = duration;
                model.cost = Some(end);
                model.demanding = Some(self.demanding_slice(hoster, start, &v));
            }
            VmTransition::StaySleeping => {
                model.hoster = Some(self.hoster_var(&label, stay_on_current(current)));
            }
            VmTransition::StayWaiting | VmTransition::StayTerminated => {}
        }

        if let Some(slice) = model.consuming {
            self.add_slice(slice, vec![current.unwrap_or_default() as i32]);
        }
        if let Some(slice) = model.demanding {
            let domain: Vec<i32> = self.solver.store().domain(slice.hoster).iter().collect();
            // no VM can land on a node before it is booted
            for node in &domain {
                if let Some(boot_end) = self.boot_end(*node as usize) {
                    self.solver.post(ConditionalPrecedence::new(
                        slice.hoster,
                        *node,
                        boot_end,
                        model.start,
                    ));
                }
            }
            self.add_slice(slice, domain);
        }
        // the VM must have left its node before the node is switched off
        if let Some(shutdown_start) = current.and_then(|c| self.shutdown_start(c)) {
            if model.end != self.start {
                self.solver
                    .post(LessOrEqualOffset::new(model.end, shutdown_start, 0));
            }
        }
        if let Some(cost) = model.cost {
            self.cost_terms.push(cost);
        }
        self.vm_models.push(model);
    }

    fn hoster_var(&mut self, label: &str, candidates: Vec<i32>) -> VarId {
        self.solver
            .new_var(format!("{}.hoster", label), Domain::enumerated(candidates))
    }

    fn consuming_slice(&mut self, node: usize, end: VarId, vm: &VirtualMachine) -> Slice {
        Slice {
            kind: SliceKind::Consuming,
            hoster: self.node_constant(node),
            start: self.start,
            end,
            cpu: vm.cpu_consumption,
            memory: vm.memory_consumption,
        }
    }

    fn demanding_slice(&mut self, hoster: VarId, start: VarId, vm: &VirtualMachine) -> Slice {
        Slice {
            kind: SliceKind::Demanding,
            hoster,
            start,
            end: self.end,
            cpu: vm.cpu_demand,
            memory: vm.memory_demand,
        }
    }

    fn boot_end(&self, node: usize) -> Option<VarId> {
        self.node_models
            .get(node)
            .filter(|m| m.transition == NodeTransition::Boot)
            .map(|m| m.end)
    }

    fn shutdown_start(&self, node: usize) -> Option<VarId> {
        self.node_models
            .get(node)
            .filter(|m| m.transition == NodeTransition::Shutdown)
            .map(|m| m.start)
    }
}
