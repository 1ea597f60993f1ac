//! Assembly of the reconfiguration model.

use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use super::cost;
use super::models::{NodeActionModel, NodeTransition, VmActionModel, VmTransition};
use super::packing::SlicePacking;
use super::slice::Slice;
use super::targets::TargetStates;
use crate::configuration::{Configuration, Usage};
use crate::constraints::PlacementConstraint;
use crate::duration::DurationEvaluator;
use crate::error::{PlanError, PlanResult};
use crate::solver::{minimize, Domain, Propagator, SearchLimits, SearchResult, Solver, VarId};
use crate::types::{Node, NodeState, VirtualMachine};

/// Model-wide settings
#[derive(Debug, Clone)]
pub struct ProblemSettings {
    pub durations: Arc<dyn DurationEvaluator>,
    pub max_horizon: u32,
    pub sum_chunk_size: usize,
    /// VMs allowed to move. `None` means every VM.
    pub manageable: Option<BTreeSet<VirtualMachine>>,
}

/// The constraint model of one planning call
#[derive(Debug)]
pub struct ReconfigurationProblem {
    pub(super) solver: Solver,
    pub(super) source: Configuration,
    pub(super) targets: TargetStates,
    pub(super) durations: Arc<dyn DurationEvaluator>,
    pub(super) nodes: Vec<Node>,
    pub(super) vms: Vec<VirtualMachine>,
    node_index: FxHashMap<String, usize>,
    vm_index: FxHashMap<String, usize>,
    node_constants: Vec<Option<VarId>>,
    /// Values of the nodes that are online at the end
    pub(super) target_online: Vec<i32>,
    free_cpu: Vec<i64>,
    free_memory: Vec<i64>,
    pub(super) horizon: i32,
    /// Global start, always 0
    pub(super) start: VarId,
    /// Moment every action is finished
    pub(super) end: VarId,
    pub(super) node_models: Vec<NodeActionModel>,
    pub(super) vm_models: Vec<VmActionModel>,
    slices: Vec<Slice>,
    slice_domains: Vec<Vec<i32>>,
    group_vars: FxHashMap<Vec<Vec<i32>>, VarId>,
    pub(super) cost_terms: Vec<VarId>,
    pub(super) cost: Option<VarId>,
    pub(super) injected: Vec<Arc<dyn PlacementConstraint>>,
    /// Nodes of a wider request that this problem does not model
    foreign_nodes: BTreeSet<Node>,
    sum_chunk_size: usize,
}

impl ReconfigurationProblem {
    /// Check the request and build the action models
    pub fn new(
        source: &Configuration,
        targets: &TargetStates,
        settings: &ProblemSettings,
    ) -> PlanResult<Self> {
        for node in source.online_nodes() {
            if let Some((resource, load)) = source.overload(node, Usage::Consumption) {
                return Err(PlanError::NonViableSourceConfiguration {
                    node: node.name.clone(),
                    resource: resource.name(),
                    consumption: load,
                    capacity: resource.capacity(node) as u64,
                });
            }
        }
        targets.check(source)?;

        let nodes: Vec<Node> = source.all_nodes().into_iter().cloned().collect();
        let mut vms: Vec<VirtualMachine> = source.all_vms().into_iter().cloned().collect();
        vms.extend(targets.unknown_vms(source).into_iter().cloned());

        let mut node_transitions = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let from = source.node_state(node).unwrap_or(NodeState::Offline);
            node_transitions.push(NodeTransition::from_states(from, targets.node_state(node)?));
        }
        let mut vm_transitions = Vec::with_capacity(vms.len());
        for vm in &vms {
            let from = source.vm_state(vm);
            let to = targets.vm_state(vm)?;
            let transition =
                VmTransition::from_states(from, to).ok_or_else(|| PlanError::NoAvailableTransition {
                    vm: vm.name.clone(),
                    from,
                    to,
                })?;
            vm_transitions.push(transition);
        }

        let durations = settings.durations.clone();
        let longest: u64 = nodes
            .iter()
            .zip(&node_transitions)
            .map(|(n, t)| t.max_duration(n, durations.as_ref()) as u64)
            .chain(
                vms.iter()
                    .zip(&vm_transitions)
                    .map(|(v, t)| t.max_duration(v, durations.as_ref()) as u64),
            )
            .sum();
        let horizon = longest.min(settings.max_horizon as u64).min(i32::MAX as u64 / 2) as i32;

        let mut solver = Solver::new();
        let start = solver.constant("start", 0);
        let end = solver.interval_var("end", 0, horizon);

        let target_online = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| targets.on.contains(*n))
            .map(|(i, _)| i as i32)
            .collect();

        let mut problem = Self {
            solver,
            source: source.clone(),
            targets: targets.clone(),
            durations,
            node_index: nodes
                .iter()
                .enumerate()
                .map(|(i, n)| (n.name.clone(), i))
                .collect(),
            vm_index: vms
                .iter()
                .enumerate()
                .map(|(i, v)| (v.name.clone(), i))
                .collect(),
            node_constants: vec![None; nodes.len()],
            free_cpu: nodes.iter().map(|n| source.free_cpu(n)).collect(),
            free_memory: nodes.iter().map(|n| source.free_memory(n)).collect(),
            nodes,
            vms,
            target_online,
            horizon,
            start,
            end,
            node_models: Vec::new(),
            vm_models: Vec::new(),
            slices: Vec::new(),
            slice_domains: Vec::new(),
            group_vars: FxHashMap::default(),
            cost_terms: Vec::new(),
            cost: None,
            injected: Vec::new(),
            foreign_nodes: BTreeSet::new(),
            sum_chunk_size: settings.sum_chunk_size,
        };

        for (node, transition) in node_transitions.into_iter().enumerate() {
            problem.build_node_model(node, transition);
        }
        for (vm, transition) in vm_transitions.into_iter().enumerate() {
            let manageable = settings
                .manageable
                .as_ref()
                .map_or(true, |set| set.contains(&problem.vms[vm]));
            problem.build_vm_model(vm, transition, manageable);
        }

        let capacities = problem
            .nodes
            .iter()
            .map(|n| [n.cpu_capacity as i64, n.memory_capacity as i64])
            .collect();
        let packing = SlicePacking::new(
            problem.slices.clone(),
            problem.slice_domains.clone(),
            capacities,
        );
        problem.solver.post(packing);

        debug!(
            "Reconfiguration problem: {} nodes, {} VMs, {} slices, horizon {}",
            problem.nodes.len(),
            problem.vms.len(),
            problem.slices.len(),
            horizon
        );
        Ok(problem)
    }

    /// Inject a placement constraint. A failed injection leaves the model
    /// untouched.
    pub fn inject(&mut self, constraint: Arc<dyn PlacementConstraint>) -> PlanResult<()> {
        constraint.inject(self)?;
        debug!("Constraint {} injected", constraint);
        self.injected.push(constraint);
        Ok(())
    }

    /// Declare nodes of the wider request that belong to another partition.
    /// Constraints naming them ignore them instead of failing.
    pub fn ignore_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) {
        self.foreign_nodes
            .extend(nodes.into_iter().filter(|n| !self.node_index.contains_key(&n.name)));
    }

    /// Build the objective. Further calls return the same variable.
    pub fn objective(&mut self) -> VarId {
        if let Some(cost) = self.cost {
            return cost;
        }
        let cost = cost::sum_tree(&mut self.solver, &self.cost_terms, self.sum_chunk_size);
        self.cost = Some(cost);
        cost
    }

    /// Minimize the objective. The solver is back at its root level
    /// afterwards.
    pub fn solve(&mut self, limits: SearchLimits) -> SearchResult {
        let objective = self.objective();
        let branchers = self.branchers();
        minimize(&mut self.solver, branchers, objective, limits)
    }

    /// Minimize the objective among solutions cheaper than `bound`
    pub fn solve_below(&mut self, limits: SearchLimits, bound: i32) -> SearchResult {
        let objective = self.objective();
        if self.solver.store_mut().set_ub(objective, bound - 1).is_err() {
            debug!("No solution can cost less than {}", bound);
        }
        self.solve(limits)
    }

    pub(super) fn node_constant(&mut self, node: usize) -> VarId {
        if let Some(var) = self.node_constants[node] {
            return var;
        }
        let var = self
            .solver
            .constant(format!("{}.index", self.nodes[node].name), node as i32);
        self.node_constants[node] = Some(var);
        var
    }

    pub(super) fn add_slice(&mut self, slice: Slice, domain: Vec<i32>) {
        self.slices.push(slice);
        self.slice_domains.push(domain);
    }

    pub(super) fn source_location(&self, vm: &VirtualMachine) -> Option<usize> {
        self.source.location(vm).and_then(|n| self.node_idx(n))
    }

    // Accessors used by placement constraints

    pub fn horizon(&self) -> i32 {
        self.horizon
    }

    pub fn source(&self) -> &Configuration {
        &self.source
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn vms(&self) -> &[VirtualMachine] {
        &self.vms
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    pub fn vm(&self, idx: usize) -> &VirtualMachine {
        &self.vms[idx]
    }

    pub fn node_idx(&self, node: &Node) -> Option<usize> {
        self.node_index.get(&node.name).copied()
    }

    pub fn vm_idx(&self, vm: &VirtualMachine) -> Option<usize> {
        self.vm_index.get(&vm.name).copied()
    }

    pub fn free_cpu(&self, node: usize) -> i64 {
        self.free_cpu[node]
    }

    pub fn free_memory(&self, node: usize) -> i64 {
        self.free_memory[node]
    }

    pub fn vm_model(&self, vm: usize) -> &VmActionModel {
        &self.vm_models[vm]
    }

    pub fn node_model(&self, node: usize) -> &NodeActionModel {
        &self.node_models[node]
    }

    /// Map elements named by a constraint to problem indices. Nodes of
    /// another partition are dropped, other unknown elements fail the
    /// injection.
    pub fn resolve(
        &self,
        constraint: &dyn fmt::Display,
        vms: &[&VirtualMachine],
        nodes: &[&Node],
    ) -> PlanResult<(Vec<usize>, Vec<usize>)> {
        let vm_ids = vms
            .iter()
            .map(|vm| {
                self.vm_idx(vm)
                    .ok_or_else(|| PlanError::injection(constraint, format!("unknown VM '{}'", vm)))
            })
            .collect::<PlanResult<Vec<_>>>()?;
        let node_ids = nodes
            .iter()
            .filter(|node| !self.foreign_nodes.contains(**node))
            .map(|node| {
                self.node_idx(node).ok_or_else(|| {
                    PlanError::injection(constraint, format!("unknown node '{}'", node))
                })
            })
            .collect::<PlanResult<Vec<_>>>()?;
        Ok((vm_ids, node_ids))
    }

    /// Hoster variable of a VM that runs at the end of the plan. Other VMs
    /// are logged and ignored.
    pub fn running_hoster(&self, constraint: &dyn fmt::Display, vm: usize) -> Option<VarId> {
        let model = &self.vm_models[vm];
        if model.transition.ends_running() {
            model.hoster
        } else {
            debug!(
                "{}: ignoring VM {} that will not be running",
                constraint, self.vms[vm]
            );
            None
        }
    }

    /// Hoster variables of every VM running at the end of the plan
    pub fn running_hosters(&self) -> Vec<(usize, VarId)> {
        self.vm_models
            .iter()
            .filter(|m| m.transition.ends_running())
            .filter_map(|m| m.hoster.map(|h| (m.vm, h)))
            .collect()
    }

    /// Keep the values of a variable satisfying `keep`. Returns `false` when
    /// no value is left, the problem is then infeasible.
    pub fn restrict(&mut self, var: VarId, keep: impl FnMut(i32) -> bool) -> bool {
        if self.solver.store_mut().retain(var, keep).is_err() {
            warn!(
                "Domain of {} wiped out, the problem is infeasible",
                self.solver.store().name(var)
            );
            return false;
        }
        true
    }

    pub fn post(&mut self, propagator: impl Propagator + 'static) {
        self.solver.post(propagator);
    }

    /// Variable selecting one of `groups` (node values), shared by every
    /// constraint over the same groups. Returns the groups in the order
    /// the variable values refer to.
    pub fn group_var(&mut self, mut groups: Vec<Vec<i32>>) -> (VarId, Vec<Vec<i32>>) {
        for group in &mut groups {
            group.sort_unstable();
            group.dedup();
        }
        groups.sort();
        if let Some(var) = self.group_vars.get(&groups) {
            return (*var, groups);
        }
        let var = self.solver.new_var(
            format!("group#{}", self.group_vars.len()),
            Domain::enumerated(0..groups.len() as i32),
        );
        self.group_vars.insert(groups.clone(), var);
        (var, groups)
    }

    pub(super) fn slices(&self) -> &[Slice] {
        &self.slices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::testing::{cluster, nodes, problem, solve, vms};
    use crate::constraints::Fence;

    #[test]
    fn test_restrict_to_nothing_is_infeasible() {
        let (nodes, vms) = (nodes(2, 4, 4096), vms(1, 1, 512));
        let mut p = problem(&cluster(&nodes, &vms, &[0]));
        let hoster = p.vm_model(0).hoster.unwrap();
        assert!(p.restrict(hoster, |n| n != 1));
        assert!(!p.restrict(hoster, |_| false));
        assert_eq!(solve(p), None);
    }

    #[test]
    fn test_foreign_nodes_are_ignored() {
        let (nodes, vms) = (nodes(2, 4, 4096), vms(1, 1, 512));
        let far = Node::new("N9", 4, 4096);
        let fence = Arc::new(Fence::new(&vms, [&nodes[1], &far]));

        let mut p = problem(&cluster(&nodes, &vms, &[0]));
        assert!(p.inject(fence.clone()).is_err(), "unknown node fails the injection");

        let mut p = problem(&cluster(&nodes, &vms, &[0]));
        p.ignore_nodes([far, nodes[0].clone()]);
        let named = [&nodes[0], &nodes[1], &Node::new("N9", 1, 1)];
        let (_, ids) = p.resolve(&fence, &[], &named).unwrap();
        assert_eq!(ids, vec![0, 1], "known nodes are never ignored");
        p.inject(fence).unwrap();
        let dst = solve(p).unwrap();
        assert_eq!(dst.location(&vms[0]), Some(&nodes[1]));
    }
}
