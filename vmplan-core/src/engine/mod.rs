//! Reconfiguration planning engine.
//!
//! A [`Planner`] turns a source configuration, the requested states and a
//! set of placement constraints into a [`Plan`]:
//!
//! 1. the request is checked and, in repair mode, the VMs allowed to move
//!    are selected,
//! 2. the request is optionally split into independent partitions,
//! 3. each partition is modelled as a [`ReconfigurationProblem`] and
//!    solved by branch-and-bound, by default first in repair mode and then
//!    below the cost of that first plan,
//! 4. the plans of the partitions are extracted, checked and merged.

pub mod cost;
mod extract;
mod heuristic;
pub mod models;
pub mod packing;
pub mod partition;
pub mod problem;
pub mod slice;
pub mod targets;

pub use models::{NodeActionModel, NodeTransition, VmActionModel, VmTransition};
pub use partition::{partition, Partition};
pub use problem::{ProblemSettings, ReconfigurationProblem};
pub use targets::TargetStates;

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{PartitionMode, PlannerConfig};
use crate::configuration::{Configuration, Usage};
use crate::constraints::PlacementConstraint;
use crate::duration::DurationEvaluator;
use crate::error::{PlanError, PlanResult};
use crate::plan::Plan;
use crate::solver::{SearchLimits, SearchStatus, SolvingStatistics};
use crate::types::VirtualMachine;

/// Result of a planning call
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    /// The plan is optimal
    Solved(Plan),
    /// The search was interrupted, with the best plan found so far if any
    TimedOut(Option<Plan>),
    /// No plan satisfies the request
    Infeasible,
}

impl PlanOutcome {
    pub fn plan(&self) -> Option<&Plan> {
        match self {
            PlanOutcome::Solved(plan) | PlanOutcome::TimedOut(Some(plan)) => Some(plan),
            PlanOutcome::TimedOut(None) | PlanOutcome::Infeasible => None,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, PlanOutcome::Solved(_))
    }

    /// Combine the outcomes of independent partitions
    fn merge(outcomes: Vec<PlanOutcome>) -> PlanResult<PlanOutcome> {
        if outcomes.iter().any(|o| *o == PlanOutcome::Infeasible) {
            return Ok(PlanOutcome::Infeasible);
        }
        let solved = outcomes.iter().all(PlanOutcome::is_solved);
        let mut merged: Option<Plan> = None;
        for outcome in &outcomes {
            let Some(plan) = outcome.plan() else {
                return Ok(PlanOutcome::TimedOut(None));
            };
            merged = Some(match merged {
                None => plan.clone(),
                Some(acc) => acc.merge(plan)?,
            });
        }
        match (merged, solved) {
            (Some(plan), true) => Ok(PlanOutcome::Solved(plan)),
            (plan, _) => Ok(PlanOutcome::TimedOut(plan)),
        }
    }
}

/// Everything a partition needs to be solved on its own thread
#[derive(Debug, Clone)]
struct SolveTask {
    partition: Partition,
    settings: ProblemSettings,
    limits: SearchLimits,
    /// The request was split: every constraint must be injected
    split: bool,
    repair_first: bool,
}

impl SolveTask {
    /// Model the partition with its constraints
    fn problem(
        &self,
        manageable: Option<BTreeSet<VirtualMachine>>,
    ) -> PlanResult<ReconfigurationProblem> {
        let settings = ProblemSettings {
            manageable,
            ..self.settings.clone()
        };
        let partition = &self.partition;
        let mut problem =
            ReconfigurationProblem::new(&partition.source, &partition.targets, &settings)?;
        problem.ignore_nodes(partition.foreign_nodes.iter().cloned());
        for constraint in &partition.constraints {
            match problem.inject(constraint.clone()) {
                Ok(()) => {}
                // a partition holds every element of its constraints
                Err(e) if self.split => {
                    return Err(PlanError::internal(format!(
                        "constraint {} does not fit its partition: {}",
                        constraint, e
                    )));
                }
                Err(e) => warn!("Skipping constraint {}: {}", constraint, e),
            }
        }
        Ok(problem)
    }

    fn run(self) -> PlanResult<(PlanOutcome, SolvingStatistics)> {
        if self.settings.manageable.is_some() || !self.repair_first {
            let mut problem = self.problem(self.settings.manageable.clone())?;
            let result = problem.solve(self.limits);
            debug!("Search finished: {}", result.statistics);
            let outcome = match (result.status, result.best) {
                (SearchStatus::Optimal, Some(best)) => {
                    PlanOutcome::Solved(problem.extract(&best)?)
                }
                (SearchStatus::LimitReached, best) => {
                    PlanOutcome::TimedOut(best.map(|b| problem.extract(&b)).transpose()?)
                }
                (SearchStatus::Infeasible, _) | (SearchStatus::Optimal, None) => {
                    PlanOutcome::Infeasible
                }
            };
            return Ok((outcome, result.statistics));
        }

        // a plan moving only what must move bounds the full search
        let partition = &self.partition;
        let manageable =
            Planner::repair_set(&partition.source, &partition.targets, &partition.constraints);
        debug!("Repair search over {} manageable VMs", manageable.len());
        let mut repair = self.problem(Some(manageable))?;
        let first = repair.solve(self.limits);
        debug!("Repair search finished: {}", first.statistics);
        let fallback = first
            .best
            .as_ref()
            .map(|best| repair.extract(best))
            .transpose()?;

        let mut full = self.problem(None)?;
        let limits = self.limits.remaining(&first.statistics);
        let second = match &first.best {
            Some(best) => full.solve_below(limits, best.objective),
            None => full.solve(limits),
        };
        debug!("Search finished: {}", second.statistics);
        let mut statistics = first.statistics;
        statistics.absorb(second.statistics);

        let outcome = match (second.status, second.best, fallback) {
            (SearchStatus::Optimal, Some(best), _) => PlanOutcome::Solved(full.extract(&best)?),
            (SearchStatus::LimitReached, Some(best), _) => {
                PlanOutcome::TimedOut(Some(full.extract(&best)?))
            }
            (SearchStatus::LimitReached, None, fallback) => PlanOutcome::TimedOut(fallback),
            // nothing beats the repair plan
            (SearchStatus::Infeasible | SearchStatus::Optimal, _, Some(plan)) => {
                PlanOutcome::Solved(plan)
            }
            (SearchStatus::Infeasible | SearchStatus::Optimal, _, None) => PlanOutcome::Infeasible,
        };
        Ok((outcome, statistics))
    }
}

/// Computes reconfiguration plans
#[derive(Debug)]
pub struct Planner {
    config: PlannerConfig,
    durations: Arc<dyn DurationEvaluator>,
    statistics: Vec<SolvingStatistics>,
}

impl Planner {
    /// A planner estimating durations with `config.durations`
    pub fn new(config: PlannerConfig) -> Self {
        let durations = Arc::new(config.durations.clone());
        Self {
            config,
            durations,
            statistics: Vec::new(),
        }
    }

    /// Use another duration estimator than the configured one
    pub fn with_durations(mut self, durations: Arc<dyn DurationEvaluator>) -> Self {
        self.durations = durations;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Statistics of the last call, one entry per solved (sub-)problem
    pub fn statistics(&self) -> &[SolvingStatistics] {
        &self.statistics
    }

    /// VMs that may move in repair mode: those changing state, those
    /// misplaced by a constraint, those on a node overloaded by demand and
    /// those on a node going offline
    pub fn repair_set(
        source: &Configuration,
        targets: &TargetStates,
        constraints: &[Arc<dyn PlacementConstraint>],
    ) -> BTreeSet<VirtualMachine> {
        let mut manageable: BTreeSet<VirtualMachine> = source
            .all_vms()
            .into_iter()
            .filter(|vm| targets.vm_state(vm).ok() != Some(source.vm_state(vm)))
            .cloned()
            .collect();
        for constraint in constraints {
            manageable.extend(constraint.misplaced(source));
        }
        let leaving = source
            .overloaded_nodes(Usage::Demand)
            .into_iter()
            .chain(source.online_nodes().into_iter().filter(|n| targets.off.contains(*n)));
        for node in leaving {
            manageable.extend(source.runnings_on(node).into_iter().cloned());
        }
        manageable
    }

    fn settings(&self, manageable: Option<BTreeSet<VirtualMachine>>) -> ProblemSettings {
        ProblemSettings {
            durations: self.durations.clone(),
            max_horizon: self.config.solver.max_horizon,
            sum_chunk_size: self.config.solver.sum_chunk_size,
            manageable,
        }
    }

    fn limits(&self) -> SearchLimits {
        SearchLimits {
            timeout: Some(self.config.solver.timeout),
            node_limit: self.config.solver.node_limit,
        }
    }

    /// Check the request and split it in solve tasks
    fn prepare(
        &self,
        source: &Configuration,
        targets: &TargetStates,
        constraints: &[Arc<dyn PlacementConstraint>],
        split: bool,
    ) -> PlanResult<Vec<SolveTask>> {
        targets.check(source)?;
        let manageable = self
            .config
            .solver
            .repair
            .then(|| Self::repair_set(source, targets, constraints));
        if let Some(set) = &manageable {
            info!("Repair mode: {} manageable VMs", set.len());
        }

        let partitions = if split {
            // elements unknown to the request are skipped as a single
            // problem would, partitions must resolve everything else
            let known: Vec<Arc<dyn PlacementConstraint>> = constraints
                .iter()
                .filter(|c| {
                    let unknown_vm = c
                        .vms()
                        .into_iter()
                        .any(|vm| !source.contains_vm(vm) && targets.vm_state(vm).is_err());
                    let unknown_node = c.nodes().into_iter().any(|n| !source.contains_node(n));
                    if unknown_vm || unknown_node {
                        warn!("Skipping constraint {}: unknown element", c);
                    }
                    !unknown_vm && !unknown_node
                })
                .cloned()
                .collect();
            partition(source, targets, &known, manageable.as_ref())
        } else {
            vec![Partition::whole(source, targets, constraints)]
        };
        let tasks = partitions
            .into_iter()
            .map(|partition| SolveTask {
                partition,
                settings: self.settings(manageable.clone()),
                limits: self.limits(),
                split,
                repair_first: self.config.solver.repair_first,
            })
            .collect();
        Ok(tasks)
    }

    fn finish(
        &mut self,
        results: Vec<(PlanOutcome, SolvingStatistics)>,
    ) -> PlanResult<PlanOutcome> {
        let (outcomes, statistics): (Vec<_>, Vec<_>) = results.into_iter().unzip();
        self.statistics = statistics;
        let outcome = PlanOutcome::merge(outcomes)?;
        match &outcome {
            PlanOutcome::Solved(plan) => info!(
                "Plan computed: {} actions, duration {}, cost {}",
                plan.len(),
                plan.duration(),
                plan.cost()
            ),
            PlanOutcome::TimedOut(Some(plan)) => warn!(
                "Search interrupted, best plan has {} actions and cost {}",
                plan.len(),
                plan.cost()
            ),
            PlanOutcome::TimedOut(None) => warn!("Search interrupted before any plan was found"),
            PlanOutcome::Infeasible => info!("No plan satisfies the request"),
        }
        Ok(outcome)
    }

    /// Compute a plan on the current thread. Partitions, when enabled, are
    /// solved one after the other.
    pub fn compute(
        &mut self,
        source: &Configuration,
        targets: &TargetStates,
        constraints: &[Arc<dyn PlacementConstraint>],
    ) -> PlanResult<PlanOutcome> {
        let split = self.config.solver.partitioning != PartitionMode::Disabled;
        info!(
            "Computing plan for {} nodes, {} VMs, {} constraints",
            source.all_nodes().len(),
            source.all_vms().len(),
            constraints.len()
        );
        let tasks = self.prepare(source, targets, constraints, split)?;
        let count = tasks.len();
        let mut results = Vec::with_capacity(count);
        for (i, task) in tasks.into_iter().enumerate() {
            info!(
                "Solving partition {}/{}: {} nodes, {} VMs",
                i + 1,
                count,
                task.partition.num_nodes(),
                task.partition.num_vms()
            );
            results.push(task.run()?);
        }
        self.finish(results)
    }

    /// Compute a plan with every partition solved on its own blocking task
    pub async fn compute_parallel(
        &mut self,
        source: &Configuration,
        targets: &TargetStates,
        constraints: &[Arc<dyn PlacementConstraint>],
    ) -> PlanResult<PlanOutcome> {
        info!(
            "Computing plan in parallel for {} nodes, {} VMs, {} constraints",
            source.all_nodes().len(),
            source.all_vms().len(),
            constraints.len()
        );
        let tasks = self.prepare(source, targets, constraints, true)?;
        info!("Solving {} partitions in parallel", tasks.len());
        let handles = tasks
            .into_iter()
            .map(|task| tokio::task::spawn_blocking(move || task.run()));
        let mut results = Vec::new();
        for joined in futures::future::join_all(handles).await {
            results.push(joined??);
        }
        self.finish(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{Ban, Fence};
    use crate::plan::{Action, ActionKind};
    use crate::types::{Node, VmState};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use test_case::test_case;

    fn planner(mode: PartitionMode) -> Planner {
        let mut config = PlannerConfig::default();
        config.solver.timeout = Duration::from_secs(10);
        config.solver.partitioning = mode;
        config.durations = crate::config::DurationConfig::uniform(2);
        Planner::new(config)
    }

    fn two_racks() -> (Configuration, Vec<Node>, Vec<VirtualMachine>) {
        let nodes: Vec<Node> = (1..=4).map(|i| Node::new(format!("N{}", i), 4, 4096)).collect();
        let vms: Vec<VirtualMachine> =
            (1..=4).map(|i| VirtualMachine::new(format!("VM{}", i), 1, 1024)).collect();
        let mut cfg = Configuration::new();
        for node in &nodes {
            cfg.add_online(node);
        }
        for (vm, node) in vms.iter().zip([&nodes[0], &nodes[0], &nodes[2], &nodes[2]]) {
            cfg.set_run_on(vm, node);
        }
        (cfg, nodes, vms)
    }

    fn fences(nodes: &[Node], vms: &[VirtualMachine]) -> Vec<Arc<dyn PlacementConstraint>> {
        vec![
            Arc::new(Fence::new(&vms[..2], &nodes[..2])),
            Arc::new(Fence::new(&vms[2..], &nodes[2..])),
        ]
    }

    #[test]
    fn test_nothing_to_do() {
        let (src, _, _) = two_racks();
        let targets = TargetStates::new().keep(&src);
        let mut planner = planner(PartitionMode::Disabled);
        let outcome = planner.compute(&src, &targets, &[]).unwrap();
        let PlanOutcome::Solved(plan) = outcome else {
            panic!("expected a plan, got {:?}", outcome);
        };
        assert!(plan.is_empty());
        assert_eq!(plan.destination(), &src);
        assert_eq!(planner.statistics().len(), 1);
    }

    #[test]
    fn test_partitioned_plan_matches_single_problem() {
        let (src, nodes, vms) = two_racks();
        let targets = TargetStates::new().off([&nodes[0], &nodes[2]]).keep(&src);
        let constraints = fences(&nodes, &vms);

        let mut single = planner(PartitionMode::Disabled);
        let whole = single.compute(&src, &targets, &constraints).unwrap();
        let mut split = planner(PartitionMode::Sequential);
        let parts = split.compute(&src, &targets, &constraints).unwrap();
        assert_eq!(split.statistics().len(), 2);

        let (whole, parts) = (whole.plan().unwrap(), parts.plan().unwrap());
        assert_eq!(whole.cost(), parts.cost());
        assert_eq!(whole.destination(), parts.destination());
        assert_eq!(parts.destination().runnings_on(&nodes[1]).len(), 2);
        assert_eq!(parts.destination().runnings_on(&nodes[3]).len(), 2);
    }

    #[tokio::test]
    async fn test_parallel_partitions() {
        let (src, nodes, vms) = two_racks();
        let targets = TargetStates::new().off([&nodes[0]]).keep(&src);
        let constraints = fences(&nodes, &vms);
        let mut planner = planner(PartitionMode::Parallel);
        let outcome = planner
            .compute_parallel(&src, &targets, &constraints)
            .await
            .unwrap();
        let plan = outcome.plan().unwrap();
        assert!(outcome.is_solved());
        assert_eq!(planner.statistics().len(), 2);
        // VM1 and VM2 leave N1 before it is switched off
        let shutdown = plan
            .actions()
            .iter()
            .find(|a| matches!(a.kind, ActionKind::Shutdown { .. }))
            .unwrap();
        let migrations: Vec<&Action> = plan
            .actions()
            .iter()
            .filter(|a| matches!(a.kind, ActionKind::Migration { .. }))
            .collect();
        assert_eq!(migrations.len(), 2);
        assert!(migrations.iter().all(|m| m.finish <= shutdown.start));
    }

    #[test]
    fn test_repair_mode_only_moves_what_it_must() {
        let (src, nodes, vms) = two_racks();
        let targets = TargetStates::new().keep(&src);
        let ban: Vec<Arc<dyn PlacementConstraint>> =
            vec![Arc::new(Ban::new([&vms[0]], [&nodes[0]]))];
        let manageable = Planner::repair_set(&src, &targets, &ban);
        assert_eq!(manageable.into_iter().collect::<Vec<_>>(), vec![vms[0].clone()]);

        let mut planner = planner(PartitionMode::Disabled);
        planner.config.solver.repair = true;
        let plan = planner.compute(&src, &targets, &ban).unwrap();
        let plan = plan.plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.actions()[0].vm(), Some(&vms[0]));
    }

    #[test]
    fn test_repair_first_falls_back_to_the_full_problem() {
        // x cannot leave N2 unless y makes room on N1 first
        let n1 = Node::new("N1", 2, 4096);
        let n2 = Node::new("N2", 2, 4096);
        let n3 = Node::new("N3", 1, 4096);
        let x = VirtualMachine::new("x", 2, 1024);
        let y = VirtualMachine::new("y", 1, 1024);
        let mut src = Configuration::new();
        for node in [&n1, &n2, &n3] {
            src.add_online(node);
        }
        src.set_run_on(&y, &n1);
        src.set_run_on(&x, &n2);
        let targets = TargetStates::new().off([&n2]).keep(&src);

        let mut repair_only = planner(PartitionMode::Disabled);
        repair_only.config.solver.repair = true;
        assert_eq!(
            repair_only.compute(&src, &targets, &[]).unwrap(),
            PlanOutcome::Infeasible
        );

        let mut planner = planner(PartitionMode::Disabled);
        assert!(planner.config.solver.repair_first);
        let outcome = planner.compute(&src, &targets, &[]).unwrap();
        let PlanOutcome::Solved(plan) = outcome else {
            panic!("expected a plan, got {:?}", outcome);
        };
        assert_eq!(plan.destination().location(&y), Some(&n3));
        assert_eq!(plan.destination().location(&x), Some(&n1));
        assert_eq!(planner.statistics().len(), 1);
        assert!(!planner.statistics()[0].solutions.is_empty());
    }

    #[test]
    fn test_infeasible_request() {
        let (src, nodes, vms) = two_racks();
        // everything on N1 must go but only N1 is allowed
        let targets = TargetStates::new().off([&nodes[0]]).keep(&src);
        let fence: Vec<Arc<dyn PlacementConstraint>> =
            vec![Arc::new(Fence::new(&vms[..2], [&nodes[0]]))];
        let mut planner = planner(PartitionMode::Disabled);
        assert_eq!(
            planner.compute(&src, &targets, &fence).unwrap(),
            PlanOutcome::Infeasible
        );
    }

    #[test_case(PartitionMode::Disabled; "single problem")]
    #[test_case(PartitionMode::Sequential; "partitioned")]
    fn test_skipped_constraint_does_not_abort(mode: PartitionMode) {
        let (src, _, vms) = two_racks();
        let ghost = Node::new("ghost", 1, 1);
        let targets = TargetStates::new().keep(&src);
        let ban: Vec<Arc<dyn PlacementConstraint>> = vec![Arc::new(Ban::new(&vms, [&ghost]))];
        let mut planner = planner(mode);
        assert!(planner.compute(&src, &targets, &ban).unwrap().is_solved());
    }

    #[test]
    fn test_partition_rejects_constraint_it_cannot_resolve() {
        let (src, nodes, vms) = two_racks();
        let targets = TargetStates::new().keep(&src);
        // the constraint names a VM the partition does not hold
        let partition = Partition {
            source: src.clone(),
            targets: targets.clone(),
            constraints: vec![Arc::new(Ban::new(
                [&vms[0], &VirtualMachine::new("elsewhere", 1, 1)],
                [&nodes[1]],
            ))],
            foreign_nodes: BTreeSet::new(),
        };
        let planner = planner(PartitionMode::Sequential);
        let task = SolveTask {
            partition,
            settings: planner.settings(None),
            limits: planner.limits(),
            split: true,
            repair_first: false,
        };
        let err = task.clone().run().unwrap_err();
        assert!(matches!(err, PlanError::InternalConsistency { .. }), "{}", err);

        let lenient = SolveTask { split: false, ..task };
        assert!(lenient.run().unwrap().0.is_solved());
    }

    #[test]
    fn test_model_errors_are_errors() {
        let (src, _, vms) = two_racks();
        let targets = TargetStates::new().keep(&src).wait([&vms[0]]);
        let mut planner = planner(PartitionMode::Disabled);
        let err = planner.compute(&src, &targets, &[]).unwrap_err();
        assert!(err.is_model_error());
        assert_eq!(
            src.vm_state(&vms[0]),
            VmState::Running,
            "the source is left untouched"
        );
    }
}
