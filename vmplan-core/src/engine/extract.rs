//! Turning a solution into a plan, and checking the plan against the model.

use tracing::debug;

use super::models::{NodeTransition, VmTransition};
use super::problem::ReconfigurationProblem;
use super::slice::Profile;
use crate::configuration::{Configuration, Usage};
use crate::error::{PlanError, PlanResult};
use crate::plan::{Action, ActionKind, Plan};
use crate::solver::{Solution, VarId};

impl ReconfigurationProblem {
    fn moment(solution: &Solution, var: VarId) -> u32 {
        solution.value(var).max(0) as u32
    }

    fn hoster_of(&self, solution: &Solution, vm: usize) -> PlanResult<usize> {
        let model = &self.vm_models[vm];
        let var = model.hoster.ok_or_else(|| {
            PlanError::internal(format!("VM '{}' has no hoster variable", self.vms[vm]))
        })?;
        usize::try_from(solution.value(var))
            .ok()
            .filter(|n| *n < self.nodes.len())
            .ok_or_else(|| {
                PlanError::internal(format!("VM '{}' has an invalid hoster", self.vms[vm]))
            })
    }

    fn current_of(&self, vm: usize) -> PlanResult<usize> {
        self.vm_models[vm].current.ok_or_else(|| {
            PlanError::internal(format!("VM '{}' has no current node", self.vms[vm]))
        })
    }

    fn actions(&self, solution: &Solution) -> PlanResult<Vec<Action>> {
        let mut actions = Vec::new();
        let timed = |start: VarId, end: VarId, kind: ActionKind| {
            Action::new(Self::moment(solution, start), Self::moment(solution, end), kind)
        };

        for model in &self.node_models {
            if model.transition == NodeTransition::Boot {
                let node = self.nodes[model.node].clone();
                actions.push(timed(model.start, model.end, ActionKind::Startup { node }));
            }
        }

        for model in &self.vm_models {
            let vm = self.vms[model.vm].clone();
            let kind = match model.transition {
                VmTransition::Relocation => {
                    let (from, to) = (self.current_of(model.vm)?, self.hoster_of(solution, model.vm)?);
                    if from == to {
                        continue;
                    }
                    ActionKind::Migration {
                        vm,
                        from: self.nodes[from].clone(),
                        to: self.nodes[to].clone(),
                    }
                }
                VmTransition::Suspend => {
                    let from = self.nodes[self.current_of(model.vm)?].clone();
                    let to = self.nodes[self.hoster_of(solution, model.vm)?].clone();
                    ActionKind::Suspend { vm, from, to }
                }
                VmTransition::Resume => ActionKind::Resume {
                    vm,
                    from: self.nodes[self.current_of(model.vm)?].clone(),
                    to: self.nodes[self.hoster_of(solution, model.vm)?].clone(),
                },
                VmTransition::Run => ActionKind::Run {
                    vm,
                    to: self.nodes[self.hoster_of(solution, model.vm)?].clone(),
                },
                VmTransition::Stop => ActionKind::Stop {
                    vm,
                    from: self.nodes[self.current_of(model.vm)?].clone(),
                },
                VmTransition::StaySleeping
                | VmTransition::StayWaiting
                | VmTransition::StayTerminated => continue,
            };
            actions.push(timed(model.start, model.end, kind));
        }

        for model in &self.node_models {
            if model.transition == NodeTransition::Shutdown {
                let node = self.nodes[model.node].clone();
                actions.push(timed(model.start, model.end, ActionKind::Shutdown { node }));
            }
        }
        Ok(actions)
    }

    /// The destination as decided by the model
    fn model_destination(&self, solution: &Solution) -> PlanResult<Configuration> {
        let mut dst = Configuration::new();
        for (i, node) in self.nodes.iter().enumerate() {
            let online = self.target_online.contains(&(i as i32));
            if online {
                dst.add_online(node);
            } else {
                dst.add_offline(node);
            }
        }
        for model in &self.vm_models {
            let vm = &self.vms[model.vm];
            let placed = match model.transition {
                VmTransition::Relocation | VmTransition::Resume | VmTransition::Run => {
                    dst.set_run_on(vm, &self.nodes[self.hoster_of(solution, model.vm)?])
                }
                VmTransition::Suspend | VmTransition::StaySleeping => {
                    dst.set_sleep_on(vm, &self.nodes[self.hoster_of(solution, model.vm)?])
                }
                VmTransition::StayWaiting => dst.add_waiting(vm),
                VmTransition::Stop | VmTransition::StayTerminated => true,
            };
            if !placed {
                return Err(PlanError::internal(format!(
                    "VM '{}' cannot be placed in the model destination",
                    vm
                )));
            }
        }
        Ok(dst)
    }

    /// Resource usage over time of every node, as realized by the solution
    fn check_profiles(&self, solution: &Solution) -> PlanResult<()> {
        let mut parts: Vec<Vec<(i32, i32, usize)>> = vec![Vec::new(); self.nodes.len()];
        for (s, slice) in self.slices().iter().enumerate() {
            let Some(node) = usize::try_from(solution.value(slice.hoster))
                .ok()
                .filter(|n| *n < self.nodes.len())
            else {
                return Err(PlanError::internal("slice assigned to an unknown node"));
            };
            if let Some((start, end)) =
                slice.realized(solution.value(slice.start), solution.value(slice.end))
            {
                parts[node].push((start, end, s));
            }
        }
        for (n, node_parts) in parts.iter().enumerate() {
            let node = &self.nodes[n];
            let capacities = [node.cpu_capacity as i64, node.memory_capacity as i64];
            for (d, capacity) in capacities.iter().enumerate() {
                let profile = Profile::build(
                    node_parts
                        .iter()
                        .map(|(a, b, s)| (*a, *b, self.slices()[*s].height(d))),
                );
                if profile.peak() > *capacity {
                    return Err(PlanError::internal(format!(
                        "node '{}' is overloaded during the reconfiguration",
                        node
                    )));
                }
            }
        }
        Ok(())
    }

    /// Build the plan of a solution and check it against the model
    pub fn extract(&self, solution: &Solution) -> PlanResult<Plan> {
        let plan = Plan::from_actions(self.source.clone(), self.actions(solution)?)?;

        let cost = plan.cost();
        if cost != solution.objective.max(0) as u64 {
            return Err(PlanError::internal(format!(
                "plan cost {} differs from the objective {}",
                cost, solution.objective
            )));
        }

        let expected = self.model_destination(solution)?;
        if plan.destination() != &expected {
            return Err(PlanError::internal(
                "destination of the plan differs from the model destination",
            ));
        }

        if let Some(node) = plan.destination().overloaded_nodes(Usage::Demand).first() {
            return Err(PlanError::internal(format!(
                "node '{}' is overloaded in the destination",
                node
            )));
        }

        self.check_profiles(solution)?;

        for constraint in &self.injected {
            if !constraint.is_satisfied(plan.destination()) {
                return Err(PlanError::internal(format!(
                    "constraint {} is not satisfied by the destination",
                    constraint
                )));
            }
        }

        debug!(
            "Plan extracted: {} actions, duration {}, cost {}",
            plan.len(),
            plan.duration(),
            cost
        );
        Ok(plan)
    }
}
