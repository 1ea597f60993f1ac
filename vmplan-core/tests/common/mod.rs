// Shared helpers for the planner integration tests

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::time::Duration;

use vmplan_core::config::{DurationConfig, PartitionMode};
use vmplan_core::{
    ActionKind, Configuration, Node, Plan, Planner, PlannerConfig, VirtualMachine,
};

/// Search budget of the tests. Small problems are solved in milliseconds.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(20);

/// A planner where every action lasts `duration`
pub fn planner(duration: u32, partitioning: PartitionMode) -> Planner {
    let mut config = PlannerConfig::default();
    config.solver.timeout = TEST_TIMEOUT;
    config.solver.partitioning = partitioning;
    config.durations = DurationConfig::uniform(duration);
    Planner::new(config)
}

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
        assert!(cfg.add_online(node));
    }
    for (vm, n) in vms.iter().zip(placement) {
        assert!(cfg.set_run_on(vm, &nodes[*n]));
    }
    cfg
}

/// Check that no node exceeds its capacity at any moment of the plan, that
/// VMs only arrive on booted nodes and that nodes are empty when switched
/// off. VMs without action keep a constant usage.
pub fn assert_transient_capacity(plan: &Plan) {
    let src = plan.source();
    let moved: BTreeSet<&VirtualMachine> = plan.actions().iter().filter_map(|a| a.vm()).collect();
    let moments: BTreeSet<u32> = plan
        .actions()
        .iter()
        .flat_map(|a| [a.start, a.finish])
        .chain([0])
        .collect();

    for node in src.all_nodes() {
        let staying: Vec<&VirtualMachine> = src
            .runnings_on(node)
            .into_iter()
            .filter(|vm| !moved.contains(vm))
            .collect();
        for t in &moments {
            let mut cpu: u64 = staying.iter().map(|vm| vm.cpu_consumption as u64).sum();
            let mut memory: u64 = staying.iter().map(|vm| vm.memory_consumption as u64).sum();
            for action in plan.actions() {
                let (leaving, arriving) = match &action.kind {
                    ActionKind::Migration { from, to, .. } => (Some(from), Some(to)),
                    ActionKind::Suspend { from, .. } | ActionKind::Stop { from, .. } => {
                        (Some(from), None)
                    }
                    ActionKind::Resume { to, .. } | ActionKind::Run { to, .. } => (None, Some(to)),
                    ActionKind::Startup { .. } | ActionKind::Shutdown { .. } => (None, None),
                };
                let Some(vm) = action.vm() else { continue };
                if leaving == Some(node) && *t < action.finish {
                    cpu += vm.cpu_consumption as u64;
                    memory += vm.memory_consumption as u64;
                }
                if arriving == Some(node) && *t >= action.start {
                    cpu += vm.cpu_demand as u64;
                    memory += vm.memory_demand as u64;
                }
            }
            assert!(
                cpu <= node.cpu_capacity as u64 && memory <= node.memory_capacity as u64,
                "node {} overloaded at {}: cpu {}, memory {}\n{}",
                node,
                t,
                cpu,
                memory,
                plan
            );
        }
    }

    for action in plan.actions() {
        match &action.kind {
            ActionKind::Startup { node } => {
                for other in plan.actions() {
                    let arrives = matches!(&other.kind,
                        ActionKind::Migration { to, .. }
                        | ActionKind::Resume { to, .. }
                        | ActionKind::Run { to, .. } if to == node);
                    assert!(!arrives || other.start >= action.finish, "{}", plan);
                }
            }
            ActionKind::Shutdown { node } => {
                for other in plan.actions() {
                    let leaves = matches!(&other.kind,
                        ActionKind::Migration { from, .. }
                        | ActionKind::Suspend { from, .. }
                        | ActionKind::Stop { from, .. } if from == node);
                    assert!(!leaves || other.finish <= action.start, "{}", plan);
                }
                assert!(src.runnings_on(node).iter().all(|vm| moved.contains(vm)));
            }
            _ => {}
        }
    }
}

/// Re-apply the actions of a plan to its source
pub fn replay(plan: &Plan) -> Configuration {
    let mut cfg = plan.source().clone();
    assert!(plan.apply(&mut cfg), "plan does not apply to its source");
    cfg
}
