//! Reconfiguration plans.

pub mod action;

pub use action::{Action, ActionKind};

use std::collections::BTreeSet;
use std::fmt;

use crate::configuration::Configuration;
use crate::error::{PlanError, PlanResult};

/// Timed actions leading a source configuration to a destination.
///
/// Actions are kept sorted by start moment, then boots before VM actions
/// before node shutdowns, then finish moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    source: Configuration,
    destination: Configuration,
    actions: Vec<Action>,
}

impl Plan {
    /// A plan without actions
    pub fn empty(source: Configuration) -> Self {
        Self {
            destination: source.clone(),
            source,
            actions: Vec::new(),
        }
    }

    /// Build a plan by applying `actions` to `source` in plan order
    pub fn from_actions(source: Configuration, mut actions: Vec<Action>) -> PlanResult<Self> {
        actions.sort();
        let mut destination = source.clone();
        for action in &actions {
            if !action.apply(&mut destination) {
                return Err(PlanError::internal(format!(
                    "action {} at {} cannot be applied",
                    action, action.start
                )));
            }
        }
        Ok(Self {
            source,
            destination,
            actions,
        })
    }

    pub fn source(&self) -> &Configuration {
        &self.source
    }

    pub fn destination(&self) -> &Configuration {
        &self.destination
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Moment the last action finishes
    pub fn duration(&self) -> u32 {
        self.actions.iter().map(|a| a.finish).max().unwrap_or(0)
    }

    /// Sum of the finish moments of the actions
    pub fn cost(&self) -> u64 {
        self.actions.iter().map(|a| a.finish as u64).sum()
    }

    /// Apply every action in order. Stops and returns `false` at the first
    /// action that does not apply.
    pub fn apply(&self, cfg: &mut Configuration) -> bool {
        self.actions.iter().all(|a| a.apply(cfg))
    }

    /// Combine plans computed over independent parts of a cluster
    pub fn merge(&self, other: &Plan) -> PlanResult<Plan> {
        let source = self
            .source
            .merge(&other.source)
            .map_err(|reason| PlanError::NonMergeablePlans { reason })?;
        let actions = self
            .actions
            .iter()
            .chain(other.actions.iter())
            .cloned()
            .collect();
        Self::from_actions(source, actions)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let moments: BTreeSet<u32> = self
            .actions
            .iter()
            .flat_map(|a| [a.start, a.finish])
            .collect();
        let mut first = true;
        for moment in moments {
            if !first {
                writeln!(f)?;
            }
            first = false;
            write!(f, "{}:", moment)?;
            for action in self.actions.iter().filter(|a| a.finish == moment) {
                write!(f, " stop({})", action)?;
            }
            for action in self.actions.iter().filter(|a| a.start == moment) {
                write!(f, " start({})", action)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Node, VirtualMachine};
    use pretty_assertions::assert_eq;

    fn two_nodes() -> (Configuration, Node, Node) {
        let n1 = Node::new("N1", 4, 4096);
        let n2 = Node::new("N2", 4, 4096);
        let mut cfg = Configuration::new();
        cfg.add_online(&n1);
        cfg.add_online(&n2);
        (cfg, n1, n2)
    }

    #[test]
    fn test_from_actions_computes_destination() {
        let (mut src, n1, n2) = two_nodes();
        let vm = VirtualMachine::new("VM1", 1, 1024);
        src.set_run_on(&vm, &n1);
        let plan = Plan::from_actions(
            src.clone(),
            vec![
                Action::new(6, 10, ActionKind::Shutdown { node: n1.clone() }),
                Action::new(
                    0,
                    6,
                    ActionKind::Migration {
                        vm: vm.clone(),
                        from: n1.clone(),
                        to: n2.clone(),
                    },
                ),
            ],
        )
        .unwrap();
        assert_eq!(plan.duration(), 10);
        assert_eq!(plan.cost(), 16);
        assert_eq!(plan.destination().location(&vm), Some(&n2));
        assert!(plan.destination().is_offline(&n1));
        assert_eq!(
            plan.to_string(),
            "0: start(migrate(VM1,N1,N2))\n6: stop(migrate(VM1,N1,N2)) start(shutdown(N1))\n10: stop(shutdown(N1))"
        );

        let mut replay = src;
        assert!(plan.apply(&mut replay));
        assert_eq!(&replay, plan.destination());
    }

    #[test]
    fn test_inapplicable_action_is_internal_error() {
        let (src, n1, _) = two_nodes();
        let err = Plan::from_actions(
            src,
            vec![Action::new(0, 2, ActionKind::Stop {
                vm: VirtualMachine::new("ghost", 1, 1),
                from: n1,
            })],
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InternalConsistency { .. }));
    }

    #[test]
    fn test_merge() {
        let (mut left_src, n1, n2) = two_nodes();
        left_src.remove_node(&n2);
        let a = VirtualMachine::new("A", 1, 1);
        left_src.add_waiting(&a);
        let left = Plan::from_actions(
            left_src,
            vec![Action::new(0, 3, ActionKind::Run { vm: a, to: n1.clone() })],
        )
        .unwrap();

        let mut right_src = Configuration::new();
        right_src.add_online(&n2);
        let b = VirtualMachine::new("B", 1, 1);
        right_src.set_run_on(&b, &n2);
        let right = Plan::from_actions(
            right_src,
            vec![Action::new(1, 2, ActionKind::Stop { vm: b, from: n2 })],
        )
        .unwrap();

        let merged = left.merge(&right).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.actions()[0].start, 0);
        assert_eq!(merged.destination().running_vms().len(), 1);

        let err = left.merge(&left).unwrap_err();
        assert!(matches!(err, PlanError::NonMergeablePlans { .. }));
    }
}
