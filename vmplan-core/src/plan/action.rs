//! Concrete reconfiguration actions.

use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

use crate::configuration::Configuration;
use crate::types::{Node, VirtualMachine, VmState};

/// What an action does
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActionKind {
    /// Live migration of a running VM
    Migration {
        vm: VirtualMachine,
        from: Node,
        to: Node,
    },
    /// Suspend a running VM to disk. `to` is the node keeping the image.
    Suspend {
        vm: VirtualMachine,
        from: Node,
        to: Node,
    },
    /// Resume a sleeping VM, locally when `from == to`
    Resume {
        vm: VirtualMachine,
        from: Node,
        to: Node,
    },
    /// Start a waiting VM
    Run { vm: VirtualMachine, to: Node },
    /// Stop a running VM for good
    Stop { vm: VirtualMachine, from: Node },
    /// Boot an offline node
    Startup { node: Node },
    /// Power off an online node
    Shutdown { node: Node },
}

/// A timed action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Action {
    pub start: u32,
    pub finish: u32,
    #[serde(flatten)]
    pub kind: ActionKind,
}

fn runs_on(cfg: &Configuration, vm: &VirtualMachine, node: &Node) -> bool {
    cfg.vm_state(vm) == VmState::Running && cfg.location(vm) == Some(node)
}

fn sleeps_on(cfg: &Configuration, vm: &VirtualMachine, node: &Node) -> bool {
    cfg.vm_state(vm) == VmState::Sleeping && cfg.location(vm) == Some(node)
}

impl Action {
    pub fn new(start: u32, finish: u32, kind: ActionKind) -> Self {
        Self {
            start,
            finish,
            kind,
        }
    }

    pub fn duration(&self) -> u32 {
        self.finish.saturating_sub(self.start)
    }

    /// The VM the action manipulates, if any
    pub fn vm(&self) -> Option<&VirtualMachine> {
        match &self.kind {
            ActionKind::Migration { vm, .. }
            | ActionKind::Suspend { vm, .. }
            | ActionKind::Resume { vm, .. }
            | ActionKind::Run { vm, .. }
            | ActionKind::Stop { vm, .. } => Some(vm),
            ActionKind::Startup { .. } | ActionKind::Shutdown { .. } => None,
        }
    }

    /// Boots first, node shutdowns last
    pub fn rank(&self) -> u8 {
        match self.kind {
            ActionKind::Startup { .. } => 0,
            ActionKind::Shutdown { .. } => 2,
            _ => 1,
        }
    }

    /// Whether the action is consistent with the declared transition from
    /// `src` to `dst`
    pub fn is_compatible_with(&self, src: &Configuration, dst: &Configuration) -> bool {
        match &self.kind {
            ActionKind::Migration { vm, from, to } => {
                from != to && runs_on(src, vm, from) && runs_on(dst, vm, to)
            }
            ActionKind::Suspend { vm, from, to } => runs_on(src, vm, from) && sleeps_on(dst, vm, to),
            ActionKind::Resume { vm, from, to } => sleeps_on(src, vm, from) && runs_on(dst, vm, to),
            ActionKind::Run { vm, to } => {
                src.vm_state(vm) == VmState::Waiting && runs_on(dst, vm, to)
            }
            ActionKind::Stop { vm, from } => {
                runs_on(src, vm, from) && dst.vm_state(vm) == VmState::Terminated
            }
            ActionKind::Startup { node } => src.is_offline(node) && dst.is_online(node),
            ActionKind::Shutdown { node } => src.is_online(node) && dst.is_offline(node),
        }
    }

    /// Apply the effect of the action. Returns `false` and leaves the
    /// configuration untouched when the action does not apply to it.
    pub fn apply(&self, cfg: &mut Configuration) -> bool {
        match &self.kind {
            ActionKind::Migration { vm, from, to } => {
                runs_on(cfg, vm, from) && cfg.set_run_on(vm, to)
            }
            ActionKind::Suspend { vm, from, to } => {
                runs_on(cfg, vm, from) && cfg.set_sleep_on(vm, to)
            }
            ActionKind::Resume { vm, from, to } => {
                sleeps_on(cfg, vm, from) && cfg.set_run_on(vm, to)
            }
            ActionKind::Run { vm, to } => {
                cfg.vm_state(vm) == VmState::Waiting && cfg.set_run_on(vm, to)
            }
            ActionKind::Stop { vm, from } => runs_on(cfg, vm, from) && cfg.remove_vm(vm),
            ActionKind::Startup { node } => cfg.is_offline(node) && cfg.add_online(node),
            ActionKind::Shutdown { node } => cfg.is_online(node) && cfg.add_offline(node),
        }
    }
}

impl Ord for Action {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.start, self.rank(), self.finish)
            .cmp(&(other.start, other.rank(), other.finish))
            .then_with(|| self.to_string().cmp(&other.to_string()))
    }
}

impl PartialOrd for Action {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Migration { vm, from, to } => write!(f, "migrate({},{},{})", vm, from, to),
            ActionKind::Suspend { vm, from, to } => write!(f, "suspend({},{},{})", vm, from, to),
            ActionKind::Resume { vm, from, to } => write!(f, "resume({},{},{})", vm, from, to),
            ActionKind::Run { vm, to } => write!(f, "run({},{})", vm, to),
            ActionKind::Stop { vm, from } => write!(f, "stop({},{})", vm, from),
            ActionKind::Startup { node } => write!(f, "startup({})", node),
            ActionKind::Shutdown { node } => write!(f, "shutdown({})", node),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> (Configuration, Node, Node, VirtualMachine) {
        let n1 = Node::new("N1", 4, 4096);
        let n2 = Node::new("N2", 4, 4096);
        let vm = VirtualMachine::new("VM1", 1, 512);
        let mut cfg = Configuration::new();
        cfg.add_online(&n1);
        cfg.add_offline(&n2);
        cfg.set_run_on(&vm, &n1);
        (cfg, n1, n2, vm)
    }

    #[test]
    fn test_boot_then_migrate() {
        let (src, n1, n2, vm) = cluster();
        let boot = Action::new(0, 10, ActionKind::Startup { node: n2.clone() });
        let migrate = Action::new(
            10,
            14,
            ActionKind::Migration {
                vm: vm.clone(),
                from: n1.clone(),
                to: n2.clone(),
            },
        );

        let mut cfg = src.clone();
        assert!(!migrate.apply(&mut cfg), "destination is still offline");
        assert!(boot.apply(&mut cfg));
        assert!(migrate.apply(&mut cfg));
        assert_eq!(cfg.location(&vm), Some(&n2));
        assert!(migrate.is_compatible_with(&src, &cfg));
        assert!(boot.is_compatible_with(&src, &cfg));
        assert!(!migrate.apply(&mut cfg));
    }

    #[test]
    fn test_shutdown_requires_empty_node() {
        let (mut cfg, n1, _, vm) = cluster();
        let shutdown = Action::new(4, 8, ActionKind::Shutdown { node: n1.clone() });
        assert!(!shutdown.apply(&mut cfg));
        let stop = Action::new(
            0,
            2,
            ActionKind::Stop {
                vm: vm.clone(),
                from: n1.clone(),
            },
        );
        assert!(stop.apply(&mut cfg));
        assert!(shutdown.apply(&mut cfg));
        assert!(cfg.is_offline(&n1));
    }

    #[test]
    fn test_ordering_and_display() {
        let (_, n1, n2, vm) = cluster();
        let mut actions = vec![
            Action::new(0, 4, ActionKind::Shutdown { node: n1.clone() }),
            Action::new(0, 3, ActionKind::Run { vm: vm.clone(), to: n1.clone() }),
            Action::new(0, 10, ActionKind::Startup { node: n2.clone() }),
        ];
        actions.sort();
        let names: Vec<String> = actions.iter().map(|a| a.to_string()).collect();
        assert_eq!(names, vec!["startup(N2)", "run(VM1,N1)", "shutdown(N1)"]);
        assert_eq!(actions[0].duration(), 10);
        assert_eq!(actions[1].vm(), Some(&vm));
    }
}
