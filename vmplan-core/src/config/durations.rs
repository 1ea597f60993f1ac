//! Action duration settings

use serde::{Deserialize, Serialize};

use crate::duration::DurationEvaluator;
use crate::types::{Node, VirtualMachine};

/// `base + per_gib * memory / 1024`, memory being expressed in MiB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearDuration {
    pub base: u32,
    #[serde(default)]
    pub per_gib: u32,
}

impl LinearDuration {
    pub const fn constant(base: u32) -> Self {
        Self { base, per_gib: 0 }
    }

    pub fn evaluate(&self, memory: u32) -> u32 {
        let scaled = (self.per_gib as u64 * memory as u64) / 1024;
        self.base.saturating_add(scaled.min(u32::MAX as u64) as u32)
    }
}

/// Duration of every action kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationConfig {
    /// Live migration, proportional to the memory to copy
    pub migration: LinearDuration,
    pub run: u32,
    pub stop: u32,
    /// Suspend to disk, proportional to the memory to write
    pub suspend: LinearDuration,
    pub local_resume: LinearDuration,
    pub remote_resume: LinearDuration,
    pub startup: u32,
    pub shutdown: u32,
}

impl Default for DurationConfig {
    fn default() -> Self {
        Self {
            migration: LinearDuration { base: 2, per_gib: 4 },
            run: 6,
            stop: 2,
            suspend: LinearDuration { base: 2, per_gib: 3 },
            local_resume: LinearDuration { base: 2, per_gib: 2 },
            remote_resume: LinearDuration { base: 4, per_gib: 4 },
            startup: 10,
            shutdown: 4,
        }
    }
}

impl DurationConfig {
    /// Every action lasts `value`
    pub fn uniform(value: u32) -> Self {
        Self {
            migration: LinearDuration::constant(value),
            run: value,
            stop: value,
            suspend: LinearDuration::constant(value),
            local_resume: LinearDuration::constant(value),
            remote_resume: LinearDuration::constant(value),
            startup: value,
            shutdown: value,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        let constants = [
            ("run", self.run),
            ("stop", self.stop),
            ("startup", self.startup),
            ("shutdown", self.shutdown),
            ("migration.base", self.migration.base),
            ("suspend.base", self.suspend.base),
            ("local_resume.base", self.local_resume.base),
            ("remote_resume.base", self.remote_resume.base),
        ];
        match constants.iter().find(|(_, v)| *v == 0) {
            Some((name, _)) => Err(format!("durations.{} must be at least 1", name)),
            None => Ok(()),
        }
    }
}

impl DurationEvaluator for DurationConfig {
    fn migration(&self, vm: &VirtualMachine) -> u32 {
        self.migration.evaluate(vm.memory_consumption)
    }

    fn run(&self, _vm: &VirtualMachine) -> u32 {
        self.run
    }

    fn stop(&self, _vm: &VirtualMachine) -> u32 {
        self.stop
    }

    fn suspend(&self, vm: &VirtualMachine) -> u32 {
        self.suspend.evaluate(vm.memory_consumption)
    }

    fn local_resume(&self, vm: &VirtualMachine) -> u32 {
        self.local_resume.evaluate(vm.memory_demand)
    }

    fn remote_resume(&self, vm: &VirtualMachine) -> u32 {
        self.remote_resume.evaluate(vm.memory_demand)
    }

    fn startup(&self, _node: &Node) -> u32 {
        self.startup
    }

    fn shutdown(&self, _node: &Node) -> u32 {
        self.shutdown
    }
}
