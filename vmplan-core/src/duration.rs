//! Estimation of action durations.
//!
//! The planner only consumes durations; how they are estimated belongs to
//! whoever knows the infrastructure. `DurationConfig` (see
//! [`crate::config::DurationConfig`]) is the stock implementation.

use crate::types::{Node, VirtualMachine};

/// Estimates how long each kind of action lasts, in planner time units
pub trait DurationEvaluator: Send + Sync + std::fmt::Debug {
    fn migration(&self, vm: &VirtualMachine) -> u32;

    fn run(&self, vm: &VirtualMachine) -> u32;

    fn stop(&self, vm: &VirtualMachine) -> u32;

    fn suspend(&self, vm: &VirtualMachine) -> u32;

    /// Resume on the node the VM was suspended on
    fn local_resume(&self, vm: &VirtualMachine) -> u32;

    /// Resume on another node than the one the VM was suspended on
    fn remote_resume(&self, vm: &VirtualMachine) -> u32;

    fn startup(&self, node: &Node) -> u32;

    fn shutdown(&self, node: &Node) -> u32;
}
