//! Planning of live reconfigurations for virtualized clusters.
//!
//! Given where VMs run now and the state every VM and node should reach,
//! the [`Planner`](engine::Planner) computes timed actions (migrations,
//! suspends, resumes, boots, shutdowns...) leading the cluster there while
//! node capacities and placement constraints hold at every moment.

pub mod config;
pub mod configuration;
pub mod constraints;
pub mod duration;
pub mod engine;
pub mod error;
pub mod plan;
pub mod solver;
pub mod types;

pub use config::PlannerConfig;
pub use configuration::Configuration;
pub use constraints::PlacementConstraint;
pub use duration::DurationEvaluator;
pub use engine::{PlanOutcome, Planner, TargetStates};
pub use error::{PlanError, PlanResult};
pub use plan::{Action, ActionKind, Plan};
pub use types::{Node, NodeState, VirtualMachine, VmState};
