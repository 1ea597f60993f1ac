//! Planner settings with TOML support
//!
//! This module provides the configuration layer of the planner:
//! - Loads from TOML files
//! - Supports environment variable overrides
//! - Validates configuration values
//!
//! # Example Configuration
//!
//! ```toml
//! [solver]
//! timeout = "30s"
//! max_horizon = 3600
//! repair = false
//! repair_first = true
//! partitioning = "parallel"
//! sum_chunk_size = 100
//!
//! [durations]
//! migration = { base = 2, per_gib = 4 }
//! run = 6
//! stop = 2
//! suspend = { base = 2, per_gib = 3 }
//! local_resume = { base = 2, per_gib = 2 }
//! remote_resume = { base = 4, per_gib = 4 }
//! startup = 10
//! shutdown = 4
//! ```

pub mod core;
pub mod durations;
pub mod solver;

pub use self::core::PlannerConfig;
pub use durations::{DurationConfig, LinearDuration};
pub use solver::{PartitionMode, SolverConfig};
