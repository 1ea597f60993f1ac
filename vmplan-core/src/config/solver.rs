//! Search and model settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the problem is split before solving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionMode {
    /// Solve everything as one problem
    Disabled,
    /// Solve independent partitions one after the other
    Sequential,
    /// Solve independent partitions on blocking tasks
    Parallel,
}

impl std::str::FromStr for PartitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "none" => Ok(PartitionMode::Disabled),
            "sequential" => Ok(PartitionMode::Sequential),
            "parallel" => Ok(PartitionMode::Parallel),
            other => Err(format!("unknown partitioning mode '{}'", other)),
        }
    }
}

/// Solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Wall-clock budget of one solve
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Upper bound of the time axis
    pub max_horizon: u32,

    /// Optional cap on the number of search nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_limit: Option<u64>,

    /// Only let misplaced VMs, VMs on overloaded nodes and VMs changing
    /// state move
    pub repair: bool,

    /// Outside repair mode, first look for a plan that only moves what
    /// must move, then search the full problem for a cheaper one
    pub repair_first: bool,

    /// Partitioning of the problem before solving
    pub partitioning: PartitionMode,

    /// Number of terms per partial sum of the objective
    pub sum_chunk_size: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_horizon: 3600,
            node_limit: None,
            repair: false,
            repair_first: true,
            partitioning: PartitionMode::Disabled,
            sum_chunk_size: 100,
        }
    }
}
