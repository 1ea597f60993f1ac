//! Top-level planner configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use super::{DurationConfig, SolverConfig};
use crate::error::{PlanError, PlanResult};

/// Complete planner configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Search and model settings
    pub solver: SolverConfig,

    /// Action duration estimates
    pub durations: DurationConfig,
}

impl PlannerConfig {
    /// Load configuration from a TOML file, apply environment overrides and
    /// validate the result
    pub fn from_file<P: AsRef<Path>>(path: P) -> PlanResult<Self> {
        let path = path.as_ref();
        debug!("Reading planner configuration from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text. No override nor validation is applied.
    pub fn from_toml_str(content: &str) -> PlanResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> PlanResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> PlanResult<()> {
        if let Ok(timeout) = std::env::var("VMPLAN_TIMEOUT") {
            self.solver.timeout = humantime_serde::re::humantime::parse_duration(&timeout)
                .map_err(|e| PlanError::configuration("VMPLAN_TIMEOUT", e.to_string()))?;
        }
        if let Ok(horizon) = std::env::var("VMPLAN_MAX_HORIZON") {
            self.solver.max_horizon = horizon
                .parse()
                .map_err(|e| PlanError::configuration("VMPLAN_MAX_HORIZON", format!("{}", e)))?;
        }
        if let Ok(repair) = std::env::var("VMPLAN_REPAIR") {
            self.solver.repair = repair
                .parse()
                .map_err(|e| PlanError::configuration("VMPLAN_REPAIR", format!("{}", e)))?;
        }
        if let Ok(mode) = std::env::var("VMPLAN_PARTITIONING") {
            self.solver.partitioning = mode
                .parse()
                .map_err(|e: String| PlanError::configuration("VMPLAN_PARTITIONING", e))?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> PlanResult<()> {
        if self.solver.timeout.is_zero() {
            return Err(PlanError::configuration(
                "solver.timeout",
                "timeout must be greater than zero",
            ));
        }
        if self.solver.max_horizon == 0 {
            return Err(PlanError::configuration(
                "solver.max_horizon",
                "horizon must be greater than zero",
            ));
        }
        if self.solver.sum_chunk_size < 2 {
            return Err(PlanError::configuration(
                "solver.sum_chunk_size",
                "partial sums need at least 2 terms",
            ));
        }
        self.durations
            .validate()
            .map_err(|e| PlanError::configuration("durations", e))?;
        Ok(())
    }
}
