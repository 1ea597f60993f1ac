use thiserror::Error;

use crate::types::VmState;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Non-viable source configuration: node '{node}' is overloaded ({resource} consumption {consumption} > capacity {capacity})")]
    NonViableSourceConfiguration {
        node: String,
        resource: &'static str,
        consumption: u64,
        capacity: u64,
    },

    #[error("No resulting state declared for '{element}'")]
    UnknownResultingState { element: String },

    #[error("Multiple resulting states declared for '{element}': {states}")]
    MultipleResultingState { element: String, states: String },

    #[error("No available transition for VM '{vm}' from {from} to {to}")]
    NoAvailableTransition {
        vm: String,
        from: VmState,
        to: VmState,
    },

    #[error("Unable to inject constraint {constraint}: {reason}")]
    ConstraintInjection { constraint: String, reason: String },

    #[error("Internal consistency error: {message}")]
    InternalConsistency { message: String },

    #[error("Plans cannot be merged: {reason}")]
    NonMergeablePlans { reason: String },

    #[error("Configuration error for {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Partition task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub type PlanResult<T> = std::result::Result<T, PlanError>;

impl PlanError {
    /// Create an internal consistency error. These indicate an engine bug and
    /// invalidate the plan being produced.
    pub fn internal(message: impl Into<String>) -> Self {
        PlanError::InternalConsistency {
            message: message.into(),
        }
    }

    /// Create a configuration error with component and message
    ///
    /// ```rust
    /// use vmplan_core::error::PlanError;
    ///
    /// let err = PlanError::configuration("solver.timeout", "must be positive");
    /// assert!(err.to_string().contains("solver.timeout"));
    /// ```
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        PlanError::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a constraint injection error
    pub fn injection(constraint: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        PlanError::ConstraintInjection {
            constraint: constraint.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error belongs to the model-building family, i.e. the
    /// request itself cannot be planned.
    pub fn is_model_error(&self) -> bool {
        matches!(
            self,
            PlanError::NonViableSourceConfiguration { .. }
                | PlanError::UnknownResultingState { .. }
                | PlanError::MultipleResultingState { .. }
                | PlanError::NoAvailableTransition { .. }
        )
    }
}
