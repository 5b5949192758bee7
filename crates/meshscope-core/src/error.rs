//! Error types for meshscope-core

use thiserror::Error;

use crate::orchestrator::Phase;

/// Failures surfaced by a rollout or teardown
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RolloutError {
    /// A required external tool or credential is missing
    #[error("missing prerequisite: {what}")]
    Precondition { what: String, hint: String },

    /// The cluster could not be reached
    #[error("cluster unreachable: {0}")]
    Connectivity(String),

    /// Operator input or stack configuration is invalid
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Mesh mode could not be determined
    #[error("mesh mode unresolved: {0}")]
    ClassificationAmbiguity(String),

    /// A single release or resource failed to apply
    #[error("failed to apply {resource}: {message}")]
    Apply { resource: String, message: String },

    /// A workload did not become ready within its budget
    #[error("{resource} not ready after {waited_secs}s")]
    ReadinessTimeout { resource: String, waited_secs: u64 },

    /// Cancellation was requested between phases
    #[error("cancelled before {before}")]
    Cancelled { before: Phase },
}

impl RolloutError {
    pub fn apply(resource: impl Into<String>, message: impl std::fmt::Display) -> Self {
        RolloutError::Apply {
            resource: resource.into(),
            message: message.to_string(),
        }
    }

    /// Fatal errors abort the remaining phases
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RolloutError::ClassificationAmbiguity(_) | RolloutError::ReadinessTimeout { .. }
        )
    }

    /// What the operator should do next
    pub fn remediation_hint(&self) -> &str {
        match self {
            RolloutError::Precondition { hint, .. } => hint,
            RolloutError::Connectivity(_) => {
                "check that the current kube context points at a reachable cluster (kubectl cluster-info)"
            }
            RolloutError::Configuration(_) => {
                "review the command flags and the stack config file, then re-run"
            }
            RolloutError::ClassificationAmbiguity(_) => {
                "label the namespace or install the mesh components explicitly if the fallback mode is wrong"
            }
            RolloutError::Apply { .. } => {
                "fix the reported problem and re-run; completed steps are re-applied safely"
            }
            RolloutError::ReadinessTimeout { .. } => {
                "inspect the workload with kubectl describe; it may still become ready"
            }
            RolloutError::Cancelled { .. } => "re-run the command to resume",
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, RolloutError>;
