//! Rollout phases and their outcomes

use std::time::Duration;

use crate::error::RolloutError;

/// One step of a deploy or rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Preflight,
    Authenticate,
    Detect,
    ValidateImages,
    Namespace,
    InstallMetrics,
    InstallTracing,
    InstallMeshObservability,
    InstallNetworkPolicy,
    AwaitReadiness,
    Report,
    RemoveNetworkPolicy,
    UninstallMeshObservability,
    UninstallTracing,
    UninstallMetrics,
    RemoveNamespace,
}

impl Phase {
    /// Deploy sequence
    pub const DEPLOY: [Phase; 11] = [
        Phase::Preflight,
        Phase::Authenticate,
        Phase::Detect,
        Phase::ValidateImages,
        Phase::Namespace,
        Phase::InstallMetrics,
        Phase::InstallTracing,
        Phase::InstallMeshObservability,
        Phase::InstallNetworkPolicy,
        Phase::AwaitReadiness,
        Phase::Report,
    ];

    /// Rollback sequence; uninstalls run in reverse install order
    pub const ROLLBACK: [Phase; 7] = [
        Phase::Preflight,
        Phase::Detect,
        Phase::RemoveNetworkPolicy,
        Phase::UninstallMeshObservability,
        Phase::UninstallTracing,
        Phase::UninstallMetrics,
        Phase::RemoveNamespace,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Preflight => "Preflight",
            Phase::Authenticate => "Authenticate",
            Phase::Detect => "Detect",
            Phase::ValidateImages => "ValidateImages",
            Phase::Namespace => "Namespace",
            Phase::InstallMetrics => "InstallMetrics",
            Phase::InstallTracing => "InstallTracing",
            Phase::InstallMeshObservability => "InstallMeshObservability",
            Phase::InstallNetworkPolicy => "InstallNetworkPolicy",
            Phase::AwaitReadiness => "AwaitReadiness",
            Phase::Report => "Report",
            Phase::RemoveNetworkPolicy => "RemoveNetworkPolicy",
            Phase::UninstallMeshObservability => "UninstallMeshObservability",
            Phase::UninstallTracing => "UninstallTracing",
            Phase::UninstallMetrics => "UninstallMetrics",
            Phase::RemoveNamespace => "RemoveNamespace",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How a phase ended
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseStatus {
    Completed,
    /// Nothing to do
    Skipped(String),
    /// Finished, with advisories for the operator
    Warned(Vec<String>),
    /// Finished, with non-fatal errors
    Degraded(Vec<RolloutError>),
    /// Aborted the run
    Failed(RolloutError),
}

impl PhaseStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            PhaseStatus::Completed => "✓",
            PhaseStatus::Skipped(_) => "-",
            PhaseStatus::Warned(_) => "!",
            PhaseStatus::Degraded(_) => "⚠",
            PhaseStatus::Failed(_) => "✗",
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, PhaseStatus::Degraded(_))
    }

    /// Degraded when any non-fatal error was collected, otherwise completed
    pub fn from_errors(errors: Vec<RolloutError>) -> Self {
        if errors.is_empty() {
            PhaseStatus::Completed
        } else {
            PhaseStatus::Degraded(errors)
        }
    }

    /// Warned when any advisory was collected, otherwise completed
    pub fn from_warnings(warnings: Vec<String>) -> Self {
        if warnings.is_empty() {
            PhaseStatus::Completed
        } else {
            PhaseStatus::Warned(warnings)
        }
    }
}

/// A finished phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub elapsed: Duration,
}

impl std::fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.symbol(), self.phase)?;
        match &self.status {
            PhaseStatus::Completed => Ok(()),
            PhaseStatus::Skipped(reason) => write!(f, ": skipped ({reason})"),
            PhaseStatus::Warned(warnings) => write!(f, ": {}", warnings.join("; ")),
            PhaseStatus::Degraded(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, ": {}", messages.join("; "))
            }
            PhaseStatus::Failed(err) => write!(f, ": {err}"),
        }
    }
}
