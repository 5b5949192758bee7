//! Run report

use chrono::{DateTime, Utc};

use super::phase::{Phase, PhaseOutcome, PhaseStatus};
use crate::client::{InstallDecision, ReadinessTarget};
use crate::error::RolloutError;
use crate::types::{CapabilityModel, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Deploy,
    Rollback,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Deploy => write!(f, "deploy"),
            Operation::Rollback => write!(f, "rollback"),
        }
    }
}

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutStatus {
    Ready,
    /// Finished, but something non-fatal went wrong
    PartiallyReady,
    Failed,
}

impl std::fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutStatus::Ready => write!(f, "ready"),
            RolloutStatus::PartiallyReady => write!(f, "partially ready"),
            RolloutStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessResult {
    pub target: ReadinessTarget,
    pub ready: bool,
}

/// What happened during one deploy or rollback
#[derive(Debug, Clone)]
pub struct RolloutReport {
    pub operation: Operation,
    pub target: Target,
    pub capability: Option<CapabilityModel>,
    pub phases: Vec<PhaseOutcome>,
    /// Install or upgrade chosen per release or resource
    pub decisions: Vec<(String, InstallDecision)>,
    pub readiness: Vec<ReadinessResult>,
    pub failure: Option<RolloutError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RolloutReport {
    pub fn new(operation: Operation, target: Target) -> Self {
        Self {
            operation,
            target,
            capability: None,
            phases: Vec::new(),
            decisions: Vec::new(),
            readiness: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn record(&mut self, outcome: PhaseOutcome) {
        self.phases.push(outcome);
    }

    pub(crate) fn finish(&mut self, result: Result<(), RolloutError>) {
        self.failure = result.err();
        self.finished_at = Some(Utc::now());
    }

    pub fn status(&self) -> RolloutStatus {
        if self.failure.is_some() {
            RolloutStatus::Failed
        } else if self.phases.iter().any(|p| p.status.is_degraded())
            || self.readiness.iter().any(|r| !r.ready)
        {
            RolloutStatus::PartiallyReady
        } else {
            RolloutStatus::Ready
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn phase_status(&self, phase: Phase) -> Option<&PhaseStatus> {
        self.phases
            .iter()
            .find(|p| p.phase == phase)
            .map(|p| &p.status)
    }

    pub fn decision_for(&self, name: &str) -> Option<InstallDecision> {
        self.decisions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| *d)
    }

    /// Advisories and non-fatal errors across all phases
    pub fn warnings(&self) -> Vec<String> {
        self.phases
            .iter()
            .flat_map(|p| match &p.status {
                PhaseStatus::Warned(warnings) => warnings.clone(),
                PhaseStatus::Degraded(errors) => errors.iter().map(ToString::to_string).collect(),
                _ => Vec::new(),
            })
            .collect()
    }
}

impl std::fmt::Display for RolloutReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "meshscope {} (target: {})", self.operation, self.target)?;
        if let Some(model) = &self.capability {
            writeln!(f, "  mesh: {} {}", model.mesh().mode().symbol(), model.mesh().label())?;
        }
        for outcome in &self.phases {
            writeln!(f, "  {outcome}")?;
        }
        if !self.readiness.is_empty() {
            writeln!(f, "  readiness:")?;
            for result in &self.readiness {
                let symbol = if result.ready { "✓" } else { "✗" };
                writeln!(f, "    {symbol} {}", result.target)?;
            }
        }
        if let Some(finished) = self.finished_at {
            let elapsed = finished.signed_duration_since(self.started_at);
            writeln!(f, "  elapsed: {}s", elapsed.num_seconds())?;
        }
        write!(f, "  status: {}", self.status())
    }
}
