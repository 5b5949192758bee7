//! meshscope-core: capability detection and conditional configuration
//!
//! Classifies the service mesh running in a cluster, folds the result together
//! with operator input into a [`CapabilityModel`], and derives every piece of
//! observability-stack configuration from that model. Cluster access goes
//! through the [`ClusterProbe`], [`ClusterClient`] and [`Installer`] traits so
//! this crate carries no Kubernetes client of its own.

pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod fragment;
pub mod generators;
pub mod orchestrator;
pub mod probe;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::{MeshClassifier, ModeSignal};
pub use client::{
    ClusterClient, InstallDecision, Installer, ReadinessTarget, ReleasePlan, WorkloadKind,
};
pub use config::{ChartRef, MeshLayout, StackConfig, Timeouts};
pub use error::{Result, RolloutError};
pub use fragment::ConfigFragment;
pub use orchestrator::{
    DeployOptions, Phase, PhaseOutcome, PhaseStatus, RollbackOptions, RolloutOrchestrator,
    RolloutReport, RolloutStatus,
};
pub use probe::{ClusterProbe, ContainerDescriptor, ReplicaStatus, ResourceDescriptor, ResourceKind};
pub use types::{
    CapabilityModel, Identity, IdentityInput, MeshMode, MeshState, ModeSource, Target, Versions,
};
