//! Mutating collaborators: the cluster client and the release installer

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::config::ChartRef;
use crate::error::Result;
use crate::fragment::ConfigFragment;
use crate::probe::{ClusterProbe, ResourceKind};

/// Install or update, decided right before each apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallDecision {
    Install,
    Upgrade,
}

impl InstallDecision {
    /// Decide from Helm's release storage: one Secret per revision, labelled
    /// `owner=helm,name=<release>`. Failed and pending revisions count, so a
    /// release whose first install broke is upgraded on the next run.
    pub async fn for_release(probe: &dyn ClusterProbe, release: &str, namespace: &str) -> Self {
        let selector = format!("owner=helm,name={release}");
        let revisions = probe
            .list_resources(ResourceKind::Secret, Some(namespace), Some(&selector))
            .await;
        if revisions.is_empty() {
            InstallDecision::Install
        } else {
            InstallDecision::Upgrade
        }
    }

    /// Decide from the existence of a plain resource
    pub async fn for_resource(
        probe: &dyn ClusterProbe,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> Self {
        match probe.get_resource(kind, name, Some(namespace)).await {
            Some(_) => InstallDecision::Upgrade,
            None => InstallDecision::Install,
        }
    }
}

impl std::fmt::Display for InstallDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstallDecision::Install => write!(f, "install"),
            InstallDecision::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// A chart release with its generated values
#[derive(Debug, Clone, PartialEq)]
pub struct ReleasePlan {
    pub release: String,
    pub chart: String,
    pub repository: String,
    pub version: String,
    pub namespace: String,
    pub values: ConfigFragment,
}

impl ReleasePlan {
    pub fn new(
        chart: &ChartRef,
        version: impl Into<String>,
        namespace: impl Into<String>,
        values: ConfigFragment,
    ) -> Self {
        Self {
            release: chart.release.clone(),
            chart: chart.chart.clone(),
            repository: chart.repository.clone(),
            version: version.into(),
            namespace: namespace.into(),
            values,
        }
    }

    /// Repository alias to register before installing, `None` for OCI charts
    pub fn repository_alias(&self) -> Option<&str> {
        crate::config::repository_alias(&self.chart)
    }
}

/// Workload kinds with a readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    StatefulSet,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "deployment"),
            WorkloadKind::DaemonSet => write!(f, "daemonset"),
            WorkloadKind::StatefulSet => write!(f, "statefulset"),
        }
    }
}

/// A workload whose readiness ends a rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessTarget {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
}

impl ReadinessTarget {
    pub fn new(kind: WorkloadKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for ReadinessTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Mutating operations against the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fail-fast reachability check; returns the server version
    async fn check_connectivity(&self) -> Result<String>;

    /// Name of the kube context in use, if known
    fn current_context(&self) -> Option<String>;

    /// Create the namespace or update its labels
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()>;

    /// Apply a single-document manifest
    async fn apply_manifest(&self, manifest: &str, decision: InstallDecision) -> Result<()>;

    /// Delete a namespaced resource; `Ok(false)` when it was already gone
    async fn delete_resource(&self, kind: ResourceKind, name: &str, namespace: &str)
    -> Result<bool>;

    /// Delete a namespace; `Ok(false)` when it was already gone
    async fn delete_namespace(&self, name: &str) -> Result<bool>;

    /// Poll until the workload is ready or `timeout` elapses
    async fn wait_ready(&self, target: &ReadinessTarget, timeout: Duration) -> bool;
}

/// Applies chart releases
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Installer: Send + Sync {
    /// Verify the external tooling is usable; returns its version lines
    async fn check_tools(&self) -> Result<Vec<String>>;

    async fn apply_release(&self, plan: &ReleasePlan, decision: InstallDecision) -> Result<()>;

    async fn uninstall_release(&self, release: &str, namespace: &str) -> Result<()>;
}
