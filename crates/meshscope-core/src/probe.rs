//! Read-only cluster queries
//!
//! Every query is best-effort. Implementations swallow transport, RBAC and
//! not-found failures and report them as absent or empty, so one unavailable
//! signal never aborts detection. The only fail-fast cluster call is
//! [`crate::ClusterClient::check_connectivity`].

use std::collections::BTreeMap;

use async_trait::async_trait;

/// Kinds of resource the pipeline reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Namespace,
    Deployment,
    DaemonSet,
    Pod,
    Secret,
    MutatingWebhookConfiguration,
    /// gateway.networking.k8s.io/v1 Gateway
    Gateway,
    NetworkPolicy,
}

impl ResourceKind {
    /// Whether resources of this kind live outside namespaces
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            ResourceKind::Namespace | ResourceKind::MutatingWebhookConfiguration
        )
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Namespace => "namespace",
            ResourceKind::Deployment => "deployment",
            ResourceKind::DaemonSet => "daemonset",
            ResourceKind::Pod => "pod",
            ResourceKind::Secret => "secret",
            ResourceKind::MutatingWebhookConfiguration => "mutatingwebhookconfiguration",
            ResourceKind::Gateway => "gateway",
            ResourceKind::NetworkPolicy => "networkpolicy",
        };
        f.write_str(name)
    }
}

/// A container in a pod template or pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDescriptor {
    pub name: String,
    pub image: String,
    pub args: Vec<String>,
    /// True for init containers
    pub init: bool,
}

impl ContainerDescriptor {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn as_init(mut self) -> Self {
        self.init = true;
        self
    }
}

/// Desired and ready replica counts of a workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStatus {
    pub desired: i32,
    pub ready: i32,
}

/// The fields of a cluster object the classifier needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub name: String,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub containers: Vec<ContainerDescriptor>,
    pub replicas: Option<ReplicaStatus>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_container(mut self, container: ContainerDescriptor) -> Self {
        self.containers.push(container);
        self
    }

    pub fn with_replicas(mut self, desired: i32, ready: i32) -> Self {
        self.replicas = Some(ReplicaStatus { desired, ready });
        self
    }

    /// First non-init container
    pub fn primary_container(&self) -> Option<&ContainerDescriptor> {
        self.containers.iter().find(|c| !c.init)
    }

    /// Match a comma-separated label selector of `key=value`, `key!=value`
    /// and bare `key` terms.
    pub fn matches_selector(&self, selector: &str) -> bool {
        selector
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .all(|term| {
                if let Some((key, value)) = term.split_once("!=") {
                    self.labels.get(key.trim()).map(String::as_str) != Some(value.trim())
                } else if let Some((key, value)) = term.split_once('=') {
                    let value = value.trim_start_matches('=').trim();
                    self.labels.get(key.trim()).map(String::as_str) == Some(value)
                } else {
                    self.labels.contains_key(term)
                }
            })
    }
}

/// Narrow read-only query interface over one cluster context
#[async_trait]
pub trait ClusterProbe: Send + Sync {
    /// Whether the namespace exists
    async fn namespace_exists(&self, name: &str) -> bool;

    /// Fetch one resource; `namespace` is ignored for cluster-scoped kinds
    async fn get_resource(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Option<ResourceDescriptor>;

    /// List resources in one namespace, or cluster-wide when `namespace` is `None`
    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Vec<ResourceDescriptor>;
}
