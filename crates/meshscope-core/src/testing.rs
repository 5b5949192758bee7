//! In-memory cluster used by the unit tests
//!
//! Implements all three collaborator traits over one shared store. Helm
//! releases are stored the way Helm stores them, as labelled Secrets, so the
//! install-vs-upgrade decision sees the effect of earlier applies.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::{ClusterClient, InstallDecision, Installer, ReadinessTarget, ReleasePlan};
use crate::error::{Result, RolloutError};
use crate::fragment::ConfigFragment;
use crate::probe::{ClusterProbe, ResourceDescriptor, ResourceKind};

type Key = (ResourceKind, String, String);

#[derive(Default)]
struct Store {
    resources: BTreeMap<Key, ResourceDescriptor>,
    release_calls: Vec<(String, InstallDecision)>,
    release_values: BTreeMap<String, ConfigFragment>,
    manifests: Vec<(String, InstallDecision)>,
    uninstalled: Vec<String>,
    deleted_namespaces: Vec<String>,
    failing_releases: HashSet<String>,
    /// Label keys last applied per namespace; a later apply owns only these
    managed_labels: BTreeMap<String, Vec<String>>,
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    store: Mutex<Store>,
    queries: AtomicUsize,
    failing: HashSet<ResourceKind>,
    context: Option<String>,
    unreachable: Option<String>,
    not_ready: HashSet<String>,
    helm_missing: bool,
}

fn key(kind: ResourceKind, name: &str, namespace: Option<&str>) -> Key {
    let namespace = if kind.is_cluster_scoped() {
        String::new()
    } else {
        namespace.unwrap_or_default().to_string()
    };
    (kind, namespace, name.to_string())
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            context: Some("kind-meshscope".to_string()),
            ..Default::default()
        }
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.with_namespace_labelled(name, &[])
    }

    pub fn with_namespace_labelled(self, name: &str, labels: &[(&str, &str)]) -> Self {
        let namespace = labels
            .iter()
            .fold(ResourceDescriptor::new(name), |ns, (k, v)| ns.with_label(*k, *v));
        self.with_resource(ResourceKind::Namespace, namespace)
    }

    pub fn with_resource(self, kind: ResourceKind, resource: ResourceDescriptor) -> Self {
        self.insert(kind, resource);
        self
    }

    /// Every query for `kind` behaves as if it errored
    pub fn failing(mut self, kind: ResourceKind) -> Self {
        self.failing.insert(kind);
        self
    }

    pub fn with_context(mut self, context: Option<&str>) -> Self {
        self.context = context.map(str::to_string);
        self
    }

    pub fn unreachable(mut self, message: &str) -> Self {
        self.unreachable = Some(message.to_string());
        self
    }

    /// Readiness waits for this workload time out
    pub fn not_ready(mut self, workload: &str) -> Self {
        self.not_ready.insert(workload.to_string());
        self
    }

    pub fn failing_release(self, release: &str) -> Self {
        self.store
            .lock()
            .unwrap()
            .failing_releases
            .insert(release.to_string());
        self
    }

    /// Later applies of `release` succeed again
    pub fn heal_release(&self, release: &str) {
        self.store.lock().unwrap().failing_releases.remove(release);
    }

    /// Add an object after construction, e.g. between two runs
    pub fn add_resource(&self, kind: ResourceKind, resource: ResourceDescriptor) {
        self.insert(kind, resource);
    }

    pub fn without_helm(mut self) -> Self {
        self.helm_missing = true;
        self
    }

    fn insert(&self, kind: ResourceKind, resource: ResourceDescriptor) {
        let k = key(kind, &resource.name, resource.namespace.as_deref());
        self.store.lock().unwrap().resources.insert(k, resource);
    }

    fn store_revision(&self, release: &str, namespace: &str, status: &str) {
        let selector = format!("owner=helm,name={release}");
        let revision = self
            .list_now(ResourceKind::Secret, Some(namespace), Some(&selector))
            .len()
            + 1;
        self.insert(
            ResourceKind::Secret,
            ResourceDescriptor::new(format!("sh.helm.release.v1.{release}.v{revision}"))
                .in_namespace(namespace)
                .with_label("owner", "helm")
                .with_label("name", release)
                .with_label("status", status),
        );
    }

    fn list_now(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: Option<&str>,
    ) -> Vec<ResourceDescriptor> {
        self.store
            .lock()
            .unwrap()
            .resources
            .iter()
            .filter(|((k, ns, _), _)| {
                *k == kind
                    && (kind.is_cluster_scoped() || namespace.is_none_or(|n| n == ns.as_str()))
            })
            .filter(|(_, r)| selector.is_none_or(|s| r.matches_selector(s)))
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> Vec<(String, InstallDecision)> {
        self.store.lock().unwrap().release_calls.clone()
    }

    pub fn release_values(&self, release: &str) -> Option<ConfigFragment> {
        self.store.lock().unwrap().release_values.get(release).cloned()
    }

    pub fn manifests(&self) -> Vec<(String, InstallDecision)> {
        self.store.lock().unwrap().manifests.clone()
    }

    pub fn uninstalled(&self) -> Vec<String> {
        self.store.lock().unwrap().uninstalled.clone()
    }

    pub fn deleted_namespaces(&self) -> Vec<String> {
        self.store.lock().unwrap().deleted_namespaces.clone()
    }

    pub fn namespace_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.store
            .lock()
            .unwrap()
            .resources
            .get(&key(ResourceKind::Namespace, name, None))
            .map(|ns| ns.labels.clone())
    }

    pub fn has_resource(&self, kind: ResourceKind, name: &str, namespace: Option<&str>) -> bool {
        self.store
            .lock()
            .unwrap()
            .resources
            .contains_key(&key(kind, name, namespace))
    }

    /// Snapshot of every stored object, for before/after comparisons
    pub fn snapshot(&self) -> Vec<(Key, ResourceDescriptor)> {
        self.store
            .lock()
            .unwrap()
            .resources
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl ClusterProbe for FakeCluster {
    async fn namespace_exists(&self, name: &str) -> bool {
        self.get_resource(ResourceKind::Namespace, name, None)
            .await
            .is_some()
    }

    async fn get_resource(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Option<ResourceDescriptor> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&kind) {
            return None;
        }
        self.store
            .lock()
            .unwrap()
            .resources
            .get(&key(kind, name, namespace))
            .cloned()
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Vec<ResourceDescriptor> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&kind) {
            return Vec::new();
        }
        self.list_now(kind, namespace, label_selector)
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn check_connectivity(&self) -> Result<String> {
        match &self.unreachable {
            Some(message) => Err(RolloutError::Connectivity(message.clone())),
            None => Ok("v1.30.0".to_string()),
        }
    }

    fn current_context(&self) -> Option<String> {
        self.context.clone()
    }

    /// Server-side apply semantics: labels from the previous apply that are
    /// no longer set are dropped, labels owned by anyone else stay.
    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let k = key(ResourceKind::Namespace, name, None);
        let mut namespace = store
            .resources
            .get(&k)
            .cloned()
            .unwrap_or_else(|| ResourceDescriptor::new(name));
        for previous in store.managed_labels.remove(name).unwrap_or_default() {
            if !labels.contains_key(&previous) {
                namespace.labels.remove(&previous);
            }
        }
        namespace.labels.extend(labels.clone());
        store
            .managed_labels
            .insert(name.to_string(), labels.keys().cloned().collect());
        store.resources.insert(k, namespace);
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &str, decision: InstallDecision) -> Result<()> {
        let doc: serde_yaml::Value = serde_yaml::from_str(manifest)
            .map_err(|e| RolloutError::apply("manifest", e))?;
        let name = doc["metadata"]["name"].as_str().unwrap_or_default();
        let namespace = doc["metadata"]["namespace"].as_str().unwrap_or_default();
        let kind = match doc["kind"].as_str() {
            Some("NetworkPolicy") => ResourceKind::NetworkPolicy,
            other => {
                return Err(RolloutError::apply(
                    format!("{other:?}/{name}"),
                    "unsupported kind",
                ));
            }
        };
        self.insert(kind, ResourceDescriptor::new(name).in_namespace(namespace));
        self.store
            .lock()
            .unwrap()
            .manifests
            .push((manifest.to_string(), decision));
        Ok(())
    }

    async fn delete_resource(&self, kind: ResourceKind, name: &str, namespace: &str) -> Result<bool> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .resources
            .remove(&key(kind, name, Some(namespace)))
            .is_some())
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        let mut store = self.store.lock().unwrap();
        store.deleted_namespaces.push(name.to_string());
        let existed = store
            .resources
            .remove(&key(ResourceKind::Namespace, name, None))
            .is_some();
        store
            .resources
            .retain(|(kind, ns, _), _| kind.is_cluster_scoped() || ns != name);
        Ok(existed)
    }

    async fn wait_ready(&self, target: &ReadinessTarget, _timeout: Duration) -> bool {
        !self.not_ready.contains(&target.name)
    }
}

#[async_trait]
impl Installer for FakeCluster {
    async fn check_tools(&self) -> Result<Vec<String>> {
        if self.helm_missing {
            return Err(RolloutError::Precondition {
                what: "helm".to_string(),
                hint: "install helm".to_string(),
            });
        }
        Ok(vec!["v3.16.2".to_string()])
    }

    async fn apply_release(&self, plan: &ReleasePlan, decision: InstallDecision) -> Result<()> {
        self.store
            .lock()
            .unwrap()
            .release_calls
            .push((plan.release.clone(), decision));

        let failing = self
            .store
            .lock()
            .unwrap()
            .failing_releases
            .contains(&plan.release);
        if failing {
            // helm records the broken revision before reporting the failure
            self.store_revision(&plan.release, &plan.namespace, "failed");
            return Err(RolloutError::apply(
                format!("release/{}", plan.release),
                "chart rendering failed",
            ));
        }
        let exists = !self
            .list_now(
                ResourceKind::Secret,
                Some(&plan.namespace),
                Some(&format!("owner=helm,name={}", plan.release)),
            )
            .is_empty();
        match (decision, exists) {
            (InstallDecision::Install, true) => {
                return Err(RolloutError::apply(
                    format!("release/{}", plan.release),
                    "cannot re-use a name that is still in use",
                ));
            }
            (InstallDecision::Upgrade, false) => {
                return Err(RolloutError::apply(
                    format!("release/{}", plan.release),
                    "has no deployed releases",
                ));
            }
            _ => {}
        }
        self.store_revision(&plan.release, &plan.namespace, "deployed");
        self.store
            .lock()
            .unwrap()
            .release_values
            .insert(plan.release.clone(), plan.values.clone());
        Ok(())
    }

    async fn uninstall_release(&self, release: &str, namespace: &str) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        store.uninstalled.push(release.to_string());
        store.resources.retain(|(kind, ns, _), r| {
            !(*kind == ResourceKind::Secret
                && ns == namespace
                && r.labels.get("name").map(String::as_str) == Some(release))
        });
        Ok(())
    }
}
