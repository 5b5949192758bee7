//! Kubernetes client backed by kube-rs

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config, Resource};
use meshscope_core::{
    ClusterClient, InstallDecision, ReadinessTarget, Result, RolloutError, ResourceKind,
    WorkloadKind,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::{debug, info};

use crate::descriptor::Describe;
use crate::error::ClusterError;
use crate::probe::{gateway_resource, scoped};
use crate::wait::{poll_until, replicas_ready};

/// Upper bound on the connectivity check
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Where the connection came from
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions<'a> {
    /// Explicit kubeconfig path; `KUBECONFIG` or `~/.kube/config` otherwise
    pub kubeconfig: Option<&'a Path>,
    /// Context to use instead of the kubeconfig's current one
    pub context: Option<&'a str>,
}

/// A live cluster, used for both reads and writes
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    context: Option<String>,
    field_manager: String,
    poll_interval: Duration,
}

impl KubeCluster {
    /// Connect using a kubeconfig, falling back to the in-cluster service
    /// account when no kubeconfig exists and none was asked for.
    pub async fn connect(
        options: ConnectOptions<'_>,
        field_manager: &str,
        poll_interval: Duration,
    ) -> std::result::Result<Self, ClusterError> {
        let kubeconfig = match options.kubeconfig {
            Some(path) => Some(Kubeconfig::read_from(path)?),
            None => match Kubeconfig::read() {
                Ok(kubeconfig) => Some(kubeconfig),
                Err(e) if options.context.is_none() => {
                    debug!(error = %e, "no kubeconfig; trying in-cluster config");
                    None
                }
                Err(e) => return Err(e.into()),
            },
        };

        let (config, context) = match kubeconfig {
            Some(kubeconfig) => {
                let context = options
                    .context
                    .map(str::to_string)
                    .or_else(|| kubeconfig.current_context.clone());
                let kube_options = KubeConfigOptions {
                    context: context.clone(),
                    ..Default::default()
                };
                let config = Config::from_custom_kubeconfig(kubeconfig, &kube_options).await?;
                (config, context)
            }
            None => (Config::incluster()?, None),
        };

        info!(context = ?context, cluster = %config.cluster_url, "kubernetes client configured");
        Ok(Self {
            client: Client::try_from(config)?,
            context,
            field_manager: field_manager.to_string(),
            poll_interval,
        })
    }

    pub fn from_client(client: Client, field_manager: &str, poll_interval: Duration) -> Self {
        Self {
            client,
            context: None,
            field_manager: field_manager.to_string(),
            poll_interval,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn apply_params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }

    async fn replicas<K>(&self, name: &str, namespace: &str) -> bool
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Describe,
    {
        match scoped::<K>(&self.client, Some(namespace)).get_opt(name).await {
            Ok(Some(obj)) => replicas_ready(obj.describe().replicas),
            Ok(None) => false,
            Err(e) => {
                debug!(name, namespace, error = %e, "readiness check failed");
                false
            }
        }
    }
}

/// Split `group/version`; the core group has no prefix
fn parse_api_version(api_version: &str) -> (&str, &str) {
    api_version.split_once('/').unwrap_or(("", api_version))
}

fn required<'a>(
    manifest: &'a serde_json::Value,
    pointer: &str,
) -> std::result::Result<&'a str, ClusterError> {
    manifest
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ClusterError::Manifest(format!("missing {pointer}")))
}

/// Resolve a parsed manifest into its API handle and name
fn dynamic_target(
    client: &Client,
    manifest: &serde_json::Value,
) -> std::result::Result<(Api<DynamicObject>, String, String), ClusterError> {
    let kind = required(manifest, "/kind")?;
    let (group, version) = parse_api_version(required(manifest, "/apiVersion")?);
    let name = required(manifest, "/metadata/name")?;
    let ar = ApiResource::from_gvk(&GroupVersionKind::gvk(group, version, kind));
    let api = match manifest.pointer("/metadata/namespace").and_then(|v| v.as_str()) {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
        None => Api::all_with(client.clone(), &ar),
    };
    Ok((api, kind.to_string(), name.to_string()))
}

/// Delete, reporting a 404 as "was not there"
async fn delete<K>(api: Api<K>, name: &str) -> std::result::Result<bool, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn check_connectivity(&self) -> Result<String> {
        match tokio::time::timeout(CONNECT_TIMEOUT, self.client.apiserver_version()).await {
            Ok(Ok(info)) => Ok(info.git_version),
            Ok(Err(e)) => Err(RolloutError::Connectivity(e.to_string())),
            Err(_) => Err(RolloutError::Connectivity(format!(
                "no response from API server within {}s",
                CONNECT_TIMEOUT.as_secs()
            ))),
        }
    }

    fn current_context(&self) -> Option<String> {
        self.context.clone()
    }

    async fn ensure_namespace(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<()> {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            ..Default::default()
        };
        Api::<Namespace>::all(self.client.clone())
            .patch(name, &self.apply_params(), &Patch::Apply(&namespace))
            .await
            .map_err(|e| RolloutError::apply(format!("namespace/{name}"), e))?;
        debug!(namespace = name, labels = ?labels, "namespace applied");
        Ok(())
    }

    async fn apply_manifest(&self, manifest: &str, decision: InstallDecision) -> Result<()> {
        let parsed: serde_json::Value =
            serde_yaml::from_str(manifest).map_err(ClusterError::from)?;
        let (api, kind, name) = dynamic_target(&self.client, &parsed)?;
        api.patch(&name, &self.apply_params(), &Patch::Apply(&parsed))
            .await
            .map_err(|e| RolloutError::apply(format!("{kind}/{name}"), e))?;
        info!(kind = %kind, name = %name, %decision, "manifest applied");
        Ok(())
    }

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: &str,
    ) -> Result<bool> {
        let client = self.client.clone();
        let ns = Some(namespace);
        let result = match kind {
            ResourceKind::Namespace => delete(Api::<Namespace>::all(client), name).await,
            ResourceKind::MutatingWebhookConfiguration => {
                delete(Api::<MutatingWebhookConfiguration>::all(client), name).await
            }
            ResourceKind::Deployment => delete(scoped::<Deployment>(&client, ns), name).await,
            ResourceKind::DaemonSet => delete(scoped::<DaemonSet>(&client, ns), name).await,
            ResourceKind::Pod => delete(scoped::<Pod>(&client, ns), name).await,
            ResourceKind::Secret => delete(scoped::<Secret>(&client, ns), name).await,
            ResourceKind::NetworkPolicy => {
                delete(scoped::<NetworkPolicy>(&client, ns), name).await
            }
            ResourceKind::Gateway => {
                let api: Api<DynamicObject> =
                    Api::namespaced_with(client, namespace, &gateway_resource());
                delete(api, name).await
            }
        };
        let deleted =
            result.map_err(|e| RolloutError::apply(format!("{kind}/{namespace}/{name}"), e))?;
        debug!(%kind, name, namespace, deleted, "delete requested");
        Ok(deleted)
    }

    async fn delete_namespace(&self, name: &str) -> Result<bool> {
        delete(Api::<Namespace>::all(self.client.clone()), name)
            .await
            .map_err(|e| RolloutError::apply(format!("namespace/{name}"), e))
    }

    async fn wait_ready(&self, target: &ReadinessTarget, timeout: Duration) -> bool {
        let ReadinessTarget {
            kind,
            name,
            namespace,
        } = target;
        let ready = poll_until(timeout, self.poll_interval, || async move {
            match kind {
                WorkloadKind::Deployment => self.replicas::<Deployment>(name, namespace).await,
                WorkloadKind::DaemonSet => self.replicas::<DaemonSet>(name, namespace).await,
                WorkloadKind::StatefulSet => self.replicas::<StatefulSet>(name, namespace).await,
            }
        })
        .await;
        if ready {
            info!(workload = %target, "ready");
        } else {
            info!(workload = %target, waited_secs = timeout.as_secs(), "not ready in time");
        }
        ready
    }
}
