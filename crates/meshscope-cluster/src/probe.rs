//! Best-effort reads through the kube API

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{Api, DynamicObject, GroupVersionKind, ListParams};
use kube::discovery::ApiResource;
use kube::{Client, Resource};
use meshscope_core::{ClusterProbe, ResourceDescriptor, ResourceKind};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cluster::KubeCluster;
use crate::descriptor::Describe;

pub(crate) fn gateway_resource() -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        "gateway.networking.k8s.io",
        "v1",
        "Gateway",
    ))
}

/// Namespaced handle for a single get; falls back to the client's default namespace
pub(crate) fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::default_namespaced(client.clone()),
    }
}

/// Handle for a list; all namespaces when none is given
fn listing<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn fetch<K>(api: Api<K>, name: &str) -> Option<ResourceDescriptor>
where
    K: Resource + Clone + DeserializeOwned + Debug + Describe,
{
    match api.get_opt(name).await {
        Ok(found) => found.map(|obj| obj.describe()),
        Err(e) => {
            debug!(name, error = %e, "get failed; treating as absent");
            None
        }
    }
}

async fn list<K>(api: Api<K>, selector: Option<&str>) -> Vec<ResourceDescriptor>
where
    K: Resource + Clone + DeserializeOwned + Debug + Describe,
{
    let params = match selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    };
    match api.list(&params).await {
        Ok(objects) => objects.items.iter().map(Describe::describe).collect(),
        Err(e) => {
            debug!(selector = ?selector, error = %e, "list failed; treating as empty");
            Vec::new()
        }
    }
}

#[async_trait]
impl ClusterProbe for KubeCluster {
    async fn namespace_exists(&self, name: &str) -> bool {
        fetch(Api::<Namespace>::all(self.client().clone()), name)
            .await
            .is_some()
    }

    async fn get_resource(
        &self,
        kind: ResourceKind,
        name: &str,
        namespace: Option<&str>,
    ) -> Option<ResourceDescriptor> {
        let client = self.client();
        match kind {
            ResourceKind::Namespace => fetch(Api::<Namespace>::all(client.clone()), name).await,
            ResourceKind::MutatingWebhookConfiguration => {
                fetch(Api::<MutatingWebhookConfiguration>::all(client.clone()), name).await
            }
            ResourceKind::Deployment => fetch(scoped::<Deployment>(client, namespace), name).await,
            ResourceKind::DaemonSet => fetch(scoped::<DaemonSet>(client, namespace), name).await,
            ResourceKind::Pod => fetch(scoped::<Pod>(client, namespace), name).await,
            ResourceKind::Secret => fetch(scoped::<Secret>(client, namespace), name).await,
            ResourceKind::NetworkPolicy => {
                fetch(scoped::<NetworkPolicy>(client, namespace), name).await
            }
            ResourceKind::Gateway => {
                let ar = gateway_resource();
                let api: Api<DynamicObject> = match namespace {
                    Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
                    None => Api::default_namespaced_with(client.clone(), &ar),
                };
                fetch(api, name).await
            }
        }
    }

    async fn list_resources(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Vec<ResourceDescriptor> {
        let client = self.client();
        match kind {
            ResourceKind::Namespace => {
                list(Api::<Namespace>::all(client.clone()), label_selector).await
            }
            ResourceKind::MutatingWebhookConfiguration => {
                list(
                    Api::<MutatingWebhookConfiguration>::all(client.clone()),
                    label_selector,
                )
                .await
            }
            ResourceKind::Deployment => {
                list(listing::<Deployment>(client, namespace), label_selector).await
            }
            ResourceKind::DaemonSet => {
                list(listing::<DaemonSet>(client, namespace), label_selector).await
            }
            ResourceKind::Pod => list(listing::<Pod>(client, namespace), label_selector).await,
            ResourceKind::Secret => {
                list(listing::<Secret>(client, namespace), label_selector).await
            }
            ResourceKind::NetworkPolicy => {
                list(listing::<NetworkPolicy>(client, namespace), label_selector).await
            }
            ResourceKind::Gateway => {
                let ar = gateway_resource();
                let api: Api<DynamicObject> = match namespace {
                    Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
                    None => Api::all_with(client.clone(), &ar),
                };
                list(api, label_selector).await
            }
        }
    }
}
