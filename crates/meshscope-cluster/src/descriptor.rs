//! Conversion of API objects into the classifier's view of them

use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Container, Namespace, Pod, PodSpec, Secret};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use meshscope_core::{ContainerDescriptor, ReplicaStatus, ResourceDescriptor};

/// Objects that can be reduced to a [`ResourceDescriptor`]
pub trait Describe {
    fn describe(&self) -> ResourceDescriptor;
}

fn from_meta(meta: &ObjectMeta) -> ResourceDescriptor {
    ResourceDescriptor {
        name: meta.name.clone().unwrap_or_default(),
        namespace: meta.namespace.clone(),
        labels: meta.labels.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn container(c: &Container, init: bool) -> ContainerDescriptor {
    ContainerDescriptor {
        name: c.name.clone(),
        image: c.image.clone().unwrap_or_default(),
        args: c.args.clone().unwrap_or_default(),
        init,
    }
}

/// Init containers first, matching pod start order
fn containers(spec: Option<&PodSpec>) -> Vec<ContainerDescriptor> {
    let Some(spec) = spec else {
        return Vec::new();
    };
    spec.init_containers
        .iter()
        .flatten()
        .map(|c| container(c, true))
        .chain(spec.containers.iter().map(|c| container(c, false)))
        .collect()
}

impl Describe for Namespace {
    fn describe(&self) -> ResourceDescriptor {
        from_meta(&self.metadata)
    }
}

impl Describe for Secret {
    fn describe(&self) -> ResourceDescriptor {
        from_meta(&self.metadata)
    }
}

impl Describe for NetworkPolicy {
    fn describe(&self) -> ResourceDescriptor {
        from_meta(&self.metadata)
    }
}

impl Describe for MutatingWebhookConfiguration {
    fn describe(&self) -> ResourceDescriptor {
        from_meta(&self.metadata)
    }
}

impl Describe for DynamicObject {
    fn describe(&self) -> ResourceDescriptor {
        from_meta(&self.metadata)
    }
}

impl Describe for Pod {
    fn describe(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            containers: containers(self.spec.as_ref()),
            ..from_meta(&self.metadata)
        }
    }
}

impl Describe for Deployment {
    fn describe(&self) -> ResourceDescriptor {
        let spec = self.spec.as_ref();
        ResourceDescriptor {
            containers: containers(spec.and_then(|s| s.template.spec.as_ref())),
            replicas: self.status.as_ref().map(|status| ReplicaStatus {
                desired: spec.and_then(|s| s.replicas).unwrap_or(1),
                ready: status.ready_replicas.unwrap_or(0),
            }),
            ..from_meta(&self.metadata)
        }
    }
}

impl Describe for StatefulSet {
    fn describe(&self) -> ResourceDescriptor {
        let spec = self.spec.as_ref();
        ResourceDescriptor {
            containers: containers(spec.and_then(|s| s.template.spec.as_ref())),
            replicas: self.status.as_ref().map(|status| ReplicaStatus {
                desired: spec.and_then(|s| s.replicas).unwrap_or(1),
                ready: status.ready_replicas.unwrap_or(0),
            }),
            ..from_meta(&self.metadata)
        }
    }
}

impl Describe for DaemonSet {
    fn describe(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            containers: containers(self.spec.as_ref().and_then(|s| s.template.spec.as_ref())),
            replicas: self.status.as_ref().map(|status| ReplicaStatus {
                desired: status.desired_number_scheduled,
                ready: status.number_ready,
            }),
            ..from_meta(&self.metadata)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deployment_carries_image_and_replicas() {
        let deployment: Deployment = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "istiod", "namespace": "istio-system", "labels": {"app": "istiod"}},
            "spec": {
                "replicas": 2,
                "selector": {"matchLabels": {"app": "istiod"}},
                "template": {"spec": {"containers": [
                    {"name": "discovery", "image": "docker.io/istio/pilot:1.22.1"}
                ]}}
            },
            "status": {"readyReplicas": 1}
        }))
        .unwrap();

        let described = deployment.describe();
        assert_eq!(described.name, "istiod");
        assert_eq!(described.namespace.as_deref(), Some("istio-system"));
        assert_eq!(described.labels.get("app").map(String::as_str), Some("istiod"));
        assert_eq!(
            described.primary_container().map(|c| c.image.as_str()),
            Some("docker.io/istio/pilot:1.22.1")
        );
        assert_eq!(described.replicas, Some(ReplicaStatus { desired: 2, ready: 1 }));
    }

    #[test]
    fn deployment_without_status_has_no_replicas() {
        let deployment: Deployment = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "kiali"},
            "spec": {
                "selector": {},
                "template": {"spec": {"containers": [{"name": "kiali"}]}}
            }
        }))
        .unwrap();
        assert_eq!(deployment.describe().replicas, None);
    }

    #[test]
    fn daemonset_counts_scheduled_pods() {
        let daemonset: DaemonSet = serde_json::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {"name": "istio-cni-node", "namespace": "istio-system"},
            "spec": {
                "selector": {},
                "template": {"spec": {"containers": [{
                    "name": "install-cni",
                    "image": "docker.io/istio/install-cni:1.22.1",
                    "args": ["--log_output_level=default:info", "--ambient-enabled=true"]
                }]}}
            },
            "status": {
                "currentNumberScheduled": 3,
                "desiredNumberScheduled": 3,
                "numberMisscheduled": 0,
                "numberReady": 3
            }
        }))
        .unwrap();

        let described = daemonset.describe();
        assert_eq!(described.replicas, Some(ReplicaStatus { desired: 3, ready: 3 }));
        assert!(described.containers[0].args.iter().any(|a| a.contains("ambient")));
    }

    #[test]
    fn pod_lists_init_containers_first() {
        let pod: Pod = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web-0", "namespace": "shop"},
            "spec": {
                "initContainers": [{"name": "istio-init", "image": "istio/proxyv2:1.22.1"}],
                "containers": [
                    {"name": "web", "image": "nginx:1.27"},
                    {"name": "istio-proxy", "image": "istio/proxyv2:1.22.1"}
                ]
            }
        }))
        .unwrap();

        let described = pod.describe();
        let names: Vec<_> = described.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["istio-init", "web", "istio-proxy"]);
        assert!(described.containers[0].init);
        assert_eq!(described.primary_container().map(|c| c.name.as_str()), Some("web"));
    }
}
