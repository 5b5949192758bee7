//! Metrics backend values and scrape configuration

use serde_json::{Value, json};

use super::exposure::ServiceExposure;
use super::visualization::visualization_values;
use crate::client::ReleasePlan;
use crate::config::{MeshLayout, StackConfig};
use crate::fragment::ConfigFragment;
use crate::types::{CapabilityModel, MeshMode, Target};

/// Port the mesh proxies and the control plane serve merged metrics on
const MESH_METRICS_PORT: u16 = 15020;
const CONTROL_PLANE_METRICS_PORT: &str = "http-monitoring";

/// One `additionalScrapeConfigs` entry
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeJob {
    pub name: String,
    pub config: Value,
}

impl ScrapeJob {
    fn new(name: &str, config: Value) -> Self {
        let mut config = config;
        if let Value::Object(map) = &mut config {
            map.insert("job_name".to_string(), Value::String(name.to_string()));
        }
        Self {
            name: name.to_string(),
            config,
        }
    }
}

fn pods_job() -> ScrapeJob {
    ScrapeJob::new(
        "kubernetes-pods",
        json!({
            "kubernetes_sd_configs": [{ "role": "pod" }],
            "relabel_configs": [
                {
                    "source_labels": ["__meta_kubernetes_pod_annotation_prometheus_io_scrape"],
                    "action": "keep",
                    "regex": "true"
                },
                {
                    "source_labels": ["__meta_kubernetes_pod_annotation_prometheus_io_path"],
                    "action": "replace",
                    "target_label": "__metrics_path__",
                    "regex": "(.+)"
                },
                {
                    "source_labels": [
                        "__address__",
                        "__meta_kubernetes_pod_annotation_prometheus_io_port"
                    ],
                    "action": "replace",
                    "regex": "([^:]+)(?::\\d+)?;(\\d+)",
                    "replacement": "$1:$2",
                    "target_label": "__address__"
                },
                { "action": "labelmap", "regex": "__meta_kubernetes_pod_label_(.+)" },
                {
                    "source_labels": ["__meta_kubernetes_namespace"],
                    "target_label": "namespace"
                },
                {
                    "source_labels": ["__meta_kubernetes_pod_name"],
                    "target_label": "pod"
                }
            ]
        }),
    )
}

fn control_plane_job(layout: &MeshLayout) -> ScrapeJob {
    ScrapeJob::new(
        "mesh-control-plane",
        json!({
            "kubernetes_sd_configs": [{
                "role": "endpoints",
                "namespaces": { "names": [layout.namespace] }
            }],
            "relabel_configs": [{
                "source_labels": [
                    "__meta_kubernetes_service_name",
                    "__meta_kubernetes_endpoint_port_name"
                ],
                "action": "keep",
                "regex": format!("{};{}", layout.control_plane, CONTROL_PLANE_METRICS_PORT)
            }]
        }),
    )
}

fn node_proxy_job(layout: &MeshLayout) -> ScrapeJob {
    ScrapeJob::new(
        "mesh-node-proxy",
        json!({
            "metrics_path": "/stats/prometheus",
            "kubernetes_sd_configs": [{
                "role": "pod",
                "namespaces": { "names": [layout.namespace] }
            }],
            "relabel_configs": [
                {
                    "source_labels": ["__meta_kubernetes_pod_label_app"],
                    "action": "keep",
                    "regex": layout.node_proxy
                },
                {
                    "source_labels": ["__meta_kubernetes_pod_ip"],
                    "action": "replace",
                    "regex": "(.+)",
                    "replacement": format!("$1:{MESH_METRICS_PORT}"),
                    "target_label": "__address__"
                },
                {
                    "source_labels": ["__meta_kubernetes_pod_node_name"],
                    "target_label": "node"
                }
            ]
        }),
    )
}

fn sidecar_proxy_job(layout: &MeshLayout) -> ScrapeJob {
    ScrapeJob::new(
        "mesh-sidecar-proxy",
        json!({
            "metrics_path": "/stats/prometheus",
            "kubernetes_sd_configs": [{ "role": "pod" }],
            "relabel_configs": [
                {
                    "source_labels": ["__meta_kubernetes_pod_container_name"],
                    "action": "keep",
                    "regex": layout.proxy_container
                },
                {
                    "source_labels": ["__meta_kubernetes_pod_ip"],
                    "action": "replace",
                    "regex": "(.+)",
                    "replacement": format!("$1:{MESH_METRICS_PORT}"),
                    "target_label": "__address__"
                },
                {
                    "source_labels": ["__meta_kubernetes_namespace"],
                    "target_label": "namespace"
                },
                {
                    "source_labels": ["__meta_kubernetes_pod_name"],
                    "target_label": "pod"
                }
            ]
        }),
    )
}

/// Base jobs always; the control plane job whenever a mesh is present; then
/// the node proxy job for ambient or the sidecar job otherwise.
pub fn scrape_jobs(model: &CapabilityModel, layout: &MeshLayout) -> Vec<ScrapeJob> {
    let mut jobs = vec![pods_job()];
    if !model.mesh_present() {
        return jobs;
    }

    jobs.push(control_plane_job(layout));
    match model.mesh().mode() {
        MeshMode::Ambient => jobs.push(node_proxy_job(layout)),
        MeshMode::Sidecar | MeshMode::Unknown => jobs.push(sidecar_proxy_job(layout)),
        MeshMode::NotInstalled => {}
    }
    jobs
}

/// The node exporter needs host path mounts with propagation that local
/// container runtimes do not support.
pub fn node_agent_enabled(model: &CapabilityModel) -> bool {
    model.target() != Target::Local
}

/// Values for the metrics chart, including the visualization subchart
pub fn metrics_values(
    model: &CapabilityModel,
    config: &StackConfig,
    exposure: &ServiceExposure,
) -> ConfigFragment {
    let jobs: Vec<Value> = scrape_jobs(model, &config.mesh)
        .into_iter()
        .map(|job| job.config)
        .collect();

    let mut values = ConfigFragment::new()
        .with(&["prometheus", "prometheusSpec", "additionalScrapeConfigs"], jobs)
        .with(
            &["prometheus", "prometheusSpec", "podMonitorSelectorNilUsesHelmValues"],
            false,
        )
        .with(
            &["prometheus", "prometheusSpec", "serviceMonitorSelectorNilUsesHelmValues"],
            false,
        )
        .with(&["nodeExporter", "enabled"], node_agent_enabled(model));
    exposure.apply_to(&mut values, &["prometheus", "service"]);
    values.merge(visualization_values(model, exposure));
    values
}

pub fn metrics_release(
    model: &CapabilityModel,
    config: &StackConfig,
    exposure: &ServiceExposure,
) -> ReleasePlan {
    ReleasePlan::new(
        &config.metrics,
        model.versions().metrics_version.as_str(),
        config.namespace.as_str(),
        metrics_values(model, config, exposure),
    )
}
