//! Mesh observability backend (Kiali)
//!
//! Only ever planned when a mesh control plane was found.

use serde_json::{Value, json};

use super::exposure::ServiceExposure;
use super::traces::QUERY_PORT;
use crate::client::ReleasePlan;
use crate::config::StackConfig;
use crate::fragment::ConfigFragment;
use crate::types::{CapabilityModel, Target};

/// Name of the Kiali deployment created by the chart
pub const DEPLOYMENT_NAME: &str = "kiali";

/// Anonymous everywhere except managed clusters with an identity binding,
/// where access goes through a service account token checked against RBAC.
fn auth_strategy(model: &CapabilityModel) -> &'static str {
    match (model.target(), model.identity()) {
        (Target::Managed, Some(_)) => "token",
        _ => "anonymous",
    }
}

pub fn mesh_observability_values(
    model: &CapabilityModel,
    config: &StackConfig,
    exposure: &ServiceExposure,
) -> ConfigFragment {
    let ns = &config.namespace;
    let metrics = &config.metrics.release;
    let mesh = &config.mesh;

    let mut components = vec![json!({ "app_label": mesh.control_plane, "is_core": true })];
    if model.mesh().has_gateway() {
        components.push(json!({ "app_label": mesh.ingress_gateway, "is_core": false }));
    }

    let mut values = ConfigFragment::new()
        .with(&["auth", "strategy"], auth_strategy(model))
        .with(&["istio_namespace"], mesh.namespace.as_str())
        .with(&["deployment", "namespace"], ns.as_str())
        .with(&["deployment", "service_type"], exposure.service_type.as_str())
        .with(
            &["external_services", "prometheus", "url"],
            format!("http://{metrics}-prometheus.{ns}:9090"),
        )
        .with(&["external_services", "grafana", "enabled"], true)
        .with(
            &["external_services", "grafana", "in_cluster_url"],
            format!("http://{metrics}-grafana.{ns}:80"),
        )
        .with(&["external_services", "tracing", "enabled"], true)
        .with(
            &["external_services", "tracing", "in_cluster_url"],
            format!("http://{}-query.{ns}:{QUERY_PORT}", config.tracing.release),
        )
        .with(&["external_services", "tracing", "use_grpc"], false)
        .with(
            &["external_services", "istio", "component_status", "enabled"],
            true,
        )
        .with(
            &["external_services", "istio", "component_status", "components"],
            components,
        );
    if !exposure.annotations.is_empty() {
        let annotations: serde_json::Map<String, Value> = exposure
            .annotations
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        values.set(&["deployment", "service_annotations"], annotations);
    }
    values
}

/// `None` when no mesh is installed, whatever else the model says
pub fn mesh_observability_release(
    model: &CapabilityModel,
    config: &StackConfig,
    exposure: &ServiceExposure,
) -> Option<ReleasePlan> {
    if !model.mesh_present() {
        return None;
    }
    Some(ReleasePlan::new(
        &config.mesh_observability,
        config.mesh_observability.version.as_str(),
        config.namespace.as_str(),
        mesh_observability_values(model, config, exposure),
    ))
}
