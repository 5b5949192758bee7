//! Ingress policy for the observability namespace

use crate::config::StackConfig;
use crate::error::Result;
use crate::fragment::render_template;
use crate::types::CapabilityModel;

use super::exposure::service_exposure;
use super::traces::ZIPKIN_PORT;

pub const NETWORK_POLICY_NAME: &str = "meshscope-ingress";

/// Grafana and Kiali UI ports, opened to any source when published through a
/// load balancer
const UI_PORTS: [u16; 2] = [3000, 20001];

const TEMPLATE: &str = "\
apiVersion: networking.k8s.io/v1
kind: NetworkPolicy
metadata:
  name: __NAME__
  namespace: __NAMESPACE__
  labels:
    app.kubernetes.io/managed-by: meshscope
spec:
  podSelector: {}
  policyTypes:
    - Ingress
  ingress:
    - from:
__PEERS__
__EXTRA_RULES__";

fn peer(namespace: &str) -> String {
    format!(
        "        - namespaceSelector:\n            matchLabels:\n              kubernetes.io/metadata.name: {namespace}\n"
    )
}

/// Mesh proxies in application namespaces report spans to the Zipkin receiver
fn span_rule() -> String {
    format!(
        "    - from:\n        - namespaceSelector: {{}}\n      ports:\n        - protocol: TCP\n          port: {ZIPKIN_PORT}\n"
    )
}

fn ui_rule() -> String {
    let mut rule = String::from("    - ports:\n");
    for port in UI_PORTS {
        rule.push_str(&format!("        - protocol: TCP\n          port: {port}\n"));
    }
    rule
}

/// Render the NetworkPolicy manifest.
///
/// Ingress is allowed from the observability namespace itself. With a mesh
/// present the mesh namespace is allowed too, and the Zipkin port is opened
/// to every namespace since sidecars and waypoints live next to the
/// workloads they serve.
pub fn network_policy(model: &CapabilityModel, config: &StackConfig) -> Result<String> {
    let mut peers = peer(&config.namespace);
    let mut extra = String::new();
    if model.mesh_present() {
        peers.push_str(&peer(&config.mesh.namespace));
        extra.push_str(&span_rule());
    }
    if service_exposure(model).is_load_balanced() {
        extra.push_str(&ui_rule());
    }

    render_template(
        TEMPLATE,
        &[
            ("NAME", NETWORK_POLICY_NAME),
            ("NAMESPACE", config.namespace.as_str()),
            ("PEERS", peers.trim_end_matches('\n')),
            ("EXTRA_RULES", extra.as_str()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::tests::{mesh, model, model_with};
    use crate::types::{MeshMode, Target};

    fn sources(manifest: &str) -> Vec<String> {
        let doc: serde_yaml::Value = serde_yaml::from_str(manifest).unwrap();
        doc["spec"]["ingress"][0]["from"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|p| {
                p["namespaceSelector"]["matchLabels"]["kubernetes.io/metadata.name"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn without_mesh_allows_own_namespace_only() {
        let manifest =
            network_policy(&model(Target::Local, mesh(None), None), &StackConfig::default())
                .unwrap();
        assert_eq!(sources(&manifest), vec!["monitoring"]);
        let doc: serde_yaml::Value = serde_yaml::from_str(&manifest).unwrap();
        assert_eq!(doc["metadata"]["name"].as_str(), Some(NETWORK_POLICY_NAME));
        assert_eq!(doc["spec"]["ingress"].as_sequence().map(Vec::len), Some(1));
    }

    #[test]
    fn with_mesh_allows_mesh_namespace() {
        let manifest = network_policy(
            &model(Target::Managed, mesh(Some(MeshMode::Ambient)), None),
            &StackConfig::default(),
        )
        .unwrap();
        assert_eq!(sources(&manifest), vec!["monitoring", "istio-system"]);
    }

    #[test]
    fn mesh_proxies_reach_zipkin_from_any_namespace() {
        for mode in [MeshMode::Sidecar, MeshMode::Ambient] {
            let manifest = network_policy(
                &model(Target::Local, mesh(Some(mode)), None),
                &StackConfig::default(),
            )
            .unwrap();
            let doc: serde_yaml::Value = serde_yaml::from_str(&manifest).unwrap();
            let rule = &doc["spec"]["ingress"][1];
            let from = rule["from"].as_sequence().unwrap();
            assert_eq!(from.len(), 1);
            assert!(from[0]["namespaceSelector"].as_mapping().unwrap().is_empty());
            assert_eq!(rule["ports"][0]["protocol"].as_str(), Some("TCP"));
            assert_eq!(rule["ports"][0]["port"].as_u64(), Some(u64::from(ZIPKIN_PORT)));
        }
    }

    #[test]
    fn load_balancer_with_mesh_keeps_both_rules() {
        let manifest = network_policy(
            &model_with(Target::Managed, mesh(Some(MeshMode::Sidecar)), None, true),
            &StackConfig::default(),
        )
        .unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&manifest).unwrap();
        assert_eq!(doc["spec"]["ingress"].as_sequence().map(Vec::len), Some(3));
        assert_eq!(doc["spec"]["ingress"][2]["ports"][1]["port"].as_u64(), Some(20001));
    }

    #[test]
    fn load_balancer_opens_ui_ports() {
        let manifest = network_policy(
            &model_with(Target::Managed, mesh(None), None, true),
            &StackConfig::default(),
        )
        .unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&manifest).unwrap();
        let ports = doc["spec"]["ingress"][1]["ports"].as_sequence().unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0]["port"].as_u64(), Some(3000));
    }
}
