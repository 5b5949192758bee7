//! Service exposure

use std::collections::BTreeMap;

use serde_json::Value;

use crate::fragment::ConfigFragment;
use crate::types::{CapabilityModel, Target};

/// Provider annotation that keeps a LoadBalancer on the private network
pub const INTERNAL_LB_ANNOTATION: &str = "service.beta.kubernetes.io/azure-load-balancer-internal";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    ClusterIP,
    LoadBalancer,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ClusterIP => "ClusterIP",
            ServiceType::LoadBalancer => "LoadBalancer",
        }
    }
}

/// How UI services are published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceExposure {
    pub service_type: ServiceType,
    pub annotations: BTreeMap<String, String>,
}

impl ServiceExposure {
    pub fn is_load_balanced(&self) -> bool {
        self.service_type == ServiceType::LoadBalancer
    }

    /// Write `type` and `annotations` under `path` in chart values
    pub fn apply_to(&self, fragment: &mut ConfigFragment, path: &[&str]) {
        let mut type_path = path.to_vec();
        type_path.push("type");
        fragment.set(&type_path, self.service_type.as_str());

        if !self.annotations.is_empty() {
            let annotations: serde_json::Map<String, Value> = self
                .annotations
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            let mut annotations_path = path.to_vec();
            annotations_path.push("annotations");
            fragment.set(&annotations_path, Value::Object(annotations));
        }
    }
}

/// Local always stays cluster-internal. Managed uses an internal load
/// balancer only when the operator asked for one.
pub fn service_exposure(model: &CapabilityModel) -> ServiceExposure {
    match model.target() {
        Target::Managed if model.prefers_load_balancer() => ServiceExposure {
            service_type: ServiceType::LoadBalancer,
            annotations: BTreeMap::from([(INTERNAL_LB_ANNOTATION.to_string(), "true".to_string())]),
        },
        _ => ServiceExposure {
            service_type: ServiceType::ClusterIP,
            annotations: BTreeMap::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::tests::{mesh, model_with};
    use serde_json::json;

    #[test]
    fn local_ignores_load_balancer_preference() {
        let exposure = service_exposure(&model_with(Target::Local, mesh(None), None, true));
        assert_eq!(exposure.service_type, ServiceType::ClusterIP);
        assert!(exposure.annotations.is_empty());
    }

    #[test]
    fn managed_without_preference_is_cluster_internal() {
        let exposure = service_exposure(&model_with(Target::Managed, mesh(None), None, false));
        assert_eq!(exposure.service_type, ServiceType::ClusterIP);
    }

    #[test]
    fn managed_with_preference_uses_internal_load_balancer() {
        let exposure = service_exposure(&model_with(Target::Managed, mesh(None), None, true));
        assert!(exposure.is_load_balanced());

        let mut values = ConfigFragment::new();
        exposure.apply_to(&mut values, &["grafana", "service"]);
        assert_eq!(
            values.get(&["grafana", "service", "type"]),
            Some(&json!("LoadBalancer"))
        );
        assert_eq!(
            values.get(&["grafana", "service", "annotations", INTERNAL_LB_ANNOTATION]),
            Some(&json!("true"))
        );
    }
}
