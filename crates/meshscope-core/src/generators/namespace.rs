//! Namespace labels for the observability namespace

use std::collections::BTreeMap;

use crate::classifier::DATAPLANE_MODE_LABEL;
use crate::types::{CapabilityModel, MeshMode};

/// Namespace-scoped sidecar injection switch
pub const INJECTION_LABEL: &str = "istio-injection";

/// Labels to apply to the observability namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespacePolicy {
    pub labels: BTreeMap<String, String>,
}

/// Ambient enrolls the namespace in the ambient data plane. Sidecar (and an
/// unresolved mode) disables namespace-wide injection, which would otherwise
/// inject proxies into chart hook jobs that then never complete.
pub fn namespace_policy(model: &CapabilityModel) -> NamespacePolicy {
    let mut labels = BTreeMap::new();
    if model.mesh_present() {
        match model.mesh().mode() {
            MeshMode::Ambient => {
                labels.insert(DATAPLANE_MODE_LABEL.to_string(), "ambient".to_string());
            }
            MeshMode::Sidecar | MeshMode::Unknown => {
                labels.insert(INJECTION_LABEL.to_string(), "disabled".to_string());
            }
            MeshMode::NotInstalled => {}
        }
    }
    NamespacePolicy { labels }
}
