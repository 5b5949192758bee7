//! Stack configuration
//!
//! Fixed names and default versions live here rather than in globals so that
//! each orchestrator (and each test) can run with its own values. The file
//! format is YAML; every field is optional and falls back to the defaults
//! below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RolloutError;

/// Immutable configuration handed to the orchestrator at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StackConfig {
    /// Namespace the observability stack is installed into
    pub namespace: String,
    /// Field manager used for server-side apply
    pub field_manager: String,
    /// Names of the mesh components the classifier looks for
    pub mesh: MeshLayout,
    /// Metrics backend (includes the visualization backend and node agent)
    pub metrics: ChartRef,
    /// Tracing backend
    pub tracing: ChartRef,
    /// Mesh observability backend
    pub mesh_observability: ChartRef,
    /// Default visualization image tag
    pub visualization_image_tag: String,
    pub timeouts: Timeouts,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            namespace: "monitoring".to_string(),
            field_manager: "meshscope".to_string(),
            mesh: MeshLayout::default(),
            metrics: ChartRef {
                release: "kube-prometheus-stack".to_string(),
                chart: "prometheus-community/kube-prometheus-stack".to_string(),
                repository: "https://prometheus-community.github.io/helm-charts".to_string(),
                version: "65.1.1".to_string(),
            },
            tracing: ChartRef {
                release: "jaeger".to_string(),
                chart: "jaegertracing/jaeger".to_string(),
                repository: "https://jaegertracing.github.io/helm-charts".to_string(),
                version: "3.3.1".to_string(),
            },
            mesh_observability: ChartRef {
                release: "kiali".to_string(),
                chart: "kiali/kiali-server".to_string(),
                repository: "https://kiali.org/helm-charts".to_string(),
                version: "1.89.0".to_string(),
            },
            visualization_image_tag: "11.2.0".to_string(),
            timeouts: Timeouts::default(),
        }
    }
}

impl StackConfig {
    /// Location of the per-user config file
    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|dir| dir.join("meshscope").join("config.yaml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the per-user file is used
    /// when present and the built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, RolloutError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    tracing::debug!("no stack config file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            RolloutError::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "loaded stack config");
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, RolloutError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| RolloutError::Configuration(format!("failed to parse stack config: {e}")))
    }
}

/// Names of the service mesh components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeshLayout {
    /// Control plane namespace
    pub namespace: String,
    /// Control plane deployment
    pub control_plane: String,
    /// Ingress gateway deployment
    pub ingress_gateway: String,
    /// Node-local proxy DaemonSet (ambient)
    pub node_proxy: String,
    /// CNI DaemonSet
    pub cni: String,
    /// Sidecar injector mutating webhook configuration
    pub injector_webhook: String,
    /// Name of the injected proxy container
    pub proxy_container: String,
}

impl Default for MeshLayout {
    fn default() -> Self {
        Self {
            namespace: "istio-system".to_string(),
            control_plane: "istiod".to_string(),
            ingress_gateway: "istio-ingressgateway".to_string(),
            node_proxy: "ztunnel".to_string(),
            cni: "istio-cni-node".to_string(),
            injector_webhook: "istio-sidecar-injector".to_string(),
            proxy_container: "istio-proxy".to_string(),
        }
    }
}

/// A Helm chart and the release it is installed as.
///
/// All four fields are required when a chart section appears in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRef {
    pub release: String,
    pub chart: String,
    pub repository: String,
    pub version: String,
}

impl ChartRef {
    /// Repository alias, taken from the `<alias>/<chart>` reference
    pub fn repository_alias(&self) -> Option<&str> {
        repository_alias(&self.chart)
    }
}

pub(crate) fn repository_alias(chart: &str) -> Option<&str> {
    if chart.starts_with("oci://") {
        return None;
    }
    chart.split_once('/').map(|(alias, _)| alias)
}

/// Time budgets for blocking operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timeouts {
    pub install_secs: u64,
    pub readiness_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            install_secs: 300,
            readiness_secs: 180,
            poll_interval_secs: 5,
        }
    }
}

impl Timeouts {
    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }

    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
