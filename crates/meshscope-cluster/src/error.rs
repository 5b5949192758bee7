//! Error types for meshscope-cluster

use meshscope_core::RolloutError;
use thiserror::Error;

/// Errors raised while talking to the API server or running helm
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Kubeconfig could not be read or has no usable context
    #[error("kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// Neither a kubeconfig nor an in-cluster service account is available
    #[error("no kubeconfig found and not running in a cluster: {0}")]
    InCluster(#[from] kube::config::InClusterError),

    /// API server error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Manifest could not be parsed
    #[error("invalid manifest: {0}")]
    Manifest(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The external tool is not on PATH
    #[error("{0} not found on PATH")]
    ToolMissing(String),

    /// The external tool exited unsuccessfully
    #[error("{command} failed: {stderr}")]
    ToolFailed { command: String, stderr: String },
}

impl From<ClusterError> for RolloutError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::ToolMissing(tool) => RolloutError::Precondition {
                hint: format!("install {tool} and make sure it is on PATH"),
                what: tool,
            },
            ClusterError::Kubeconfig(_) | ClusterError::InCluster(_) | ClusterError::Kube(_) => {
                RolloutError::Connectivity(err.to_string())
            }
            ClusterError::Manifest(_) | ClusterError::Yaml(_) => {
                RolloutError::Configuration(err.to_string())
            }
            ClusterError::Io(_) | ClusterError::ToolFailed { .. } => {
                RolloutError::apply("helm", err)
            }
        }
    }
}
