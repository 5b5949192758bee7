//! meshscope-cluster: live backends for meshscope
//!
//! [`KubeCluster`] implements both the read-only `ClusterProbe` and the
//! mutating `ClusterClient` on top of kube-rs. [`HelmInstaller`] applies
//! chart releases through the `helm` binary.

pub mod cluster;
pub mod descriptor;
pub mod error;
pub mod helm;
pub mod probe;
pub mod wait;

pub use cluster::{ConnectOptions, KubeCluster};
pub use error::ClusterError;
pub use helm::HelmInstaller;
