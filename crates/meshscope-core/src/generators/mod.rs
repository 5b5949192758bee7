//! Configuration generators
//!
//! Every function here is a pure derivation from a [`crate::CapabilityModel`]
//! (plus the static [`crate::StackConfig`] for names). None of them touch the
//! cluster.

pub mod exposure;
pub mod mesh_observability;
pub mod metrics;
pub mod namespace;
pub mod network_policy;
pub mod traces;
pub mod visualization;

pub use exposure::{ServiceExposure, ServiceType, service_exposure};
pub use mesh_observability::{mesh_observability_release, mesh_observability_values};
pub use metrics::{ScrapeJob, metrics_release, node_agent_enabled, scrape_jobs};
pub use namespace::{NamespacePolicy, namespace_policy};
pub use network_policy::{NETWORK_POLICY_NAME, network_policy};
pub use traces::tracing_release;
pub use visualization::{Role, VisualizationAuth, visualization_values};
