//! Service mesh detection
//!
//! Installed, version, health and gateway are read from the control plane
//! directly. The data plane mode comes from an ordered cascade of independent
//! signals. Ambient signals rank above sidecar ones because a cluster migrated
//! to ambient often still carries a leftover injector webhook.

use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use tracing::{debug, info};

use crate::config::MeshLayout;
use crate::probe::{ClusterProbe, ResourceDescriptor, ResourceKind};
use crate::types::{MeshMode, MeshState, ModeSource};

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?(\d+\.\d+(?:\.\d+)?)").expect("version regex is valid"));

/// Label carried by ambient waypoint gateways
pub const WAYPOINT_LABEL: &str = "istio.io/waypoint-for";
/// Namespace label enrolling workloads in the ambient data plane
pub const DATAPLANE_MODE_LABEL: &str = "istio.io/dataplane-mode";
/// CNI argument substring indicating ambient support
const AMBIENT_ARG: &str = "ambient";
/// Where CNI DaemonSets are commonly installed besides the mesh namespace
const KUBE_SYSTEM: &str = "kube-system";

/// One piece of evidence for a data plane mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSignal {
    /// Node-local proxy DaemonSet exists
    NodeProxyDaemonSet,
    /// CNI DaemonSet is configured for ambient
    AmbientCniArgs,
    /// A Gateway carries the waypoint label
    WaypointGateway,
    /// A namespace is enrolled in the ambient data plane
    AmbientNamespaceLabel,
    /// Sidecar injector webhook exists
    SidecarInjectorWebhook,
    /// A pod runs the sidecar proxy container
    SidecarProxyContainer,
}

impl ModeSignal {
    /// Signals in priority order
    pub const CASCADE: [ModeSignal; 6] = [
        ModeSignal::NodeProxyDaemonSet,
        ModeSignal::AmbientCniArgs,
        ModeSignal::WaypointGateway,
        ModeSignal::AmbientNamespaceLabel,
        ModeSignal::SidecarInjectorWebhook,
        ModeSignal::SidecarProxyContainer,
    ];

    /// Mode implied by a positive observation
    pub fn mode(&self) -> MeshMode {
        match self {
            ModeSignal::NodeProxyDaemonSet
            | ModeSignal::AmbientCniArgs
            | ModeSignal::WaypointGateway
            | ModeSignal::AmbientNamespaceLabel => MeshMode::Ambient,
            ModeSignal::SidecarInjectorWebhook | ModeSignal::SidecarProxyContainer => {
                MeshMode::Sidecar
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModeSignal::NodeProxyDaemonSet => "node proxy daemonset",
            ModeSignal::AmbientCniArgs => "ambient cni configuration",
            ModeSignal::WaypointGateway => "waypoint gateway",
            ModeSignal::AmbientNamespaceLabel => "ambient namespace label",
            ModeSignal::SidecarInjectorWebhook => "sidecar injector webhook",
            ModeSignal::SidecarProxyContainer => "sidecar proxy container",
        }
    }

    /// Check this signal alone; probe failures read as negative
    pub async fn observe(&self, probe: &dyn ClusterProbe, layout: &MeshLayout) -> bool {
        let seen = match self {
            ModeSignal::NodeProxyDaemonSet => probe
                .get_resource(
                    ResourceKind::DaemonSet,
                    &layout.node_proxy,
                    Some(&layout.namespace),
                )
                .await
                .is_some(),
            ModeSignal::AmbientCniArgs => {
                let mut found = false;
                for namespace in [layout.namespace.as_str(), KUBE_SYSTEM] {
                    if let Some(cni) = probe
                        .get_resource(ResourceKind::DaemonSet, &layout.cni, Some(namespace))
                        .await
                    {
                        found = has_ambient_args(&cni);
                        break;
                    }
                }
                found
            }
            ModeSignal::WaypointGateway => !probe
                .list_resources(ResourceKind::Gateway, None, Some(WAYPOINT_LABEL))
                .await
                .is_empty(),
            ModeSignal::AmbientNamespaceLabel => {
                let selector = format!("{DATAPLANE_MODE_LABEL}=ambient");
                !probe
                    .list_resources(ResourceKind::Namespace, None, Some(&selector))
                    .await
                    .is_empty()
            }
            ModeSignal::SidecarInjectorWebhook => probe
                .get_resource(
                    ResourceKind::MutatingWebhookConfiguration,
                    &layout.injector_webhook,
                    None,
                )
                .await
                .is_some(),
            ModeSignal::SidecarProxyContainer => probe
                .list_resources(ResourceKind::Pod, None, None)
                .await
                .iter()
                .any(|pod| {
                    pod.containers
                        .iter()
                        .any(|c| c.name == layout.proxy_container)
                }),
        };
        debug!(signal = self.name(), seen, "mode signal observed");
        seen
    }
}

impl std::fmt::Display for ModeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn has_ambient_args(cni: &ResourceDescriptor) -> bool {
    cni.containers
        .iter()
        .flat_map(|c| c.args.iter())
        .any(|arg| arg.contains(AMBIENT_ARG))
}

/// Version from an image reference such as
/// `docker.io/istio/pilot:1.22.1-distroless@sha256:...`
pub fn parse_version(image: &str) -> Option<String> {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    let (_, tag) = last_segment.split_once(':')?;
    VERSION
        .captures(tag)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Classifies the mesh installed in one cluster
pub struct MeshClassifier<'a> {
    probe: &'a dyn ClusterProbe,
    layout: &'a MeshLayout,
}

impl<'a> MeshClassifier<'a> {
    pub fn new(probe: &'a dyn ClusterProbe, layout: &'a MeshLayout) -> Self {
        Self { probe, layout }
    }

    /// Produce a fresh [`MeshState`]
    pub async fn detect(&self) -> MeshState {
        let layout = self.layout;

        if !self.probe.namespace_exists(&layout.namespace).await {
            info!(namespace = %layout.namespace, "mesh namespace not found");
            return MeshState::not_installed(format!(
                "namespace {} not found",
                layout.namespace
            ));
        }

        let Some(control_plane) = self
            .probe
            .get_resource(
                ResourceKind::Deployment,
                &layout.control_plane,
                Some(&layout.namespace),
            )
            .await
        else {
            info!(deployment = %layout.control_plane, "mesh control plane not found");
            return MeshState::not_installed(format!(
                "deployment {}/{} not found",
                layout.namespace, layout.control_plane
            ));
        };

        let version = control_plane
            .primary_container()
            .and_then(|c| parse_version(&c.image));
        let healthy = control_plane
            .replicas
            .is_some_and(|r| r.ready >= 1 && r.ready == r.desired);
        let has_gateway = self
            .probe
            .get_resource(
                ResourceKind::Deployment,
                &layout.ingress_gateway,
                Some(&layout.namespace),
            )
            .await
            .is_some();

        let state = match self.classify_mode().await {
            Some(signal) => MeshState::installed(
                signal.mode(),
                ModeSource::Signal(signal.name().to_string()),
                healthy,
                version,
                has_gateway,
                format!("mode {} via {}", signal.mode(), signal.name()),
            ),
            None => MeshState::installed(
                MeshMode::Sidecar,
                ModeSource::Fallback,
                healthy,
                version,
                has_gateway,
                format!(
                    "mode {} (no ambient or sidecar signal matched); assuming {} for compatibility",
                    MeshMode::Unknown,
                    MeshMode::Sidecar
                ),
            ),
        };

        info!(
            mode = %state.mode(),
            resolved = state.is_mode_resolved(),
            healthy = state.is_healthy(),
            version = state.version().unwrap_or("unknown"),
            gateway = state.has_gateway(),
            "mesh detected"
        );
        state
    }

    /// First signal in priority order that was observed.
    ///
    /// All signals are probed concurrently; only the ranking is ordered.
    pub async fn classify_mode(&self) -> Option<ModeSignal> {
        let observations = join_all(
            ModeSignal::CASCADE
                .iter()
                .map(|signal| signal.observe(self.probe, self.layout)),
        )
        .await;

        ModeSignal::CASCADE
            .into_iter()
            .zip(observations)
            .find_map(|(signal, seen)| seen.then_some(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ContainerDescriptor;
    use crate::testing::FakeCluster;

    fn layout() -> MeshLayout {
        MeshLayout::default()
    }

    /// Control plane present and healthy, no mode signal
    fn bare_mesh() -> FakeCluster {
        FakeCluster::new()
            .with_namespace("istio-system")
            .with_resource(
                ResourceKind::Deployment,
                ResourceDescriptor::new("istiod")
                    .in_namespace("istio-system")
                    .with_container(ContainerDescriptor::new(
                        "discovery",
                        "docker.io/istio/pilot:1.22.1",
                    ))
                    .with_replicas(1, 1),
            )
    }

    fn with_signal(cluster: FakeCluster, signal: ModeSignal) -> FakeCluster {
        match signal {
            ModeSignal::NodeProxyDaemonSet => cluster.with_resource(
                ResourceKind::DaemonSet,
                ResourceDescriptor::new("ztunnel").in_namespace("istio-system"),
            ),
            ModeSignal::AmbientCniArgs => cluster.with_resource(
                ResourceKind::DaemonSet,
                ResourceDescriptor::new("istio-cni-node")
                    .in_namespace("kube-system")
                    .with_container(
                        ContainerDescriptor::new("install-cni", "istio/install-cni:1.22.1")
                            .with_args(["--log_output_level=default:info", "--ambient-enabled"]),
                    ),
            ),
            ModeSignal::WaypointGateway => cluster.with_resource(
                ResourceKind::Gateway,
                ResourceDescriptor::new("waypoint")
                    .in_namespace("shop")
                    .with_label(WAYPOINT_LABEL, "service"),
            ),
            ModeSignal::AmbientNamespaceLabel => cluster.with_namespace_labelled(
                "shop",
                &[(DATAPLANE_MODE_LABEL, "ambient")],
            ),
            ModeSignal::SidecarInjectorWebhook => cluster.with_resource(
                ResourceKind::MutatingWebhookConfiguration,
                ResourceDescriptor::new("istio-sidecar-injector"),
            ),
            ModeSignal::SidecarProxyContainer => cluster.with_resource(
                ResourceKind::Pod,
                ResourceDescriptor::new("checkout-7d9f")
                    .in_namespace("shop")
                    .with_container(ContainerDescriptor::new("app", "shop/checkout:2"))
                    .with_container(ContainerDescriptor::new("istio-proxy", "istio/proxyv2:1.22.1")),
            ),
        }
    }

    #[tokio::test]
    async fn missing_control_plane_is_not_installed_regardless_of_signals() {
        let mut cluster = FakeCluster::new().with_namespace("istio-system");
        for signal in ModeSignal::CASCADE {
            cluster = with_signal(cluster, signal);
        }
        let layout = layout();
        let state = MeshClassifier::new(&cluster, &layout).detect().await;
        assert!(!state.is_installed());
        assert_eq!(state.mode(), MeshMode::NotInstalled);
        assert!(state.detail().contains("istiod"));
    }

    #[tokio::test]
    async fn missing_namespace_stops_probing() {
        let cluster = FakeCluster::new();
        let layout = layout();
        let state = MeshClassifier::new(&cluster, &layout).detect().await;
        assert!(!state.is_installed());
        assert_eq!(cluster.query_count(), 1);
    }

    #[tokio::test]
    async fn each_signal_alone_yields_its_mode() {
        let layout = layout();
        for signal in ModeSignal::CASCADE {
            let cluster = with_signal(bare_mesh(), signal);
            let state = MeshClassifier::new(&cluster, &layout).detect().await;
            assert_eq!(state.mode(), signal.mode(), "signal {signal}");
            assert_eq!(
                state.source(),
                &ModeSource::Signal(signal.name().to_string())
            );
            assert!(state.is_mode_resolved());
        }
    }

    #[tokio::test]
    async fn ambient_wins_over_every_sidecar_signal() {
        let layout = layout();
        let ambient = &ModeSignal::CASCADE[..4];
        let sidecar = &ModeSignal::CASCADE[4..];
        for a in ambient {
            for s in sidecar {
                let cluster = with_signal(with_signal(bare_mesh(), *s), *a);
                let state = MeshClassifier::new(&cluster, &layout).detect().await;
                assert_eq!(state.mode(), MeshMode::Ambient, "{a} + {s}");
                assert_eq!(state.source(), &ModeSource::Signal(a.name().to_string()));
            }
        }
    }

    #[tokio::test]
    async fn highest_priority_signal_is_reported() {
        let layout = layout();
        let cluster = with_signal(
            with_signal(bare_mesh(), ModeSignal::AmbientNamespaceLabel),
            ModeSignal::NodeProxyDaemonSet,
        );
        let signal = MeshClassifier::new(&cluster, &layout).classify_mode().await;
        assert_eq!(signal, Some(ModeSignal::NodeProxyDaemonSet));
    }

    #[tokio::test]
    async fn no_signal_falls_back_to_sidecar_but_marks_unresolved() {
        let cluster = bare_mesh();
        let layout = layout();
        let state = MeshClassifier::new(&cluster, &layout).detect().await;
        assert!(state.is_installed());
        assert_eq!(state.mode(), MeshMode::Sidecar);
        assert_eq!(state.source(), &ModeSource::Fallback);
        assert!(!state.is_mode_resolved());
        assert!(state.detail().contains("Unknown"));
    }

    #[tokio::test]
    async fn cni_without_ambient_args_is_not_a_signal() {
        let cluster = bare_mesh().with_resource(
            ResourceKind::DaemonSet,
            ResourceDescriptor::new("istio-cni-node")
                .in_namespace("istio-system")
                .with_container(
                    ContainerDescriptor::new("install-cni", "istio/install-cni:1.22.1")
                        .with_args(["--log_output_level=default:info"]),
                ),
        );
        let layout = layout();
        assert!(
            !ModeSignal::AmbientCniArgs
                .observe(&cluster, &layout)
                .await
        );
    }

    #[tokio::test]
    async fn failing_probe_reads_as_absent() {
        let cluster = with_signal(bare_mesh(), ModeSignal::SidecarInjectorWebhook)
            .failing(ResourceKind::MutatingWebhookConfiguration);
        let layout = layout();
        let state = MeshClassifier::new(&cluster, &layout).detect().await;
        assert_eq!(state.source(), &ModeSource::Fallback);
    }

    #[tokio::test]
    async fn health_version_and_gateway() {
        let layout = layout();
        let cluster = bare_mesh().with_resource(
            ResourceKind::Deployment,
            ResourceDescriptor::new("istio-ingressgateway").in_namespace("istio-system"),
        );
        let state = MeshClassifier::new(&cluster, &layout).detect().await;
        assert!(state.is_healthy());
        assert_eq!(state.version(), Some("1.22.1"));
        assert!(state.has_gateway());

        let degraded = FakeCluster::new()
            .with_namespace("istio-system")
            .with_resource(
                ResourceKind::Deployment,
                ResourceDescriptor::new("istiod")
                    .in_namespace("istio-system")
                    .with_container(ContainerDescriptor::new("discovery", "istio/pilot"))
                    .with_replicas(2, 1),
            );
        let state = MeshClassifier::new(&degraded, &layout).detect().await;
        assert!(!state.is_healthy());
        assert_eq!(state.version(), None);
        assert!(!state.has_gateway());

        let scaled_down = FakeCluster::new()
            .with_namespace("istio-system")
            .with_resource(
                ResourceKind::Deployment,
                ResourceDescriptor::new("istiod")
                    .in_namespace("istio-system")
                    .with_replicas(0, 0),
            );
        let state = MeshClassifier::new(&scaled_down, &layout).detect().await;
        assert!(state.is_installed());
        assert!(!state.is_healthy());
    }

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("istio/pilot:1.22.1"), Some("1.22.1".into()));
        assert_eq!(
            parse_version("gcr.io/istio-release/pilot:1.23.0-distroless"),
            Some("1.23.0".into())
        );
        assert_eq!(parse_version("registry:5000/istio/pilot:v1.21"), Some("1.21".into()));
        assert_eq!(
            parse_version("istio/pilot:1.22.1@sha256:abcdef0123"),
            Some("1.22.1".into())
        );
        assert_eq!(parse_version("registry:5000/istio/pilot"), None);
        assert_eq!(parse_version("istio/pilot:latest"), None);
    }
}
