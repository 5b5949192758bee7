//! Rollout orchestration
//!
//! Runs the phase sequence for a deploy or a rollback. Phases run strictly in
//! order since each consumes what the previous one produced. Cancellation is
//! observed between phases only. Install-vs-upgrade is decided right before
//! each apply so that a re-run picks up wherever the cluster actually is.

mod phase;
mod report;

pub use phase::{Phase, PhaseOutcome, PhaseStatus};
pub use report::{Operation, ReadinessResult, RolloutReport, RolloutStatus};

use std::future::Future;
use std::sync::LazyLock;
use std::time::Instant;

use futures::future::join_all;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::MeshClassifier;
use crate::client::{
    ClusterClient, InstallDecision, Installer, ReadinessTarget, ReleasePlan, WorkloadKind,
};
use crate::config::StackConfig;
use crate::error::{Result, RolloutError};
use crate::generators::{
    self, NETWORK_POLICY_NAME, ServiceExposure, VisualizationAuth, mesh_observability::DEPLOYMENT_NAME,
};
use crate::probe::{ClusterProbe, ResourceKind};
use crate::types::{CapabilityModel, IdentityInput, MeshState, Target, Versions};

static CHART_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?$")
        .expect("chart version regex is valid")
});
static IMAGE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("image tag regex is valid")
});

/// Kube context name prefixes used by local single-node runtimes
const LOCAL_CONTEXT_PREFIXES: [&str; 6] = [
    "kind-",
    "minikube",
    "docker-desktop",
    "rancher-desktop",
    "k3d-",
    "orbstack",
];

/// Operator input for a deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    pub target: Target,
    pub identity: IdentityInput,
    /// Overrides the configured metrics chart version
    pub metrics_version: Option<String>,
    /// Overrides the configured visualization image tag
    pub visualization_image_tag: Option<String>,
    pub load_balancer: bool,
}

impl DeployOptions {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            identity: IdentityInput::default(),
            metrics_version: None,
            visualization_image_tag: None,
            load_balancer: false,
        }
    }
}

/// Operator input for a rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackOptions {
    pub target: Target,
    pub remove_namespace: bool,
}

/// Whether the kube context name looks like a local runtime
pub fn is_local_context(context: &str) -> bool {
    LOCAL_CONTEXT_PREFIXES
        .iter()
        .any(|prefix| context.starts_with(prefix))
}

/// Workloads whose readiness ends a deploy
pub fn readiness_targets(model: &CapabilityModel, config: &StackConfig) -> Vec<ReadinessTarget> {
    let ns = config.namespace.as_str();
    let metrics = &config.metrics.release;

    let mut targets = vec![
        ReadinessTarget::new(WorkloadKind::Deployment, format!("{metrics}-operator"), ns),
        ReadinessTarget::new(WorkloadKind::Deployment, format!("{metrics}-grafana"), ns),
        ReadinessTarget::new(
            WorkloadKind::StatefulSet,
            format!("prometheus-{metrics}-prometheus"),
            ns,
        ),
    ];
    if generators::node_agent_enabled(model) {
        targets.push(ReadinessTarget::new(
            WorkloadKind::DaemonSet,
            format!("{metrics}-prometheus-node-exporter"),
            ns,
        ));
    }
    targets.push(ReadinessTarget::new(
        WorkloadKind::Deployment,
        config.tracing.release.as_str(),
        ns,
    ));
    if model.mesh_present() {
        targets.push(ReadinessTarget::new(WorkloadKind::Deployment, DEPLOYMENT_NAME, ns));
    }
    targets
}

/// Drives a deploy or rollback against one cluster
pub struct RolloutOrchestrator<'a> {
    config: StackConfig,
    probe: &'a dyn ClusterProbe,
    client: &'a dyn ClusterClient,
    installer: &'a dyn Installer,
    cancel: CancellationToken,
}

impl<'a> RolloutOrchestrator<'a> {
    pub fn new(
        config: StackConfig,
        probe: &'a dyn ClusterProbe,
        client: &'a dyn ClusterClient,
        installer: &'a dyn Installer,
    ) -> Self {
        Self {
            config,
            probe,
            client,
            installer,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between phases once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Connectivity check followed by mesh classification only
    pub async fn detect(&self) -> Result<MeshState> {
        let version = self.client.check_connectivity().await?;
        info!(server = %version, "connected to cluster");
        Ok(MeshClassifier::new(self.probe, &self.config.mesh)
            .detect()
            .await)
    }

    pub async fn deploy(&self, options: &DeployOptions) -> RolloutReport {
        let mut report = RolloutReport::new(Operation::Deploy, options.target);
        info!(env = %options.target, "starting deploy");
        let result = self.run_deploy(options, &mut report).await;
        report.finish(result);
        info!(status = %report.status(), "deploy finished");
        report
    }

    pub async fn rollback(&self, options: &RollbackOptions) -> RolloutReport {
        let mut report = RolloutReport::new(Operation::Rollback, options.target);
        info!(env = %options.target, "starting rollback");
        let result = self.run_rollback(options, &mut report).await;
        report.finish(result);
        info!(status = %report.status(), "rollback finished");
        report
    }

    /// Run one phase: check for cancellation, await the work and record how
    /// it ended. Any error returned by `work` aborts the run.
    async fn phase<T>(
        &self,
        report: &mut RolloutReport,
        phase: Phase,
        work: impl Future<Output = Result<(T, PhaseStatus)>>,
    ) -> Result<T> {
        if self.cancel.is_cancelled() {
            warn!(phase = %phase, "cancellation requested");
            return Err(RolloutError::Cancelled { before: phase });
        }

        debug!(phase = %phase, "phase started");
        let started = Instant::now();
        let result = work.await;
        let elapsed = started.elapsed();

        match result {
            Ok((value, status)) => {
                match &status {
                    PhaseStatus::Warned(warnings) => {
                        for w in warnings {
                            warn!(phase = %phase, "{w}");
                        }
                    }
                    PhaseStatus::Degraded(errors) => {
                        for e in errors {
                            warn!(phase = %phase, error = %e, "non-fatal failure");
                        }
                    }
                    _ => info!(phase = %phase, elapsed_ms = elapsed.as_millis() as u64, "phase done"),
                }
                report.record(PhaseOutcome {
                    phase,
                    status,
                    elapsed,
                });
                Ok(value)
            }
            Err(err) => {
                error!(phase = %phase, error = %err, "phase failed");
                report.record(PhaseOutcome {
                    phase,
                    status: PhaseStatus::Failed(err.clone()),
                    elapsed,
                });
                Err(err)
            }
        }
    }

    async fn run_deploy(&self, options: &DeployOptions, report: &mut RolloutReport) -> Result<()> {
        self.phase(report, Phase::Preflight, self.preflight()).await?;
        self.phase(report, Phase::Authenticate, self.authenticate(options.target))
            .await?;

        let versions = Versions {
            metrics_version: options
                .metrics_version
                .clone()
                .unwrap_or_else(|| self.config.metrics.version.clone()),
            visualization_image_tag: options
                .visualization_image_tag
                .clone()
                .unwrap_or_else(|| self.config.visualization_image_tag.clone()),
        };
        let model = self
            .phase(
                report,
                Phase::Detect,
                self.build_model(options.target, &options.identity, versions, options.load_balancer),
            )
            .await?;
        report.capability = Some(model.clone());

        self.phase(report, Phase::ValidateImages, self.validate_images(&model))
            .await?;
        self.phase(report, Phase::Namespace, self.namespace(&model))
            .await?;

        let exposure = generators::service_exposure(&model);
        let metrics = generators::metrics_release(&model, &self.config, &exposure);
        let auth = VisualizationAuth::for_model(&model);
        let advisories: Vec<String> = auth.warning().map(str::to_string).into_iter().collect();
        let decision = self
            .phase(
                report,
                Phase::InstallMetrics,
                self.install(metrics, advisories),
            )
            .await?;
        report
            .decisions
            .push((self.config.metrics.release.clone(), decision));

        let traces = generators::tracing_release(&model, &self.config, &exposure);
        let decision = self
            .phase(report, Phase::InstallTracing, self.install(traces, Vec::new()))
            .await?;
        report
            .decisions
            .push((self.config.tracing.release.clone(), decision));

        let decision = self
            .phase(
                report,
                Phase::InstallMeshObservability,
                self.install_mesh_observability(&model, &exposure),
            )
            .await?;
        if let Some(decision) = decision {
            report
                .decisions
                .push((self.config.mesh_observability.release.clone(), decision));
        }

        let decision = self
            .phase(
                report,
                Phase::InstallNetworkPolicy,
                self.install_network_policy(&model),
            )
            .await?;
        report
            .decisions
            .push((NETWORK_POLICY_NAME.to_string(), decision));

        let readiness = self
            .phase(report, Phase::AwaitReadiness, self.await_readiness(&model))
            .await?;
        report.readiness = readiness;

        self.phase(report, Phase::Report, async {
            Ok::<_, RolloutError>(((), PhaseStatus::Completed))
        })
            .await
    }

    async fn run_rollback(
        &self,
        options: &RollbackOptions,
        report: &mut RolloutReport,
    ) -> Result<()> {
        self.phase(report, Phase::Preflight, self.preflight()).await?;

        let versions = Versions {
            metrics_version: self.config.metrics.version.clone(),
            visualization_image_tag: self.config.visualization_image_tag.clone(),
        };
        let model = self
            .phase(
                report,
                Phase::Detect,
                self.build_model(options.target, &IdentityInput::default(), versions, false),
            )
            .await?;
        report.capability = Some(model);

        let ns = self.config.namespace.as_str();
        self.phase(
            report,
            Phase::RemoveNetworkPolicy,
            self.remove_network_policy(ns),
        )
        .await?;
        for (phase, release) in [
            (
                Phase::UninstallMeshObservability,
                &self.config.mesh_observability.release,
            ),
            (Phase::UninstallTracing, &self.config.tracing.release),
            (Phase::UninstallMetrics, &self.config.metrics.release),
        ] {
            self.phase(report, phase, self.uninstall(release, ns)).await?;
        }
        self.phase(
            report,
            Phase::RemoveNamespace,
            self.remove_namespace(ns, options.remove_namespace),
        )
        .await
    }

    async fn preflight(&self) -> Result<((), PhaseStatus)> {
        let server = self.client.check_connectivity().await?;
        info!(server = %server, "cluster reachable");
        let tools = self.installer.check_tools().await?;
        debug!(tools = ?tools, "installer tooling available");
        Ok(((), PhaseStatus::Completed))
    }

    async fn authenticate(&self, target: Target) -> Result<((), PhaseStatus)> {
        let mut warnings = Vec::new();
        match self.client.current_context() {
            None => warnings.push("no current kube context; relying on in-cluster credentials".to_string()),
            Some(context) => {
                info!(context = %context, "using kube context");
                let local = is_local_context(&context);
                match target {
                    Target::Local if !local => warnings.push(format!(
                        "target is local but context {context} does not look like a local cluster"
                    )),
                    Target::Managed if local => warnings.push(format!(
                        "target is managed but context {context} looks like a local cluster"
                    )),
                    _ => {}
                }
            }
        }
        Ok(((), PhaseStatus::from_warnings(warnings)))
    }

    async fn build_model(
        &self,
        target: Target,
        identity: &IdentityInput,
        versions: Versions,
        load_balancer: bool,
    ) -> Result<(CapabilityModel, PhaseStatus)> {
        let mesh = MeshClassifier::new(self.probe, &self.config.mesh)
            .detect()
            .await;
        let status = if mesh.is_installed() && !mesh.is_mode_resolved() {
            PhaseStatus::Degraded(vec![RolloutError::ClassificationAmbiguity(
                mesh.detail().to_string(),
            )])
        } else {
            PhaseStatus::Completed
        };
        let model = CapabilityModel::new(target, mesh, identity, versions, load_balancer)?;
        Ok((model, status))
    }

    async fn validate_images(&self, model: &CapabilityModel) -> Result<((), PhaseStatus)> {
        let versions = model.versions();
        let charts = [
            (&self.config.metrics.release, versions.metrics_version.as_str()),
            (&self.config.tracing.release, self.config.tracing.version.as_str()),
            (
                &self.config.mesh_observability.release,
                self.config.mesh_observability.version.as_str(),
            ),
        ];
        for (release, version) in charts {
            if !CHART_VERSION.is_match(version) {
                return Err(RolloutError::Configuration(format!(
                    "chart version {version:?} for {release} is not a semantic version"
                )));
            }
        }
        if !IMAGE_TAG.is_match(&versions.visualization_image_tag) {
            return Err(RolloutError::Configuration(format!(
                "visualization image tag {:?} is not a valid image tag",
                versions.visualization_image_tag
            )));
        }
        Ok(((), PhaseStatus::Completed))
    }

    async fn namespace(&self, model: &CapabilityModel) -> Result<((), PhaseStatus)> {
        let policy = generators::namespace_policy(model);
        debug!(namespace = %self.config.namespace, labels = ?policy.labels, "ensuring namespace");
        self.client
            .ensure_namespace(&self.config.namespace, &policy.labels)
            .await?;
        Ok(((), PhaseStatus::Completed))
    }

    async fn install(
        &self,
        plan: ReleasePlan,
        advisories: Vec<String>,
    ) -> Result<(InstallDecision, PhaseStatus)> {
        let decision = InstallDecision::for_release(self.probe, &plan.release, &plan.namespace).await;
        info!(release = %plan.release, chart = %plan.chart, version = %plan.version, %decision, "applying release");
        self.installer.apply_release(&plan, decision).await?;
        Ok((decision, PhaseStatus::from_warnings(advisories)))
    }

    async fn install_mesh_observability(
        &self,
        model: &CapabilityModel,
        exposure: &ServiceExposure,
    ) -> Result<(Option<InstallDecision>, PhaseStatus)> {
        match generators::mesh_observability_release(model, &self.config, exposure) {
            None => Ok((
                None,
                PhaseStatus::Skipped("no service mesh detected".to_string()),
            )),
            Some(plan) => {
                let (decision, status) = self.install(plan, Vec::new()).await?;
                Ok((Some(decision), status))
            }
        }
    }

    async fn install_network_policy(
        &self,
        model: &CapabilityModel,
    ) -> Result<(InstallDecision, PhaseStatus)> {
        let manifest = generators::network_policy(model, &self.config)?;
        let decision = InstallDecision::for_resource(
            self.probe,
            ResourceKind::NetworkPolicy,
            NETWORK_POLICY_NAME,
            &self.config.namespace,
        )
        .await;
        info!(policy = NETWORK_POLICY_NAME, %decision, "applying network policy");
        self.client.apply_manifest(&manifest, decision).await?;
        Ok((decision, PhaseStatus::Completed))
    }

    async fn await_readiness(
        &self,
        model: &CapabilityModel,
    ) -> Result<(Vec<ReadinessResult>, PhaseStatus)> {
        let timeout = self.config.timeouts.readiness();
        let targets = readiness_targets(model, &self.config);
        let ready = join_all(
            targets
                .iter()
                .map(|target| self.client.wait_ready(target, timeout)),
        )
        .await;

        let results: Vec<ReadinessResult> = targets
            .into_iter()
            .zip(ready)
            .map(|(target, ready)| ReadinessResult { target, ready })
            .collect();
        let timeouts = results
            .iter()
            .filter(|r| !r.ready)
            .map(|r| RolloutError::ReadinessTimeout {
                resource: r.target.to_string(),
                waited_secs: timeout.as_secs(),
            })
            .collect();
        Ok((results, PhaseStatus::from_errors(timeouts)))
    }

    async fn remove_network_policy(&self, ns: &str) -> Result<((), PhaseStatus)> {
        let status = match self
            .client
            .delete_resource(ResourceKind::NetworkPolicy, NETWORK_POLICY_NAME, ns)
            .await
        {
            Ok(true) => PhaseStatus::Completed,
            Ok(false) => PhaseStatus::Skipped("network policy not present".to_string()),
            Err(err) => PhaseStatus::Degraded(vec![err]),
        };
        Ok(((), status))
    }

    async fn uninstall(&self, release: &str, ns: &str) -> Result<((), PhaseStatus)> {
        if InstallDecision::for_release(self.probe, release, ns).await == InstallDecision::Install {
            return Ok((
                (),
                PhaseStatus::Skipped(format!("release {release} not installed")),
            ));
        }
        info!(release = %release, namespace = %ns, "uninstalling release");
        let status = match self.installer.uninstall_release(release, ns).await {
            Ok(()) => PhaseStatus::Completed,
            Err(err) => PhaseStatus::Degraded(vec![err]),
        };
        Ok(((), status))
    }

    async fn remove_namespace(&self, ns: &str, remove: bool) -> Result<((), PhaseStatus)> {
        if !remove {
            return Ok((
                (),
                PhaseStatus::Skipped(format!(
                    "namespace {ns} kept; pass --remove-namespace to delete it"
                )),
            ));
        }
        let status = match self.client.delete_namespace(ns).await {
            Ok(true) => PhaseStatus::Completed,
            Ok(false) => PhaseStatus::Skipped(format!("namespace {ns} already absent")),
            Err(err) => PhaseStatus::Degraded(vec![err]),
        };
        Ok(((), status))
    }
}
