//! Helm command execution
//!
//! Charts are installed by shelling out to the `helm` binary. Values are
//! passed through a temporary file, never through `--set`, so nested keys and
//! lists survive unchanged.
//!
//! Installs do not pass `--wait`: workload readiness is judged afterwards by
//! the orchestrator, where a slow rollout is a warning rather than a failed
//! apply. `--timeout` still bounds hooks.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use meshscope_core::{InstallDecision, Installer, ReleasePlan, Result, RolloutError};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ClusterError;

/// Extra time granted to the process beyond helm's own `--timeout`
const PROCESS_SLACK: Duration = Duration::from_secs(30);

/// Installs releases with the helm CLI
#[derive(Debug, Clone)]
pub struct HelmInstaller {
    binary: PathBuf,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    timeout: Duration,
}

impl HelmInstaller {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("helm"),
            kubeconfig: None,
            context: None,
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Point helm at the same cluster as the kube client
    pub fn with_cluster(mut self, kubeconfig: Option<&Path>, context: Option<&str>) -> Self {
        self.kubeconfig = kubeconfig.map(Path::to_path_buf);
        self.context = context.map(str::to_string);
        self
    }

    fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(path.display().to_string());
        }
        if let Some(context) = &self.context {
            args.push("--kube-context".to_string());
            args.push(context.clone());
        }
        args
    }

    fn release_args(&self, plan: &ReleasePlan, decision: InstallDecision, values: &Path) -> Vec<String> {
        // `--install` lets an upgrade recover a release whose only revision
        // failed or is still pending
        let verb: &[&str] = match decision {
            InstallDecision::Install => &["install"],
            InstallDecision::Upgrade => &["upgrade", "--install"],
        };
        let mut args: Vec<String> = verb.iter().map(|v| v.to_string()).collect();
        args.extend([
            plan.release.clone(),
            plan.chart.clone(),
            "--namespace".to_string(),
            plan.namespace.clone(),
            "--version".to_string(),
            plan.version.clone(),
            "--values".to_string(),
            values.display().to_string(),
            "--timeout".to_string(),
            format!("{}s", self.timeout.as_secs()),
        ]);
        args
    }

    /// Run helm and return stdout
    async fn run(&self, args: &[String]) -> std::result::Result<String, ClusterError> {
        let mut command = Command::new(&self.binary);
        command.args(args).args(self.global_args()).kill_on_drop(true);
        let rendered = format!("helm {}", args.join(" "));
        debug!(command = %rendered, "running helm");

        let output = match tokio::time::timeout(self.timeout + PROCESS_SLACK, command.output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClusterError::ToolMissing(self.binary.display().to_string()));
            }
            Ok(Err(e)) => return Err(ClusterError::Io(e)),
            Err(_) => {
                return Err(ClusterError::ToolFailed {
                    command: rendered,
                    stderr: format!("no exit after {}s", (self.timeout + PROCESS_SLACK).as_secs()),
                });
            }
        };

        if !output.status.success() {
            return Err(ClusterError::ToolFailed {
                command: rendered,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn add_repository(&self, plan: &ReleasePlan) -> std::result::Result<(), ClusterError> {
        let Some(alias) = plan.repository_alias() else {
            return Ok(());
        };
        let args = [
            "repo",
            "add",
            alias,
            plan.repository.as_str(),
            "--force-update",
        ]
        .map(str::to_string);
        self.run(&args).await?;
        debug!(alias, repository = %plan.repository, "chart repository registered");
        Ok(())
    }
}

/// `v3.16.2+g13654a5` -> `(3, "v3.16.2")`
fn parse_helm_version(output: &str) -> Option<(u32, String)> {
    let line = output.lines().next()?.trim();
    let version = line.split('+').next()?.trim();
    let major = version.strip_prefix('v')?.split('.').next()?.parse().ok()?;
    Some((major, version.to_string()))
}

#[async_trait]
impl Installer for HelmInstaller {
    async fn check_tools(&self) -> Result<Vec<String>> {
        let output = self.run(&["version".to_string(), "--short".to_string()]).await?;
        match parse_helm_version(&output) {
            Some((major, version)) if major >= 3 => Ok(vec![version]),
            Some((_, version)) => Err(RolloutError::Precondition {
                what: format!("helm 3 (found {version})"),
                hint: "upgrade helm to a 3.x release".to_string(),
            }),
            None => Err(RolloutError::Precondition {
                what: "helm".to_string(),
                hint: format!("could not read the helm version from {:?}", output.trim()),
            }),
        }
    }

    async fn apply_release(&self, plan: &ReleasePlan, decision: InstallDecision) -> Result<()> {
        let resource = format!("release/{}", plan.release);
        self.add_repository(plan)
            .await
            .map_err(|e| RolloutError::apply(&resource, e))?;

        let mut values = tempfile::Builder::new()
            .prefix(&format!("meshscope-{}-", plan.release))
            .suffix(".yaml")
            .tempfile()
            .map_err(|e| RolloutError::apply(&resource, e))?;
        values
            .write_all(plan.values.to_yaml()?.as_bytes())
            .map_err(|e| RolloutError::apply(&resource, e))?;

        let args = self.release_args(plan, decision, values.path());
        self.run(&args)
            .await
            .map_err(|e| RolloutError::apply(&resource, e))?;
        info!(release = %plan.release, %decision, "release applied");
        Ok(())
    }

    async fn uninstall_release(&self, release: &str, namespace: &str) -> Result<()> {
        let args = [
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            format!("{}s", self.timeout.as_secs()),
        ];
        self.run(&args)
            .await
            .map_err(|e| RolloutError::apply(format!("release/{release}"), e))?;
        info!(release, namespace, "release uninstalled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshscope_core::{ConfigFragment, StackConfig};

    fn plan() -> ReleasePlan {
        let config = StackConfig::default();
        ReleasePlan::new(
            &config.tracing,
            "3.3.1",
            "monitoring",
            ConfigFragment::new().with(&["allInOne", "enabled"], true),
        )
    }

    #[test]
    fn version_parsing() {
        assert_eq!(
            parse_helm_version("v3.16.2+g13654a5\n"),
            Some((3, "v3.16.2".to_string()))
        );
        assert_eq!(parse_helm_version("v2.17.0"), Some((2, "v2.17.0".to_string())));
        assert_eq!(parse_helm_version(""), None);
        assert_eq!(parse_helm_version("helm"), None);
    }

    #[test]
    fn upgrade_args_carry_values_and_timeout() {
        let installer = HelmInstaller::new(Duration::from_secs(300));
        let args = installer.release_args(&plan(), InstallDecision::Upgrade, Path::new("/tmp/v.yaml"));
        assert_eq!(
            args,
            vec![
                "upgrade",
                "--install",
                "jaeger",
                "jaegertracing/jaeger",
                "--namespace",
                "monitoring",
                "--version",
                "3.3.1",
                "--values",
                "/tmp/v.yaml",
                "--timeout",
                "300s",
            ]
        );
    }

    #[test]
    fn install_leaves_readiness_to_the_orchestrator() {
        let installer = HelmInstaller::new(Duration::from_secs(300));
        let args = installer.release_args(&plan(), InstallDecision::Install, Path::new("/tmp/v.yaml"));
        assert_eq!(args[..3], ["install", "jaeger", "jaegertracing/jaeger"]);
        assert!(!args.iter().any(|a| a == "--wait"));
        assert!(args.windows(2).any(|w| w[0] == "--timeout" && w[1] == "300s"));
    }

    /// A stand-in helm that appends its arguments to `helm.log` next to itself
    #[cfg(unix)]
    fn recording_helm(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let binary = dir.join("helm");
        std::fs::write(
            &binary,
            "#!/bin/sh\necho \"$@\" >> \"$(dirname \"$0\")/helm.log\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        binary
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn apply_release_registers_repo_then_upgrades_without_wait() {
        let dir = tempfile::tempdir().unwrap();
        let installer = HelmInstaller::new(Duration::from_secs(120))
            .with_binary(recording_helm(dir.path()))
            .with_cluster(None, Some("kind-dev"));

        installer
            .apply_release(&plan(), InstallDecision::Upgrade)
            .await
            .unwrap();

        let log = std::fs::read_to_string(dir.path().join("helm.log")).unwrap();
        let calls: Vec<&str> = log.lines().collect();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("repo add jaegertracing "));
        assert!(calls[1].starts_with("upgrade --install jaeger jaegertracing/jaeger "));
        assert!(calls[1].ends_with("--timeout 120s --kube-context kind-dev"));
        assert!(!calls[1].contains("--wait"));
    }

    #[test]
    fn cluster_flags_are_global() {
        let installer = HelmInstaller::new(Duration::from_secs(60))
            .with_cluster(Some(Path::new("/home/ops/.kube/prod")), Some("aks-prod"));
        assert_eq!(
            installer.global_args(),
            vec!["--kubeconfig", "/home/ops/.kube/prod", "--kube-context", "aks-prod"]
        );
        assert!(HelmInstaller::new(Duration::from_secs(60)).global_args().is_empty());
    }

    #[tokio::test]
    async fn missing_binary_is_a_precondition() {
        let installer =
            HelmInstaller::new(Duration::from_secs(5)).with_binary("/nonexistent/meshscope-helm");
        let err = installer.check_tools().await.unwrap_err();
        assert!(matches!(err, RolloutError::Precondition { .. }));
    }
}
