//! Domain types for meshscope
//!
//! These types describe what was learned about the cluster and what the
//! operator asked for. They are built once per run and read-only afterwards.

use serde::{Deserialize, Serialize};

use crate::error::RolloutError;

/// Where the stack is being deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Single-node development cluster (kind, minikube, Docker Desktop, ...)
    Local,
    /// Cloud-managed cluster
    Managed,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Local => write!(f, "local"),
            Target::Managed => write!(f, "managed"),
        }
    }
}

/// Service mesh data plane mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshMode {
    NotInstalled,
    Sidecar,
    Ambient,
    Unknown,
}

impl MeshMode {
    pub fn symbol(&self) -> &'static str {
        match self {
            MeshMode::NotInstalled => "○",
            MeshMode::Sidecar => "◐",
            MeshMode::Ambient => "●",
            MeshMode::Unknown => "?",
        }
    }
}

impl std::fmt::Display for MeshMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshMode::NotInstalled => write!(f, "NotInstalled"),
            MeshMode::Sidecar => write!(f, "Sidecar"),
            MeshMode::Ambient => write!(f, "Ambient"),
            MeshMode::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How a [`MeshState`] arrived at its mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeSource {
    /// No control plane, nothing to classify
    NotApplicable,
    /// A detection signal matched
    Signal(String),
    /// No signal matched; the mode is the compatibility default
    Fallback,
}

impl std::fmt::Display for ModeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeSource::NotApplicable => write!(f, "n/a"),
            ModeSource::Signal(signal) => write!(f, "{signal}"),
            ModeSource::Fallback => write!(f, "fallback (no signal matched)"),
        }
    }
}

/// Result of mesh detection.
///
/// `mode == NotInstalled` exactly when `installed == false`; the constructors
/// are the only way to build one, so the invariant always holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeshState {
    installed: bool,
    mode: MeshMode,
    source: ModeSource,
    healthy: bool,
    version: Option<String>,
    has_gateway: bool,
    detail: String,
}

impl MeshState {
    /// No control plane was found
    pub fn not_installed(detail: impl Into<String>) -> Self {
        Self {
            installed: false,
            mode: MeshMode::NotInstalled,
            source: ModeSource::NotApplicable,
            healthy: false,
            version: None,
            has_gateway: false,
            detail: detail.into(),
        }
    }

    /// A control plane was found running in `mode`.
    ///
    /// `NotInstalled` is not a valid mode for an installed mesh and is
    /// recorded as `Unknown`.
    pub fn installed(
        mode: MeshMode,
        source: ModeSource,
        healthy: bool,
        version: Option<String>,
        has_gateway: bool,
        detail: impl Into<String>,
    ) -> Self {
        let mode = match mode {
            MeshMode::NotInstalled => MeshMode::Unknown,
            other => other,
        };
        Self {
            installed: true,
            mode,
            source,
            healthy,
            version,
            has_gateway,
            detail: detail.into(),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn mode(&self) -> MeshMode {
        self.mode
    }

    pub fn source(&self) -> &ModeSource {
        &self.source
    }

    /// False when the mode is the `Sidecar` fallback rather than a detected mode
    pub fn is_mode_resolved(&self) -> bool {
        !matches!(self.source, ModeSource::Fallback)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn has_gateway(&self) -> bool {
        self.has_gateway
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// One-line label for reports
    pub fn label(&self) -> String {
        if !self.installed {
            return "not installed".to_string();
        }
        let version = self.version.as_deref().unwrap_or("unknown version");
        let health = if self.healthy { "healthy" } else { "unhealthy" };
        let mode = if self.is_mode_resolved() {
            self.mode.to_string()
        } else {
            format!("{} (fallback)", self.mode)
        };
        format!("{mode}, {version}, {health}")
    }
}

/// Identity provider binding for a managed cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub tenant_id: String,
    pub group_id: String,
}

/// Identity parameters as supplied by the operator, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityInput {
    pub tenant_id: Option<String>,
    pub group_id: Option<String>,
}

impl IdentityInput {
    pub fn new(tenant_id: Option<String>, group_id: Option<String>) -> Self {
        Self {
            tenant_id,
            group_id,
        }
    }

    /// Validate the pair against the target.
    ///
    /// A managed target rejects half an identity. A local target never uses
    /// identity for auth, so a partial pair there is dropped.
    pub fn resolve(&self, target: Target) -> Result<Option<Identity>, RolloutError> {
        let tenant = non_blank(self.tenant_id.as_deref());
        let group = non_blank(self.group_id.as_deref());

        match (tenant, group) {
            (Some(tenant_id), Some(group_id)) => Ok(Some(Identity {
                tenant_id: tenant_id.to_string(),
                group_id: group_id.to_string(),
            })),
            (None, None) => Ok(None),
            (tenant, _) if target == Target::Managed => {
                let (given, missing) = if tenant.is_some() {
                    ("tenant id", "group id")
                } else {
                    ("group id", "tenant id")
                };
                Err(RolloutError::Configuration(format!(
                    "{given} supplied without {missing}; pass both --tenant-id and --group-id, or neither"
                )))
            }
            _ => {
                tracing::debug!("ignoring partial identity for local target");
                Ok(None)
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Component versions in effect for this run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versions {
    /// Metrics backend chart version
    pub metrics_version: String,
    /// Visualization backend image tag
    pub visualization_image_tag: String,
}

/// Everything the configuration generators are allowed to know.
///
/// Built once per rollout or teardown pass and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityModel {
    target: Target,
    mesh: MeshState,
    identity: Option<Identity>,
    versions: Versions,
    load_balancer: bool,
}

impl CapabilityModel {
    pub fn new(
        target: Target,
        mesh: MeshState,
        identity: &IdentityInput,
        versions: Versions,
        load_balancer: bool,
    ) -> Result<Self, RolloutError> {
        let identity = identity.resolve(target)?;
        Ok(Self {
            target,
            mesh,
            identity,
            versions,
            load_balancer,
        })
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn mesh(&self) -> &MeshState {
        &self.mesh
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn versions(&self) -> &Versions {
        &self.versions
    }

    pub fn prefers_load_balancer(&self) -> bool {
        self.load_balancer
    }

    pub fn mesh_present(&self) -> bool {
        self.mesh.is_installed()
    }
}
