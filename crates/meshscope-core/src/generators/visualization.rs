//! Visualization backend (Grafana) settings
//!
//! Grafana ships inside the metrics chart, so these values live under its
//! `grafana` key and are merged into the metrics release.

use super::exposure::ServiceExposure;
use crate::fragment::ConfigFragment;
use crate::types::{CapabilityModel, Target};

const AUTHORITY: &str = "https://login.microsoftonline.com";
/// Secret holding the OAuth client credentials for external identity
pub const OAUTH_SECRET: &str = "grafana-oauth";

/// Grafana organisation role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Viewer => "Viewer",
        }
    }
}

/// How users reach the dashboards
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisualizationAuth {
    /// Everyone is an anonymous admin
    Anonymous { warning: Option<String> },
    /// Sign-in through the tenant's identity provider; members of `group_id`
    /// are admins, everyone else read-only
    ExternalIdentity { tenant_id: String, group_id: String },
}

impl VisualizationAuth {
    pub fn for_model(model: &CapabilityModel) -> Self {
        match (model.target(), model.identity()) {
            (Target::Local, _) => VisualizationAuth::Anonymous { warning: None },
            (Target::Managed, Some(identity)) => VisualizationAuth::ExternalIdentity {
                tenant_id: identity.tenant_id.clone(),
                group_id: identity.group_id.clone(),
            },
            (Target::Managed, None) => VisualizationAuth::Anonymous {
                warning: Some(
                    "no tenant/group identity supplied: dashboards on a managed cluster allow \
                     anonymous admin access"
                        .to_string(),
                ),
            },
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, VisualizationAuth::Anonymous { .. })
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            VisualizationAuth::Anonymous { warning } => warning.as_deref(),
            VisualizationAuth::ExternalIdentity { .. } => None,
        }
    }

    /// Role granted to a user in `groups`
    pub fn role_for(&self, groups: &[&str]) -> Role {
        match self {
            VisualizationAuth::Anonymous { .. } => Role::Admin,
            VisualizationAuth::ExternalIdentity { group_id, .. } => {
                if groups.iter().any(|g| *g == group_id.as_str()) {
                    Role::Admin
                } else {
                    Role::Viewer
                }
            }
        }
    }

    /// `grafana.ini` sections
    fn ini(&self) -> ConfigFragment {
        match self {
            VisualizationAuth::Anonymous { .. } => ConfigFragment::new()
                .with(&["auth.anonymous", "enabled"], true)
                .with(&["auth.anonymous", "org_role"], Role::Admin.as_str())
                .with(&["auth", "disable_login_form"], true),
            VisualizationAuth::ExternalIdentity {
                tenant_id,
                group_id,
            } => {
                let endpoint = format!("{AUTHORITY}/{tenant_id}/oauth2/v2.0");
                ConfigFragment::new()
                    .with(&["auth.anonymous", "enabled"], false)
                    .with(&["auth", "disable_login_form"], true)
                    .with(&["auth.generic_oauth", "enabled"], true)
                    .with(&["auth.generic_oauth", "name"], "Microsoft Entra ID")
                    .with(&["auth.generic_oauth", "allow_sign_up"], true)
                    .with(
                        &["auth.generic_oauth", "client_id"],
                        "$__env{GF_AUTH_GENERIC_OAUTH_CLIENT_ID}",
                    )
                    .with(
                        &["auth.generic_oauth", "client_secret"],
                        "$__env{GF_AUTH_GENERIC_OAUTH_CLIENT_SECRET}",
                    )
                    .with(&["auth.generic_oauth", "scopes"], "openid email profile")
                    .with(&["auth.generic_oauth", "auth_url"], format!("{endpoint}/authorize"))
                    .with(&["auth.generic_oauth", "token_url"], format!("{endpoint}/token"))
                    .with(&["auth.generic_oauth", "groups_attribute_path"], "groups")
                    .with(
                        &["auth.generic_oauth", "role_attribute_path"],
                        format!(
                            "contains(groups[*], '{group_id}') && '{}' || '{}'",
                            Role::Admin.as_str(),
                            Role::Viewer.as_str()
                        ),
                    )
                    .with(&["auth.generic_oauth", "role_attribute_strict"], false)
            }
        }
    }
}

/// Values for the `grafana` subchart
pub fn visualization_values(model: &CapabilityModel, exposure: &ServiceExposure) -> ConfigFragment {
    let auth = VisualizationAuth::for_model(model);

    let mut grafana = ConfigFragment::new()
        .with(&["image", "tag"], model.versions().visualization_image_tag.as_str())
        .with(&["sidecar", "dashboards", "enabled"], true)
        .with(&["sidecar", "dashboards", "searchNamespace"], "ALL");
    exposure.apply_to(&mut grafana, &["service"]);
    if let VisualizationAuth::ExternalIdentity { .. } = auth {
        grafana.set(&["envFromSecret"], OAUTH_SECRET);
    }

    let mut values = ConfigFragment::new();
    values.set(&["grafana"], grafana);
    values.set(&["grafana", "grafana.ini"], auth.ini());
    values
}
