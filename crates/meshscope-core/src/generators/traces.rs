//! Tracing backend (all-in-one Jaeger)

use serde_json::json;

use super::exposure::ServiceExposure;
use crate::client::ReleasePlan;
use crate::config::StackConfig;
use crate::fragment::ConfigFragment;
use crate::types::CapabilityModel;

/// Zipkin receiver the mesh proxies report spans to
pub const ZIPKIN_PORT: u16 = 9411;
/// Query UI and API port
pub const QUERY_PORT: u16 = 16686;

pub fn tracing_values(model: &CapabilityModel, exposure: &ServiceExposure) -> ConfigFragment {
    let mut values = ConfigFragment::new()
        .with(&["provisionDataStore", "cassandra"], false)
        .with(&["storage", "type"], "memory")
        .with(&["allInOne", "enabled"], true)
        .with(&["agent", "enabled"], false)
        .with(&["collector", "enabled"], false)
        .with(&["query", "enabled"], false);

    if model.mesh_present() {
        values.set(
            &["allInOne", "extraEnv"],
            json!([{
                "name": "COLLECTOR_ZIPKIN_HOST_PORT",
                "value": format!(":{ZIPKIN_PORT}")
            }]),
        );
    }
    exposure.apply_to(&mut values, &["query", "service"]);
    values
}

pub fn tracing_release(
    model: &CapabilityModel,
    config: &StackConfig,
    exposure: &ServiceExposure,
) -> ReleasePlan {
    ReleasePlan::new(
        &config.tracing,
        config.tracing.version.as_str(),
        config.namespace.as_str(),
        tracing_values(model, exposure),
    )
}
