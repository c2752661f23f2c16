use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::info;

use crate::model::Target;

use super::{resolve_deployment, Action, ActionError};

/* ============================= TARGET MATH ============================= */

fn parse_count(raw: &str) -> Result<i32, ActionError> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| ActionError::InvalidParams(format!("'{raw}' is not a replica count")))
}

/// Desired replicas for scale-up. `+N` is relative, a bare number is
/// absolute, default `+1`. The result never drops below 1; exceeding
/// `max_replicas` is an error, not a clamp.
pub(crate) fn scale_up_target(
    current: i32,
    params: &BTreeMap<String, String>,
) -> Result<i32, ActionError> {
    let raw = params.get("replicas").map(String::as_str).unwrap_or("+1");
    let desired = match raw.strip_prefix('+') {
        Some(delta) => current + parse_count(delta)?,
        None => parse_count(raw)?,
    };
    let desired = desired.max(1);

    if let Some(max_raw) = params.get("max_replicas") {
        let max = parse_count(max_raw)?;
        if desired > max {
            return Err(ActionError::Failed(format!(
                "scaling to {desired} replicas exceeds max_replicas {max}"
            )));
        }
    }
    Ok(desired)
}

/// Desired replicas for scale-down. `-N` is relative, a bare number is
/// absolute, default `-1`. The result is clamped to `min_replicas`
/// (default 1) rather than rejected.
pub(crate) fn scale_down_target(
    current: i32,
    params: &BTreeMap<String, String>,
) -> Result<i32, ActionError> {
    let raw = params.get("replicas").map(String::as_str).unwrap_or("-1");
    let desired = match raw.strip_prefix('-') {
        Some(delta) => current - parse_count(delta)?,
        None => parse_count(raw)?,
    };

    let floor = match params.get("min_replicas") {
        Some(raw) => parse_count(raw)?,
        None => 1,
    };
    Ok(desired.max(floor))
}

fn validate_scale_params(
    params: &BTreeMap<String, String>,
    sign: char,
    bound_key: &str,
) -> Result<(), ActionError> {
    if let Some(raw) = params.get("replicas") {
        let digits = raw.strip_prefix(sign).unwrap_or(raw);
        parse_count(digits)?;
    }
    if let Some(raw) = params.get(bound_key) {
        parse_count(raw)?;
    }
    Ok(())
}

/* ============================= SHARED PATCH ============================= */

async fn patch_replicas(
    client: &Client,
    namespace: &str,
    deployment: &str,
    replicas: i32,
) -> Result<(), ActionError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "spec": { "replicas": replicas } });
    api.patch(deployment, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn current_replicas(
    client: &Client,
    namespace: &str,
    deployment: &str,
) -> Result<i32, ActionError> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let dep = api.get(deployment).await?;
    Ok(dep.spec.and_then(|s| s.replicas).unwrap_or(1))
}

/* ============================= SCALE UP ============================= */

/// Raise the owning Deployment's replica count.
pub struct ScaleUp {
    client: Client,
}

impl ScaleUp {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Action for ScaleUp {
    fn name(&self) -> &'static str {
        "scale-up"
    }

    fn validate(&self, params: &BTreeMap<String, String>) -> Result<(), ActionError> {
        validate_scale_params(params, '+', "max_replicas")
    }

    async fn execute(
        &self,
        target: &Target,
        params: &BTreeMap<String, String>,
    ) -> Result<(), ActionError> {
        let deployment = resolve_deployment(&self.client, target).await?;
        let current = current_replicas(&self.client, &target.namespace, &deployment).await?;
        let desired = scale_up_target(current, params)?;

        patch_replicas(&self.client, &target.namespace, &deployment, desired).await?;
        info!(
            namespace = %target.namespace,
            deployment = %deployment,
            from = current,
            to = desired,
            "deployment_scaled_up"
        );
        Ok(())
    }
}

/* ============================= SCALE DOWN ============================= */

/// Lower the owning Deployment's replica count, never below the floor.
pub struct ScaleDown {
    client: Client,
}

impl ScaleDown {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Action for ScaleDown {
    fn name(&self) -> &'static str {
        "scale-down"
    }

    fn validate(&self, params: &BTreeMap<String, String>) -> Result<(), ActionError> {
        validate_scale_params(params, '-', "min_replicas")
    }

    async fn execute(
        &self,
        target: &Target,
        params: &BTreeMap<String, String>,
    ) -> Result<(), ActionError> {
        let deployment = resolve_deployment(&self.client, target).await?;
        let current = current_replicas(&self.client, &target.namespace, &deployment).await?;
        let desired = scale_down_target(current, params)?;

        patch_replicas(&self.client, &target.namespace, &deployment, desired).await?;
        info!(
            namespace = %target.namespace,
            deployment = %deployment,
            from = current,
            to = desired,
            "deployment_scaled_down"
        );
        Ok(())
    }
}

/* ============================= TESTS ============================= */
