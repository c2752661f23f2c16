pub mod delete_stuck_pods;
pub mod none;
pub mod restart_pod;
pub mod rollback;
pub mod scale;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use thiserror::Error;

use crate::model::Target;

/* ============================= CONTRACT ============================= */

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// Precondition or sweep failure on our side of the API.
    #[error("{0}")]
    Failed(String),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),
}

/// A remediation an operator can wire to a rule.
///
/// `validate` runs before every execution and must reject malformed
/// params; `execute` performs the cluster mutation. Implementations are
/// registered by name and looked up per attempt.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, params: &BTreeMap<String, String>) -> Result<(), ActionError>;

    async fn execute(
        &self,
        target: &Target,
        params: &BTreeMap<String, String>,
    ) -> Result<(), ActionError>;
}

/// The built-in action set, ready for registration.
pub fn builtin_actions(client: Client) -> Vec<Arc<dyn Action>> {
    vec![
        Arc::new(restart_pod::RestartPod::new(client.clone())),
        Arc::new(scale::ScaleUp::new(client.clone())),
        Arc::new(scale::ScaleDown::new(client.clone())),
        Arc::new(rollback::Rollback::new(client.clone())),
        Arc::new(delete_stuck_pods::DeleteStuckPods::new(client)),
        Arc::new(none::NoOp),
    ]
}

/* ============================= OWNER DISCOVERY ============================= */

/// Resolve the Deployment owning a target.
///
/// Explicit deployment targets resolve to themselves; pod targets walk
/// pod -> ReplicaSet -> Deployment through owner references. A broken
/// chain is an error, not a guess.
pub(crate) async fn resolve_deployment(
    client: &Client,
    target: &Target,
) -> Result<String, ActionError> {
    if let Some(deployment) = &target.deployment {
        return Ok(deployment.clone());
    }

    let pod_name = target.pod.as_ref().ok_or_else(|| {
        ActionError::InvalidParams("target names neither a pod nor a deployment".to_string())
    })?;

    let pods: Api<Pod> = Api::namespaced(client.clone(), &target.namespace);
    let pod = pods.get(pod_name).await?;

    let owners = pod.metadata.owner_references.unwrap_or_default();
    for owner in &owners {
        if owner.kind != "ReplicaSet" {
            continue;
        }
        let replicasets: Api<ReplicaSet> = Api::namespaced(client.clone(), &target.namespace);
        let rs = replicasets.get(&owner.name).await?;
        for rs_owner in rs.metadata.owner_references.unwrap_or_default() {
            if rs_owner.kind == "Deployment" {
                return Ok(rs_owner.name);
            }
        }
    }

    Err(ActionError::Failed(format!(
        "pod {pod_name} is not owned by a Deployment"
    )))
}
