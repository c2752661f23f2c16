use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams};
use kube::Client;
use tracing::info;

use crate::model::Target;

use super::{Action, ActionError};

/// Delete the target pod so its controller reschedules it. Grace period
/// zero with foreground propagation: the restart is immediate.
pub struct RestartPod {
    client: Client,
}

impl RestartPod {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Action for RestartPod {
    fn name(&self) -> &'static str {
        "restart-pod"
    }

    fn validate(&self, _params: &BTreeMap<String, String>) -> Result<(), ActionError> {
        Ok(())
    }

    async fn execute(
        &self,
        target: &Target,
        _params: &BTreeMap<String, String>,
    ) -> Result<(), ActionError> {
        let pod_name = target.pod.as_ref().ok_or_else(|| {
            ActionError::InvalidParams("restart-pod requires a pod target".to_string())
        })?;

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        pods.delete(pod_name, &DeleteParams::foreground().grace_period(0))
            .await?;

        info!(namespace = %target.namespace, pod = %pod_name, "pod_deleted_for_restart");
        Ok(())
    }
}
