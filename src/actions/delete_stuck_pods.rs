use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;
use tracing::{info, warn};

use crate::model::Target;

use super::{Action, ActionError};

/* ============================= STUCK DETECTION ============================= */

/// A pod is stuck when it has been asked to terminate but still reports
/// a Running phase.
pub(crate) fn is_stuck(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
        && pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            == Some("Running")
}

/* ============================= ACTION ============================= */

/// Sweep the target namespace for terminating-but-Running pods and
/// force-delete them. Per-pod failures are logged; the sweep itself
/// succeeds as long as it completes.
pub struct DeleteStuckPods {
    client: Client,
}

impl DeleteStuckPods {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Action for DeleteStuckPods {
    fn name(&self) -> &'static str {
        "delete-stuck-pods"
    }

    fn validate(&self, _params: &BTreeMap<String, String>) -> Result<(), ActionError> {
        Ok(())
    }

    async fn execute(
        &self,
        target: &Target,
        params: &BTreeMap<String, String>,
    ) -> Result<(), ActionError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let list = pods.list(&ListParams::default()).await?;

        let name_filter = params.get("name").map(String::as_str);

        let mut deleted = 0u32;
        for pod in &list.items {
            let name = pod.metadata.name.as_deref().unwrap_or_default();
            if let Some(filter) = name_filter {
                if !name.contains(filter) {
                    continue;
                }
            }
            if !is_stuck(pod) {
                continue;
            }

            match pods
                .delete(name, &DeleteParams::default().grace_period(0))
                .await
            {
                Ok(_) => {
                    deleted += 1;
                    info!(namespace = %target.namespace, pod = %name, "stuck_pod_deleted");
                }
                Err(e) => {
                    warn!(namespace = %target.namespace, pod = %name, error = %e, "stuck_pod_delete_failed");
                }
            }
        }

        info!(
            namespace = %target.namespace,
            scanned = list.items.len(),
            deleted,
            "stuck_pod_sweep_completed"
        );
        Ok(())
    }
}

/* ============================= TESTS ============================= */
