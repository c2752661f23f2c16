use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use tracing::info;

use crate::model::Target;

use super::{resolve_deployment, Action, ActionError};

/* ============================= REVISION SELECTION ============================= */

/// Pick the previous revision: sort ReplicaSets newest first and take
/// the second. Fewer than two revisions means there is nothing to roll
/// back to.
pub(crate) fn pick_previous_revision(
    mut replicasets: Vec<ReplicaSet>,
) -> Result<ReplicaSet, ActionError> {
    if replicasets.len() < 2 {
        return Err(ActionError::Failed(
            "no previous revision to roll back to".to_string(),
        ));
    }
    replicasets.sort_by(|a, b| {
        b.metadata
            .creation_timestamp
            .cmp(&a.metadata.creation_timestamp)
    });
    Ok(replicasets.swap_remove(1))
}

/// Render a label map as a list selector, `k=v` comma-joined.
pub(crate) fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/* ============================= ACTION ============================= */

/// Re-apply the pod template of the previous ReplicaSet revision to the
/// owning Deployment.
pub struct Rollback {
    client: Client,
}

impl Rollback {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Action for Rollback {
    fn name(&self) -> &'static str {
        "rollback"
    }

    fn validate(&self, _params: &BTreeMap<String, String>) -> Result<(), ActionError> {
        Ok(())
    }

    async fn execute(
        &self,
        target: &Target,
        _params: &BTreeMap<String, String>,
    ) -> Result<(), ActionError> {
        let deployment_name = resolve_deployment(&self.client, target).await?;

        let deployments: Api<Deployment> =
            Api::namespaced(self.client.clone(), &target.namespace);
        let deployment = deployments.get(&deployment_name).await?;

        let match_labels = deployment
            .spec
            .as_ref()
            .and_then(|s| s.selector.match_labels.clone())
            .ok_or_else(|| {
                ActionError::Failed(format!(
                    "deployment {deployment_name} has no label selector"
                ))
            })?;

        let replicasets: Api<ReplicaSet> =
            Api::namespaced(self.client.clone(), &target.namespace);
        let rs_list = replicasets
            .list(&ListParams::default().labels(&selector_string(&match_labels)))
            .await?;

        let previous = pick_previous_revision(rs_list.items)?;
        let previous_name = previous.metadata.name.clone().unwrap_or_default();

        let mut template = previous
            .spec
            .and_then(|s| s.template)
            .ok_or_else(|| {
                ActionError::Failed(format!("replicaset {previous_name} has no pod template"))
            })?;

        // the hash label belongs to the ReplicaSet, not the Deployment template
        if let Some(meta) = template.metadata.as_mut() {
            if let Some(labels) = meta.labels.as_mut() {
                labels.remove("pod-template-hash");
            }
        }

        let patch = serde_json::json!({ "spec": { "template": template } });
        deployments
            .patch(
                &deployment_name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;

        info!(
            namespace = %target.namespace,
            deployment = %deployment_name,
            revision = %previous_name,
            "deployment_rolled_back"
        );
        Ok(())
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::chrono::{TimeZone, Utc};

    fn rs(name: &str, created_minute: u32) -> ReplicaSet {
        ReplicaSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                creation_timestamp: Some(Time(
                    Utc.with_ymd_and_hms(2024, 1, 15, 10, created_minute, 0)
                        .single()
                        .expect("valid timestamp"),
                )),
                ..Default::default()
            },
            spec: None,
            status: None,
        }
    }

    #[test]
    fn test_pick_second_most_recent() {
        let picked = pick_previous_revision(vec![rs("v1", 0), rs("v3", 20), rs("v2", 10)])
            .expect("revision found");
        assert_eq!(picked.metadata.name.as_deref(), Some("v2"));
    }

    #[test]
    fn test_pick_two_revisions() {
        let picked =
            pick_previous_revision(vec![rs("new", 10), rs("old", 0)]).expect("revision found");
        assert_eq!(picked.metadata.name.as_deref(), Some("old"));
    }

    #[test]
    fn test_pick_single_revision_fails() {
        let err = pick_previous_revision(vec![rs("only", 0)]).expect_err("should fail");
        assert!(err.to_string().contains("no previous revision"));
    }

    #[test]
    fn test_pick_empty_fails() {
        assert!(pick_previous_revision(vec![]).is_err());
    }

    #[test]
    fn test_selector_string() {
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), "api".to_string());
        labels.insert("tier".to_string(), "backend".to_string());
        assert_eq!(selector_string(&labels), "app=api,tier=backend");
    }

    #[test]
    fn test_selector_string_empty() {
        assert_eq!(selector_string(&BTreeMap::new()), "");
    }
}
