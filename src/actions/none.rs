use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::model::Target;

use super::{Action, ActionError};

/// Placeholder action for rules that should classify but never act.
/// The safety pipeline short-circuits before reaching it, so it only
/// runs when invoked directly.
pub struct NoOp;

#[async_trait]
impl Action for NoOp {
    fn name(&self) -> &'static str {
        "none"
    }

    fn validate(&self, _params: &BTreeMap<String, String>) -> Result<(), ActionError> {
        Ok(())
    }

    async fn execute(
        &self,
        _target: &Target,
        _params: &BTreeMap<String, String>,
    ) -> Result<(), ActionError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_always_succeeds() {
        let action = NoOp;
        assert_eq!(action.name(), "none");
        assert!(action.validate(&BTreeMap::new()).is_ok());
        assert!(
            action
                .execute(&Target::pod("prod", "api-0"), &BTreeMap::new())
                .await
                .is_ok()
        );
    }
}
