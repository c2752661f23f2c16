use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::actions::Action;
use crate::broadcast::Broadcaster;
use crate::config::RemediationConfig;
use crate::metrics;
use crate::model::{ErrorRecord, Event, RemediationLog, RemediationStatus, Target};
use crate::rules::{Rule, RuleEngine};
use crate::store::Store;

/* ============================= STATE ============================= */

struct EngineState {
    enabled: bool,
    dry_run: bool,
    max_actions_per_hour: usize,
    excluded_namespaces: HashSet<String>,
    actions: HashMap<String, Arc<dyn Action>>,
    /// cooldown key -> expiry
    cooldowns: HashMap<String, DateTime<Utc>>,
    /// commit times of admitted actions, pruned to the last hour
    hourly_log: Vec<DateTime<Utc>>,
}

impl EngineState {
    fn prune_hourly(&mut self, now: DateTime<Utc>) {
        self.hourly_log.retain(|t| now - *t < Duration::hours(1));
    }
}

/// What the admission checks decided, resolved under the engine lock.
enum Admission {
    Skip(String),
    Fail(String),
    /// Dry-run admissions commit inside the critical section.
    DryRunCommitted,
    Proceed {
        action: Arc<dyn Action>,
        cooldown_key: String,
        cooldown: Duration,
    },
}

/* ============================= ENGINE ============================= */

/// Executes rule-prescribed remediations behind a layered safety
/// envelope: master switch, namespace exclusion, per-(rule, target)
/// cooldown, sliding-window hourly quota, dry-run.
///
/// One mutex guards all mutable state. It is held for checks and
/// commits but released around the Kubernetes call, so independent
/// (rule, target) pairs can act concurrently.
pub struct RemediationEngine {
    rules: Arc<RuleEngine>,
    store: Arc<Store>,
    broadcaster: Arc<Broadcaster>,
    state: Mutex<EngineState>,
}

impl RemediationEngine {
    pub fn new(
        config: &RemediationConfig,
        rules: Arc<RuleEngine>,
        store: Arc<Store>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            rules,
            store,
            broadcaster,
            state: Mutex::new(EngineState {
                enabled: config.enabled,
                dry_run: config.dry_run,
                max_actions_per_hour: config.max_actions_per_hour,
                excluded_namespaces: config.excluded_namespaces.iter().cloned().collect(),
                actions: HashMap::new(),
                cooldowns: HashMap::new(),
                hourly_log: Vec::new(),
            }),
        }
    }

    /// Add an action to the registry. Later registrations under the
    /// same name replace earlier ones.
    pub fn register_action(&self, action: Arc<dyn Action>) {
        let mut state = self.state.lock().expect("engine lock not poisoned");
        state.actions.insert(action.name().to_string(), action);
    }

    pub fn register_actions(&self, actions: Vec<Arc<dyn Action>>) {
        for action in actions {
            self.register_action(action);
        }
    }

    /* ── runtime controls ── */

    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().expect("engine lock not poisoned");
        state.enabled = enabled;
        info!(enabled, "remediation_toggled");
    }

    pub fn set_dry_run(&self, dry_run: bool) {
        let mut state = self.state.lock().expect("engine lock not poisoned");
        state.dry_run = dry_run;
        info!(dry_run, "dry_run_toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().expect("engine lock not poisoned").enabled
    }

    pub fn is_dry_run(&self) -> bool {
        self.state.lock().expect("engine lock not poisoned").dry_run
    }

    /// Actions committed in the rolling hour, after pruning.
    pub fn actions_this_hour(&self) -> usize {
        let mut state = self.state.lock().expect("engine lock not poisoned");
        state.prune_hourly(Utc::now());
        state.hourly_log.len()
    }

    pub fn clear_cooldown(&self, rule_name: &str, target: &str) {
        let mut state = self.state.lock().expect("engine lock not poisoned");
        state.cooldowns.remove(&cooldown_key(rule_name, target));
    }

    pub fn clear_all_cooldowns(&self) {
        let mut state = self.state.lock().expect("engine lock not poisoned");
        state.cooldowns.clear();
    }

    /* ── execution ── */

    /// Resolve the error's rule and run the pipeline. Errors classified
    /// by a missing rule, or by one with no remediation block, produce
    /// no attempt at all.
    pub async fn process(&self, error: &ErrorRecord) -> Option<RemediationLog> {
        let rule = self.rules.rule(&error.rule_name)?.clone();
        rule.remediation.as_ref()?;
        Some(self.execute(error, &rule).await)
    }

    /// Run one remediation attempt through the safety pipeline. Always
    /// persists and broadcasts exactly one audit record, whatever the
    /// outcome.
    pub async fn execute(&self, error: &ErrorRecord, rule: &Rule) -> RemediationLog {
        let now = Utc::now();
        let target = Target {
            namespace: error.namespace.clone(),
            pod: Some(error.pod_name.clone()),
            deployment: None,
            container: Some(error.container_name.clone()),
        };

        let action_name = rule
            .remediation
            .as_ref()
            .map(|r| r.action.clone())
            .unwrap_or_else(|| "none".to_string());
        let params = rule
            .remediation
            .as_ref()
            .map(|r| r.params.clone())
            .unwrap_or_default();

        let mut log = RemediationLog {
            id: Uuid::new_v4().to_string(),
            error_id: error.id.clone(),
            action: action_name.clone(),
            target: target.to_string(),
            status: RemediationStatus::Skipped,
            message: String::new(),
            timestamp: now,
            dry_run: false,
        };

        let admission = {
            let mut state = self.state.lock().expect("engine lock not poisoned");
            log.dry_run = state.dry_run;
            self.admit(&mut state, rule, &action_name, &params, &target, now)
        };

        match admission {
            Admission::Skip(message) => {
                log.status = RemediationStatus::Skipped;
                log.message = message;
            }
            Admission::Fail(message) => {
                log.status = RemediationStatus::Failed;
                log.message = message;
            }
            Admission::DryRunCommitted => {
                log.status = RemediationStatus::Success;
                log.message = "dry run - would execute".to_string();
            }
            Admission::Proceed {
                action,
                cooldown_key,
                cooldown,
            } => match action.execute(&target, &params).await {
                Ok(()) => {
                    // commit under the lock, atomically with a fresh check window
                    let mut state = self.state.lock().expect("engine lock not poisoned");
                    let commit_at = Utc::now();
                    state.cooldowns.insert(cooldown_key, commit_at + cooldown);
                    state.prune_hourly(commit_at);
                    state.hourly_log.push(commit_at);
                    drop(state);

                    log.status = RemediationStatus::Success;
                    log.message = "action executed successfully".to_string();
                    self.store.mark_error_remediated(&error.id, commit_at);
                }
                Err(e) => {
                    // failed attempts consume neither cooldown nor quota
                    log.status = RemediationStatus::Failed;
                    log.message = e.to_string();
                }
            },
        }

        match log.status {
            RemediationStatus::Success => info!(
                rule = %rule.name,
                action = %log.action,
                target = %log.target,
                dry_run = log.dry_run,
                "remediation_succeeded"
            ),
            RemediationStatus::Failed => warn!(
                rule = %rule.name,
                action = %log.action,
                target = %log.target,
                error = %log.message,
                "remediation_failed"
            ),
            RemediationStatus::Skipped => info!(
                rule = %rule.name,
                action = %log.action,
                target = %log.target,
                reason = %log.message,
                "remediation_skipped"
            ),
        }

        metrics::REMEDIATIONS_TOTAL
            .with_label_values(&[log.status.as_str()])
            .inc();
        self.store.save_remediation_log(log.clone());
        self.broadcaster.publish(&Event::Remediation(log.clone()));

        log
    }

    /// The ordered safety checks. Runs entirely under the engine lock;
    /// a dry-run admission commits cooldown and quota here so repeated
    /// simulations rate-limit exactly like real runs.
    fn admit(
        &self,
        state: &mut EngineState,
        rule: &Rule,
        action_name: &str,
        params: &std::collections::BTreeMap<String, String>,
        target: &Target,
        now: DateTime<Utc>,
    ) -> Admission {
        if !state.enabled {
            return Admission::Skip("remediation disabled".to_string());
        }

        if rule.remediation.is_none() || action_name == "none" {
            return Admission::Skip("no remediation action configured".to_string());
        }

        if state.excluded_namespaces.contains(&target.namespace) {
            return Admission::Skip(format!("namespace {} is excluded", target.namespace));
        }

        let key = cooldown_key(&rule.name, &target.to_string());
        if let Some(expiry) = state.cooldowns.get(&key) {
            if *expiry > now {
                return Admission::Skip(format!(
                    "cooldown active until {}",
                    expiry.to_rfc3339()
                ));
            }
        }

        state.prune_hourly(now);
        if state.hourly_log.len() >= state.max_actions_per_hour {
            return Admission::Skip(format!(
                "hourly limit reached ({} actions)",
                state.max_actions_per_hour
            ));
        }

        let Some(action) = state.actions.get(action_name).cloned() else {
            return Admission::Fail("unknown action".to_string());
        };

        if let Err(e) = action.validate(params) {
            return Admission::Fail(e.to_string());
        }

        let cooldown = rule
            .remediation
            .as_ref()
            .map(|r| Duration::seconds(r.cooldown_secs as i64))
            .unwrap_or_else(|| Duration::seconds(300));

        if state.dry_run {
            state.cooldowns.insert(key, now + cooldown);
            state.hourly_log.push(now);
            return Admission::DryRunCommitted;
        }

        Admission::Proceed {
            action,
            cooldown_key: key,
            cooldown,
        }
    }

    #[cfg(test)]
    fn cooldown_until(&self, rule_name: &str, target: &str) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .expect("engine lock not poisoned")
            .cooldowns
            .get(&cooldown_key(rule_name, target))
            .copied()
    }

    #[cfg(test)]
    fn backdate_hourly(&self, by: Duration) {
        let mut state = self.state.lock().expect("engine lock not poisoned");
        for t in &mut state.hourly_log {
            *t -= by;
        }
    }
}

fn cooldown_key(rule_name: &str, target: &str) -> String {
    format!("{rule_name}:{target}")
}

/* ============================= TESTS ============================= */
