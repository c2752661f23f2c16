mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use common::{at, build_core, log_entry, remediating_rule};
use kube_medic::actions::{Action, ActionError};
use kube_medic::config::RemediationConfig;
use kube_medic::model::{RemediationStatus, Target};
use kube_medic::poller::EntryHandler;
use kube_medic::store::ErrorFilter;

// ══════════════════════════════════════════════════════════════════
// Remediation integration tests (no cluster required)
//
// Drives log entries through the full pipeline with a counting action
// standing in for the Kubernetes mutations, and checks the safety
// envelope end to end: cooldown, hourly quota, namespace exclusion,
// dry-run, audit trail.
// ══════════════════════════════════════════════════════════════════

struct CountingAction {
    calls: AtomicU32,
}

impl CountingAction {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Action for CountingAction {
    fn name(&self) -> &'static str {
        "restart-pod"
    }

    fn validate(&self, _params: &BTreeMap<String, String>) -> Result<(), ActionError> {
        Ok(())
    }

    async fn execute(
        &self,
        _target: &Target,
        _params: &BTreeMap<String, String>,
    ) -> Result<(), ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn crashloop_line(detail: &str) -> String {
    format!("ERROR: container crashed: CrashLoopBackOff ({detail})")
}

#[tokio::test]
async fn test_cooldown_blocks_second_restart() {
    let core = build_core(
        vec![remediating_rule("crashloop", "CrashLoopBackOff", "restart-pod", 300)],
        common::armed(),
    );
    let action = CountingAction::new();
    core.engine.register_action(action.clone());

    core.pipeline
        .handle(log_entry("prod", "app-xyz", "app", &crashloop_line("first"), at(0, 0, 0)))
        .await;
    core.pipeline
        .handle(log_entry("prod", "app-xyz", "app", &crashloop_line("second"), at(0, 2, 0)))
        .await;

    let (errors, _) = core.store.list_errors(&ErrorFilter::default(), 0, 10);
    let mut logs: Vec<_> = errors
        .iter()
        .flat_map(|e| core.store.list_remediations_for_error(&e.id))
        .collect();
    logs.sort_by_key(|l| l.timestamp);

    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].status, RemediationStatus::Success);
    assert_eq!(logs[1].status, RemediationStatus::Skipped);
    assert!(logs[1].message.starts_with("cooldown active until "));
    assert_eq!(action.calls(), 1);
}

#[tokio::test]
async fn test_hourly_cap_blocks_third_action() {
    let config = RemediationConfig {
        max_actions_per_hour: 2,
        ..common::armed()
    };
    let core = build_core(
        vec![remediating_rule("crashloop", "CrashLoopBackOff", "restart-pod", 300)],
        config,
    );
    let action = CountingAction::new();
    core.engine.register_action(action.clone());

    // three distinct targets, so cooldowns never interfere
    for (i, pod) in ["app-a", "app-b", "app-c"].iter().enumerate() {
        core.pipeline
            .handle(log_entry(
                "prod",
                pod,
                "app",
                &crashloop_line(pod),
                at(0, i as u32 * 15, 0),
            ))
            .await;
    }

    let (_, total) = core.store.list_remediations(0, 100);
    assert_eq!(total, 3);
    let (logs, _) = core.store.list_remediations(0, 100);
    let skipped: Vec<_> = logs
        .iter()
        .filter(|l| l.status == RemediationStatus::Skipped)
        .collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].message, "hourly limit reached (2 actions)");
    assert_eq!(action.calls(), 2);
    assert_eq!(core.engine.actions_this_hour(), 2);
}

#[tokio::test]
async fn test_excluded_namespace_never_reaches_the_cluster() {
    let config = RemediationConfig {
        excluded_namespaces: vec!["kube-system".to_string()],
        ..common::armed()
    };
    let core = build_core(
        vec![remediating_rule("crashloop", "CrashLoopBackOff", "restart-pod", 300)],
        config,
    );
    let action = CountingAction::new();
    core.engine.register_action(action.clone());

    core.pipeline
        .handle(log_entry(
            "kube-system",
            "coredns-abc12",
            "coredns",
            &crashloop_line("dns"),
            at(0, 0, 0),
        ))
        .await;

    let (logs, total) = core.store.list_remediations(0, 10);
    assert_eq!(total, 1);
    assert_eq!(logs[0].status, RemediationStatus::Skipped);
    assert_eq!(logs[0].message, "namespace kube-system is excluded");
    assert_eq!(action.calls(), 0);
}

#[tokio::test]
async fn test_dry_run_simulates_but_rate_limits() {
    let config = RemediationConfig {
        dry_run: true,
        ..common::armed()
    };
    let core = build_core(
        vec![remediating_rule("crashloop", "CrashLoopBackOff", "restart-pod", 300)],
        config,
    );
    let action = CountingAction::new();
    core.engine.register_action(action.clone());

    core.pipeline
        .handle(log_entry("prod", "app-xyz", "app", &crashloop_line("sim"), at(0, 0, 0)))
        .await;

    let (logs, _) = core.store.list_remediations(0, 10);
    assert_eq!(logs[0].status, RemediationStatus::Success);
    assert_eq!(logs[0].message, "dry run - would execute");
    assert!(logs[0].dry_run);
    // no mutation, but quota consumed
    assert_eq!(action.calls(), 0);
    assert_eq!(core.engine.actions_this_hour(), 1);

    // a repeat within the cooldown window is skipped, as it would be live
    core.pipeline
        .handle(log_entry("prod", "app-xyz", "app", &crashloop_line("sim2"), at(0, 1, 0)))
        .await;
    let (logs, _) = core.store.list_remediations(0, 10);
    let newest = &logs[0];
    assert_eq!(newest.status, RemediationStatus::Skipped);
    assert!(newest.message.starts_with("cooldown active until "));
}

#[tokio::test]
async fn test_disabled_engine_only_audits() {
    let core = build_core(
        vec![remediating_rule("crashloop", "CrashLoopBackOff", "restart-pod", 300)],
        RemediationConfig::default(),
    );
    let action = CountingAction::new();
    core.engine.register_action(action.clone());

    core.pipeline
        .handle(log_entry("prod", "app-xyz", "app", &crashloop_line("off"), at(0, 0, 0)))
        .await;

    let (logs, total) = core.store.list_remediations(0, 10);
    assert_eq!(total, 1);
    assert_eq!(logs[0].status, RemediationStatus::Skipped);
    assert_eq!(logs[0].message, "remediation disabled");
    assert_eq!(action.calls(), 0);

    // flipping the switch at runtime arms the next attempt
    core.engine.set_enabled(true);
    core.pipeline
        .handle(log_entry("prod", "app-two", "app", &crashloop_line("on"), at(0, 1, 0)))
        .await;
    assert_eq!(action.calls(), 1);
}

#[tokio::test]
async fn test_remediated_flag_set_on_success() {
    let core = build_core(
        vec![remediating_rule("crashloop", "CrashLoopBackOff", "restart-pod", 300)],
        common::armed(),
    );
    core.engine.register_action(CountingAction::new());

    core.pipeline
        .handle(log_entry("prod", "app-xyz", "app", &crashloop_line("x"), at(0, 0, 0)))
        .await;

    let (errors, _) = core.store.list_errors(&ErrorFilter::default(), 0, 10);
    assert!(errors[0].remediated);
    assert!(errors[0].remediated_at.is_some());

    let filter = ErrorFilter {
        remediated: Some(true),
        ..Default::default()
    };
    let (filtered, _) = core.store.list_errors(&filter, 0, 10);
    assert_eq!(filtered.len(), 1);
}

#[tokio::test]
async fn test_unmatched_error_triggers_no_attempt() {
    let core = build_core(
        vec![remediating_rule("crashloop", "CrashLoopBackOff", "restart-pod", 300)],
        common::armed(),
    );
    core.engine.register_action(CountingAction::new());

    core.pipeline
        .handle(log_entry("prod", "app-xyz", "app", "ERROR: something else", at(0, 0, 0)))
        .await;

    let (_, total) = core.store.list_remediations(0, 10);
    assert_eq!(total, 0);
}
