#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use kube_medic::broadcast::Broadcaster;
use kube_medic::config::RemediationConfig;
use kube_medic::loki::LogEntry;
use kube_medic::model::Priority;
use kube_medic::pipeline::Pipeline;
use kube_medic::remediation::RemediationEngine;
use kube_medic::rules::{MatchSpec, RemediationSpec, Rule, RuleEngine};
use kube_medic::store::Store;

/// A timestamp on 2024-01-15, hour 10 plus the given offset.
pub fn at(hour_offset: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10 + hour_offset, minute, second)
        .single()
        .expect("valid timestamp")
}

pub fn log_entry(
    namespace: &str,
    pod: &str,
    container: &str,
    line: &str,
    timestamp: DateTime<Utc>,
) -> LogEntry {
    let mut labels = HashMap::new();
    labels.insert("namespace".to_string(), namespace.to_string());
    labels.insert("pod".to_string(), pod.to_string());
    labels.insert("container".to_string(), container.to_string());
    LogEntry {
        timestamp,
        labels,
        line: line.to_string(),
    }
}

pub fn pattern_rule(name: &str, pattern: &str, priority: Priority) -> Rule {
    Rule {
        name: name.to_string(),
        matcher: MatchSpec {
            pattern: Some(pattern.to_string()),
            ..Default::default()
        },
        priority,
        remediation: None,
        enabled: true,
    }
}

pub fn remediating_rule(
    name: &str,
    pattern: &str,
    action: &str,
    cooldown_secs: u64,
) -> Rule {
    let mut rule = pattern_rule(name, pattern, Priority::P1);
    rule.remediation = Some(RemediationSpec {
        action: action.to_string(),
        params: BTreeMap::new(),
        cooldown_secs,
    });
    rule
}

/// Wired-together core with no cluster and no log backend behind it.
pub struct TestCore {
    pub pipeline: Arc<Pipeline>,
    pub engine: Arc<RemediationEngine>,
    pub store: Arc<Store>,
    pub broadcaster: Arc<Broadcaster>,
    pub rules: Arc<RuleEngine>,
}

pub fn build_core(rules: Vec<Rule>, remediation: RemediationConfig) -> TestCore {
    let store = Arc::new(Store::new(10_000, 5_000));
    let broadcaster = Arc::new(Broadcaster::new());
    let rule_engine = Arc::new(RuleEngine::new(rules).expect("rules compile"));
    let engine = Arc::new(RemediationEngine::new(
        &remediation,
        rule_engine.clone(),
        store.clone(),
        broadcaster.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(
        rule_engine.clone(),
        store.clone(),
        engine.clone(),
        broadcaster.clone(),
    ));
    TestCore {
        pipeline,
        engine,
        store,
        broadcaster,
        rules: rule_engine,
    }
}

pub fn armed() -> RemediationConfig {
    RemediationConfig {
        enabled: true,
        dry_run: false,
        max_actions_per_hour: 50,
        excluded_namespaces: vec![],
    }
}
