use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::rules::{self, Rule};

/* ============================= TOP LEVEL ============================= */

/// Process configuration, loaded from a single YAML file.
///
/// Only the log backend section is mandatory; everything else has
/// conservative defaults (remediation off, dry-run on).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub log_backend: LogBackendConfig,

    #[serde(default)]
    pub remediation: RemediationConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation. Any failure here is fatal: the process must
    /// not run with a half-usable configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.log_backend.url.trim().is_empty() {
            anyhow::bail!("logBackend.url is required");
        }
        if self.log_backend.query.trim().is_empty() {
            anyhow::bail!("logBackend.query is required");
        }
        for rule in &self.rules {
            rules::validate_rule(rule)?;
        }
        Ok(())
    }
}

/* ============================= LOG BACKEND ============================= */

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBackendConfig {
    /// Base URL of the Loki-compatible backend.
    pub url: String,

    /// LogQL expression selecting error-like lines.
    pub query: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Maximum width of a single query window.
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: u64,

    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,

    /// Sent as X-Scope-OrgID when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl LogBackendConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_lookback_secs() -> u64 {
    300
}

fn default_backend_timeout_secs() -> u64 {
    30
}

/* ============================= REMEDIATION ============================= */

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationConfig {
    /// Master switch. Off by default: a fresh deployment observes only.
    #[serde(default)]
    pub enabled: bool,

    /// Simulate actions without touching the cluster. On by default.
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    #[serde(default = "default_max_actions_per_hour")]
    pub max_actions_per_hour: usize,

    /// Namespaces remediation must never touch.
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: true,
            max_actions_per_hour: default_max_actions_per_hour(),
            excluded_namespaces: Vec::new(),
        }
    }
}

fn default_dry_run() -> bool {
    true
}

fn default_max_actions_per_hour() -> usize {
    50
}

/* ============================= STORE ============================= */

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,

    #[serde(default = "default_max_remediation_logs")]
    pub max_remediation_logs: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_errors: default_max_errors(),
            max_remediation_logs: default_max_remediation_logs(),
        }
    }
}

fn default_max_errors() -> usize {
    10_000
}

fn default_max_remediation_logs() -> usize {
    5_000
}

/* ============================= POLLER ============================= */

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerConfig {
    /// How long a fingerprint stays in the short-term dedup cache.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

impl PollerConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

fn default_dedup_window_secs() -> u64 {
    1_800
}

/* ============================= WEB ============================= */

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Prefix every route is mounted under; empty means root.
    #[serde(default)]
    pub base_path: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            base_path: String::new(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
logBackend:
  url: http://loki.logging.svc:3100
  query: '{namespace=~".+"} |~ "(?i)error"'
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = serde_yaml::from_str(MINIMAL).expect("config parses");
        config.validate().expect("config is valid");

        assert_eq!(config.log_backend.poll_interval_secs, 30);
        assert_eq!(config.log_backend.lookback_secs, 300);
        assert!(config.log_backend.tenant_id.is_none());

        assert!(!config.remediation.enabled);
        assert!(config.remediation.dry_run);
        assert_eq!(config.remediation.max_actions_per_hour, 50);
        assert!(config.remediation.excluded_namespaces.is_empty());

        assert_eq!(config.store.max_errors, 10_000);
        assert_eq!(config.store.max_remediation_logs, 5_000);

        assert_eq!(config.poller.dedup_window_secs, 1_800);

        assert_eq!(config.web.listen, "0.0.0.0:8080");
        assert_eq!(config.web.base_path, "");

        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        let yaml = r#"
logBackend:
  url: http://loki:3100
  query: '{job="app"} |= "error"'
  pollIntervalSecs: 15
  lookbackSecs: 120
  tenantId: team-a
  username: medic
  password: hunter2
remediation:
  enabled: true
  dryRun: false
  maxActionsPerHour: 10
  excludedNamespaces: [kube-system, kube-public]
store:
  maxErrors: 500
  maxRemediationLogs: 200
poller:
  dedupWindowSecs: 900
web:
  listen: 127.0.0.1:9000
  basePath: /medic
rules:
  - name: crashloop
    match:
      pattern: "CrashLoopBackOff"
    priority: P1
    remediation:
      action: restart-pod
      cooldownSecs: 300
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("config parses");
        config.validate().expect("config is valid");

        assert_eq!(config.log_backend.tenant_id.as_deref(), Some("team-a"));
        assert!(config.remediation.enabled);
        assert!(!config.remediation.dry_run);
        assert_eq!(config.remediation.excluded_namespaces.len(), 2);
        assert_eq!(config.store.max_errors, 500);
        assert_eq!(config.web.base_path, "/medic");
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].name, "crashloop");
    }

    #[test]
    fn test_missing_backend_section_fails() {
        let err = serde_yaml::from_str::<Config>("rules: []").expect_err("should fail");
        assert!(err.to_string().contains("logBackend"));
    }

    #[test]
    fn test_empty_url_rejected() {
        let yaml = r#"
logBackend:
  url: ""
  query: '{job="app"}'
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("config parses");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_query_rejected() {
        let yaml = r#"
logBackend:
  url: http://loki:3100
  query: "  "
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("config parses");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_rule_pattern_rejected() {
        let yaml = r#"
logBackend:
  url: http://loki:3100
  query: '{job="app"}'
rules:
  - name: broken
    match:
      pattern: "[oops"
    priority: P2
"#;
        let config: Config = serde_yaml::from_str(yaml).expect("config parses");
        let err = config.validate().expect_err("should fail");
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_duration_helpers() {
        let config: Config = serde_yaml::from_str(MINIMAL).expect("config parses");
        assert_eq!(config.log_backend.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.log_backend.lookback(), Duration::from_secs(300));
        assert_eq!(config.poller.dedup_window(), Duration::from_secs(1_800));
    }
}
