use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/* ============================= PRIORITY ============================= */

/// Priority assigned to an error class by the rule engine.
///
/// Lower weight is more urgent; list endpoints sort by weight ascending.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Priority {
    P1,
    P2,
    P3,
    #[default]
    P4,
}

impl Priority {
    /// Sort weight: P1 is the most urgent.
    pub fn weight(self) -> u8 {
        match self {
            Priority::P1 => 1,
            Priority::P2 => 2,
            Priority::P3 => 3,
            Priority::P4 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "P1" => Ok(Priority::P1),
            "P2" => Ok(Priority::P2),
            "P3" => Ok(Priority::P3),
            "P4" => Ok(Priority::P4),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/* ============================= ERROR RECORD ============================= */

/// One class of observed log errors, aggregated by fingerprint.
///
/// Invariants maintained by the store: `first_seen <= last_seen`,
/// `count >= 1`, and at most one live record per fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    /// 16 lowercase-hex chars derived from
    /// (namespace, pod base, container, canonical message).
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u64,
    pub namespace: String,
    /// Original pod name as reported by the log backend.
    pub pod_name: String,
    pub container_name: String,
    /// Canonical message, truncated to 500 chars.
    pub message: String,
    pub raw_line: String,
    pub labels: BTreeMap<String, String>,
    pub priority: Priority,
    /// Name of the rule that classified this error, or "default".
    pub rule_name: String,
    pub remediated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediated_at: Option<DateTime<Utc>>,
}

impl ErrorRecord {
    /// Build a fresh record for a first observation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fingerprint: String,
        timestamp: DateTime<Utc>,
        namespace: String,
        pod_name: String,
        container_name: String,
        message: String,
        raw_line: String,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fingerprint,
            first_seen: timestamp,
            last_seen: timestamp,
            count: 1,
            namespace,
            pod_name,
            container_name,
            message,
            raw_line,
            labels,
            priority: Priority::P4,
            rule_name: "default".to_string(),
            remediated: false,
            remediated_at: None,
        }
    }
}

/* ============================= REMEDIATION LOG ============================= */

/// Outcome of a single remediation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemediationStatus {
    Success,
    Failed,
    Skipped,
}

impl RemediationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RemediationStatus::Success => "success",
            RemediationStatus::Failed => "failed",
            RemediationStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record for one remediation attempt. Written exactly once per
/// attempt, regardless of outcome, and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationLog {
    pub id: String,
    pub error_id: String,
    pub action: String,
    /// Rendered target, `ns/pod` or `ns/deployment/name`.
    pub target: String,
    pub status: RemediationStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub dry_run: bool,
}

/* ============================= TARGET ============================= */

/// Kubernetes coordinates an action operates on.
///
/// The rendered form doubles as the target component of cooldown keys;
/// Kubernetes identifiers cannot contain `:` or `/`, so the separators
/// are unambiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub namespace: String,
    pub pod: Option<String>,
    pub deployment: Option<String>,
    pub container: Option<String>,
}

impl Target {
    pub fn pod(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: Some(pod.into()),
            deployment: None,
            container: None,
        }
    }

    pub fn deployment(namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: None,
            deployment: Some(deployment.into()),
            container: None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.deployment {
            Some(d) => write!(f, "{}/deployment/{}", self.namespace, d),
            None => write!(
                f,
                "{}/{}",
                self.namespace,
                self.pod.as_deref().unwrap_or_default()
            ),
        }
    }
}

/* ============================= STATS ============================= */

/// Aggregate snapshot computed from the store in one pass.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_errors: u64,
    pub by_priority: BTreeMap<Priority, u64>,
    pub by_namespace: BTreeMap<String, u64>,
    pub total_remediations: u64,
    pub successful_remediations: u64,
    pub failed_remediations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_remediation_at: Option<DateTime<Utc>>,
}

/* ============================= EVENTS ============================= */

/// Outbound event pushed to dashboard subscribers.
///
/// Wire form: `{"type": "...", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Event {
    Error(ErrorRecord),
    Remediation(RemediationLog),
    Stats(StoreStats),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Error(_) => "error",
            Event::Remediation(_) => "remediation",
            Event::Stats(_) => "stats",
        }
    }
}

/* ============================= TESTS ============================= */
