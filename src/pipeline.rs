use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::fingerprint;
use crate::loki::LogEntry;
use crate::metrics;
use crate::model::{ErrorRecord, Event};
use crate::poller::EntryHandler;
use crate::remediation::RemediationEngine;
use crate::rules::RuleEngine;
use crate::store::Store;

/* ============================= PIPELINE ============================= */

/// The per-entry path from a deduplicated log line to a stored,
/// classified error and (when a rule prescribes one) a remediation
/// attempt. Each processed entry also pushes the record and a fresh
/// stats snapshot to subscribers.
pub struct Pipeline {
    rules: Arc<RuleEngine>,
    store: Arc<Store>,
    engine: Arc<RemediationEngine>,
    broadcaster: Arc<Broadcaster>,
}

impl Pipeline {
    pub fn new(
        rules: Arc<RuleEngine>,
        store: Arc<Store>,
        engine: Arc<RemediationEngine>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            rules,
            store,
            engine,
            broadcaster,
        }
    }

    fn build_record(&self, entry: &LogEntry) -> ErrorRecord {
        let namespace = entry
            .labels
            .get("namespace")
            .cloned()
            .unwrap_or_default();
        let pod = entry.labels.get("pod").cloned().unwrap_or_default();
        let container = entry.labels.get("container").cloned().unwrap_or_default();

        let fp = fingerprint::fingerprint(&namespace, &pod, &container, &entry.line);
        let message = fingerprint::canonical_message(&entry.line);

        let mut record = ErrorRecord::new(
            fp,
            entry.timestamp,
            namespace,
            pod,
            container,
            message,
            entry.line.clone(),
            entry.labels.clone().into_iter().collect(),
        );

        let matched = self.rules.classify(&record);
        record.priority = matched.priority;
        record.rule_name = matched.rule_name;
        record
    }
}

#[async_trait]
impl EntryHandler for Pipeline {
    async fn handle(&self, entry: LogEntry) {
        let record = self.build_record(&entry);
        debug!(
            fingerprint = %record.fingerprint,
            namespace = %record.namespace,
            rule = %record.rule_name,
            priority = %record.priority,
            "error_observed"
        );

        let saved = self.store.save_error(record);
        metrics::ERRORS_STORED.set(self.store.error_count() as i64);
        self.broadcaster.publish(&Event::Error(saved.clone()));

        let _ = self.engine.process(&saved).await;

        self.broadcaster.publish(&Event::Stats(self.store.stats()));
    }
}

/* ============================= TESTS ============================= */
