use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::model::{ErrorRecord, RemediationLog, RemediationStatus, StoreStats};

/* ============================= FILTER & PAGING ============================= */

/// Filter for error listings. All set fields are ANDed.
#[derive(Debug, Clone, Default)]
pub struct ErrorFilter {
    pub namespace: Option<String>,
    pub pod: Option<String>,
    pub priority: Option<crate::model::Priority>,
    pub remediated: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    /// Case-insensitive substring over the canonical message.
    pub search: Option<String>,
}

impl ErrorFilter {
    fn matches(&self, record: &ErrorRecord) -> bool {
        if let Some(ns) = &self.namespace {
            if &record.namespace != ns {
                return false;
            }
        }
        if let Some(pod) = &self.pod {
            if &record.pod_name != pod {
                return false;
            }
        }
        if let Some(p) = self.priority {
            if record.priority != p {
                return false;
            }
        }
        if let Some(r) = self.remediated {
            if record.remediated != r {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.last_seen < since {
                return false;
            }
        }
        if let Some(q) = &self.search {
            if !record.message.to_lowercase().contains(&q.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/* ============================= STORE ============================= */

struct Inner {
    errors: HashMap<String, ErrorRecord>,
    /// fingerprint -> error id
    by_fingerprint: HashMap<String, String>,
    remediations: HashMap<String, RemediationLog>,
    /// error id -> remediation log ids, insertion order
    remediations_by_error: HashMap<String, Vec<String>>,
}

/// In-process store for error classes and remediation audit records.
///
/// One reader-writer lock guards everything; no method suspends while
/// holding it. Capacity sweeps run at the insertion boundary, TTL
/// sweeps on the caller's schedule.
pub struct Store {
    inner: RwLock<Inner>,
    max_errors: usize,
    max_remediation_logs: usize,
}

impl Store {
    pub fn new(max_errors: usize, max_remediation_logs: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                errors: HashMap::new(),
                by_fingerprint: HashMap::new(),
                remediations: HashMap::new(),
                remediations_by_error: HashMap::new(),
            }),
            max_errors,
            max_remediation_logs,
        }
    }

    /* ── errors ── */

    /// Save an observation. A record with the same fingerprint absorbs
    /// it: count increments and the seen-interval widens in both
    /// directions (late deliveries may move `first_seen` backwards).
    /// Returns a snapshot of the live record.
    pub fn save_error(&self, err: ErrorRecord) -> ErrorRecord {
        let mut inner = self.inner.write().expect("store lock not poisoned");

        if let Some(id) = inner.by_fingerprint.get(&err.fingerprint).cloned() {
            let existing = inner
                .errors
                .get_mut(&id)
                .expect("fingerprint index points at a live record");
            existing.count += 1;
            if err.last_seen > existing.last_seen {
                existing.last_seen = err.last_seen;
            }
            if err.first_seen < existing.first_seen {
                existing.first_seen = err.first_seen;
            }
            return existing.clone();
        }

        let snapshot = err.clone();
        inner.by_fingerprint.insert(err.fingerprint.clone(), err.id.clone());
        inner.errors.insert(err.id.clone(), err);

        if inner.errors.len() > self.max_errors {
            self.sweep_errors(&mut inner);
        }

        snapshot
    }

    /// Drop the oldest errors (by `last_seen`, ties broken by id) until
    /// the store is back under 90% of capacity.
    fn sweep_errors(&self, inner: &mut Inner) {
        let target = self.max_errors - self.max_errors / 10;
        let excess = inner.errors.len().saturating_sub(target);
        if excess == 0 {
            return;
        }

        let mut order: Vec<(DateTime<Utc>, String)> = inner
            .errors
            .values()
            .map(|e| (e.last_seen, e.id.clone()))
            .collect();
        order.sort();

        for (_, id) in order.into_iter().take(excess) {
            if let Some(removed) = inner.errors.remove(&id) {
                inner.by_fingerprint.remove(&removed.fingerprint);
            }
        }
    }

    pub fn get_error(&self, id: &str) -> Option<ErrorRecord> {
        self.inner
            .read()
            .expect("store lock not poisoned")
            .errors
            .get(id)
            .cloned()
    }

    pub fn get_error_by_fingerprint(&self, fingerprint: &str) -> Option<ErrorRecord> {
        let inner = self.inner.read().expect("store lock not poisoned");
        inner
            .by_fingerprint
            .get(fingerprint)
            .and_then(|id| inner.errors.get(id))
            .cloned()
    }

    /// Filtered listing sorted by (priority weight ascending, last seen
    /// descending), then paginated. Returns the page and the total
    /// matching count.
    pub fn list_errors(
        &self,
        filter: &ErrorFilter,
        offset: usize,
        limit: usize,
    ) -> (Vec<ErrorRecord>, usize) {
        let inner = self.inner.read().expect("store lock not poisoned");

        let mut matched: Vec<&ErrorRecord> =
            inner.errors.values().filter(|e| filter.matches(e)).collect();
        matched.sort_by(|a, b| {
            a.priority
                .weight()
                .cmp(&b.priority.weight())
                .then(b.last_seen.cmp(&a.last_seen))
        });

        let total = matched.len();
        let page = matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    /// Remove errors last seen before the cutoff. Returns how many went.
    pub fn delete_old_errors(&self, before: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().expect("store lock not poisoned");
        let stale: Vec<String> = inner
            .errors
            .values()
            .filter(|e| e.last_seen < before)
            .map(|e| e.id.clone())
            .collect();
        for id in &stale {
            if let Some(removed) = inner.errors.remove(id) {
                inner.by_fingerprint.remove(&removed.fingerprint);
            }
        }
        stale.len()
    }

    /// Flag an error as remediated. Called by the remediation engine
    /// after a successful (or dry-run) action.
    pub fn mark_error_remediated(&self, id: &str, at: DateTime<Utc>) {
        let mut inner = self.inner.write().expect("store lock not poisoned");
        if let Some(err) = inner.errors.get_mut(id) {
            err.remediated = true;
            err.remediated_at = Some(at);
        }
    }

    pub fn error_count(&self) -> usize {
        self.inner
            .read()
            .expect("store lock not poisoned")
            .errors
            .len()
    }

    /* ── remediation logs ── */

    /// Append an audit record. Audit records are immutable once written.
    pub fn save_remediation_log(&self, log: RemediationLog) {
        let mut inner = self.inner.write().expect("store lock not poisoned");

        inner
            .remediations_by_error
            .entry(log.error_id.clone())
            .or_default()
            .push(log.id.clone());
        inner.remediations.insert(log.id.clone(), log);

        if inner.remediations.len() > self.max_remediation_logs {
            self.sweep_remediations(&mut inner);
        }
    }

    fn sweep_remediations(&self, inner: &mut Inner) {
        let target = self.max_remediation_logs - self.max_remediation_logs / 10;
        let excess = inner.remediations.len().saturating_sub(target);
        if excess == 0 {
            return;
        }

        let mut order: Vec<(DateTime<Utc>, String)> = inner
            .remediations
            .values()
            .map(|l| (l.timestamp, l.id.clone()))
            .collect();
        order.sort();

        for (_, id) in order.into_iter().take(excess) {
            if let Some(removed) = inner.remediations.remove(&id) {
                if let Some(ids) = inner.remediations_by_error.get_mut(&removed.error_id) {
                    ids.retain(|i| i != &id);
                    if ids.is_empty() {
                        inner.remediations_by_error.remove(&removed.error_id);
                    }
                }
            }
        }
    }

    /// Audit records for one error, oldest first.
    pub fn list_remediations_for_error(&self, error_id: &str) -> Vec<RemediationLog> {
        let inner = self.inner.read().expect("store lock not poisoned");
        inner
            .remediations_by_error
            .get(error_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.remediations.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All audit records, newest first, paginated.
    pub fn list_remediations(&self, offset: usize, limit: usize) -> (Vec<RemediationLog>, usize) {
        let inner = self.inner.read().expect("store lock not poisoned");
        let mut logs: Vec<&RemediationLog> = inner.remediations.values().collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
        let total = logs.len();
        let page = logs.into_iter().skip(offset).take(limit).cloned().collect();
        (page, total)
    }

    pub fn delete_old_remediations(&self, before: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write().expect("store lock not poisoned");
        let stale: Vec<String> = inner
            .remediations
            .values()
            .filter(|l| l.timestamp < before)
            .map(|l| l.id.clone())
            .collect();
        for id in &stale {
            if let Some(removed) = inner.remediations.remove(id) {
                if let Some(ids) = inner.remediations_by_error.get_mut(&removed.error_id) {
                    ids.retain(|i| i != id);
                    if ids.is_empty() {
                        inner.remediations_by_error.remove(&removed.error_id);
                    }
                }
            }
        }
        stale.len()
    }

    /* ── stats ── */

    /// One-pass aggregate snapshot.
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.read().expect("store lock not poisoned");
        let mut stats = StoreStats {
            total_errors: inner.errors.len() as u64,
            total_remediations: inner.remediations.len() as u64,
            ..Default::default()
        };

        for err in inner.errors.values() {
            *stats.by_priority.entry(err.priority).or_insert(0) += 1;
            *stats
                .by_namespace
                .entry(err.namespace.clone())
                .or_insert(0) += 1;
            if stats.last_error_at.is_none_or(|t| err.last_seen > t) {
                stats.last_error_at = Some(err.last_seen);
            }
        }

        for log in inner.remediations.values() {
            match log.status {
                RemediationStatus::Success => stats.successful_remediations += 1,
                RemediationStatus::Failed => stats.failed_remediations += 1,
                RemediationStatus::Skipped => {}
            }
            if stats.last_remediation_at.is_none_or(|t| log.timestamp > t) {
                stats.last_remediation_at = Some(log.timestamp);
            }
        }

        stats
    }
}

/* ============================= TESTS ============================= */
