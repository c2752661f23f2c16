use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{LogBackendConfig, PollerConfig};
use crate::fingerprint;
use crate::loki::{LogBackend, LogEntry};
use crate::metrics;

/// Cadence of the dedup-cache sweeper.
const DEDUP_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/* ============================= DOWNSTREAM ============================= */

/// Consumer of entries that survive the poll-window dedup.
#[async_trait]
pub trait EntryHandler: Send + Sync {
    async fn handle(&self, entry: LogEntry);
}

/* ============================= POLLER ============================= */

struct PollerState {
    last_poll_end: Option<DateTime<Utc>>,
    /// fingerprint -> first time seen in the dedup window
    dedup: HashMap<String, DateTime<Utc>>,
}

/// Periodic log-backend poller with a short-term fingerprint cache.
///
/// Polls never abort the loop: a failed query is logged and retried at
/// the next tick, with the window left where it was. The dedup cache
/// suppresses repeats between overlapping windows and is swept on its
/// own tick.
pub struct Poller {
    backend: Arc<dyn LogBackend>,
    handler: Arc<dyn EntryHandler>,
    query: String,
    poll_interval: Duration,
    lookback: chrono::Duration,
    dedup_window: chrono::Duration,
    ready: Arc<AtomicBool>,
    state: Mutex<PollerState>,
}

impl Poller {
    pub fn new(
        backend: Arc<dyn LogBackend>,
        handler: Arc<dyn EntryHandler>,
        backend_config: &LogBackendConfig,
        poller_config: &PollerConfig,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            handler,
            query: backend_config.query.clone(),
            poll_interval: backend_config.poll_interval(),
            lookback: chrono::Duration::from_std(backend_config.lookback())
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            dedup_window: chrono::Duration::from_std(poller_config.dedup_window())
                .unwrap_or_else(|_| chrono::Duration::minutes(30)),
            ready,
            state: Mutex::new(PollerState {
                last_poll_end: None,
                dedup: HashMap::new(),
            }),
        }
    }

    /// Poll immediately, then on every interval tick until shutdown.
    /// An in-flight query always runs to completion; the shutdown
    /// signal is only observed between polls.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "poller_started"
        );

        self.poll_once().await;

        let mut poll_tick = tokio::time::interval(self.poll_interval);
        let mut sweep_tick = tokio::time::interval(DEDUP_SWEEP_INTERVAL);
        // the first tick of an interval fires immediately; the startup
        // poll above already covered it
        poll_tick.tick().await;
        sweep_tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("poller_stopped");
                    return;
                }
                _ = poll_tick.tick() => {
                    self.poll_once().await;
                }
                _ = sweep_tick.tick() => {
                    self.sweep_dedup(Utc::now());
                }
            }
        }
    }

    /// One poll cycle: compute the window, query, dedup, hand survivors
    /// downstream. `last_poll_end` moves only on query success.
    pub async fn poll_once(&self) {
        let now = Utc::now();
        let (start, end) = {
            let state = self.state.lock().expect("poller lock not poisoned");
            poll_window(now, state.last_poll_end, self.lookback)
        };

        let entries = match self.backend.query_range(&self.query, start, end, 0).await {
            Ok(entries) => entries,
            Err(e) => {
                metrics::POLL_ERRORS_TOTAL.inc();
                warn!(error = %e, "poll_failed");
                return;
            }
        };

        metrics::POLLS_TOTAL.inc();
        metrics::LOG_ENTRIES_TOTAL.inc_by(entries.len() as u64);
        let total = entries.len();

        let admitted = {
            let mut state = self.state.lock().expect("poller lock not poisoned");
            state.last_poll_end = Some(end);

            let mut admitted = Vec::new();
            for entry in entries {
                let fp = entry_fingerprint(&entry);
                if state.dedup.contains_key(&fp) {
                    continue;
                }
                state.dedup.insert(fp, now);
                admitted.push(entry);
            }
            admitted
        };

        debug!(
            window_start = %start,
            window_end = %end,
            entries = total,
            admitted = admitted.len(),
            "poll_completed"
        );

        for entry in admitted {
            self.handler.handle(entry).await;
        }

        self.ready.store(true, Ordering::Release);
    }

    /// Evict dedup entries older than the window.
    pub fn sweep_dedup(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().expect("poller lock not poisoned");
        let before = state.dedup.len();
        let window = self.dedup_window;
        state.dedup.retain(|_, first_seen| now - *first_seen <= window);
        let evicted = before - state.dedup.len();
        if evicted > 0 {
            debug!(evicted, remaining = state.dedup.len(), "dedup_cache_swept");
        }
    }

    pub fn last_poll_end(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .expect("poller lock not poisoned")
            .last_poll_end
    }

    #[cfg(test)]
    fn dedup_len(&self) -> usize {
        self.state
            .lock()
            .expect("poller lock not poisoned")
            .dedup
            .len()
    }
}

/// Half-open query window: ends now, starts at the later of
/// `now - lookback` and the previous window's end.
fn poll_window(
    now: DateTime<Utc>,
    last_end: Option<DateTime<Utc>>,
    lookback: chrono::Duration,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = now;
    let mut start = now - lookback;
    if let Some(last) = last_end {
        if last > start {
            start = last;
        }
    }
    if start > end {
        start = end;
    }
    (start, end)
}

fn entry_fingerprint(entry: &LogEntry) -> String {
    let namespace = entry.labels.get("namespace").map(String::as_str).unwrap_or_default();
    let pod = entry.labels.get("pod").map(String::as_str).unwrap_or_default();
    let container = entry
        .labels
        .get("container")
        .map(String::as_str)
        .unwrap_or_default();
    fingerprint::fingerprint(namespace, pod, container, &entry.line)
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::VecDeque;

    fn ts(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, minute, second)
            .single()
            .expect("valid timestamp")
    }

    // ── poll_window ──

    #[test]
    fn test_window_first_poll_uses_lookback() {
        let now = ts(10, 0);
        let (start, end) = poll_window(now, None, chrono::Duration::minutes(5));
        assert_eq!(end, now);
        assert_eq!(start, ts(5, 0));
    }

    #[test]
    fn test_window_resumes_from_last_end() {
        let now = ts(10, 0);
        let (start, _) = poll_window(now, Some(ts(8, 0)), chrono::Duration::minutes(5));
        assert_eq!(start, ts(8, 0));
    }

    #[test]
    fn test_window_caps_gap_at_lookback() {
        // a long outage must not produce an unbounded query window
        let now = ts(50, 0);
        let (start, _) = poll_window(now, Some(ts(0, 0)), chrono::Duration::minutes(5));
        assert_eq!(start, ts(45, 0));
    }

    #[test]
    fn test_window_never_inverts() {
        let now = ts(10, 0);
        let (start, end) = poll_window(now, Some(ts(20, 0)), chrono::Duration::minutes(5));
        assert!(start <= end);
    }

    // ── async poller behavior ──

    struct SeqBackend {
        responses: Mutex<VecDeque<anyhow::Result<Vec<LogEntry>>>>,
    }

    #[async_trait]
    impl LogBackend for SeqBackend {
        async fn query_range(
            &self,
            _query: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _limit: u32,
        ) -> anyhow::Result<Vec<LogEntry>> {
            self.responses
                .lock()
                .expect("test lock")
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn ready(&self) -> bool {
            true
        }
    }

    struct Collect {
        entries: Mutex<Vec<LogEntry>>,
    }

    #[async_trait]
    impl EntryHandler for Collect {
        async fn handle(&self, entry: LogEntry) {
            self.entries.lock().expect("test lock").push(entry);
        }
    }

    fn entry(pod: &str, line: &str) -> LogEntry {
        let mut labels = HashMap::new();
        labels.insert("namespace".to_string(), "prod".to_string());
        labels.insert("pod".to_string(), pod.to_string());
        labels.insert("container".to_string(), "api".to_string());
        LogEntry {
            timestamp: ts(0, 0),
            labels,
            line: line.to_string(),
        }
    }

    fn make_poller(
        responses: Vec<anyhow::Result<Vec<LogEntry>>>,
    ) -> (Arc<Poller>, Arc<Collect>, Arc<AtomicBool>) {
        let backend = Arc::new(SeqBackend {
            responses: Mutex::new(responses.into_iter().collect()),
        });
        let handler = Arc::new(Collect {
            entries: Mutex::new(Vec::new()),
        });
        let ready = Arc::new(AtomicBool::new(false));
        let backend_config = LogBackendConfig {
            url: "http://loki:3100".to_string(),
            query: "{job=\"app\"}".to_string(),
            poll_interval_secs: 30,
            lookback_secs: 300,
            timeout_secs: 30,
            tenant_id: None,
            username: None,
            password: None,
        };
        let poller = Arc::new(Poller::new(
            backend,
            handler.clone(),
            &backend_config,
            &PollerConfig::default(),
            ready.clone(),
        ));
        (poller, handler, ready)
    }

    #[tokio::test]
    async fn test_poll_hands_entries_downstream() {
        let (poller, handler, ready) = make_poller(vec![Ok(vec![
            entry("api-0", "ERROR: boom"),
            entry("api-0", "ERROR: other failure"),
        ])]);

        poller.poll_once().await;

        assert_eq!(handler.entries.lock().expect("test lock").len(), 2);
        assert!(ready.load(Ordering::Acquire));
        assert!(poller.last_poll_end().is_some());
    }

    #[tokio::test]
    async fn test_dedup_suppresses_repeat_across_polls() {
        let (poller, handler, _) = make_poller(vec![
            Ok(vec![entry("api-0", "ERROR: boom")]),
            Ok(vec![entry("api-0", "ERROR: boom")]),
        ]);

        poller.poll_once().await;
        poller.poll_once().await;

        assert_eq!(handler.entries.lock().expect("test lock").len(), 1);
    }

    #[tokio::test]
    async fn test_dedup_groups_replica_pods() {
        // distinct replicas of one deployment share a fingerprint
        let (poller, handler, _) = make_poller(vec![Ok(vec![
            entry("api-7d4f8b9c5d-abc12", "ERROR: boom"),
            entry("api-7d4f8b9c5d-xyz89", "ERROR: boom"),
        ])]);

        poller.poll_once().await;

        assert_eq!(handler.entries.lock().expect("test lock").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_poll_leaves_window_commit() {
        let (poller, handler, ready) = make_poller(vec![
            Err(anyhow::anyhow!("backend unreachable")),
            Ok(vec![entry("api-0", "ERROR: boom")]),
        ]);

        poller.poll_once().await;
        assert!(poller.last_poll_end().is_none());
        assert!(!ready.load(Ordering::Acquire));
        assert!(handler.entries.lock().expect("test lock").is_empty());

        poller.poll_once().await;
        assert!(poller.last_poll_end().is_some());
        assert_eq!(handler.entries.lock().expect("test lock").len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expires_dedup_entries() {
        let (poller, handler, _) = make_poller(vec![
            Ok(vec![entry("api-0", "ERROR: boom")]),
            Ok(vec![entry("api-0", "ERROR: boom")]),
        ]);

        poller.poll_once().await;
        assert_eq!(poller.dedup_len(), 1);

        // sweep "later than the window" clears the cache, so the same
        // fingerprint is admitted again
        poller.sweep_dedup(Utc::now() + chrono::Duration::hours(2));
        assert_eq!(poller.dedup_len(), 0);

        poller.poll_once().await;
        assert_eq!(handler.entries.lock().expect("test lock").len(), 2);
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_entries() {
        let (poller, _, _) = make_poller(vec![Ok(vec![entry("api-0", "ERROR: boom")])]);
        poller.poll_once().await;
        poller.sweep_dedup(Utc::now());
        assert_eq!(poller.dedup_len(), 1);
    }
}
