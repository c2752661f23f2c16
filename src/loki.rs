use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::LogBackendConfig;

/// Cap on entries per query window.
const DEFAULT_QUERY_LIMIT: u32 = 5_000;

/* ============================= CONTRACT ============================= */

/// A single log entry from the backend.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// Stream labels; by convention carries `namespace`, `pod`, `container`.
    pub labels: HashMap<String, String>,
    pub line: String,
}

/// Abstract log-aggregation backend. The poller only ever talks to
/// this; the concrete protocol lives behind it.
#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Fetch entries matching `query` in the half-open range `[start, end)`,
    /// oldest first, at most `limit` entries.
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<LogEntry>>;

    /// Best-effort readiness probe.
    async fn ready(&self) -> bool;
}

/* ============================= LOKI WIRE FORMAT ============================= */

#[derive(Debug, Deserialize)]
struct LokiResponse {
    status: String,
    data: LokiData,
}

#[derive(Debug, Deserialize)]
struct LokiData {
    result: Vec<LokiStream>,
}

#[derive(Debug, Deserialize)]
struct LokiStream {
    stream: HashMap<String, String>,
    /// (timestamp_ns, line) pairs
    values: Vec<(String, String)>,
}

/// Decode a Loki query_range response body into entries sorted oldest
/// first. Entries with unparseable timestamps are skipped; the batch
/// survives.
fn decode_response(body: &str) -> Result<Vec<LogEntry>> {
    let response: LokiResponse =
        serde_json::from_str(body).context("cannot parse log backend response")?;
    if response.status != "success" {
        anyhow::bail!("log backend returned status {}", response.status);
    }

    let mut entries = Vec::new();
    for stream in response.data.result {
        let labels = stream.stream;
        for (timestamp_ns, line) in stream.values {
            let Ok(ns) = timestamp_ns.parse::<i64>() else {
                continue;
            };
            let secs = ns.div_euclid(1_000_000_000);
            let nanos = ns.rem_euclid(1_000_000_000) as u32;
            let Some(timestamp) = DateTime::from_timestamp(secs, nanos) else {
                continue;
            };
            entries.push(LogEntry {
                timestamp,
                labels: labels.clone(),
                line,
            });
        }
    }

    entries.sort_by_key(|e| e.timestamp);
    Ok(entries)
}

/* ============================= CLIENT ============================= */

/// Loki `query_range` client with optional tenant scoping and basic auth.
pub struct LokiClient {
    config: LogBackendConfig,
    client: reqwest::Client,
}

impl LokiClient {
    pub fn new(config: LogBackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("cannot build HTTP client for log backend")?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let req = match &self.config.tenant_id {
            Some(tenant) => req.header("X-Scope-OrgID", tenant),
            None => req,
        };
        match &self.config.username {
            Some(user) => req.basic_auth(user, self.config.password.as_deref()),
            None => req,
        }
    }
}

#[async_trait]
impl LogBackend for LokiClient {
    async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<LogEntry>> {
        let limit = if limit == 0 { DEFAULT_QUERY_LIMIT } else { limit };
        let start_ns = start.timestamp_nanos_opt().unwrap_or(0);
        let end_ns = end.timestamp_nanos_opt().unwrap_or(0);
        let url = format!("{}/loki/api/v1/query_range", self.base_url());

        debug!(query = %query, start = %start, end = %end, limit, "querying_log_backend");

        let req = self.client.get(&url).query(&[
            ("query", query),
            ("start", &start_ns.to_string()),
            ("end", &end_ns.to_string()),
            ("limit", &limit.to_string()),
            ("direction", "forward"),
        ]);

        let response = self
            .apply_auth(req)
            .send()
            .await
            .context("log backend request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("log backend query failed with status {status}: {body}");
        }

        let body = response
            .text()
            .await
            .context("cannot read log backend response")?;
        let entries = decode_response(&body)?;

        debug!(entries = entries.len(), "log_backend_query_completed");
        Ok(entries)
    }

    async fn ready(&self) -> bool {
        let url = format!("{}/ready", self.base_url());
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "log_backend_readiness_probe_failed");
                false
            }
        }
    }
}

/* ============================= TESTS ============================= */
