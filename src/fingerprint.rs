use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/* ============================= LIMITS ============================= */

/// Upper bound on the stored canonical message, suffix included.
const MAX_MESSAGE_LEN: usize = 500;

/* ============================= POD NAME PATTERNS ============================= */

// Deployment pods carry a pod-template hash plus a random suffix,
// e.g. "api-7d4f8b9c5d-abc12".
static RE_DEPLOYMENT_POD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)-[a-z0-9]{8,10}-[a-z0-9]{5}$").expect("pattern is valid"));

// StatefulSet pods have an ordinal suffix, e.g. "db-0".
static RE_STATEFULSET_POD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)-\d+$").expect("pattern is valid"));

// Job pods have a single random suffix, e.g. "migrate-vx8z9".
static RE_JOB_POD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+)-[a-z0-9]{5}$").expect("pattern is valid"));

/* ============================= MESSAGE EXTRACTION ============================= */

// Shallow JSON field probe. Deliberately not a full JSON parse: log lines
// are frequently JSON-ish but truncated or wrapped.
static RE_JSON_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:message|msg|error|err)"\s*:\s*"([^"]*)""#).expect("pattern is valid")
});

static RE_SEVERITY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:error|fatal|panic|exception|fail(?:ed|ure)?)\b[:\s]+(.+)")
        .expect("pattern is valid")
});

static RE_TIMESTAMP_LEVEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T\s]\d{2}:\d{2}:\d{2}[^\s]*\s+\w+\s+(.+)")
        .expect("pattern is valid")
});

/* ============================= CANONICALIZATION ============================= */

static RE_ISO_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T\s]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?")
        .expect("pattern is valid")
});

static RE_UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b")
        .expect("pattern is valid")
});

static RE_LONG_HEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{24,}\b").expect("pattern is valid"));

static RE_IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}(?::\d+)?\b").expect("pattern is valid")
});

// Six digits and up. Shorter runs (HTTP codes, small counters) carry
// signal and are kept verbatim.
static RE_LONG_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{6,}").expect("pattern is valid"));

/* ============================= POD BASE ============================= */

/// Strip the generated suffixes Kubernetes workload controllers append
/// to pod names, yielding the workload base name.
///
/// Checks Deployment, then StatefulSet, then Job naming shapes; a name
/// matching none of them is returned unchanged.
pub fn normalize_pod_name(pod: &str) -> String {
    for re in [&*RE_DEPLOYMENT_POD, &*RE_STATEFULSET_POD, &*RE_JOB_POD] {
        if let Some(caps) = re.captures(pod) {
            return caps[1].to_string();
        }
    }
    pod.to_string()
}

/* ============================= MESSAGE ============================= */

/// Pull the most meaningful message text out of a raw log line.
///
/// Tries, in order: a JSON `message`/`msg`/`error`/`err` field, a
/// severity-word prefix, a leading-timestamp-then-level layout, and
/// finally the raw line itself (truncated).
pub fn extract_message(raw: &str) -> String {
    if let Some(caps) = RE_JSON_MESSAGE.captures(raw) {
        return caps[1].to_string();
    }
    if let Some(caps) = RE_SEVERITY_PREFIX.captures(raw) {
        return caps[1].to_string();
    }
    if let Some(caps) = RE_TIMESTAMP_LEVEL.captures(raw) {
        return caps[1].to_string();
    }
    truncate_message(raw)
}

/// Replace volatile tokens so that repeated occurrences of the same
/// logical error collapse to one signature.
pub fn canonicalize_message(message: &str) -> String {
    let msg = RE_ISO_TIMESTAMP.replace_all(message, "");
    let msg = RE_UUID.replace_all(&msg, "<UUID>");
    let msg = RE_LONG_HEX.replace_all(&msg, "<ID>");
    let msg = RE_IPV4.replace_all(&msg, "<IP>");
    let msg = RE_LONG_NUMBER.replace_all(&msg, "<NUM>");
    msg.trim().to_string()
}

/// Extraction plus canonicalization plus the storage length cap.
pub fn canonical_message(raw: &str) -> String {
    truncate_message(&canonicalize_message(&extract_message(raw)))
}

fn truncate_message(s: &str) -> String {
    if s.chars().count() <= MAX_MESSAGE_LEN {
        return s.to_string();
    }
    let kept: String = s.chars().take(MAX_MESSAGE_LEN - 3).collect();
    format!("{kept}...")
}

/* ============================= FINGERPRINT ============================= */

/// Deterministic 16-hex-char identity of an error class.
///
/// Pure function of (namespace, pod base, container, canonical message):
/// SHA-256 over the `|`-joined fields, first 8 bytes hex-encoded.
pub fn fingerprint(namespace: &str, pod: &str, container: &str, raw_line: &str) -> String {
    let base = normalize_pod_name(pod);
    let message = canonical_message(raw_line);
    let input = format!("{namespace}|{base}|{container}|{message}");
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/* ============================= TESTS ============================= */
