use std::sync::LazyLock;

use prometheus::{IntCounter, IntCounterVec, IntGauge, Registry};

/* ============================= REGISTRY ============================= */

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static POLLS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("medic_polls_total", "Total log backend poll cycles")
        .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static POLL_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("medic_poll_errors_total", "Total failed poll cycles")
        .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static LOG_ENTRIES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "medic_log_entries_total",
        "Total log entries returned by the backend",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static ERRORS_STORED: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new("medic_errors_stored", "Error classes currently in the store")
        .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static REMEDIATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "medic_remediations_total",
            "Remediation attempts by outcome",
        ),
        &["status"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

/// Touch every instrument so it appears on /metrics before first use.
pub fn force_init() {
    LazyLock::force(&POLLS_TOTAL);
    LazyLock::force(&POLL_ERRORS_TOTAL);
    LazyLock::force(&LOG_ENTRIES_TOTAL);
    LazyLock::force(&ERRORS_STORED);
    LazyLock::force(&REMEDIATIONS_TOTAL);
}

/* ============================= TESTS ============================= */
