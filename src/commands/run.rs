use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use chrono::Utc;
use kube::Client;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

use kube_medic::actions;
use kube_medic::api::{self, AppState};
use kube_medic::broadcast::Broadcaster;
use kube_medic::config::Config;
use kube_medic::loki::{LogBackend, LokiClient};
use kube_medic::metrics;
use kube_medic::pipeline::Pipeline;
use kube_medic::poller::Poller;
use kube_medic::remediation::RemediationEngine;
use kube_medic::rules::RuleEngine;
use kube_medic::store::Store;

/* ============================= RETENTION ============================= */

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3_600);
const ERROR_RETENTION_DAYS: i64 = 7;
const REMEDIATION_RETENTION_DAYS: i64 = 30;

/* ============================= ENTRY ============================= */

pub async fn run(config_path: &Path) -> Result<()> {
    println!("Starting kube-medic controller...\n");
    info!("controller_starting");

    // Configuration and rules: any failure here is fatal
    print!("  Configuration ............... ");
    let config = match Config::load(config_path) {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            return Err(e);
        }
    };

    print!("  Rules ....................... ");
    let rules = Arc::new(
        RuleEngine::new(config.rules.clone()).context("invalid rule configuration")?,
    );
    println!("OK ({} rules)", rules.rules().len());

    // Log backend: report, but never refuse to start. The poller
    // retries on its own schedule.
    print!("  Log backend ................. ");
    let backend = Arc::new(LokiClient::new(config.log_backend.clone())?);
    if backend.ready().await {
        println!("OK ({})", config.log_backend.url);
    } else {
        println!("UNREACHABLE ({}), poller will retry", config.log_backend.url);
        warn!(url = %config.log_backend.url, "log_backend_not_ready_at_startup");
    }

    // Kubernetes: remediation cannot work without it
    print!("  Cluster connection .......... ");
    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    let store = Arc::new(Store::new(
        config.store.max_errors,
        config.store.max_remediation_logs,
    ));
    let broadcaster = Arc::new(Broadcaster::new());
    let engine = Arc::new(RemediationEngine::new(
        &config.remediation,
        rules.clone(),
        store.clone(),
        broadcaster.clone(),
    ));
    engine.register_actions(actions::builtin_actions(client));

    let ready = Arc::new(AtomicBool::new(false));
    let pipeline = Arc::new(Pipeline::new(
        rules.clone(),
        store.clone(),
        engine.clone(),
        broadcaster.clone(),
    ));
    let poller = Arc::new(Poller::new(
        backend,
        pipeline,
        &config.log_backend,
        &config.poller,
        ready.clone(),
    ));

    metrics::force_init();

    let addr: SocketAddr = config
        .web
        .listen
        .parse()
        .with_context(|| format!("invalid web.listen address '{}'", config.web.listen))?;

    let mode = match (config.remediation.enabled, config.remediation.dry_run) {
        (false, _) => "disabled",
        (true, true) => "enabled (dry run)",
        (true, false) => "enabled",
    };

    println!(
        "  Poll interval ............... {}s (lookback {}s)",
        config.log_backend.poll_interval_secs, config.log_backend.lookback_secs
    );
    println!("  Remediation ................. {mode}");
    println!("  HTTP server ................. http://{addr}{}", config.web.base_path);
    println!();
    println!("  Available endpoints:");
    println!("    GET  /api/errors .......... Paginated error listing with filters");
    println!("    GET  /api/errors/:id ...... Error detail with remediation history");
    println!("    GET  /api/rules ........... Rule list");
    println!("    POST /api/rules/test ...... Pattern test");
    println!("    GET  /api/remediations .... Remediation audit log");
    println!("    GET  /api/stats ........... Aggregate snapshot");
    println!("    GET  /api/settings ........ Runtime switches (POST to change)");
    println!("    GET  /ws .................. Websocket event feed");
    println!("    GET  /health /ready ....... Probes");
    println!("    GET  /metrics ............. Prometheus scrape endpoint");
    println!();
    println!("Controller running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let poller_handle = tokio::spawn(poller.run(shutdown_tx.subscribe()));

    let retention_store = store.clone();
    let retention_shutdown = shutdown_tx.subscribe();
    let retention_handle =
        tokio::spawn(async move { retention_loop(retention_store, retention_shutdown).await });

    let state = AppState {
        store,
        rules,
        engine,
        broadcaster,
        ready,
    };
    let app = api::build_router(state, &config.web.base_path);
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move { serve_http(app, addr, http_shutdown).await });

    signal::ctrl_c().await?;
    info!("shutdown_signal_received");
    println!("\n{}", "=".repeat(70));
    println!("Shutdown signal received. Stopping controller...");
    println!("{}", "=".repeat(70));

    let _ = shutdown_tx.send(());

    let _ = poller_handle.await;
    let _ = retention_handle.await;
    let _ = http_handle.await?;

    info!("controller_stopped");
    println!("Controller stopped.");
    Ok(())
}

/* ============================= HTTP ============================= */

async fn serve_http(
    app: Router,
    addr: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {addr}"))?;

    info!(addr = %addr, "http_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

/* ============================= RETENTION ============================= */

async fn retention_loop(store: Arc<Store>, mut shutdown: broadcast::Receiver<()>) {
    let mut tick = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
    // skip the immediate first tick; there is nothing to expire yet
    tick.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("retention_sweeper_stopped");
                return;
            }
            _ = tick.tick() => {
                let now = Utc::now();
                let errors = store.delete_old_errors(now - chrono::Duration::days(ERROR_RETENTION_DAYS));
                let logs = store.delete_old_remediations(now - chrono::Duration::days(REMEDIATION_RETENTION_DAYS));
                if errors > 0 || logs > 0 {
                    info!(errors_removed = errors, logs_removed = logs, "retention_sweep_completed");
                }
                metrics::ERRORS_STORED.set(store.error_count() as i64);
            }
        }
    }
}
