// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon wiring: connection pool, schema bootstrap, services, the
//! reconciler and audit writer tasks, and the axum listener with
//! graceful shutdown. SIGHUP re-reads the configuration file and swaps
//! the policy snapshot without a restart.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use aegis_gateway_core::application::{
    AuditPipeline, PolicyEngine, RegistryService, ScanOrchestrator,
};
use aegis_gateway_core::config::GatewayConfigManifest;
use aegis_gateway_core::domain::repository::{
    ApprovalRepository, AuditRepository, ScanRepository, ServerRepository,
};
use aegis_gateway_core::infrastructure::repositories::{
    PostgresApprovalRepository, PostgresAuditRepository, PostgresScanRepository,
    PostgresServerRepository,
};
use aegis_gateway_core::infrastructure::scheduler::KubeScanScheduler;
use aegis_gateway_core::infrastructure::{metrics, Database};
use aegis_gateway_core::presentation::api::{app, AppState};
use aegis_gateway_core::presentation::enforcement::{enforce_mcp, EnforcementState, RateLimits};

const AUDIT_BUFFER_CAPACITY: usize = 8192;

pub async fn run(
    manifest: GatewayConfigManifest,
    config_path: Option<PathBuf>,
    host: &str,
    port: u16,
) -> Result<()> {
    let cfg = manifest.spec.clone();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;
    metrics::describe();

    let db = Database::new_lazy(&cfg.postgres_connection)
        .context("Invalid PostgreSQL connection string")?;
    let pool = db.get_pool().clone();

    let servers: Arc<dyn ServerRepository> =
        Arc::new(PostgresServerRepository::new(pool.clone()));
    let scans: Arc<dyn ScanRepository> = Arc::new(PostgresScanRepository::new(pool.clone()));
    let approvals: Arc<dyn ApprovalRepository> =
        Arc::new(PostgresApprovalRepository::new(pool.clone()));
    let audit_repo: Arc<dyn AuditRepository> = Arc::new(PostgresAuditRepository::new(pool));

    // Bootstrap is idempotent; a failure is logged and the daemon keeps
    // going, so a transiently unreachable database does not wedge startup.
    for (name, result) in [
        ("servers", servers.bootstrap().await),
        ("scans", scans.bootstrap().await),
        ("approvals", approvals.bootstrap().await),
        ("audit", audit_repo.bootstrap().await),
    ] {
        if let Err(e) = result {
            warn!(relation = name, error = %e, "schema bootstrap failed");
        }
    }

    let kube_client = kube::Client::try_default()
        .await
        .context("Failed to build cluster scheduler client")?;
    let scheduler = Arc::new(KubeScanScheduler::new(kube_client, cfg.scanner.clone()));

    let orchestrator = Arc::new(ScanOrchestrator::new(
        servers.clone(),
        scans.clone(),
        scheduler,
        cfg.scanner.clone(),
        cfg.policy.scan_pass_threshold,
    ));
    let registry = Arc::new(RegistryService::new(
        servers.clone(),
        scans,
        approvals,
        orchestrator.clone(),
        cfg.policy.scan_pass_threshold,
    ));
    let policy = Arc::new(PolicyEngine::new(&cfg, servers));
    let audit = Arc::new(AuditPipeline::new(audit_repo, AUDIT_BUFFER_CAPACITY));

    let shutdown = CancellationToken::new();

    // Audit writer. Fire-and-forget producers; this is the one consumer.
    let audit_task = {
        let audit = audit.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move { audit.run(cancel).await })
    };

    // Scan reconciler. Exactly one per deployment; run this binary as a
    // single replica or give the reconciler its own singleton workload.
    let reconciler_task = {
        let orchestrator = orchestrator.clone();
        let cancel = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(cancel).await })
    };

    // SIGHUP swaps the policy snapshot from the file on disk.
    spawn_reload_task(policy.clone(), config_path, shutdown.clone());

    let state = Arc::new(AppState {
        registry,
        audit: audit.clone(),
        metrics: Some(metrics_handle),
        db: Some(db),
    });
    let enforcement = Arc::new(EnforcementState {
        policy,
        audit: audit.clone(),
        rate_limits: RateLimits::from_config(&cfg.policy),
    });

    let router = app(state)
        .layer(axum::middleware::from_fn_with_state(enforcement, enforce_mcp))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %addr, mode = ?cfg.enforcement_mode, "gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown.clone()))
        .await
        .context("HTTP server failed")?;

    shutdown.cancel();
    let _ = reconciler_task.await;
    let _ = audit_task.await;
    audit.drain().await;
    info!("gateway stopped");
    Ok(())
}

async fn wait_for_shutdown(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!(error = %e, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
    shutdown.cancel();
}

#[cfg(unix)]
fn spawn_reload_task(
    policy: Arc<PolicyEngine>,
    config_path: Option<PathBuf>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut hup = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGHUP, policy reload disabled");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                received = hup.recv() => {
                    if received.is_none() {
                        return;
                    }
                    match GatewayConfigManifest::load_or_default(config_path.clone())
                        .and_then(|m| m.validate().map(|_| m))
                    {
                        Ok(manifest) => policy.reload(&manifest.spec),
                        Err(e) => warn!(error = %e, "config reload rejected, keeping current policy"),
                    }
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_task(
    _policy: Arc<PolicyEngine>,
    _config_path: Option<PathBuf>,
    _cancel: CancellationToken,
) {
}
