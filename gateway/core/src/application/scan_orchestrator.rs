// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Scan Orchestrator
//!
//! Owns the asynchronous half of the scan lifecycle: launching isolated
//! workloads for pending scans and reconciling running ones against the
//! cluster. The reconciler must be a singleton per deployment; its
//! terminal transitions are gated on the scan still being non-terminal
//! (`record_completion` returns false otherwise), so a second replica's
//! sweep cannot double-process a workload.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::registry::RegistryError;
use crate::config::ScannerConfig;
use crate::domain::report::parse_scan_output;
use crate::domain::repository::{ScanRepository, ServerRepository};
use crate::domain::scan::{Scan, ScanStatus};
use crate::domain::server::{Server, ServerStatus};
use crate::infrastructure::metrics;
use crate::infrastructure::scheduler::{build_job_spec, ScanScheduler, WorkloadState};

pub struct ScanOrchestrator {
    servers: Arc<dyn ServerRepository>,
    scans: Arc<dyn ScanRepository>,
    scheduler: Arc<dyn ScanScheduler>,
    cfg: ScannerConfig,
    pass_threshold: f64,
}

impl ScanOrchestrator {
    pub fn new(
        servers: Arc<dyn ServerRepository>,
        scans: Arc<dyn ScanRepository>,
        scheduler: Arc<dyn ScanScheduler>,
        cfg: ScannerConfig,
        pass_threshold: f64,
    ) -> Self {
        Self {
            servers,
            scans,
            scheduler,
            cfg,
            pass_threshold,
        }
    }

    fn verdict(&self, risk_score: f64) -> ServerStatus {
        if risk_score <= self.pass_threshold {
            ServerStatus::ScannedPass
        } else {
            ServerStatus::ScannedFail
        }
    }

    /// Create the Pending scan row and launch its workload. The server
    /// must already be in PendingScan. On submission failure the scan is
    /// recorded as Failed and the server drops to ScannedFail; the caller
    /// still receives the scan row to poll.
    pub async fn launch(&self, server: &Server, triggered_by: &str) -> Result<Scan, RegistryError> {
        let mut scan = Scan::pending(
            server.id,
            self.cfg.image.clone(),
            triggered_by.to_string(),
        );
        self.scans.create(&scan).await?;

        let spec = match build_job_spec(server, scan.id, &self.cfg) {
            Ok(spec) => spec,
            Err(e) => return self.fail_submission(scan, e.to_string()).await,
        };
        scan.job_name = Some(spec.job_name.clone());

        match self.scheduler.submit(&spec).await {
            Ok(()) => {
                scan.status = ScanStatus::Running;
                self.scans.update(&scan).await?;
                self.servers
                    .transition_status(
                        server.id,
                        &[ServerStatus::PendingScan],
                        ServerStatus::Scanning,
                    )
                    .await?;
                info!(server = %server.canonical_id, scan = %scan.id, "scan workload running");
                Ok(scan)
            }
            Err(e) => {
                warn!(server = %server.canonical_id, error = %e, "scan submission failed");
                self.fail_submission(scan, e.to_string()).await
            }
        }
    }

    async fn fail_submission(
        &self,
        mut scan: Scan,
        error_message: String,
    ) -> Result<Scan, RegistryError> {
        scan.status = ScanStatus::Failed;
        scan.error_message = Some(error_message);
        scan.finished_at = Some(Utc::now());
        self.scans
            .record_completion(&scan, ServerStatus::ScannedFail)
            .await?;
        metrics::record_scan_run(ScanStatus::Failed);
        Ok(scan)
    }

    /// Explicit cancel: delete the workload and close the scan row.
    /// Administrative no-op on the server lifecycle by design of the
    /// state machine; the server keeps whatever status it had.
    pub async fn cancel(&self, scan: &Scan) -> Result<Scan, RegistryError> {
        if scan.status.is_terminal() {
            return Err(RegistryError::InvalidState(format!(
                "scan is already {}",
                scan.status.as_str()
            )));
        }
        if let Some(job_name) = &scan.job_name {
            if let Err(e) = self.scheduler.delete(job_name).await {
                warn!(job = %job_name, error = %e, "workload delete failed during cancel");
            }
        }
        let mut cancelled = scan.clone();
        cancelled.status = ScanStatus::Cancelled;
        cancelled.finished_at = Some(Utc::now());
        self.scans.update(&cancelled).await?;
        metrics::record_scan_run(ScanStatus::Cancelled);
        info!(scan = %scan.id, "scan cancelled");
        Ok(cancelled)
    }

    /// Periodic sweeper; run exactly one instance per deployment.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.cfg.reconcile_interval_seconds));
        info!(
            interval = self.cfg.reconcile_interval_seconds,
            "scan reconciler started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scan reconciler stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile_once().await {
                        error!(error = %e, "reconcile sweep failed");
                    }
                }
            }
        }
    }

    /// One sweep over every Running scan.
    pub async fn reconcile_once(&self) -> Result<(), RegistryError> {
        let running = self.scans.list_by_status(ScanStatus::Running).await?;
        for scan in running {
            if let Err(e) = self.reconcile_scan(scan).await {
                warn!(error = %e, "failed to reconcile scan");
            }
        }
        self.refresh_gauges().await;
        Ok(())
    }

    async fn reconcile_scan(&self, scan: Scan) -> Result<(), RegistryError> {
        let Some(job_name) = scan.job_name.clone() else {
            return self
                .finish(scan, ScanStatus::Failed, "scan has no workload handle", None)
                .await;
        };

        match self.scheduler.status(&job_name).await {
            Ok(WorkloadState::Succeeded) => self.ingest(scan, &job_name, true).await,
            Ok(WorkloadState::Failed) => self.ingest(scan, &job_name, false).await,
            Ok(WorkloadState::Active) => {
                let elapsed = Utc::now() - scan.started_at;
                if elapsed.num_seconds() as u64 > self.cfg.timeout_seconds {
                    if let Err(e) = self.scheduler.delete(&job_name).await {
                        warn!(job = %job_name, error = %e, "timeout cleanup failed");
                    }
                    let message =
                        format!("scan exceeded {} seconds", self.cfg.timeout_seconds);
                    self.finish(scan, ScanStatus::TimedOut, &message, None).await
                } else {
                    Ok(())
                }
            }
            Ok(WorkloadState::NotFound) => {
                self.finish(scan, ScanStatus::Failed, "workload not found", None)
                    .await
            }
            Err(e) => {
                // Transient scheduler errors leave the scan alone; the
                // next sweep retries, and the timeout check still bounds it.
                debug!(job = %job_name, error = %e, "scheduler lookup failed, will retry");
                Ok(())
            }
        }
    }

    /// Terminal workload: pull stdout, parse, write the result. A failed
    /// workload whose logs still parse keeps its report; the server fails
    /// either way unless the workload succeeded under the threshold.
    async fn ingest(
        &self,
        scan: Scan,
        job_name: &str,
        workload_succeeded: bool,
    ) -> Result<(), RegistryError> {
        let output = match self.scheduler.fetch_output(job_name).await {
            Ok(output) => output,
            Err(e) => {
                let message = format!("could not read workload output: {}", e);
                return self.finish(scan, ScanStatus::Failed, &message, Some(job_name)).await;
            }
        };

        match parse_scan_output(&output) {
            Ok(report) => {
                let mut completed = scan;
                completed.status = ScanStatus::Completed;
                completed.risk_score = Some(report.risk_score);
                completed.summary = report.summary.clone();
                completed.report_json = serde_json::from_str(&output).ok();
                completed.issues = report.issues;
                completed.discovered_tools = report.tools;
                completed.finished_at = Some(Utc::now());

                let server_status = if workload_succeeded {
                    self.verdict(report.risk_score)
                } else {
                    ServerStatus::ScannedFail
                };

                if self
                    .scans
                    .record_completion(&completed, server_status)
                    .await?
                {
                    metrics::record_scan_run(ScanStatus::Completed);
                    metrics::record_risk_score(report.risk_score);
                    info!(
                        scan = %completed.id,
                        risk = report.risk_score,
                        status = server_status.as_str(),
                        "scan completed"
                    );
                    self.cleanup(job_name).await;
                }
                Ok(())
            }
            Err(e) => {
                let message = format!("unparseable scanner output: {}", e);
                self.finish(scan, ScanStatus::Failed, &message, Some(job_name))
                    .await
            }
        }
    }

    async fn finish(
        &self,
        mut scan: Scan,
        status: ScanStatus,
        error_message: &str,
        cleanup_job: Option<&str>,
    ) -> Result<(), RegistryError> {
        scan.status = status;
        scan.error_message = Some(error_message.to_string());
        scan.finished_at = Some(Utc::now());

        if self
            .scans
            .record_completion(&scan, ServerStatus::ScannedFail)
            .await?
        {
            metrics::record_scan_run(status);
            warn!(scan = %scan.id, status = status.as_str(), error = error_message, "scan did not complete");
            if let Some(job_name) = cleanup_job {
                self.cleanup(job_name).await;
            }
        }
        Ok(())
    }

    async fn cleanup(&self, job_name: &str) {
        if let Err(e) = self.scheduler.delete(job_name).await {
            debug!(job = %job_name, error = %e, "workload cleanup failed");
        }
    }

    async fn refresh_gauges(&self) {
        if let Ok(approved) = self
            .servers
            .count_by_status(ServerStatus::Approved)
            .await
        {
            metrics::set_approved_servers(approved);
        }
        let pending = self.scans.count_by_status(ScanStatus::Pending).await;
        let running = self.scans.count_by_status(ScanStatus::Running).await;
        if let (Ok(pending), Ok(running)) = (pending, running) {
            metrics::set_pending_scans(pending + running);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::repositories::{InMemoryScanRepository, InMemoryServerRepository};
    use crate::infrastructure::scheduler::{ScanJobSpec, SchedulerError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use uuid::Uuid;

    /// Scripted scheduler: hands back whatever the test queued up.
    struct FakeScheduler {
        submit_error: Option<String>,
        state: Mutex<WorkloadState>,
        output: Mutex<Option<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl Default for FakeScheduler {
        fn default() -> Self {
            Self {
                submit_error: None,
                state: Mutex::new(WorkloadState::Active),
                output: Mutex::new(None),
                deleted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ScanScheduler for FakeScheduler {
        async fn submit(&self, _spec: &ScanJobSpec) -> Result<(), SchedulerError> {
            match &self.submit_error {
                Some(message) => Err(SchedulerError::Submit(message.clone())),
                None => Ok(()),
            }
        }

        async fn status(&self, _job_name: &str) -> Result<WorkloadState, SchedulerError> {
            Ok(*self.state.lock())
        }

        async fn fetch_output(&self, job_name: &str) -> Result<String, SchedulerError> {
            self.output
                .lock()
                .clone()
                .ok_or_else(|| SchedulerError::Output(format!("no pods for job {}", job_name)))
        }

        async fn delete(&self, job_name: &str) -> Result<(), SchedulerError> {
            self.deleted.lock().push(job_name.to_string());
            Ok(())
        }
    }

    fn fixture(
        scheduler: Arc<FakeScheduler>,
    ) -> (
        ScanOrchestrator,
        Arc<InMemoryServerRepository>,
        Arc<InMemoryScanRepository>,
    ) {
        let servers = Arc::new(InMemoryServerRepository::new());
        let scans = Arc::new(InMemoryScanRepository::sharing(&servers));
        let orchestrator = ScanOrchestrator::new(
            servers.clone(),
            scans.clone(),
            scheduler,
            ScannerConfig::default(),
            0.5,
        );
        (orchestrator, servers, scans)
    }

    async fn seeded_server(
        servers: &InMemoryServerRepository,
        status: ServerStatus,
    ) -> Server {
        let server = Server {
            id: crate::domain::server::ServerId(Uuid::new_v4()),
            canonical_id: "team-a/weather".to_string(),
            name: "weather".to_string(),
            description: None,
            owner_team: "team-a".to_string(),
            source_type: crate::domain::server::SourceType::ContainerImage,
            source_url: Some("registry.local/weather:1".to_string()),
            version: "1".to_string(),
            status,
            declared_tools: vec![],
            mcp_config: None,
            test_endpoint: None,
            tags: vec![],
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            latest_scan_id: None,
            latest_risk_score: None,
        };
        servers.create(&server).await.unwrap();
        server
    }

    #[tokio::test]
    async fn test_launch_marks_scan_running() {
        let scheduler = Arc::new(FakeScheduler::default());
        let (orchestrator, servers, _scans) = fixture(scheduler);
        let server = seeded_server(&servers, ServerStatus::PendingScan).await;

        let scan = orchestrator.launch(&server, "alice").await.unwrap();
        assert_eq!(scan.status, ScanStatus::Running);
        assert!(scan.job_name.as_deref().unwrap().starts_with("mcp-scan-"));

        let server = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::Scanning);
    }

    #[tokio::test]
    async fn test_launch_submission_failure() {
        let scheduler = Arc::new(FakeScheduler {
            submit_error: Some("quota exhausted".to_string()),
            ..Default::default()
        });
        let (orchestrator, servers, _scans) = fixture(scheduler);
        let server = seeded_server(&servers, ServerStatus::PendingScan).await;

        let scan = orchestrator.launch(&server, "alice").await.unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
        assert!(scan.error_message.unwrap().contains("quota exhausted"));

        let server = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::ScannedFail);
    }

    #[tokio::test]
    async fn test_reconcile_passing_scan() {
        let scheduler = Arc::new(FakeScheduler::default());
        let (orchestrator, servers, scans) = fixture(scheduler.clone());
        let server = seeded_server(&servers, ServerStatus::PendingScan).await;
        let scan = orchestrator.launch(&server, "alice").await.unwrap();

        *scheduler.state.lock() = WorkloadState::Succeeded;
        *scheduler.output.lock() = Some(r#"{"risk_score": 0.2}"#.to_string());
        orchestrator.reconcile_once().await.unwrap();

        let scan = scans.find_by_id(scan.id).await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!(scan.risk_score, Some(0.2));
        assert!(scan.finished_at.is_some());

        let server = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::ScannedPass);
        assert_eq!(server.latest_scan_id, Some(scan.id));
        assert_eq!(server.latest_risk_score, Some(0.2));

        // Terminal workloads are reclaimed.
        assert!(!scheduler.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_risky_scan_fails_server() {
        let scheduler = Arc::new(FakeScheduler::default());
        let (orchestrator, servers, _scans) = fixture(scheduler.clone());
        let server = seeded_server(&servers, ServerStatus::PendingScan).await;
        orchestrator.launch(&server, "alice").await.unwrap();

        *scheduler.state.lock() = WorkloadState::Succeeded;
        *scheduler.output.lock() = Some(r#"{"risk_score": 0.9}"#.to_string());
        orchestrator.reconcile_once().await.unwrap();

        let server = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::ScannedFail);
    }

    #[tokio::test]
    async fn test_reconcile_timeout() {
        let scheduler = Arc::new(FakeScheduler::default());
        let (orchestrator, servers, scans) = fixture(scheduler.clone());
        let server = seeded_server(&servers, ServerStatus::PendingScan).await;
        let scan = orchestrator.launch(&server, "alice").await.unwrap();

        // Backdate the start so the sweep sees it as expired.
        let mut stale = scans.find_by_id(scan.id).await.unwrap().unwrap();
        stale.started_at = Utc::now() - chrono::Duration::seconds(400);
        scans.update(&stale).await.unwrap();

        orchestrator.reconcile_once().await.unwrap();

        let scan = scans.find_by_id(scan.id).await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::TimedOut);
        assert!(scan.error_message.unwrap().contains("300"));

        let server = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::ScannedFail);
        assert!(!scheduler.deleted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_vanished_workload() {
        let scheduler = Arc::new(FakeScheduler::default());
        let (orchestrator, servers, scans) = fixture(scheduler.clone());
        let server = seeded_server(&servers, ServerStatus::PendingScan).await;
        let scan = orchestrator.launch(&server, "alice").await.unwrap();

        *scheduler.state.lock() = WorkloadState::NotFound;
        orchestrator.reconcile_once().await.unwrap();

        let scan = scans.find_by_id(scan.id).await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
        let server = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::ScannedFail);
    }

    #[tokio::test]
    async fn test_reconcile_unparseable_output() {
        let scheduler = Arc::new(FakeScheduler::default());
        let (orchestrator, servers, scans) = fixture(scheduler.clone());
        let server = seeded_server(&servers, ServerStatus::PendingScan).await;
        let scan = orchestrator.launch(&server, "alice").await.unwrap();

        *scheduler.state.lock() = WorkloadState::Succeeded;
        *scheduler.output.lock() = Some("panic: scanner crashed".to_string());
        orchestrator.reconcile_once().await.unwrap();

        let scan = scans.find_by_id(scan.id).await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
        assert!(scan.error_message.unwrap().contains("unparseable"));
    }

    #[tokio::test]
    async fn test_cancel_leaves_server_status_alone() {
        let scheduler = Arc::new(FakeScheduler::default());
        let (orchestrator, servers, scans) = fixture(scheduler.clone());
        let server = seeded_server(&servers, ServerStatus::PendingScan).await;
        let scan = orchestrator.launch(&server, "alice").await.unwrap();

        let cancelled = orchestrator.cancel(&scan).await.unwrap();
        assert_eq!(cancelled.status, ScanStatus::Cancelled);
        assert!(cancelled.finished_at.is_some());

        let server = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::Scanning);

        let stored = scans.find_by_id(scan.id).await.unwrap().unwrap();
        assert!(orchestrator.cancel(&stored).await.is_err());
    }
}
