// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Scan Workload Scheduler
//!
//! Each scan runs as a one-shot, isolated Job on the cluster. The
//! scheduler trait keeps the orchestrator testable; the production
//! implementation talks to the Kubernetes API. Workloads run non-root
//! with a read-only root filesystem and no privilege escalation, and
//! are bounded by `activeDeadlineSeconds` on the cluster side as well
//! as the reconciler's own timeout check.

use async_trait::async_trait;
use base64::Engine as _;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ScannerConfig;
use crate::domain::scan::ScanId;
use crate::domain::server::{Server, SourceType};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to submit scan workload: {0}")]
    Submit(String),
    #[error("scheduler api error: {0}")]
    Api(String),
    #[error("workload produced no readable output: {0}")]
    Output(String),
    #[error("source type {0:?} cannot be scanned as a workload")]
    Unscannable(SourceType),
}

/// Observed workload state, collapsed to what reconciliation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    Active,
    Succeeded,
    Failed,
    NotFound,
}

/// Everything the scanner container needs, passed base64-encoded via
/// environment so the workload spec stays a flat manifest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDescriptor {
    pub source_type: SourceType,
    pub source_url: Option<String>,
    pub test_endpoint: Option<String>,
    pub mcp_config: Option<serde_json::Value>,
    pub declared_tools: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScanJobSpec {
    pub job_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub descriptor_b64: String,
    pub scan_id: ScanId,
}

/// Deterministic workload name for a scan: lowercase, 63-char limit.
pub fn job_name_for(scan_id: ScanId) -> String {
    let mut name = format!("mcp-scan-{}", scan_id).to_lowercase();
    name.truncate(63);
    name
}

/// Select the scanner invocation for the server's source type and wrap
/// the server's scan inputs into a job spec. LocalDeclared servers are
/// rejected; those go through the upload path.
pub fn build_job_spec(
    server: &Server,
    scan_id: ScanId,
    cfg: &ScannerConfig,
) -> Result<ScanJobSpec, SchedulerError> {
    let mut command = match server.source_type {
        SourceType::ExternalRepo | SourceType::InternalRepo => vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "git clone --depth 1 \"$(echo \"$AEGIS_SCAN_DESCRIPTOR\" | base64 -d | \
             jq -r .sourceUrl)\" /tmp/scan-src && mcp-scanner scan /tmp/scan-src --format json"
                .to_string(),
        ],
        SourceType::ContainerImage | SourceType::PackageArtifact => vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "mcp-scanner scan-artifact --descriptor-env AEGIS_SCAN_DESCRIPTOR --format json"
                .to_string(),
        ],
        SourceType::LocalDeclared => {
            return Err(SchedulerError::Unscannable(SourceType::LocalDeclared))
        }
    };

    if cfg.enable_dynamic_testing {
        if let Some(endpoint) = server.test_endpoint.as_deref().filter(|e| !e.is_empty()) {
            let probe = format!(" && mcp-scanner probe --endpoint '{}' --format json", endpoint);
            if let Some(last) = command.last_mut() {
                last.push_str(&probe);
            }
        }
    }

    let descriptor = ScanDescriptor {
        source_type: server.source_type,
        source_url: server.source_url.clone(),
        test_endpoint: server.test_endpoint.clone(),
        mcp_config: server.mcp_config.clone(),
        declared_tools: server.declared_tools.clone(),
    };
    let descriptor_json = serde_json::to_vec(&descriptor)
        .map_err(|e| SchedulerError::Submit(format!("descriptor serialization: {}", e)))?;
    let descriptor_b64 = base64::engine::general_purpose::STANDARD.encode(descriptor_json);

    Ok(ScanJobSpec {
        job_name: job_name_for(scan_id),
        image: cfg.image.clone(),
        command,
        descriptor_b64,
        scan_id,
    })
}

#[async_trait]
pub trait ScanScheduler: Send + Sync {
    /// Launch the workload. The job name in `spec` becomes the handle
    /// for every later call.
    async fn submit(&self, spec: &ScanJobSpec) -> Result<(), SchedulerError>;

    async fn status(&self, job_name: &str) -> Result<WorkloadState, SchedulerError>;

    /// Stdout of the first finished pod of the workload.
    async fn fetch_output(&self, job_name: &str) -> Result<String, SchedulerError>;

    /// Best-effort delete with background propagation; absent workloads
    /// are not an error.
    async fn delete(&self, job_name: &str) -> Result<(), SchedulerError>;
}

pub struct KubeScanScheduler {
    jobs: Api<Job>,
    pods: Api<Pod>,
    cfg: ScannerConfig,
}

impl KubeScanScheduler {
    pub fn new(client: Client, cfg: ScannerConfig) -> Self {
        let jobs = Api::namespaced(client.clone(), &cfg.job_namespace);
        let pods = Api::namespaced(client, &cfg.job_namespace);
        Self { jobs, pods, cfg }
    }

    fn render_manifest(&self, spec: &ScanJobSpec) -> Result<Job, SchedulerError> {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": spec.job_name,
                "labels": {
                    "app.kubernetes.io/managed-by": "aegis-gateway",
                    "aegis.100monkeys.ai/scan-id": spec.scan_id.to_string(),
                },
            },
            "spec": {
                "backoffLimit": self.cfg.retries,
                "activeDeadlineSeconds": self.cfg.timeout_seconds,
                "ttlSecondsAfterFinished": self.cfg.ttl_seconds_after_finished,
                "template": {
                    "metadata": {
                        "labels": { "aegis.100monkeys.ai/scan-id": spec.scan_id.to_string() },
                    },
                    "spec": {
                        "serviceAccountName": self.cfg.job_service_account,
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "scanner",
                            "image": spec.image,
                            "command": spec.command,
                            "env": [
                                { "name": "AEGIS_SCAN_DESCRIPTOR", "value": spec.descriptor_b64 },
                            ],
                            "resources": {
                                "requests": {
                                    "cpu": self.cfg.cpu_request,
                                    "memory": self.cfg.memory_request,
                                },
                                "limits": {
                                    "cpu": self.cfg.cpu_limit,
                                    "memory": self.cfg.memory_limit,
                                },
                            },
                            "securityContext": {
                                "runAsNonRoot": true,
                                "readOnlyRootFilesystem": true,
                                "allowPrivilegeEscalation": false,
                            },
                        }],
                    },
                },
            },
        }))
        .map_err(|e| SchedulerError::Submit(format!("job manifest: {}", e)))
    }
}

#[async_trait]
impl ScanScheduler for KubeScanScheduler {
    async fn submit(&self, spec: &ScanJobSpec) -> Result<(), SchedulerError> {
        let job = self.render_manifest(spec)?;
        self.jobs
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| SchedulerError::Submit(e.to_string()))?;
        info!(job = %spec.job_name, "submitted scan workload");
        Ok(())
    }

    async fn status(&self, job_name: &str) -> Result<WorkloadState, SchedulerError> {
        let job = self
            .jobs
            .get_opt(job_name)
            .await
            .map_err(|e| SchedulerError::Api(e.to_string()))?;

        let Some(job) = job else {
            return Ok(WorkloadState::NotFound);
        };

        let status = job.status.unwrap_or_default();
        if status.succeeded.unwrap_or(0) > 0 {
            return Ok(WorkloadState::Succeeded);
        }
        let failed_condition = status
            .conditions
            .unwrap_or_default()
            .iter()
            .any(|c| c.type_ == "Failed" && c.status == "True");
        if failed_condition {
            return Ok(WorkloadState::Failed);
        }
        Ok(WorkloadState::Active)
    }

    async fn fetch_output(&self, job_name: &str) -> Result<String, SchedulerError> {
        let params = ListParams::default().labels(&format!("job-name={}", job_name));
        let pods = self
            .pods
            .list(&params)
            .await
            .map_err(|e| SchedulerError::Api(e.to_string()))?;

        // Prefer a pod that already ran to completion; jobs with retries
        // may leave failed pods alongside the successful one.
        let pod = pods
            .items
            .iter()
            .find(|p| {
                p.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .map(|phase| phase == "Succeeded")
                    .unwrap_or(false)
            })
            .or_else(|| pods.items.first())
            .ok_or_else(|| SchedulerError::Output(format!("no pods for job {}", job_name)))?;

        let pod_name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| SchedulerError::Output("pod without a name".to_string()))?;

        self.pods
            .logs(pod_name, &LogParams::default())
            .await
            .map_err(|e| SchedulerError::Output(e.to_string()))
    }

    async fn delete(&self, job_name: &str) -> Result<(), SchedulerError> {
        match self.jobs.delete(job_name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!(job = %job_name, "workload already gone");
                Ok(())
            }
            Err(e) => Err(SchedulerError::Api(e.to_string())),
        }
    }
}
