// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Registry Service
//!
//! Application service over the server lifecycle: registration,
//! updates, scan submission, approval decisions. Every operation takes
//! the authenticated principal and enforces the access predicate before
//! touching storage. Status changes go through the state machine in
//! `domain::server` and are persisted via single-transaction repository
//! operations, so no operation can leave a server row inconsistent with
//! its latest scan row.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::scan_orchestrator::ScanOrchestrator;
use crate::domain::approval::{Approval, ApprovalAction};
use crate::domain::principal::{can_access, Principal};
use crate::domain::report::parse_scan_output;
use crate::domain::repository::{
    ApprovalRepository, RepositoryError, ScanRepository, ServerRepository,
};
use crate::domain::scan::{Scan, ScanId, ScanStatus};
use crate::domain::server::{
    validate_canonical_id, Server, ServerId, ServerStatus, SourceType,
};
use crate::infrastructure::metrics;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("no authenticated principal")]
    Unauthenticated,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RepositoryError> for RegistryError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Conflict { field } => {
                RegistryError::Conflict(format!("duplicate {}", field))
            }
            other => RegistryError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterServerRequest {
    pub canonical_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner_team: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub source_url: Option<String>,
    pub version: String,
    #[serde(default)]
    pub declared_tools: Vec<String>,
    #[serde(default)]
    pub mcp_config: Option<serde_json::Value>,
    #[serde(default)]
    pub test_endpoint: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServerRequest {
    pub canonical_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub owner_team: Option<String>,
    pub source_url: Option<String>,
    pub version: Option<String>,
    pub declared_tools: Option<Vec<String>>,
    pub mcp_config: Option<serde_json::Value>,
    pub test_endpoint: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Required to approve a server whose latest scan failed.
    #[serde(default)]
    pub override_reason: Option<String>,
}

pub struct RegistryService {
    servers: Arc<dyn ServerRepository>,
    scans: Arc<dyn ScanRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    orchestrator: Arc<ScanOrchestrator>,
    scan_pass_threshold: f64,
}

impl RegistryService {
    pub fn new(
        servers: Arc<dyn ServerRepository>,
        scans: Arc<dyn ScanRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        orchestrator: Arc<ScanOrchestrator>,
        scan_pass_threshold: f64,
    ) -> Self {
        Self {
            servers,
            scans,
            approvals,
            orchestrator,
            scan_pass_threshold,
        }
    }

    fn require_principal(principal: &Principal) -> Result<(), RegistryError> {
        if principal.id.is_empty() || principal.id == "anonymous" {
            return Err(RegistryError::Unauthenticated);
        }
        Ok(())
    }

    fn require_admin(principal: &Principal) -> Result<(), RegistryError> {
        Self::require_principal(principal)?;
        if !principal.is_admin() {
            return Err(RegistryError::Forbidden);
        }
        Ok(())
    }

    /// Loads the server and checks owner-level access in one step.
    async fn load_accessible(
        &self,
        principal: &Principal,
        id: ServerId,
    ) -> Result<Server, RegistryError> {
        let server = self
            .servers
            .find_by_id(id)
            .await?
            .ok_or(RegistryError::NotFound)?;
        if !can_access(principal, &server) {
            return Err(RegistryError::Forbidden);
        }
        Ok(server)
    }

    pub async fn register(
        &self,
        principal: &Principal,
        req: RegisterServerRequest,
    ) -> Result<Server, RegistryError> {
        Self::require_principal(principal)?;
        validate_canonical_id(&req.canonical_id).map_err(RegistryError::InvalidArgument)?;
        if req.name.trim().is_empty() {
            return Err(RegistryError::InvalidArgument("name is required".to_string()));
        }
        if req.owner_team.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "ownerTeam is required".to_string(),
            ));
        }
        if req.version.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "version is required".to_string(),
            ));
        }

        let now = Utc::now();
        let server = Server {
            id: ServerId::new(),
            canonical_id: req.canonical_id,
            name: req.name,
            description: req.description,
            owner_team: req.owner_team,
            source_type: req.source_type,
            source_url: req.source_url,
            version: req.version,
            status: ServerStatus::Draft,
            declared_tools: req.declared_tools,
            mcp_config: req.mcp_config,
            test_endpoint: req.test_endpoint,
            tags: req.tags,
            created_by: principal.id.clone(),
            created_at: now,
            updated_at: now,
            latest_scan_id: None,
            latest_risk_score: None,
        };

        self.servers.create(&server).await?;
        metrics::record_registration(server.source_type, server.status);
        info!(
            server = %server.canonical_id,
            owner_team = %server.owner_team,
            by = %principal.id,
            "registered mcp server"
        );
        Ok(server)
    }

    pub async fn get(
        &self,
        principal: &Principal,
        id: ServerId,
    ) -> Result<Option<Server>, RegistryError> {
        match self.servers.find_by_id(id).await? {
            None => Ok(None),
            Some(server) if can_access(principal, &server) => Ok(Some(server)),
            Some(_) => Err(RegistryError::Forbidden),
        }
    }

    pub async fn get_by_canonical_id(
        &self,
        principal: &Principal,
        canonical_id: &str,
    ) -> Result<Option<Server>, RegistryError> {
        match self.servers.find_by_canonical_id(canonical_id).await? {
            None => Ok(None),
            Some(server) if can_access(principal, &server) => Ok(Some(server)),
            Some(_) => Err(RegistryError::Forbidden),
        }
    }

    /// Only servers the principal can access; clients filter further.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<Server>, RegistryError> {
        let all = self.servers.list_all().await?;
        Ok(all
            .into_iter()
            .filter(|s| can_access(principal, s))
            .collect())
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: ServerId,
        req: UpdateServerRequest,
    ) -> Result<Server, RegistryError> {
        Self::require_principal(principal)?;
        let current = self.load_accessible(principal, id).await?;

        if let Some(requested) = &req.canonical_id {
            if !requested.eq_ignore_ascii_case(&current.canonical_id) {
                return Err(RegistryError::InvalidArgument(
                    "canonicalId is immutable".to_string(),
                ));
            }
        }

        let mut updated = current.clone();
        if let Some(name) = req.name {
            updated.name = name;
        }
        if let Some(description) = req.description {
            updated.description = Some(description);
        }
        if let Some(owner_team) = req.owner_team {
            updated.owner_team = owner_team;
        }
        if let Some(source_url) = req.source_url {
            updated.source_url = Some(source_url);
        }
        if let Some(version) = req.version {
            updated.version = version;
        }
        if let Some(declared_tools) = req.declared_tools {
            updated.declared_tools = declared_tools;
        }
        if let Some(mcp_config) = req.mcp_config {
            updated.mcp_config = Some(mcp_config);
        }
        if let Some(test_endpoint) = req.test_endpoint {
            updated.test_endpoint = Some(test_endpoint);
        }
        if let Some(tags) = req.tags {
            updated.tags = tags;
        }

        // A material change to an approved server voids its approval.
        if current.status == ServerStatus::Approved && current.material_change(&updated) {
            updated.status = ServerStatus::Draft;
            info!(server = %updated.canonical_id, "material update, approval voided");
        }
        updated.updated_at = Utc::now();

        self.servers.update(&updated).await?;
        Ok(updated)
    }

    pub async fn delete(&self, principal: &Principal, id: ServerId) -> Result<(), RegistryError> {
        Self::require_principal(principal)?;
        let server = self.load_accessible(principal, id).await?;
        self.servers.delete(id).await?;
        info!(server = %server.canonical_id, by = %principal.id, "deleted mcp server");
        Ok(())
    }

    pub async fn submit_for_scan(
        &self,
        principal: &Principal,
        id: ServerId,
    ) -> Result<Scan, RegistryError> {
        Self::require_principal(principal)?;
        let server = self.load_accessible(principal, id).await?;

        if server.source_type == SourceType::LocalDeclared {
            return Err(RegistryError::InvalidState(
                "LocalDeclared servers are scanned via upload".to_string(),
            ));
        }

        // The conditional transition is the serialization point: of two
        // concurrent submissions exactly one sees the precondition hold.
        let from = [
            ServerStatus::Draft,
            ServerStatus::ScannedPass,
            ServerStatus::ScannedFail,
            ServerStatus::Denied,
        ];
        let transitioned = self
            .servers
            .transition_status(id, &from, ServerStatus::PendingScan)
            .await?;
        let server = transitioned.ok_or_else(|| {
            RegistryError::InvalidState(format!(
                "cannot submit a scan while server is {}",
                server.status.as_str()
            ))
        })?;

        self.orchestrator.launch(&server, &principal.id).await
    }

    pub async fn approve(
        &self,
        principal: &Principal,
        id: ServerId,
        req: DecisionRequest,
    ) -> Result<Approval, RegistryError> {
        Self::require_admin(principal)?;
        let server = self
            .servers
            .find_by_id(id)
            .await?
            .ok_or(RegistryError::NotFound)?;
        if req.reason.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "a non-empty reason is required".to_string(),
            ));
        }

        let mut notes = req.notes.clone();
        match server.status {
            ServerStatus::ScannedPass | ServerStatus::PendingApproval => {}
            ServerStatus::ScannedFail => {
                let override_reason = req
                    .override_reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| {
                        RegistryError::InvalidState(
                            "approving a failed scan requires an overrideReason".to_string(),
                        )
                    })?;
                let tag = format!("override: {}", override_reason);
                notes = Some(match notes {
                    Some(existing) => format!("{}\n{}", existing, tag),
                    None => tag,
                });
                warn!(server = %server.canonical_id, by = %principal.id, "approving over failed scan");
            }
            other => {
                return Err(RegistryError::InvalidState(format!(
                    "cannot approve a server in status {}",
                    other.as_str()
                )))
            }
        }

        let mut approval = Approval::new(
            server.id,
            server.canonical_id.clone(),
            principal.id.clone(),
            ApprovalAction::Approved,
            req.reason,
            server.latest_scan_id,
        );
        approval.notes = notes;
        approval.expires_at = req.expires_at;

        self.approvals
            .record_decision(&approval, ServerStatus::Approved)
            .await?;
        info!(server = %server.canonical_id, by = %principal.id, "approved mcp server");
        Ok(approval)
    }

    pub async fn deny(
        &self,
        principal: &Principal,
        id: ServerId,
        req: DecisionRequest,
    ) -> Result<Approval, RegistryError> {
        Self::require_admin(principal)?;
        let server = self
            .servers
            .find_by_id(id)
            .await?
            .ok_or(RegistryError::NotFound)?;
        if req.reason.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "a non-empty reason is required".to_string(),
            ));
        }
        if server.status.is_terminal() {
            return Err(RegistryError::InvalidState(format!(
                "cannot deny a server in status {}",
                server.status.as_str()
            )));
        }

        let mut approval = Approval::new(
            server.id,
            server.canonical_id.clone(),
            principal.id.clone(),
            ApprovalAction::Denied,
            req.reason,
            server.latest_scan_id,
        );
        approval.notes = req.notes;

        self.approvals
            .record_decision(&approval, ServerStatus::Denied)
            .await?;
        info!(server = %server.canonical_id, by = %principal.id, "denied mcp server");
        Ok(approval)
    }

    pub async fn suspend(
        &self,
        principal: &Principal,
        id: ServerId,
        req: DecisionRequest,
    ) -> Result<Approval, RegistryError> {
        self.admin_transition(
            principal,
            id,
            req,
            ApprovalAction::Suspended,
            ServerStatus::Approved,
            ServerStatus::Suspended,
        )
        .await
    }

    pub async fn reinstate(
        &self,
        principal: &Principal,
        id: ServerId,
        req: DecisionRequest,
    ) -> Result<Approval, RegistryError> {
        self.admin_transition(
            principal,
            id,
            req,
            ApprovalAction::Reinstated,
            ServerStatus::Suspended,
            ServerStatus::Approved,
        )
        .await
    }

    async fn admin_transition(
        &self,
        principal: &Principal,
        id: ServerId,
        req: DecisionRequest,
        action: ApprovalAction,
        expect: ServerStatus,
        next: ServerStatus,
    ) -> Result<Approval, RegistryError> {
        Self::require_admin(principal)?;
        let server = self
            .servers
            .find_by_id(id)
            .await?
            .ok_or(RegistryError::NotFound)?;
        if req.reason.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "a non-empty reason is required".to_string(),
            ));
        }
        if server.status != expect {
            return Err(RegistryError::InvalidState(format!(
                "{} requires status {}, server is {}",
                action.as_str(),
                expect.as_str(),
                server.status.as_str()
            )));
        }

        let mut approval = Approval::new(
            server.id,
            server.canonical_id.clone(),
            principal.id.clone(),
            action,
            req.reason,
            server.latest_scan_id,
        );
        approval.notes = req.notes;

        self.approvals.record_decision(&approval, next).await?;
        info!(server = %server.canonical_id, action = action.as_str(), by = %principal.id, "recorded decision");
        Ok(approval)
    }

    /// Parse and store a locally-produced scan for a LocalDeclared server.
    pub async fn upload_local_scan(
        &self,
        principal: &Principal,
        id: ServerId,
        payload: &str,
    ) -> Result<Scan, RegistryError> {
        Self::require_principal(principal)?;
        let server = self.load_accessible(principal, id).await?;
        if server.source_type != SourceType::LocalDeclared {
            return Err(RegistryError::InvalidArgument(
                "only LocalDeclared servers accept scan uploads".to_string(),
            ));
        }

        let report = parse_scan_output(payload)
            .map_err(|e| RegistryError::InvalidArgument(e.to_string()))?;
        let raw: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| RegistryError::InvalidArgument(e.to_string()))?;

        let scanner_version = raw
            .get("scanner_version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("uploaded")
            .to_string();

        let now = Utc::now();
        let scan = Scan {
            id: ScanId::new(),
            server_id: server.id,
            scanner_version,
            status: ScanStatus::Completed,
            risk_score: Some(report.risk_score),
            summary: report.summary.clone(),
            report_json: Some(raw),
            issues: report.issues,
            discovered_tools: report.tools,
            job_name: None,
            error_message: None,
            started_at: now,
            finished_at: Some(now),
            triggered_by: principal.id.clone(),
        };

        let new_status = if report.risk_score <= self.scan_pass_threshold {
            ServerStatus::ScannedPass
        } else {
            ServerStatus::ScannedFail
        };

        self.scans.record_upload(&scan, new_status).await?;
        metrics::record_scan_run(ScanStatus::Completed);
        metrics::record_risk_score(report.risk_score);
        info!(
            server = %server.canonical_id,
            risk = report.risk_score,
            status = new_status.as_str(),
            "ingested uploaded scan"
        );
        Ok(scan)
    }

    pub async fn list_scans(
        &self,
        principal: &Principal,
        id: ServerId,
    ) -> Result<Vec<Scan>, RegistryError> {
        self.load_accessible(principal, id).await?;
        Ok(self.scans.list_by_server(id).await?)
    }

    pub async fn get_scan(
        &self,
        principal: &Principal,
        id: ServerId,
        scan_id: ScanId,
    ) -> Result<Option<Scan>, RegistryError> {
        self.load_accessible(principal, id).await?;
        match self.scans.find_by_id(scan_id).await? {
            Some(scan) if scan.server_id == id => Ok(Some(scan)),
            _ => Ok(None),
        }
    }

    pub async fn latest_scan(
        &self,
        principal: &Principal,
        id: ServerId,
    ) -> Result<Option<Scan>, RegistryError> {
        self.load_accessible(principal, id).await?;
        Ok(self.scans.latest_for_server(id).await?)
    }

    pub async fn cancel_scan(
        &self,
        principal: &Principal,
        id: ServerId,
        scan_id: ScanId,
    ) -> Result<Scan, RegistryError> {
        Self::require_principal(principal)?;
        self.load_accessible(principal, id).await?;
        let scan = self
            .scans
            .find_by_id(scan_id)
            .await?
            .filter(|s| s.server_id == id)
            .ok_or(RegistryError::NotFound)?;
        self.orchestrator.cancel(&scan).await
    }

    pub async fn list_approvals(
        &self,
        principal: &Principal,
        id: ServerId,
    ) -> Result<Vec<Approval>, RegistryError> {
        self.load_accessible(principal, id).await?;
        Ok(self.approvals.list_by_server(id).await?)
    }

    /// Fast path for the policy engine and health probes.
    pub async fn is_approved(&self, canonical_id: &str) -> Result<bool, RegistryError> {
        Ok(self
            .servers
            .find_by_canonical_id(canonical_id)
            .await?
            .map(|s| s.status == ServerStatus::Approved)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::infrastructure::repositories::{
        InMemoryApprovalRepository, InMemoryScanRepository, InMemoryServerRepository,
    };
    use crate::infrastructure::scheduler::{ScanJobSpec, ScanScheduler, SchedulerError};
    use async_trait::async_trait;

    struct NoopScheduler;

    #[async_trait]
    impl ScanScheduler for NoopScheduler {
        async fn submit(&self, _spec: &ScanJobSpec) -> Result<(), SchedulerError> {
            Ok(())
        }
        async fn status(
            &self,
            _job_name: &str,
        ) -> Result<crate::infrastructure::scheduler::WorkloadState, SchedulerError> {
            Ok(crate::infrastructure::scheduler::WorkloadState::Active)
        }
        async fn fetch_output(&self, _job_name: &str) -> Result<String, SchedulerError> {
            Ok("{}".to_string())
        }
        async fn delete(&self, _job_name: &str) -> Result<(), SchedulerError> {
            Ok(())
        }
    }

    fn service() -> (RegistryService, Arc<InMemoryServerRepository>) {
        let servers = Arc::new(InMemoryServerRepository::new());
        let scans = Arc::new(InMemoryScanRepository::sharing(&servers));
        let approvals = Arc::new(InMemoryApprovalRepository::sharing(&servers));
        let orchestrator = Arc::new(ScanOrchestrator::new(
            servers.clone(),
            scans.clone(),
            Arc::new(NoopScheduler),
            ScannerConfig::default(),
            0.5,
        ));
        (
            RegistryService::new(servers.clone(), scans, approvals, orchestrator, 0.5),
            servers,
        )
    }

    fn admin() -> Principal {
        Principal {
            id: "root".to_string(),
            email: None,
            teams: vec![],
            roles: vec!["admin".to_string()],
        }
    }

    fn member(id: &str, team: &str) -> Principal {
        Principal {
            id: id.to_string(),
            email: None,
            teams: vec![team.to_string()],
            roles: vec![],
        }
    }

    fn register_request(canonical: &str) -> RegisterServerRequest {
        RegisterServerRequest {
            canonical_id: canonical.to_string(),
            name: "weather".to_string(),
            description: None,
            owner_team: "team-a".to_string(),
            source_type: SourceType::ContainerImage,
            source_url: Some("registry.local/weather:1".to_string()),
            version: "1".to_string(),
            declared_tools: vec![],
            mcp_config: None,
            test_endpoint: None,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_register_validates_canonical_id() {
        let (service, _) = service();
        let mut req = register_request("team-a/weather");
        req.canonical_id = "-bad-".to_string();
        let err = service.register(&member("alice", "team-a"), req).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_case_insensitively() {
        let (service, _) = service();
        let alice = member("alice", "team-a");
        service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();
        let err = service
            .register(&alice, register_request("Team-A/Weather"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_register_requires_principal() {
        let (service, _) = service();
        let err = service
            .register(&Principal::anonymous(), register_request("team-a/weather"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_get_enforces_access() {
        let (service, _) = service();
        let alice = member("alice", "team-a");
        let server = service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();

        assert!(service.get(&alice, server.id).await.unwrap().is_some());
        assert!(service.get(&admin(), server.id).await.unwrap().is_some());
        assert!(service
            .get(&member("carol", "team-a"), server.id)
            .await
            .unwrap()
            .is_some());

        let err = service
            .get(&member("mallory", "team-z"), server.id)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Forbidden));
    }

    #[tokio::test]
    async fn test_list_is_access_closed() {
        let (service, _) = service();
        service
            .register(&member("alice", "team-a"), register_request("team-a/weather"))
            .await
            .unwrap();
        let mut other = register_request("team-b/db");
        other.owner_team = "team-b".to_string();
        service.register(&member("bob", "team-b"), other).await.unwrap();

        let visible = service.list(&member("alice", "team-a")).await.unwrap();
        assert_eq!(visible.len(), 1);
        // Every listed server must also be fetchable by the same caller.
        for server in visible {
            assert!(service
                .get(&member("alice", "team-a"), server.id)
                .await
                .unwrap()
                .is_some());
        }
        assert_eq!(service.list(&admin()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_rejects_canonical_id_change() {
        let (service, _) = service();
        let alice = member("alice", "team-a");
        let server = service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();
        let err = service
            .update(
                &alice,
                server.id,
                UpdateServerRequest {
                    canonical_id: Some("team-a/renamed".to_string()),
                    ..UpdateServerRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_material_update_voids_approval() {
        let (service, servers) = service();
        let alice = member("alice", "team-a");
        let server = service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();

        // Walk the row to Approved directly; the transition itself is
        // covered by the state-machine tests.
        let mut approved = servers.find_by_id(server.id).await.unwrap().unwrap();
        approved.status = ServerStatus::Approved;
        servers.update(&approved).await.unwrap();

        let updated = service
            .update(
                &alice,
                server.id,
                UpdateServerRequest {
                    description: Some("new description".to_string()),
                    ..UpdateServerRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ServerStatus::Approved);

        let updated = service
            .update(
                &alice,
                server.id,
                UpdateServerRequest {
                    version: Some("2".to_string()),
                    ..UpdateServerRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ServerStatus::Draft);
    }

    #[tokio::test]
    async fn test_submit_scan_happy_path_and_invalid_state() {
        let (service, servers) = service();
        let alice = member("alice", "team-a");
        let server = service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();

        let scan = service.submit_for_scan(&alice, server.id).await.unwrap();
        assert_eq!(scan.status, ScanStatus::Running);
        let row = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(row.status, ServerStatus::Scanning);

        // The second submission loses the conditional transition.
        let err = service.submit_for_scan(&alice, server.id).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_approve_requires_reason_and_passing_scan() {
        let (service, servers) = service();
        let alice = member("alice", "team-a");
        let server = service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();

        let err = service
            .approve(&alice, server.id, DecisionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Forbidden));

        let err = service
            .approve(&admin(), server.id, DecisionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));

        // Draft cannot be approved even with a reason.
        let err = service
            .approve(
                &admin(),
                server.id,
                DecisionRequest {
                    reason: "ok".to_string(),
                    ..DecisionRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidState(_)));

        let mut row = servers.find_by_id(server.id).await.unwrap().unwrap();
        row.status = ServerStatus::ScannedPass;
        servers.update(&row).await.unwrap();

        let approval = service
            .approve(
                &admin(),
                server.id,
                DecisionRequest {
                    reason: "ok".to_string(),
                    ..DecisionRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(approval.action, ApprovalAction::Approved);
        let row = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(row.status, ServerStatus::Approved);
        assert!(service.is_approved("team-a/weather").await.unwrap());
    }

    #[tokio::test]
    async fn test_approve_failed_scan_needs_override() {
        let (service, servers) = service();
        let alice = member("alice", "team-a");
        let server = service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();
        let mut row = servers.find_by_id(server.id).await.unwrap().unwrap();
        row.status = ServerStatus::ScannedFail;
        servers.update(&row).await.unwrap();

        let err = service
            .approve(
                &admin(),
                server.id,
                DecisionRequest {
                    reason: "needed in prod".to_string(),
                    ..DecisionRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidState(_)));

        let approval = service
            .approve(
                &admin(),
                server.id,
                DecisionRequest {
                    reason: "needed in prod".to_string(),
                    override_reason: Some("vendor fix scheduled".to_string()),
                    ..DecisionRequest::default()
                },
            )
            .await
            .unwrap();
        assert!(approval.notes.unwrap().contains("override: vendor fix scheduled"));
        let row = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(row.status, ServerStatus::Approved);
    }

    #[tokio::test]
    async fn test_deny_suspend_reinstate_cycle() {
        let (service, servers) = service();
        let alice = member("alice", "team-a");
        let server = service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();
        let mut row = servers.find_by_id(server.id).await.unwrap().unwrap();
        row.status = ServerStatus::ScannedPass;
        servers.update(&row).await.unwrap();

        service
            .approve(
                &admin(),
                server.id,
                DecisionRequest {
                    reason: "ok".to_string(),
                    ..DecisionRequest::default()
                },
            )
            .await
            .unwrap();

        let approval = service
            .suspend(
                &admin(),
                server.id,
                DecisionRequest {
                    reason: "incident".to_string(),
                    ..DecisionRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(approval.action, ApprovalAction::Suspended);
        assert!(!service.is_approved("team-a/weather").await.unwrap());

        service
            .reinstate(
                &admin(),
                server.id,
                DecisionRequest {
                    reason: "resolved".to_string(),
                    ..DecisionRequest::default()
                },
            )
            .await
            .unwrap();
        assert!(service.is_approved("team-a/weather").await.unwrap());

        service
            .deny(
                &admin(),
                server.id,
                DecisionRequest {
                    reason: "decommissioned".to_string(),
                    ..DecisionRequest::default()
                },
            )
            .await
            .unwrap();
        let err = service
            .deny(
                &admin(),
                server.id,
                DecisionRequest {
                    reason: "again".to_string(),
                    ..DecisionRequest::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidState(_)));

        // History keeps every decision, newest first.
        let history = service.list_approvals(&admin(), server.id).await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].action, ApprovalAction::Denied);
    }

    #[tokio::test]
    async fn test_upload_local_scan_thresholds() {
        let (service, servers) = service();
        let alice = member("alice", "team-a");
        let mut req = register_request("team-a/local");
        req.source_type = SourceType::LocalDeclared;
        let server = service.register(&alice, req).await.unwrap();

        // Non-local servers cannot upload.
        let other = service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();
        let err = service
            .upload_local_scan(&alice, other.id, r#"{"risk_score": 0.1}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));

        let err = service
            .upload_local_scan(&alice, server.id, "not json")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));

        let scan = service
            .upload_local_scan(
                &alice,
                server.id,
                r#"{"risk_score": 0.2, "scanner_version": "local-2.4"}"#,
            )
            .await
            .unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!(scan.scanner_version, "local-2.4");
        assert!(scan.timestamps_consistent());

        let row = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(row.status, ServerStatus::ScannedPass);
        assert_eq!(row.latest_scan_id, Some(scan.id));
        assert_eq!(row.latest_risk_score, Some(0.2));

        // A risky upload fails the server (0-100 scale normalized first).
        let scan = service
            .upload_local_scan(&alice, server.id, r#"{"risk_score": 80.0}"#)
            .await
            .unwrap();
        assert_eq!(scan.risk_score, Some(0.8));
        let row = servers.find_by_id(server.id).await.unwrap().unwrap();
        assert_eq!(row.status, ServerStatus::ScannedFail);
    }

    #[tokio::test]
    async fn test_delete_cascades_visibility() {
        let (service, _) = service();
        let alice = member("alice", "team-a");
        let server = service
            .register(&alice, register_request("team-a/weather"))
            .await
            .unwrap();
        service.delete(&alice, server.id).await.unwrap();
        assert!(service.get(&alice, server.id).await.unwrap().is_none());
        let err = service.delete(&alice, server.id).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound));
    }
}
