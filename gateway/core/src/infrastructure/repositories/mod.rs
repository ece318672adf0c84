// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository abstractions
//! defined in the domain layer.
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! Production implementations backed by PostgreSQL:
//! - **PostgresServerRepository** - server records + status transitions
//! - **PostgresScanRepository** - scan history + transactional completion
//! - **PostgresApprovalRepository** - append-only decisions
//! - **PostgresAuditRepository** - event log + filtered queries
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for testing and embedded/dev mode:
//! - **InMemoryServerRepository**, **InMemoryScanRepository**,
//!   **InMemoryApprovalRepository**, **InMemoryAuditRepository**
//!
//! The in-memory variants honor the same contracts, including the
//! conditional-update gating used by the reconciler.

pub mod postgres_approval;
pub mod postgres_audit;
pub mod postgres_scan;
pub mod postgres_server;

pub use postgres_approval::PostgresApprovalRepository;
pub use postgres_audit::PostgresAuditRepository;
pub use postgres_scan::PostgresScanRepository;
pub use postgres_server::PostgresServerRepository;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::approval::Approval;
use crate::domain::audit::{AuditEvent, AuditFilter, AuditPage, AuditStats, CountByKey};
use crate::domain::repository::{
    ApprovalRepository, AuditRepository, RepositoryError, ScanRepository, ServerRepository,
};
use crate::domain::scan::{Scan, ScanId, ScanStatus};
use crate::domain::server::{Server, ServerId, ServerStatus};

#[derive(Clone, Default)]
pub struct InMemoryServerRepository {
    servers: Arc<RwLock<HashMap<ServerId, Server>>>,
}

impl InMemoryServerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerRepository for InMemoryServerRepository {
    async fn bootstrap(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn create(&self, server: &Server) -> Result<(), RepositoryError> {
        let mut servers = self.servers.write();
        let duplicate = servers
            .values()
            .any(|s| s.canonical_id.eq_ignore_ascii_case(&server.canonical_id));
        if duplicate {
            return Err(RepositoryError::Conflict {
                field: "canonicalId".to_string(),
            });
        }
        servers.insert(server.id, server.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ServerId) -> Result<Option<Server>, RepositoryError> {
        Ok(self.servers.read().get(&id).cloned())
    }

    async fn find_by_canonical_id(
        &self,
        canonical_id: &str,
    ) -> Result<Option<Server>, RepositoryError> {
        Ok(self
            .servers
            .read()
            .values()
            .find(|s| s.canonical_id.eq_ignore_ascii_case(canonical_id))
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<Server>, RepositoryError> {
        let mut all: Vec<Server> = self.servers.read().values().cloned().collect();
        all.sort_by(|a, b| a.canonical_id.cmp(&b.canonical_id));
        Ok(all)
    }

    async fn list_by_status(&self, status: ServerStatus) -> Result<Vec<Server>, RepositoryError> {
        Ok(self
            .servers
            .read()
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn list_by_team(&self, team: &str) -> Result<Vec<Server>, RepositoryError> {
        Ok(self
            .servers
            .read()
            .values()
            .filter(|s| s.owner_team == team)
            .cloned()
            .collect())
    }

    async fn update(&self, server: &Server) -> Result<(), RepositoryError> {
        self.servers.write().insert(server.id, server.clone());
        Ok(())
    }

    async fn transition_status(
        &self,
        id: ServerId,
        from: &[ServerStatus],
        to: ServerStatus,
    ) -> Result<Option<Server>, RepositoryError> {
        let mut servers = self.servers.write();
        match servers.get_mut(&id) {
            Some(server) if from.contains(&server.status) => {
                server.status = to;
                server.updated_at = chrono::Utc::now();
                Ok(Some(server.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, id: ServerId) -> Result<bool, RepositoryError> {
        Ok(self.servers.write().remove(&id).is_some())
    }

    async fn count_by_status(&self, status: ServerStatus) -> Result<i64, RepositoryError> {
        Ok(self
            .servers
            .read()
            .values()
            .filter(|s| s.status == status)
            .count() as i64)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryScanRepository {
    scans: Arc<RwLock<HashMap<ScanId, Scan>>>,
    servers: Arc<RwLock<HashMap<ServerId, Server>>>,
}

impl InMemoryScanRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares server storage with an InMemoryServerRepository so the
    /// compound operations update the same rows, like the SQL variants.
    pub fn sharing(servers: &InMemoryServerRepository) -> Self {
        Self {
            scans: Arc::new(RwLock::new(HashMap::new())),
            servers: servers.servers.clone(),
        }
    }
}

#[async_trait]
impl ScanRepository for InMemoryScanRepository {
    async fn bootstrap(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn create(&self, scan: &Scan) -> Result<(), RepositoryError> {
        self.scans.write().insert(scan.id, scan.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ScanId) -> Result<Option<Scan>, RepositoryError> {
        Ok(self.scans.read().get(&id).cloned())
    }

    async fn list_by_server(&self, server_id: ServerId) -> Result<Vec<Scan>, RepositoryError> {
        let mut scans: Vec<Scan> = self
            .scans
            .read()
            .values()
            .filter(|s| s.server_id == server_id)
            .cloned()
            .collect();
        scans.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(scans)
    }

    async fn latest_for_server(
        &self,
        server_id: ServerId,
    ) -> Result<Option<Scan>, RepositoryError> {
        Ok(self.list_by_server(server_id).await?.into_iter().next())
    }

    async fn list_by_status(&self, status: ScanStatus) -> Result<Vec<Scan>, RepositoryError> {
        let mut scans: Vec<Scan> = self
            .scans
            .read()
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        scans.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(scans)
    }

    async fn update(&self, scan: &Scan) -> Result<(), RepositoryError> {
        self.scans.write().insert(scan.id, scan.clone());
        Ok(())
    }

    async fn record_completion(
        &self,
        scan: &Scan,
        server_status: ServerStatus,
    ) -> Result<bool, RepositoryError> {
        let mut scans = self.scans.write();
        match scans.get(&scan.id) {
            Some(existing) if !existing.status.is_terminal() => {}
            _ => return Ok(false),
        }
        scans.insert(scan.id, scan.clone());
        drop(scans);

        if let Some(server) = self.servers.write().get_mut(&scan.server_id) {
            server.status = server_status;
            server.latest_scan_id = Some(scan.id);
            server.latest_risk_score = scan.risk_score;
            server.updated_at = chrono::Utc::now();
        }
        Ok(true)
    }

    async fn record_upload(
        &self,
        scan: &Scan,
        server_status: ServerStatus,
    ) -> Result<(), RepositoryError> {
        self.scans.write().insert(scan.id, scan.clone());
        if let Some(server) = self.servers.write().get_mut(&scan.server_id) {
            server.status = server_status;
            server.latest_scan_id = Some(scan.id);
            server.latest_risk_score = scan.risk_score;
            server.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn count_by_status(&self, status: ScanStatus) -> Result<i64, RepositoryError> {
        Ok(self
            .scans
            .read()
            .values()
            .filter(|s| s.status == status)
            .count() as i64)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryApprovalRepository {
    approvals: Arc<RwLock<Vec<Approval>>>,
    servers: Arc<RwLock<HashMap<ServerId, Server>>>,
}

impl InMemoryApprovalRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sharing(servers: &InMemoryServerRepository) -> Self {
        Self {
            approvals: Arc::new(RwLock::new(Vec::new())),
            servers: servers.servers.clone(),
        }
    }
}

#[async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn bootstrap(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn record_decision(
        &self,
        approval: &Approval,
        server_status: ServerStatus,
    ) -> Result<(), RepositoryError> {
        self.approvals.write().push(approval.clone());
        if let Some(server) = self.servers.write().get_mut(&approval.server_id) {
            server.status = server_status;
            server.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    async fn list_by_server(
        &self,
        server_id: ServerId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let mut approvals: Vec<Approval> = self
            .approvals
            .read()
            .iter()
            .filter(|a| a.server_id == server_id)
            .cloned()
            .collect();
        approvals.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(approvals)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditRepository {
    events: Arc<RwLock<Vec<AuditEvent>>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(filter: &AuditFilter, event: &AuditEvent) -> bool {
    if let Some(start) = filter.start_date {
        if event.timestamp < start {
            return false;
        }
    }
    if let Some(end) = filter.end_date {
        if event.timestamp > end {
            return false;
        }
    }
    if let Some(team) = &filter.team {
        if event.team.as_deref() != Some(team.as_str()) {
            return false;
        }
    }
    if let Some(canonical) = &filter.server_canonical_id {
        if &event.server_canonical_id != canonical {
            return false;
        }
    }
    if let Some(tool) = &filter.tool_name {
        if &event.tool_name != tool {
            return false;
        }
    }
    if let Some(decision) = filter.decision {
        if event.decision != decision {
            return false;
        }
    }
    if let Some(actor) = &filter.actor {
        if &event.actor != actor {
            return false;
        }
    }
    true
}

fn top_counts<'a>(
    keys: impl Iterator<Item = Option<&'a str>>,
    top_n: usize,
) -> Vec<CountByKey> {
    let mut counts: HashMap<&str, i64> = HashMap::new();
    for key in keys.flatten() {
        *counts.entry(key).or_default() += 1;
    }
    let mut entries: Vec<CountByKey> = counts
        .into_iter()
        .map(|(key, count)| CountByKey {
            key: key.to_string(),
            count,
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));
    entries.truncate(top_n);
    entries
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn bootstrap(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn insert_batch(&self, events: &[AuditEvent]) -> Result<(), RepositoryError> {
        self.events.write().extend_from_slice(events);
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<AuditPage, RepositoryError> {
        let events = self.events.read();
        let mut matching: Vec<AuditEvent> = events
            .iter()
            .filter(|e| matches(filter, e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let total = matching.len() as i64;
        let page: Vec<AuditEvent> = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok(AuditPage {
            events: page,
            total,
            limit,
            offset,
        })
    }

    async fn stats(
        &self,
        filter: &AuditFilter,
        top_n: i64,
    ) -> Result<AuditStats, RepositoryError> {
        let events = self.events.read();
        let matching: Vec<&AuditEvent> = events.iter().filter(|e| matches(filter, e)).collect();

        let total = matching.len() as i64;
        let allowed = matching.iter().filter(|e| e.decision.is_allowed()).count() as i64;
        let mean_latency_ms = if matching.is_empty() {
            0.0
        } else {
            matching.iter().map(|e| e.latency_ms).sum::<f64>() / matching.len() as f64
        };

        let mut decision_counts: HashMap<&'static str, i64> = HashMap::new();
        for event in &matching {
            *decision_counts.entry(event.decision.as_str()).or_default() += 1;
        }
        let mut by_decision: Vec<CountByKey> = decision_counts
            .into_iter()
            .map(|(key, count)| CountByKey {
                key: key.to_string(),
                count,
            })
            .collect();
        by_decision.sort_by(|a, b| b.count.cmp(&a.count).then(a.key.cmp(&b.key)));

        Ok(AuditStats {
            total,
            allowed,
            denied: total - allowed,
            by_decision,
            top_servers: top_counts(
                matching.iter().map(|e| Some(e.server_canonical_id.as_str())),
                top_n.max(0) as usize,
            ),
            top_teams: top_counts(
                matching.iter().map(|e| e.team.as_deref()),
                top_n.max(0) as usize,
            ),
            mean_latency_ms,
        })
    }
}
