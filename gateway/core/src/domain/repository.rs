// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Repository Pattern - Storage Backend Abstraction
//
// One trait per aggregate root. Implementations:
// - In-memory storage for tests and embedded/dev mode
// - PostgreSQL for production persistence
//
// Compound operations (scan completion, approval decisions) are part of
// the contract because they must update two relations atomically.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::approval::Approval;
use crate::domain::audit::{AuditEvent, AuditFilter, AuditPage, AuditStats};
use crate::domain::scan::{Scan, ScanId, ScanStatus};
use crate::domain::server::{Server, ServerId, ServerStatus};

/// Storage backend selection for service wiring.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Connection-level failure; safe to retry.
    #[error("database error: {0}")]
    Database(String),
    /// Uniqueness violation; carries the conflicting field. Not retriable.
    #[error("conflict on {field}")]
    Conflict { field: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    /// A persisted value no release of this code ever wrote.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Repository interface for Server aggregates.
#[async_trait]
pub trait ServerRepository: Send + Sync {
    /// Ensure the relation and indices exist. Idempotent.
    async fn bootstrap(&self) -> Result<(), RepositoryError>;

    /// Insert a new server. `Conflict` when the canonicalId is taken
    /// (case-insensitively).
    async fn create(&self, server: &Server) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ServerId) -> Result<Option<Server>, RepositoryError>;

    /// Case-insensitive lookup.
    async fn find_by_canonical_id(&self, canonical_id: &str)
        -> Result<Option<Server>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Server>, RepositoryError>;

    async fn list_by_status(&self, status: ServerStatus) -> Result<Vec<Server>, RepositoryError>;

    async fn list_by_team(&self, team: &str) -> Result<Vec<Server>, RepositoryError>;

    /// Full-row update keyed by id. canonicalId is never changed by this.
    async fn update(&self, server: &Server) -> Result<(), RepositoryError>;

    /// Single-transaction conditional status transition: succeeds only if
    /// the current status is one of `from`. Returns the updated row, or
    /// `None` when the precondition failed or the row is missing. This is
    /// the serialization point for concurrent mutators of one server.
    async fn transition_status(
        &self,
        id: ServerId,
        from: &[ServerStatus],
        to: ServerStatus,
    ) -> Result<Option<Server>, RepositoryError>;

    /// Returns false when the row did not exist. Cascades to scans and
    /// approvals.
    async fn delete(&self, id: ServerId) -> Result<bool, RepositoryError>;

    async fn count_by_status(&self, status: ServerStatus) -> Result<i64, RepositoryError>;
}

/// Repository interface for Scan aggregates.
#[async_trait]
pub trait ScanRepository: Send + Sync {
    async fn bootstrap(&self) -> Result<(), RepositoryError>;

    async fn create(&self, scan: &Scan) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ScanId) -> Result<Option<Scan>, RepositoryError>;

    /// Newest first.
    async fn list_by_server(&self, server_id: ServerId) -> Result<Vec<Scan>, RepositoryError>;

    async fn latest_for_server(&self, server_id: ServerId)
        -> Result<Option<Scan>, RepositoryError>;

    async fn list_by_status(&self, status: ScanStatus) -> Result<Vec<Scan>, RepositoryError>;

    async fn update(&self, scan: &Scan) -> Result<(), RepositoryError>;

    /// Write the terminal scan row and the server's status, latestScanId,
    /// latestRiskScore and updatedAt in one transaction. The scan-side
    /// update is gated on the row still being non-terminal, so a second
    /// reconciler replica observes `false` and walks away.
    async fn record_completion(
        &self,
        scan: &Scan,
        server_status: ServerStatus,
    ) -> Result<bool, RepositoryError>;

    /// Upload path: insert a freshly-parsed Completed scan and update the
    /// server atomically.
    async fn record_upload(
        &self,
        scan: &Scan,
        server_status: ServerStatus,
    ) -> Result<(), RepositoryError>;

    async fn count_by_status(&self, status: ScanStatus) -> Result<i64, RepositoryError>;
}

/// Repository interface for Approval records. Append-only.
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn bootstrap(&self) -> Result<(), RepositoryError>;

    /// Write the approval row and the server's new status in one
    /// transaction.
    async fn record_decision(
        &self,
        approval: &Approval,
        server_status: ServerStatus,
    ) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn list_by_server(&self, server_id: ServerId)
        -> Result<Vec<Approval>, RepositoryError>;
}

/// Repository interface for AuditEvents. Append-only, queryable.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn bootstrap(&self) -> Result<(), RepositoryError>;

    async fn insert_batch(&self, events: &[AuditEvent]) -> Result<(), RepositoryError>;

    /// Timestamp-descending page plus the total count for the filter.
    async fn query(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<AuditPage, RepositoryError>;

    async fn stats(&self, filter: &AuditFilter, top_n: i64)
        -> Result<AuditStats, RepositoryError>;
}
