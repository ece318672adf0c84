// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # PostgreSQL Approval Repository
//!
//! Append-only `mcp_approvals` table; each decision is written in one
//! transaction with the server's status change.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::approval::{Approval, ApprovalAction};
use crate::domain::repository::{ApprovalRepository, RepositoryError};
use crate::domain::scan::ScanId;
use crate::domain::server::{ServerId, ServerStatus};

pub struct PostgresApprovalRepository {
    pool: PgPool,
}

impl PostgresApprovalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn approval_from_row(row: &PgRow) -> Result<Approval, RepositoryError> {
    let action_raw: i16 = row
        .try_get("action")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let action = ApprovalAction::from_i16(action_raw).ok_or_else(|| {
        RepositoryError::Corrupt(format!("unknown approval action {}", action_raw))
    })?;

    Ok(Approval {
        id: row.get("id"),
        server_id: ServerId(row.get("server_id")),
        server_canonical_id: row.get("server_canonical_id"),
        actor: row.get("actor"),
        action,
        reason: row.get("reason"),
        notes: row.get("notes"),
        timestamp: row.get("decided_at"),
        expires_at: row.get("expires_at"),
        scan_id: row.get::<Option<uuid::Uuid>, _>("scan_id").map(ScanId),
    })
}

#[async_trait]
impl ApprovalRepository for PostgresApprovalRepository {
    async fn bootstrap(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mcp_approvals (
                id UUID PRIMARY KEY,
                server_id UUID NOT NULL REFERENCES mcp_servers(id) ON DELETE CASCADE,
                server_canonical_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                action SMALLINT NOT NULL,
                reason TEXT NOT NULL,
                notes TEXT,
                decided_at TIMESTAMPTZ NOT NULL,
                expires_at TIMESTAMPTZ,
                scan_id UUID
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_mcp_approvals_server_id ON mcp_approvals (server_id)",
            "CREATE INDEX IF NOT EXISTS idx_mcp_approvals_decided_at \
             ON mcp_approvals (decided_at DESC)",
        ] {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn record_decision(
        &self,
        approval: &Approval,
        server_status: ServerStatus,
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO mcp_approvals (
                id, server_id, server_canonical_id, actor, action, reason,
                notes, decided_at, expires_at, scan_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(approval.id)
        .bind(approval.server_id.0)
        .bind(&approval.server_canonical_id)
        .bind(&approval.actor)
        .bind(approval.action.as_i16())
        .bind(&approval.reason)
        .bind(&approval.notes)
        .bind(approval.timestamp)
        .bind(approval.expires_at)
        .bind(approval.scan_id.map(|s| s.0))
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query("UPDATE mcp_servers SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(approval.server_id.0)
            .bind(server_status.as_i16())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_by_server(
        &self,
        server_id: ServerId,
    ) -> Result<Vec<Approval>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, server_id, server_canonical_id, actor, action, reason,
                   notes, decided_at, expires_at, scan_id
            FROM mcp_approvals
            WHERE server_id = $1
            ORDER BY decided_at DESC
            "#,
        )
        .bind(server_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(approval_from_row).collect()
    }
}
