// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # PostgreSQL Scan Repository
//!
//! Backed by the `mcp_scans` table (cascade-owned by `mcp_servers`).
//! Terminal transitions run in one transaction with the owning server
//! row, gated on the scan still being non-terminal, which is what makes
//! reconciler sweeps idempotent across replicas.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::repository::{RepositoryError, ScanRepository};
use crate::domain::scan::{DiscoveredTool, Scan, ScanId, ScanIssue, ScanStatus};
use crate::domain::server::{ServerId, ServerStatus};

pub struct PostgresScanRepository {
    pool: PgPool,
}

impl PostgresScanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SCAN_COLUMNS: &str = "id, server_id, scanner_version, status, risk_score, summary, \
     report_json, issues, discovered_tools, job_name, error_message, started_at, \
     finished_at, triggered_by";

fn scan_from_row(row: &PgRow) -> Result<Scan, RepositoryError> {
    let status_raw: i16 = row
        .try_get("status")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let status = ScanStatus::from_i16(status_raw)
        .ok_or_else(|| RepositoryError::Corrupt(format!("unknown scan status {}", status_raw)))?;

    let issues: serde_json::Value = row
        .try_get("issues")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let issues: Vec<ScanIssue> = serde_json::from_value(issues)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    let discovered_tools: serde_json::Value = row
        .try_get("discovered_tools")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let discovered_tools: Vec<DiscoveredTool> = serde_json::from_value(discovered_tools)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    Ok(Scan {
        id: ScanId(row.get("id")),
        server_id: ServerId(row.get("server_id")),
        scanner_version: row.get("scanner_version"),
        status,
        risk_score: row.get("risk_score"),
        summary: row.get("summary"),
        report_json: row.get("report_json"),
        issues,
        discovered_tools,
        job_name: row.get("job_name"),
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        triggered_by: row.get("triggered_by"),
    })
}

#[async_trait]
impl ScanRepository for PostgresScanRepository {
    async fn bootstrap(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mcp_scans (
                id UUID PRIMARY KEY,
                server_id UUID NOT NULL REFERENCES mcp_servers(id) ON DELETE CASCADE,
                scanner_version TEXT NOT NULL,
                status SMALLINT NOT NULL,
                risk_score DOUBLE PRECISION,
                summary TEXT,
                report_json JSONB,
                issues JSONB NOT NULL DEFAULT '[]'::jsonb,
                discovered_tools JSONB NOT NULL DEFAULT '[]'::jsonb,
                job_name TEXT,
                error_message TEXT,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ,
                triggered_by TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_mcp_scans_server_id ON mcp_scans (server_id)",
            "CREATE INDEX IF NOT EXISTS idx_mcp_scans_status ON mcp_scans (status)",
            "CREATE INDEX IF NOT EXISTS idx_mcp_scans_started_at ON mcp_scans (started_at DESC)",
        ] {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn create(&self, scan: &Scan) -> Result<(), RepositoryError> {
        let issues = serde_json::to_value(&scan.issues)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let discovered_tools = serde_json::to_value(&scan.discovered_tools)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO mcp_scans (
                id, server_id, scanner_version, status, risk_score, summary,
                report_json, issues, discovered_tools, job_name, error_message,
                started_at, finished_at, triggered_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(scan.id.0)
        .bind(scan.server_id.0)
        .bind(&scan.scanner_version)
        .bind(scan.status.as_i16())
        .bind(scan.risk_score)
        .bind(&scan.summary)
        .bind(&scan.report_json)
        .bind(issues)
        .bind(discovered_tools)
        .bind(&scan.job_name)
        .bind(&scan.error_message)
        .bind(scan.started_at)
        .bind(scan.finished_at)
        .bind(&scan.triggered_by)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn find_by_id(&self, id: ScanId) -> Result<Option<Scan>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM mcp_scans WHERE id = $1",
            SCAN_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(scan_from_row).transpose()
    }

    async fn list_by_server(&self, server_id: ServerId) -> Result<Vec<Scan>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mcp_scans WHERE server_id = $1 ORDER BY started_at DESC",
            SCAN_COLUMNS
        ))
        .bind(server_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(scan_from_row).collect()
    }

    async fn latest_for_server(
        &self,
        server_id: ServerId,
    ) -> Result<Option<Scan>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM mcp_scans WHERE server_id = $1 ORDER BY started_at DESC LIMIT 1",
            SCAN_COLUMNS
        ))
        .bind(server_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(scan_from_row).transpose()
    }

    async fn list_by_status(&self, status: ScanStatus) -> Result<Vec<Scan>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mcp_scans WHERE status = $1 ORDER BY started_at ASC",
            SCAN_COLUMNS
        ))
        .bind(status.as_i16())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(scan_from_row).collect()
    }

    async fn update(&self, scan: &Scan) -> Result<(), RepositoryError> {
        let issues = serde_json::to_value(&scan.issues)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let discovered_tools = serde_json::to_value(&scan.discovered_tools)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE mcp_scans SET
                scanner_version = $2,
                status = $3,
                risk_score = $4,
                summary = $5,
                report_json = $6,
                issues = $7,
                discovered_tools = $8,
                job_name = $9,
                error_message = $10,
                finished_at = $11
            WHERE id = $1
            "#,
        )
        .bind(scan.id.0)
        .bind(&scan.scanner_version)
        .bind(scan.status.as_i16())
        .bind(scan.risk_score)
        .bind(&scan.summary)
        .bind(&scan.report_json)
        .bind(issues)
        .bind(discovered_tools)
        .bind(&scan.job_name)
        .bind(&scan.error_message)
        .bind(scan.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn record_completion(
        &self,
        scan: &Scan,
        server_status: ServerStatus,
    ) -> Result<bool, RepositoryError> {
        let issues = serde_json::to_value(&scan.issues)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let discovered_tools = serde_json::to_value(&scan.discovered_tools)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE mcp_scans SET
                status = $2,
                risk_score = $3,
                summary = $4,
                report_json = $5,
                issues = $6,
                discovered_tools = $7,
                error_message = $8,
                finished_at = $9
            WHERE id = $1 AND status IN ($10, $11)
            "#,
        )
        .bind(scan.id.0)
        .bind(scan.status.as_i16())
        .bind(scan.risk_score)
        .bind(&scan.summary)
        .bind(&scan.report_json)
        .bind(issues)
        .bind(discovered_tools)
        .bind(&scan.error_message)
        .bind(scan.finished_at)
        .bind(ScanStatus::Pending.as_i16())
        .bind(ScanStatus::Running.as_i16())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if updated.rows_affected() == 0 {
            // Another replica got here first; leave everything as-is.
            tx.rollback()
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE mcp_servers SET
                status = $2,
                latest_scan_id = $3,
                latest_risk_score = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(scan.server_id.0)
        .bind(server_status.as_i16())
        .bind(scan.id.0)
        .bind(scan.risk_score)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(true)
    }

    async fn record_upload(
        &self,
        scan: &Scan,
        server_status: ServerStatus,
    ) -> Result<(), RepositoryError> {
        let issues = serde_json::to_value(&scan.issues)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let discovered_tools = serde_json::to_value(&scan.discovered_tools)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO mcp_scans (
                id, server_id, scanner_version, status, risk_score, summary,
                report_json, issues, discovered_tools, job_name, error_message,
                started_at, finished_at, triggered_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(scan.id.0)
        .bind(scan.server_id.0)
        .bind(&scan.scanner_version)
        .bind(scan.status.as_i16())
        .bind(scan.risk_score)
        .bind(&scan.summary)
        .bind(&scan.report_json)
        .bind(issues)
        .bind(discovered_tools)
        .bind(&scan.job_name)
        .bind(&scan.error_message)
        .bind(scan.started_at)
        .bind(scan.finished_at)
        .bind(&scan.triggered_by)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE mcp_servers SET
                status = $2,
                latest_scan_id = $3,
                latest_risk_score = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(scan.server_id.0)
        .bind(server_status.as_i16())
        .bind(scan.id.0)
        .bind(scan.risk_score)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn count_by_status(&self, status: ScanStatus) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM mcp_scans WHERE status = $1")
            .bind(status.as_i16())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        row.try_get("n")
            .map_err(|e| RepositoryError::Database(e.to_string()))
    }
}
