// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # PostgreSQL Server Repository
//!
//! Production `ServerRepository` backed by the `mcp_servers` table.
//! canonicalId uniqueness is enforced case-insensitively by a unique
//! index over `LOWER(canonical_id)`. Status transitions go through a
//! conditional UPDATE so concurrent mutators serialize on the row.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::repository::{RepositoryError, ServerRepository};
use crate::domain::scan::ScanId;
use crate::domain::server::{Server, ServerId, ServerStatus, SourceType};

pub struct PostgresServerRepository {
    pool: PgPool,
}

impl PostgresServerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SERVER_COLUMNS: &str = "id, canonical_id, name, description, owner_team, source_type, \
     source_url, version, status, declared_tools, mcp_config, test_endpoint, tags, \
     created_by, created_at, updated_at, latest_scan_id, latest_risk_score";

pub(crate) fn server_from_row(row: &PgRow) -> Result<Server, RepositoryError> {
    let source_type_raw: i16 = row
        .try_get("source_type")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let source_type = SourceType::from_i16(source_type_raw)
        .ok_or_else(|| RepositoryError::Corrupt(format!("unknown source_type {}", source_type_raw)))?;

    let status_raw: i16 = row
        .try_get("status")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let status = ServerStatus::from_i16(status_raw)
        .ok_or_else(|| RepositoryError::Corrupt(format!("unknown server status {}", status_raw)))?;

    let declared_tools: serde_json::Value = row
        .try_get("declared_tools")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let declared_tools: Vec<String> = serde_json::from_value(declared_tools)
        .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    let tags: serde_json::Value = row
        .try_get("tags")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let tags: Vec<String> =
        serde_json::from_value(tags).map_err(|e| RepositoryError::Serialization(e.to_string()))?;

    Ok(Server {
        id: ServerId(row.get("id")),
        canonical_id: row.get("canonical_id"),
        name: row.get("name"),
        description: row.get("description"),
        owner_team: row.get("owner_team"),
        source_type,
        source_url: row.get("source_url"),
        version: row.get("version"),
        status,
        declared_tools,
        mcp_config: row.get("mcp_config"),
        test_endpoint: row.get("test_endpoint"),
        tags,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        latest_scan_id: row
            .get::<Option<uuid::Uuid>, _>("latest_scan_id")
            .map(ScanId),
        latest_risk_score: row.get("latest_risk_score"),
    })
}

fn map_insert_err(e: sqlx::Error) -> RepositoryError {
    if let Some(db_err) = e.as_database_error() {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict {
                field: "canonicalId".to_string(),
            };
        }
    }
    RepositoryError::Database(e.to_string())
}

#[async_trait]
impl ServerRepository for PostgresServerRepository {
    async fn bootstrap(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mcp_servers (
                id UUID PRIMARY KEY,
                canonical_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                owner_team TEXT NOT NULL,
                source_type SMALLINT NOT NULL,
                source_url TEXT,
                version TEXT NOT NULL,
                status SMALLINT NOT NULL,
                declared_tools JSONB NOT NULL DEFAULT '[]'::jsonb,
                mcp_config JSONB,
                test_endpoint TEXT,
                tags JSONB NOT NULL DEFAULT '[]'::jsonb,
                created_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                latest_scan_id UUID,
                latest_risk_score DOUBLE PRECISION
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        for stmt in [
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_mcp_servers_canonical_id \
             ON mcp_servers (LOWER(canonical_id))",
            "CREATE INDEX IF NOT EXISTS idx_mcp_servers_status ON mcp_servers (status)",
            "CREATE INDEX IF NOT EXISTS idx_mcp_servers_owner_team ON mcp_servers (owner_team)",
        ] {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn create(&self, server: &Server) -> Result<(), RepositoryError> {
        let declared_tools = serde_json::to_value(&server.declared_tools)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let tags = serde_json::to_value(&server.tags)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO mcp_servers (
                id, canonical_id, name, description, owner_team, source_type,
                source_url, version, status, declared_tools, mcp_config,
                test_endpoint, tags, created_by, created_at, updated_at,
                latest_scan_id, latest_risk_score
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(server.id.0)
        .bind(&server.canonical_id)
        .bind(&server.name)
        .bind(&server.description)
        .bind(&server.owner_team)
        .bind(server.source_type.as_i16())
        .bind(&server.source_url)
        .bind(&server.version)
        .bind(server.status.as_i16())
        .bind(declared_tools)
        .bind(&server.mcp_config)
        .bind(&server.test_endpoint)
        .bind(tags)
        .bind(&server.created_by)
        .bind(server.created_at)
        .bind(server.updated_at)
        .bind(server.latest_scan_id.map(|s| s.0))
        .bind(server.latest_risk_score)
        .execute(&self.pool)
        .await
        .map_err(map_insert_err)?;

        Ok(())
    }

    async fn find_by_id(&self, id: ServerId) -> Result<Option<Server>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM mcp_servers WHERE id = $1",
            SERVER_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(server_from_row).transpose()
    }

    async fn find_by_canonical_id(
        &self,
        canonical_id: &str,
    ) -> Result<Option<Server>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM mcp_servers WHERE LOWER(canonical_id) = LOWER($1)",
            SERVER_COLUMNS
        ))
        .bind(canonical_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(server_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Server>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mcp_servers ORDER BY canonical_id ASC",
            SERVER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(server_from_row).collect()
    }

    async fn list_by_status(&self, status: ServerStatus) -> Result<Vec<Server>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mcp_servers WHERE status = $1 ORDER BY canonical_id ASC",
            SERVER_COLUMNS
        ))
        .bind(status.as_i16())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(server_from_row).collect()
    }

    async fn list_by_team(&self, team: &str) -> Result<Vec<Server>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM mcp_servers WHERE owner_team = $1 ORDER BY canonical_id ASC",
            SERVER_COLUMNS
        ))
        .bind(team)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(server_from_row).collect()
    }

    async fn update(&self, server: &Server) -> Result<(), RepositoryError> {
        let declared_tools = serde_json::to_value(&server.declared_tools)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;
        let tags = serde_json::to_value(&server.tags)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE mcp_servers SET
                name = $2,
                description = $3,
                owner_team = $4,
                source_type = $5,
                source_url = $6,
                version = $7,
                status = $8,
                declared_tools = $9,
                mcp_config = $10,
                test_endpoint = $11,
                tags = $12,
                updated_at = $13,
                latest_scan_id = $14,
                latest_risk_score = $15
            WHERE id = $1
            "#,
        )
        .bind(server.id.0)
        .bind(&server.name)
        .bind(&server.description)
        .bind(&server.owner_team)
        .bind(server.source_type.as_i16())
        .bind(&server.source_url)
        .bind(&server.version)
        .bind(server.status.as_i16())
        .bind(declared_tools)
        .bind(&server.mcp_config)
        .bind(&server.test_endpoint)
        .bind(tags)
        .bind(server.updated_at)
        .bind(server.latest_scan_id.map(|s| s.0))
        .bind(server.latest_risk_score)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(())
    }

    async fn transition_status(
        &self,
        id: ServerId,
        from: &[ServerStatus],
        to: ServerStatus,
    ) -> Result<Option<Server>, RepositoryError> {
        let from_ordinals: Vec<i16> = from.iter().map(|s| s.as_i16()).collect();
        let row = sqlx::query(&format!(
            "UPDATE mcp_servers SET status = $1, updated_at = NOW() \
             WHERE id = $2 AND status = ANY($3) RETURNING {}",
            SERVER_COLUMNS
        ))
        .bind(to.as_i16())
        .bind(id.0)
        .bind(&from_ordinals)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.as_ref().map(server_from_row).transpose()
    }

    async fn delete(&self, id: ServerId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM mcp_servers WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, status: ServerStatus) -> Result<i64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM mcp_servers WHERE status = $1")
            .bind(status.as_i16())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        row.try_get("n")
            .map_err(|e| RepositoryError::Database(e.to_string()))
    }
}
