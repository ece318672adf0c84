// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # PostgreSQL Audit Repository
//!
//! Append-only `mcp_audit_events` table. Queries are built dynamically
//! from the multi-dimensional filter; every dimension is indexed.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::domain::audit::{
    AuditEvent, AuditFilter, AuditPage, AuditStats, CountByKey, Decision,
};
use crate::domain::repository::{AuditRepository, RepositoryError};

pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &PgRow) -> Result<AuditEvent, RepositoryError> {
    let decision_raw: i16 = row
        .try_get("decision")
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
    let decision = Decision::from_i16(decision_raw)
        .ok_or_else(|| RepositoryError::Corrupt(format!("unknown decision {}", decision_raw)))?;

    Ok(AuditEvent {
        id: row.get("id"),
        timestamp: row.get("ts"),
        actor: row.get("actor"),
        actor_email: row.get("actor_email"),
        team: row.get("team"),
        server_canonical_id: row.get("server_canonical_id"),
        tool_name: row.get("tool_name"),
        decision,
        reason: row.get("reason"),
        latency_ms: row.get("latency_ms"),
        request_size: row.get("request_size"),
        response_size: row.get("response_size"),
        trace_id: row.get("trace_id"),
        source_ip: row.get("source_ip"),
        user_agent: row.get("user_agent"),
        server_risk_score: row.get("server_risk_score"),
    })
}

/// Appends `AND …` clauses for every set filter dimension.
fn push_filter<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a AuditFilter) {
    if let Some(start) = filter.start_date {
        qb.push(" AND ts >= ").push_bind(start);
    }
    if let Some(end) = filter.end_date {
        qb.push(" AND ts <= ").push_bind(end);
    }
    if let Some(team) = &filter.team {
        qb.push(" AND team = ").push_bind(team);
    }
    if let Some(canonical) = &filter.server_canonical_id {
        qb.push(" AND server_canonical_id = ").push_bind(canonical);
    }
    if let Some(tool) = &filter.tool_name {
        qb.push(" AND tool_name = ").push_bind(tool);
    }
    if let Some(decision) = filter.decision {
        qb.push(" AND decision = ").push_bind(decision.as_i16());
    }
    if let Some(actor) = &filter.actor {
        qb.push(" AND actor = ").push_bind(actor);
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn bootstrap(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mcp_audit_events (
                id UUID PRIMARY KEY,
                ts TIMESTAMPTZ NOT NULL,
                actor TEXT NOT NULL,
                actor_email TEXT,
                team TEXT,
                server_canonical_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                decision SMALLINT NOT NULL,
                reason TEXT,
                latency_ms DOUBLE PRECISION NOT NULL,
                request_size BIGINT NOT NULL,
                response_size BIGINT NOT NULL,
                trace_id TEXT,
                source_ip TEXT,
                user_agent TEXT,
                server_risk_score DOUBLE PRECISION
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_mcp_audit_ts ON mcp_audit_events (ts DESC)",
            "CREATE INDEX IF NOT EXISTS idx_mcp_audit_actor ON mcp_audit_events (actor)",
            "CREATE INDEX IF NOT EXISTS idx_mcp_audit_team ON mcp_audit_events (team)",
            "CREATE INDEX IF NOT EXISTS idx_mcp_audit_server \
             ON mcp_audit_events (server_canonical_id)",
            "CREATE INDEX IF NOT EXISTS idx_mcp_audit_decision ON mcp_audit_events (decision)",
        ] {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn insert_batch(&self, events: &[AuditEvent]) -> Result<(), RepositoryError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO mcp_audit_events (id, ts, actor, actor_email, team, \
             server_canonical_id, tool_name, decision, reason, latency_ms, \
             request_size, response_size, trace_id, source_ip, user_agent, \
             server_risk_score) ",
        );
        qb.push_values(events, |mut b, event| {
            b.push_bind(event.id)
                .push_bind(event.timestamp)
                .push_bind(&event.actor)
                .push_bind(&event.actor_email)
                .push_bind(&event.team)
                .push_bind(&event.server_canonical_id)
                .push_bind(&event.tool_name)
                .push_bind(event.decision.as_i16())
                .push_bind(&event.reason)
                .push_bind(event.latency_ms)
                .push_bind(event.request_size)
                .push_bind(event.response_size)
                .push_bind(&event.trace_id)
                .push_bind(&event.source_ip)
                .push_bind(&event.user_agent)
                .push_bind(event.server_risk_score);
        });

        qb.build()
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        limit: i64,
        offset: i64,
    ) -> Result<AuditPage, RepositoryError> {
        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) AS n FROM mcp_audit_events WHERE TRUE");
        push_filter(&mut count_qb, filter);
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?
            .try_get("n")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, ts, actor, actor_email, team, server_canonical_id, tool_name, \
             decision, reason, latency_ms, request_size, response_size, trace_id, \
             source_ip, user_agent, server_risk_score FROM mcp_audit_events WHERE TRUE",
        );
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY ts DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let events = rows
            .iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AuditPage {
            events,
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
        let mut totals_qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE decision = 0) AS allowed, \
             COALESCE(AVG(latency_ms), 0) AS mean_latency \
             FROM mcp_audit_events WHERE TRUE",
        );
        push_filter(&mut totals_qb, filter);
        let totals = totals_qb
            .build()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let total: i64 = totals
            .try_get("total")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let allowed: i64 = totals
            .try_get("allowed")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        let mean_latency_ms: f64 = totals
            .try_get("mean_latency")
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let mut by_decision_qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT decision, COUNT(*) AS n FROM mcp_audit_events WHERE TRUE",
        );
        push_filter(&mut by_decision_qb, filter);
        by_decision_qb.push(" GROUP BY decision ORDER BY n DESC");
        let by_decision = by_decision_qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?
            .iter()
            .map(|row| {
                let ordinal: i16 = row
                    .try_get("decision")
                    .map_err(|e| RepositoryError::Database(e.to_string()))?;
                let decision = Decision::from_i16(ordinal).ok_or_else(|| {
                    RepositoryError::Corrupt(format!("unknown decision {}", ordinal))
                })?;
                Ok(CountByKey {
                    key: decision.as_str().to_string(),
                    count: row
                        .try_get("n")
                        .map_err(|e| RepositoryError::Database(e.to_string()))?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        let top_servers = self
            .top_by_column("server_canonical_id", filter, top_n)
            .await?;
        let top_teams = self.top_by_column("team", filter, top_n).await?;

        Ok(AuditStats {
            total,
            allowed,
            denied: total - allowed,
            by_decision,
            top_servers,
            top_teams,
            mean_latency_ms,
        })
    }
}

impl PostgresAuditRepository {
    async fn top_by_column(
        &self,
        column: &str,
        filter: &AuditFilter,
        top_n: i64,
    ) -> Result<Vec<CountByKey>, RepositoryError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {column} AS key, COUNT(*) AS n FROM mcp_audit_events \
             WHERE {column} IS NOT NULL"
        ));
        push_filter(&mut qb, filter);
        qb.push(format!(" GROUP BY {column} ORDER BY n DESC LIMIT "))
            .push_bind(top_n);

        qb.build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?
            .iter()
            .map(|row| {
                Ok(CountByKey {
                    key: row
                        .try_get("key")
                        .map_err(|e| RepositoryError::Database(e.to_string()))?,
                    count: row
                        .try_get("n")
                        .map_err(|e| RepositoryError::Database(e.to_string()))?,
                })
            })
            .collect()
    }
}
