// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Audit Events
//!
//! One allow/deny record per proxied tool invocation. Events are
//! independent of the server rows: the server may be deleted while its
//! audit history remains, keyed by the canonicalId string snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The decision taxonomy surfaced to callers and persisted with every
/// event. Persisted by ordinal; append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Allowed,
    DeniedServerNotApproved,
    DeniedToolDenylisted,
    DeniedTeamNotAuthorized,
    DeniedHighRisk,
    DeniedRateLimited,
    DeniedPayloadTooLarge,
    TimedOut,
    Error,
}

impl Decision {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::Allowed),
            1 => Some(Self::DeniedServerNotApproved),
            2 => Some(Self::DeniedToolDenylisted),
            3 => Some(Self::DeniedTeamNotAuthorized),
            4 => Some(Self::DeniedHighRisk),
            5 => Some(Self::DeniedRateLimited),
            6 => Some(Self::DeniedPayloadTooLarge),
            7 => Some(Self::TimedOut),
            8 => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowed => "Allowed",
            Self::DeniedServerNotApproved => "DeniedServerNotApproved",
            Self::DeniedToolDenylisted => "DeniedToolDenylisted",
            Self::DeniedTeamNotAuthorized => "DeniedTeamNotAuthorized",
            Self::DeniedHighRisk => "DeniedHighRisk",
            Self::DeniedRateLimited => "DeniedRateLimited",
            Self::DeniedPayloadTooLarge => "DeniedPayloadTooLarge",
            Self::TimedOut => "TimedOut",
            Self::Error => "Error",
        }
    }

    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    pub server_canonical_id: String,
    pub tool_name: String,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub latency_ms: f64,
    pub request_size: i64,
    pub response_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_risk_score: Option<f64>,
}

/// Multi-dimensional filter for audit queries. All fields conjunctive;
/// `None` means unconstrained.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub team: Option<String>,
    pub server_canonical_id: Option<String>,
    pub tool_name: Option<String>,
    pub decision: Option<Decision>,
    pub actor: Option<String>,
}

/// One page of audit results plus the total count matching the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditPage {
    pub events: Vec<AuditEvent>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountByKey {
    pub key: String,
    pub count: i64,
}

/// Aggregates over a filter window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    pub total: i64,
    pub allowed: i64,
    pub denied: i64,
    pub by_decision: Vec<CountByKey>,
    pub top_servers: Vec<CountByKey>,
    pub top_teams: Vec<CountByKey>,
    pub mean_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_ordinals_stable() {
        for v in 0..9 {
            assert_eq!(Decision::from_i16(v).unwrap().as_i16(), v);
        }
        assert!(Decision::from_i16(9).is_none());
        assert_eq!(Decision::Allowed.as_i16(), 0);
        assert_eq!(Decision::Error.as_i16(), 8);
    }

    #[test]
    fn test_only_allowed_is_allowed() {
        for v in 1..9 {
            assert!(!Decision::from_i16(v).unwrap().is_allowed());
        }
        assert!(Decision::Allowed.is_allowed());
    }
}
