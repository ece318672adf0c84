// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Approval Records
//!
//! Append-only admin decisions. `server_canonical_id` and `scan_id` are
//! snapshots taken at decision time so the audit trail survives server
//! deletion and later rescans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::scan::ScanId;
use crate::domain::server::ServerId;

/// Persisted by ordinal; append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalAction {
    Approved,
    Denied,
    Deprecated,
    Suspended,
    Reinstated,
    Revoked,
}

impl ApprovalAction {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            0 => Some(Self::Approved),
            1 => Some(Self::Denied),
            2 => Some(Self::Deprecated),
            3 => Some(Self::Suspended),
            4 => Some(Self::Reinstated),
            5 => Some(Self::Revoked),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "Approved",
            Self::Denied => "Denied",
            Self::Deprecated => "Deprecated",
            Self::Suspended => "Suspended",
            Self::Reinstated => "Reinstated",
            Self::Revoked => "Revoked",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: Uuid,
    pub server_id: ServerId,
    pub server_canonical_id: String,
    pub actor: String,
    pub action: ApprovalAction,
    /// Required and non-empty; enforced by the registry service.
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Stored and surfaced, not enforced; an expired approval has no
    /// effect on current status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Snapshot of the server's latest scan at decision time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<ScanId>,
}

impl Approval {
    pub fn new(
        server_id: ServerId,
        server_canonical_id: String,
        actor: String,
        action: ApprovalAction,
        reason: String,
        scan_id: Option<ScanId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id,
            server_canonical_id,
            actor,
            action,
            reason,
            notes: None,
            timestamp: Utc::now(),
            expires_at: None,
            scan_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_ordinals_stable() {
        for v in 0..6 {
            assert_eq!(ApprovalAction::from_i16(v).unwrap().as_i16(), v);
        }
        assert!(ApprovalAction::from_i16(6).is_none());
        assert_eq!(ApprovalAction::Approved.as_i16(), 0);
        assert_eq!(ApprovalAction::Revoked.as_i16(), 5);
    }
}
