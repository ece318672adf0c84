// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Principals
//!
//! Identity claims arrive pre-validated from the upstream identity
//! provider; the gateway trusts them and only dispatches on them. No
//! role hierarchy: a flat record plus pure predicates.

use serde::{Deserialize, Serialize};

use crate::domain::server::Server;

pub const ROLE_ADMIN: &str = "admin";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// All team memberships. The first entry is the primary team used
    /// by policy allow/deny lists; every entry counts for ownership.
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            ..Default::default()
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(ROLE_ADMIN))
    }

    pub fn team(&self) -> Option<&str> {
        self.teams.first().map(String::as_str)
    }

    pub fn in_team(&self, team: &str) -> bool {
        self.teams.iter().any(|t| t == team)
    }
}

/// Access predicate for registry reads and owner-level mutations:
/// admin, creator, or member of the owning team.
pub fn can_access(principal: &Principal, server: &Server) -> bool {
    principal.is_admin()
        || principal.id == server.created_by
        || principal.in_team(&server.owner_team)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::server::{ServerId, ServerStatus, SourceType};
    use chrono::Utc;

    fn server(owner_team: &str, created_by: &str) -> Server {
        Server {
            id: ServerId::new(),
            canonical_id: "team-a/weather".to_string(),
            name: "weather".to_string(),
            description: None,
            owner_team: owner_team.to_string(),
            source_type: SourceType::ContainerImage,
            source_url: None,
            version: "1".to_string(),
            status: ServerStatus::Draft,
            declared_tools: vec![],
            mcp_config: None,
            test_endpoint: None,
            tags: vec![],
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            latest_scan_id: None,
            latest_risk_score: None,
        }
    }

    fn principal(id: &str, teams: &[&str], roles: &[&str]) -> Principal {
        Principal {
            id: id.to_string(),
            email: None,
            teams: teams.iter().map(|s| s.to_string()).collect(),
            roles: roles.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_admin_accesses_everything() {
        let p = principal("root", &[], &["admin"]);
        assert!(can_access(&p, &server("team-b", "bob")));
    }

    #[test]
    fn test_creator_accesses_own_server() {
        let p = principal("alice", &[], &[]);
        assert!(can_access(&p, &server("team-b", "alice")));
    }

    #[test]
    fn test_team_member_accesses_team_server() {
        let p = principal("carol", &["team-x", "team-b"], &[]);
        assert!(can_access(&p, &server("team-b", "bob")));
    }

    #[test]
    fn test_outsider_denied() {
        let p = principal("mallory", &["team-z"], &["viewer"]);
        assert!(!can_access(&p, &server("team-b", "bob")));
    }

    #[test]
    fn test_primary_team_is_first_claim() {
        let p = principal("carol", &["team-x", "team-b"], &[]);
        assert_eq!(p.team(), Some("team-x"));
        assert_eq!(Principal::anonymous().team(), None);
    }
}
