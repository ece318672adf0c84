// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Policy Decision Engine
//!
//! The synchronous admission check on the proxied tool-call path. One
//! registry lookup, no writes, evaluation order fixed: bypass, registry
//! status, risk gate, tool denylists, team lists. The snapshot is
//! immutable once built; reload swaps the `Arc` so in-flight decisions
//! keep the snapshot they started under.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{EnforcementMode, GatewayConfig};
use crate::domain::audit::Decision;
use crate::domain::principal::Principal;
use crate::domain::repository::ServerRepository;
use crate::domain::server::ServerStatus;
use crate::infrastructure::metrics;

use super::registry::RegistryError;

/// Immutable, pre-lowercased view of the policy configuration.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub enabled: bool,
    pub enforcement_mode: EnforcementMode,
    pub enforce_registry_only: bool,
    pub risk_threshold: f64,
    pub require_admin_for_high_risk: bool,
    pub max_request_payload_bytes: usize,
    pub max_response_payload_bytes: usize,
    pub default_timeout_ms: u64,
    pub rate_limit_per_user: u32,
    pub rate_limit_per_team: u32,
    bypass_allowed_principals: HashSet<String>,
    global_tool_denylist: HashSet<String>,
    denied_tool_categories: Vec<String>,
    team_allowlists: HashMap<String, Vec<String>>,
    team_denylists: HashMap<String, Vec<String>>,
}

impl PolicySnapshot {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        let policy = &cfg.policy;
        let lower_list = |items: &[String]| -> Vec<String> {
            items.iter().map(|s| s.to_lowercase()).collect()
        };
        Self {
            enabled: cfg.enabled,
            enforcement_mode: cfg.enforcement_mode,
            enforce_registry_only: policy.enforce_registry_only,
            risk_threshold: policy.risk_threshold,
            require_admin_for_high_risk: policy.require_admin_for_high_risk,
            max_request_payload_bytes: policy.max_request_payload_bytes,
            max_response_payload_bytes: policy.max_response_payload_bytes,
            default_timeout_ms: policy.default_timeout_ms,
            rate_limit_per_user: policy.rate_limit_per_user,
            rate_limit_per_team: policy.rate_limit_per_team,
            bypass_allowed_principals: policy
                .bypass_allowed_principals
                .iter()
                .cloned()
                .collect(),
            global_tool_denylist: policy
                .global_tool_denylist
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            denied_tool_categories: lower_list(&policy.denied_tool_categories),
            team_allowlists: policy
                .team_allowlists
                .iter()
                .map(|(team, servers)| (team.clone(), lower_list(servers)))
                .collect(),
            team_denylists: policy
                .team_denylists
                .iter()
                .map(|(team, servers)| (team.clone(), lower_list(servers)))
                .collect(),
        }
    }
}

/// The verdict handed to the enforcement adapter and the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub reason: Option<String>,
    pub server_risk_score: Option<f64>,
}

impl PolicyDecision {
    fn allow(server_risk_score: Option<f64>) -> Self {
        Self {
            decision: Decision::Allowed,
            reason: None,
            server_risk_score,
        }
    }

    fn deny(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: Some(reason.into()),
            server_risk_score: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }
}

pub struct PolicyEngine {
    snapshot: RwLock<Arc<PolicySnapshot>>,
    servers: Arc<dyn ServerRepository>,
}

impl PolicyEngine {
    pub fn new(cfg: &GatewayConfig, servers: Arc<dyn ServerRepository>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(PolicySnapshot::from_config(cfg))),
            servers,
        }
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.snapshot.read().clone()
    }

    /// Atomic swap; decisions already in flight keep their snapshot.
    pub fn reload(&self, cfg: &GatewayConfig) {
        let next = Arc::new(PolicySnapshot::from_config(cfg));
        *self.snapshot.write() = next;
        tracing::info!("policy snapshot reloaded");
    }

    /// Ordered evaluation; short-circuits on the first match.
    pub async fn decide(
        &self,
        principal: &Principal,
        server_canonical_id: &str,
        tool_name: &str,
    ) -> Result<PolicyDecision, RegistryError> {
        let started = Instant::now();
        let snapshot = self.snapshot();
        let result = self
            .decide_with(&snapshot, principal, server_canonical_id, tool_name)
            .await;
        metrics::record_policy_check_latency(started.elapsed().as_secs_f64());
        result
    }

    async fn decide_with(
        &self,
        snapshot: &PolicySnapshot,
        principal: &Principal,
        server_canonical_id: &str,
        tool_name: &str,
    ) -> Result<PolicyDecision, RegistryError> {
        if !snapshot.enabled {
            return Ok(PolicyDecision::allow(None));
        }

        // 1. Break-glass principals skip everything.
        if snapshot.bypass_allowed_principals.contains(&principal.id) {
            return Ok(PolicyDecision::allow(None));
        }

        // The single registry read; later steps reuse it.
        let server = self.servers.find_by_canonical_id(server_canonical_id).await?;

        // 2. Registry gate.
        if snapshot.enforce_registry_only {
            match &server {
                None => {
                    return Ok(PolicyDecision::deny(
                        Decision::DeniedServerNotApproved,
                        format!("server '{}' is not registered", server_canonical_id),
                    ))
                }
                Some(s) if s.status != ServerStatus::Approved => {
                    return Ok(PolicyDecision::deny(
                        Decision::DeniedServerNotApproved,
                        format!("server status is {}", s.status.as_str()),
                    ))
                }
                Some(_) => {}
            }
        }

        let risk = server.as_ref().and_then(|s| s.latest_risk_score);

        // 3. High-risk servers need an admin caller.
        if let Some(risk_score) = risk {
            if risk_score > snapshot.risk_threshold
                && snapshot.require_admin_for_high_risk
                && !principal.is_admin()
            {
                return Ok(PolicyDecision::deny(
                    Decision::DeniedHighRisk,
                    format!(
                        "risk score {:.2} exceeds threshold {:.2}",
                        risk_score, snapshot.risk_threshold
                    ),
                ));
            }
        }

        let tool_lower = tool_name.to_lowercase();

        // 4. Exact tool denylist.
        if snapshot.global_tool_denylist.contains(&tool_lower) {
            return Ok(PolicyDecision::deny(
                Decision::DeniedToolDenylisted,
                format!("tool '{}' is denylisted", tool_name),
            ));
        }

        // 5. Category substrings.
        if let Some(category) = snapshot
            .denied_tool_categories
            .iter()
            .find(|c| tool_lower.contains(c.as_str()))
        {
            return Ok(PolicyDecision::deny(
                Decision::DeniedToolDenylisted,
                format!("tool matches denied category '{}'", category),
            ));
        }

        let canonical_lower = server_canonical_id.to_lowercase();

        if let Some(team) = principal.team() {
            // 6. A team with an allowlist is confined to it (empty = all).
            if let Some(allowed) = snapshot.team_allowlists.get(team) {
                if !allowed.is_empty() && !allowed.contains(&canonical_lower) {
                    return Ok(PolicyDecision::deny(
                        Decision::DeniedTeamNotAuthorized,
                        format!("team '{}' is not authorized for this server", team),
                    ));
                }
            }
            // 7. Explicit team denylist.
            if let Some(denied) = snapshot.team_denylists.get(team) {
                if denied.contains(&canonical_lower) {
                    return Ok(PolicyDecision::deny(
                        Decision::DeniedTeamNotAuthorized,
                        format!("team '{}' is blocked from this server", team),
                    ));
                }
            }
        }

        // 8. Admitted; decorate with the risk score for the audit trail.
        Ok(PolicyDecision::allow(risk))
    }
}
