// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Enforcement Adapter
//!
//! Axum middleware on the MCP proxy paths. Extracts (principal, server,
//! tool) from the request, asks the policy engine, and either forwards,
//! blocks with a structured 403, or merely records, depending on the
//! enforcement mode. The request body is buffered up to the configured
//! bound and replayed downstream. Audit events are queued fire-and-
//! forget; nothing on this path awaits persistence.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::audit_pipeline::AuditPipeline;
use crate::application::policy::{PolicyDecision, PolicyEngine, PolicySnapshot};
use crate::config::{EnforcementMode, PolicyConfig};
use crate::domain::audit::{AuditEvent, Decision};
use crate::domain::principal::Principal;
use crate::infrastructure::metrics;
use crate::presentation::auth::principal_from_headers;

/// Keyed limiters sized once at startup from the policy section.
pub struct RateLimits {
    per_user: Option<DefaultKeyedRateLimiter<String>>,
    per_team: Option<DefaultKeyedRateLimiter<String>>,
}

impl RateLimits {
    pub fn from_config(policy: &PolicyConfig) -> Self {
        let limiter = |per_minute: u32| {
            NonZeroU32::new(per_minute).map(|n| RateLimiter::keyed(Quota::per_minute(n)))
        };
        Self {
            per_user: limiter(policy.rate_limit_per_user),
            per_team: limiter(policy.rate_limit_per_team),
        }
    }

    /// Which limit, if any, this call trips.
    fn check(&self, principal: &Principal) -> Option<String> {
        if let Some(limiter) = &self.per_user {
            if limiter.check_key(&principal.id).is_err() {
                return Some(format!("rate limit exceeded for user '{}'", principal.id));
            }
        }
        if let (Some(limiter), Some(team)) = (&self.per_team, principal.team()) {
            if limiter.check_key(&team.to_string()).is_err() {
                return Some(format!("rate limit exceeded for team '{}'", team));
            }
        }
        None
    }
}

pub struct EnforcementState {
    pub policy: Arc<PolicyEngine>,
    pub audit: Arc<AuditPipeline>,
    pub rate_limits: RateLimits,
}

/// Paths the adapter intercepts; everything else passes through.
pub fn is_enforced_path(path: &str) -> bool {
    path.contains("/adapters/") || path.contains("/tools/") || path.ends_with("/mcp")
}

/// canonicalId from the path portion after `adapters/`, up to a proxy
/// suffix. canonicalIds may contain `/`, so this is not a single-segment
/// split.
pub fn extract_canonical_id(path: &str) -> Option<&str> {
    let after = path.split_once("adapters/")?.1;
    let end = after
        .find("/mcp")
        .or_else(|| after.find("/tools"))
        .unwrap_or(after.len());
    let canonical = after[..end].trim_end_matches('/');
    (!canonical.is_empty()).then_some(canonical)
}

/// Tool name from the JSON-RPC body: `params.name` for `tools/call`,
/// the `method` itself otherwise.
pub fn extract_tool_name(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let method = value.get("method")?.as_str()?;
    if method == "tools/call" {
        if let Some(name) = value
            .get("params")
            .and_then(|p| p.get("name"))
            .and_then(|n| n.as_str())
        {
            return Some(name.to_string());
        }
    }
    Some(method.to_string())
}

struct CallContext {
    principal: Principal,
    canonical_id: String,
    tool_name: String,
    trace_id: String,
    source_ip: Option<String>,
    user_agent: Option<String>,
    request_size: i64,
    started: Instant,
}

pub async fn enforce_mcp(
    State(state): State<Arc<EnforcementState>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if !is_enforced_path(&path) {
        return next.run(req).await;
    }

    let snapshot = state.policy.snapshot();
    if !snapshot.enabled {
        return next.run(req).await;
    }

    let Some(canonical_id) = extract_canonical_id(&path).map(str::to_string) else {
        debug!(path = %path, "no canonical id in proxied path, bypassing enforcement");
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let principal = principal_from_headers(&parts.headers);
    let trace_id = header_string(&parts.headers, "x-trace-id")
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let source_ip = header_string(&parts.headers, "x-forwarded-for");
    let user_agent = header_string(&parts.headers, "user-agent");

    // Oversized payloads are denied before buffering.
    let declared_len = parts
        .headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if matches!(declared_len, Some(len) if len > snapshot.max_request_payload_bytes) {
        let ctx = CallContext {
            principal,
            canonical_id,
            tool_name: String::new(),
            trace_id,
            source_ip,
            user_agent,
            request_size: declared_len.unwrap_or(0) as i64,
            started: Instant::now(),
        };
        let verdict = PolicyDecision {
            decision: Decision::DeniedPayloadTooLarge,
            reason: Some(format!(
                "request body exceeds {} bytes",
                snapshot.max_request_payload_bytes
            )),
            server_risk_score: None,
        };
        let req = Request::from_parts(parts, body);
        return settle(&state, &snapshot, ctx, verdict, req, next).await;
    }

    let bytes = match to_bytes(body, snapshot.max_request_payload_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, trace = %trace_id, "failed to buffer proxied request body");
            return internal_error(&trace_id);
        }
    };
    let request_size = bytes.len() as i64;

    let Some(tool_name) = extract_tool_name(&bytes) else {
        debug!(path = %path, "no tool name in request body, bypassing enforcement");
        return next
            .run(Request::from_parts(parts, Body::from(bytes)))
            .await;
    };

    let ctx = CallContext {
        principal,
        canonical_id,
        tool_name,
        trace_id,
        source_ip,
        user_agent,
        request_size,
        started: Instant::now(),
    };

    let verdict = match state
        .policy
        .decide(&ctx.principal, &ctx.canonical_id, &ctx.tool_name)
        .await
    {
        Ok(verdict) if verdict.is_allowed() => match state.rate_limits.check(&ctx.principal) {
            Some(reason) => PolicyDecision {
                decision: Decision::DeniedRateLimited,
                reason: Some(reason),
                server_risk_score: verdict.server_risk_score,
            },
            None => verdict,
        },
        Ok(verdict) => verdict,
        Err(e) => {
            warn!(error = %e, trace = %ctx.trace_id, "policy engine failure");
            record(&state, &ctx, Decision::Error, Some(e.to_string()), None, 0);
            return match snapshot.enforcement_mode {
                EnforcementMode::Enforce => internal_error(&ctx.trace_id),
                EnforcementMode::Audit => {
                    next.run(Request::from_parts(parts, Body::from(bytes)))
                        .await
                }
            };
        }
    };

    let req = Request::from_parts(parts, Body::from(bytes));
    settle(&state, &snapshot, ctx, verdict, req, next).await
}

/// Apply the verdict under the current mode, forward if appropriate,
/// and queue the audit event.
async fn settle(
    state: &Arc<EnforcementState>,
    snapshot: &PolicySnapshot,
    ctx: CallContext,
    verdict: PolicyDecision,
    req: Request,
    next: Next,
) -> Response {
    metrics::record_tool_call(
        &ctx.canonical_id,
        &ctx.tool_name,
        ctx.principal.team(),
        verdict.decision,
    );

    if !verdict.is_allowed() && snapshot.enforcement_mode == EnforcementMode::Enforce {
        record(
            state,
            &ctx,
            verdict.decision,
            verdict.reason.clone(),
            verdict.server_risk_score,
            0,
        );
        return deny_response(&ctx, &verdict);
    }

    // Allowed, or audit-mode would-deny: forward downstream.
    let timeout = Duration::from_millis(snapshot.default_timeout_ms);
    let response = match tokio::time::timeout(timeout, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            record(
                state,
                &ctx,
                Decision::TimedOut,
                Some(format!("downstream exceeded {} ms", timeout.as_millis())),
                verdict.server_risk_score,
                0,
            );
            return (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({
                    "error": "downstream timeout",
                    "traceId": ctx.trace_id,
                })),
            )
                .into_response();
        }
    };

    let response_size = response
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    if verdict.is_allowed() {
        metrics::record_tool_call_latency(
            &ctx.canonical_id,
            &ctx.tool_name,
            ctx.started.elapsed().as_secs_f64(),
        );
    }
    record(
        state,
        &ctx,
        verdict.decision,
        verdict.reason,
        verdict.server_risk_score,
        response_size,
    );
    response
}

fn deny_response(ctx: &CallContext, verdict: &PolicyDecision) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "error": "tool call blocked by policy",
            "reason": verdict.reason,
            "decision": verdict.decision.as_str(),
            "serverCanonicalId": ctx.canonical_id,
            "toolName": ctx.tool_name,
            "traceId": ctx.trace_id,
        })),
    )
        .into_response()
}

// Audit mode forwards around policy failures, but once body buffering
// has failed there is nothing left to forward in either mode.
fn internal_error(trace_id: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "enforcement failure", "traceId": trace_id })),
    )
        .into_response()
}

fn record(
    state: &Arc<EnforcementState>,
    ctx: &CallContext,
    decision: Decision,
    reason: Option<String>,
    server_risk_score: Option<f64>,
    response_size: i64,
) {
    state.audit.record(AuditEvent {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        actor: ctx.principal.id.clone(),
        actor_email: ctx.principal.email.clone(),
        team: ctx.principal.team().map(str::to_string),
        server_canonical_id: ctx.canonical_id.clone(),
        tool_name: ctx.tool_name.clone(),
        decision,
        reason,
        latency_ms: ctx.started.elapsed().as_secs_f64() * 1000.0,
        request_size: ctx.request_size,
        response_size,
        trace_id: Some(ctx.trace_id.clone()),
        source_ip: ctx.source_ip.clone(),
        user_agent: ctx.user_agent.clone(),
        server_risk_score,
    });
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enforced_path_matching() {
        assert!(is_enforced_path("/adapters/team-a/weather/mcp"));
        assert!(is_enforced_path("/proxy/tools/list"));
        assert!(is_enforced_path("/gateway/mcp"));
        assert!(!is_enforced_path("/registry/servers"));
        assert!(!is_enforced_path("/health"));
    }

    #[test]
    fn test_canonical_id_extraction() {
        assert_eq!(
            extract_canonical_id("/adapters/team-a/weather/mcp"),
            Some("team-a/weather")
        );
        assert_eq!(
            extract_canonical_id("/adapters/simple/tools/call"),
            Some("simple")
        );
        assert_eq!(extract_canonical_id("/adapters/solo"), Some("solo"));
        assert_eq!(extract_canonical_id("/adapters/"), None);
        assert_eq!(extract_canonical_id("/registry/servers"), None);
    }

    #[test]
    fn test_tool_name_extraction() {
        let body = br#"{"jsonrpc": "2.0", "method": "tools/call", "params": {"name": "get_weather", "arguments": {}}}"#;
        assert_eq!(extract_tool_name(body).as_deref(), Some("get_weather"));

        let body = br#"{"jsonrpc": "2.0", "method": "tools/list"}"#;
        assert_eq!(extract_tool_name(body).as_deref(), Some("tools/list"));

        assert_eq!(extract_tool_name(b"not json"), None);
        assert_eq!(extract_tool_name(br#"{"params": {}}"#), None);
    }

    #[test]
    fn test_tool_call_without_name_falls_back_to_method() {
        let body = br#"{"method": "tools/call", "params": {}}"#;
        assert_eq!(extract_tool_name(body).as_deref(), Some("tools/call"));
    }

    #[test]
    fn test_rate_limiter_trips_per_user() {
        let policy = PolicyConfig {
            rate_limit_per_user: 2,
            ..PolicyConfig::default()
        };
        let limits = RateLimits::from_config(&policy);
        let principal = Principal {
            id: "alice".to_string(),
            email: None,
            teams: vec![],
            roles: vec![],
        };
        assert!(limits.check(&principal).is_none());
        assert!(limits.check(&principal).is_none());
        assert!(limits.check(&principal).is_some());

        // Disabled limits never trip.
        let unlimited = RateLimits::from_config(&PolicyConfig::default());
        for _ in 0..100 {
            assert!(unlimited.check(&principal).is_none());
        }
    }
}
