// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::application::audit_pipeline::AuditPipeline;
use crate::application::registry::{
    DecisionRequest, RegisterServerRequest, RegistryError, RegistryService, UpdateServerRequest,
};
use crate::domain::audit::{AuditFilter, Decision};
use crate::domain::principal::Principal;
use crate::domain::scan::ScanId;
use crate::domain::server::ServerId;
use crate::infrastructure::Database;

pub struct AppState {
    pub registry: Arc<RegistryService>,
    pub audit: Arc<AuditPipeline>,
    pub metrics: Option<PrometheusHandle>,
    pub db: Option<Database>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/registry/servers", post(register_server).get(list_servers))
        .route(
            "/registry/servers/by-canonical-id/{*canonical}",
            get(get_server_by_canonical_id),
        )
        .route(
            "/registry/servers/{id}",
            get(get_server).put(update_server).delete(delete_server),
        )
        .route("/registry/servers/{id}/scan", post(submit_scan))
        .route("/registry/servers/{id}/scan/upload", post(upload_scan))
        .route("/registry/servers/{id}/scan/latest", get(latest_scan))
        .route("/registry/servers/{id}/scans", get(list_scans))
        .route("/registry/servers/{id}/scans/{sid}", get(get_scan))
        .route("/registry/servers/{id}/scans/{sid}/cancel", post(cancel_scan))
        .route("/registry/servers/{id}/approve", post(approve_server))
        .route("/registry/servers/{id}/deny", post(deny_server))
        .route("/registry/servers/{id}/suspend", post(suspend_server))
        .route("/registry/servers/{id}/reinstate", post(reinstate_server))
        .route("/registry/servers/{id}/approvals", get(list_approvals))
        .route("/registry/audit", get(query_audit))
        .route("/registry/audit/stats", get(audit_stats))
        .route("/metrics", get(scrape_metrics))
        .route("/health", get(health))
        .with_state(state)
}

pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            RegistryError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            RegistryError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            RegistryError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            RegistryError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            RegistryError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            RegistryError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            RegistryError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream"),
            RegistryError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        (
            status,
            Json(json!({ "error": code, "message": self.0.to_string() })),
        )
            .into_response()
    }
}

fn parse_server_id(raw: &str) -> Result<ServerId, ApiError> {
    ServerId::from_string(raw)
        .map_err(|_| RegistryError::InvalidArgument("malformed server id".to_string()).into())
}

fn parse_scan_id(raw: &str) -> Result<ScanId, ApiError> {
    ScanId::from_string(raw)
        .map_err(|_| RegistryError::InvalidArgument("malformed scan id".to_string()).into())
}

async fn register_server(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(req): Json<RegisterServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let server = state.registry.register(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(server)))
}

async fn list_servers(
    State(state): State<Arc<AppState>>,
    principal: Principal,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.registry.list(&principal).await?))
}

async fn get_server(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    match state.registry.get(&principal, id).await? {
        Some(server) => Ok(Json(server)),
        None => Err(RegistryError::NotFound.into()),
    }
}

async fn get_server_by_canonical_id(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(canonical): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state
        .registry
        .get_by_canonical_id(&principal, &canonical)
        .await?
    {
        Some(server) => Ok(Json(server)),
        None => Err(RegistryError::NotFound.into()),
    }
}

async fn update_server(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<UpdateServerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    Ok(Json(state.registry.update(&principal, id, req).await?))
}

async fn delete_server(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    state.registry.delete(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_scan(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    let scan = state.registry.submit_for_scan(&principal, id).await?;
    Ok((StatusCode::ACCEPTED, Json(scan)))
}

async fn upload_scan(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    payload: String,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    Ok(Json(
        state
            .registry
            .upload_local_scan(&principal, id, &payload)
            .await?,
    ))
}

async fn list_scans(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    Ok(Json(state.registry.list_scans(&principal, id).await?))
}

async fn get_scan(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((id, sid)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    let sid = parse_scan_id(&sid)?;
    match state.registry.get_scan(&principal, id, sid).await? {
        Some(scan) => Ok(Json(scan)),
        None => Err(RegistryError::NotFound.into()),
    }
}

async fn latest_scan(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    match state.registry.latest_scan(&principal, id).await? {
        Some(scan) => Ok(Json(scan)),
        None => Err(RegistryError::NotFound.into()),
    }
}

async fn cancel_scan(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((id, sid)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    let sid = parse_scan_id(&sid)?;
    Ok(Json(state.registry.cancel_scan(&principal, id, sid).await?))
}

async fn approve_server(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    Ok(Json(state.registry.approve(&principal, id, req).await?))
}

async fn deny_server(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    Ok(Json(state.registry.deny(&principal, id, req).await?))
}

async fn suspend_server(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    Ok(Json(state.registry.suspend(&principal, id, req).await?))
}

async fn reinstate_server(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
    Json(req): Json<DecisionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    Ok(Json(state.registry.reinstate(&principal, id, req).await?))
}

async fn list_approvals(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_server_id(&id)?;
    Ok(Json(state.registry.list_approvals(&principal, id).await?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuditQueryParams {
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    team: Option<String>,
    server_canonical_id: Option<String>,
    tool_name: Option<String>,
    decision: Option<String>,
    actor: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn parse_decision(raw: &str) -> Result<Decision, ApiError> {
    let all = [
        Decision::Allowed,
        Decision::DeniedServerNotApproved,
        Decision::DeniedToolDenylisted,
        Decision::DeniedTeamNotAuthorized,
        Decision::DeniedHighRisk,
        Decision::DeniedRateLimited,
        Decision::DeniedPayloadTooLarge,
        Decision::TimedOut,
        Decision::Error,
    ];
    all.into_iter()
        .find(|d| d.as_str().eq_ignore_ascii_case(raw))
        .ok_or_else(|| {
            RegistryError::InvalidArgument(format!("unknown decision '{}'", raw)).into()
        })
}

impl AuditQueryParams {
    fn into_filter(self) -> Result<(AuditFilter, Option<i64>, Option<i64>), ApiError> {
        let decision = self.decision.as_deref().map(parse_decision).transpose()?;
        Ok((
            AuditFilter {
                start_date: self.start_date,
                end_date: self.end_date,
                team: self.team,
                server_canonical_id: self.server_canonical_id,
                tool_name: self.tool_name,
                decision,
                actor: self.actor,
            },
            self.limit,
            self.offset,
        ))
    }
}

async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (filter, limit, offset) = params.into_filter()?;
    Ok(Json(state.audit.query(&filter, limit, offset).await?))
}

async fn audit_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (filter, _, _) = params.into_filter()?;
    Ok(Json(state.audit.stats(&filter).await?))
}

async fn scrape_metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics exporter not installed").into_response(),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = match &state.db {
        Some(db) => {
            if db.ping().await.is_ok() {
                "up"
            } else {
                "down"
            }
        }
        None => "disabled",
    };
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::policy::PolicyEngine;
    use crate::application::scan_orchestrator::ScanOrchestrator;
    use crate::config::{GatewayConfig, ScannerConfig};
    use crate::domain::repository::ServerRepository;
    use crate::infrastructure::repositories::{
        InMemoryApprovalRepository, InMemoryAuditRepository, InMemoryScanRepository,
        InMemoryServerRepository,
    };
    use crate::infrastructure::scheduler::{ScanJobSpec, ScanScheduler, SchedulerError, WorkloadState};
    use crate::presentation::auth::{HEADER_ROLES, HEADER_SUBJECT, HEADER_TEAMS};
    use crate::presentation::enforcement::{enforce_mcp, EnforcementState, RateLimits};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NoopScheduler;

    #[async_trait]
    impl ScanScheduler for NoopScheduler {
        async fn submit(&self, _spec: &ScanJobSpec) -> Result<(), SchedulerError> {
            Ok(())
        }
        async fn status(&self, _job_name: &str) -> Result<WorkloadState, SchedulerError> {
            Ok(WorkloadState::Active)
        }
        async fn fetch_output(&self, _job_name: &str) -> Result<String, SchedulerError> {
            Ok("{}".to_string())
        }
        async fn delete(&self, _job_name: &str) -> Result<(), SchedulerError> {
            Ok(())
        }
    }

    struct Fixture {
        router: Router,
        servers: Arc<InMemoryServerRepository>,
        audit: Arc<AuditPipeline>,
    }

    fn fixture(cfg: GatewayConfig) -> Fixture {
        let servers = Arc::new(InMemoryServerRepository::new());
        let scans = Arc::new(InMemoryScanRepository::sharing(&servers));
        let approvals = Arc::new(InMemoryApprovalRepository::sharing(&servers));
        let orchestrator = Arc::new(ScanOrchestrator::new(
            servers.clone(),
            scans.clone(),
            Arc::new(NoopScheduler),
            ScannerConfig::default(),
            cfg.policy.scan_pass_threshold,
        ));
        let registry = Arc::new(RegistryService::new(
            servers.clone(),
            scans,
            approvals,
            orchestrator,
            cfg.policy.scan_pass_threshold,
        ));
        let audit = Arc::new(AuditPipeline::new(
            Arc::new(InMemoryAuditRepository::new()),
            1024,
        ));
        let policy = Arc::new(PolicyEngine::new(&cfg, servers.clone()));

        let state = Arc::new(AppState {
            registry,
            audit: audit.clone(),
            metrics: None,
            db: None,
        });
        let enforcement = Arc::new(EnforcementState {
            policy,
            audit: audit.clone(),
            rate_limits: RateLimits::from_config(&cfg.policy),
        });

        // The downstream MCP proxy seen through the enforcement layer.
        let router = app(state)
            .route(
                "/adapters/{*rest}",
                axum::routing::post(|| async { "downstream ok" }),
            )
            .layer(axum::middleware::from_fn_with_state(enforcement, enforce_mcp));

        Fixture {
            router,
            servers,
            audit,
        }
    }

    fn authed(req: axum::http::request::Builder, subject: &str) -> axum::http::request::Builder {
        req.header(HEADER_SUBJECT, subject)
            .header(HEADER_TEAMS, "team-a")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn register_body() -> String {
        json!({
            "canonicalId": "team-a/weather",
            "name": "weather",
            "ownerTeam": "team-a",
            "sourceType": "ContainerImage",
            "version": "1",
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_register_and_fetch_roundtrip() {
        let fx = fixture(GatewayConfig::default());

        let response = fx
            .router
            .clone()
            .oneshot(
                authed(Request::builder().method("POST").uri("/registry/servers"), "alice")
                    .header("content-type", "application/json")
                    .body(Body::from(register_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["canonicalId"], "team-a/weather");
        assert_eq!(body["status"], "Draft");
        let id = body["id"].as_str().unwrap().to_string();

        let response = fx
            .router
            .clone()
            .oneshot(
                authed(
                    Request::builder().uri(format!("/registry/servers/{}", id)),
                    "alice",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = fx
            .router
            .clone()
            .oneshot(
                authed(
                    Request::builder().uri("/registry/servers/by-canonical-id/team-a/weather"),
                    "alice",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Strangers get 403, ghosts get 404.
        let response = fx
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/registry/servers/{}", id))
                    .header(HEADER_SUBJECT, "mallory")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = fx
            .router
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .uri(format!("/registry/servers/{}", uuid::Uuid::new_v4())),
                    "alice",
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let fx = fixture(GatewayConfig::default());
        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let response = fx
                .router
                .clone()
                .oneshot(
                    authed(Request::builder().method("POST").uri("/registry/servers"), "alice")
                        .header("content-type", "application/json")
                        .body(Body::from(register_body()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), expected);
        }
    }

    #[tokio::test]
    async fn test_enforcement_denies_unapproved_server() {
        let fx = fixture(GatewayConfig::default());
        let call = json!({"method": "tools/call", "params": {"name": "get_weather"}}).to_string();

        let response = fx
            .router
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/adapters/team-a/weather/mcp"),
                    "alice",
                )
                .header("content-type", "application/json")
                .body(Body::from(call))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["decision"], "DeniedServerNotApproved");
        assert_eq!(body["serverCanonicalId"], "team-a/weather");
        assert_eq!(body["toolName"], "get_weather");

        // The would-deny landed in the audit trail.
        fx.audit.drain().await;
        let page = fx
            .audit
            .query(&AuditFilter::default(), None, None)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.events[0].decision, Decision::DeniedServerNotApproved);
        assert!(page.events[0].latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_enforcement_forwards_approved_server() {
        let fx = fixture(GatewayConfig::default());
        // Seed an approved row directly; lifecycle is covered elsewhere.
        let server = crate::domain::server::Server {
            id: crate::domain::server::ServerId::new(),
            canonical_id: "team-a/weather".to_string(),
            name: "weather".to_string(),
            description: None,
            owner_team: "team-a".to_string(),
            source_type: crate::domain::server::SourceType::ContainerImage,
            source_url: None,
            version: "1".to_string(),
            status: crate::domain::server::ServerStatus::Approved,
            declared_tools: vec![],
            mcp_config: None,
            test_endpoint: None,
            tags: vec![],
            created_by: "alice".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            latest_scan_id: None,
            latest_risk_score: Some(0.2),
        };
        fx.servers.create(&server).await.unwrap();

        let call = json!({"method": "tools/call", "params": {"name": "get_weather"}}).to_string();
        let response = fx
            .router
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/adapters/team-a/weather/mcp"),
                    "alice",
                )
                .header("content-type", "application/json")
                .body(Body::from(call))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        fx.audit.drain().await;
        let page = fx
            .audit
            .query(&AuditFilter::default(), None, None)
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.events[0].decision, Decision::Allowed);
        assert_eq!(page.events[0].server_risk_score, Some(0.2));
    }

    #[tokio::test]
    async fn test_registry_paths_not_intercepted() {
        let fx = fixture(GatewayConfig::default());
        let response = fx
            .router
            .clone()
            .oneshot(
                authed(Request::builder().uri("/registry/servers"), "alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_audit_query_rejects_unknown_decision() {
        let fx = fixture(GatewayConfig::default());
        let response = fx
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/registry/audit?decision=NotADecision")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = fx
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/registry/audit?decision=allowed&limit=5")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["total"], 0);
        assert_eq!(body["limit"], 5);
    }

    #[tokio::test]
    async fn test_health_reports_build_info() {
        let fx = fixture(GatewayConfig::default());
        let response = fx
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["database"], "disabled");
    }

    #[tokio::test]
    async fn test_admin_lifecycle_over_http() {
        let fx = fixture(GatewayConfig::default());

        let response = fx
            .router
            .clone()
            .oneshot(
                authed(Request::builder().method("POST").uri("/registry/servers"), "alice")
                    .header("content-type", "application/json")
                    .body(Body::from(register_body()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        // Approve from Draft is an invalid state, not a validation error.
        let response = fx
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/registry/servers/{}/approve", id))
                    .header(HEADER_SUBJECT, "root")
                    .header(HEADER_ROLES, "admin")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"reason": "ok"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Non-admins cannot approve at all.
        let response = fx
            .router
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri(format!("/registry/servers/{}/approve", id)),
                    "alice",
                )
                .header("content-type", "application/json")
                .body(Body::from(json!({"reason": "ok"}).to_string()))
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
