//! axum routes for the auth API.
//!
//! Handlers only translate between HTTP and [`AuthApi`] or the request
//! gate; every decision is made in the service layer.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::adapters::TailJob;
use crate::domain::{
    AuditEvent, AuthError, MetadataLimits, MetadataValue, Principal, Role, SubjectId, TenantId,
};
use crate::http::extract::{self, bearer_token, client_context};
use crate::http::origin::{OriginLayer, OriginPolicy};
use crate::http::response::{self, HttpError};
use crate::ports::{AuthApi, Clock};
use crate::service::{AuthCore, GuardedAction, GuardedRequest};

const ANALYTICS_ENDPOINT: &str = "analytics-log-event";
const MAX_EVENT_NAME_LEN: usize = 100;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<AuthCore>,
    pub production: bool,
}

impl AppState {
    pub fn new(core: Arc<AuthCore>) -> Self {
        let production = core.config.environment.is_production();
        Self { core, production }
    }

    fn fail(&self, error: AuthError) -> Response {
        HttpError::new(error, self.production).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthInitRequest {
    init_data: String,
    app_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AcceptLegalRequest {
    init_data: String,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogEventRequest {
    action: String,
    resource: Option<String>,
    resource_id: Option<String>,
    meta: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct LoggedEvent {
    event_name: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct UserRef {
    id: SubjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    company_id: Option<TenantId>,
}

#[derive(Debug, Serialize)]
struct SessionView {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_token: Option<String>,
    user: UserRef,
    role: Role,
    #[serde(rename = "companyId")]
    company_id: Option<TenantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl SessionView {
    fn for_principal(principal: &Principal) -> Self {
        Self {
            session_token: None,
            user: UserRef {
                id: principal.subject,
                company_id: principal.tenant_id(),
            },
            role: principal.role,
            company_id: principal.tenant_id(),
            expires_at: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct CsrfView {
    csrf_token: String,
    expires_in_minutes: u64,
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AuthError> {
    serde_json::from_slice(body).map_err(|e| AuthError::MalformedInput(format!("invalid body: {e}")))
}

/// Gate inputs carried by the request headers.
fn guarded_request(
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
) -> Result<GuardedRequest, AuthError> {
    let mut request =
        GuardedRequest::new(bearer_token(headers)?).client(client_context(headers, remote));
    if let Some(key) = extract::idempotency_key(headers) {
        request = request.idempotency_key(key);
    }
    if let Some(token) = extract::csrf_token(headers) {
        request = request.csrf_token(token);
    }
    Ok(request)
}

/// Build the router with origin checks, CORS and request tracing.
pub fn router(core: Arc<AuthCore>) -> Router {
    let state = AppState::new(core);
    let origins = state.core.config.csrf.allowed_origins.clone();
    let policy = OriginPolicy::new(origins.iter().cloned(), state.production);

    let cors = if origins.is_empty() && !state.production {
        CorsLayer::very_permissive()
    } else {
        CorsLayer::new()
            .allow_origin(
                origins
                    .iter()
                    .filter_map(|o| o.parse::<HeaderValue>().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/webhook/auth-init-v2", post(auth_init))
        .route("/webhook/auth-validate-v2", post(auth_validate))
        .route("/webhook/auth-logout", post(auth_logout))
        .route("/webhook/auth-refresh", post(auth_refresh))
        .route("/webhook/csrf-token", get(csrf_token))
        .route("/webhook/auth-accept-legal", post(accept_legal))
        .route("/webhook/analytics-log-event", post(analytics_log_event))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(OriginLayer::new(policy))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn auth_init(
    State(state): State<AppState>,
    remote: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client = client_context(&headers, remote.map(|c| c.0));
    let request: AuthInitRequest = match parse_body(&body) {
        Ok(r) => r,
        Err(e) => return state.fail(e),
    };

    match state
        .core
        .auth
        .auth_init(&request.init_data, request.app_version.as_deref(), &client)
        .await
    {
        Ok(outcome) => response::ok(SessionView {
            session_token: Some(outcome.session_secret.expose().to_string()),
            user: UserRef {
                id: outcome.subject,
                company_id: outcome.tenant_id,
            },
            role: outcome.role,
            company_id: outcome.tenant_id,
            expires_at: Some(outcome.expires_at),
        }),
        Err(e) => state.fail(e),
    }
}

async fn auth_validate(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = async {
        let secret = bearer_token(&headers)?;
        state.core.auth.validate(&secret).await
    };
    match result.await {
        Ok(principal) => response::ok(SessionView::for_principal(&principal)),
        Err(e) => state.fail(e),
    }
}

async fn auth_logout(
    State(state): State<AppState>,
    remote: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let client = client_context(&headers, remote.map(|c| c.0));
    let result = async {
        let secret = bearer_token(&headers)?;
        state.core.auth.logout(&secret, &client).await
    };
    match result.await {
        Ok(()) => response::message("Logged out successfully"),
        Err(e) => state.fail(e),
    }
}

async fn auth_refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = async {
        let secret = bearer_token(&headers)?;
        state.core.auth.refresh(&secret).await
    };
    match result.await {
        Ok(outcome) => {
            let mut view = SessionView::for_principal(&outcome.principal);
            view.expires_at = Some(outcome.expires_at);
            response::ok(view)
        }
        Err(e) => state.fail(e),
    }
}

async fn csrf_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let result = async {
        let secret = bearer_token(&headers)?;
        state.core.auth.csrf_token(&secret).await
    };
    match result.await {
        Ok(token) => response::ok(CsrfView {
            csrf_token: token.token,
            expires_in_minutes: token.expires_in / 60,
        }),
        Err(e) => state.fail(e),
    }
}

async fn accept_legal(
    State(state): State<AppState>,
    remote: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let client = client_context(&headers, remote.map(|c| c.0));
    let result = async {
        let request: AcceptLegalRequest = parse_body(&body)?;
        if request.init_data.trim().is_empty() {
            return Err(AuthError::Unauthorized("Missing initData".into()));
        }
        state
            .core
            .auth
            .accept_legal(&request.init_data, request.version.as_deref(), &client)
            .await
    };
    match result.await {
        Ok(_) => response::message("Legal documents accepted successfully"),
        Err(e) => state.fail(e),
    }
}

async fn analytics_log_event(
    State(state): State<AppState>,
    remote: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let request = guarded_request(&headers, remote.map(|c| c.0))?;
        let event: LogEventRequest = parse_body(&body)?;
        let name = event.action.trim().to_string();
        if name.is_empty() || name.len() > MAX_EVENT_NAME_LEN {
            return Err(AuthError::ValidationFailed(format!(
                "action must be 1..={MAX_EVENT_NAME_LEN} bytes"
            )));
        }
        let metadata = event
            .meta
            .as_ref()
            .map(|meta| MetadataValue::from_json(meta, &MetadataLimits::default()))
            .transpose()?;

        let client = request.client.clone();
        let core = state.core.clone();
        state
            .core
            .gate
            .execute_guarded(
                request,
                &GuardedAction::new(ANALYTICS_ENDPOINT),
                move |principal| async move {
                    let at = core.clock.now();
                    let mut audit = AuditEvent::new(
                        principal.subject,
                        format!("analytics.{name}"),
                        &client,
                        at,
                    );
                    audit.resource_type =
                        Some(event.resource.unwrap_or_else(|| "analytics".into()));
                    audit.resource_id = event.resource_id;
                    if let Some(metadata) = metadata {
                        audit = audit.with_metadata(metadata);
                    }
                    core.tail.dispatch(TailJob::Audit(audit));
                    Ok(LoggedEvent {
                        event_name: name,
                        timestamp: at,
                    })
                },
            )
            .await
    };
    match result.await {
        Ok(guarded) => response::raw_json(guarded.body),
        Err(e) => state.fail(e),
    }
}

async fn health() -> Response {
    response::ok(serde_json::json!({ "status": "ok" }))
}

async fn metrics() -> Response {
    match lumon_telemetry::encode_metrics() {
        Ok(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
