use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use app::protocol::{
    CategorizeRequest, CategorizeResponse, ChatRequest, ChatResponse, ClearResponse,
    ContextRequest, ContextResponse, ErrorBody, ErrorEnvelope, ExecuteRequest, HistoryResponse,
};
use app::session::{
    AssistantFactory, SessionCommand, SessionConfig, SessionError, SessionErrorKind,
    SessionManagerHandle, SessionOutcome, spawn_session_manager,
};
use assist::llm::{LlmClient, LlmClientImpl};
use assist::{AssistConfig, Assistant, logging};
use axum::Json;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};
use uuid::Uuid;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Clone)]
struct AppConfig {
    bind: String,
    max_sessions: usize,
    max_inflight: usize,
    ingress_capacity: usize,
    request_timeout: Duration,
}

const DEFAULT_BIND: &str = "0.0.0.0:3000";
const DEFAULT_MAX_SESSIONS: usize = 256;
const DEFAULT_MAX_INFLIGHT: usize = 128;
const DEFAULT_INGRESS_CAPACITY: usize = 2048;
const MIN_REQUEST_TIMEOUT_SECONDS: u64 = 120;

const MAX_SESSION_ID_LEN: usize = 64;
const MAX_BODY_LIMIT_BYTES: usize = 1024 * 1024;

const SESSION_HEADER: &str = "x-assist-session-id";
const SESSION_COOKIE: &str = "assist_session";

impl AppConfig {
    fn from_env(assist: &AssistConfig) -> Self {
        // Model round trip plus a full execution must fit.
        let request_timeout = Duration::from_secs(
            assist
                .execution
                .timeout_seconds
                .saturating_mul(4)
                .max(MIN_REQUEST_TIMEOUT_SECONDS),
        );
        Self {
            bind: env::var("ASSIST_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_owned()),
            max_sessions: env_usize("ASSIST_MAX_SESSIONS", DEFAULT_MAX_SESSIONS),
            max_inflight: DEFAULT_MAX_INFLIGHT,
            ingress_capacity: DEFAULT_INGRESS_CAPACITY,
            request_timeout,
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[derive(Clone)]
struct AppState {
    sessions: SessionManagerHandle,
}

async fn healthcheck() -> Response {
    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

async fn log_request_response(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
        "request handled"
    );
    response
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChatRequest>,
) -> Response {
    if payload.message.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "message required",
            "invalid_request_error",
        );
    }
    let command = SessionCommand::Chat {
        message: payload.message,
    };
    let (session_id, outcome) = match dispatch(&state, &headers, command).await {
        Ok(dispatched) => dispatched,
        Err(response) => return response,
    };
    match outcome {
        SessionOutcome::Reply(reply) => session_json(&session_id, ChatResponse::from(reply)),
        other => unexpected_outcome(&other),
    }
}

async fn execute_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ExecuteRequest>,
) -> Response {
    if payload.code.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "code required",
            "invalid_request_error",
        );
    }
    let command = SessionCommand::Execute { code: payload.code };
    let (session_id, outcome) = match dispatch(&state, &headers, command).await {
        Ok(dispatched) => dispatched,
        Err(response) => return response,
    };
    match outcome {
        SessionOutcome::Executed(rendered) => session_json(&session_id, rendered),
        other => unexpected_outcome(&other),
    }
}

async fn history_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session_id, outcome) = match dispatch(&state, &headers, SessionCommand::History).await {
        Ok(dispatched) => dispatched,
        Err(response) => return response,
    };
    match outcome {
        SessionOutcome::History(turns) => session_json(&session_id, HistoryResponse { turns }),
        other => unexpected_outcome(&other),
    }
}

async fn clear_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session_id, outcome) = match dispatch(&state, &headers, SessionCommand::Clear).await {
        Ok(dispatched) => dispatched,
        Err(response) => return response,
    };
    match outcome {
        SessionOutcome::Cleared => session_json(&session_id, ClearResponse { success: true }),
        other => unexpected_outcome(&other),
    }
}

async fn categorize_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CategorizeRequest>,
) -> Response {
    let command = SessionCommand::Categorize { code: payload.code };
    let (session_id, outcome) = match dispatch(&state, &headers, command).await {
        Ok(dispatched) => dispatched,
        Err(response) => return response,
    };
    match outcome {
        SessionOutcome::Categories(scores) => {
            session_json(&session_id, CategorizeResponse::from(scores))
        }
        other => unexpected_outcome(&other),
    }
}

async fn context_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ContextRequest>,
) -> Response {
    let command = SessionCommand::Context {
        query: payload.query,
    };
    let (session_id, outcome) = match dispatch(&state, &headers, command).await {
        Ok(dispatched) => dispatched,
        Err(response) => return response,
    };
    match outcome {
        SessionOutcome::Context(turns) => session_json(&session_id, ContextResponse { turns }),
        other => unexpected_outcome(&other),
    }
}

/// Resolves the caller's session (creating one if absent) and runs `command` on it.
async fn dispatch(
    state: &AppState,
    headers: &HeaderMap,
    command: SessionCommand,
) -> Result<(String, SessionOutcome), Response> {
    let session_id = match session_id_from_transport(headers) {
        Ok(Some(session_id)) => session_id,
        Ok(None) => Uuid::new_v4().to_string(),
        Err((status, message)) => {
            return Err(error_response(status, &message, "invalid_request_error"));
        }
    };
    match state.sessions.call(&session_id, command).await {
        Ok(outcome) => Ok((session_id, outcome)),
        Err(err) => Err(session_error_response(err)),
    }
}

fn session_json<T: Serialize>(session_id: &str, body: T) -> Response {
    let mut response = Json(body).into_response();
    if let Err((status, message)) = set_session_response_headers(&mut response, session_id) {
        return error_response(status, &message, "server_error");
    }
    response
}

fn unexpected_outcome(outcome: &SessionOutcome) -> Response {
    error!(?outcome, "session returned an outcome for a different command");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "unexpected session outcome",
        "server_error",
    )
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn session_error_response(err: SessionError) -> Response {
    let (status, error_type) = match err.kind {
        SessionErrorKind::Overloaded => (StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
        SessionErrorKind::Upstream => (StatusCode::BAD_GATEWAY, "upstream_error"),
        SessionErrorKind::BadRequest => (StatusCode::BAD_REQUEST, "invalid_request_error"),
        SessionErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
    };
    error_response(status, &err.message, error_type)
}

fn error_response(status: StatusCode, message: &str, error_type: &str) -> Response {
    let mut response = Json(ErrorEnvelope {
        error: ErrorBody {
            message: message.to_owned(),
            error_type: error_type.to_owned(),
        },
    })
    .into_response();
    *response.status_mut() = status;
    response
}

fn extract_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header_value in headers.get_all(header::COOKIE).iter() {
        let Ok(cookie_str) = header_value.to_str() else {
            continue;
        };
        for pair in cookie_str.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().unwrap_or("").trim();
            let value = parts.next().unwrap_or("").trim();
            if key == name && !value.is_empty() {
                return Some(value.to_owned());
            }
        }
    }
    None
}

fn validate_session_id(value: &str) -> Option<String> {
    let value = value.trim().trim_matches('"').trim_matches('\'');
    if value.is_empty() || value.len() > MAX_SESSION_ID_LEN || !value.is_ascii() {
        return None;
    }
    Uuid::parse_str(value).ok()?;
    Some(value.to_owned())
}

/// Header first, then cookie. A bad header is an error; a bad cookie is ignored.
fn session_id_from_transport(headers: &HeaderMap) -> Result<Option<String>, (StatusCode, String)> {
    if let Some(value) = headers.get(SESSION_HEADER) {
        let raw = value.to_str().map_err(internal_error)?;
        if let Some(validated) = validate_session_id(raw) {
            return Ok(Some(validated));
        }
        return Err((
            StatusCode::BAD_REQUEST,
            format!("invalid {SESSION_HEADER} header"),
        ));
    }
    Ok(extract_cookie_value(headers, SESSION_COOKIE).and_then(|value| validate_session_id(&value)))
}

fn set_session_response_headers(
    response: &mut Response,
    session_id: &str,
) -> Result<(), (StatusCode, String)> {
    let session_header = HeaderValue::from_str(session_id).map_err(internal_error)?;
    response
        .headers_mut()
        .insert(SESSION_HEADER, session_header);
    let cookie_value = format!("{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax");
    let header_value = HeaderValue::from_str(&cookie_value).map_err(internal_error)?;
    response
        .headers_mut()
        .insert(header::SET_COOKIE, header_value);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init(false);

    let assist_config = AssistConfig::load(None).context("loading configuration")?;
    let config = AppConfig::from_env(&assist_config);
    // One pooled HTTP client serves every session.
    let llm: Arc<dyn LlmClient> =
        Arc::new(LlmClientImpl::from_config(&assist_config.api).context("building model client")?);
    let factory: AssistantFactory =
        Arc::new(move || Assistant::with_llm(assist_config.clone(), llm.clone(), false));

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async move {
        let sessions = spawn_session_manager(
            SessionConfig {
                max_sessions: config.max_sessions,
                ingress_capacity: config.ingress_capacity,
            },
            factory,
        );
        let state = AppState { sessions };
        let api = ServiceBuilder::new()
            .layer(DefaultBodyLimit::max(MAX_BODY_LIMIT_BYTES))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                config.request_timeout,
            ));
        let app = Router::new()
            .route("/api/chat", post(chat_handler))
            .route("/api/execute", post(execute_handler))
            .route("/api/history", get(history_handler))
            .route("/api/clear", post(clear_handler))
            .route("/api/categorize", post(categorize_handler))
            .route("/api/context", post(context_handler))
            .layer(api)
            .route("/healthz", get(healthcheck))
            .layer(CompressionLayer::new())
            .layer(ConcurrencyLimitLayer::new(config.max_inflight))
            .layer(middleware::from_fn(log_request_response))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("binding {}", config.bind))?;
        info!(addr = %config.bind, max_sessions = config.max_sessions, "listening");
        axum::serve(listener, app).await?;
        anyhow::Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_wins_over_cookie() {
        let header_id = Uuid::new_v4().to_string();
        let cookie_id = Uuid::new_v4().to_string();
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_str(&header_id).unwrap());
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE}={cookie_id}")).unwrap(),
        );
        assert_eq!(session_id_from_transport(&headers).unwrap(), Some(header_id));

        headers.remove(SESSION_HEADER);
        assert_eq!(session_id_from_transport(&headers).unwrap(), Some(cookie_id));
    }

    #[test]
    fn malformed_ids_are_handled_by_source() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("assist_session=not-a-uuid"),
        );
        assert_eq!(session_id_from_transport(&headers).unwrap(), None);

        headers.insert(SESSION_HEADER, HeaderValue::from_static("nope"));
        let (status, _) = session_id_from_transport(&headers).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn session_errors_map_to_status_codes() {
        let response = session_error_response(SessionError::overloaded("busy"));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let response = session_error_response(SessionError::internal("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
