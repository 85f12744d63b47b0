//! Loopback request layer
//!
//! Validates incoming start/activity/end calls and forwards them to the
//! [`SessionRegistry`]; also answers read-only `/health` and `/sessions`.
//!
//! Routes:
//! - `GET  /health`
//! - `GET  /sessions`
//! - `POST /sessions/{id}/start`    `{pid, projectPath}`
//! - `POST /sessions/{id}/activity` `{details?, smallImageKey?, smallImageText?, priority?}`
//! - `POST /sessions/{id}/end`

use crate::error::Result;
use crate::registry::SessionRegistry;
use crate::resolver::MAX_FIELD_LENGTH;
use crate::session::{ActivityUpdate, SmallImage, StartRequest, UpdatePriority};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Path, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Bodies larger than this are rejected with 413
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Everything a request handler can see
#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<Mutex<SessionRegistry>>,
    /// Whether the presence publisher currently holds a connection
    pub connected: Arc<AtomicBool>,
    pub started: Instant,
}

impl ServerState {
    pub fn new(registry: Arc<Mutex<SessionRegistry>>, connected: Arc<AtomicBool>) -> Self {
        Self {
            registry,
            connected,
            started: Instant::now(),
        }
    }
}

/// `GET /health` reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub connected: bool,
    pub sessions: usize,
    /// Seconds since the server started
    pub uptime: u64,
    pub version: String,
}

/// Bind the loopback listener
pub async fn bind(port: u16) -> Result<TcpListener> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("Request server listening on http://{}", listener.local_addr()?);
    Ok(listener)
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id/start", post(start))
        .route("/sessions/:id/activity", post(activity))
        .route("/sessions/:id/end", post(end))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Serve requests until `shutdown` resolves, then drain in-flight ones.
pub async fn serve<F>(listener: TcpListener, state: ServerState, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
    {
        warn!("Request server failed: {}", e);
    }
    debug!("request server stopped");
}

/// JSON request body; an empty body reads as `{}`
struct JsonBody(Value);

#[axum::async_trait]
impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(request: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(request, state)
            .await
            .map_err(IntoResponse::into_response)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(json!({})));
        }
        serde_json::from_slice(&bytes).map(Self).map_err(|e| {
            debug!("Invalid JSON body: {}", e);
            error(StatusCode::BAD_REQUEST, "Invalid JSON")
        })
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn with_registry<F>(state: &ServerState, f: F) -> Response
where
    F: FnOnce(&mut SessionRegistry) -> Response,
{
    match state.registry.lock() {
        Ok(mut reg) => f(&mut *reg),
        Err(_) => {
            warn!("session registry lock poisoned");
            error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

async fn not_found() -> Response {
    error(StatusCode::NOT_FOUND, "Not found")
}

async fn health(State(state): State<ServerState>) -> Response {
    with_registry(&state, |reg| {
        Json(Health {
            connected: state.connected.load(Ordering::Relaxed),
            sessions: reg.get_session_count(),
            uptime: state.started.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
        .into_response()
    })
}

async fn list_sessions(State(state): State<ServerState>) -> Response {
    with_registry(&state, |reg| Json(reg.get_all_sessions()).into_response())
}

fn invalid(issues: Vec<Value>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Invalid request body", "details": issues })),
    )
        .into_response()
}

fn issue(field: &str, message: &str) -> Value {
    json!({ "path": [field], "message": message })
}

async fn start(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
    JsonBody(body): JsonBody,
) -> Response {
    let request = match validate_start(&body) {
        Ok(request) => request,
        Err(issues) => return invalid(issues),
    };

    with_registry(&state, |reg| {
        // The hook and the agent of one process may both announce the same
        // session; different processes in one folder stay distinct.
        if let Some(existing) = reg
            .sessions()
            .find(|s| s.project_path == request.project_path && s.pid == request.pid)
        {
            debug!(session_id = %existing.session_id, "start deduplicated");
            return Json(json!({
                "sessionId": existing.session_id,
                "projectName": existing.project_name,
            }))
            .into_response();
        }
        let session = reg.start_session(&session_id, request);
        (
            StatusCode::CREATED,
            Json(json!({
                "sessionId": session.session_id,
                "projectName": session.project_name,
            })),
        )
            .into_response()
    })
}

async fn activity(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
    JsonBody(body): JsonBody,
) -> Response {
    let update = match validate_activity(&body) {
        Ok(update) => update,
        Err(issues) => return invalid(issues),
    };

    with_registry(&state, |reg| match reg.update_activity(&session_id, update) {
        Some(session) => {
            Json(json!({ "sessionId": session.session_id, "details": session.details }))
                .into_response()
        }
        None => error(StatusCode::NOT_FOUND, "Session not found"),
    })
}

async fn end(State(state): State<ServerState>, Path(session_id): Path<String>) -> Response {
    with_registry(&state, |reg| {
        if reg.end_session(&session_id) {
            Json(json!({ "ok": true })).into_response()
        } else {
            error(StatusCode::NOT_FOUND, "Session not found")
        }
    })
}

fn validate_start(body: &Value) -> std::result::Result<StartRequest, Vec<Value>> {
    let mut issues = Vec::new();

    let pid = match body.get("pid").and_then(Value::as_u64) {
        Some(pid) if pid > 0 => match u32::try_from(pid) {
            Ok(pid) => Some(pid),
            Err(_) => {
                issues.push(issue("pid", "pid out of range"));
                None
            }
        },
        _ => {
            issues.push(issue("pid", "Expected a positive integer"));
            None
        }
    };

    let project_path = match body.get("projectPath").and_then(Value::as_str) {
        Some(path) if !path.is_empty() => Some(path.to_string()),
        _ => {
            issues.push(issue("projectPath", "Expected a non-empty string"));
            None
        }
    };

    match (pid, project_path) {
        (Some(pid), Some(project_path)) => Ok(StartRequest { pid, project_path }),
        _ => Err(issues),
    }
}

fn validate_activity(body: &Value) -> std::result::Result<ActivityUpdate, Vec<Value>> {
    let mut issues = Vec::new();
    let mut update = ActivityUpdate::default();

    if !body.is_object() {
        return Err(vec![issue("", "Expected an object")]);
    }

    match body.get("details") {
        None | Some(Value::Null) => {}
        Some(Value::String(details)) if details.chars().count() <= MAX_FIELD_LENGTH => {
            update.details = Some(details.clone());
        }
        Some(Value::String(_)) => issues.push(issue(
            "details",
            &format!("String must contain at most {MAX_FIELD_LENGTH} character(s)"),
        )),
        Some(_) => issues.push(issue("details", "Expected string or null")),
    }

    match body.get("smallImageKey") {
        None => {}
        Some(raw) => match serde_json::from_value::<SmallImage>(raw.clone()) {
            Ok(key) => update.small_image_key = Some(key),
            Err(_) => issues.push(issue("smallImageKey", "Unknown image key")),
        },
    }

    match body.get("smallImageText") {
        None => {}
        Some(Value::String(text)) => update.small_image_text = Some(text.clone()),
        Some(_) => issues.push(issue("smallImageText", "Expected string")),
    }

    match body.get("priority") {
        None => {}
        Some(raw) => match serde_json::from_value::<UpdatePriority>(raw.clone()) {
            Ok(priority) => update.priority = Some(priority),
            Err(_) => issues.push(issue("priority", "Expected 'hook' | 'mcp'")),
        },
    }

    if issues.is_empty() {
        Ok(update)
    } else {
        Err(issues)
    }
}
