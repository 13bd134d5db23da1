//! SSE/HTTP transport for MCP.
//!
//! Three endpoints behind a fixed middleware chain (request log → Origin
//! validation → CORS → routing):
//!
//! - `GET /sse`: allocates a session, emits one `endpoint` event, then
//!   streams `message` frames from the session's response channel.
//! - `POST /message?sessionId=`: JSON-RPC intake. The 202 only acknowledges
//!   receipt; every response, including errors, is delivered through the
//!   session's SSE channel. Returning results on the POST body would hang
//!   existing MCP clients.
//! - `GET /health`: liveness probe.
//!
//! Origin validation is the only defense against DNS rebinding from AI
//! clients running in browsers or Electron shells.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Query, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::audit::{self, AuditCategory};
use crate::dispatch::{self, ToolContext};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse, code};
use crate::logging::Verbosity;
use crate::session::{SessionHandle, SessionRegistry};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "dkmcp";

/// Hard deadline for handing a response frame to the session channel. A full
/// channel (slow client) converts into a delivery error instead of unbounded
/// buffering.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub ctx: Arc<ToolContext>,
    pub verbosity: Verbosity,
    request_seq: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(ctx: Arc<ToolContext>, verbosity: Verbosity) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            ctx,
            verbosity,
            request_seq: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Build the router with the full middleware chain.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().map(origin_allowed).unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    // .layer wraps everything added before it, so the chain executes
    // request-log first, then Origin validation, then CORS.
    Router::new()
        .route("/sse", get(handle_sse))
        .route("/message", post(handle_message))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(middleware::from_fn(validate_origin))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

/// Allowed origins: http(s) × {localhost, 127.0.0.1, [::1]}, exact or with a
/// numeric port. Everything else (including `localhost.evil.com`) is a 403.
pub fn origin_allowed(origin: &str) -> bool {
    let Some(rest) = origin
        .strip_prefix("http://")
        .or_else(|| origin.strip_prefix("https://"))
    else {
        return false;
    };
    for host in ["localhost", "127.0.0.1", "[::1]"] {
        if rest == host {
            return true;
        }
        if let Some(port) = rest.strip_prefix(host).and_then(|r| r.strip_prefix(':')) {
            if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
                return true;
            }
        }
    }
    false
}

async fn validate_origin(request: Request, next: Next) -> Response {
    // No Origin header means a non-browser client (curl, server-side SDK);
    // those pass. A present header must match the allow-set exactly.
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        let ok = origin.to_str().map(origin_allowed).unwrap_or(false);
        if !ok {
            tracing::warn!(origin = ?origin, "Rejected request with disallowed Origin");
            return (StatusCode::FORBIDDEN, "Forbidden: invalid origin").into_response();
        }
    }
    next.run(request).await
}

async fn log_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    // A web-style client can open hundreds of uninitialized SSE sessions;
    // keep them out of the log below tier 3.
    let noise = path == "/sse";

    if state.verbosity.log_headers() {
        log_sorted_headers("request", request.headers());
    }

    let response = next.run(request).await;
    let status = response.status().as_u16();

    if state.verbosity.log_headers() {
        log_sorted_headers("response", response.headers());
    }

    if noise {
        if state.verbosity.log_sse_noise() {
            tracing::debug!(%method, %path, status, "handled request");
        }
    } else {
        tracing::info!(%method, %path, status, "handled request");
    }

    response
}

fn log_sorted_headers(direction: &str, headers: &HeaderMap) {
    let mut lines: Vec<String> = headers
        .iter()
        .map(|(name, value)| format!("{name}: {}", value.to_str().unwrap_or("<binary>")))
        .collect();
    lines.sort();
    for line in lines {
        tracing::debug!(direction, header = %line);
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Deregisters the session when the SSE stream is dropped, whatever the
/// cause: client disconnect, cancellation, server shutdown.
struct DisconnectGuard {
    state: AppState,
    session_id: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let state = self.state.clone();
        let session_id = std::mem::take(&mut self.session_id);
        tokio::spawn(async move {
            let Some(identity) = state.sessions.unregister(&session_id).await else {
                return;
            };
            // Disconnect log level decision table: uninitialized sessions are
            // noise, the project's own CLI client is routine, anything else
            // is operator-relevant.
            if !identity.initialized {
                if state.verbosity.log_sse_noise() {
                    tracing::debug!(
                        session_id = %session_id,
                        user_agent = %identity.user_agent,
                        "Uninitialized client disconnected"
                    );
                }
            } else if identity.client_name.starts_with("dkmcp-go-client") {
                tracing::debug!(session_id = %session_id, client = %identity.display_name(), "Client disconnected");
            } else {
                tracing::info!(
                    session_id = %session_id,
                    client = %identity.display_name(),
                    user_agent = %identity.user_agent,
                    "Client disconnected"
                );
            }
            audit::record(
                &state.ctx.audit,
                AuditCategory::ClientConnections,
                json!({
                    "event": "disconnect",
                    "session_id": session_id,
                    "client": identity.display_name(),
                }),
            );
        });
    }
}

async fn handle_sse(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let (session_id, mut rx, cancel) = state
        .sessions
        .register(user_agent.clone(), addr.to_string())
        .await;

    if state.verbosity.log_sse_noise() {
        tracing::debug!(session_id = %session_id, user_agent = %user_agent, remote_addr = %addr, "SSE stream opened");
    }
    audit::record(
        &state.ctx.audit,
        AuditCategory::ClientConnections,
        json!({
            "event": "connect",
            "session_id": session_id,
            "user_agent": user_agent,
            "remote_addr": addr.to_string(),
        }),
    );

    let endpoint = format!("/message?sessionId={session_id}");
    let guard = DisconnectGuard {
        state: state.clone(),
        session_id,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        // The endpoint event is the first frame on every stream; the client
        // must not POST before it has the URL.
        yield Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint));
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(frame) => yield Ok(Event::default().event("message").data(frame)),
                    None => break,
                },
                () = cancel.cancelled() => break,
            }
        }
    };

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("ping"),
        ),
    )
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn handle_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> Response {
    let req_no = state.request_seq.fetch_add(1, Ordering::Relaxed) + 1;

    let Some(session_id) = query.session_id else {
        return direct_error(
            StatusCode::BAD_REQUEST,
            None,
            code::INVALID_REQUEST,
            "Missing sessionId",
        );
    };

    if state.verbosity.log_bodies() {
        // Raw bytes first (exactly what the client sent), then the pretty
        // form for humans; both carry the request number for grep-pairing.
        let pretty = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or_else(|| body.clone());
        tracing::info!(session_id = %session_id, raw = %body, "[req#{req_no}] request\n{pretty}");
    }

    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, raw = %body, "Failed to parse JSON-RPC request");
            return direct_error(
                StatusCode::BAD_REQUEST,
                None,
                code::PARSE_ERROR,
                format!("Parse error: {e}"),
            );
        }
    };

    if !request.version_ok() {
        return direct_error(
            StatusCode::BAD_REQUEST,
            request.id,
            code::INVALID_REQUEST,
            format!("Unsupported jsonrpc version '{}'", request.jsonrpc),
        );
    }

    let Some(handle) = state.sessions.handle(&session_id).await else {
        return direct_error(
            StatusCode::BAD_REQUEST,
            request.id,
            code::INVALID_REQUEST,
            "Invalid session ID",
        );
    };

    // Notifications get acknowledged and dropped; they never produce a frame.
    if request.is_notification() {
        return accepted();
    }

    let method = request.method.clone();
    let response = if !handle.initialized && method != "initialize" && method != "ping" {
        audit::record(
            &state.ctx.audit,
            AuditCategory::AccessDenied,
            json!({
                "session_id": session_id,
                "method": method,
                "reason": "Client not initialized",
            }),
        );
        JsonRpcResponse::error(request.id, code::NOT_INITIALIZED, "Client not initialized")
    } else {
        dispatch_method(&state, &session_id, request).await
    };

    if state.verbosity.log_bodies() {
        let pretty = serde_json::to_value(&response)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
            .unwrap_or_default();
        tracing::info!(session_id = %session_id, "[req#{req_no}] response\n{pretty}");
    }

    deliver(&state, &session_id, &handle, response).await
}

async fn dispatch_method(
    state: &AppState,
    session_id: &str,
    request: JsonRpcRequest,
) -> JsonRpcResponse {
    match request.method.as_str() {
        "initialize" => initialize(state, session_id, request.id, &request.params).await,
        "tools/list" => dispatch::tools_list(request.id),
        "tools/call" => dispatch::tools_call(&state.ctx, request.id, &request.params).await,
        "ping" => JsonRpcResponse::success(request.id, json!({})),
        _ => JsonRpcResponse::error(request.id, code::METHOD_NOT_FOUND, "Method not found"),
    }
}

async fn initialize(
    state: &AppState,
    session_id: &str,
    id: Option<Value>,
    params: &Value,
) -> JsonRpcResponse {
    let client_name = params
        .pointer("/clientInfo/name")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let client_version = params
        .pointer("/clientInfo/version")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    state
        .sessions
        .mark_initialized(session_id, client_name, client_version)
        .await;

    let display_name = if client_name.is_empty() {
        "(empty name)"
    } else {
        client_name
    };
    tracing::info!(session_id = %session_id, client = %display_name, version = %client_version, "Client initialized");
    audit::record(
        &state.ctx.audit,
        AuditCategory::ClientConnections,
        json!({
            "event": "initialize",
            "session_id": session_id,
            "client": client_name,
            "version": client_version,
        }),
    );

    JsonRpcResponse::success(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {
                "tools": {}
            }
        }),
    )
}

/// Hand the response frame to the session's SSE channel with a three-way
/// select: accepted, session gone, or timeout. The HTTP 202 only confirms
/// receipt; the real result is the SSE frame.
async fn deliver(
    state: &AppState,
    session_id: &str,
    handle: &SessionHandle,
    response: JsonRpcResponse,
) -> Response {
    let frame = response.to_frame();

    tokio::select! {
        result = handle.tx.send(frame) => match result {
            Ok(()) => accepted(),
            Err(_) => direct_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
                code::INTERNAL_ERROR,
                "Client disconnected",
            ),
        },
        () = handle.cancel.cancelled() => direct_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            code::INTERNAL_ERROR,
            "Client disconnected",
        ),
        () = tokio::time::sleep(SEND_TIMEOUT) => {
            tracing::warn!(session_id = %session_id, "Timed out handing response to SSE channel");
            direct_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                None,
                code::INTERNAL_ERROR,
                "Timeout sending response",
            )
        }
    }
}

fn accepted() -> Response {
    (StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))).into_response()
}

fn direct_error(
    status: StatusCode,
    id: Option<Value>,
    code: i32,
    message: impl Into<String>,
) -> Response {
    (status, Json(JsonRpcResponse::error(id, code, message))).into_response()
}
