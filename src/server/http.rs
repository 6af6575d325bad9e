//! HTTP surface.
//!
//! One route on the configured path serves both transports:
//!
//! | Request | Handling |
//! |---------|----------|
//! | `GET` + `Upgrade: websocket` | Socket handshake: `101` or `401` |
//! | `OPTIONS` | CORS preflight, `200` |
//! | `POST` without a known `session` | Long-poll handshake: id or `401` |
//! | `GET` with `session` | Long-poll: queued push, or park |
//! | `POST` with `session` + `id` | Client request, answered in the body |
//! | `PUT` with `session` + `id` | Answer to a push |
//!
//! Every long-poll response carries the CORS headers.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{debug, info, trace, warn};

use crate::auth::parse_params;
use crate::identifiers::{ConnectionId, MessageId};
use crate::protocol::KEEP_ALIVE;
use crate::transport::{Connection, PollNext, PollReply, TransportKind, correlator, socket};

use super::core::Shared;
use super::options::Mode;

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the long-poll connection id.
pub const SESSION_HEADER: HeaderName = HeaderName::from_static("session");

/// Header carrying the message id.
pub const ID_HEADER: HeaderName = HeaderName::from_static("id");

/// Body of a long-poll teardown response.
pub const DISCONNECT_BODY: &str = "DSC";

/// Body of a long-poll request without a valid session.
const INVALID_METHOD_BODY: &str = "Invalid method for authorization!";

// ============================================================================
// Router
// ============================================================================

/// Builds the router for the configured path.
pub(crate) fn router(shared: Arc<Shared>) -> Router {
    let path = shared.options.path.clone();
    Router::new().route(&path, any(handle)).with_state(shared)
}

async fn handle(State(shared): State<Arc<Shared>>, request: Request) -> Response {
    trace!(method = %request.method(), uri = %request.uri(), "Incoming request");

    if is_upgrade(request.headers()) && shared.options.is_enabled(Mode::Socket) {
        return socket_handshake(shared, request).await;
    }

    if shared.options.is_enabled(Mode::Http) {
        let mut response = poll_request(shared, request).await;
        set_cors_headers(response.headers_mut());
        return response;
    }

    (StatusCode::BAD_REQUEST, "Expected WebSocket upgrade").into_response()
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
    upgrade && connection
}

fn set_cors_headers(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("id, session"),
    );
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("id, session"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT"),
    );
}

/// Builds a response with an optional `id` header.
fn reply(status: StatusCode, id: Option<&MessageId>, body: impl Into<Body>) -> Response {
    let mut response = (status, body.into()).into_response();
    if let Some(id) = id
        && let Ok(value) = HeaderValue::from_str(id.as_str())
    {
        response.headers_mut().insert(ID_HEADER, value);
    }
    response
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Socket Handshake
// ============================================================================

async fn socket_handshake(shared: Arc<Shared>, mut request: Request) -> Response {
    let Some(key) = request.headers().get(SEC_WEBSOCKET_KEY).cloned() else {
        return (StatusCode::BAD_REQUEST, "Missing Sec-WebSocket-Key").into_response();
    };

    let params = parse_params(request.uri().query());
    let Some(auth) = shared.authenticate(&params).await else {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    };

    let Some(on_upgrade) = request.extensions_mut().remove::<OnUpgrade>() else {
        warn!("Upgrade requested on a connection that cannot be upgraded");
        return (StatusCode::UPGRADE_REQUIRED, "Connection not upgradable").into_response();
    };

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let connection = Arc::new(Connection::socket(auth, command_tx));
    if let Err(e) = shared.admit(Arc::clone(&connection)) {
        warn!(error = %e, "Failed to register connection");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    info!(connection_id = %connection.id(), "Socket client connected");

    tokio::spawn(async move {
        let connection_id = connection.id().clone();
        match on_upgrade.await {
            Ok(upgraded) => {
                let ws_stream =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                let engine = Arc::clone(&shared.engine);
                let closer = Arc::downgrade(&shared);
                socket::run(ws_stream, connection, command_rx, engine, move || {
                    if let Some(shared) = closer.upgrade() {
                        shared.disconnect(&connection_id);
                    }
                })
                .await;
            }
            Err(e) => {
                warn!(%connection_id, error = %e, "WebSocket upgrade failed");
                shared.disconnect(&connection_id);
            }
        }
    });

    let accept = derive_accept_key(key.as_bytes());
    let mut response = StatusCode::SWITCHING_PROTOCOLS.into_response();
    let headers = response.headers_mut();
    headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    if let Ok(accept) = HeaderValue::from_str(&accept) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    }
    response
}

// ============================================================================
// Long-Poll
// ============================================================================

async fn poll_request(shared: Arc<Shared>, request: Request) -> Response {
    let method = request.method().clone();
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }

    let connection = header_str(request.headers(), &SESSION_HEADER)
        .map(ConnectionId::from)
        .and_then(|id| shared.registry.get(&id))
        .filter(|connection| connection.kind() == TransportKind::HttpPoll);

    let Some(connection) = connection else {
        if method == Method::POST {
            return poll_handshake(&shared, request.uri().query()).await;
        }
        return reply(StatusCode::UNAUTHORIZED, None, INVALID_METHOD_BODY);
    };

    trace!(connection_id = %connection.id(), %method, "Long-poll request");

    let id = header_str(request.headers(), &ID_HEADER).map(MessageId::from);

    match method {
        Method::GET => poll_get(shared, connection).await,
        Method::PUT => match read_body(request, shared.options.max_body).await {
            Ok(body) => poll_put(&connection, id, body),
            Err(response) => response,
        },
        Method::POST => {
            let Some(id) = id else {
                return reply(StatusCode::BAD_REQUEST, None, "Missing id header");
            };
            match read_body(request, shared.options.max_body).await {
                Ok(body) => poll_post(&shared, &connection, id, body).await,
                Err(response) => response,
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// Reads a request body of at most `limit` bytes.
///
/// A longer body, or one that fails mid-read, is answered with `413`.
async fn read_body(request: Request, limit: usize) -> Result<String, Response> {
    match to_bytes(request.into_body(), limit).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            debug!(error = %e, limit, "Rejected request body");
            Err(reply(StatusCode::PAYLOAD_TOO_LARGE, None, Body::empty()))
        }
    }
}

async fn poll_handshake(shared: &Arc<Shared>, query: Option<&str>) -> Response {
    let params = parse_params(query);
    let Some(auth) = shared.authenticate(&params).await else {
        return reply(StatusCode::UNAUTHORIZED, None, Body::empty());
    };

    let connection = Arc::new(Connection::poll(auth));
    let connection_id = connection.id().clone();
    if let Err(e) = shared.admit(connection) {
        warn!(error = %e, "Failed to register connection");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(%connection_id, "Long-poll client connected");
    reply(StatusCode::OK, None, connection_id.into_inner())
}

async fn poll_get(shared: Arc<Shared>, connection: Arc<Connection>) -> Response {
    let next = match connection.next_poll() {
        Ok(next) => next,
        Err(e) => return reply(StatusCode::BAD_REQUEST, None, e.to_string()),
    };

    let answer = match next {
        PollNext::Now(answer) => answer,
        PollNext::Parked(rx) => {
            let guard = ParkGuard::new(shared, connection.id().clone());
            let answer = rx.await.unwrap_or(PollReply::Disconnect);
            guard.disarm();
            answer
        }
    };

    match answer {
        PollReply::Frame { id, body } => reply(StatusCode::OK, Some(&id), body),
        PollReply::KeepAlive => reply(StatusCode::OK, None, KEEP_ALIVE),
        PollReply::Disconnect => reply(StatusCode::BAD_REQUEST, None, DISCONNECT_BODY),
    }
}

fn poll_put(connection: &Connection, id: Option<MessageId>, body: String) -> Response {
    connection.touch();
    if id.as_ref().is_some_and(|id| connection.resolve(id, body)) {
        trace!(connection_id = %connection.id(), ?id, "Push answered");
    } else {
        warn!(connection_id = %connection.id(), ?id, "Ignored answer for unknown id");
    }
    reply(StatusCode::OK, None, Body::empty())
}

async fn poll_post(
    shared: &Shared,
    connection: &Connection,
    id: MessageId,
    body: String,
) -> Response {
    connection.touch();

    let Some(body) = correlator::accept_response(connection, &id, body) else {
        return reply(StatusCode::OK, Some(&id), Body::empty());
    };

    let result = shared.engine.respond(&body, connection.auth()).await;
    connection.touch();
    reply(StatusCode::OK, Some(&id), result)
}

// ============================================================================
// ParkGuard
// ============================================================================

/// Disconnects the client if a parked `GET` is dropped before it is
/// answered, which is how a client closing the request surfaces.
struct ParkGuard {
    shared: Arc<Shared>,
    connection_id: ConnectionId,
    armed: bool,
}

impl ParkGuard {
    fn new(shared: Arc<Shared>, connection_id: ConnectionId) -> Self {
        Self {
            shared,
            connection_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ParkGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(connection_id = %self.connection_id, "Parked poll dropped by client");
            self.shared.disconnect(&self.connection_id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
