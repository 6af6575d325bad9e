//! Long-poll client transport.
//!
//! The connection writes frames as usual; this loop relays each one as an
//! HTTP request and keeps one `GET` outstanding for pushes from the server.
//!
//! # Outgoing
//!
//! | Frame | Request |
//! |-------|---------|
//! | Own request (id pending) | `POST` with `session` + `id`; the response body answers it |
//! | Answer to a push | `PUT` with `session` + `id` |
//! | Abandoned request (id retired) | Dropped |
//!
//! # Incoming
//!
//! | `GET` answer | Handling |
//! |--------------|----------|
//! | `200` with `id` | Dispatch the push, answer with `PUT` |
//! | `200` `BEEP` | Poll again |
//! | Any other status, or a transport error | Close |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{HeaderValue, Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::Client as HttpClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use url::Url;

use crate::dispatch::DispatchEngine;
use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::protocol::{Frame, KEEP_ALIVE};
use crate::server::DEFAULT_MAX_BODY;
use crate::server::http::{ID_HEADER, SESSION_HEADER};
use crate::transport::{Connection, SocketCommand, correlator};

// ============================================================================
// PollLink
// ============================================================================

/// HTTP endpoint of one long-poll session.
#[derive(Clone)]
pub(crate) struct PollLink {
    http: HttpClient<HttpConnector, Body>,
    uri: Uri,
    session: HeaderValue,
}

/// Status, `id` header and body of one response.
struct Exchange {
    status: StatusCode,
    id: Option<MessageId>,
    body: String,
}

impl PollLink {
    /// Runs the handshake `POST`; `url` carries the handshake parameters.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if the server answers `401`
    /// - [`Error::Connection`] if the request fails or any other status comes back
    /// - [`Error::Protocol`] if the session id is missing or unusable
    pub(crate) async fn handshake(url: &Url) -> Result<Self> {
        let http = HttpClient::builder(TokioExecutor::new()).build(HttpConnector::new());

        let request = Request::builder()
            .method(Method::POST)
            .uri(parse_uri(url)?)
            .body(Body::empty())?;
        let exchange = send(&http, request).await?;

        match exchange.status {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => return Err(Error::Unauthorized),
            status => {
                return Err(Error::connection(format!(
                    "Handshake failed with status {status}"
                )));
            }
        }

        if exchange.body.is_empty() {
            return Err(Error::protocol("Handshake returned no session id"));
        }
        let session = HeaderValue::from_str(&exchange.body)
            .map_err(|_| Error::protocol("Handshake returned an invalid session id"))?;

        let mut base = url.clone();
        base.set_query(None);

        Ok(Self {
            http,
            uri: parse_uri(&base)?,
            session,
        })
    }

    /// Returns the session id the server assigned.
    #[inline]
    #[must_use]
    pub(crate) fn session(&self) -> &str {
        self.session.to_str().unwrap_or_default()
    }

    async fn exchange(&self, method: Method, id: Option<&MessageId>, body: String) -> Result<Exchange> {
        let mut builder = Request::builder()
            .method(method)
            .uri(self.uri.clone())
            .header(SESSION_HEADER, self.session.clone());
        if let Some(id) = id {
            builder = builder.header(ID_HEADER, id.as_str());
        }
        send(&self.http, builder.body(Body::from(body))?).await
    }

    async fn wait_push(self) -> Result<Exchange> {
        self.exchange(Method::GET, None, String::new()).await
    }
}

fn parse_uri(url: &Url) -> Result<Uri> {
    url.as_str()
        .parse()
        .map_err(|e| Error::config(format!("Invalid URL: {e}")))
}

async fn send(http: &HttpClient<HttpConnector, Body>, request: Request<Body>) -> Result<Exchange> {
    let response = http
        .request(request)
        .await
        .map_err(|e| Error::connection(e.to_string()))?;

    let status = response.status();
    let id = response
        .headers()
        .get(ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(MessageId::from);
    let bytes = to_bytes(Body::new(response.into_body()), DEFAULT_MAX_BODY)
        .await
        .map_err(|e| Error::connection(format!("Failed to read response body: {e}")))?;

    Ok(Exchange {
        status,
        id,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

// ============================================================================
// Event Loop
// ============================================================================

/// Runs the relay until either side closes, then closes the connection.
pub(crate) async fn run(
    link: PollLink,
    connection: Arc<Connection>,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
    engine: Arc<DispatchEngine>,
) {
    let mut poll = Box::pin(link.clone().wait_push());

    loop {
        tokio::select! {
            exchange = &mut poll => {
                match exchange {
                    Ok(exchange) if exchange.status == StatusCode::OK => {
                        on_push(&engine, &connection, exchange);
                    }
                    Ok(exchange) => {
                        debug!(
                            connection_id = %connection.id(),
                            status = %exchange.status,
                            body = exchange.body.as_str(),
                            "Server ended the session"
                        );
                        break;
                    }
                    Err(e) => {
                        warn!(connection_id = %connection.id(), error = %e, "Poll failed");
                        break;
                    }
                }
                poll.set(link.clone().wait_push());
            }

            command = command_rx.recv() => {
                match command {
                    Some(SocketCommand::Write(frame)) => relay(&link, &connection, &frame),
                    Some(SocketCommand::Close) | None => {
                        debug!(connection_id = %connection.id(), "Long-poll client closing");
                        break;
                    }
                }
            }
        }
    }

    connection.close();
}

fn on_push(engine: &Arc<DispatchEngine>, connection: &Arc<Connection>, exchange: Exchange) {
    connection.touch();

    let Some(id) = exchange.id else {
        if exchange.body == KEEP_ALIVE {
            trace!(connection_id = %connection.id(), "Keep-alive received");
        } else {
            debug!(connection_id = %connection.id(), "Dropped push without id");
        }
        return;
    };

    if let Some(body) = correlator::accept_response(connection, &id, exchange.body) {
        let engine = Arc::clone(engine);
        let connection = Arc::clone(connection);
        tokio::spawn(async move {
            correlator::respond(&engine, &connection, id, &body).await;
        });
    }
}

fn relay(link: &PollLink, connection: &Arc<Connection>, frame: &str) {
    let Frame::Message { id, body } = Frame::decode(frame) else {
        trace!(connection_id = %connection.id(), frame, "Skipped frame without id");
        return;
    };

    if connection.is_retired(&id) {
        trace!(connection_id = %connection.id(), %id, "Skipped abandoned request");
        return;
    }

    let link = link.clone();
    let connection = Arc::clone(connection);
    if connection.is_pending(&id) {
        tokio::spawn(async move { call(&link, &connection, id, body).await });
    } else {
        tokio::spawn(async move { answer(&link, &connection, id, body).await });
    }
}

async fn call(link: &PollLink, connection: &Connection, id: MessageId, body: String) {
    match link.exchange(Method::POST, Some(&id), body).await {
        Ok(exchange) if exchange.status == StatusCode::OK => {
            connection.touch();
            if !connection.resolve(&id, exchange.body) {
                debug!(connection_id = %connection.id(), %id, "Response raced a timeout or close");
            }
        }
        Ok(exchange) => {
            let error = Error::connection(format!("Request failed with status {}", exchange.status));
            connection.reject(&id, error);
        }
        Err(e) => {
            connection.reject(&id, e);
        }
    }
}

async fn answer(link: &PollLink, connection: &Connection, id: MessageId, body: String) {
    match link.exchange(Method::PUT, Some(&id), body).await {
        Ok(exchange) if exchange.status == StatusCode::OK => connection.touch(),
        Ok(exchange) => {
            debug!(connection_id = %connection.id(), %id, status = %exchange.status, "Answer refused");
        }
        Err(e) => {
            warn!(connection_id = %connection.id(), %id, error = %e, "Answer failed");
        }
    }
}
