//! Request/response correlation.
//!
//! Every inbound `#id@body` frame is either the response to a request this
//! endpoint sent (its id is in the connection's pending map) or a new
//! request from the peer. Responses resolve the stored completion; requests
//! are dispatched and answered under the same id.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, trace};

use crate::dispatch::DispatchEngine;
use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::protocol::Frame;

use super::connection::Connection;

// ============================================================================
// Outgoing
// ============================================================================

/// Sends a request body and waits for the peer's response body.
///
/// # Errors
///
/// - [`Error::ConnectionClosed`] if the connection closes first
/// - [`Error::Protocol`] if `max_pending` requests are outstanding
/// - [`Error::RequestTimeout`] if `limit` elapses first
pub async fn send(
    connection: &Connection,
    body: &str,
    max_pending: usize,
    limit: Option<Duration>,
) -> Result<String> {
    let (id, rx) = connection.register_pending(max_pending)?;

    if let Err(e) = connection.write(&id, body) {
        connection.forget(&id);
        return Err(e);
    }

    trace!(connection_id = %connection.id(), %id, "Request sent");

    let received = match limit {
        Some(limit) => match timeout(limit, rx).await {
            Ok(received) => received,
            Err(_) => {
                connection.forget(&id);
                return Err(Error::request_timeout(
                    id,
                    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                ));
            }
        },
        None => rx.await,
    };

    received.map_err(|_| Error::ConnectionClosed)?
}

// ============================================================================
// Incoming
// ============================================================================

/// Handles one raw inbound frame from a socket peer.
///
/// Requests are dispatched on their own task so responses may complete out
/// of order.
pub fn on_frame(engine: &Arc<DispatchEngine>, connection: &Arc<Connection>, raw: &str) {
    connection.touch();

    match Frame::decode(raw) {
        Frame::KeepAlive => {
            trace!(connection_id = %connection.id(), "Keep-alive received");
        }
        Frame::Invalid => {
            debug!(connection_id = %connection.id(), frame = raw, "Dropped invalid frame");
        }
        Frame::Message { id, body } => {
            if let Some(body) = accept_response(connection, &id, body) {
                let engine = Arc::clone(engine);
                let connection = Arc::clone(connection);
                tokio::spawn(async move {
                    respond(&engine, &connection, id, &body).await;
                });
            }
        }
    }
}

/// Resolves `id` if it is pending and drops late responses to abandoned
/// requests; otherwise hands the body back as a new request.
pub fn accept_response(connection: &Connection, id: &MessageId, body: String) -> Option<String> {
    if connection.is_retired(id) {
        debug!(connection_id = %connection.id(), %id, "Dropped late response to abandoned request");
        return None;
    }

    if !connection.is_pending(id) {
        return Some(body);
    }

    if connection.resolve(id, body) {
        trace!(connection_id = %connection.id(), %id, "Response delivered");
    } else {
        debug!(connection_id = %connection.id(), %id, "Response raced a timeout or close");
    }
    None
}

/// Dispatches a request and writes the result back under the same id.
pub async fn respond(engine: &DispatchEngine, connection: &Connection, id: MessageId, body: &str) {
    let result = engine.respond(body, connection.auth()).await;

    if let Err(e) = connection.write(&id, &result) {
        debug!(connection_id = %connection.id(), %id, error = %e, "Discarded undeliverable result");
    }
}

// ============================================================================
// Tests
// ============================================================================
