//! WebSocket event loop.
//!
//! One loop per socket connection, shared by the server (upgraded hyper
//! connection) and the client (`connect_async` stream).
//!
//! # Event Loop
//!
//! The loop multiplexes:
//!
//! - incoming frames from the peer, routed through the correlator
//! - [`SocketCommand`]s from the connection: frame writes and close
//!
//! When the loop ends, for whatever reason, `on_closed` runs once.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::dispatch::DispatchEngine;

use super::connection::{Connection, SocketCommand};
use super::correlator;

// ============================================================================
// Event Loop
// ============================================================================

/// Runs the event loop until either side closes.
pub async fn run<S, F>(
    ws_stream: WebSocketStream<S>,
    connection: Arc<Connection>,
    mut command_rx: mpsc::UnboundedReceiver<SocketCommand>,
    engine: Arc<DispatchEngine>,
    on_closed: F,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: FnOnce() + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            // Incoming frames from the peer
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        trace!(connection_id = %connection.id(), frame = text.as_str(), "Frame received");
                        correlator::on_frame(&engine, &connection, &text);
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!(connection_id = %connection.id(), "WebSocket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        error!(connection_id = %connection.id(), error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!(connection_id = %connection.id(), "WebSocket stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            // Commands from the connection
            command = command_rx.recv() => {
                match command {
                    Some(SocketCommand::Write(frame)) => {
                        if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                            warn!(connection_id = %connection.id(), error = %e, "Failed to write frame");
                            connection.mark_dead();
                        }
                    }

                    Some(SocketCommand::Close) => {
                        debug!(connection_id = %connection.id(), "Close command received");
                        let _ = ws_write.close().await;
                        break;
                    }

                    None => {
                        debug!(connection_id = %connection.id(), "Command channel closed");
                        break;
                    }
                }
            }
        }
    }

    on_closed();

    debug!(connection_id = %connection.id(), "Event loop terminated");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tokio::io::duplex;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::auth::AuthContext;
    use crate::dispatch::Reply;
    use crate::identifiers::ConnectionId;

    async fn pair() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (a, b) = duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn test_request_answered_over_socket() {
        let (server, mut peer) = pair().await;
        let engine = Arc::new(DispatchEngine::new());
        engine.define(|root| {
            root.child("tests")
                .child("echo")
                .define_terminal(|args, _, _| Reply::Ready(serde_json::Value::Object(args)))
                .expect("define");
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection::socket(
            AuthContext::anonymous(ConnectionId::from("c1")),
            tx,
        ));
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let event_loop = tokio::spawn(run(server, Arc::clone(&connection), rx, engine, move || {
            flag.store(true, Ordering::SeqCst);
        }));

        peer.send(Message::Text(
            r##"#m1@{"func":"tests.echo","args":{"tests":{"a":1}}}"##.into(),
        ))
        .await
        .expect("send");

        let reply = loop {
            match peer.next().await {
                Some(Ok(Message::Text(text))) => break text.as_str().to_owned(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected {other:?}"),
            }
        };
        assert_eq!(reply, r##"#m1@{"tests":{"a":1}}"##);

        connection.close();
        event_loop.await.expect("join");
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_remote_close_ends_loop() {
        let (server, mut peer) = pair().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection::socket(
            AuthContext::anonymous(ConnectionId::from("c1")),
            tx,
        ));
        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let event_loop = tokio::spawn(run(
            server,
            Arc::clone(&connection),
            rx,
            Arc::new(DispatchEngine::new()),
            move || flag.store(true, Ordering::SeqCst),
        ));

        peer.close(None).await.expect("close");
        event_loop.await.expect("join");
        assert!(closed.load(Ordering::SeqCst));
    }

    fn endpoint(
        stream: WebSocketStream<tokio::io::DuplexStream>,
        id: &str,
        engine: Arc<DispatchEngine>,
    ) -> Arc<Connection> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection::socket(
            AuthContext::anonymous(ConnectionId::from(id)),
            tx,
        ));
        let closer = Arc::clone(&connection);
        tokio::spawn(run(stream, Arc::clone(&connection), rx, engine, move || {
            closer.close();
        }));
        connection
    }

    #[tokio::test]
    async fn test_late_response_is_dropped_between_two_loops() {
        let (a_stream, b_stream) = pair().await;

        let b_engine = Arc::new(DispatchEngine::new());
        b_engine.define(|root| {
            root.child("slow")
                .define_terminal(|_, _, _| {
                    Reply::deferred(async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        serde_json::json!("late result")
                    })
                })
                .expect("define");
        });

        let a = endpoint(a_stream, "a", Arc::new(DispatchEngine::new()));
        let b = endpoint(b_stream, "b", b_engine);

        let err = correlator::send(&a, r#"{"func":"slow"}"#, 8, Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        // The late answer arrives at ~50ms; an echo would keep both sides busy.
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(a.idle_for() >= Duration::from_millis(200));
        assert!(b.idle_for() >= Duration::from_millis(200));

        a.close();
        b.closed().await;
    }
}
