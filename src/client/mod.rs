//! Client endpoint.
//!
//! A [`Client`] connects to a server, calls server functions and serves its
//! own dispatch tree for calls the server makes back. Both transports offer
//! the same API:
//!
//! | Constructor | Transport |
//! |-------------|-----------|
//! | [`Client::connect`] | WebSocket (`ws://`) |
//! | [`Client::connect_http`] | HTTP long-poll (`http://`) |
//!
//! # Example
//!
//! ```no_run
//! use websignals::{Call, Client, Reply};
//!
//! # async fn example() -> websignals::Result<()> {
//! let client = Client::connect("ws://127.0.0.1:8080/wsi", [("token", "123")]).await?;
//!
//! client.define(|root| {
//!     root.child("client")
//!         .child("ping")
//!         .define_terminal(|_, _, _| Reply::ready("pong"))
//!         .map(|_| ())
//! })?;
//!
//! let answer = client.call(Call::to("tests.echo").named("msg", "hi")).await?;
//! println!("{answer}");
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Long-poll client transport.
mod poll;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info};
use url::Url;

use crate::auth::AuthContext;
use crate::dispatch::{DispatchEngine, Node};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Call;
use crate::server::MAX_PENDING_REQUESTS;
use crate::transport::{Connection, correlator, socket};

use self::poll::PollLink;

// ============================================================================
// Client
// ============================================================================

/// A connected client.
///
/// Dropping the client closes the connection.
pub struct Client {
    connection: Arc<Connection>,
    engine: Arc<DispatchEngine>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Connect
// ============================================================================

impl Client {
    /// Connects to a server, passing `params` as handshake query parameters.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `url` is not a valid URL
    /// - [`Error::Unauthorized`] if the server refuses the handshake with `401`
    /// - [`Error::WebSocket`] if the connection or upgrade fails otherwise
    pub async fn connect<I, K, V>(url: &str, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::connect_with_engine(url, params, Arc::new(DispatchEngine::new())).await
    }

    /// Connects with a dispatch engine that is already populated.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_with_engine<I, K, V>(
        url: &str,
        params: I,
        engine: Arc<DispatchEngine>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let url = handshake_url(url, params)?;

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| match e {
            WsError::Http(response) if response.status() == StatusCode::UNAUTHORIZED => {
                Error::Unauthorized
            }
            other => Error::WebSocket(other),
        })?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let auth = AuthContext::anonymous(ConnectionId::generate());
        let connection = Arc::new(Connection::socket(auth, command_tx));

        info!(connection_id = %connection.id(), url = %url, "Connected");

        let closer = Arc::clone(&connection);
        let task = tokio::spawn(socket::run(
            ws_stream,
            Arc::clone(&connection),
            command_rx,
            Arc::clone(&engine),
            move || {
                closer.close();
            },
        ));

        Ok(Self {
            connection,
            engine,
            task: Mutex::new(Some(task)),
        })
    }

    /// Connects over HTTP long-poll, passing `params` as handshake query
    /// parameters.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `url` is not a valid URL
    /// - [`Error::Unauthorized`] if the server refuses the handshake with `401`
    /// - [`Error::Connection`] if the server is unreachable or answers otherwise
    pub async fn connect_http<I, K, V>(url: &str, params: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::connect_http_with_engine(url, params, Arc::new(DispatchEngine::new())).await
    }

    /// Connects over HTTP long-poll with a dispatch engine that is already
    /// populated.
    ///
    /// # Errors
    ///
    /// See [`connect_http`](Self::connect_http).
    pub async fn connect_http_with_engine<I, K, V>(
        url: &str,
        params: I,
        engine: Arc<DispatchEngine>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let url = handshake_url(url, params)?;
        let link = PollLink::handshake(&url).await?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let auth = AuthContext::anonymous(ConnectionId::from(link.session()));
        let connection = Arc::new(Connection::relay(auth, command_tx));

        info!(connection_id = %connection.id(), url = %url, "Connected over long-poll");

        let task = tokio::spawn(poll::run(
            link,
            Arc::clone(&connection),
            command_rx,
            Arc::clone(&engine),
        ));

        Ok(Self {
            connection,
            engine,
            task: Mutex::new(Some(task)),
        })
    }
}

fn handshake_url<I, K, V>(url: &str, params: I) -> Result<Url>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = Url::parse(url).map_err(|e| Error::config(format!("Invalid URL: {e}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key.as_ref(), value.as_ref());
        }
    }
    Ok(url)
}

// ============================================================================
// Client - API
// ============================================================================

impl Client {
    /// Edits the dispatch tree served to the server.
    pub fn define<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Node) -> R,
    {
        self.engine.define(f)
    }

    /// Returns the dispatch engine.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &Arc<DispatchEngine> {
        &self.engine
    }

    /// Calls a server function.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection closes first
    /// - [`Error::Connection`] if a long-poll request fails
    /// - [`Error::Json`] if the response is not JSON
    pub async fn call(&self, call: Call) -> Result<Value> {
        self.call_inner(&call, None).await
    }

    /// Calls a server function with a timeout.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call); also [`Error::RequestTimeout`].
    pub async fn call_with_timeout(&self, call: Call, timeout: Duration) -> Result<Value> {
        self.call_inner(&call, Some(timeout)).await
    }

    async fn call_inner(&self, call: &Call, timeout: Option<Duration>) -> Result<Value> {
        let body = serde_json::to_string(&call.to_envelope())?;
        let response =
            correlator::send(&self.connection, &body, MAX_PENDING_REQUESTS, timeout).await?;
        Ok(serde_json::from_str(&response)?)
    }

    /// Returns `true` until the connection closes.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.connection.is_closed()
    }

    /// Resolves once the connection closes, from either side.
    pub async fn closed(&self) {
        self.connection.closed().await;
    }

    /// Closes the connection and waits for the event loop to finish.
    pub async fn disconnect(&self) {
        self.connection.close();
        let Some(task) = self.task.lock().take() else {
            return;
        };
        if let Err(e) = task.await {
            debug!(error = %e, "Client event loop failed");
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.connection.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::net::TcpListener;

    use crate::auth::Params;
    use crate::dispatch::Reply;
    use crate::server::{Mode, Server, ServerHooks};

    struct TokenHooks;

    #[async_trait]
    impl ServerHooks for TokenHooks {
        async fn authenticate(&self, _: &ConnectionId, params: &Params) -> Option<Value> {
            (params.get("token").map(String::as_str) == Some("123")).then(|| json!({}))
        }
    }

    async fn start_server() -> (Server, String) {
        let (server, addr) = start_server_with(Mode::Socket).await;
        (server, format!("ws://{addr}/wsi"))
    }

    async fn start_poll_server() -> (Server, String) {
        let (server, addr) = start_server_with(Mode::Http).await;
        (server, format!("http://{addr}/wsi"))
    }

    async fn start_server_with(mode: Mode) -> (Server, std::net::SocketAddr) {
        let server = Server::builder()
            .path("/wsi")
            .mode(mode)
            .hooks(TokenHooks)
            .build()
            .expect("build");
        server.define(|root| {
            root.child("tests")
                .child("echo")
                .define_terminal(|args, _, _| {
                    Reply::ready(args.get("echo").cloned().unwrap_or(Value::Null))
                })
                .expect("define");
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = server.start(listener).await.expect("start");
        (server, addr)
    }

    async fn wait_for_clients(server: &Server, count: usize) {
        while server.connection_count() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_client_calls_server() {
        let (server, url) = start_server().await;
        let client = Client::connect(&url, [("token", "123")]).await.expect("connect");

        let answer = client
            .call(Call::to("tests.echo").named("msg", "hi"))
            .await
            .expect("call");
        assert_eq!(answer, json!({"msg": "hi"}));

        let missing = client.call(Call::to("tests.nope")).await.expect("call");
        assert_eq!(missing, json!({"error": "Invalid function"}));

        client.disconnect().await;
        wait_for_clients(&server, 0).await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_server_calls_client() {
        let (server, url) = start_server().await;
        let client = Client::connect(&url, [("token", "123")]).await.expect("connect");
        define_add(&client);

        wait_for_clients(&server, 1).await;
        let id = server.connection_ids().remove(0);
        let sum = server
            .call_with_timeout(&id, Call::to("client.add").arg(2).arg(3), Duration::from_secs(5))
            .await
            .expect("call");
        assert_eq!(sum, json!(5));

        server.stop().await;
        client.closed().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_rejected_handshake() {
        let (server, url) = start_server().await;
        let err = Client::connect(&url, [("token", "bad")]).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
        assert_eq!(server.connection_count(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_server_disconnect_fails_pending_client_call() {
        let (server, url) = start_server().await;
        server.define(|root| {
            root.child("slow")
                .define_terminal(|_, _, done| {
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        done.complete(json!("late"));
                    });
                    Reply::Callback
                })
                .expect("define");
        });
        let client = Arc::new(Client::connect(&url, [("token", "123")]).await.expect("connect"));
        wait_for_clients(&server, 1).await;

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.call(Call::to("slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let id = server.connection_ids().remove(0);
        assert!(server.disconnect(&id));

        let result = pending.await.expect("join");
        assert!(result.is_err());
        server.stop().await;
    }

    fn define_add(client: &Client) {
        client.define(|root| {
            root.child("client")
                .child("add")
                .define_positional_args(["a", "b"])
                .expect("args")
                .define_terminal(|args, _, _| {
                    let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                    let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                    Reply::ready(a + b)
                })
                .expect("define");
        });
    }

    #[tokio::test]
    async fn test_poll_client_calls_server() {
        let (server, url) = start_poll_server().await;
        let client = Client::connect_http(&url, [("token", "123")])
            .await
            .expect("connect");
        assert_eq!(server.connection_ids(), vec![client.connection.id().clone()]);

        let answer = client
            .call(Call::to("tests.echo").named("msg", "hi"))
            .await
            .expect("call");
        assert_eq!(answer, json!({"msg": "hi"}));

        let missing = client.call(Call::to("tests.nope")).await.expect("call");
        assert_eq!(missing, json!({"error": "Invalid function"}));

        client.disconnect().await;
        assert!(!client.is_connected());
        server.stop().await;
    }

    #[tokio::test]
    async fn test_server_calls_poll_client() {
        let (server, url) = start_poll_server().await;
        let client = Client::connect_http(&url, [("token", "123")])
            .await
            .expect("connect");
        define_add(&client);

        let id = client.connection.id().clone();
        for (a, b) in [(2, 3), (10, -4)] {
            let sum = server
                .call_with_timeout(&id, Call::to("client.add").arg(a).arg(b), Duration::from_secs(5))
                .await
                .expect("call");
            assert_eq!(sum, json!(a + b));
        }

        client.disconnect().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_poll_rejected_handshake() {
        let (server, url) = start_poll_server().await;
        let err = Client::connect_http(&url, [("token", "bad")]).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized));
        assert_eq!(server.connection_count(), 0);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_poll_client_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = Client::connect_http(&format!("http://{addr}/wsi"), [("token", "123")])
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn test_server_disconnect_ends_poll_client() {
        let (server, url) = start_poll_server().await;
        let client = Client::connect_http(&url, [("token", "123")])
            .await
            .expect("connect");

        assert!(server.disconnect(client.connection.id()));
        client.closed().await;
        assert!(!client.is_connected());
        server.stop().await;
    }
}
