//! Server endpoint.
//!
//! Owns the dispatch tree, the registry of live connections and the hooks.
//! The HTTP surface is exposed as an [`axum::Router`] to embed, or served
//! directly with [`Server::start`].

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::auth::{AuthContext, Params};
use crate::dispatch::{DispatchEngine, Node};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::Call;
use crate::transport::{Connection, Registry, correlator, keepalive};

use super::builder::ServerBuilder;
use super::hooks::ServerHooks;
use super::http;
use super::options::ServerOptions;

// ============================================================================
// Shared
// ============================================================================

/// State shared by the server handle and its HTTP handlers.
pub(crate) struct Shared {
    pub(crate) options: ServerOptions,
    pub(crate) engine: Arc<DispatchEngine>,
    pub(crate) registry: Registry,
    hooks: Arc<dyn ServerHooks>,
}

impl Shared {
    /// Runs the authentication hook for a new handshake.
    pub(crate) async fn authenticate(&self, params: &Params) -> Option<AuthContext> {
        let connection_id = self.registry.fresh_id();
        match self.hooks.authenticate(&connection_id, params).await {
            Some(claims) => Some(AuthContext::new(connection_id, claims)),
            None => {
                debug!(%connection_id, "Handshake rejected");
                None
            }
        }
    }

    /// Registers an authenticated connection and starts its monitor.
    pub(crate) fn admit(self: &Arc<Self>, connection: Arc<Connection>) -> Result<()> {
        self.registry.insert(Arc::clone(&connection))?;

        let shared = Arc::downgrade(self);
        let connection_id = connection.id().clone();
        keepalive::spawn(Arc::clone(&connection), self.options.keep_alive, move || {
            if let Some(shared) = shared.upgrade() {
                shared.disconnect(&connection_id);
            }
        });

        // Both hooks run on one task so they fire in order, once each.
        let hooks = Arc::clone(&self.hooks);
        tokio::spawn(async move {
            hooks.on_client(connection.auth()).await;
            connection.closed().await;
            hooks.on_client_closed(connection.auth()).await;
        });

        Ok(())
    }

    /// Deregisters and closes a connection. Returns `false` if it was not
    /// registered.
    pub(crate) fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        let Some(connection) = self.registry.remove(connection_id) else {
            return false;
        };
        connection.close();
        info!(%connection_id, kind = ?connection.kind(), "Client disconnected");
        true
    }

    fn disconnect_all(&self) -> usize {
        let connections = self.registry.drain();
        for connection in &connections {
            connection.close();
        }
        connections.len()
    }
}

// ============================================================================
// Running
// ============================================================================

/// A server started with [`Server::start`].
struct Running {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

// ============================================================================
// Server
// ============================================================================

/// The server endpoint.
///
/// # Example
///
/// ```no_run
/// use serde_json::Value;
/// use tokio::net::TcpListener;
/// use websignals::{Mode, Reply, Server};
///
/// # async fn example() -> websignals::Result<()> {
/// let server = Server::builder().path("/wsi").mode(Mode::Http).build()?;
///
/// server.define(|root| {
///     root.child("tests")
///         .child("echo")
///         .define_terminal(|args, _, _| {
///             Reply::ready(args.get("echo").cloned().unwrap_or(Value::Null))
///         })
///         .map(|_| ())
/// })?;
///
/// let addr = server.start(TcpListener::bind("127.0.0.1:0").await?).await?;
/// println!("Listening on {addr}");
/// # Ok(())
/// # }
/// ```
pub struct Server {
    pub(super) shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("options", &self.shared.options)
            .field("connections", &self.shared.registry.len())
            .field("running", &self.local_addr())
            .finish()
    }
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Creates a new server builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Creates a server from validated options.
    pub(crate) fn new(options: ServerOptions, hooks: Arc<dyn ServerHooks>) -> Self {
        Self {
            shared: Arc::new(Shared {
                options,
                engine: Arc::new(DispatchEngine::new()),
                registry: Registry::new(),
                hooks,
            }),
            running: Mutex::new(None),
        }
    }
}

// ============================================================================
// Server - Definitions
// ============================================================================

impl Server {
    /// Edits the dispatch tree.
    pub fn define<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Node) -> R,
    {
        self.shared.engine.define(f)
    }

    /// Returns the dispatch engine.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &Arc<DispatchEngine> {
        &self.shared.engine
    }

    /// Returns the options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.shared.options
    }
}

// ============================================================================
// Server - Lifecycle
// ============================================================================

impl Server {
    /// Returns the router serving the configured path.
    #[must_use]
    pub fn router(&self) -> Router {
        http::router(Arc::clone(&self.shared))
    }

    /// Serves the router on `listener` until [`stop`](Self::stop).
    ///
    /// Returns the bound address.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if already started
    /// - [`Error::Io`] if the listener has no local address
    pub async fn start(&self, listener: TcpListener) -> Result<SocketAddr> {
        let addr = listener.local_addr()?;
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::config("Server already started"));
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!(address = %addr, path = %self.shared.options.path, "Server listening");

        *running = Some(Running {
            addr,
            shutdown_tx,
            task,
        });
        Ok(addr)
    }

    /// Disconnects every client and stops serving.
    ///
    /// Does nothing if the server is not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        let count = self.shared.disconnect_all();
        debug!(count, "Disconnected clients on stop");

        let _ = running.shutdown_tx.send(());
        match running.task.await {
            Ok(Ok(())) => info!(address = %running.addr, "Server stopped"),
            Ok(Err(e)) => error!(error = %e, "Server terminated with error"),
            Err(e) => error!(error = %e, "Server task failed"),
        }
    }

    /// Returns the bound address while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|running| running.addr)
    }
}

// ============================================================================
// Server - Clients
// ============================================================================

impl Server {
    /// Calls a function on a connected client.
    ///
    /// Uses the configured request timeout, if any.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionNotFound`] if no such client is connected
    /// - [`Error::ConnectionClosed`] if the client disconnects first
    /// - [`Error::RequestTimeout`] if the configured timeout elapses
    /// - [`Error::Json`] if the response is not JSON
    pub async fn call(&self, connection_id: &ConnectionId, call: Call) -> Result<Value> {
        self.call_inner(connection_id, &call, self.shared.options.request_timeout)
            .await
    }

    /// Calls a function on a connected client with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_with_timeout(
        &self,
        connection_id: &ConnectionId,
        call: Call,
        timeout: Duration,
    ) -> Result<Value> {
        self.call_inner(connection_id, &call, Some(timeout)).await
    }

    async fn call_inner(
        &self,
        connection_id: &ConnectionId,
        call: &Call,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let connection = self
            .shared
            .registry
            .get(connection_id)
            .ok_or_else(|| Error::connection_not_found(connection_id.clone()))?;

        let body = serde_json::to_string(&call.to_envelope())?;
        let response = correlator::send(
            &connection,
            &body,
            self.shared.options.max_pending,
            timeout,
        )
        .await?;

        Ok(serde_json::from_str(&response)?)
    }

    /// Disconnects a client. Returns `false` if it was not connected.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        self.shared.disconnect(connection_id)
    }

    /// Returns the number of connected clients.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Returns the ids of connected clients.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.shared.registry.ids()
    }

    /// Returns the authentication context of a connected client.
    #[must_use]
    pub fn auth(&self, connection_id: &ConnectionId) -> Option<AuthContext> {
        self.shared
            .registry
            .get(connection_id)
            .map(|connection| connection.auth().clone())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            self.shared.disconnect_all();
            let _ = running.shutdown_tx.send(());
        }
    }
}
