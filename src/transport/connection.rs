//! Per-peer connection state.
//!
//! A [`Connection`] is created on a successful handshake and lives in the
//! registry until disconnect. It owns:
//!
//! - the correlation map of outgoing requests awaiting a response
//! - the activity timestamp and liveness flag read by the keep-alive monitor
//! - the outbound path: a command channel to the socket event loop, or the
//!   long-poll push state
//!
//! # Thread Safety
//!
//! `Connection` is `Send + Sync` and shared as `Arc<Connection>`. No lock is
//! held across an `.await`.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::auth::AuthContext;
use crate::error::{Error, Result};
use crate::identifiers::{ConnectionId, MessageId};
use crate::protocol::{KEEP_ALIVE, encode};

use super::poll::{PollNext, PollState};

// ============================================================================
// Types
// ============================================================================

/// Map of message ids to response channels.
type CorrelationMap = FxHashMap<MessageId, oneshot::Sender<Result<String>>>;

/// Receiver of one outgoing request's response body.
pub type ResponseReceiver = oneshot::Receiver<Result<String>>;

/// How many abandoned request ids a connection remembers.
pub const RETIRED_CAPACITY: usize = 1024;

/// Outgoing requests: those awaiting a response, and recently abandoned ids
/// whose late responses must be dropped rather than dispatched.
#[derive(Default)]
struct Correlation {
    pending: CorrelationMap,
    retired: VecDeque<MessageId>,
}

impl Correlation {
    fn retire(&mut self, id: MessageId) {
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(id);
    }

    fn is_retired(&self, id: &MessageId) -> bool {
        self.retired.contains(id)
    }
}

// ============================================================================
// TransportKind
// ============================================================================

/// Transport a connection was established over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Persistent WebSocket.
    Socket,
    /// HTTP long-poll.
    HttpPoll,
}

// ============================================================================
// SocketCommand
// ============================================================================

/// Commands for a socket event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    /// Write an encoded frame.
    Write(String),
    /// Close the socket and stop the loop.
    Close,
}

/// Outbound path of a connection.
enum Outbound {
    Channel(mpsc::UnboundedSender<SocketCommand>),
    Poll(Mutex<PollState>),
}

// ============================================================================
// Connection
// ============================================================================

/// State of one authenticated peer.
pub struct Connection {
    id: ConnectionId,
    auth: AuthContext,
    kind: TransportKind,
    correlation: Mutex<Correlation>,
    last_activity: Mutex<Instant>,
    alive: AtomicBool,
    closed: AtomicBool,
    closed_notify: Notify,
    outbound: Outbound,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("pending", &self.pending_count())
            .field("alive", &self.is_alive())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructors
// ============================================================================

impl Connection {
    /// Creates a socket connection writing through `commands`.
    #[must_use]
    pub fn socket(auth: AuthContext, commands: mpsc::UnboundedSender<SocketCommand>) -> Self {
        Self::new(auth, TransportKind::Socket, Outbound::Channel(commands))
    }

    /// Creates the client side of a long-poll session.
    ///
    /// Frames go through `commands` to the loop relaying them as HTTP
    /// requests.
    #[must_use]
    pub fn relay(auth: AuthContext, commands: mpsc::UnboundedSender<SocketCommand>) -> Self {
        Self::new(auth, TransportKind::HttpPoll, Outbound::Channel(commands))
    }

    /// Creates a long-poll connection.
    #[must_use]
    pub fn poll(auth: AuthContext) -> Self {
        Self::new(
            auth,
            TransportKind::HttpPoll,
            Outbound::Poll(Mutex::new(PollState::default())),
        )
    }

    fn new(auth: AuthContext, kind: TransportKind, outbound: Outbound) -> Self {
        Self {
            id: auth.connection_id.clone(),
            auth,
            kind,
            correlation: Mutex::new(Correlation::default()),
            last_activity: Mutex::new(Instant::now()),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            outbound,
        }
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Returns the authentication context.
    #[inline]
    #[must_use]
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Returns the transport kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Returns `false` once a write failed or the transport closed.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Returns `true` once [`close`](Self::close) ran.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the number of outgoing requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().pending.len()
    }

    /// Returns `true` if a long-poll `GET` is parked.
    #[must_use]
    pub fn is_parked(&self) -> bool {
        match &self.outbound {
            Outbound::Poll(state) => state.lock().is_parked(),
            Outbound::Channel(_) => false,
        }
    }

    /// Returns the time since the last frame sent or received.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}

// ============================================================================
// Connection - Activity
// ============================================================================

impl Connection {
    /// Records activity now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Marks the connection dead; the keep-alive monitor tears it down.
    pub fn mark_dead(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            debug!(connection_id = %self.id, "Connection marked dead");
        }
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let notified = self.closed_notify.notified();
        if self.is_closed() {
            return;
        }
        notified.await;
    }
}

// ============================================================================
// Connection - Outbound
// ============================================================================

impl Connection {
    /// Writes a frame with an id to the peer.
    ///
    /// For a long-poll peer the frame is pushed to the parked `GET` or
    /// queued; that does not count as activity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the connection is closed or its
    /// event loop is gone.
    pub fn write(&self, id: &MessageId, body: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        match &self.outbound {
            Outbound::Channel(commands) => {
                commands
                    .send(SocketCommand::Write(encode(Some(id), body)))
                    .map_err(|_| Error::ConnectionClosed)?;
                self.touch();
            }
            // Only the client's own requests count as long-poll activity.
            Outbound::Poll(state) => {
                state.lock().push(id.clone(), body.to_owned());
            }
        }

        trace!(connection_id = %self.id, %id, "Frame written");
        Ok(())
    }

    /// Sends a keep-alive to a peer idle for a full period.
    ///
    /// A long-poll ping answers the parked `GET`; with no `GET` parked the
    /// client has stopped polling and the connection is marked dead. A
    /// failed socket write marks the connection dead too.
    pub fn ping(&self) {
        match &self.outbound {
            Outbound::Channel(commands) => {
                if commands
                    .send(SocketCommand::Write(KEEP_ALIVE.to_owned()))
                    .is_err()
                {
                    warn!(connection_id = %self.id, "Keep-alive write failed");
                    self.mark_dead();
                    return;
                }
            }
            Outbound::Poll(state) => {
                if !state.lock().ping() {
                    debug!(connection_id = %self.id, "No poll within a keep-alive period");
                    self.mark_dead();
                    return;
                }
            }
        }

        trace!(connection_id = %self.id, "Ping");
        self.touch();
    }

    /// Serves a long-poll `GET`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on a socket connection.
    pub fn next_poll(&self) -> Result<PollNext> {
        match &self.outbound {
            Outbound::Poll(state) => {
                self.touch();
                Ok(state.lock().next())
            }
            Outbound::Channel(_) => Err(Error::protocol("long-poll on a socket connection")),
        }
    }

    /// Closes the connection.
    ///
    /// Fails every pending request with [`Error::ConnectionClosed`], stops
    /// the socket loop or answers the parked `GET` with a disconnect, and
    /// wakes [`closed`](Self::closed) waiters. Returns `false` if the
    /// connection was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.alive.store(false, Ordering::Release);

        self.fail_pending();

        match &self.outbound {
            Outbound::Channel(commands) => {
                let _ = commands.send(SocketCommand::Close);
            }
            Outbound::Poll(state) => state.lock().close(),
        }

        self.closed_notify.notify_waiters();
        debug!(connection_id = %self.id, "Connection closed");
        true
    }
}

// ============================================================================
// Connection - Correlation
// ============================================================================

impl Connection {
    /// Registers an outgoing request under a fresh id.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is closed
    /// - [`Error::Protocol`] if `max_pending` requests are outstanding
    pub fn register_pending(&self, max_pending: usize) -> Result<(MessageId, ResponseReceiver)> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let mut correlation = self.correlation.lock();
        let pending = correlation.pending.len();
        if pending >= max_pending {
            warn!(
                connection_id = %self.id,
                pending,
                max = max_pending,
                "Too many pending requests"
            );
            return Err(Error::protocol(format!(
                "Too many pending requests: {pending}/{max_pending}"
            )));
        }

        let mut id = MessageId::generate();
        while correlation.pending.contains_key(&id) || correlation.is_retired(&id) {
            id = MessageId::generate();
        }

        let (tx, rx) = oneshot::channel();
        correlation.pending.insert(id.clone(), tx);
        Ok((id, rx))
    }

    /// Resolves a pending request. Returns `false` for unknown ids.
    pub fn resolve(&self, id: &MessageId, body: String) -> bool {
        let Some(tx) = self.correlation.lock().pending.remove(id) else {
            return false;
        };
        let _ = tx.send(Ok(body));
        true
    }

    /// Fails a pending request with `error`. Returns `false` for unknown ids.
    pub fn reject(&self, id: &MessageId, error: Error) -> bool {
        let Some(tx) = self.correlation.lock().pending.remove(id) else {
            return false;
        };
        let _ = tx.send(Err(error));
        true
    }

    /// Returns `true` if `id` is awaiting a response.
    #[must_use]
    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.correlation.lock().pending.contains_key(id)
    }

    /// Returns `true` if `id` was issued here and abandoned, so a frame
    /// carrying it is a late response.
    #[must_use]
    pub fn is_retired(&self, id: &MessageId) -> bool {
        self.correlation.lock().is_retired(id)
    }

    /// Drops a pending request without resolving it and remembers its id.
    pub fn forget(&self, id: &MessageId) {
        let mut correlation = self.correlation.lock();
        if correlation.pending.remove(id).is_some() {
            correlation.retire(id.clone());
        }
    }

    /// Fails all pending requests with [`Error::ConnectionClosed`].
    fn fail_pending(&self) {
        let pending: Vec<_> = self.correlation.lock().pending.drain().collect();
        let count = pending.len();

        for (_, tx) in pending {
            let _ = tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(connection_id = %self.id, count, "Failed pending requests on close");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
