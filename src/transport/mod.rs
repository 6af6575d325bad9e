//! Transport and session layer.
//!
//! Delivers opaque string frames between endpoints over a WebSocket or HTTP
//! long-poll, tracks live connections and correlates requests with
//! responses.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   #id@body / BEEP    ┌──────────────┐
//! │    Client    │◄────────────────────►│    Server    │
//! │              │  WebSocket           │   Registry   │
//! │  Connection  │  or                  │  → Connection│
//! │              │  HTTP long-poll      │  → Connection│
//! └──────────────┘                      └──────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. Handshake: authentication hook accepts, id generated
//! 2. [`Connection`] registered, keep-alive monitor spawned
//! 3. Frames flow; the correlator routes them
//! 4. Disconnect: deregistered, pending requests failed, close hook fired
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Per-peer state and outbound path |
//! | `correlator` | Request/response matching |
//! | `keepalive` | Idle ping and dead-peer detection |
//! | `poll` | Long-poll push queue |
//! | `registry` | Live connections of a server |
//! | `socket` | WebSocket event loop |

// ============================================================================
// Submodules
// ============================================================================

/// Per-peer connection state.
pub mod connection;

/// Request/response correlation.
pub mod correlator;

/// Keep-alive monitor.
pub mod keepalive;

/// Long-poll push state.
pub mod poll;

/// Live connection registry.
pub mod registry;

/// WebSocket event loop.
pub mod socket;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, SocketCommand, TransportKind};
pub use poll::{PollNext, PollReply, PollState};
pub use registry::Registry;
