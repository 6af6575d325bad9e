//! websignals - Bidirectional RPC over WebSocket with an HTTP long-poll fallback.
//!
//! Both endpoints expose a tree of named functions and call each other's
//! functions by dot-delimited address (`tests.echo`, `product.sub.get`).
//! Every request carries a message id; the response comes back under the
//! same id, so many calls can be in flight on one connection.
//!
//! # Architecture
//!
//! - **Server**: authenticates handshakes, serves the dispatch tree and
//!   calls connected clients. Runs over WebSocket, long-poll HTTP or both.
//! - **Client**: connects over WebSocket or long-poll HTTP, serves its own
//!   dispatch tree and calls the server.
//!
//! Key design principles:
//!
//! - Frames are plain text: `#id@body`, or `BEEP` for keep-alive
//! - Dispatch failures are answered as `{"error": message}`, never dropped
//! - Each connection owns its pending request map; closing it fails them all
//! - A keep-alive monitor tears down connections that stop responding
//!
//! # Quick Start
//!
//! ```no_run
//! use serde_json::Value;
//! use tokio::net::TcpListener;
//! use websignals::{Call, Client, Reply, Result, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Server::builder().path("/wsi").build()?;
//!     server.define(|root| {
//!         root.child("tests")
//!             .child("echo")
//!             .define_terminal(|args, _, _| {
//!                 Reply::ready(args.get("echo").cloned().unwrap_or(Value::Null))
//!             })
//!             .map(|_| ())
//!     })?;
//!
//!     let addr = server.start(TcpListener::bind("127.0.0.1:0").await?).await?;
//!
//!     let url = format!("ws://{addr}/wsi");
//!     let client = Client::connect(&url, [("token", "123")]).await?;
//!     let answer = client.call(Call::to("tests.echo").named("msg", "hi")).await?;
//!     println!("{answer}");
//!
//!     server.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Handshake parameters and [`AuthContext`] |
//! | [`client`] | [`Client`] endpoint over either transport |
//! | [`dispatch`] | Dispatch tree and resolution |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Frames, envelopes and the [`Call`] builder |
//! | [`server`] | [`Server`] endpoint and configuration |
//! | [`transport`] | Connections, correlation and keep-alive (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Handshake authentication.
pub mod auth;

/// Client endpoint.
pub mod client;

/// Dispatch tree and resolution.
///
/// Build a tree with [`Node::child`] and the `define_*` methods.
pub mod dispatch;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for connections and messages.
pub mod identifiers;

/// Wire protocol types.
pub mod protocol;

/// Server endpoint.
///
/// Use [`Server::builder()`] to create a configured server.
pub mod server;

/// Connection and transport layer.
///
/// Internal module handling socket loops, long-poll state and correlation.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Auth types
pub use auth::{AuthContext, Params};

// Client types
pub use client::Client;

// Dispatch types
pub use dispatch::{ArgPlacement, Args, Completion, DispatchEngine, Node, Reply};

// Error types
pub use error::{DispatchError, Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, MessageId};

// Protocol types
pub use protocol::Call;

// Server types
pub use server::{DefaultHooks, Mode, Server, ServerBuilder, ServerHooks, ServerOptions};
