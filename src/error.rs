//! Error types for websignals.
//!
//! This module defines the error types used throughout the crate. There are
//! two families:
//!
//! - [`enum@Error`] covers transport, session and API failures. These are
//!   returned to Rust callers through [`Result<T>`].
//! - [`DispatchError`] covers dispatch-level failures. These never cross the
//!   transport boundary as errors; they are rendered as `{"error": message}`
//!   payloads inside a normal response frame.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::Definition`] |
//! | Session | [`Error::Unauthorized`], [`Error::ConnectionNotFound`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::RequestTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde_json::{Value, json};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{ConnectionId, MessageId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when server options fail validation.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Dispatch tree definition error.
    ///
    /// Returned when a node's args, passthrough or terminal is redefined.
    #[error("Definition error: {message}")]
    Definition {
        /// Description of the conflicting definition.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Handshake rejected by the authentication hook.
    #[error("Unauthorized")]
    Unauthorized,

    /// No live connection with the given id.
    #[error("Connection not found: {connection_id}")]
    ConnectionNotFound {
        /// The unknown connection id.
        connection_id: ConnectionId,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Connection failed.
    ///
    /// Returned when a long-poll request cannot reach the server or is
    /// answered with an unexpected status.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed while a request was in flight, or before a write.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected response.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Outgoing request timed out waiting for its response.
    #[error("Request {message_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The message id that timed out.
        message_id: MessageId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP request construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] axum::http::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a definition error.
    #[inline]
    pub fn definition(message: impl Into<String>) -> Self {
        Self::Definition {
            message: message.into(),
        }
    }

    /// Creates a connection-not-found error.
    #[inline]
    pub fn connection_not_found(connection_id: ConnectionId) -> Self {
        Self::ConnectionNotFound { connection_id }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(message_id: MessageId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            message_id,
            timeout_ms,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::ConnectionNotFound { .. }
                | Self::WebSocket(_)
        )
    }
}

// ============================================================================
// DispatchError
// ============================================================================

/// Dispatch-level failure, delivered to the caller as data.
///
/// Each variant renders to `{"error": <message>}` via [`DispatchError::to_value`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The request body is not valid JSON.
    #[error("Invalid message body")]
    MalformedEnvelope,

    /// `func` is missing or not a string.
    #[error("Function address must be string")]
    InvalidAddress,

    /// A segment is not registered, or the last segment has no terminal.
    #[error("Invalid function")]
    UnknownFunction,

    /// The handler's result could not be converted to JSON.
    #[error("Unable to compile response!")]
    UnserializableResult,

    /// The terminal dropped its completion without answering.
    #[error("Function produced no result")]
    NoResult,

    /// Error raised by handler code.
    #[error("{0}")]
    Handler(String),
}

impl DispatchError {
    /// Creates a handler error with a custom message.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Renders the error as its wire payload.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

// ============================================================================
// Tests
// ============================================================================
