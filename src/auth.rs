//! Authentication context attached to every dispatch call.
//!
//! The authentication hook decides whether a handshake succeeds and, if so,
//! returns opaque claims. Those claims, tagged with the connection id, form
//! the [`AuthContext`] handed to terminal handlers.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use url::form_urlencoded;

use crate::identifiers::ConnectionId;

// ============================================================================
// Types
// ============================================================================

/// Handshake parameters parsed from the request query string.
pub type Params = FxHashMap<String, String>;

// ============================================================================
// AuthContext
// ============================================================================

/// Identity of the peer a call came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthContext {
    /// Connection the call arrived on.
    pub connection_id: ConnectionId,

    /// Claims returned by the authentication hook.
    pub claims: Value,
}

impl AuthContext {
    /// Creates a context from hook-supplied claims.
    #[inline]
    #[must_use]
    pub fn new(connection_id: ConnectionId, claims: Value) -> Self {
        Self {
            connection_id,
            claims,
        }
    }

    /// Creates a context with no claims.
    #[inline]
    #[must_use]
    pub fn anonymous(connection_id: ConnectionId) -> Self {
        Self::new(connection_id, Value::Null)
    }

    /// Looks up a claim by key.
    #[inline]
    #[must_use]
    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }
}

// ============================================================================
// Params
// ============================================================================

/// Parses `a=1&b=two` into a map, percent-decoding keys and values.
///
/// A leading `?` is tolerated. Later duplicates overwrite earlier ones.
#[must_use]
pub fn parse_params(query: Option<&str>) -> Params {
    let Some(query) = query else {
        return Params::default();
    };

    form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
