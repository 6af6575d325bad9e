//! Server lifecycle hooks.
//!
//! | Hook | Fires | Default |
//! |------|-------|---------|
//! | [`authenticate`](ServerHooks::authenticate) | Each handshake, before the id is issued | Accept with `null` claims |
//! | [`on_client`](ServerHooks::on_client) | Once, after registration | No-op |
//! | [`on_client_closed`](ServerHooks::on_client_closed) | Once, after deregistration | No-op |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::{AuthContext, Params};
use crate::identifiers::ConnectionId;

// ============================================================================
// ServerHooks
// ============================================================================

/// Callbacks into the embedding application.
#[async_trait]
pub trait ServerHooks: Send + Sync + 'static {
    /// Decides a handshake.
    ///
    /// `params` are the handshake query parameters. Return the claims to
    /// attach to every call from this connection, or `None` to reject with
    /// `401`.
    async fn authenticate(&self, connection_id: &ConnectionId, params: &Params) -> Option<Value> {
        let _ = (connection_id, params);
        Some(Value::Null)
    }

    /// Called once a connection is registered.
    async fn on_client(&self, auth: &AuthContext) {
        let _ = auth;
    }

    /// Called once a connection is deregistered.
    async fn on_client_closed(&self, auth: &AuthContext) {
        let _ = auth;
    }
}

/// Hooks that accept everyone and observe nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

#[async_trait]
impl ServerHooks for DefaultHooks {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_hooks_accept() {
        let claims = DefaultHooks
            .authenticate(&ConnectionId::from("c1"), &Params::default())
            .await;
        assert_eq!(claims, Some(Value::Null));
    }
}
