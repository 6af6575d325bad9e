//! Builder pattern for server configuration.
//!
//! Provides a fluent API for configuring and creating [`Server`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use websignals::{Mode, Server};
//!
//! # fn example() -> websignals::Result<()> {
//! let server = Server::builder()
//!     .path("/wsi")
//!     .mode(Mode::Http)
//!     .keep_alive(Duration::from_secs(15))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};

use super::core::Server;
use super::hooks::{DefaultHooks, ServerHooks};
use super::options::{Mode, ServerOptions};

// ============================================================================
// ServerBuilder
// ============================================================================

/// Builder for configuring a [`Server`] instance.
///
/// Use [`Server::builder()`] to create a new builder.
#[derive(Clone)]
pub struct ServerBuilder {
    /// Server options.
    options: ServerOptions,
    /// Lifecycle hooks.
    hooks: Arc<dyn ServerHooks>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ServerBuilder Implementation
// ============================================================================

impl ServerBuilder {
    /// Creates a builder with default options and hooks.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: ServerOptions::new(),
            hooks: Arc::new(DefaultHooks),
        }
    }

    /// Sets the base path (e.g., `"/wsi"`).
    #[inline]
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.options = self.options.with_path(path);
        self
    }

    /// Enables a transport in addition to those already enabled.
    #[inline]
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.options = self.options.with_mode(mode);
        self
    }

    /// Enables exactly the given transports.
    #[inline]
    #[must_use]
    pub fn modes(mut self, modes: impl IntoIterator<Item = Mode>) -> Self {
        self.options = self.options.with_modes(modes);
        self
    }

    /// Sets the keep-alive period.
    #[inline]
    #[must_use]
    pub fn keep_alive(mut self, period: Duration) -> Self {
        self.options = self.options.with_keep_alive(period);
        self
    }

    /// Sets the outstanding request bound per connection.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max: usize) -> Self {
        self.options = self.options.with_max_pending(max);
        self
    }

    /// Sets the default timeout for server-to-client calls.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_request_timeout(timeout);
        self
    }

    /// Sets the long-poll request body limit in bytes.
    #[inline]
    #[must_use]
    pub fn max_body(mut self, bytes: usize) -> Self {
        self.options = self.options.with_max_body(bytes);
        self
    }

    /// Replaces all options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the lifecycle hooks.
    #[inline]
    #[must_use]
    pub fn hooks(mut self, hooks: impl ServerHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Sets shared lifecycle hooks.
    #[inline]
    #[must_use]
    pub fn shared_hooks(mut self, hooks: Arc<dyn ServerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Builds the server with validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the path does not start with `/`, no
    /// mode is enabled, or the keep-alive period, pending bound or body
    /// limit is zero.
    pub fn build(self) -> Result<Server> {
        self.options.validate().map_err(Error::config)?;
        Ok(Server::new(self.options, self.hooks))
    }
}

// ============================================================================
// Tests
// ============================================================================
