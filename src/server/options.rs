//! Server configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use websignals::{Mode, ServerOptions};
//!
//! let options = ServerOptions::new()
//!     .with_path("/wsi")
//!     .with_mode(Mode::Http)
//!     .with_keep_alive(Duration::from_secs(10));
//!
//! assert!(options.is_enabled(Mode::Socket));
//! assert!(options.is_enabled(Mode::Http));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default base path.
pub const DEFAULT_PATH: &str = "/";

/// Default keep-alive period.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default bound on outstanding server-to-client requests per connection.
pub const MAX_PENDING_REQUESTS: usize = 1024;

/// Default limit on a long-poll request body (2 MiB).
pub const DEFAULT_MAX_BODY: usize = 2 * 1024 * 1024;

// ============================================================================
// Mode
// ============================================================================

/// Transport a server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// WebSocket upgrade on the base path.
    Socket,
    /// HTTP long-poll on the base path.
    Http,
}

// ============================================================================
// ServerOptions
// ============================================================================

/// Server configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Base path both transports are served under.
    pub path: String,

    /// Accept WebSocket upgrades.
    pub socket: bool,

    /// Accept HTTP long-poll.
    pub http: bool,

    /// Keep-alive period: idle connections are pinged, dead ones torn down.
    pub keep_alive: Duration,

    /// Outstanding server-to-client requests allowed per connection.
    pub max_pending: usize,

    /// Timeout for server-to-client calls; `None` waits until disconnect.
    pub request_timeout: Option<Duration>,

    /// Largest long-poll request body accepted, in bytes.
    pub max_body: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ServerOptions {
    /// Creates options with defaults: socket mode only, on [`DEFAULT_PATH`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: DEFAULT_PATH.to_owned(),
            socket: true,
            http: false,
            keep_alive: DEFAULT_KEEP_ALIVE,
            max_pending: MAX_PENDING_REQUESTS,
            request_timeout: None,
            max_body: DEFAULT_MAX_BODY,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ServerOptions {
    /// Sets the base path.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Enables a transport.
    #[inline]
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.set_mode(mode, true);
        self
    }

    /// Enables exactly the given transports.
    #[must_use]
    pub fn with_modes(mut self, modes: impl IntoIterator<Item = Mode>) -> Self {
        self.socket = false;
        self.http = false;
        for mode in modes {
            self.set_mode(mode, true);
        }
        self
    }

    /// Disables a transport.
    #[inline]
    #[must_use]
    pub fn without_mode(mut self, mode: Mode) -> Self {
        self.set_mode(mode, false);
        self
    }

    /// Sets the keep-alive period.
    #[inline]
    #[must_use]
    pub fn with_keep_alive(mut self, period: Duration) -> Self {
        self.keep_alive = period;
        self
    }

    /// Sets the outstanding request bound per connection.
    #[inline]
    #[must_use]
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    /// Sets the default timeout for server-to-client calls.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the long-poll request body limit.
    #[inline]
    #[must_use]
    pub fn with_max_body(mut self, bytes: usize) -> Self {
        self.max_body = bytes;
        self
    }

    fn set_mode(&mut self, mode: Mode, enabled: bool) {
        match mode {
            Mode::Socket => self.socket = enabled,
            Mode::Http => self.http = enabled,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ServerOptions {
    /// Returns `true` if `mode` is enabled.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self, mode: Mode) -> bool {
        match mode {
            Mode::Socket => self.socket,
            Mode::Http => self.http,
        }
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err(format!("Path must start with '/': {:?}", self.path));
        }
        if !self.socket && !self.http {
            return Err("At least one mode must be enabled".to_owned());
        }
        if self.keep_alive.is_zero() {
            return Err("Keep-alive period must be greater than zero".to_owned());
        }
        if self.max_pending == 0 {
            return Err("Max pending requests must be greater than zero".to_owned());
        }
        if self.max_body == 0 {
            return Err("Max body size must be greater than zero".to_owned());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
