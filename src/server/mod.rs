//! Server endpoint and configuration.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent configuration and validation |
//! | `core` | [`Server`]: definitions, lifecycle, calls to clients |
//! | `hooks` | Authentication and connection callbacks |
//! | `http` | Router for long-poll and socket handshakes |
//! | `options` | [`ServerOptions`] and defaults |

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for server configuration.
pub mod builder;

/// Core server implementation.
pub mod core;

/// Lifecycle hooks.
pub mod hooks;

/// HTTP surface.
pub mod http;

/// Server options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ServerBuilder;
pub use self::core::Server;
pub use hooks::{DefaultHooks, ServerHooks};
pub use options::{
    DEFAULT_KEEP_ALIVE, DEFAULT_MAX_BODY, DEFAULT_PATH, MAX_PENDING_REQUESTS, Mode, ServerOptions,
};
