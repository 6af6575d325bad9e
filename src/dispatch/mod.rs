//! Call dispatch.
//!
//! Both endpoints own a tree of named nodes. An incoming envelope's address
//! is walked through that tree, mapping arguments and running handlers on
//! the way.
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Node`] | Tree node: declared args, passthrough, terminal, children |
//! | [`DispatchEngine`] | Resolves envelopes against a tree |
//! | [`Reply`] | What a handler returned |
//! | [`Completion`] | Answer slot for handlers that reply later |
//!
//! # Handlers
//!
//! | Kind | Runs when | Answer |
//! |------|-----------|--------|
//! | Passthrough | Node is an intermediate segment | `None` continues, `Some(v)` stops with `v` |
//! | Terminal | Node is the last segment | Final value |

// ============================================================================
// Submodules
// ============================================================================

/// Address resolution.
pub mod engine;

/// Tree nodes and argument mapping.
pub mod node;

/// Handler results.
pub mod reply;

// ============================================================================
// Re-exports
// ============================================================================

pub use engine::DispatchEngine;
pub use node::{ArgPlacement, Args, DeclaredArg, Node, PassthroughFn, TerminalFn};
pub use reply::{BoxFuture, Completion, Reply};
