//! Wire protocol types.
//!
//! This module defines what travels between the two endpoints, independent
//! of which transport carries it.
//!
//! # Protocol Overview
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Framing | [`Frame`] | `#id@body`, `BEEP`, raw handshake body |
//! | Payload | [`Envelope`] | `{"func": "a.b", "args": {...}}` |
//! | Builder | [`Call`] | Builds envelopes segment by segment |
//!
//! # Addressing
//!
//! Functions are addressed by dot-delimited paths:
//!
//! - `tests.echo`
//! - `product.sub.get`

// ============================================================================
// Submodules
// ============================================================================

/// Call builder.
pub mod call;

/// RPC envelope.
pub mod envelope;

/// Frame codec.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use call::Call;
pub use envelope::{Envelope, SegmentArgs, split_address};
pub use frame::{Frame, KEEP_ALIVE, encode};
