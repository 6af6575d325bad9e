//! RPC envelope carried in request frame bodies.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DispatchError;

// ============================================================================
// Types
// ============================================================================

/// Per-segment argument buckets: segment name → (arg key → value).
pub type SegmentArgs = Map<String, Value>;

// ============================================================================
// Envelope
// ============================================================================

/// A remote call: address plus per-segment arguments.
///
/// # Format
///
/// ```json
/// { "func": "product.sub.get", "args": { "product": { "0": 3 }, "sub": { "0": 1 } } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Dot-delimited function address.
    pub func: String,

    /// Argument buckets keyed by segment name.
    #[serde(default)]
    pub args: SegmentArgs,
}

impl Envelope {
    /// Parses a request body.
    ///
    /// Unlike plain deserialization this reports the two failure kinds
    /// separately: unparseable JSON is [`DispatchError::MalformedEnvelope`],
    /// a missing or non-string `func` is [`DispatchError::InvalidAddress`].
    /// `args` falls back to an empty mapping when absent or not an object.
    pub fn parse(body: &str) -> Result<Self, DispatchError> {
        let value: Value =
            serde_json::from_str(body).map_err(|_| DispatchError::MalformedEnvelope)?;

        let Value::Object(mut object) = value else {
            return Err(DispatchError::InvalidAddress);
        };

        let func = match object.remove("func") {
            Some(Value::String(func)) => func,
            _ => return Err(DispatchError::InvalidAddress),
        };

        let args = match object.remove("args") {
            Some(Value::Object(args)) => args,
            _ => Map::new(),
        };

        Ok(Self { func, args })
    }

    /// Splits the address into segments, dropping empty ones.
    #[must_use]
    pub fn path(&self) -> Vec<&str> {
        split_address(&self.func)
    }
}

/// Splits a dot-delimited address, dropping empty segments.
#[must_use]
pub fn split_address(address: &str) -> Vec<&str> {
    address.split('.').filter(|s| !s.is_empty()).collect()
}

// ============================================================================
// Tests
// ============================================================================
