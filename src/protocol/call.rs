//! Builder for outgoing calls.
//!
//! A [`Call`] records the segments of an address in order, each with its own
//! argument bucket. Positional arguments are keyed `"0"`, `"1"`, ... which is
//! what positional declarations on the receiving tree expect.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use websignals::Call;
//!
//! let call = Call::new()
//!     .at("product").arg(3)
//!     .at("sub").arg(json!(null)).arg(json!({"name": "microwave"}));
//!
//! assert_eq!(call.address(), "product.sub");
//! assert_eq!(
//!     call.to_envelope().args["sub"],
//!     json!({"0": null, "1": {"name": "microwave"}})
//! );
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Map, Value};

use super::envelope::{Envelope, split_address};

// ============================================================================
// Segment
// ============================================================================

/// One visited segment and its arguments.
#[derive(Debug, Clone, Default, PartialEq)]
struct Segment {
    name: String,
    args: Map<String, Value>,
    positional: usize,
}

// ============================================================================
// Call
// ============================================================================

/// An address plus per-segment arguments, ready to be sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Call {
    segments: Vec<Segment>,
}

impl Call {
    /// Creates an empty call.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a call visiting every segment of a dotted address.
    #[must_use]
    pub fn to(address: &str) -> Self {
        split_address(address).into_iter().fold(Self::new(), Self::at)
    }

    /// Visits the next segment.
    #[must_use]
    pub fn at(mut self, name: &str) -> Self {
        self.segments.push(Segment {
            name: name.to_owned(),
            ..Segment::default()
        });
        self
    }

    /// Appends a positional argument to the current segment.
    ///
    /// Ignored if no segment has been visited yet.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        if let Some(segment) = self.segments.last_mut() {
            segment
                .args
                .insert(segment.positional.to_string(), value.into());
            segment.positional += 1;
        }
        self
    }

    /// Sets a named argument on the current segment.
    ///
    /// Ignored if no segment has been visited yet.
    #[must_use]
    pub fn named(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Some(segment) = self.segments.last_mut() {
            segment.args.insert(key.to_owned(), value.into());
        }
        self
    }

    /// Returns the dot-delimited address.
    #[must_use]
    pub fn address(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.name.as_str())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Builds the wire envelope.
    ///
    /// A segment visited twice merges into one bucket.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        let mut args = Map::new();
        for segment in &self.segments {
            let bucket = args
                .entry(segment.name.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(bucket) = bucket {
                bucket.extend(segment.args.clone());
            }
        }

        Envelope {
            func: self.address(),
            args,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
