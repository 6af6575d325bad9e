//! Type-safe identifiers for connections and messages.
//!
//! Both identifiers are opaque string tokens on the wire. Locally generated
//! ids are UUIDv4 in simple (hyphen-less) form, giving 122 random bits per
//! draw; callers that need uniqueness against a live set re-draw on
//! collision.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Macro
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a fresh random identifier.
            #[inline]
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            /// Returns the identifier as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes the identifier, returning the inner string.
            #[inline]
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl Borrow<str> for $name {
            #[inline]
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// ============================================================================
// Identifiers
// ============================================================================

string_id! {
    /// Identifies one authenticated peer. Doubles as the HTTP `session` token.
    ConnectionId
}

string_id! {
    /// Identifies one in-flight message, unique within a connection.
    MessageId
}

// ============================================================================
// Tests
// ============================================================================
