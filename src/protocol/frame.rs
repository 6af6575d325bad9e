//! Wire framing.
//!
//! Every message on either transport is one string frame:
//!
//! | Frame | Meaning |
//! |-------|---------|
//! | `#<id>@<body>` | message with id (request or response) |
//! | `BEEP` | keep-alive, no payload |
//! | `<body>` | raw body, handshake exchanges only |
//!
//! Decoding never fails loudly: anything that is neither a keep-alive nor a
//! well-formed `#id@body` frame decodes to [`Frame::Invalid`] and is dropped
//! by the transports.

// ============================================================================
// Imports
// ============================================================================

use crate::identifiers::MessageId;

// ============================================================================
// Constants
// ============================================================================

/// Literal keep-alive token.
pub const KEEP_ALIVE: &str = "BEEP";

/// Leading marker of an id-carrying frame.
const ID_MARKER: char = '#';

/// Separator between id and body.
const BODY_SEPARATOR: char = '@';

// ============================================================================
// Frame
// ============================================================================

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A message carrying an id and a body.
    Message {
        /// Message id used for correlation.
        id: MessageId,
        /// Opaque body, usually a JSON document.
        body: String,
    },

    /// Keep-alive token.
    KeepAlive,

    /// Anything else.
    Invalid,
}

impl Frame {
    /// Decodes a raw frame.
    #[must_use]
    pub fn decode(raw: &str) -> Self {
        if raw == KEEP_ALIVE {
            return Self::KeepAlive;
        }

        let Some(rest) = raw.strip_prefix(ID_MARKER) else {
            return Self::Invalid;
        };

        match rest.split_once(BODY_SEPARATOR) {
            Some((id, body)) => Self::Message {
                id: MessageId::from(id),
                body: body.to_owned(),
            },
            None => Self::Invalid,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a frame.
///
/// Without an id the body is returned verbatim.
#[must_use]
pub fn encode(id: Option<&MessageId>, body: &str) -> String {
    match id {
        Some(id) => {
            let mut frame = String::with_capacity(id.as_str().len() + body.len() + 2);
            frame.push(ID_MARKER);
            frame.push_str(id.as_str());
            frame.push(BODY_SEPARATOR);
            frame.push_str(body);
            frame
        }
        None => body.to_owned(),
    }
}

// ============================================================================
// Tests
// ============================================================================
