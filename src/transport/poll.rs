//! Long-poll push state.
//!
//! An HTTP long-poll peer has no channel the server can write to at will.
//! Outbound frames are either handed to the one parked `GET` or queued until
//! the next one arrives.
//!
//! # Invariant
//!
//! The queue is empty whenever a responder is parked: a push with a parked
//! responder goes straight to it, and a `GET` only parks once the queue is
//! drained.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tracing::{trace, warn};

use crate::identifiers::MessageId;

// ============================================================================
// PollReply
// ============================================================================

/// Answer given to a `GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollReply {
    /// A pushed frame: `200`, body, `id` header.
    Frame {
        /// Message id of the push.
        id: MessageId,
        /// Frame body.
        body: String,
    },

    /// Keep-alive: `200 BEEP`.
    KeepAlive,

    /// Teardown: `400 DSC`.
    Disconnect,
}

/// Result of a `GET` against the state.
#[derive(Debug)]
pub enum PollNext {
    /// Answer available now.
    Now(PollReply),

    /// Parked until a push, keep-alive or disconnect.
    Parked(oneshot::Receiver<PollReply>),
}

// ============================================================================
// PollState
// ============================================================================

/// Push queue and parked responder of one long-poll connection.
#[derive(Debug, Default)]
pub struct PollState {
    queue: VecDeque<(MessageId, String)>,
    responder: Option<oneshot::Sender<PollReply>>,
    closed: bool,
}

impl PollState {
    /// Delivers a push to the parked `GET`, or queues it.
    pub fn push(&mut self, id: MessageId, body: String) {
        let reply = PollReply::Frame { id, body };

        let reply = match self.responder.take() {
            Some(responder) => match responder.send(reply) {
                Ok(()) => return,
                Err(reply) => reply,
            },
            None => reply,
        };

        // Responder gone (client went away mid-park); keep for the next GET.
        if let PollReply::Frame { id, body } = reply {
            trace!(%id, "Queued push");
            self.queue.push_back((id, body));
        }
    }

    /// Serves a `GET`: oldest queued push, or a fresh park.
    ///
    /// A `GET` already parked is superseded and answered with a keep-alive.
    pub fn next(&mut self) -> PollNext {
        if self.closed {
            return PollNext::Now(PollReply::Disconnect);
        }

        if let Some((id, body)) = self.queue.pop_front() {
            return PollNext::Now(PollReply::Frame { id, body });
        }

        let (tx, rx) = oneshot::channel();
        if let Some(previous) = self.responder.replace(tx) {
            warn!("Superseded parked poll");
            let _ = previous.send(PollReply::KeepAlive);
        }
        PollNext::Parked(rx)
    }

    /// Answers the parked `GET` with a keep-alive.
    ///
    /// Returns `false` when nothing was parked.
    pub fn ping(&mut self) -> bool {
        self.responder
            .take()
            .is_some_and(|responder| responder.send(PollReply::KeepAlive).is_ok())
    }

    /// Answers the parked `GET` with a disconnect and drops queued pushes.
    pub fn close(&mut self) {
        self.closed = true;
        self.queue.clear();
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(PollReply::Disconnect);
        }
    }

    /// Returns the number of queued pushes.
    #[inline]
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if a `GET` is parked.
    #[inline]
    #[must_use]
    pub fn is_parked(&self) -> bool {
        self.responder.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str, body: &str) -> PollReply {
        PollReply::Frame {
            id: MessageId::from(id),
            body: body.to_owned(),
        }
    }

    fn parked(state: &mut PollState) -> oneshot::Receiver<PollReply> {
        match state.next() {
            PollNext::Parked(rx) => rx,
            PollNext::Now(reply) => panic!("expected park, got {reply:?}"),
        }
    }

    #[test]
    fn test_queued_pushes_are_fifo() {
        let mut state = PollState::default();
        state.push(MessageId::from("a"), "1".into());
        state.push(MessageId::from("b"), "2".into());
        assert_eq!(state.queued(), 2);

        assert!(matches!(state.next(), PollNext::Now(r) if r == frame("a", "1")));
        assert!(matches!(state.next(), PollNext::Now(r) if r == frame("b", "2")));
        assert!(matches!(state.next(), PollNext::Parked(_)));
    }

    #[tokio::test]
    async fn test_push_goes_to_parked_responder() {
        let mut state = PollState::default();
        let rx = parked(&mut state);
        state.push(MessageId::from("a"), "1".into());

        assert_eq!(state.queued(), 0);
        assert!(!state.is_parked());
        assert_eq!(rx.await.expect("reply"), frame("a", "1"));
    }

    #[tokio::test]
    async fn test_repark_after_drain() {
        let mut state = PollState::default();
        state.push(MessageId::from("a"), "1".into());
        assert!(matches!(state.next(), PollNext::Now(_)));

        let rx = parked(&mut state);
        state.push(MessageId::from("b"), "2".into());
        assert_eq!(rx.await.expect("reply"), frame("b", "2"));
    }

    #[tokio::test]
    async fn test_second_get_supersedes_first() {
        let mut state = PollState::default();
        let first = parked(&mut state);
        let _second = parked(&mut state);
        assert_eq!(first.await.expect("reply"), PollReply::KeepAlive);
        assert!(state.is_parked());
    }

    #[test]
    fn test_push_after_responder_dropped_is_queued() {
        let mut state = PollState::default();
        drop(parked(&mut state));
        state.push(MessageId::from("a"), "1".into());
        assert_eq!(state.queued(), 1);
    }

    #[tokio::test]
    async fn test_ping() {
        let mut state = PollState::default();
        assert!(!state.ping());

        let rx = parked(&mut state);
        assert!(state.ping());
        assert_eq!(rx.await.expect("reply"), PollReply::KeepAlive);
    }

    #[tokio::test]
    async fn test_close_answers_disconnect() {
        let mut state = PollState::default();
        let rx = parked(&mut state);
        state.close();
        assert_eq!(rx.await.expect("reply"), PollReply::Disconnect);
        assert!(matches!(state.next(), PollNext::Now(PollReply::Disconnect)));
    }
}
