//! Handler results.
//!
//! A handler answers in exactly one of three ways: it returns the value
//! directly, returns a future that yields it, or hands it to the
//! [`Completion`] it was given. Whichever arrives first decides the outcome;
//! anything after that is ignored.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::DispatchError;

// ============================================================================
// Types
// ============================================================================

/// Boxed, sendable future yielding a handler outcome.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, DispatchError>> + Send + 'static>>;

// ============================================================================
// Reply
// ============================================================================

/// What a handler returned.
///
/// Terminals reply with `Reply<Value>`; passthroughs reply with
/// `Reply<Option<Value>>`, where `None` means "continue to the next segment".
pub enum Reply<T> {
    /// Value available now.
    Ready(T),

    /// Value produced later by a future.
    Deferred(BoxFuture<T>),

    /// Value delivered through the handler's [`Completion`].
    Callback,

    /// Handler failed.
    Error(DispatchError),
}

impl<T> Reply<T> {
    /// Wraps a future that cannot fail.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::Deferred(Box::pin(async move { Ok(future.await) }))
    }

    /// Wraps a fallible future.
    pub fn try_deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, DispatchError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }

    /// Creates a handler error reply.
    #[inline]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(DispatchError::handler(message))
    }
}

impl Reply<Value> {
    /// Replies with any JSON-convertible value.
    #[inline]
    pub fn ready(value: impl Into<Value>) -> Self {
        Self::Ready(value.into())
    }

    /// Replies with any serializable value.
    ///
    /// A value that cannot be represented as JSON (for example a map with
    /// non-string keys) becomes [`DispatchError::UnserializableResult`].
    pub fn json<S: Serialize + ?Sized>(value: &S) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::Ready(value),
            Err(e) => {
                tracing::error!(error = %e, "Invalid object for message");
                Self::Error(DispatchError::UnserializableResult)
            }
        }
    }
}

impl Reply<Option<Value>> {
    /// Lets resolution continue to the next segment.
    #[inline]
    #[must_use]
    pub const fn pass() -> Self {
        Self::Ready(None)
    }

    /// Short-circuits resolution with a final answer.
    #[inline]
    pub fn stop(value: impl Into<Value>) -> Self {
        Self::Ready(Some(value.into()))
    }
}

impl<T> std::fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(_) => f.write_str("Reply::Ready"),
            Self::Deferred(_) => f.write_str("Reply::Deferred"),
            Self::Callback => f.write_str("Reply::Callback"),
            Self::Error(e) => write!(f, "Reply::Error({e})"),
        }
    }
}

// ============================================================================
// Completion
// ============================================================================

/// One-shot answer slot handed to a handler.
///
/// Clones share the slot: the first [`complete`](Self::complete) wins and
/// later calls return `false`. Dropping every clone without completing is
/// observable by the engine.
pub struct Completion<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Completion<T> {
    /// Creates a completion and the receiver the engine waits on.
    pub(crate) fn channel() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (completion, rx)
    }

    /// Delivers the answer.
    ///
    /// Returns `false` if an answer was already delivered or the call was
    /// decided another way.
    pub fn complete(&self, value: T) -> bool {
        match self.slot.lock().take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Returns `true` once an answer was delivered through any clone.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl Completion<Option<Value>> {
    /// Lets resolution continue to the next segment.
    #[inline]
    pub fn pass(&self) -> bool {
        self.complete(None)
    }

    /// Short-circuits resolution with a final answer.
    #[inline]
    pub fn stop(&self, value: impl Into<Value>) -> bool {
        self.complete(Some(value.into()))
    }
}

// ============================================================================
// Settlement
// ============================================================================

/// Waits for whichever answer path fires first.
///
/// Returns `Ok(None)` when the handler chose [`Reply::Callback`] and then
/// dropped every clone of its completion.
pub(crate) async fn settle<T: Send>(
    reply: Reply<T>,
    mut rx: oneshot::Receiver<T>,
) -> Result<Option<T>, DispatchError> {
    // A closed receiver must not be polled again.
    let open = match rx.try_recv() {
        Ok(value) => return Ok(Some(value)),
        Err(TryRecvError::Empty) => true,
        Err(TryRecvError::Closed) => false,
    };

    match reply {
        Reply::Ready(value) => {
            rx.close();
            Ok(Some(value))
        }
        Reply::Error(e) => {
            rx.close();
            Err(e)
        }
        Reply::Deferred(future) if open => {
            let outcome = tokio::select! {
                biased;
                Ok(value) = &mut rx => Ok(Some(value)),
                result = future => result.map(Some),
            };
            rx.close();
            outcome
        }
        Reply::Deferred(future) => future.await.map(Some),
        Reply::Callback if open => Ok(rx.await.ok()),
        Reply::Callback => Ok(None),
    }
}

// ============================================================================
// Tests
// ============================================================================
