use async_trait::async_trait;

use crate::errors::HandlerError;
use crate::message::ReceivedMessage;

pub mod config;
mod functions;
pub(crate) mod session;

pub use functions::{HandlerFn, handler_fn};

/// How a handled message is settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge the message; it is removed from the queue.
    Complete,
    /// Release the lock so the broker redelivers the message.
    Abandon,
    /// Move the message to the dead-letter store.
    DeadLetter { reason: String },
    /// Do nothing. The message is redelivered when its lock expires.
    LeaveLocked,
}

/// Processes delivered messages.
///
/// Called once per delivery, possibly concurrently for messages of the same
/// batch. Delivery is at-least-once: a message whose lock expires before it is
/// settled comes back, so handlers must be idempotent.
///
/// Returning `Err` (or panicking) hands the message to the
/// [`HandlerFailurePolicy`](config::HandlerFailurePolicy).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &ReceivedMessage) -> Result<Disposition, HandlerError>;
}
