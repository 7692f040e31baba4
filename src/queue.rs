//! The broker seam.
//!
//! A [`Connector`] turns a connection string into a [`QueueConnection`], the
//! connection opens a [`QueueClient`] per queue, and the queue client creates
//! [`Receiver`]s. Each handle is closed explicitly; the supervisor closes them
//! innermost first.

use async_trait::async_trait;

use crate::errors::QueueError;
use crate::message::ReceivedMessage;
use crate::receiver::config::ReceiverConfig;

/// How delivered messages are locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// The message is locked on delivery and must be settled explicitly.
    /// Unsettled messages are redelivered once the lock expires.
    PeekLock,
    /// The broker deletes the message as it is delivered. Faster, but a
    /// handler failure loses the message.
    ReceiveAndDelete,
}

/// Opens connections to a broker.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn QueueConnection>, QueueError>;
}

/// An open connection to a broker endpoint.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    async fn open_queue(&self, queue_name: &str) -> Result<Box<dyn QueueClient>, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// A handle to one named queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    fn queue_name(&self) -> &str;

    async fn create_receiver(
        &self,
        mode: ReceiveMode,
        config: &ReceiverConfig,
    ) -> Result<Box<dyn Receiver>, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// One subscription to a queue.
///
/// Methods take `&self` so a receiver can be shared between the delivery pump
/// and concurrently running handlers.
#[async_trait]
pub trait Receiver: Send + Sync {
    fn mode(&self) -> ReceiveMode;

    /// Waits up to the configured wait time for a batch of messages.
    /// An empty batch is not an error.
    async fn receive(&self) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledges the message; the broker will not deliver it again.
    async fn complete(&self, message: &ReceivedMessage) -> Result<(), QueueError>;

    /// Releases the lock so the message becomes available for redelivery.
    async fn abandon(&self, message: &ReceivedMessage) -> Result<(), QueueError>;

    /// Moves the message out of the queue into the dead-letter store.
    async fn dead_letter(&self, message: &ReceivedMessage, reason: &str) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}
