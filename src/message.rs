//! Message types delivered by a [`Receiver`](crate::queue::Receiver).

use std::collections::HashMap;
use std::fmt;

/// Broker-assigned identifier of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        MessageId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token proving the receiver holds the lock on a delivered message.
///
/// For SQS this is the receipt handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn new(token: impl Into<String>) -> Self {
        LockToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed to the consumer by the broker.
///
/// The message is immutable. In [`ReceiveMode::PeekLock`](crate::queue::ReceiveMode)
/// it stays locked until it is settled or the broker's lock duration elapses,
/// after which it is redelivered with a higher `delivery_count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: String,
    pub lock_token: LockToken,
    /// Number of times the broker has delivered this message, starting at 1.
    pub delivery_count: u32,
    pub attributes: HashMap<String, String>,
}

impl ReceivedMessage {
    pub fn new(message_id: MessageId, body: impl Into<String>, lock_token: LockToken) -> Self {
        ReceivedMessage {
            message_id,
            body: body.into(),
            lock_token,
            delivery_count: 1,
            attributes: HashMap::new(),
        }
    }

    pub fn with_delivery_count(mut self, delivery_count: u32) -> Self {
        self.delivery_count = delivery_count;
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}
