use std::time::Duration;

/// Configuration for a receiver.
///
/// This struct defines the parameters for receiving messages from a queue,
/// including the maximum number of messages per batch and the long-poll wait.
///
/// # Fields
/// - `max_number_of_messages`: The maximum number of messages to receive in a single request.
/// - `wait_time`: How long a receive call waits for messages before returning an empty batch.
/// - `lock_duration`: How long a delivered message stays locked; `None` keeps the queue's default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// The maximum number of messages to receive in a single request.
    pub max_number_of_messages: i32,

    /// The wait time for long polling.
    pub wait_time: Duration,

    /// Lock (visibility) duration applied to delivered messages.
    pub lock_duration: Option<Duration>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            max_number_of_messages: 10,
            wait_time: Duration::from_secs(20),
            lock_duration: None,
        }
    }
}

/// What to do with a message whose handler failed or panicked.
///
/// Failed messages are abandoned so the broker redelivers them. Once a message
/// has been delivered `max_delivery_attempts` times it is dead-lettered instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerFailurePolicy {
    pub max_delivery_attempts: Option<u32>,
}

impl HandlerFailurePolicy {
    pub fn disposition_for(&self, delivery_count: u32, reason: &str) -> super::Disposition {
        match self.max_delivery_attempts {
            Some(max) if delivery_count >= max => super::Disposition::DeadLetter {
                reason: format!("handler failed after {delivery_count} deliveries: {reason}"),
            },
            _ => super::Disposition::Abandon,
        }
    }
}
