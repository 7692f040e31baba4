//! Delivery pump for one receiver.
//!
//! A session registers a [`MessageHandler`] and the error path on a receiver.
//! It runs a task that receives batches, hands every message to the handler,
//! and settles it with the returned [`Disposition`]. The first receive error is
//! classified and reported once, then the pump stops.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::QueueError;
use crate::message::ReceivedMessage;
use crate::queue::{ReceiveMode, Receiver};
use crate::receiver::config::HandlerFailurePolicy;
use crate::receiver::{Disposition, MessageHandler};
use crate::supervisor::{FailureClassifier, FailureKind};

/// The single failure a session reports.
#[derive(Debug)]
pub(crate) struct ReceiverFailure {
    pub kind: FailureKind,
    pub error: QueueError,
}

pub(crate) struct ReceiverSession {
    receiver: Arc<dyn Receiver>,
    stop: CancellationToken,
    failure: oneshot::Receiver<ReceiverFailure>,
    pump: JoinHandle<()>,
    started_at: Instant,
}

impl ReceiverSession {
    pub fn start(
        receiver: Box<dyn Receiver>,
        handler: Arc<dyn MessageHandler>,
        classifier: Arc<dyn FailureClassifier>,
        policy: HandlerFailurePolicy,
    ) -> Self {
        let receiver: Arc<dyn Receiver> = Arc::from(receiver);
        let stop = CancellationToken::new();
        let (failure_tx, failure_rx) = oneshot::channel();

        let pump = tokio::spawn(pump(
            receiver.clone(),
            handler,
            classifier,
            policy,
            stop.clone(),
            failure_tx,
        ));

        ReceiverSession {
            receiver,
            stop,
            failure: failure_rx,
            pump,
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Resolves when the pump reports its failure.
    ///
    /// A pump that ends without reporting (it panicked) counts as a retryable
    /// [`QueueError::ReceiverClosed`].
    pub async fn failed(&mut self) -> ReceiverFailure {
        match (&mut self.failure).await {
            Ok(failure) => failure,
            Err(_) => ReceiverFailure {
                kind: FailureKind::Retryable,
                error: QueueError::ReceiverClosed,
            },
        }
    }

    /// Stops the pump, waits up to `grace` for in-flight handlers, then closes
    /// the receiver.
    ///
    /// Handlers still running after `grace` are aborted. Their messages stay
    /// locked and are redelivered once the lock expires.
    pub async fn close(mut self, grace: Duration) -> Result<(), QueueError> {
        self.stop.cancel();
        match tokio::time::timeout(grace, &mut self.pump).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Receiver pump ended abnormally"),
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Handlers still running after the shutdown grace period, aborting"
                );
                self.pump.abort();
            }
        }
        self.receiver.close().await
    }
}

async fn pump(
    receiver: Arc<dyn Receiver>,
    handler: Arc<dyn MessageHandler>,
    classifier: Arc<dyn FailureClassifier>,
    policy: HandlerFailurePolicy,
    stop: CancellationToken,
    failure_tx: oneshot::Sender<ReceiverFailure>,
) {
    loop {
        let batch = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            batch = receiver.receive() => batch,
        };

        match batch {
            Ok(messages) if messages.is_empty() => {
                debug!("No messages received.");
            }
            Ok(messages) => {
                join_all(
                    messages
                        .iter()
                        .map(|message| dispatch(receiver.as_ref(), handler.as_ref(), &policy, message)),
                )
                .await;
            }
            Err(error) => {
                let kind = classifier.classify(&error);
                if failure_tx.send(ReceiverFailure { kind, error }).is_err() {
                    debug!("Receiver failure reported after the session was dropped");
                }
                return;
            }
        }
    }
}

async fn dispatch(
    receiver: &dyn Receiver,
    handler: &dyn MessageHandler,
    policy: &HandlerFailurePolicy,
    message: &ReceivedMessage,
) {
    debug!(
        message_id = %message.message_id,
        delivery_count = message.delivery_count,
        "Dispatching message"
    );

    let outcome = AssertUnwindSafe(handler.handle(message)).catch_unwind().await;
    let disposition = match outcome {
        Ok(Ok(disposition)) => disposition,
        Ok(Err(e)) => {
            warn!(message_id = %message.message_id, error = %e, "Error handling message");
            policy.disposition_for(message.delivery_count, &e.to_string())
        }
        Err(_) => {
            error!(message_id = %message.message_id, "Message handler panicked");
            policy.disposition_for(message.delivery_count, "handler panicked")
        }
    };

    if receiver.mode() == ReceiveMode::ReceiveAndDelete {
        return;
    }

    let settled = match &disposition {
        Disposition::Complete => receiver.complete(message).await,
        Disposition::Abandon => receiver.abandon(message).await,
        Disposition::DeadLetter { reason } => receiver.dead_letter(message, reason).await,
        Disposition::LeaveLocked => Ok(()),
    };

    // The message comes back once its lock expires.
    if let Err(e) = settled {
        warn!(
            message_id = %message.message_id,
            disposition = ?disposition,
            error = %e,
            "Failed to settle message"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HandlerError;
    use crate::providers::memory::InMemoryBroker;
    use crate::queue::Connector;
    use crate::receiver::config::ReceiverConfig;
    use crate::receiver::handler_fn;
    use crate::supervisor::TransientErrorClassifier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_receive_and_delete_skips_settlement() {
        let broker = InMemoryBroker::new();
        broker.create_queue("q");
        broker.send("q", "fire and forget");

        let connection = broker.connect("memory").await.unwrap();
        let client = connection.open_queue("q").await.unwrap();
        let config = ReceiverConfig {
            wait_time: Duration::from_millis(20),
            ..ReceiverConfig::default()
        };
        let receiver = client
            .create_receiver(ReceiveMode::ReceiveAndDelete, &config)
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let handler = handler_fn(
            |_message: ReceivedMessage, calls: Arc<AtomicUsize>| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, HandlerError>(Disposition::Abandon)
            },
            calls.clone(),
        );
        let session = ReceiverSession::start(
            receiver,
            Arc::new(handler),
            Arc::new(TransientErrorClassifier),
            HandlerFailurePolicy::default(),
        );

        tokio::time::timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        session.close(Duration::from_secs(1)).await.unwrap();

        let stats = broker.stats();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.abandoned, 0);
        assert!(stats.completed.is_empty());
        assert_eq!(broker.ready_count("q"), 0);
        assert_eq!(broker.in_flight_count("q"), 0);
    }
}
