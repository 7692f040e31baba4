use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::SupervisorError;
use crate::queue::{QueueClient, QueueConnection, ReceiveMode};
use crate::receiver::MessageHandler;
use crate::receiver::config::{HandlerFailurePolicy, ReceiverConfig};
use crate::receiver::session::ReceiverSession;

mod backoff;
mod classifier;

pub use backoff::{BackoffPolicy, JitterPolicy};
pub use classifier::{FailureClassifier, FailureKind, TransientErrorClassifier};

/// Configuration for a [`Supervisor`].
///
/// The restart loop runs while `cancellation` has not been triggered and the
/// number of consecutive restarts stays within `max_restarts`.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum consecutive receiver restarts; `None` restarts forever.
    pub max_restarts: Option<u32>,

    /// A receiver that stayed up this long resets the consecutive restart count.
    pub stable_after: Duration,

    pub backoff: BackoffPolicy,

    pub receiver: ReceiverConfig,

    pub handler_failure: HandlerFailurePolicy,

    /// How long a closing receiver waits for in-flight handlers before
    /// aborting them.
    pub shutdown_grace: Duration,

    /// Cancelling this token shuts the supervisor down.
    pub cancellation: CancellationToken,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            max_restarts: None,
            stable_after: Duration::from_secs(60),
            backoff: BackoffPolicy::default(),
            receiver: ReceiverConfig::default(),
            handler_failure: HandlerFailurePolicy::default(),
            shutdown_grace: Duration::from_secs(30),
            cancellation: CancellationToken::new(),
        }
    }
}

/// Counters for a run that ended with a shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub receivers_started: u32,
    pub restarts: u32,
}

enum Stop {
    Shutdown,
    Failed(SupervisorError),
}

/// Keeps one receiver consuming a queue, recreating it after retryable failures.
///
/// # Example
///
/// ```rust,no_run
/// use rs_queue_supervisor::errors::HandlerError;
/// use rs_queue_supervisor::providers::sqs::SqsConnector;
/// use rs_queue_supervisor::queue::Connector;
/// use rs_queue_supervisor::receiver::{Disposition, handler_fn};
/// use rs_queue_supervisor::supervisor::{Supervisor, SupervisorConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let connection = SqsConnector.connect("Region=us-east-1").await?;
///     let handler = handler_fn(
///         |message, _: ()| async move {
///             println!("Processing message: {}", message.body);
///             Ok::<_, HandlerError>(Disposition::Complete)
///         },
///         (),
///     );
///
///     let supervisor = Supervisor::new(SupervisorConfig::default(), handler);
///     supervisor.run(connection, "orders").await?;
///     Ok(())
/// }
/// ```
pub struct Supervisor {
    config: SupervisorConfig,
    handler: Arc<dyn MessageHandler>,
    classifier: Arc<dyn FailureClassifier>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, handler: impl MessageHandler + 'static) -> Self {
        Supervisor {
            config,
            handler: Arc::new(handler),
            classifier: Arc::new(TransientErrorClassifier),
        }
    }

    pub fn with_classifier(mut self, classifier: impl FailureClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.config.cancellation.clone()
    }

    /// Consumes `queue_name` until shutdown, a fatal error, or the restart limit.
    ///
    /// The connection is owned by the run: whichever way it ends, the current
    /// receiver, the queue client and the connection are each closed once,
    /// in that order.
    pub async fn run(
        &self,
        connection: Box<dyn QueueConnection>,
        queue_name: &str,
    ) -> Result<RunSummary, SupervisorError> {
        let queue = match connection.open_queue(queue_name).await {
            Ok(queue) => queue,
            Err(source) => {
                close_connection(connection.as_ref()).await;
                return Err(SupervisorError::Startup { source });
            }
        };

        info!(queue = queue_name, "Receiver started and ready to receive");

        let mut summary = RunSummary::default();
        let outcome = self.restart_loop(queue.as_ref(), &mut summary).await;

        if let Err(e) = queue.close().await {
            warn!(queue = queue_name, error = %e, "Failed to close queue client");
        }
        close_connection(connection.as_ref()).await;

        match outcome {
            Stop::Shutdown => {
                info!(
                    queue = queue_name,
                    restarts = summary.restarts,
                    "Receiver shut down"
                );
                Ok(summary)
            }
            Stop::Failed(e) => Err(e),
        }
    }

    async fn restart_loop(&self, queue: &dyn QueueClient, summary: &mut RunSummary) -> Stop {
        let cancellation = &self.config.cancellation;
        let mut consecutive: u32 = 0;

        loop {
            if cancellation.is_cancelled() {
                return Stop::Shutdown;
            }

            let error = match queue
                .create_receiver(ReceiveMode::PeekLock, &self.config.receiver)
                .await
            {
                Ok(receiver) => {
                    summary.receivers_started += 1;
                    let mut session = ReceiverSession::start(
                        receiver,
                        self.handler.clone(),
                        self.classifier.clone(),
                        self.config.handler_failure.clone(),
                    );

                    let failure = tokio::select! {
                        _ = cancellation.cancelled() => None,
                        failure = session.failed() => Some(failure),
                    };
                    let uptime = session.uptime();

                    if let Err(e) = session.close(self.config.shutdown_grace).await {
                        warn!(queue = queue.queue_name(), error = %e, "Failed to close receiver");
                    }

                    let Some(failure) = failure else {
                        return Stop::Shutdown;
                    };
                    if failure.kind == FailureKind::Fatal {
                        error!(queue = queue.queue_name(), error = %failure.error, "Error occurred");
                        return Stop::Failed(SupervisorError::Fatal {
                            source: failure.error,
                        });
                    }
                    if uptime >= self.config.stable_after {
                        consecutive = 0;
                    }
                    failure.error
                }
                Err(error) => {
                    if self.classifier.classify(&error) == FailureKind::Fatal {
                        error!(queue = queue.queue_name(), error = %error, "Failed to create receiver");
                        return Stop::Failed(SupervisorError::Fatal { source: error });
                    }
                    error
                }
            };

            consecutive += 1;
            if self.config.max_restarts.is_some_and(|max| consecutive > max) {
                error!(
                    queue = queue.queue_name(),
                    restarts = consecutive,
                    error = %error,
                    "Restart limit exceeded"
                );
                return Stop::Failed(SupervisorError::RestartLimitExceeded {
                    restarts: consecutive,
                    source: error,
                });
            }

            let delay = self.config.backoff.next(consecutive - 1);
            summary.restarts += 1;
            warn!(
                queue = queue.queue_name(),
                restarts = summary.restarts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Receiver will be recreated. A recoverable error occurred"
            );

            if !delay.is_zero() {
                tokio::select! {
                    _ = cancellation.cancelled() => return Stop::Shutdown,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

async fn close_connection(connection: &dyn QueueConnection) {
    if let Err(e) = connection.close().await {
        warn!(error = %e, "Failed to close connection");
    }
}

