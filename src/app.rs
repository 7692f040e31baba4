//! Start-up sequence for the consumer process.

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::errors::{QueueError, SupervisorError};
use crate::queue::Connector;
use crate::receiver::MessageHandler;
use crate::supervisor::{RunSummary, Supervisor};

/// Loads configuration through `lookup`, connects, and supervises the queue.
///
/// Configuration is validated before `connector` is touched, so a missing key
/// never results in a connection attempt.
pub async fn run(
    lookup: impl Fn(&str) -> Option<String>,
    connector: &dyn Connector,
    handler: impl MessageHandler + 'static,
    cancellation: CancellationToken,
) -> Result<RunSummary, SupervisorError> {
    let config = AppConfig::from_lookup(lookup)?;
    run_with_config(&config, connector, handler, cancellation).await
}

pub async fn run_with_config(
    config: &AppConfig,
    connector: &dyn Connector,
    handler: impl MessageHandler + 'static,
    cancellation: CancellationToken,
) -> Result<RunSummary, SupervisorError> {
    info!(queue = %config.queue_name, "Connecting to queue broker");
    let connection = match connector.connect(&config.connection_string).await {
        Ok(connection) => connection,
        Err(QueueError::ConfigurationError(e)) => return Err(SupervisorError::Configuration(e)),
        Err(source) => return Err(SupervisorError::Startup { source }),
    };

    let supervisor = Supervisor::new(config.supervisor_config(cancellation), handler);
    supervisor.run(connection, &config.queue_name).await
}
