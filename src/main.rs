use std::process::ExitCode;

use async_trait::async_trait;
use rs_queue_supervisor::config::AppConfig;
use rs_queue_supervisor::errors::HandlerError;
use rs_queue_supervisor::message::ReceivedMessage;
use rs_queue_supervisor::providers::sqs::SqsConnector;
use rs_queue_supervisor::receiver::{Disposition, MessageHandler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logs every message body and completes it.
struct LogMessages;

#[async_trait]
impl MessageHandler for LogMessages {
    async fn handle(&self, message: &ReceivedMessage) -> Result<Disposition, HandlerError> {
        info!(message_id = %message.message_id, body = %message.body, "Received message");
        Ok(Disposition::Complete)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rs_queue_supervisor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let cancellation = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancellation.clone()));

    info!(queue = %config.queue_name, "Starting queue consumer");

    match rs_queue_supervisor::app::run_with_config(&config, &SqsConnector, LogMessages, cancellation).await {
        Ok(summary) => {
            info!(
                receivers_started = summary.receivers_started,
                restarts = summary.restarts,
                "Shutdown complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Error occurred");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal(cancellation: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown requested");
    cancellation.cancel();
}
