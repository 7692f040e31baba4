//! AWS SQS provider.
//!
//! | Queue seam              | SQS call                                   |
//! |-------------------------|--------------------------------------------|
//! | `open_queue`            | `GetQueueUrl`                              |
//! | `receive`               | long-poll `ReceiveMessage`                 |
//! | `complete`              | `DeleteMessage`                            |
//! | `abandon`               | `ChangeMessageVisibility` to 0             |
//! | `dead_letter`           | `SendMessage` to the DLQ, then delete      |
//!
//! The delivery count comes from `ApproximateReceiveCount`. SQS has no
//! connection or receiver to tear down, so `close` only marks the handle closed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{MessageAttributeValue, MessageSystemAttributeName};
use tracing::{debug, warn};

use crate::client::{SqsConnectionString, create_sqs_client};
use crate::errors::QueueError;
use crate::message::{LockToken, MessageId, ReceivedMessage};
use crate::queue::{Connector, QueueClient, QueueConnection, ReceiveMode, Receiver};
use crate::receiver::config::ReceiverConfig;

const PROVIDER: &str = "aws-sqs";

/// Error codes SQS returns for conditions that clear up on retry.
const TRANSIENT_CODES: &[&str] = &[
    "RequestThrottled",
    "ThrottlingException",
    "ServiceUnavailable",
    "InternalError",
    "InternalFailure",
    "KmsThrottled",
];

const NOT_FOUND_CODES: &[&str] = &[
    "AWS.SimpleQueueService.NonExistentQueue",
    "QueueDoesNotExist",
];

const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "InvalidClientTokenId",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
];

/// Connects to SQS using a [`SqsConnectionString`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqsConnector;

#[async_trait]
impl Connector for SqsConnector {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn QueueConnection>, QueueError> {
        let parsed = SqsConnectionString::parse(connection_string)?;
        let client = create_sqs_client(&parsed).await?;
        Ok(Box::new(SqsConnection::new(client, parsed.dead_letter_queue)))
    }
}

pub struct SqsConnection {
    client: aws_sdk_sqs::Client,
    dead_letter_queue: Option<String>,
    closed: AtomicBool,
}

impl SqsConnection {
    pub fn new(client: aws_sdk_sqs::Client, dead_letter_queue: Option<String>) -> Self {
        SqsConnection {
            client,
            dead_letter_queue,
            closed: AtomicBool::new(false),
        }
    }

    async fn queue_url(&self, queue_name: &str) -> Result<String, QueueError> {
        let output = self
            .client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|e| match map_sdk_error(e) {
                QueueError::ProviderError { code, .. } if NOT_FOUND_CODES.contains(&code.as_str()) => {
                    QueueError::QueueNotFound {
                        queue_name: queue_name.to_string(),
                    }
                }
                other => other,
            })?;

        output
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| QueueError::QueueNotFound {
                queue_name: queue_name.to_string(),
            })
    }
}

#[async_trait]
impl QueueConnection for SqsConnection {
    async fn open_queue(&self, queue_name: &str) -> Result<Box<dyn QueueClient>, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::ConnectionFailed {
                message: "connection is closed".to_string(),
            });
        }

        let queue_url = self.queue_url(queue_name).await?;
        let dead_letter_url = match &self.dead_letter_queue {
            Some(name) => Some(self.queue_url(name).await?),
            None => None,
        };
        debug!(queue = queue_name, queue_url = %queue_url, "Resolved SQS queue URL");

        Ok(Box::new(SqsQueueClient {
            target: Arc::new(QueueTarget {
                client: self.client.clone(),
                queue_name: queue_name.to_string(),
                queue_url,
                dead_letter_url,
            }),
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct QueueTarget {
    client: aws_sdk_sqs::Client,
    queue_name: String,
    queue_url: String,
    dead_letter_url: Option<String>,
}

pub struct SqsQueueClient {
    target: Arc<QueueTarget>,
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    fn queue_name(&self) -> &str {
        &self.target.queue_name
    }

    async fn create_receiver(
        &self,
        mode: ReceiveMode,
        config: &ReceiverConfig,
    ) -> Result<Box<dyn Receiver>, QueueError> {
        Ok(Box::new(SqsReceiver {
            target: self.target.clone(),
            mode,
            config: config.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

pub struct SqsReceiver {
    target: Arc<QueueTarget>,
    mode: ReceiveMode,
    config: ReceiverConfig,
    closed: AtomicBool,
}

impl SqsReceiver {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            Err(QueueError::ReceiverClosed)
        } else {
            Ok(())
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.target
            .client
            .delete_message()
            .queue_url(&self.target.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| lock_error(map_sdk_error(e), receipt_handle))?;
        Ok(())
    }
}

#[async_trait]
impl Receiver for SqsReceiver {
    fn mode(&self) -> ReceiveMode {
        self.mode
    }

    async fn receive(&self) -> Result<Vec<ReceivedMessage>, QueueError> {
        self.ensure_open()?;

        let mut request = self
            .target
            .client
            .receive_message()
            .queue_url(&self.target.queue_url)
            .max_number_of_messages(self.config.max_number_of_messages)
            .wait_time_seconds(self.config.wait_time.as_secs().min(20) as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount);
        if let Some(lock) = self.config.lock_duration {
            request = request.visibility_timeout(lock.as_secs().min(i32::MAX as u64) as i32);
        }

        let output = request.send().await.map_err(map_sdk_error)?;

        let mut received = Vec::with_capacity(output.messages().len());
        for message in output.messages() {
            let (Some(body), Some(receipt_handle)) = (message.body(), message.receipt_handle()) else {
                warn!(message_id = ?message.message_id(), "Received a message with no body.");
                continue;
            };

            let delivery_count = message
                .attributes()
                .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
                .and_then(|count| count.parse().ok())
                .unwrap_or(1);

            let attributes: HashMap<String, String> = message
                .message_attributes()
                .map(|attrs| {
                    attrs
                        .iter()
                        .filter_map(|(k, v)| v.string_value().map(|s| (k.clone(), s.to_string())))
                        .collect()
                })
                .unwrap_or_default();

            let mut delivered = ReceivedMessage::new(
                MessageId::new(message.message_id().unwrap_or_default()),
                body,
                LockToken::new(receipt_handle),
            )
            .with_delivery_count(delivery_count);
            delivered.attributes = attributes;

            if self.mode == ReceiveMode::ReceiveAndDelete {
                self.delete(receipt_handle).await?;
            }
            received.push(delivered);
        }

        Ok(received)
    }

    async fn complete(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        self.delete(message.lock_token.as_str()).await
    }

    async fn abandon(&self, message: &ReceivedMessage) -> Result<(), QueueError> {
        let receipt_handle = message.lock_token.as_str();
        self.target
            .client
            .change_message_visibility()
            .queue_url(&self.target.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| lock_error(map_sdk_error(e), receipt_handle))?;
        Ok(())
    }

    async fn dead_letter(&self, message: &ReceivedMessage, reason: &str) -> Result<(), QueueError> {
        let Some(dead_letter_url) = &self.target.dead_letter_url else {
            warn!(
                message_id = %message.message_id,
                "No dead-letter queue configured; abandoning to the queue's redrive policy"
            );
            return self.abandon(message).await;
        };

        let reason_attribute = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(reason)
            .build()
            .map_err(|e| QueueError::ProviderError {
                provider: PROVIDER,
                code: "BuildError".to_string(),
                message: e.to_string(),
                transient: false,
            })?;

        self.target
            .client
            .send_message()
            .queue_url(dead_letter_url)
            .message_body(&message.body)
            .message_attributes("DeadLetterReason", reason_attribute)
            .send()
            .await
            .map_err(map_sdk_error)?;

        self.delete(message.lock_token.as_str()).await
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// A receipt handle the broker rejects means the visibility timeout ran out.
fn lock_error(error: QueueError, receipt_handle: &str) -> QueueError {
    match error {
        QueueError::ProviderError { ref code, .. }
            if code == "ReceiptHandleIsInvalid" || code == "InvalidParameterValue" =>
        {
            QueueError::LockLost {
                lock_token: receipt_handle.to_string(),
            }
        }
        other => other,
    }
}

fn map_sdk_error<E, R>(error: SdkError<E, R>) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&error).to_string();
    match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            QueueError::ConnectionFailed { message }
        }
        SdkError::ServiceError(_) => {
            let code = error.code().unwrap_or("Unknown").to_string();
            if AUTH_CODES.contains(&code.as_str()) {
                return QueueError::AuthenticationFailed { message };
            }
            let transient = TRANSIENT_CODES.contains(&code.as_str());
            QueueError::ProviderError {
                provider: PROVIDER,
                code,
                message,
                transient,
            }
        }
        _ => QueueError::ProviderError {
            provider: PROVIDER,
            code: "ConstructionFailure".to_string(),
            message,
            transient: false,
        },
    }
}
