//! Runs against a real SQS queue (or LocalStack).
//!
//! Needs `TEST_SQS_QUEUE_NAME` plus the usual AWS environment, e.g. from `.env`:
//!
//! ```text
//! cargo test --test sqs_integration_test -- --ignored
//! ```

use rs_queue_supervisor::client::create_sqs_client_from_env;
use rs_queue_supervisor::errors::{HandlerError, SupervisorError};
use rs_queue_supervisor::message::ReceivedMessage;
use rs_queue_supervisor::providers::sqs::SqsConnection;
use rs_queue_supervisor::receiver::config::ReceiverConfig;
use rs_queue_supervisor::receiver::{Disposition, handler_fn};
use rs_queue_supervisor::supervisor::{Supervisor, SupervisorConfig};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

#[derive(Clone)]
struct SharedCounter {
    count: Arc<Mutex<i32>>,
}

impl SharedCounter {
    fn new() -> Self {
        Self {
            count: Arc::new(Mutex::new(0)),
        }
    }

    async fn increment(&self) {
        let mut count = self.count.lock().await;
        *count += 1;
    }

    async fn get_count(&self) -> i32 {
        *self.count.lock().await
    }
}

async fn test_handler(message: ReceivedMessage, shared: SharedCounter) -> Result<Disposition, HandlerError> {
    println!("Received message: {}", message.body);
    shared.increment().await;
    Ok(Disposition::Complete)
}

#[tokio::test]
#[ignore = "needs a live SQS queue"]
async fn test_sqs_supervisor_receives_and_shuts_down() {
    dotenvy::dotenv().ok();

    let queue_name = env::var("TEST_SQS_QUEUE_NAME").expect("TEST_SQS_QUEUE_NAME must be set");
    let sqs_client = create_sqs_client_from_env().await;

    let queue_url = sqs_client
        .get_queue_url()
        .queue_name(&queue_name)
        .send()
        .await
        .expect("Failed to resolve queue URL")
        .queue_url()
        .expect("queue has a URL")
        .to_string();

    sqs_client
        .send_message()
        .queue_url(&queue_url)
        .message_body("Supervisor test message")
        .send()
        .await
        .expect("Failed to send test message");

    let shared_counter = SharedCounter::new();
    let config = SupervisorConfig {
        receiver: ReceiverConfig {
            wait_time: Duration::from_secs(2),
            ..ReceiverConfig::default()
        },
        ..SupervisorConfig::default()
    };
    let supervisor = Supervisor::new(config, handler_fn(test_handler, shared_counter.clone()));
    let cancel = supervisor.cancellation_token();

    let connection = Box::new(SqsConnection::new(sqs_client.clone(), None));
    let receive_task = tokio::spawn(async move { supervisor.run(connection, &queue_name).await });

    let timeout_result = timeout(Duration::from_secs(30), async {
        loop {
            if shared_counter.get_count().await >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
    .await;

    cancel.cancel();
    let run_result: Result<_, SupervisorError> = timeout(Duration::from_secs(10), receive_task)
        .await
        .expect("supervisor did not shut down gracefully")
        .expect("supervisor task panicked");

    assert!(timeout_result.is_ok(), "no message processed within 30s");
    assert!(run_result.is_ok(), "supervisor ended with {run_result:?}");
}
