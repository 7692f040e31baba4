//! # Queue Supervisor
//!
//! An asynchronous queue consumer that keeps a single receiver running against
//! a broker, recreating it whenever a recoverable error occurs.
//!
//! ## Features
//!
//! - Asynchronous message processing with tokio
//! - Trait-based handlers returning an explicit settle decision
//!   (complete, abandon, dead-letter, or leave locked)
//! - Lock-then-confirm delivery; nothing is acknowledged implicitly
//! - Receiver recreation with exponential backoff and a restart limit
//! - Pluggable failure classification, fatal errors surface to the caller
//! - Cooperative shutdown through a `CancellationToken`
//! - AWS SQS provider and an in-memory broker for tests
//!
//! Delivery is at-least-once: a message whose lock expires before it is
//! settled is delivered again, so handlers must be idempotent.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rs_queue_supervisor::errors::HandlerError;
//! use rs_queue_supervisor::providers::sqs::SqsConnector;
//! use rs_queue_supervisor::receiver::{Disposition, handler_fn};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handler = handler_fn(
//!         |message, shared: String| async move {
//!             println!("Processing message: {} with shared: {}", message.body, shared);
//!             Ok::<_, HandlerError>(Disposition::Complete)
//!         },
//!         "shared state".to_string(),
//!     );
//!
//!     rs_queue_supervisor::app::run(
//!         |key| std::env::var(key).ok(),
//!         &SqsConnector,
//!         handler,
//!         CancellationToken::new(),
//!     )
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod client;
pub mod config;
pub mod errors;
pub mod message;
pub mod providers;
pub mod queue;
pub mod receiver;
pub mod supervisor;
