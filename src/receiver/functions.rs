use crate::errors::HandlerError;
use crate::message::ReceivedMessage;
use crate::receiver::{Disposition, MessageHandler};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

#[async_trait]
impl<F, Fut, TShared> MessageHandler for HandlerFn<F, Fut, TShared>
where
    F: Fn(ReceivedMessage, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Disposition, HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    async fn handle(&self, message: &ReceivedMessage) -> Result<Disposition, HandlerError> {
        (self.handler_fn)(message.clone(), self.shared_resources.clone()).await
    }
}

/// Implementation of [`MessageHandler`] backed by an async function.
///
/// This struct wraps a user-provided function and shared resources. Every
/// delivery calls the function with its own copy of the message and a clone of
/// the shared resources.
///
/// # Type Parameters
///
/// * `F` - The message handler function type
/// * `Fut` - The future returned by the handler function
/// * `TShared` - The type of shared resources passed to the handler
pub struct HandlerFn<F, Fut, TShared>
where
    F: Fn(ReceivedMessage, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Disposition, HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    handler_fn: F,
    shared_resources: TShared,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut, TShared> HandlerFn<F, Fut, TShared>
where
    F: Fn(ReceivedMessage, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Disposition, HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    /// Creates a new function-backed handler.
    ///
    /// # Arguments
    ///
    /// * `handler_fn` - The message handler function
    /// * `shared_resources` - Resources shared between message processing calls
    pub fn new(handler_fn: F, shared_resources: TShared) -> Self {
        HandlerFn {
            handler_fn,
            shared_resources,
            _future: PhantomData,
        }
    }
}

/// Shorthand for [`HandlerFn::new`].
///
/// # Example
///
/// ```rust
/// use rs_queue_supervisor::errors::HandlerError;
/// use rs_queue_supervisor::receiver::{Disposition, handler_fn};
///
/// let handler = handler_fn(
///     |message, prefix: String| async move {
///         println!("{prefix}: {}", message.body);
///         Ok::<_, HandlerError>(Disposition::Complete)
///     },
///     "orders".to_string(),
/// );
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut, TShared>(handler_fn: F, shared_resources: TShared) -> HandlerFn<F, Fut, TShared>
where
    F: Fn(ReceivedMessage, TShared) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Disposition, HandlerError>> + Send + 'static,
    TShared: Send + Sync + Clone + 'static,
{
    HandlerFn::new(handler_fn, shared_resources)
}
