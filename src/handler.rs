//! Message handler contract for consumers.
//!
//! Handlers are always task-returning: synchronous work simply returns a
//! ready future.

use std::future::Future;

use futures::future::BoxFuture;

use crate::envelope::Payload;
use crate::error::HandlerError;

/// Handler for processing messages delivered by a consumer.
pub trait MessageHandler: Send + Sync {
    /// Process one decoded message payload.
    fn handle(&self, payload: Payload) -> BoxFuture<'static, Result<(), HandlerError>>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a handler.
///
/// ```ignore
/// consumer
///     .start_consuming(handler_fn(|payload| async move {
///         println!("{:?}", payload);
///         Ok(())
///     }))
///     .await?;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn handle(&self, payload: Payload) -> BoxFuture<'static, Result<(), HandlerError>> {
        Box::pin((self.f)(payload))
    }
}
