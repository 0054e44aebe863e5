//! The `Handler` trait is heavily inspired by `tide`'s approach to endpoint handlers.
use std::future::Future;

/// Implementers of the `Handler` trait process the messages pulled from a queue by a
/// [`Consumer`](crate::consumers::Consumer).
///
/// # Scope
///
/// `handle` gets the decoded message and nothing else: the consumer takes care of acking or
/// dead-lettering it according to the outcome of processing.
///
/// - `Ok(true)`: the message was processed, it is acked and removed from the queue;
/// - `Ok(false)`: the message could not be processed, it is dead-lettered;
/// - `Err(_)`: treated exactly like `Ok(false)`.
///
/// Expected failures should be reported as `Ok(false)`; errors are accepted for the
/// unexpected ones. Either way, there is a single processing attempt per delivery.
///
/// # Implementers
///
/// You can implement `Handler` for a struct, or wrap an async closure in a [`ClosureHandler`].
#[async_trait::async_trait]
pub trait Handler<M>: Send + Sync + 'static {
    async fn handle(&self, message: M) -> Result<bool, anyhow::Error>;
}

/// Implement the [`Handler`] trait for all Boxed handlers.
///
/// E.g. Box<dyn Handler<M>>.
#[async_trait::async_trait]
impl<M, H> Handler<M> for Box<H>
where
    M: Send + 'static,
    H: Handler<M> + ?Sized,
{
    async fn handle(&self, message: M) -> Result<bool, anyhow::Error> {
        H::handle(self, message).await
    }
}

/// A [`Handler`] backed by an async closure (or an async function) with a matching signature:
/// `Fn(M) -> Fut` where `Fut` resolves to `Result<bool, anyhow::Error>`.
///
/// The wrapper is needed to implement [`Handler`] for closures without overlapping with the
/// implementation for `Box<H>`.
pub struct ClosureHandler<F>(F);

impl<F> ClosureHandler<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<M, F, Fut> Handler<M> for ClosureHandler<F>
where
    M: Send + 'static,
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, anyhow::Error>> + Send + 'static,
{
    async fn handle(&self, message: M) -> Result<bool, anyhow::Error> {
        // `self.0`, in this case, is a function, which we are calling on its argument using
        // parenthesis notation - self.0(_)
        (self.0)(message).await
    }
}
