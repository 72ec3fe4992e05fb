use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

/// The shared resource the scheduler arbitrates.
///
/// Called at most `concurrency_limit` times concurrently. Errors are handed
/// to the caller of the matching `enqueue` untouched.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    type Args: Send + 'static;
    type Output: Send + 'static;
    type Error: Send + 'static;

    async fn execute(&self, operation: &str, args: Self::Args) -> Result<Self::Output, Self::Error>;
}

#[async_trait]
impl<E: Executor> Executor for Arc<E> {
    type Args = E::Args;
    type Output = E::Output;
    type Error = E::Error;

    async fn execute(&self, operation: &str, args: Self::Args) -> Result<Self::Output, Self::Error> {
        (**self).execute(operation, args).await
    }
}

/// [`Executor`] backed by an async closure.
pub struct FnExecutor<F, A, O, Er> {
    f: F,
    _marker: PhantomData<fn(A) -> Result<O, Er>>,
}

/// Wraps `f(operation, args)` as an [`Executor`].
pub fn executor_fn<F, Fut, A, O, Er>(f: F) -> FnExecutor<F, A, O, Er>
where
    F: Fn(String, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, Er>> + Send + 'static,
{
    FnExecutor {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, A, O, Er> Executor for FnExecutor<F, A, O, Er>
where
    F: Fn(String, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, Er>> + Send + 'static,
    A: Send + 'static,
    O: Send + 'static,
    Er: Send + 'static,
{
    type Args = A;
    type Output = O;
    type Error = Er;

    async fn execute(&self, operation: &str, args: A) -> Result<O, Er> {
        (self.f)(operation.to_string(), args).await
    }
}
