use std::{future::Future, sync::Arc};

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};

use crate::{
    execution_request::ExecutionRequest, executors::error::ExecutorError,
    response::execution_result::ExecutionResult,
};

/// What an executor answers: a single result, or a sequence of incremental results.
///
/// Single results are shared, callers coalesced onto the same request receive the same `Arc`.
pub enum ExecutorResponse {
    Single(Arc<ExecutionResult>),
    Stream(BoxStream<'static, ExecutionResult>),
}

impl ExecutorResponse {
    pub fn single(result: ExecutionResult) -> Self {
        ExecutorResponse::Single(Arc::new(result))
    }

    pub fn into_single(self) -> Option<Arc<ExecutionResult>> {
        match self {
            ExecutorResponse::Single(result) => Some(result),
            ExecutorResponse::Stream(_) => None,
        }
    }

    /// Turns the response into a stream. A single result becomes a stream of one item.
    pub fn into_stream(self) -> BoxStream<'static, ExecutionResult> {
        match self {
            ExecutorResponse::Single(result) => {
                futures::stream::once(async move { Arc::unwrap_or_clone(result) }).boxed()
            }
            ExecutorResponse::Stream(stream) => stream,
        }
    }
}

impl std::fmt::Debug for ExecutorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorResponse::Single(result) => f.debug_tuple("Single").field(result).finish(),
            ExecutorResponse::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

/// Calls one upstream and returns its response.
///
/// A transport failure is an `Err`, GraphQL errors are part of the returned result.
/// Requests with equal document, operation name and variables may be answered by one call.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutorResponse, ExecutorError>;

    fn to_arc(self) -> ExecutorArc
    where
        Self: Sized + 'static,
    {
        Arc::new(self)
    }
}

pub type ExecutorArc = Arc<dyn Executor>;

/// An executor accepting several requests in one invocation.
///
/// Implementations must answer with exactly one response per request, in request order.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn execute_batch(
        &self,
        requests: Vec<ExecutionRequest>,
    ) -> Result<Vec<ExecutorResponse>, ExecutorError>;
}

pub type BatchExecutorArc = Arc<dyn BatchExecutor>;

/// An [`Executor`] backed by an async function.
pub struct FnExecutor<F>(F);

impl<F, Fut> FnExecutor<F>
where
    F: Fn(ExecutionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutorResponse, ExecutorError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        FnExecutor(f)
    }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(ExecutionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutorResponse, ExecutorError>> + Send + 'static,
{
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutorResponse, ExecutorError> {
        (self.0)(request).await
    }
}

/// A [`BatchExecutor`] backed by an async function.
pub struct FnBatchExecutor<F>(F);

impl<F, Fut> FnBatchExecutor<F>
where
    F: Fn(Vec<ExecutionRequest>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<ExecutorResponse>, ExecutorError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        FnBatchExecutor(f)
    }
}

#[async_trait]
impl<F, Fut> BatchExecutor for FnBatchExecutor<F>
where
    F: Fn(Vec<ExecutionRequest>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<ExecutorResponse>, ExecutorError>> + Send + 'static,
{
    async fn execute_batch(
        &self,
        requests: Vec<ExecutionRequest>,
    ) -> Result<Vec<ExecutorResponse>, ExecutorError> {
        (self.0)(requests).await
    }
}

#[async_trait]
impl<T: Executor + ?Sized> Executor for Arc<T> {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutorResponse, ExecutorError> {
        (**self).execute(request).await
    }
}
