use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use crate::{
    execution_request::{ExecutionRequest, OperationKind},
    executors::{
        common::{Executor, ExecutorResponse},
        error::ExecutorError,
    },
    response::execution_result::ExecutionResult,
};

/// Executes requests against an in-process `async_graphql` schema.
///
/// Subscriptions are answered with a stream, everything else with a single result.
pub struct LocalExecutor<E> {
    executor: E,
}

impl<E: async_graphql::Executor> LocalExecutor<E> {
    pub fn new(executor: E) -> Self {
        LocalExecutor { executor }
    }
}

#[async_trait]
impl<E: async_graphql::Executor> Executor for LocalExecutor<E> {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutorResponse, ExecutorError> {
        let operation_type = request.operation_type;
        let local_request: async_graphql::Request = request.into();

        if operation_type == OperationKind::Subscription {
            debug!("opening local subscription stream");
            let stream = async_graphql::Executor::execute_stream(&self.executor, local_request, None)
                .map(|response| {
                    into_execution_result(response)
                        .unwrap_or_else(|err| ExecutionResult::from_error_message(err.to_string()))
                })
                .boxed();
            return Ok(ExecutorResponse::Stream(stream));
        }

        let response = async_graphql::Executor::execute(&self.executor, local_request).await;
        into_execution_result(response).map(ExecutorResponse::single)
    }
}

impl From<ExecutionRequest> for async_graphql::Request {
    fn from(request: ExecutionRequest) -> Self {
        let mut local_request = async_graphql::Request::new(request.document.as_ref())
            .variables(async_graphql::Variables::from_json(Value::Object(
                request.variables,
            )));
        if let Some(operation_name) = request.operation_name {
            local_request = local_request.operation_name(operation_name);
        }
        local_request
    }
}

/// Reads an `async_graphql` response through its wire representation.
fn into_execution_result(
    response: async_graphql::Response,
) -> Result<ExecutionResult, ExecutorError> {
    let serialized = serde_json::to_value(&response)
        .map_err(|err| ExecutorError::MalformedResponse(err.to_string()))?;
    let mut result: ExecutionResult = serde_json::from_value(serialized)
        .map_err(|err| ExecutorError::MalformedResponse(err.to_string()))?;

    if result.data == Some(Value::Null) && result.has_errors() {
        result.data = None;
    }

    Ok(result)
}
