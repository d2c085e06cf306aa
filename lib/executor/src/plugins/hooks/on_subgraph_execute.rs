use std::time::{Duration, Instant};

use crate::{
    context::GatewayContext,
    execution_request::{ExecutionRequest, OperationKind, RequestInfo},
    executors::{common::ExecutorResponse, error::ExecutorError},
    response::{execution_result::ExecutionResult, graphql_error::GraphQLError},
};

pub type SubgraphExecuteOutcome = Result<ExecutorResponse, ExecutorError>;

pub type OnSubgraphExecuteEndCallback<'exec> = Box<
    dyn FnOnce(OnSubgraphExecuteEndHookPayload<'exec>) -> OnSubgraphExecuteEndHookResult<'exec>
        + Send
        + 'exec,
>;

/// Seen by every plugin before a subschema is called.
pub struct OnSubgraphExecuteStartHookPayload<'exec> {
    pub context: &'exec GatewayContext,
    pub subschema_name: &'exec str,
    pub started_at: Instant,

    /// The outgoing request. Plugins may replace it, the last version is sent.
    pub execution_request: ExecutionRequest,
}

pub enum StartControlFlow<'exec> {
    Proceed,
    /// Skips the remaining plugins and the executor call.
    Respond(SubgraphExecuteOutcome),
    OnEnd(OnSubgraphExecuteEndCallback<'exec>),
}

pub struct OnSubgraphExecuteStartHookResult<'exec> {
    pub payload: OnSubgraphExecuteStartHookPayload<'exec>,
    pub control_flow: StartControlFlow<'exec>,
}

impl<'exec> OnSubgraphExecuteStartHookPayload<'exec> {
    pub fn proceed(self) -> OnSubgraphExecuteStartHookResult<'exec> {
        self.with_control_flow(StartControlFlow::Proceed)
    }

    pub fn respond(self, outcome: SubgraphExecuteOutcome) -> OnSubgraphExecuteStartHookResult<'exec> {
        self.with_control_flow(StartControlFlow::Respond(outcome))
    }

    /// Answers the call with a single GraphQL error instead of calling the subschema.
    pub fn reject(self, error: GraphQLError) -> OnSubgraphExecuteStartHookResult<'exec> {
        self.respond(Ok(ExecutorResponse::single(ExecutionResult::from_errors(
            vec![error],
        ))))
    }

    /// Registers `callback` to run once the subschema answered.
    pub fn on_end<F>(self, callback: F) -> OnSubgraphExecuteStartHookResult<'exec>
    where
        F: FnOnce(OnSubgraphExecuteEndHookPayload<'exec>) -> OnSubgraphExecuteEndHookResult<'exec>
            + Send
            + 'exec,
    {
        self.with_control_flow(StartControlFlow::OnEnd(Box::new(callback)))
    }

    fn with_control_flow(
        self,
        control_flow: StartControlFlow<'exec>,
    ) -> OnSubgraphExecuteStartHookResult<'exec> {
        OnSubgraphExecuteStartHookResult {
            payload: self,
            control_flow,
        }
    }
}

pub struct OnSubgraphExecuteEndHookPayload<'exec> {
    pub context: &'exec GatewayContext,
    pub subschema_name: &'exec str,
    pub operation_type: OperationKind,
    pub info: RequestInfo,
    pub duration: Duration,
    pub outcome: SubgraphExecuteOutcome,
}

pub enum EndControlFlow {
    Proceed,
    /// Replaces the outcome and skips the remaining callbacks.
    Replace(SubgraphExecuteOutcome),
}

pub struct OnSubgraphExecuteEndHookResult<'exec> {
    pub payload: OnSubgraphExecuteEndHookPayload<'exec>,
    pub control_flow: EndControlFlow,
}

impl<'exec> OnSubgraphExecuteEndHookPayload<'exec> {
    pub fn proceed(self) -> OnSubgraphExecuteEndHookResult<'exec> {
        OnSubgraphExecuteEndHookResult {
            payload: self,
            control_flow: EndControlFlow::Proceed,
        }
    }

    pub fn replace(self, outcome: SubgraphExecuteOutcome) -> OnSubgraphExecuteEndHookResult<'exec> {
        OnSubgraphExecuteEndHookResult {
            payload: self,
            control_flow: EndControlFlow::Replace(outcome),
        }
    }
}
