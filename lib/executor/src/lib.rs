pub mod context;
pub mod delegation;
pub mod execution_request;
pub mod executors;
pub mod gateway;
pub mod plugins;
pub mod response;
pub mod schema;
pub mod utils;

#[cfg(test)]
mod tests;

pub use context::GatewayContext;
pub use delegation::subschema::Subschema;
pub use execution_request::{ExecutionRequest, OperationKind, RequestInfo};
pub use executors::{
    batch::{BatchingExecutor, BatchingOptions, FlushSchedule},
    common::{
        BatchExecutor, BatchExecutorArc, Executor, ExecutorArc, ExecutorResponse, FnBatchExecutor,
        FnExecutor,
    },
    error::ExecutorError,
    local::LocalExecutor,
};
pub use gateway::{GatewayResponse, GraphQLRequest, StitchedGateway, SubschemaSource};
pub use plugins::{
    hooks::on_fetch::FetchEvent, plugin_trait::GatewayPlugin, prometheus::PrometheusPlugin,
};
pub use response::{execution_result::ExecutionResult, graphql_error::GraphQLError};
