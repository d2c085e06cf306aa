use std::sync::Arc;

use serde_json::{Map, Value};

use crate::{context::GatewayContext, response::graphql_error::GraphQLErrorPathSegment};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::Display)]
pub enum OperationKind {
    #[default]
    #[strum(serialize = "query")]
    Query,
    #[strum(serialize = "mutation")]
    Mutation,
    #[strum(serialize = "subscription")]
    Subscription,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn root_type_name(self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }
}

/// Metadata describing where a request comes from, used for tracing and metric labels.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestInfo {
    pub subschema_name: Option<String>,
    pub client_operation_name: Option<String>,
    /// The client-facing root field the request was created for.
    pub root_field: Option<String>,
    /// Position in the client response the result is merged into.
    pub outer_path: Vec<GraphQLErrorPathSegment>,
}

/// One logical call of an executor.
///
/// Created once per delegation point and consumed by exactly one executor invocation.
/// Requests with equal document, operation name and variables are interchangeable,
/// see [`crate::executors::dedupe::DedupKey`].
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub document: Arc<str>,
    pub variables: Map<String, Value>,
    pub operation_name: Option<String>,
    pub operation_type: OperationKind,
    pub context: GatewayContext,
    pub info: RequestInfo,
}

impl ExecutionRequest {
    pub fn new(document: impl Into<Arc<str>>, operation_type: OperationKind) -> Self {
        ExecutionRequest {
            document: document.into(),
            variables: Map::new(),
            operation_name: None,
            operation_type,
            context: GatewayContext::new(),
            info: RequestInfo::default(),
        }
    }

    pub fn query(document: impl Into<Arc<str>>) -> Self {
        Self::new(document, OperationKind::Query)
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_variable(mut self, name: &str, value: Value) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    pub fn with_context(mut self, context: GatewayContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_info(mut self, info: RequestInfo) -> Self {
        self.info = info;
        self
    }

    pub fn subschema_name(&self) -> &str {
        self.info.subschema_name.as_deref().unwrap_or_default()
    }
}
