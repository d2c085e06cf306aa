use std::{collections::HashMap, sync::Arc};

use futures::{
    future::{join_all, ready},
    stream::{self, select_all, BoxStream},
    StreamExt,
};
use hive_gateway_config::HiveGatewayConfig;
use hive_gateway_internal::telemetry::metrics::{MetricsError, RegistryHandle};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::{
    context::GatewayContext,
    delegation::{
        delegate::{DelegatedResult, Delegator, PayloadStream, RequestScope, RootOutcome},
        error::{DelegationError, SubschemaError},
        normalize::{normalize_operation, NormalizedOperation},
        plan::{DelegationPlan, DelegationPlanner},
        subschema::{share_batch_windows, Subschema},
    },
    execution_request::OperationKind,
    executors::common::ExecutorArc,
    plugins::{
        plugin_context::PluginRequestState,
        plugin_trait::{GatewayPlugin, GatewayPluginBoxed},
        prometheus::PrometheusPlugin,
    },
    response::{
        execution_result::ExecutionResult,
        graphql_error::{GraphQLError, GraphQLErrorPathSegment},
        merge::{CallOrder, ResponseMerger},
        projection::{project_at_path, project_data},
    },
    schema::metadata::SchemaMetadata,
    utils::traverse::traverse_and_callback,
};

/// A client GraphQL request, as sent over HTTP.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }
}

pub enum GatewayResponse {
    Single(ExecutionResult),
    /// An initial result followed by incremental payloads. The last item has `hasNext: false`.
    Incremental(BoxStream<'static, ExecutionResult>),
}

impl GatewayResponse {
    pub fn is_incremental(&self) -> bool {
        matches!(self, GatewayResponse::Incremental(_))
    }

    pub fn into_single(self) -> Option<ExecutionResult> {
        match self {
            GatewayResponse::Single(result) => Some(result),
            GatewayResponse::Incremental(_) => None,
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, ExecutionResult> {
        match self {
            GatewayResponse::Single(result) => stream::once(ready(result)).boxed(),
            GatewayResponse::Incremental(stream) => stream,
        }
    }
}

impl std::fmt::Debug for GatewayResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayResponse::Single(result) => f.debug_tuple("Single").field(result).finish(),
            GatewayResponse::Incremental(_) => f.write_str("Incremental(..)"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum GatewayBuildError {
    #[error("At least one subschema is required")]
    NoSubschemas,
    #[error("Subschema \"{0}\" is registered more than once")]
    DuplicateSubschema(String),
    #[error(transparent)]
    Subschema(#[from] SubschemaError),
    #[error("No schema source was provided for subschema \"{0}\"")]
    MissingSource(String),
    #[error("Failed to set up metrics: {0}")]
    Metrics(#[from] MetricsError),
}

/// What a configured subschema is built from: its SDL and the executor reaching it.
#[derive(Clone)]
pub struct SubschemaSource {
    pub sdl: String,
    pub executor: ExecutorArc,
}

#[derive(Default)]
pub struct StitchedGatewayBuilder {
    subschemas: Vec<Subschema>,
    plugins: Vec<GatewayPluginBoxed>,
}

impl StitchedGatewayBuilder {
    pub fn subschema(mut self, subschema: Subschema) -> Self {
        self.subschemas.push(subschema);
        self
    }

    pub fn plugin(mut self, plugin: impl GatewayPlugin) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    pub fn build(self) -> Result<StitchedGateway, GatewayBuildError> {
        let mut subschemas = self.subschemas;
        if subschemas.is_empty() {
            return Err(GatewayBuildError::NoSubschemas);
        }
        for (index, subschema) in subschemas.iter().enumerate() {
            if subschemas[..index]
                .iter()
                .any(|other| other.name() == subschema.name())
            {
                return Err(GatewayBuildError::DuplicateSubschema(
                    subschema.name().to_string(),
                ));
            }
        }

        share_batch_windows(&mut subschemas);
        let schema = SchemaMetadata::merged(subschemas.iter().map(Subschema::schema));
        info!(
            subschemas = subschemas.len(),
            types = schema.types().count(),
            plugins = self.plugins.len(),
            "gateway schema assembled"
        );

        let plugins = PluginRequestState::new(Arc::new(self.plugins));
        Ok(StitchedGateway {
            delegator: Arc::new(Delegator::new(schema, subschemas, plugins)),
        })
    }
}

/// Serves client operations over a set of subschemas merged into one schema.
#[derive(Clone)]
pub struct StitchedGateway {
    delegator: Arc<Delegator>,
}

impl StitchedGateway {
    pub fn builder() -> StitchedGatewayBuilder {
        StitchedGatewayBuilder::default()
    }

    /// Builds the gateway described by `config`. Every configured subschema needs a source
    /// under its name in `sources`.
    pub fn from_config(
        config: &HiveGatewayConfig,
        mut sources: HashMap<String, SubschemaSource>,
        registry: &RegistryHandle,
    ) -> Result<Self, GatewayBuildError> {
        let mut builder = StitchedGateway::builder();
        for entry in &config.subschemas {
            let source = sources
                .remove(&entry.name)
                .ok_or_else(|| GatewayBuildError::MissingSource(entry.name.clone()))?;
            builder = builder.subschema(Subschema::from_config(
                entry,
                &source.sdl,
                source.executor,
            )?);
        }
        if !sources.is_empty() {
            debug!(
                unused = ?sources.keys().collect::<Vec<_>>(),
                "ignoring schema sources without a configured subschema"
            );
        }

        if config.metrics.enabled {
            builder = builder.plugin(PrometheusPlugin::new(&config.metrics, registry)?);
        }

        builder.build()
    }

    pub fn schema(&self) -> &SchemaMetadata {
        self.delegator.schema()
    }

    pub fn subschema(&self, name: &str) -> Option<&Subschema> {
        self.delegator
            .subschemas()
            .iter()
            .find(|subschema| subschema.name() == name)
    }

    /// Resolves a client operation. Subscriptions answer with an incremental response
    /// carrying one payload per event.
    #[instrument(
        level = "debug",
        skip_all,
        fields(operation_name = request.operation_name.as_deref(), request_id = context.request_id())
    )]
    pub async fn execute(&self, request: GraphQLRequest, context: GatewayContext) -> GatewayResponse {
        let operation = match self.normalize(request, &context) {
            Ok(operation) => operation,
            Err(err) => return GatewayResponse::Single(rejected(&err)),
        };

        if operation.document.operation_kind == OperationKind::Subscription {
            return GatewayResponse::Incremental(self.subscribe_normalized(operation, context));
        }

        let plan = DelegationPlanner::new(
            self.delegator.schema(),
            self.delegator.subschemas(),
            &operation,
        )
        .plan();
        debug!(
            root_fetches = plan.fetches.len(),
            unresolvable = plan.errors.len(),
            "operation planned"
        );

        let scope = RequestScope {
            context,
            operation_name: plan.operation_name.clone(),
        };
        let delegator = &self.delegator;

        let outcomes = match plan.operation_kind {
            // mutation root fields run one after another
            OperationKind::Mutation => {
                let mut outcomes = Vec::with_capacity(plan.fetches.len());
                for (index, fetch) in plan.fetches.iter().enumerate() {
                    outcomes.push(
                        delegator
                            .resolve_root_fetch(fetch, CallOrder::root(index), &scope)
                            .await,
                    );
                }
                outcomes
            }
            _ => {
                join_all(plan.fetches.iter().enumerate().map(|(index, fetch)| {
                    delegator.resolve_root_fetch(fetch, CallOrder::root(index), &scope)
                }))
                .await
            }
        };

        let Assembled {
            result,
            incremental,
        } = assemble(delegator.schema(), &plan, &operation.errors, outcomes);

        if incremental.is_empty() {
            return GatewayResponse::Single(result);
        }

        debug!(streams = incremental.len(), "answering incrementally");
        let initial = ExecutionResult {
            has_next: Some(true),
            ..result
        };
        let payloads = complete_payloads(
            self.delegator.clone(),
            Arc::new(plan),
            scope,
            select_all(incremental).boxed(),
        );
        let completed = ExecutionResult {
            has_next: Some(false),
            ..Default::default()
        };

        GatewayResponse::Incremental(
            stream::once(ready(initial))
                .chain(payloads)
                .chain(stream::once(ready(completed)))
                .boxed(),
        )
    }

    /// Resolves a subscription: one response per event of the subschema owning its root field.
    pub fn subscribe(
        &self,
        request: GraphQLRequest,
        context: GatewayContext,
    ) -> BoxStream<'static, ExecutionResult> {
        match self.normalize(request, &context) {
            Ok(operation) => self.subscribe_normalized(operation, context),
            Err(err) => stream::once(ready(rejected(&err))).boxed(),
        }
    }

    fn normalize(
        &self,
        request: GraphQLRequest,
        context: &GatewayContext,
    ) -> Result<NormalizedOperation, DelegationError> {
        context.insert(self.delegator.plugins().clone());
        normalize_operation(
            self.delegator.schema(),
            &request.query,
            request.operation_name.as_deref(),
            request.variables.unwrap_or_default(),
        )
    }

    fn subscribe_normalized(
        &self,
        operation: NormalizedOperation,
        context: GatewayContext,
    ) -> BoxStream<'static, ExecutionResult> {
        let plan = DelegationPlanner::new(
            self.delegator.schema(),
            self.delegator.subschemas(),
            &operation,
        )
        .plan();

        if plan.fetches.len() != 1 {
            let result = if plan.fetches.is_empty() && !plan.errors.is_empty() {
                ExecutionResult::from_errors(plan.errors)
            } else {
                rejected(&DelegationError::SubscriptionRootFields(plan.fetches.len()))
            };
            return stream::once(ready(result)).boxed();
        }

        let delegator = self.delegator.clone();
        let plan = Arc::new(plan);
        let upfront_errors = Arc::new(operation.errors);
        let scope = RequestScope {
            context,
            operation_name: plan.operation_name.clone(),
        };

        let events = {
            let delegator = delegator.clone();
            let plan = plan.clone();
            let scope = scope.clone();
            stream::once(async move {
                match delegator.delegate_root(&plan.fetches[0], &scope).await {
                    Ok(DelegatedResult::Single(result)) => stream::once(ready(Ok(result))).boxed(),
                    Ok(DelegatedResult::Stream(events)) => events.map(Ok).boxed(),
                    Err(err) => stream::once(ready(Err(err))).boxed(),
                }
            })
            .flatten()
        };

        events
            .then(move |event| {
                let delegator = delegator.clone();
                let plan = plan.clone();
                let upfront_errors = upfront_errors.clone();
                let scope = scope.clone();
                async move {
                    let fetch = &plan.fetches[0];
                    let order = CallOrder::root(0);
                    let outcome = match event {
                        Ok(result) => {
                            delegator
                                .complete_root_result(fetch, order, result, &scope)
                                .await
                        }
                        Err(err) => delegator.failed_root_fetch(fetch, order, &err),
                    };
                    assemble(delegator.schema(), &plan, &upfront_errors, vec![outcome]).result
                }
            })
            .boxed()
    }
}

struct Assembled {
    result: ExecutionResult,
    incremental: Vec<PayloadStream>,
}

/// Merges the outcomes of the root fetches into one response shaped like the client operation.
fn assemble(
    schema: &SchemaMetadata,
    plan: &DelegationPlan,
    upfront_errors: &[GraphQLError],
    outcomes: Vec<RootOutcome>,
) -> Assembled {
    let mut merger = ResponseMerger::new();
    merger.push_errors(&CallOrder::default(), upfront_errors.iter().cloned());

    let mut incremental = Vec::new();
    for outcome in outcomes {
        merger.splice(&[], outcome.data);
        for (order, error) in outcome.errors {
            merger.push_errors(&order, [error]);
        }
        merger.merge_extensions(outcome.extensions);
        incremental.extend(outcome.incremental);
    }
    let unresolved = errors_per_object(merger.data(), &plan.errors);
    merger.push_errors(&CallOrder::default(), unresolved);

    let (data, errors, extensions) = merger.finish();
    let data = project_data(
        &data,
        plan.operation_kind.root_type_name(),
        &plan.selections,
        schema,
    );

    Assembled {
        result: ExecutionResult {
            data: Some(data),
            errors: (!errors.is_empty()).then_some(errors),
            extensions,
            ..Default::default()
        },
        incremental,
    }
}

/// Planning errors point at a field through response keys only. Repeats each of them for
/// every object of `data` holding the field, so list items get an error of their own.
fn errors_per_object(data: &Value, errors: &[GraphQLError]) -> Vec<GraphQLError> {
    let mut expanded = Vec::with_capacity(errors.len());
    for error in errors {
        let keys: Vec<String> = error
            .path
            .iter()
            .flatten()
            .filter_map(|segment| match segment {
                GraphQLErrorPathSegment::String(key) => Some(key.clone()),
                GraphQLErrorPathSegment::Index(_) => None,
            })
            .collect();
        let Some((field_key, parent)) = keys.split_last() else {
            expanded.push(error.clone());
            continue;
        };

        traverse_and_callback(data, parent, &mut Vec::new(), &mut |_, path| {
            let mut path = path.to_vec();
            path.push(field_key.as_str().into());
            expanded.push(error.clone().with_path(path));
        });
    }
    expanded
}

/// Resolves the merged fields of every incremental payload and shapes it like the client
/// selection found at its path. Payloads streamed by the merges of a payload follow it.
fn complete_payloads(
    delegator: Arc<Delegator>,
    plan: Arc<DelegationPlan>,
    scope: RequestScope,
    payloads: PayloadStream,
) -> BoxStream<'static, ExecutionResult> {
    payloads
        .then(move |payload| {
            let delegator = delegator.clone();
            let plan = plan.clone();
            let scope = scope.clone();
            async move {
                let (mut result, nested) = delegator.complete_payload(payload, &scope).await;
                let path = result.path.clone().unwrap_or_default();
                result.data = result.data.and_then(|data| {
                    project_at_path(
                        &data,
                        plan.operation_kind.root_type_name(),
                        &plan.selections,
                        &path,
                        delegator.schema(),
                    )
                });

                let nested = if nested.is_empty() {
                    stream::empty().boxed()
                } else {
                    complete_payloads(delegator, plan, scope, select_all(nested).boxed())
                };
                stream::once(ready(result)).chain(nested)
            }
        })
        .flatten()
        .filter(|result| ready(result.data.is_some() || result.has_errors()))
        .boxed()
}

fn rejected(err: &DelegationError) -> ExecutionResult {
    debug!(error = %err, "operation rejected");
    ExecutionResult::from_errors(vec![GraphQLError::from(err)])
}
