use std::time::Instant;

use futures::{future::BoxFuture, stream::BoxStream, FutureExt, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, instrument, trace, warn};

use crate::{
    context::GatewayContext,
    delegation::{
        document::{DelegationDocument, Selection},
        plan::{DeferredMerge, RootFetch},
        subschema::Subschema,
    },
    execution_request::{ExecutionRequest, RequestInfo},
    executors::{common::ExecutorResponse, error::ExecutorError},
    plugins::{
        hooks::{
            on_fetch::{emit_fetch, FetchEvent},
            on_subgraph_execute::{
                EndControlFlow, OnSubgraphExecuteEndHookPayload, OnSubgraphExecuteStartHookPayload,
                StartControlFlow,
            },
        },
        plugin_context::PluginRequestState,
    },
    response::{
        execution_result::ExecutionResult,
        graphql_error::{GraphQLError, GraphQLErrorPathSegment},
        merge::{deep_merge_objects, value_at_path_mut, CallOrder},
    },
    schema::{
        metadata::SchemaMetadata,
        transforms::{transform_request, transform_result},
    },
    utils::{
        consts::ENTITY_RESPONSE_KEY,
        pretty_display::Pretty,
        traverse::{concrete_type_name, traverse_and_callback},
    },
};

pub type OrderedErrors = Vec<(CallOrder, GraphQLError)>;

/// What a subschema answered, with its result transforms applied.
pub enum DelegatedResult {
    Single(ExecutionResult),
    Stream(BoxStream<'static, ExecutionResult>),
}

/// Client request data every delegated call of the request carries.
#[derive(Clone, Debug)]
pub struct RequestScope {
    pub context: GatewayContext,
    pub operation_name: Option<String>,
}

/// The settled result of one root field, ready to be merged into the response.
pub struct RootOutcome {
    /// `{ <response key>: <value> }`
    pub data: Value,
    pub errors: OrderedErrors,
    pub extensions: Option<Map<String, Value>>,
    /// Incremental payloads following the initial result.
    pub incremental: Vec<PayloadStream>,
}

pub type PayloadStream = BoxStream<'static, PendingPayload>;

/// An incremental payload of a delegated call, moved to its position in the client response.
pub struct PendingPayload {
    pub path: Vec<GraphQLErrorPathSegment>,
    /// The value found at `path`.
    pub data: Value,
    pub errors: Vec<GraphQLError>,
    pub extensions: Option<Map<String, Value>>,
    /// Merges still to run on `data`, relative to it.
    pub deferred: Vec<DeferredMerge>,
    pub order: CallOrder,
}

impl PendingPayload {
    /// `payload` answers the delegated field `response_key`, whose value sits at `base` in the
    /// client response. `deferred` are the merges planned relative to that value.
    fn rebased(
        payload: ExecutionResult,
        response_key: &str,
        base: &[GraphQLErrorPathSegment],
        deferred: &[DeferredMerge],
        order: &CallOrder,
    ) -> Self {
        let (relative, data) = match payload.path.unwrap_or_default().split_first() {
            Some((_, relative)) => (relative.to_vec(), payload.data.unwrap_or(Value::Null)),
            None => {
                let data = match payload.data {
                    Some(Value::Object(mut data)) => data.remove(response_key).unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                (Vec::new(), data)
            }
        };

        let keys: Vec<String> = relative
            .iter()
            .filter_map(|segment| match segment {
                GraphQLErrorPathSegment::String(key) => Some(key.clone()),
                GraphQLErrorPathSegment::Index(_) => None,
            })
            .collect();

        PendingPayload {
            path: concat_path(base, &relative),
            data,
            errors: payload
                .errors
                .unwrap_or_default()
                .into_iter()
                .map(|error| error.rebase(base))
                .collect(),
            extensions: payload.extensions,
            deferred: merges_below(deferred, &keys),
            order: order.clone(),
        }
    }
}

/// What resolving the deferred merges of some data left to report.
#[derive(Default)]
pub struct DeferredOutcome {
    pub errors: OrderedErrors,
    pub incremental: Vec<PayloadStream>,
}

struct MergeTarget<'p> {
    merge: &'p DeferredMerge,
    /// Path of the object within the data the merge started from.
    relative_path: Vec<GraphQLErrorPathSegment>,
    variables: Map<String, Value>,
}

struct SettledTarget<'p> {
    target: MergeTarget<'p>,
    entity: Option<Map<String, Value>>,
    errors: OrderedErrors,
    incremental: Vec<PayloadStream>,
}

/// Sends planned documents to subschemas and stitches the answers together.
pub struct Delegator {
    schema: SchemaMetadata,
    subschemas: Vec<Subschema>,
    plugins: PluginRequestState,
}

impl Delegator {
    pub fn new(schema: SchemaMetadata, subschemas: Vec<Subschema>, plugins: PluginRequestState) -> Self {
        Delegator {
            schema,
            subschemas,
            plugins,
        }
    }

    pub fn schema(&self) -> &SchemaMetadata {
        &self.schema
    }

    pub fn subschemas(&self) -> &[Subschema] {
        &self.subschemas
    }

    pub fn plugins(&self) -> &PluginRequestState {
        &self.plugins
    }

    /// One call to a subschema: request transforms, plugin hooks, the executor itself,
    /// then result transforms.
    #[instrument(
        level = "debug",
        skip_all,
        fields(subschema = %self.subschemas[index].name(), root_field = info.root_field.as_deref())
    )]
    pub async fn execute_delegated(
        &self,
        index: usize,
        document: &DelegationDocument,
        variables: Map<String, Value>,
        context: &GatewayContext,
        info: RequestInfo,
    ) -> Result<DelegatedResult, ExecutorError> {
        let subschema = &self.subschemas[index];
        let subschema_name = subschema.name();

        let mut document = document.clone();
        transform_request(&mut document, subschema.transforms());
        trace!(document = %Pretty(&document), "delegating to subschema");

        let mut execution_request = ExecutionRequest::new(document.to_string(), document.operation_kind)
            .with_variables(variables)
            .with_context(context.clone())
            .with_info(info);
        execution_request.operation_name = document.operation_name.clone();

        let started_at = Instant::now();
        let mut on_end_callbacks = vec![];
        let mut early_outcome = None;

        if !self.plugins.is_empty() {
            let mut start_payload = OnSubgraphExecuteStartHookPayload {
                context,
                subschema_name,
                started_at,
                execution_request,
            };
            for plugin in self.plugins.plugins.iter() {
                let result = plugin.on_subgraph_execute(start_payload).await;
                start_payload = result.payload;
                match result.control_flow {
                    StartControlFlow::Proceed => {
                        // continue to next plugin
                    }
                    StartControlFlow::Respond(outcome) => {
                        early_outcome = Some(outcome);
                        break;
                    }
                    StartControlFlow::OnEnd(callback) => {
                        on_end_callbacks.push(callback);
                    }
                }
            }
            execution_request = start_payload.execution_request;
        }

        let operation_type = execution_request.operation_type;
        let info = execution_request.info.clone();

        let mut outcome = match early_outcome {
            Some(outcome) => outcome,
            None => self.call_executor(subschema, execution_request).await,
        };

        if !on_end_callbacks.is_empty() {
            let mut end_payload = OnSubgraphExecuteEndHookPayload {
                context,
                subschema_name,
                operation_type,
                info,
                duration: started_at.elapsed(),
                outcome,
            };
            for callback in on_end_callbacks {
                let result = callback(end_payload);
                end_payload = result.payload;
                match result.control_flow {
                    EndControlFlow::Proceed => {
                        // continue to next callback
                    }
                    EndControlFlow::Replace(outcome) => {
                        end_payload.outcome = outcome;
                        break;
                    }
                }
            }
            outcome = end_payload.outcome;
        }

        let transforms = subschema.transforms().to_vec();
        match outcome? {
            ExecutorResponse::Single(result) => {
                let mut result = std::sync::Arc::unwrap_or_clone(result);
                transform_result(&mut result, &transforms);
                Ok(DelegatedResult::Single(result))
            }
            ExecutorResponse::Stream(stream) => Ok(DelegatedResult::Stream(
                stream
                    .map(move |mut result| {
                        transform_result(&mut result, &transforms);
                        result
                    })
                    .boxed(),
            )),
        }
    }

    async fn call_executor(
        &self,
        subschema: &Subschema,
        execution_request: ExecutionRequest,
    ) -> Result<ExecutorResponse, ExecutorError> {
        let executor = subschema.executor();
        // invocations of a batch window are reported when the window is sent
        if subschema.dispatch().is_batched() {
            return executor.execute(execution_request).await;
        }

        let context = execution_request.context.clone();
        let started_at = Instant::now();
        let outcome = executor.execute(execution_request).await;
        emit_fetch(
            &context,
            &FetchEvent {
                subschema_name: subschema.name().to_string(),
                batch_size: 1,
                batched: false,
                duration: started_at.elapsed(),
                error: outcome.as_ref().err().cloned(),
            },
        );
        outcome
    }

    /// Sends the document of a root fetch, without completing its result.
    pub async fn delegate_root(
        &self,
        fetch: &RootFetch,
        scope: &RequestScope,
    ) -> Result<DelegatedResult, ExecutorError> {
        let info = RequestInfo {
            subschema_name: Some(self.subschemas[fetch.subschema].name().to_string()),
            client_operation_name: scope.operation_name.clone(),
            root_field: Some(fetch.root_field.clone()),
            outer_path: vec![fetch.response_key.as_str().into()],
        };
        self.execute_delegated(
            fetch.subschema,
            &fetch.document,
            fetch.variables.clone(),
            &scope.context,
            info,
        )
        .await
    }

    /// Runs a root fetch and completes its result.
    pub async fn resolve_root_fetch(
        &self,
        fetch: &RootFetch,
        order: CallOrder,
        scope: &RequestScope,
    ) -> RootOutcome {
        let delegated = self.delegate_root(fetch, scope).await;

        let (result, incremental) = match delegated {
            Ok(DelegatedResult::Single(result)) => (result, None),
            Ok(DelegatedResult::Stream(mut stream)) => match stream.next().await {
                Some(initial) => (initial, Some(stream)),
                None => {
                    return self.failed_root_fetch(
                        fetch,
                        order,
                        &ExecutorError::MalformedResponse("the response stream is empty".to_string()),
                    )
                }
            },
            Err(err) => return self.failed_root_fetch(fetch, order, &err),
        };

        let mut outcome = self.complete_root_result(fetch, order.clone(), result, scope).await;
        if let Some(stream) = incremental {
            let response_key = fetch.response_key.clone();
            let base: Vec<GraphQLErrorPathSegment> = vec![response_key.as_str().into()];
            let deferred = merges_below(&fetch.deferred, std::slice::from_ref(&response_key));
            outcome.incremental.push(
                stream
                    .map(move |payload| {
                        PendingPayload::rebased(payload, &response_key, &base, &deferred, &order)
                    })
                    .boxed(),
            );
        }
        outcome
    }

    pub fn failed_root_fetch(&self, fetch: &RootFetch, order: CallOrder, err: &ExecutorError) -> RootOutcome {
        warn!(
            subschema = self.subschemas[fetch.subschema].name(),
            root_field = fetch.root_field.as_str(),
            error = %err,
            "delegated root field failed"
        );
        let mut data = Map::new();
        data.insert(fetch.response_key.clone(), Value::Null);
        RootOutcome {
            data: Value::Object(data),
            errors: vec![(
                order,
                GraphQLError::from(err.to_string()).with_path(vec![fetch.response_key.as_str().into()]),
            )],
            extensions: None,
            incremental: Vec::new(),
        }
    }

    /// Takes the root field out of a subschema result and resolves its merged fields.
    pub async fn complete_root_result(
        &self,
        fetch: &RootFetch,
        order: CallOrder,
        result: ExecutionResult,
        scope: &RequestScope,
    ) -> RootOutcome {
        let base_path: Vec<GraphQLErrorPathSegment> = vec![fetch.response_key.as_str().into()];
        let value = match result.data {
            Some(Value::Object(mut data)) => data.remove(&fetch.response_key).unwrap_or(Value::Null),
            _ => Value::Null,
        };
        let mut data = Map::new();
        data.insert(fetch.response_key.clone(), value);
        let mut data = Value::Object(data);

        let mut errors: OrderedErrors = result
            .errors
            .unwrap_or_default()
            .into_iter()
            .map(|error| (order.clone(), error.rebase(&base_path)))
            .collect();

        let mut incremental = Vec::new();
        if !fetch.deferred.is_empty() {
            let deferred = self
                .resolve_deferred(&mut data, &[], &fetch.deferred, &order, scope)
                .await;
            errors.extend(deferred.errors);
            incremental = deferred.incremental;
        }

        RootOutcome {
            data,
            errors,
            extensions: result.extensions,
            incremental,
        }
    }

    /// Resolves the merged fields of the objects an incremental payload carries. Returns the
    /// payload, not yet shaped for the client, and the payloads its merges stream in turn.
    pub async fn complete_payload(
        &self,
        payload: PendingPayload,
        scope: &RequestScope,
    ) -> (ExecutionResult, Vec<PayloadStream>) {
        let PendingPayload {
            path,
            mut data,
            errors,
            extensions,
            deferred,
            order,
        } = payload;

        let mut errors: OrderedErrors = errors
            .into_iter()
            .map(|error| (order.clone(), error))
            .collect();
        let mut incremental = Vec::new();
        if !deferred.is_empty() {
            let outcome = self
                .resolve_deferred(&mut data, &path, &deferred, &order, scope)
                .await;
            errors.extend(outcome.errors);
            incremental = outcome.incremental;
        }
        errors.sort_by(|(left, _), (right, _)| left.cmp(right));

        let result = ExecutionResult {
            data: Some(data),
            errors: (!errors.is_empty()).then(|| errors.into_iter().map(|(_, error)| error).collect()),
            extensions,
            path: Some(path),
            has_next: Some(true),
        };
        (result, incremental)
    }

    /// Fetches the fields other subschemas provide for the objects found in `data`, one request
    /// per object, all of them concurrently, and merges them into the objects.
    pub fn resolve_deferred<'a>(
        &'a self,
        data: &'a mut Value,
        base_path: &'a [GraphQLErrorPathSegment],
        deferred: &'a [DeferredMerge],
        order: &'a CallOrder,
        scope: &'a RequestScope,
    ) -> BoxFuture<'a, DeferredOutcome> {
        async move {
            let mut outcome = DeferredOutcome::default();
            let targets = self.collect_targets(data, base_path, deferred, order, &mut outcome.errors);
            if targets.is_empty() {
                return outcome;
            }
            debug!(objects = targets.len(), "resolving merged fields");

            let settled = futures::future::join_all(targets.into_iter().enumerate().map(
                |(index, target)| self.resolve_target(target, base_path, order.child(index), scope),
            ))
            .await;

            for SettledTarget {
                target,
                entity,
                errors,
                incremental,
            } in settled
            {
                outcome.errors.extend(errors);
                outcome.incremental.extend(incremental);
                let Some(object) =
                    value_at_path_mut(data, &target.relative_path).and_then(Value::as_object_mut)
                else {
                    continue;
                };
                match entity {
                    Some(entity) => deep_merge_objects(object, entity),
                    None => {
                        for field_key in &target.merge.field_keys {
                            object.entry(field_key.clone()).or_insert(Value::Null);
                        }
                    }
                }
            }

            outcome
        }
        .boxed()
    }

    fn collect_targets<'p>(
        &self,
        data: &Value,
        base_path: &[GraphQLErrorPathSegment],
        deferred: &'p [DeferredMerge],
        order: &CallOrder,
        errors: &mut OrderedErrors,
    ) -> Vec<MergeTarget<'p>> {
        let mut targets = Vec::new();

        for merge in deferred {
            traverse_and_callback(data, &merge.path, &mut Vec::new(), &mut |object, path| {
                let type_name = concrete_type_name(object, &merge.type_name);
                if !self.schema.satisfies_type_condition(type_name, &merge.type_name) {
                    return;
                }

                let mut variables = merge.variables.clone();
                for (argument, response_key) in &merge.key_args {
                    match object.get(response_key) {
                        Some(value) if !value.is_null() => {
                            variables.insert(DeferredMerge::key_variable(argument), value.clone());
                        }
                        _ => {
                            let object_path = concat_path(base_path, path);
                            for field_key in &merge.field_keys {
                                errors.push((
                                    order.clone(),
                                    GraphQLError::from(format!(
                                        "Could not resolve \"{}\": the key \"{}\" of \"{}\" is missing",
                                        field_key, argument.key, merge.type_name
                                    ))
                                    .with_path(concat_path(&object_path, &[field_key.as_str().into()])),
                                ));
                            }
                            return;
                        }
                    }
                }

                targets.push(MergeTarget {
                    merge,
                    relative_path: path.to_vec(),
                    variables,
                });
            });
        }

        targets
    }

    async fn resolve_target<'p>(
        &self,
        target: MergeTarget<'p>,
        base_path: &[GraphQLErrorPathSegment],
        order: CallOrder,
        scope: &RequestScope,
    ) -> SettledTarget<'p> {
        let merge = target.merge;
        let subschema = &self.subschemas[merge.subschema];
        let object_path = concat_path(base_path, &target.relative_path);
        let info = RequestInfo {
            subschema_name: Some(subschema.name().to_string()),
            client_operation_name: scope.operation_name.clone(),
            root_field: merge_field_name(&merge.document),
            outer_path: object_path.clone(),
        };

        let delegated = self
            .execute_delegated(
                merge.subschema,
                &merge.document,
                target.variables.clone(),
                &scope.context,
                info,
            )
            .await;
        let (result, rest) = match delegated {
            Ok(DelegatedResult::Single(result)) => (Ok(result), None),
            Ok(DelegatedResult::Stream(mut stream)) => match stream.next().await {
                Some(first) => (Ok(first), Some(stream)),
                None => (
                    Err(ExecutorError::MalformedResponse(
                        "the response stream is empty".to_string(),
                    )),
                    None,
                ),
            },
            Err(err) => (Err(err), None),
        };

        let (entity, errors) = match result {
            Ok(result) => settle_entity(result, merge, subschema.name(), &object_path),
            Err(err) => {
                warn!(
                    subschema = subschema.name(),
                    type_name = merge.type_name.as_str(),
                    error = %err,
                    "merged fields request failed"
                );
                (
                    None,
                    vec![GraphQLError::from(err.to_string()).with_path(object_path.clone())],
                )
            }
        };
        let mut errors: OrderedErrors = errors
            .into_iter()
            .map(|error| (order.clone(), error))
            .collect();

        let mut incremental = Vec::new();
        if let Some(stream) = rest {
            let deferred = merge.deferred.clone();
            let base = object_path.clone();
            let order = order.clone();
            incremental.push(
                stream
                    .map(move |payload| {
                        PendingPayload::rebased(payload, ENTITY_RESPONSE_KEY, &base, &deferred, &order)
                    })
                    .boxed(),
            );
        }

        let entity = match entity {
            Some(entity) if !merge.deferred.is_empty() => {
                let mut value = Value::Object(entity);
                let deferred = self
                    .resolve_deferred(&mut value, &object_path, &merge.deferred, &order, scope)
                    .await;
                errors.extend(deferred.errors);
                incremental.extend(deferred.incremental);
                match value {
                    Value::Object(entity) => Some(entity),
                    _ => None,
                }
            }
            entity => entity,
        };

        SettledTarget {
            target,
            entity,
            errors,
            incremental,
        }
    }
}

/// Extracts the fetched object and moves the errors of a merge request onto the object path.
///
/// When the object could not be fetched, every field the merge provides gets an error: the
/// errors of the request itself if there are any, a generic one otherwise.
fn settle_entity(
    result: ExecutionResult,
    merge: &DeferredMerge,
    subschema_name: &str,
    object_path: &[GraphQLErrorPathSegment],
) -> (Option<Map<String, Value>>, Vec<GraphQLError>) {
    let entity = match result.data {
        Some(Value::Object(mut data)) => match data.remove(ENTITY_RESPONSE_KEY) {
            Some(Value::Object(entity)) => Some(entity),
            _ => None,
        },
        _ => None,
    };

    let mut errors = Vec::new();
    let mut entity_errors = Vec::new();
    for error in result.errors.unwrap_or_default() {
        let at_entity = error.path.as_ref().is_none_or(|path| path.len() <= 1);
        if entity.is_none() && at_entity {
            entity_errors.push(error);
        } else {
            errors.push(error.rebase(object_path));
        }
    }

    if entity.is_none() {
        if entity_errors.is_empty() {
            entity_errors.push(GraphQLError::from(format!(
                "Could not resolve \"{}\" from subschema \"{}\"",
                merge.type_name, subschema_name
            )));
        }
        for field_key in &merge.field_keys {
            let field_path = concat_path(object_path, &[field_key.as_str().into()]);
            for error in &entity_errors {
                errors.push(error.clone().with_path(field_path.clone()));
            }
        }
    }

    (entity, errors)
}

/// The merges of `deferred` reaching below the response keys `prefix`, made relative to it.
fn merges_below(deferred: &[DeferredMerge], prefix: &[String]) -> Vec<DeferredMerge> {
    deferred
        .iter()
        .filter(|merge| merge.path.starts_with(prefix))
        .map(|merge| DeferredMerge {
            path: merge.path[prefix.len()..].to_vec(),
            ..merge.clone()
        })
        .collect()
}

fn merge_field_name(document: &DelegationDocument) -> Option<String> {
    document.selections.first().and_then(|selection| match selection {
        Selection::Field(field) => Some(field.name.clone()),
        _ => None,
    })
}

fn concat_path(
    base: &[GraphQLErrorPathSegment],
    rest: &[GraphQLErrorPathSegment],
) -> Vec<GraphQLErrorPathSegment> {
    let mut path = Vec::with_capacity(base.len() + rest.len());
    path.extend_from_slice(base);
    path.extend_from_slice(rest);
    path
}
