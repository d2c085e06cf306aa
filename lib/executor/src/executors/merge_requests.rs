use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::{future::BoxFuture, FutureExt};
use graphql_parser::{
    query::{
        Definition, Directive, Document, FragmentDefinition, InlineFragment, Mutation,
        OperationDefinition, Query, Selection, SelectionSet, Value, VariableDefinition,
    },
    Pos,
};
use indexmap::IndexMap;
use serde_json::Map;
use tracing::{debug, trace};

use crate::{
    execution_request::{ExecutionRequest, OperationKind},
    executors::{
        common::{BatchExecutor, Executor, ExecutorResponse},
        error::ExecutorError,
    },
    response::{
        execution_result::ExecutionResult,
        graphql_error::{GraphQLError, GraphQLErrorPathSegment},
    },
};

type StaticDocument = Document<'static, String>;
type StaticSelection = Selection<'static, String>;
type StaticFragment = FragmentDefinition<'static, String>;
type StaticVariableDefinition = VariableDefinition<'static, String>;

/// Turns a batch into as few upstream calls as possible.
///
/// Queries of one batch are merged into a single query, mutations into a single mutation.
/// Root fields of the request at index `i` are aliased `_{i}_<key>` and its variables renamed
/// `_v{i}_<name>`, so the merged result can be split back per request.
/// Subscriptions, and documents that cannot be merged, are sent as they are.
pub struct MergingBatchExecutor<E> {
    executor: E,
}

impl<E: Executor> MergingBatchExecutor<E> {
    pub fn new(executor: E) -> Self {
        MergingBatchExecutor { executor }
    }
}

type Settled = Result<Vec<(usize, ExecutorResponse)>, ExecutorError>;

#[async_trait]
impl<E: Executor + 'static> BatchExecutor for MergingBatchExecutor<E> {
    async fn execute_batch(
        &self,
        requests: Vec<ExecutionRequest>,
    ) -> Result<Vec<ExecutorResponse>, ExecutorError> {
        let expected = requests.len();
        let mut calls: Vec<BoxFuture<'_, Settled>> = Vec::new();
        let mut groups: IndexMap<OperationKind, Vec<(usize, ExecutionRequest)>> = IndexMap::new();

        for (index, request) in requests.into_iter().enumerate() {
            if request.operation_type == OperationKind::Subscription {
                calls.push(self.pass_through(index, request));
            } else {
                groups
                    .entry(request.operation_type)
                    .or_default()
                    .push((index, request));
            }
        }

        for (operation_type, group) in groups {
            let mut mergeable = Vec::with_capacity(group.len());
            for (index, request) in group {
                match PrefixedOperation::new(index, &request) {
                    Some(prefixed) => mergeable.push((index, request, prefixed)),
                    None => calls.push(self.pass_through(index, request)),
                }
            }

            if mergeable.len() == 1 {
                if let Some((index, request, _)) = mergeable.pop() {
                    calls.push(self.pass_through(index, request));
                }
            } else if !mergeable.is_empty() {
                calls.push(self.merged(operation_type, mergeable));
            }
        }

        let mut responses: Vec<Option<ExecutorResponse>> = (0..expected).map(|_| None).collect();
        for settled in futures::future::join_all(calls).await {
            for (index, response) in settled? {
                if let Some(slot) = responses.get_mut(index) {
                    *slot = Some(response);
                }
            }
        }

        responses
            .into_iter()
            .map(|response| {
                response.ok_or_else(|| {
                    ExecutorError::MalformedResponse("missing result for a merged request".into())
                })
            })
            .collect()
    }
}

impl<E: Executor> MergingBatchExecutor<E> {
    fn pass_through(&self, index: usize, request: ExecutionRequest) -> BoxFuture<'_, Settled> {
        async move {
            let response = self.executor.execute(request).await?;
            Ok(vec![(index, response)])
        }
        .boxed()
    }

    fn merged(
        &self,
        operation_type: OperationKind,
        operations: Vec<(usize, ExecutionRequest, PrefixedOperation)>,
    ) -> BoxFuture<'_, Settled> {
        async move {
            let indexes: Vec<usize> = operations.iter().map(|(index, _, _)| *index).collect();
            let merged_request = merge_operations(operation_type, operations);
            debug!(
                requests = indexes.len(),
                operation_type = operation_type.as_str(),
                "sending merged request"
            );
            trace!(document = %merged_request.document, "merged document");

            let result = match self.executor.execute(merged_request).await? {
                ExecutorResponse::Single(result) => result,
                ExecutorResponse::Stream(_) => {
                    return Err(ExecutorError::MalformedResponse(
                        "a merged request was answered with a stream".into(),
                    ))
                }
            };

            Ok(split_result(&result, &indexes)
                .into_iter()
                .map(|(index, result)| (index, ExecutorResponse::single(result)))
                .collect())
        }
        .boxed()
    }
}

/// The operation of one request, rewritten so it can live next to others in one document.
struct PrefixedOperation {
    variable_definitions: Vec<StaticVariableDefinition>,
    selections: Vec<StaticSelection>,
    fragments: Vec<StaticFragment>,
}

fn field_prefix(index: usize) -> String {
    format!("_{index}_")
}

fn variable_prefix(index: usize) -> String {
    format!("_v{index}_")
}

impl PrefixedOperation {
    /// `None` when the document does not parse or its operation cannot be selected.
    fn new(index: usize, request: &ExecutionRequest) -> Option<Self> {
        let document: StaticDocument = graphql_parser::parse_query::<String>(&request.document)
            .ok()?
            .into_static();

        let mut operations = Vec::new();
        let mut fragments = Vec::new();
        for definition in document.definitions {
            match definition {
                Definition::Operation(operation) => operations.push(operation),
                Definition::Fragment(fragment) => fragments.push(fragment),
            }
        }

        let operation = select_operation(operations, request.operation_name.as_deref())?;
        let (variable_definitions, selection_set) = match operation {
            OperationDefinition::SelectionSet(selection_set) => (Vec::new(), selection_set),
            OperationDefinition::Query(query) => (query.variable_definitions, query.selection_set),
            OperationDefinition::Mutation(mutation) => {
                (mutation.variable_definitions, mutation.selection_set)
            }
            OperationDefinition::Subscription(_) => return None,
        };

        let renamer = Renamer {
            variable_prefix: variable_prefix(index),
            fragment_prefix: field_prefix(index),
        };

        let variable_definitions = variable_definitions
            .into_iter()
            .map(|mut definition| {
                definition.name = renamer.variable(&definition.name);
                definition
            })
            .collect();

        let mut selections = selection_set.items;
        renamer.selections(&mut selections);
        let fragments: HashMap<String, StaticFragment> = fragments
            .into_iter()
            .map(|mut fragment| {
                fragment.name = renamer.fragment(&fragment.name);
                renamer.directives(&mut fragment.directives);
                renamer.selections(&mut fragment.selection_set.items);
                (fragment.name.clone(), fragment)
            })
            .collect();

        let selections = alias_root_selections(
            &field_prefix(index),
            selections,
            &fragments,
            &mut Vec::new(),
        );

        Some(PrefixedOperation {
            variable_definitions,
            fragments: used_fragments(&selections, fragments),
            selections,
        })
    }
}

fn select_operation(
    operations: Vec<OperationDefinition<'static, String>>,
    operation_name: Option<&str>,
) -> Option<OperationDefinition<'static, String>> {
    match operation_name {
        Some(operation_name) => operations
            .into_iter()
            .find(|operation| operation_definition_name(operation) == Some(operation_name)),
        None if operations.len() == 1 => operations.into_iter().next(),
        None => None,
    }
}

fn operation_definition_name<'a>(operation: &'a OperationDefinition<'static, String>) -> Option<&'a str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

struct Renamer {
    variable_prefix: String,
    fragment_prefix: String,
}

impl Renamer {
    fn variable(&self, name: &str) -> String {
        format!("{}{}", self.variable_prefix, name)
    }

    fn fragment(&self, name: &str) -> String {
        format!("{}{}", self.fragment_prefix, name)
    }

    fn value(&self, value: &mut Value<'static, String>) {
        match value {
            Value::Variable(name) => *name = self.variable(name),
            Value::List(items) => items.iter_mut().for_each(|item| self.value(item)),
            Value::Object(fields) => fields.values_mut().for_each(|field| self.value(field)),
            _ => {}
        }
    }

    fn directives(&self, directives: &mut [Directive<'static, String>]) {
        for directive in directives {
            for (_, value) in directive.arguments.iter_mut() {
                self.value(value);
            }
        }
    }

    fn selections(&self, selections: &mut [StaticSelection]) {
        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    for (_, value) in field.arguments.iter_mut() {
                        self.value(value);
                    }
                    self.directives(&mut field.directives);
                    self.selections(&mut field.selection_set.items);
                }
                Selection::FragmentSpread(spread) => {
                    spread.fragment_name = self.fragment(&spread.fragment_name);
                    self.directives(&mut spread.directives);
                }
                Selection::InlineFragment(inline_fragment) => {
                    self.directives(&mut inline_fragment.directives);
                    self.selections(&mut inline_fragment.selection_set.items);
                }
            }
        }
    }
}

/// Aliases root fields with `prefix`. Root fragment spreads are inlined, so their fields
/// get aliased as well.
fn alias_root_selections(
    prefix: &str,
    selections: Vec<StaticSelection>,
    fragments: &HashMap<String, StaticFragment>,
    visiting: &mut Vec<String>,
) -> Vec<StaticSelection> {
    selections
        .into_iter()
        .filter_map(|selection| match selection {
            Selection::Field(mut field) => {
                let response_key = field.alias.take().unwrap_or_else(|| field.name.clone());
                field.alias = Some(format!("{prefix}{response_key}"));
                Some(Selection::Field(field))
            }
            Selection::InlineFragment(mut inline_fragment) => {
                inline_fragment.selection_set.items = alias_root_selections(
                    prefix,
                    std::mem::take(&mut inline_fragment.selection_set.items),
                    fragments,
                    visiting,
                );
                Some(Selection::InlineFragment(inline_fragment))
            }
            Selection::FragmentSpread(spread) => {
                if visiting.contains(&spread.fragment_name) {
                    return None;
                }
                let fragment = fragments.get(&spread.fragment_name)?;
                visiting.push(spread.fragment_name.clone());
                let items = alias_root_selections(
                    prefix,
                    fragment.selection_set.items.clone(),
                    fragments,
                    visiting,
                );
                visiting.pop();
                Some(Selection::InlineFragment(InlineFragment {
                    position: spread.position,
                    type_condition: Some(fragment.type_condition.clone()),
                    directives: spread.directives,
                    selection_set: SelectionSet {
                        span: fragment.selection_set.span,
                        items,
                    },
                }))
            }
        })
        .collect()
}

/// Fragments reachable from `selections`, unused fragments fail upstream validation.
fn used_fragments(
    selections: &[StaticSelection],
    mut fragments: HashMap<String, StaticFragment>,
) -> Vec<StaticFragment> {
    let mut pending = Vec::new();
    collect_spreads(selections, &mut pending);

    let mut seen = HashSet::new();
    let mut used = Vec::new();
    while let Some(name) = pending.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(fragment) = fragments.remove(&name) {
            collect_spreads(&fragment.selection_set.items, &mut pending);
            used.push(fragment);
        }
    }
    used.sort_by(|left, right| left.name.cmp(&right.name));
    used
}

fn collect_spreads(selections: &[StaticSelection], names: &mut Vec<String>) {
    for selection in selections {
        match selection {
            Selection::Field(field) => collect_spreads(&field.selection_set.items, names),
            Selection::FragmentSpread(spread) => names.push(spread.fragment_name.clone()),
            Selection::InlineFragment(inline_fragment) => {
                collect_spreads(&inline_fragment.selection_set.items, names)
            }
        }
    }
}

fn merge_operations(
    operation_type: OperationKind,
    operations: Vec<(usize, ExecutionRequest, PrefixedOperation)>,
) -> ExecutionRequest {
    let mut variable_definitions = Vec::new();
    let mut items = Vec::new();
    let mut fragments = Vec::new();
    let mut variables = Map::new();
    let mut first_request: Option<ExecutionRequest> = None;

    for (index, request, prefixed) in operations {
        let prefix = variable_prefix(index);
        for (name, value) in &request.variables {
            let prefixed_name = format!("{prefix}{name}");
            if prefixed
                .variable_definitions
                .iter()
                .any(|definition| definition.name == prefixed_name)
            {
                variables.insert(prefixed_name, value.clone());
            }
        }
        variable_definitions.extend(prefixed.variable_definitions);
        items.extend(prefixed.selections);
        fragments.extend(prefixed.fragments);
        if first_request.is_none() {
            first_request = Some(request);
        }
    }

    let selection_set = SelectionSet {
        span: (Pos::default(), Pos::default()),
        items,
    };
    let operation = match operation_type {
        OperationKind::Mutation => OperationDefinition::Mutation(Mutation {
            position: Pos::default(),
            name: None,
            variable_definitions,
            directives: Vec::new(),
            selection_set,
        }),
        _ => OperationDefinition::Query(Query {
            position: Pos::default(),
            name: None,
            variable_definitions,
            directives: Vec::new(),
            selection_set,
        }),
    };

    let mut definitions = vec![Definition::Operation(operation)];
    definitions.extend(fragments.into_iter().map(Definition::Fragment));
    let document = Document { definitions };

    let mut merged = ExecutionRequest::new(document.to_string(), operation_type).with_variables(variables);
    if let Some(first_request) = first_request {
        merged = merged
            .with_context(first_request.context)
            .with_info(first_request.info);
        merged.info.root_field = None;
    }
    merged
}

/// Parses `_{index}_{key}`.
fn parse_prefixed_key(prefixed_key: &str) -> Option<(usize, &str)> {
    let (index, key) = prefixed_key.strip_prefix('_')?.split_once('_')?;
    Some((index.parse().ok()?, key))
}

/// Distributes a merged result to the requests it was merged from.
///
/// Data goes to the request encoded in its key prefix. Errors located under a prefixed root
/// field go to that request with the prefix removed, other errors go to every request.
fn split_result(result: &ExecutionResult, indexes: &[usize]) -> Vec<(usize, ExecutionResult)> {
    let mut split: IndexMap<usize, ExecutionResult> = indexes
        .iter()
        .map(|index| {
            (
                *index,
                ExecutionResult {
                    data: None,
                    errors: None,
                    extensions: result.extensions.clone(),
                    path: None,
                    has_next: None,
                },
            )
        })
        .collect();

    if let Some(serde_json::Value::Object(data)) = &result.data {
        for target in split.values_mut() {
            target.data = Some(serde_json::Value::Object(Map::new()));
        }
        for (prefixed_key, value) in data {
            let Some((index, key)) = parse_prefixed_key(prefixed_key) else {
                continue;
            };
            if let Some(serde_json::Value::Object(target)) =
                split.get_mut(&index).and_then(|target| target.data.as_mut())
            {
                target.insert(key.to_string(), value.clone());
            }
        }
    }

    for error in result.errors() {
        let routed = match error.path.as_deref() {
            Some([GraphQLErrorPathSegment::String(first), rest @ ..]) => parse_prefixed_key(first)
                .filter(|(index, _)| split.contains_key(index))
                .map(|(index, key)| {
                    let mut path = Vec::with_capacity(rest.len() + 1);
                    path.push(GraphQLErrorPathSegment::String(key.to_string()));
                    path.extend(rest.iter().cloned());
                    (index, path)
                }),
            _ => None,
        };

        match routed {
            Some((index, path)) => {
                if let Some(target) = split.get_mut(&index) {
                    target.push_error(GraphQLError {
                        path: Some(path),
                        ..error.clone()
                    });
                }
            }
            None => {
                for target in split.values_mut() {
                    target.push_error(error.clone());
                }
            }
        }
    }

    split.into_iter().collect()
}
