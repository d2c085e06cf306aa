use std::collections::HashMap;

use graphql_parser::query::{
    Definition, Directive, FragmentDefinition, OperationDefinition, Selection as ParserSelection,
    SelectionSet, TypeCondition, Value as ParserValue, VariableDefinition as ParserVariableDefinition,
};
use serde_json::{Map, Value};
use tracing::trace;

use crate::{
    delegation::{
        document::{
            DelegationDocument, FieldSelection, InlineFragmentSelection, InputValue, Selection,
            VariableDefinition,
        },
        error::DelegationError,
    },
    execution_request::OperationKind,
    response::graphql_error::{GraphQLError, GraphQLErrorPathSegment},
    schema::{metadata::SchemaMetadata, type_ref::TypeRef},
};

/// A client operation, reduced to what the planner needs.
///
/// Fragment spreads are inlined, `@skip`/`@include` are applied, every field knows the
/// gateway type declaring it, and variables are coerced with their defaults.
#[derive(Clone, Debug)]
pub struct NormalizedOperation {
    pub document: DelegationDocument,
    pub variables: Map<String, Value>,
    /// Fields the gateway schema does not know. They are left out of the operation.
    pub errors: Vec<GraphQLError>,
}

type ParserOperation<'a> = OperationDefinition<'a, String>;

pub fn normalize_operation(
    schema: &SchemaMetadata,
    query: &str,
    operation_name: Option<&str>,
    variables: Map<String, Value>,
) -> Result<NormalizedOperation, DelegationError> {
    let parsed = graphql_parser::parse_query::<String>(query)
        .map_err(|err| DelegationError::ParseFailure(err.to_string()))?;

    let mut operations: Vec<&ParserOperation<'_>> = Vec::new();
    let mut fragments: HashMap<&str, &FragmentDefinition<'_, String>> = HashMap::new();
    for definition in &parsed.definitions {
        match definition {
            Definition::Operation(operation) => operations.push(operation),
            Definition::Fragment(fragment) => {
                fragments.insert(fragment.name.as_str(), fragment);
            }
        }
    }

    let operation = select_operation(&operations, operation_name)?;
    let (operation_kind, name, variable_definitions, directives, selection_set) =
        operation_parts(operation);

    let root_type = schema
        .root_type(operation_kind)
        .ok_or(DelegationError::MissingRootType(operation_kind.as_str()))?;

    let variable_definitions: Vec<VariableDefinition> = variable_definitions
        .iter()
        .map(|definition| VariableDefinition {
            name: definition.name.clone(),
            var_type: TypeRef::from_ast(&definition.var_type),
            default_value: definition.default_value.as_ref().map(InputValue::from),
            native: false,
        })
        .collect();
    let variables = coerce_variables(&variable_definitions, variables)?;

    let mut normalizer = Normalizer {
        schema,
        fragments,
        variables: &variables,
        errors: Vec::new(),
        spreading: Vec::new(),
    };
    let selections = if is_included(directives, &variables) {
        normalizer.selection_set(&root_type.name, selection_set, &mut Vec::new())?
    } else {
        Vec::new()
    };
    let errors = normalizer.errors;

    trace!(
        operation_kind = operation_kind.as_str(),
        errors = errors.len(),
        "normalized client operation"
    );

    Ok(NormalizedOperation {
        document: DelegationDocument {
            operation_kind,
            operation_name: name.cloned(),
            variable_definitions,
            selections,
        },
        variables,
        errors,
    })
}

fn select_operation<'a, 'b>(
    operations: &[&'b ParserOperation<'a>],
    operation_name: Option<&str>,
) -> Result<&'b ParserOperation<'a>, DelegationError> {
    match operation_name {
        Some(operation_name) => operations
            .iter()
            .find(|operation| operation_parts(operation).1.map(String::as_str) == Some(operation_name))
            .copied()
            .ok_or_else(|| DelegationError::UnknownOperation(operation_name.to_string())),
        None => match operations {
            [] => Err(DelegationError::NoOperation),
            [operation] => Ok(operation),
            _ => Err(DelegationError::AmbiguousOperation),
        },
    }
}

type OperationParts<'o, 'a> = (
    OperationKind,
    Option<&'o String>,
    &'o [ParserVariableDefinition<'a, String>],
    &'o [Directive<'a, String>],
    &'o SelectionSet<'a, String>,
);

fn operation_parts<'o, 'a>(operation: &'o ParserOperation<'a>) -> OperationParts<'o, 'a> {
    match operation {
        OperationDefinition::SelectionSet(selection_set) => {
            (OperationKind::Query, None, &[], &[], selection_set)
        }
        OperationDefinition::Query(query) => (
            OperationKind::Query,
            query.name.as_ref(),
            &query.variable_definitions,
            &query.directives,
            &query.selection_set,
        ),
        OperationDefinition::Mutation(mutation) => (
            OperationKind::Mutation,
            mutation.name.as_ref(),
            &mutation.variable_definitions,
            &mutation.directives,
            &mutation.selection_set,
        ),
        OperationDefinition::Subscription(subscription) => (
            OperationKind::Subscription,
            subscription.name.as_ref(),
            &subscription.variable_definitions,
            &subscription.directives,
            &subscription.selection_set,
        ),
    }
}

/// Keeps the provided values of declared variables and fills in defaults.
fn coerce_variables(
    definitions: &[VariableDefinition],
    mut provided: Map<String, Value>,
) -> Result<Map<String, Value>, DelegationError> {
    let mut coerced = Map::new();
    for definition in definitions {
        match provided.remove(&definition.name) {
            Some(value) => {
                coerced.insert(definition.name.clone(), value);
            }
            None => match &definition.default_value {
                Some(default_value) => {
                    coerced.insert(
                        definition.name.clone(),
                        default_value.to_json(&Map::new()),
                    );
                }
                None if definition.var_type.is_non_null() => {
                    return Err(DelegationError::MissingVariable(definition.name.clone()));
                }
                None => {}
            },
        }
    }
    Ok(coerced)
}

fn directive_condition(
    directive: &Directive<'_, String>,
    variables: &Map<String, Value>,
) -> bool {
    directive
        .arguments
        .iter()
        .find(|(name, _)| name == "if")
        .map(|(_, value)| match value {
            ParserValue::Boolean(condition) => *condition,
            ParserValue::Variable(name) => variables
                .get(name)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            _ => false,
        })
        .unwrap_or(false)
}

fn is_included(directives: &[Directive<'_, String>], variables: &Map<String, Value>) -> bool {
    directives.iter().all(|directive| match directive.name.as_str() {
        "skip" => !directive_condition(directive, variables),
        "include" => directive_condition(directive, variables),
        _ => true,
    })
}

struct Normalizer<'s, 'd, 'a> {
    schema: &'s SchemaMetadata,
    fragments: HashMap<&'d str, &'d FragmentDefinition<'a, String>>,
    variables: &'s Map<String, Value>,
    errors: Vec<GraphQLError>,
    spreading: Vec<String>,
}

impl<'s, 'd, 'a> Normalizer<'s, 'd, 'a> {
    fn selection_set(
        &mut self,
        parent_type: &str,
        selection_set: &'d SelectionSet<'a, String>,
        path: &mut Vec<GraphQLErrorPathSegment>,
    ) -> Result<Vec<Selection>, DelegationError> {
        let mut selections = Vec::with_capacity(selection_set.items.len());

        for item in &selection_set.items {
            match item {
                ParserSelection::Field(field) => {
                    if !is_included(&field.directives, self.variables) {
                        continue;
                    }
                    let mut selection = FieldSelection::new(parent_type, field.name.as_str());
                    selection.alias = field.alias.clone();
                    if selection.is_typename() {
                        selections.push(Selection::Field(selection));
                        continue;
                    }

                    let response_key = selection.response_key().to_string();
                    let Some(field_metadata) = self.schema.field(parent_type, &field.name) else {
                        let mut error_path = path.clone();
                        error_path.push(GraphQLErrorPathSegment::String(response_key));
                        self.errors.push(
                            GraphQLError::from(format!(
                                "Cannot query field \"{}\" on type \"{}\".",
                                field.name, parent_type
                            ))
                            .with_path(error_path),
                        );
                        continue;
                    };

                    selection.arguments = field
                        .arguments
                        .iter()
                        .map(|(name, value)| (name.clone(), InputValue::from(value)))
                        .collect();
                    if !field.selection_set.items.is_empty() {
                        let field_type = field_metadata.field_type.named().to_string();
                        path.push(GraphQLErrorPathSegment::String(response_key));
                        selection.selections =
                            self.selection_set(&field_type, &field.selection_set, path)?;
                        path.pop();
                    }
                    selections.push(Selection::Field(selection));
                }
                ParserSelection::InlineFragment(inline_fragment) => {
                    if !is_included(&inline_fragment.directives, self.variables) {
                        continue;
                    }
                    let type_condition = inline_fragment
                        .type_condition
                        .as_ref()
                        .map(|TypeCondition::On(type_name)| type_name.clone());
                    let fragment_type = type_condition.as_deref().unwrap_or(parent_type).to_string();
                    let children =
                        self.selection_set(&fragment_type, &inline_fragment.selection_set, path)?;
                    selections.push(Selection::InlineFragment(InlineFragmentSelection {
                        type_condition,
                        selections: children,
                    }));
                }
                ParserSelection::FragmentSpread(spread) => {
                    if !is_included(&spread.directives, self.variables) {
                        continue;
                    }
                    let fragment = *self
                        .fragments
                        .get(spread.fragment_name.as_str())
                        .ok_or_else(|| DelegationError::UnknownFragment(spread.fragment_name.clone()))?;
                    if self.spreading.contains(&fragment.name) {
                        return Err(DelegationError::FragmentCycle(fragment.name.clone()));
                    }

                    let TypeCondition::On(type_condition) = &fragment.type_condition;
                    self.spreading.push(fragment.name.clone());
                    let children = self.selection_set(type_condition, &fragment.selection_set, path)?;
                    self.spreading.pop();
                    selections.push(Selection::InlineFragment(InlineFragmentSelection {
                        type_condition: Some(type_condition.clone()),
                        selections: children,
                    }));
                }
            }
        }

        Ok(selections)
    }
}
