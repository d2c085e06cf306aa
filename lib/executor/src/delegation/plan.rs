use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::{
    delegation::{
        document::{
            DelegationDocument, FieldSelection, InlineFragmentSelection, InputValue, Selection,
            VariableDefinition,
        },
        normalize::NormalizedOperation,
        subschema::{MergeArgument, Subschema},
    },
    execution_request::OperationKind,
    response::graphql_error::{GraphQLError, GraphQLErrorPathSegment},
    schema::metadata::SchemaMetadata,
    utils::consts::{ENTITY_RESPONSE_KEY, KEY_ALIAS_PREFIX, KEY_VARIABLE_PREFIX},
};

/// Everything needed to resolve one client operation.
#[derive(Clone, Debug)]
pub struct DelegationPlan {
    pub operation_kind: OperationKind,
    pub operation_name: Option<String>,
    /// The normalized client selections, used to shape the final response.
    pub selections: Vec<Selection>,
    pub fetches: Vec<RootFetch>,
    /// Fields no subschema can resolve. They are answered with `null`.
    pub errors: Vec<GraphQLError>,
}

/// One request per client root field, sent to the subschema owning the field.
#[derive(Clone, Debug)]
pub struct RootFetch {
    pub subschema: usize,
    pub root_field: String,
    pub response_key: String,
    pub document: DelegationDocument,
    pub variables: Map<String, Value>,
    pub deferred: Vec<DeferredMerge>,
}

/// Fields of objects returned by one subschema that another subschema has to provide.
///
/// Resolved with one request per object, keyed by the fields of [`DeferredMerge::key_args`].
#[derive(Clone, Debug)]
pub struct DeferredMerge {
    /// Response keys leading from the result of the enclosing request to the objects.
    pub path: Vec<String>,
    pub type_name: String,
    pub subschema: usize,
    /// Arguments of the merge field, with the response key their value is read from.
    pub key_args: Vec<(MergeArgument, String)>,
    /// Selects the missing fields under [`ENTITY_RESPONSE_KEY`]. Key variables are declared,
    /// their values are set per object.
    pub document: DelegationDocument,
    pub variables: Map<String, Value>,
    /// Response keys of the fields this merge provides.
    pub field_keys: Vec<String>,
    /// Merges to run on each fetched object, relative to it.
    pub deferred: Vec<DeferredMerge>,
}

impl DeferredMerge {
    pub fn key_variable(argument: &MergeArgument) -> String {
        format!("{KEY_VARIABLE_PREFIX}{}", argument.name)
    }
}

#[derive(Default)]
struct PlannedSelections {
    selections: Vec<Selection>,
    deferred: Vec<DeferredMerge>,
}

struct DeferredGroup {
    type_name: String,
    fields: Vec<FieldSelection>,
}

pub struct DelegationPlanner<'a> {
    schema: &'a SchemaMetadata,
    subschemas: &'a [Subschema],
    operation: &'a NormalizedOperation,
    errors: Vec<GraphQLError>,
}

impl<'a> DelegationPlanner<'a> {
    pub fn new(
        schema: &'a SchemaMetadata,
        subschemas: &'a [Subschema],
        operation: &'a NormalizedOperation,
    ) -> Self {
        DelegationPlanner {
            schema,
            subschemas,
            operation,
            errors: Vec::new(),
        }
    }

    pub fn plan(mut self) -> DelegationPlan {
        let operation = self.operation;
        let document = &operation.document;
        let root_type = document.operation_kind.root_type_name();

        let mut root_fields = Vec::new();
        collect_root_fields(&document.selections, root_type, &mut root_fields);

        let mut fetches = Vec::with_capacity(root_fields.len());
        for field in root_fields {
            if field.is_typename() {
                continue;
            }
            let response_key = field.response_key().to_string();
            let owner = self
                .subschemas
                .iter()
                .position(|subschema| subschema.schema().field(root_type, &field.name).is_some());
            let Some(owner) = owner else {
                self.errors.push(
                    GraphQLError::from(format!(
                        "No subschema resolves the root field \"{}\"",
                        field.name
                    ))
                    .with_path(vec![response_key.as_str().into()]),
                );
                continue;
            };

            let mut planned_field = field.clone();
            let mut deferred = Vec::new();
            if !field.selections.is_empty() {
                let field_type = self.field_type(owner, root_type, &field.name);
                let planned = self.plan_selection_set(
                    owner,
                    &field_type,
                    &field.selections,
                    &[response_key.clone()],
                    &[response_key.as_str().into()],
                    true,
                );
                planned_field.selections = planned.selections;
                deferred = planned.deferred;
            }

            let (variable_definitions, variables) =
                self.client_variables(&[Selection::Field(planned_field.clone())]);
            trace!(
                subschema = self.subschemas[owner].name(),
                root_field = field.name.as_str(),
                deferred = deferred.len(),
                "planned root field"
            );
            fetches.push(RootFetch {
                subschema: owner,
                root_field: field.name.clone(),
                response_key,
                document: DelegationDocument {
                    operation_kind: document.operation_kind,
                    operation_name: document.operation_name.clone(),
                    variable_definitions,
                    selections: vec![Selection::Field(planned_field)],
                },
                variables,
                deferred,
            });
        }

        debug!(
            fetches = fetches.len(),
            errors = self.errors.len(),
            "delegation plan ready"
        );

        DelegationPlan {
            operation_kind: document.operation_kind,
            operation_name: document.operation_name.clone(),
            selections: document.selections.clone(),
            fetches,
            errors: self.errors,
        }
    }

    fn field_type(&self, subschema: usize, type_name: &str, field_name: &str) -> String {
        self.subschemas[subschema]
            .schema()
            .field(type_name, field_name)
            .or_else(|| self.schema.field(type_name, field_name))
            .map(|field| field.field_type.named().to_string())
            .unwrap_or_default()
    }

    fn plan_selection_set(
        &mut self,
        owner: usize,
        parent_type: &str,
        selections: &[Selection],
        path: &[String],
        client_path: &[GraphQLErrorPathSegment],
        add_typename: bool,
    ) -> PlannedSelections {
        let subschemas = self.subschemas;
        let owner_schema = subschemas[owner].schema();
        let mut planned = PlannedSelections::default();
        let mut groups: IndexMap<usize, DeferredGroup> = IndexMap::new();

        if add_typename && self.schema.is_composite(parent_type) {
            planned
                .selections
                .push(Selection::Field(FieldSelection::typename(parent_type)));
        }

        for selection in selections {
            match selection {
                Selection::Field(field) if field.is_typename() => {
                    if field.alias.is_some() || !add_typename {
                        planned.selections.push(selection.clone());
                    }
                }
                Selection::Field(field) => {
                    let response_key = field.response_key().to_string();
                    if owner_schema.field(&field.parent_type, &field.name).is_some() {
                        let mut planned_field = field.clone();
                        if !field.selections.is_empty() {
                            let field_type = self.field_type(owner, &field.parent_type, &field.name);
                            let nested = self.plan_selection_set(
                                owner,
                                &field_type,
                                &field.selections,
                                &extend(path, response_key.clone()),
                                &extend(client_path, response_key.as_str().into()),
                                true,
                            );
                            planned_field.selections = nested.selections;
                            planned.deferred.extend(nested.deferred);
                        }
                        planned.selections.push(Selection::Field(planned_field));
                        continue;
                    }

                    let target = subschemas.iter().enumerate().position(|(index, subschema)| {
                        index != owner
                            && subschema.merge_descriptor(&field.parent_type).is_some()
                            && subschema.schema().field(&field.parent_type, &field.name).is_some()
                    });
                    match target {
                        Some(target) => groups
                            .entry(target)
                            .or_insert_with(|| DeferredGroup {
                                type_name: field.parent_type.clone(),
                                fields: Vec::new(),
                            })
                            .fields
                            .push(field.clone()),
                        None => self.errors.push(
                            GraphQLError::from(format!(
                                "Cannot resolve field \"{}\" of type \"{}\"",
                                field.name, field.parent_type
                            ))
                            .with_path(extend(client_path, response_key.as_str().into())),
                        ),
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let type_condition = fragment.type_condition.as_deref().unwrap_or(parent_type);
                    if owner_schema.type_metadata(type_condition).is_none() {
                        continue;
                    }
                    let nested = self.plan_selection_set(
                        owner,
                        type_condition,
                        &fragment.selections,
                        path,
                        client_path,
                        false,
                    );
                    planned.deferred.extend(nested.deferred);
                    planned
                        .selections
                        .push(Selection::InlineFragment(InlineFragmentSelection {
                            type_condition: fragment.type_condition.clone(),
                            selections: nested.selections,
                        }));
                }
            }
        }

        for (target, group) in groups {
            if let Some(deferred) =
                self.plan_deferred(owner, target, group, &mut planned.selections, path, client_path)
            {
                planned.deferred.push(deferred);
            }
        }

        planned
    }

    fn plan_deferred(
        &mut self,
        owner: usize,
        target: usize,
        group: DeferredGroup,
        owner_selections: &mut Vec<Selection>,
        path: &[String],
        client_path: &[GraphQLErrorPathSegment],
    ) -> Option<DeferredMerge> {
        let subschemas = self.subschemas;
        let descriptor = subschemas[target].merge_descriptor(&group.type_name)?;
        let field_keys: Vec<String> = group
            .fields
            .iter()
            .map(|field| field.response_key().to_string())
            .collect();

        let mut key_args = Vec::with_capacity(descriptor.args.len());
        for argument in &descriptor.args {
            if subschemas[owner]
                .schema()
                .field(&group.type_name, &argument.key)
                .is_none()
            {
                for field_key in &field_keys {
                    self.errors.push(
                        GraphQLError::from(format!(
                            "Cannot resolve field \"{}\": \"{}\" does not provide the key \"{}\" of type \"{}\"",
                            field_key,
                            subschemas[owner].name(),
                            argument.key,
                            group.type_name
                        ))
                        .with_path(extend(client_path, field_key.as_str().into())),
                    );
                }
                return None;
            }
            let response_key = ensure_key_field(owner_selections, &group.type_name, &argument.key);
            key_args.push((argument.clone(), response_key));
        }

        let selections: Vec<Selection> = group.fields.into_iter().map(Selection::Field).collect();
        let nested = self.plan_selection_set(target, &group.type_name, &selections, &[], client_path, true);

        let mut entity = FieldSelection::new(
            OperationKind::Query.root_type_name(),
            descriptor.field_name.as_str(),
        );
        entity.native = true;
        entity.alias = Some(ENTITY_RESPONSE_KEY.to_string());
        entity.arguments = descriptor
            .args
            .iter()
            .map(|argument| {
                (
                    argument.name.clone(),
                    InputValue::Variable(DeferredMerge::key_variable(argument)),
                )
            })
            .collect();
        entity.selections = nested.selections;

        let entity_selections = vec![Selection::Field(entity)];
        let (client_definitions, variables) = self.client_variables(&entity_selections);
        let mut variable_definitions: Vec<VariableDefinition> = descriptor
            .args
            .iter()
            .map(|argument| VariableDefinition {
                name: DeferredMerge::key_variable(argument),
                var_type: argument.arg_type.clone(),
                default_value: None,
                native: true,
            })
            .collect();
        variable_definitions.extend(client_definitions);

        trace!(
            owner = subschemas[owner].name(),
            target = subschemas[target].name(),
            type_name = group.type_name.as_str(),
            fields = field_keys.len(),
            "planned merged fields"
        );

        Some(DeferredMerge {
            path: path.to_vec(),
            type_name: group.type_name,
            subschema: target,
            key_args,
            document: DelegationDocument {
                operation_kind: OperationKind::Query,
                operation_name: None,
                variable_definitions,
                selections: entity_selections,
            },
            variables,
            field_keys,
            deferred: nested.deferred,
        })
    }

    /// Client variable definitions and values used by `selections`.
    fn client_variables(
        &self,
        selections: &[Selection],
    ) -> (Vec<VariableDefinition>, Map<String, Value>) {
        let fragment = DelegationDocument {
            operation_kind: OperationKind::Query,
            operation_name: None,
            variable_definitions: Vec::new(),
            selections: selections.to_vec(),
        };
        let used = fragment.used_variables();

        let definitions: Vec<VariableDefinition> = self
            .operation
            .document
            .variable_definitions
            .iter()
            .filter(|definition| used.contains(&definition.name.as_str()))
            .cloned()
            .collect();
        let variables = definitions
            .iter()
            .filter_map(|definition| {
                self.operation
                    .variables
                    .get(&definition.name)
                    .map(|value| (definition.name.clone(), value.clone()))
            })
            .collect();
        (definitions, variables)
    }
}

fn extend<T: Clone>(path: &[T], segment: T) -> Vec<T> {
    let mut extended = Vec::with_capacity(path.len() + 1);
    extended.extend_from_slice(path);
    extended.push(segment);
    extended
}

/// Root fields of the operation, looking through fragments on the root type.
fn collect_root_fields<'a>(
    selections: &'a [Selection],
    root_type: &str,
    out: &mut Vec<&'a FieldSelection>,
) {
    for selection in selections {
        match selection {
            Selection::Field(field) => out.push(field),
            Selection::InlineFragment(fragment) => {
                if fragment
                    .type_condition
                    .as_deref()
                    .is_none_or(|type_condition| type_condition == root_type)
                {
                    collect_root_fields(&fragment.selections, root_type, out);
                }
            }
        }
    }
}

/// Makes sure `selections` fetch the key field `key` of `type_name` and returns its
/// response key.
fn ensure_key_field(selections: &mut Vec<Selection>, type_name: &str, key: &str) -> String {
    let mut taken = false;
    for selection in selections.iter() {
        if let Selection::Field(field) = selection {
            if field.name == key && field.arguments.is_empty() && field.parent_type == type_name {
                return field.response_key().to_string();
            }
            taken |= field.response_key() == key;
        }
    }

    let mut key_field = FieldSelection::new(type_name, key);
    if taken {
        key_field.alias = Some(format!("{KEY_ALIAS_PREFIX}{key}"));
    }
    let response_key = key_field.response_key().to_string();
    selections.push(Selection::Field(key_field));
    response_key
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hive_gateway_config::subschema::{MergeArgConfig, MergedTypeConfig};
    use serde_json::{json, Map};

    use super::DelegationPlanner;
    use crate::{
        delegation::{normalize::normalize_operation, subschema::Subschema},
        executors::common::{ExecutorArc, ExecutorResponse, FnExecutor},
        response::execution_result::ExecutionResult,
        schema::metadata::SchemaMetadata,
    };

    fn executor() -> ExecutorArc {
        Arc::new(FnExecutor::new(|_| async {
            Ok(ExecutorResponse::single(ExecutionResult::default()))
        }))
    }

    fn subschemas() -> Vec<Subschema> {
        let products = Subschema::new(
            "products",
            r#"
            type Query { topProducts(first: Int): [Product] product(upc: String!): Product }
            type Product { upc: String! name: String price: Int }
            "#,
            executor(),
        )
        .expect("valid schema");
        let inventory = Subschema::new(
            "inventory",
            r#"
            type Query { productByUpc(upc: String!): Product }
            type Product { upc: String! inStock: Boolean shippingEstimate(zip: String): Int }
            "#,
            executor(),
        )
        .expect("valid schema")
        .merge(&MergedTypeConfig {
            type_name: "Product".to_string(),
            selection_set: "{ upc }".to_string(),
            field_name: "productByUpc".to_string(),
            args: vec![MergeArgConfig {
                name: "upc".to_string(),
                key: "upc".to_string(),
            }],
        })
        .expect("valid merge");
        vec![products, inventory]
    }

    #[test]
    fn splits_fields_across_subschemas() {
        let subschemas = subschemas();
        let schema = SchemaMetadata::merged(subschemas.iter().map(Subschema::schema));
        let operation = normalize_operation(
            &schema,
            r#"
            query Top($zip: String, $first: Int) {
                topProducts(first: $first) { upc: name inStock estimate: shippingEstimate(zip: $zip) }
            }
            "#,
            None,
            json!({ "zip": "10115", "first": 2 })
                .as_object()
                .cloned()
                .unwrap_or_default(),
        )
        .expect("valid operation");

        let plan = DelegationPlanner::new(&schema, &subschemas, &operation).plan();
        assert!(plan.errors.is_empty());
        assert_eq!(plan.fetches.len(), 1);

        let fetch = &plan.fetches[0];
        assert_eq!(fetch.subschema, 0);
        insta::assert_snapshot!(fetch.document.to_string(), @"query Top($first:Int){topProducts(first:$first){__typename upc:name _key_upc:upc}}");
        assert_eq!(fetch.variables, json!({ "first": 2 }).as_object().cloned().unwrap_or_default());

        let deferred = &fetch.deferred[0];
        assert_eq!(deferred.subschema, 1);
        assert_eq!(deferred.path, vec!["topProducts".to_string()]);
        assert_eq!(deferred.key_args[0].1, "_key_upc");
        assert_eq!(deferred.field_keys, vec!["inStock".to_string(), "estimate".to_string()]);
        insta::assert_snapshot!(deferred.document.to_string(), @"query($_key_upc:String!,$zip:String){_entity:productByUpc(upc:$_key_upc){__typename inStock estimate:shippingEstimate(zip:$zip)}}");
    }

    #[test]
    fn unroutable_fields_are_reported() {
        let subschemas = subschemas();
        let schema = SchemaMetadata::merged(subschemas.iter().map(Subschema::schema));
        let operation = normalize_operation(
            &schema,
            "{ productByUpc(upc: \"1\") { name inStock } }",
            None,
            Map::new(),
        )
        .expect("valid operation");

        let plan = DelegationPlanner::new(&schema, &subschemas, &operation).plan();
        insta::assert_snapshot!(plan.fetches[0].document.to_string(), @r#"query{productByUpc(upc:"1"){__typename inStock}}"#);
        assert_eq!(
            serde_json::to_value(&plan.errors).expect("serializable"),
            json!([{
                "message": "Cannot resolve field \"name\" of type \"Product\"",
                "path": ["productByUpc", "name"]
            }])
        );
    }
}
