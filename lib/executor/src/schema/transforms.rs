use std::sync::Arc;

use hive_gateway_config::subschema::{RenameConfig, TransformConfig};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use crate::{
    delegation::document::{DelegationDocument, Selection},
    response::execution_result::ExecutionResult,
    schema::metadata::SchemaMetadata,
    utils::consts::TYPENAME_FIELD_NAME,
};

/// Changes how a subschema is exposed to the gateway.
///
/// A transform sits between the gateway (outer side) and the subschema (inner side).
/// `transform_schema` turns the inner view into the outer one, `transform_request` rewrites an
/// outgoing document from outer to inner terms and `transform_result` maps a result back.
///
/// Selections and variable definitions flagged as `native` are already in the terms of the
/// subschema itself and must be left alone.
pub trait SubschemaTransform: Send + Sync {
    fn name(&self) -> &'static str;

    fn transform_schema(&self, schema: SchemaMetadata) -> SchemaMetadata {
        schema
    }

    fn transform_request(&self, _document: &mut DelegationDocument) {}

    fn transform_result(&self, _result: &mut ExecutionResult) {}
}

pub type SubschemaTransformArc = Arc<dyn SubschemaTransform>;

pub fn transform_from_config(config: &TransformConfig) -> SubschemaTransformArc {
    match config {
        TransformConfig::RenameTypes { renames } => Arc::new(RenameTypes::new(renames)),
        TransformConfig::RenameFields { type_name, renames } => {
            Arc::new(RenameFields::new(type_name, renames))
        }
        TransformConfig::FilterFields { type_name, hidden } => {
            Arc::new(FilterFields::new(type_name, hidden.clone()))
        }
    }
}

/// The outer view of a subschema. Transforms are listed from the gateway side inward.
pub fn transformed_schema(
    inner: &SchemaMetadata,
    transforms: &[SubschemaTransformArc],
) -> SchemaMetadata {
    transforms
        .iter()
        .rev()
        .fold(inner.clone(), |schema, transform| {
            transform.transform_schema(schema)
        })
}

pub fn transform_request(document: &mut DelegationDocument, transforms: &[SubschemaTransformArc]) {
    for transform in transforms {
        transform.transform_request(document);
    }
}

pub fn transform_result(result: &mut ExecutionResult, transforms: &[SubschemaTransformArc]) {
    for transform in transforms.iter().rev() {
        transform.transform_result(result);
    }
}

fn collect_renames(renames: &[RenameConfig]) -> Vec<(String, String)> {
    renames
        .iter()
        .map(|rename| (rename.from.clone(), rename.to.clone()))
        .collect()
}

/// Renames types. Each pair is `(inner name, outer name)`.
pub struct RenameTypes {
    renames: Vec<(String, String)>,
}

impl RenameTypes {
    pub fn new(renames: &[RenameConfig]) -> Self {
        RenameTypes {
            renames: collect_renames(renames),
        }
    }

    fn to_inner(&self, name: &str) -> Option<String> {
        self.renames
            .iter()
            .find(|(_, to)| to == name)
            .map(|(from, _)| from.clone())
    }

    fn to_outer(&self, name: &str) -> Option<&str> {
        self.renames
            .iter()
            .find(|(from, _)| from == name)
            .map(|(_, to)| to.as_str())
    }

    fn rename_typenames(&self, value: &mut Value) {
        match value {
            Value::Array(items) => items
                .iter_mut()
                .for_each(|item| self.rename_typenames(item)),
            Value::Object(map) => {
                for (key, value) in map.iter_mut() {
                    match value {
                        Value::String(type_name) if key == TYPENAME_FIELD_NAME => {
                            if let Some(renamed) = self.to_outer(type_name) {
                                *type_name = renamed.to_string();
                            }
                        }
                        value => self.rename_typenames(value),
                    }
                }
            }
            _ => {}
        }
    }
}

impl SubschemaTransform for RenameTypes {
    fn name(&self) -> &'static str {
        "rename_types"
    }

    fn transform_schema(&self, mut schema: SchemaMetadata) -> SchemaMetadata {
        for (from, to) in &self.renames {
            if schema.type_metadata(from).is_none() {
                warn!(type_name = from.as_str(), "cannot rename an unknown type");
                continue;
            }
            schema.rename_type(from, to);
        }
        schema
    }

    fn transform_request(&self, document: &mut DelegationDocument) {
        for definition in document.variable_definitions.iter_mut() {
            if !definition.native {
                definition.var_type.rename(|name| self.to_inner(name));
            }
        }

        document.for_each_selection_mut(&mut |selection| match selection {
            Selection::Field(field) => {
                if !field.native {
                    if let Some(renamed) = self.to_inner(&field.parent_type) {
                        field.parent_type = renamed;
                    }
                }
            }
            Selection::InlineFragment(fragment) => {
                if let Some(renamed) = fragment
                    .type_condition
                    .as_deref()
                    .and_then(|type_condition| self.to_inner(type_condition))
                {
                    fragment.type_condition = Some(renamed);
                }
            }
        });
    }

    fn transform_result(&self, result: &mut ExecutionResult) {
        if let Some(data) = result.data.as_mut() {
            self.rename_typenames(data);
        }
    }
}

/// Renames fields of one type. Each pair is `(inner name, outer name)`.
///
/// Renamed fields are requested under an alias holding their outer name, so results need no
/// rewriting.
pub struct RenameFields {
    type_name: String,
    renames: Vec<(String, String)>,
}

impl RenameFields {
    pub fn new(type_name: &str, renames: &[RenameConfig]) -> Self {
        RenameFields {
            type_name: type_name.to_string(),
            renames: collect_renames(renames),
        }
    }
}

impl SubschemaTransform for RenameFields {
    fn name(&self) -> &'static str {
        "rename_fields"
    }

    fn transform_schema(&self, mut schema: SchemaMetadata) -> SchemaMetadata {
        let Some(type_metadata) = schema.type_metadata_mut(&self.type_name) else {
            warn!(
                type_name = self.type_name.as_str(),
                "cannot rename fields of an unknown type"
            );
            return schema;
        };

        let fields = std::mem::take(&mut type_metadata.fields);
        type_metadata.fields = fields
            .into_iter()
            .map(|(name, mut field)| {
                match self.renames.iter().find(|(from, _)| *from == name) {
                    Some((_, to)) => {
                        field.name = to.clone();
                        (to.clone(), field)
                    }
                    None => (name, field),
                }
            })
            .collect::<IndexMap<_, _>>();
        schema
    }

    fn transform_request(&self, document: &mut DelegationDocument) {
        document.for_each_selection_mut(&mut |selection| {
            let Selection::Field(field) = selection else {
                return;
            };
            if field.native || field.parent_type != self.type_name {
                return;
            }
            if let Some((from, to)) = self.renames.iter().find(|(_, to)| *to == field.name) {
                field.alias.get_or_insert_with(|| to.clone());
                field.name = from.clone();
            }
        });
    }
}

/// Hides fields of one type from the gateway.
pub struct FilterFields {
    type_name: String,
    hidden: Vec<String>,
}

impl FilterFields {
    pub fn new(type_name: &str, hidden: Vec<String>) -> Self {
        FilterFields {
            type_name: type_name.to_string(),
            hidden,
        }
    }

    fn retain(&self, selections: &mut Vec<Selection>) {
        selections.retain(|selection| match selection {
            Selection::Field(field) => {
                field.native
                    || field.parent_type != self.type_name
                    || !self.hidden.contains(&field.name)
            }
            Selection::InlineFragment(_) => true,
        });
        for selection in selections.iter_mut() {
            match selection {
                Selection::Field(field) => self.retain(&mut field.selections),
                Selection::InlineFragment(fragment) => self.retain(&mut fragment.selections),
            }
        }
    }
}

impl SubschemaTransform for FilterFields {
    fn name(&self) -> &'static str {
        "filter_fields"
    }

    fn transform_schema(&self, mut schema: SchemaMetadata) -> SchemaMetadata {
        if schema.type_metadata(&self.type_name).is_none() {
            warn!(
                type_name = self.type_name.as_str(),
                "cannot filter fields of an unknown type"
            );
        }
        for field_name in &self.hidden {
            schema.remove_field(&self.type_name, field_name);
        }
        schema
    }

    fn transform_request(&self, document: &mut DelegationDocument) {
        self.retain(&mut document.selections);
    }
}

#[cfg(test)]
mod tests {
    use hive_gateway_config::subschema::{RenameConfig, TransformConfig};
    use serde_json::json;

    use super::{transform_from_config, transform_request, transform_result, transformed_schema};
    use crate::{
        delegation::document::{
            DelegationDocument, FieldSelection, InlineFragmentSelection, InputValue, Selection,
            VariableDefinition,
        },
        execution_request::OperationKind,
        response::execution_result::ExecutionResult,
        schema::{metadata::SchemaMetadata, type_ref::TypeRef},
    };

    fn rename(from: &str, to: &str) -> RenameConfig {
        RenameConfig {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn schema() -> SchemaMetadata {
        SchemaMetadata::from_sdl(
            r#"
            type Query { item(id: ID!): Item items(filter: Filter): [Item] }
            type Item { id: ID! title: String secret: String }
            input Filter { ids: [ID!] }
            "#,
        )
        .expect("valid schema")
    }

    #[test]
    fn builds_the_outer_view_from_the_inside_out() {
        // the outermost transform sees the type under its renamed name
        let transforms = vec![
            transform_from_config(&TransformConfig::RenameFields {
                type_name: "StoreItem".to_string(),
                renames: vec![rename("title", "name")],
            }),
            transform_from_config(&TransformConfig::RenameTypes {
                renames: vec![rename("Item", "StoreItem")],
            }),
            transform_from_config(&TransformConfig::FilterFields {
                type_name: "Item".to_string(),
                hidden: vec!["secret".to_string()],
            }),
        ];

        let view = transformed_schema(&schema(), &transforms);
        let item = view.type_metadata("StoreItem").expect("renamed type");
        assert_eq!(item.fields.keys().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(
            view.field("Query", "item").map(|field| field.field_type.to_string()),
            Some("StoreItem".to_string())
        );
        assert!(view.type_metadata("Item").is_none());
    }

    #[test]
    fn rewrites_requests_and_results() {
        let transforms = vec![
            transform_from_config(&TransformConfig::RenameFields {
                type_name: "StoreItem".to_string(),
                renames: vec![rename("title", "name")],
            }),
            transform_from_config(&TransformConfig::RenameTypes {
                renames: vec![rename("Item", "StoreItem"), rename("Filter", "StoreFilter")],
            }),
        ];

        let mut items = FieldSelection::new("Query", "items");
        items.arguments = vec![("filter".to_string(), InputValue::Variable("filter".to_string()))];
        items.selections = vec![
            Selection::Field(FieldSelection::typename("StoreItem")),
            Selection::Field(FieldSelection::new("StoreItem", "name")),
            Selection::InlineFragment(InlineFragmentSelection {
                type_condition: Some("StoreItem".to_string()),
                selections: vec![Selection::Field(FieldSelection::new("StoreItem", "id"))],
            }),
        ];
        let mut document = DelegationDocument {
            operation_kind: OperationKind::Query,
            operation_name: None,
            variable_definitions: vec![VariableDefinition {
                name: "filter".to_string(),
                var_type: TypeRef::Named("StoreFilter".to_string()),
                default_value: None,
                native: false,
            }],
            selections: vec![Selection::Field(items)],
        };

        transform_request(&mut document, &transforms);
        insta::assert_snapshot!(document.to_string(), @"query($filter:Filter){items(filter:$filter){__typename name:title ...on Item{id}}}");

        let mut result = ExecutionResult::from_data(json!({
            "items": [{ "__typename": "Item", "name": "Chair", "id": "1" }]
        }));
        transform_result(&mut result, &transforms);
        assert_eq!(
            result.data,
            Some(json!({ "items": [{ "__typename": "StoreItem", "name": "Chair", "id": "1" }] }))
        );
    }

    #[test]
    fn filtered_fields_are_stripped_from_requests() {
        let transforms = vec![transform_from_config(&TransformConfig::FilterFields {
            type_name: "Item".to_string(),
            hidden: vec!["secret".to_string()],
        })];

        let mut item = FieldSelection::new("Query", "item");
        item.selections = vec![
            Selection::Field(FieldSelection::new("Item", "secret")),
            Selection::Field(FieldSelection::new("Item", "id")),
        ];
        let mut document = DelegationDocument {
            operation_kind: OperationKind::Query,
            operation_name: None,
            variable_definitions: Vec::new(),
            selections: vec![Selection::Field(item)],
        };

        transform_request(&mut document, &transforms);
        assert_eq!(document.to_string(), "query{item{id}}");
    }
}
