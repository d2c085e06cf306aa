use serde_json::{Map, Value};

use crate::{
    delegation::document::{FieldSelection, Selection},
    response::{graphql_error::GraphQLErrorPathSegment, merge::deep_merge},
    schema::metadata::SchemaMetadata,
    utils::traverse::concrete_type_name,
};

/// Shapes merged data the way the client asked for it.
///
/// Only selected keys are kept, in selection order. Keys added for planning purposes
/// (`__typename`, merge keys) are dropped, selected keys missing from the data become `null`.
pub fn project_data(
    data: &Value,
    root_type: &str,
    selections: &[Selection],
    schema: &SchemaMetadata,
) -> Value {
    let empty = Map::new();
    let object = data.as_object().unwrap_or(&empty);
    let mut projected = Map::new();
    Projector {
        schema,
        fill_missing: true,
    }
    .project_object(object, root_type, selections, &mut projected);
    Value::Object(projected)
}

/// Shapes the data of an incremental payload sitting at `path` of the response.
///
/// A payload only carries part of the selection, so missing keys are left out rather than
/// answered with `null`. Returns `None` when `path` leads outside of the client selection.
pub fn project_at_path(
    data: &Value,
    root_type: &str,
    selections: &[Selection],
    path: &[GraphQLErrorPathSegment],
    schema: &SchemaMetadata,
) -> Option<Value> {
    let mut static_type = root_type.to_string();
    let mut selections = selections.to_vec();

    for segment in path {
        let GraphQLErrorPathSegment::String(key) = segment else {
            continue;
        };
        let mut fields = Vec::new();
        collect_fields(&selections, key, &mut fields);
        let field = fields.first()?;
        static_type = schema
            .field(&field.parent_type, &field.name)
            .map(|metadata| metadata.field_type.named().to_string())
            .unwrap_or_else(|| field.parent_type.clone());
        selections = fields
            .iter()
            .flat_map(|field| field.selections.iter().cloned())
            .collect();
    }

    Some(
        Projector {
            schema,
            fill_missing: false,
        }
        .project_value(data, &static_type, &selections),
    )
}

/// Fields answering `response_key`, looking through inline fragments.
fn collect_fields<'a>(selections: &'a [Selection], response_key: &str, out: &mut Vec<&'a FieldSelection>) {
    for selection in selections {
        match selection {
            Selection::Field(field) if field.response_key() == response_key => out.push(field),
            Selection::Field(_) => {}
            Selection::InlineFragment(fragment) => {
                collect_fields(&fragment.selections, response_key, out)
            }
        }
    }
}

struct Projector<'a> {
    schema: &'a SchemaMetadata,
    fill_missing: bool,
}

impl Projector<'_> {
    fn project_object(
        &self,
        object: &Map<String, Value>,
        static_type: &str,
        selections: &[Selection],
        out: &mut Map<String, Value>,
    ) {
        let concrete_type = concrete_type_name(object, static_type);

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    let response_key = field.response_key();
                    let value = if field.is_typename() {
                        Value::String(concrete_type.to_string())
                    } else {
                        let field_type = self
                            .schema
                            .field(&field.parent_type, &field.name)
                            .map(|metadata| metadata.field_type.named())
                            .unwrap_or(field.parent_type.as_str());
                        match object.get(response_key) {
                            Some(value) => self.project_value(value, field_type, &field.selections),
                            None if self.fill_missing => Value::Null,
                            None => continue,
                        }
                    };

                    match out.get_mut(response_key) {
                        Some(existing) => deep_merge(existing, value),
                        None => {
                            out.insert(response_key.to_string(), value);
                        }
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let applies = fragment
                        .type_condition
                        .as_deref()
                        .is_none_or(|type_condition| {
                            self.schema
                                .satisfies_type_condition(concrete_type, type_condition)
                        });
                    if applies {
                        self.project_object(object, static_type, &fragment.selections, out);
                    }
                }
            }
        }
    }

    fn project_value(&self, value: &Value, static_type: &str, selections: &[Selection]) -> Value {
        match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.project_value(item, static_type, selections))
                    .collect(),
            ),
            Value::Object(object) if !selections.is_empty() => {
                let mut projected = Map::new();
                self.project_object(object, static_type, selections, &mut projected);
                Value::Object(projected)
            }
            value => value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::{project_at_path, project_data};
    use crate::{delegation::normalize::normalize_operation, schema::metadata::SchemaMetadata};

    #[test]
    fn keeps_selected_keys_in_order() {
        let schema = SchemaMetadata::from_sdl(
            r#"
            type Query { search: [SearchResult] }
            union SearchResult = Product | Review
            type Product { upc: String! name: String }
            type Review { id: ID! body: String }
            "#,
        )
        .expect("valid schema");
        let operation = normalize_operation(
            &schema,
            r#"{
                search {
                    kind: __typename
                    ... on Review { body }
                    ... on Product { name upc }
                }
            }"#,
            None,
            Map::new(),
        )
        .expect("valid operation");

        let data = json!({
            "search": [
                { "__typename": "Product", "upc": "1", "_key_upc": "1", "name": "Table" },
                { "__typename": "Review", "body": "Great", "id": "r1" },
                null
            ]
        });

        let projected = project_data(&data, "Query", &operation.document.selections, &schema);
        assert_eq!(
            serde_json::to_string(&projected).expect("serializable"),
            r#"{"search":[{"kind":"Product","name":"Table","upc":"1"},{"kind":"Review","body":"Great"},null]}"#
        );
    }

    #[test]
    fn payloads_keep_only_what_they_carry() {
        let schema = SchemaMetadata::from_sdl(
            "type Query { feed: [FeedItem] } type FeedItem { id: ID! body: String author: String }",
        )
        .expect("valid schema");
        let operation =
            normalize_operation(&schema, "{ f: feed { body author } }", None, Map::new())
                .expect("valid operation");
        let selections = &operation.document.selections;

        let payload = json!({ "__typename": "FeedItem", "id": "1", "body": "late", "secret": "x" });
        assert_eq!(
            project_at_path(&payload, "Query", selections, &["f".into(), 0.into()], &schema),
            Some(json!({ "body": "late" }))
        );
        assert_eq!(
            project_at_path(&payload, "Query", selections, &["feed".into()], &schema),
            None
        );
    }
}
