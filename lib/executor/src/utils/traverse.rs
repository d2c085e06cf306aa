use serde_json::Value;

use crate::{response::graphql_error::GraphQLErrorPathSegment, utils::consts::TYPENAME_FIELD_NAME};

/// Walks `remaining_path` (response keys) from `current_data` and calls `callback` with the
/// path of every object found at its end. Lists met on the way are entered item by item,
/// so the reported paths carry their indexes.
pub fn traverse_and_callback<Callback>(
    current_data: &Value,
    remaining_path: &[String],
    current_path: &mut Vec<GraphQLErrorPathSegment>,
    callback: &mut Callback,
) where
    Callback: FnMut(&serde_json::Map<String, Value>, &[GraphQLErrorPathSegment]),
{
    match current_data {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                current_path.push(GraphQLErrorPathSegment::Index(index));
                traverse_and_callback(item, remaining_path, current_path, callback);
                current_path.pop();
            }
        }
        Value::Object(map) => match remaining_path.split_first() {
            None => callback(map, current_path),
            Some((key, rest)) => {
                if let Some(next_data) = map.get(key) {
                    current_path.push(GraphQLErrorPathSegment::String(key.clone()));
                    traverse_and_callback(next_data, rest, current_path, callback);
                    current_path.pop();
                }
            }
        },
        _ => {}
    }
}

/// The concrete type of an object, read from its `__typename`, or `fallback` when absent.
pub fn concrete_type_name<'a>(
    object: &'a serde_json::Map<String, Value>,
    fallback: &'a str,
) -> &'a str {
    object
        .get(TYPENAME_FIELD_NAME)
        .and_then(Value::as_str)
        .unwrap_or(fallback)
}
