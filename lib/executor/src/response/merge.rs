use serde_json::{Map, Value};
use tracing::instrument;

use crate::response::graphql_error::{GraphQLError, GraphQLErrorPathSegment};

/// Deeply merges `source` into `target`.
///
/// Objects are merged key-wise, arrays element-wise. A null source leaves the target untouched,
/// any other mismatch replaces the target.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (_, Value::Null) => {}
        (Value::Object(target_map), Value::Object(source_map)) => {
            deep_merge_objects(target_map, source_map);
        }
        (Value::Array(target_arr), Value::Array(source_arr)) => {
            for (target_val, source_val) in target_arr.iter_mut().zip(source_arr) {
                deep_merge(target_val, source_val);
            }
        }
        (target_val, source_val) => {
            *target_val = source_val;
        }
    }
}

#[instrument(
    level = "trace",
    skip_all,
    fields(
        target_type = %target_map.get("__typename").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
    )
)]
pub fn deep_merge_objects(target_map: &mut Map<String, Value>, source_map: Map<String, Value>) {
    if source_map.is_empty() {
        return;
    }
    if target_map.is_empty() {
        *target_map = source_map;
        return;
    }
    for (key, source_val) in source_map {
        match target_map.get_mut(&key) {
            Some(target_val) => deep_merge(target_val, source_val),
            None => {
                target_map.insert(key, source_val);
            }
        }
    }
}

pub fn value_at_path_mut<'a>(
    root: &'a mut Value,
    path: &[GraphQLErrorPathSegment],
) -> Option<&'a mut Value> {
    path.iter().try_fold(root, |current, segment| match segment {
        GraphQLErrorPathSegment::String(key) => current.as_object_mut()?.get_mut(key),
        GraphQLErrorPathSegment::Index(index) => current.as_array_mut()?.get_mut(*index),
    })
}

/// Position of a delegated call in the call tree of one client operation.
///
/// Root delegations get `[i]`, calls issued while resolving one get its position extended
/// by one index. Ordering is lexicographic, so a call sorts before the calls it issued.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallOrder(Vec<usize>);

impl CallOrder {
    pub fn root(index: usize) -> Self {
        CallOrder(vec![index])
    }

    pub fn child(&self, index: usize) -> Self {
        let mut positions = self.0.clone();
        positions.push(index);
        CallOrder(positions)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

/// Collects the data and errors of every delegated call of one client operation.
#[derive(Debug, Default)]
pub struct ResponseMerger {
    data: Value,
    errors: Vec<(CallOrder, GraphQLError)>,
    extensions: Option<Map<String, Value>>,
}

impl ResponseMerger {
    pub fn new() -> Self {
        ResponseMerger {
            data: Value::Object(Map::new()),
            errors: Vec::new(),
            extensions: None,
        }
    }

    /// Merges `value` into the response at `path`.
    /// Returns `false` when nothing exists at `path` to merge into.
    pub fn splice(&mut self, path: &[GraphQLErrorPathSegment], value: Value) -> bool {
        match value_at_path_mut(&mut self.data, path) {
            Some(target) => {
                deep_merge(target, value);
                true
            }
            None => false,
        }
    }

    pub fn push_errors(&mut self, order: &CallOrder, errors: impl IntoIterator<Item = GraphQLError>) {
        self.errors
            .extend(errors.into_iter().map(|error| (order.clone(), error)));
    }

    pub fn merge_extensions(&mut self, extensions: Option<Map<String, Value>>) {
        if let Some(extensions) = extensions {
            deep_merge_objects(self.extensions.get_or_insert_with(Map::new), extensions);
        }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Returns the merged data and the errors, ordered by call order and then by path.
    pub fn finish(mut self) -> (Value, Vec<GraphQLError>, Option<Map<String, Value>>) {
        self.errors.sort_by(|(left_order, left), (right_order, right)| {
            left_order
                .cmp(right_order)
                .then_with(|| left.path.cmp(&right.path))
        });
        let errors = self.errors.into_iter().map(|(_, error)| error).collect();
        (self.data, errors, self.extensions)
    }
}
