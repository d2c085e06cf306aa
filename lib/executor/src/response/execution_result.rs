use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::response::graphql_error::{GraphQLError, GraphQLErrorPathSegment};

/// One GraphQL response, or one incremental payload of a streamed response.
///
/// `data` and `errors` are not exclusive: a partial success carries both.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphQLError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<GraphQLErrorPathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_next: Option<bool>,
}

impl ExecutionResult {
    pub fn from_data(data: Value) -> Self {
        ExecutionResult {
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        ExecutionResult {
            errors: Some(errors),
            ..Default::default()
        }
    }

    pub fn from_error_message(message: impl Into<String>) -> Self {
        Self::from_errors(vec![GraphQLError::from(message.into())])
    }

    pub fn errors(&self) -> &[GraphQLError] {
        self.errors.as_deref().unwrap_or_default()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors().is_empty()
    }

    pub fn push_error(&mut self, error: GraphQLError) {
        self.errors.get_or_insert_with(Vec::new).push(error);
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
