use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<GraphQLErrorLocation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<GraphQLErrorPathSegment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl From<String> for GraphQLError {
    fn from(message: String) -> Self {
        GraphQLError {
            message,
            locations: None,
            path: None,
            extensions: None,
        }
    }
}

impl From<&str> for GraphQLError {
    fn from(message: &str) -> Self {
        message.to_string().into()
    }
}

impl GraphQLError {
    pub fn with_path(mut self, path: Vec<GraphQLErrorPathSegment>) -> Self {
        self.path = Some(path);
        self
    }

    /// Moves a path relative to a delegated document onto the outer response.
    ///
    /// The first segment of a delegated path is the root field of the delegated document,
    /// it is replaced by `base`. Errors without a path are attached to `base`.
    pub fn rebase(mut self, base: &[GraphQLErrorPathSegment]) -> Self {
        let mut rebased = base.to_vec();
        if let Some(path) = self.path.take() {
            rebased.extend(path.into_iter().skip(1));
        }
        self.path = Some(rebased);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GraphQLErrorLocation {
    pub line: usize,
    pub column: usize,
}

/// A response key or a list index. Negative indexes are rejected when deserializing.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GraphQLErrorPathSegment {
    String(String),
    Index(usize),
}

impl From<&str> for GraphQLErrorPathSegment {
    fn from(value: &str) -> Self {
        GraphQLErrorPathSegment::String(value.to_string())
    }
}

impl From<String> for GraphQLErrorPathSegment {
    fn from(value: String) -> Self {
        GraphQLErrorPathSegment::String(value)
    }
}

impl From<usize> for GraphQLErrorPathSegment {
    fn from(value: usize) -> Self {
        GraphQLErrorPathSegment::Index(value)
    }
}

impl fmt::Display for GraphQLErrorPathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphQLErrorPathSegment::String(name) => f.write_str(name),
            GraphQLErrorPathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}
