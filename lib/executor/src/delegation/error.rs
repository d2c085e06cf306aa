use crate::{
    response::graphql_error::GraphQLError,
    schema::metadata::SchemaMetadataError,
};

/// Failures that reject a whole client operation before anything is delegated.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DelegationError {
    #[error("Failed to parse the operation: {0}")]
    ParseFailure(String),
    #[error("Unknown operation named \"{0}\"")]
    UnknownOperation(String),
    #[error("Must provide operation name if query contains multiple operations")]
    AmbiguousOperation,
    #[error("The document does not contain any operation")]
    NoOperation,
    #[error("Unknown fragment \"{0}\"")]
    UnknownFragment(String),
    #[error("Fragment \"{0}\" spreads itself")]
    FragmentCycle(String),
    #[error("Schema is not configured to execute {0} operations")]
    MissingRootType(&'static str),
    #[error("Variable \"${0}\" of required type was not provided")]
    MissingVariable(String),
    #[error("Subscription operations must select exactly one root field, found {0}")]
    SubscriptionRootFields(usize),
}

impl From<&DelegationError> for GraphQLError {
    fn from(error: &DelegationError) -> Self {
        GraphQLError::from(error.to_string())
    }
}

/// Invalid subschema definitions, reported while the gateway is assembled.
#[derive(thiserror::Error, Debug, Clone)]
pub enum SubschemaError {
    #[error("Subschema \"{subschema}\": {source}")]
    Schema {
        subschema: String,
        #[source]
        source: SchemaMetadataError,
    },
    #[error("Subschema \"{subschema}\": invalid merge configuration for \"{type_name}\": {reason}")]
    InvalidMerge {
        subschema: String,
        type_name: String,
        reason: String,
    },
}
