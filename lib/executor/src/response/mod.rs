pub mod execution_result;
pub mod graphql_error;
pub mod merge;
pub mod projection;
