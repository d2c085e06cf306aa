pub mod delegate;
pub mod document;
pub mod error;
pub mod normalize;
pub mod plan;
pub mod subschema;
