pub mod metadata;
pub mod transforms;
pub mod type_ref;
