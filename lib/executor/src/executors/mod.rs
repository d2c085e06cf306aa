pub mod batch;
pub mod common;
pub mod dedupe;
pub mod error;
pub mod local;
pub mod merge_requests;
