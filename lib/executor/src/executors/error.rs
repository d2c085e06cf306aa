#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExecutorError {
    /// The call could not complete: network failure, timeout, non-GraphQL response.
    #[error("Failed to execute request: {0}")]
    TransportFailure(String),
    #[error("Batch executor returned {received} results for {expected} requests")]
    BatchCardinalityMismatch { expected: usize, received: usize },
    #[error("The batch was dropped before it settled")]
    BatchDropped,
    #[error("Invalid execution request: {0}")]
    InvalidRequest(String),
    #[error("Failed to read the executor response: {0}")]
    MalformedResponse(String),
}

impl ExecutorError {
    pub fn transport(message: impl Into<String>) -> Self {
        ExecutorError::TransportFailure(message.into())
    }

    /// Failures coming from a misbehaving executor rather than from the upstream itself.
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, ExecutorError::BatchCardinalityMismatch { .. })
    }
}
