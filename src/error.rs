use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Error taxonomy for the task execution core.
///
/// Every variant knows whether a caller may retry the operation that
/// produced it; `retryable()` is the single source of truth consulted
/// by workers and the queue manager instead of matching on variants.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation failed for {operation}: {message}")]
    Validation { operation: String, message: String },

    #[error("store error during {operation}: {source}")]
    Store {
        operation: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("store connection unavailable: {0}")]
    StoreUnavailable(String),

    #[error("concurrency limit reached")]
    ConcurrencyLimitReached,

    #[error("security rejection: {0}")]
    SecurityRejected(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("task execution timed out")]
    Timeout,

    #[error("task execution cancelled")]
    Cancelled,

    #[error("container runtime unavailable: {0}")]
    ContainerRuntimeUnavailable(String),

    #[error("invalid receipt handle")]
    InvalidReceiptHandle,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the operation that produced this error may be retried by the caller.
    ///
    /// Mirrors the policy table in the error handling design: validation,
    /// security rejections, cancellation and not-found are terminal;
    /// store and concurrency errors are retryable; execution failures and
    /// timeouts are surfaced as task outcomes and handled by `fail_task`,
    /// not retried at the call site that produced them.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Store { .. }
                | CoreError::StoreUnavailable(_)
                | CoreError::ConcurrencyLimitReached
        )
    }

    pub fn validation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn store(operation: impl Into<String>, source: redis::RedisError) -> Self {
        CoreError::Store {
            operation: operation.into(),
            source,
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(e: redis::RedisError) -> Self {
        CoreError::Store {
            operation: "unspecified".to_string(),
            source: e,
        }
    }
}
