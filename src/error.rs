/// Error type for this crate.
///
/// There are exactly two kinds of failure. [`TollgateError::InvalidConfiguration`] is raised
/// synchronously, before the store is contacted. [`TollgateError::OperationFailed`] is raised
/// when the store could not produce a trustworthy answer; it is never converted into an
/// allowed or denied decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TollgateError {
    /// Invalid limiter options, batch size or connection settings.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The store was unreachable, rejected the operation, or replied with an unexpected shape.
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl TollgateError {
    pub(crate) fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    #[cfg_attr(
        not(any(feature = "redis-tokio", feature = "redis-smol")),
        allow(dead_code)
    )]
    pub(crate) fn operation_failed(message: impl Into<String>) -> Self {
        Self::OperationFailed(message.into())
    }

    /// Returns `true` for [`TollgateError::InvalidConfiguration`].
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }
}

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
impl From<redis::RedisError> for TollgateError {
    fn from(err: redis::RedisError) -> Self {
        Self::OperationFailed(format!("redis error: {err}"))
    }
}
