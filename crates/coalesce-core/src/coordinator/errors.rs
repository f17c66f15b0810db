use crate::types::RequestKey;
use thiserror::Error;

/// Failures surfaced by `Coordinator::execute` and `Coordinator::execute_batch`.
///
/// `E` is the executor's own error type; it is passed through untouched so
/// every caller sharing an execution sees exactly what the executor returned.
/// None of these are retried internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CoalesceError<E> {
    /// `max_pending` distinct keys are already in flight; nothing was executed.
    #[error("too many pending requests (limit {max_pending})")]
    CapacityExceeded { max_pending: usize },

    /// The executor failed. Shared verbatim with every joined caller and never cached.
    #[error("execution failed: {0}")]
    Execution(E),

    /// The batch executor failed. Shared verbatim with every member of the batch.
    #[error("batch execution failed: {0}")]
    Batch(E),

    /// The batch executor returned a result list whose length differs from the member count.
    #[error("batch executor returned {actual} results for {expected} requests")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// The execution panicked or was cancelled before producing an outcome.
    #[error("execution for key {key} was abandoned")]
    Abandoned { key: RequestKey },
}

impl<E> CoalesceError<E> {
    #[must_use]
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Returns the executor's own error, if this failure carries one.
    #[must_use]
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Execution(e) | Self::Batch(e) => Some(e),
            _ => None,
        }
    }

    /// Static label for metrics and log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::Execution(_) => "execution_failed",
            Self::Batch(_) => "batch_failed",
            Self::BatchSizeMismatch { .. } => "batch_size_mismatch",
            Self::Abandoned { .. } => "abandoned",
        }
    }
}
