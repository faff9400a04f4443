use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;

use thiserror::Error;

/// Error delivered to every `LoadFuture` waiting on a slot.
///
/// Errors are cloned out of the slot, so all requesters of the same key in the same round observe
/// the same underlying `Arc` for batch failures.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// The batch function returned `Err`. Shared by every key of the failed batch.
    #[error("batch function failed: {0}")]
    BatchFunction(#[source] Arc<dyn Error + Send + Sync>),

    /// The batch function returned a different number of values than it was given keys.
    #[error("batch function returned {actual} values for {expected} keys")]
    ResultShape { expected: usize, actual: usize },

    /// The key was requested after its execution context finished, or the context finished
    /// without ever flushing it.
    #[error("load of key {key} was never dispatched by its execution context")]
    UnresolvedLoad { key: String },

    /// The key was requested while its execution context was running batch functions.
    #[error("load of key {key} requested while the execution context was flushing")]
    ReentrantLoad { key: String },
}

impl LoadError {
    pub(crate) fn batch<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        LoadError::BatchFunction(Arc::new(error))
    }

    pub(crate) fn unresolved<K: Debug>(key: &K) -> Self {
        LoadError::UnresolvedLoad { key: format!("{key:?}") }
    }

    pub(crate) fn reentrant<K: Debug>(key: &K) -> Self {
        LoadError::ReentrantLoad { key: format!("{key:?}") }
    }
}

/// Why [`DeferredExecutionContext::execute`](crate::DeferredExecutionContext::execute) did not
/// produce the root resolver's value.
#[derive(Debug, Error)]
pub enum ExecutionError<E> {
    /// The root resolver returned an error; the execution ended in `Failed`.
    #[error("root resolver failed: {0}")]
    Resolver(E),

    /// The driver stopped before the root resolver produced an output.
    #[error("execution stopped before the root resolver completed")]
    Incomplete,
}
