//! Round-based dataloader for GraphQL resolvers.
//!
//! Resolvers run as futures on a [`DeferredExecutionContext`]. Every [`Loader::load`] issued
//! while the context polls a wave of resolvers is queued; when no resolver can make progress
//! the context flushes each loader once, handing its [`BatchFunction`] all keys of the round, and
//! resumes the resolvers waiting on them. A query resolving N items with M distinct related keys
//! therefore fetches the relation once, with M keys.

mod batch_function;
mod batch_key_cache;
mod cache;
mod error;
mod execution_context;
mod loader;
mod loader_worker;
mod slot;
mod task;
#[cfg(feature = "stats")]
mod worker_stats;

pub use batch_function::{BatchFunction, ByKey, KeyedBatchError, KeyedBatchFunction};
pub use cache::{Cache, NoCache};
pub use error::{ExecutionError, LoadError};
pub use execution_context::{DeferredExecutionContext, ExecutionHandle, ExecutionState};
pub use loader::Loader;
pub use slot::LoadFuture;
#[cfg(feature = "stats")]
pub use worker_stats::WorkerStats;
