use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use futures::future::{self, JoinAll};

use crate::{
    batch_function::BatchFunction,
    cache::{Cache, NoCache},
    execution_context::{ExecutionHandle, Flush},
    loader_worker::{LoaderWorker, Worker},
    slot::LoadFuture,
};
#[cfg(feature = "stats")]
use crate::worker_stats::WorkerStats;

/// Batch loads values from some expensive resource, primarily intended for mitigating GraphQL's
/// N+1 problem.
///
/// Users call [`Loader::load`] and [`Loader::load_many`] from resolvers driven by a
/// [`DeferredExecutionContext`](crate::DeferredExecutionContext). Every distinct key requested
/// during a wave of the execution is collected, and the loader's `BatchFunction` is invoked once
/// for all of them when the wave can make no further progress. The returned futures resolve after
/// that flush.
///
/// A loader created with [`Loader::new`] forgets values once their round is over. Pass a [`Cache`]
/// to [`Loader::with_cache`] to keep resolved values across rounds; that cache can be cleared
/// with [`Loader::clear`] and [`Loader::clear_many`], and values can be added out-of-band through
/// [`Loader::prime`] and [`Loader::prime_many`].
///
/// `Loader` is a cheap, single-threaded handle (`!Send`). Clones share the same round state.
pub struct Loader<K, V> {
    worker: Rc<dyn Worker<K, V>>,
}

impl<K, V> Clone for Loader<K, V> {
    fn clone(&self) -> Self {
        Self { worker: Rc::clone(&self.worker) }
    }
}

impl<K, V> Loader<K, V>
where
    K: 'static + Eq + Hash + Clone + Debug,
    V: 'static + Clone + Debug,
{
    /// Creates a new Loader for the provided BatchFunction and Context type, bound to the
    /// execution behind `execution`.
    ///
    /// Note: the batch function is passed in as a marker for type inference.
    pub fn new<F, ContextT>(f: F, context: ContextT, execution: &ExecutionHandle) -> Self
    where
        ContextT: 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT>,
    {
        Self::with_cache(f, context, execution, NoCache::default())
    }

    /// Like [`Loader::new`], keeping values resolved in earlier rounds in `cache`.
    pub fn with_cache<F, ContextT, CacheT>(
        _: F,
        context: ContextT,
        execution: &ExecutionHandle,
        cache: CacheT,
    ) -> Self
    where
        ContextT: 'static,
        F: 'static + BatchFunction<K, V, Context = ContextT>,
        CacheT: 'static + Cache<K = K, V = V>,
    {
        Self {
            worker: Rc::new(LoaderWorker::<K, V, F, CacheT, ContextT>::new(
                cache,
                context,
                execution.downgrade(),
            )),
        }
    }

    /// Loads a value from the underlying resource.
    ///
    /// The key is registered immediately, in call order, so the order of `load` calls decides the
    /// order of keys handed to the `BatchFunction`. If the value is already in the loader cache
    /// the future is ready at once. Otherwise it resolves after the next flush of the execution.
    ///
    /// Requests made after the execution ended fail with
    /// [`LoadError::UnresolvedLoad`](crate::LoadError::UnresolvedLoad).
    pub fn load(&self, key: K) -> LoadFuture<V> {
        Rc::clone(&self.worker).load(key)
    }

    /// Loads many values at once. Results are in the order of `keys`.
    pub fn load_many<I>(&self, keys: I) -> JoinAll<LoadFuture<V>>
    where
        I: IntoIterator<Item = K>,
    {
        future::join_all(keys.into_iter().map(|key| self.load(key)))
    }

    /// Adds a value to the cache.
    pub fn prime(&self, key: K, value: V) {
        self.worker.prime_many(vec![(key, value)]);
    }

    /// Adds many values to the cache at once.
    pub fn prime_many(&self, key_vals: Vec<(K, V)>) {
        self.worker.prime_many(key_vals);
    }

    /// Removes a value from the cache.
    ///
    /// This key will be reloaded when it is next requested.
    pub fn clear(&self, key: K) {
        self.worker.clear_many(std::slice::from_ref(&key));
    }

    /// Removes multiple values from the cache at once.
    ///
    /// These keys will be reloaded when requested.
    pub fn clear_many(&self, keys: Vec<K>) {
        self.worker.clear_many(&keys);
    }

    /// Empties the cache.
    pub fn clear_all(&self) {
        self.worker.clear_all();
    }

    /// Dispatches the keys collected so far without waiting for the end of the wave.
    pub async fn flush(&self) {
        self.worker.flush().await;
    }

    /// Whether keys are waiting for the next flush.
    pub fn has_pending(&self) -> bool {
        self.worker.has_pending()
    }

    /// Number of times the `BatchFunction` has been invoked.
    pub fn dispatch_count(&self) -> u64 {
        self.worker.dispatch_count()
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> WorkerStats {
        self.worker.stats()
    }
}
