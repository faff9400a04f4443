use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use async_trait::async_trait;
use tracing_futures::Instrument;

use crate::{
    batch_function::BatchFunction,
    batch_key_cache::BatchKeyCache,
    cache::Cache,
    error::LoadError,
    execution_context::{ExecutionState, Flush, Scheduler},
    slot::{LoadFuture, Slot},
};
#[cfg(feature = "stats")]
use crate::worker_stats::WorkerStats;

/// Type-erased surface of a [`LoaderWorker`] used by [`Loader`](crate::Loader).
pub(crate) trait Worker<K, V>: Flush {
    fn load(self: Rc<Self>, key: K) -> LoadFuture<V>;
    fn prime_many(&self, key_vals: Vec<(K, V)>);
    fn clear_many(&self, keys: &[K]);
    fn clear_all(&self);
    fn has_pending(&self) -> bool;
    fn dispatch_count(&self) -> u64;
    #[cfg(feature = "stats")]
    fn stats(&self) -> WorkerStats;
}

/// A `LoaderWorker` holds the round state of one loader and does the actual loading work.
///
/// Its lifetime is split into rounds bounded by flushes of the owning execution context:
///
/// 1. Collecting. Each `load` first consults the resolved-value cache; a hit resolves
///    immediately. Otherwise the key joins the round registry, sharing the slot of an earlier
///    request for the same key. The first new key of a round puts the worker on the context's
///    flush queue.
/// 2. Flushing. Once the context's wave can make no more progress it calls
///    [`Flush::flush`]: the registry is drained, the `BatchFunction` runs once with the drained
///    keys in request order, values are inserted in the cache and each slot is fulfilled by
///    position, waking the tasks that wait on it.
///
/// A failed batch (error or wrong result length) fails every slot of that round with the same
/// error. Keys still pending when the context terminates are failed with
/// [`LoadError::UnresolvedLoad`].
pub(crate) struct LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug,
    V: 'static + Clone + Debug,
    F: 'static + BatchFunction<K, V, Context = ContextT>,
    CacheT: Cache<K = K, V = V>,
    ContextT: 'static,
{
    cache: RefCell<CacheT>,
    pending: RefCell<BatchKeyCache<K, V>>,
    queued: Cell<bool>,
    context: ContextT,
    scheduler: Weak<Scheduler>,
    dispatches: Cell<u64>,
    #[cfg(feature = "stats")]
    stats: RefCell<WorkerStats>,
    phantom_batch_function: PhantomData<F>,
    debug_name: &'static str,
}

impl<K, V, F, CacheT, ContextT> LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug,
    V: 'static + Clone + Debug,
    F: 'static + BatchFunction<K, V, Context = ContextT>,
    CacheT: Cache<K = K, V = V>,
    ContextT: 'static,
{
    pub fn new(cache: CacheT, context: ContextT, scheduler: Weak<Scheduler>) -> Self {
        let debug_name = std::any::type_name::<(K, V)>();
        Self {
            cache: RefCell::new(cache),
            pending: RefCell::new(BatchKeyCache::default()),
            queued: Cell::new(false),
            context,
            scheduler,
            dispatches: Cell::new(0),
            #[cfg(feature = "stats")]
            stats: RefCell::new(WorkerStats::new(debug_name)),
            phantom_batch_function: PhantomData,
            debug_name,
        }
    }

    #[tracing::instrument(skip(self), fields(loader = self.debug_name))]
    async fn execute_load(&self) -> bool {
        let batch = self.pending.borrow_mut().drain();
        self.queued.set(false);
        if batch.is_empty() {
            return false;
        }

        let keys = batch.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>();
        self.dispatches.set(self.dispatches.get() + 1);
        #[cfg(feature = "stats")]
        self.stats.borrow_mut().record_dispatch(keys.len() as u32);
        tracing::debug!(?keys, "dispatching batch");

        let span = tracing::debug_span!("batch_function", batch_size = keys.len());
        match F::load(&keys, &self.context).instrument(span).await {
            Ok(values) if values.len() == keys.len() => {
                tracing::debug!(loaded = ?values);
                self.cache.borrow_mut().insert_many(keys.into_iter().zip(values.iter().cloned()));
                for ((_, slot), value) in batch.into_iter().zip(values) {
                    slot.fulfill(Ok(value));
                }
            }
            Ok(values) => {
                let error = LoadError::ResultShape { expected: keys.len(), actual: values.len() };
                tracing::error!(%error);
                self.fail_batch(batch, error);
            }
            Err(e) => {
                tracing::error!(error = %e, "batch function failed");
                self.fail_batch(batch, LoadError::batch(e));
            }
        }
        true
    }

    fn fail_batch(&self, batch: Vec<(K, Rc<Slot<V>>)>, error: LoadError) {
        #[cfg(feature = "stats")]
        self.stats.borrow_mut().record_failed_dispatch();
        for (_, slot) in batch {
            slot.fulfill(Err(error.clone()));
        }
    }
}

#[async_trait(?Send)]
impl<K, V, F, CacheT, ContextT> Flush for LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug,
    V: 'static + Clone + Debug,
    F: 'static + BatchFunction<K, V, Context = ContextT>,
    CacheT: Cache<K = K, V = V>,
    ContextT: 'static,
{
    async fn flush(&self) -> bool {
        self.execute_load().await
    }

    fn abandon(&self) {
        let batch = self.pending.borrow_mut().drain();
        self.queued.set(false);
        if batch.is_empty() {
            return;
        }
        tracing::warn!(loader = self.debug_name, keys = batch.len(), "abandoning unflushed keys");
        #[cfg(feature = "stats")]
        self.stats.borrow_mut().record_abandoned(batch.len() as u32);
        for (key, slot) in batch {
            slot.fulfill(Err(LoadError::unresolved(&key)));
        }
    }
}

impl<K, V, F, CacheT, ContextT> Worker<K, V> for LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug,
    V: 'static + Clone + Debug,
    F: 'static + BatchFunction<K, V, Context = ContextT>,
    CacheT: 'static + Cache<K = K, V = V>,
    ContextT: 'static,
{
    fn load(self: Rc<Self>, key: K) -> LoadFuture<V> {
        #[cfg(feature = "stats")]
        self.stats.borrow_mut().record_load_request();

        let Some(scheduler) = self.scheduler.upgrade() else {
            return LoadFuture::ready(Err(LoadError::unresolved(&key)));
        };
        match scheduler.state() {
            ExecutionState::Running => {}
            ExecutionState::Flushing => {
                tracing::warn!(loader = self.debug_name, ?key, "load requested while flushing");
                return LoadFuture::ready(Err(LoadError::reentrant(&key)));
            }
            ExecutionState::Done | ExecutionState::Failed => {
                tracing::warn!(loader = self.debug_name, ?key, "load requested after the end");
                return LoadFuture::ready(Err(LoadError::unresolved(&key)));
            }
        }

        if let Some(value) = self.cache.borrow().get(&key) {
            #[cfg(feature = "stats")]
            self.stats.borrow_mut().record_cache_hit();
            return LoadFuture::ready(Ok(value.clone()));
        }

        let (slot, is_new) = self.pending.borrow_mut().get_or_create_slot(key);
        if is_new && !self.queued.replace(true) {
            scheduler.enqueue_flush(Rc::clone(&self) as Rc<dyn Flush>);
        }
        #[cfg(feature = "stats")]
        if !is_new {
            self.stats.borrow_mut().record_deduplicated();
        }
        LoadFuture::waiting(slot, Weak::clone(&self.scheduler))
    }

    fn prime_many(&self, key_vals: Vec<(K, V)>) {
        self.cache.borrow_mut().insert_many(key_vals);
    }

    fn clear_many(&self, keys: &[K]) {
        self.cache.borrow_mut().remove(keys);
    }

    fn clear_all(&self) {
        self.cache.borrow_mut().flush();
    }

    fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    fn dispatch_count(&self) -> u64 {
        self.dispatches.get()
    }

    #[cfg(feature = "stats")]
    fn stats(&self) -> WorkerStats {
        self.stats.borrow().clone()
    }
}

#[cfg(feature = "stats")]
impl<K, V, F, CacheT, ContextT> Drop for LoaderWorker<K, V, F, CacheT, ContextT>
where
    K: 'static + Eq + Hash + Clone + Debug,
    V: 'static + Clone + Debug,
    F: 'static + BatchFunction<K, V, Context = ContextT>,
    CacheT: Cache<K = K, V = V>,
    ContextT: 'static,
{
    fn drop(&mut self) {
        tracing::debug!(worker_stats = ?self.stats.borrow());
    }
}
