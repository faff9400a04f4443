use std::collections::HashMap;
use std::error::Error;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use async_trait::async_trait;
use thiserror::Error;

/// A `BatchFunction` defines how a `Loader` fetches the keys requested during one round.
///
/// The function receives every distinct key queued since the previous flush, in the order the
/// keys were first requested, together with a user defined context struct. It must return one
/// value per key, positionally: the value at index `i` answers `keys[i]`. A result of the wrong
/// length is rejected and every requester of the batch receives
/// [`LoadError::ResultShape`](crate::LoadError::ResultShape).
///
/// Absence is not an error. Encode it in `V` (typically `Option<T>`) and reserve `Err` for
/// failures of the fetch itself, which are broadcast to every key of the batch.
///
/// Multiple `BatchFunctions` (and therefore loaders) can share the same context (likely through an
/// `Rc`).
#[async_trait(?Send)]
pub trait BatchFunction<K, V> {
    type Context;
    type Error: Error + Send + Sync + 'static;

    async fn load(keys: &[K], context: &Self::Context) -> Result<Vec<V>, Self::Error>;
}

/// Batch function that returns loaded key value pairs in any order.
///
/// Wrap it in [`ByKey`] to use it with a `Loader`. Every requested key must be answered; a key
/// missing from the result fails the whole batch with [`KeyedBatchError::MissingKey`].
#[async_trait(?Send)]
pub trait KeyedBatchFunction<K, V> {
    type Context;
    type Error: Error + Send + Sync + 'static;

    async fn load(keys: &[K], context: &Self::Context) -> Result<Vec<(K, V)>, Self::Error>;
}

#[derive(Debug, Error)]
pub enum KeyedBatchError<E> {
    #[error(transparent)]
    Load(E),
    #[error("batch function returned no value for key {key}")]
    MissingKey { key: String },
}

/// Adapts a [`KeyedBatchFunction`] to the positional [`BatchFunction`] contract.
pub struct ByKey<F>(PhantomData<F>);

impl<F> Default for ByKey<F> {
    fn default() -> Self {
        ByKey(PhantomData)
    }
}

#[async_trait(?Send)]
impl<K, V, F> BatchFunction<K, V> for ByKey<F>
where
    K: 'static + Eq + Hash + Debug,
    V: 'static,
    F: 'static + KeyedBatchFunction<K, V>,
{
    type Context = F::Context;
    type Error = KeyedBatchError<F::Error>;

    async fn load(keys: &[K], context: &Self::Context) -> Result<Vec<V>, Self::Error> {
        let loaded = F::load(keys, context).await.map_err(KeyedBatchError::Load)?;
        let mut loaded = loaded.into_iter().collect::<HashMap<_, _>>();
        keys.iter()
            .map(|key| {
                loaded
                    .remove(key)
                    .ok_or_else(|| KeyedBatchError::MissingKey { key: format!("{key:?}") })
            })
            .collect()
    }
}
