use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;

/// Resolved-value store consulted before a key is queued for the current round.
///
/// The round registry alone never remembers a value past its flush. A `Cache` layered above it
/// lets a loader answer keys fetched in earlier rounds without suspending the caller. Only
/// successful values are inserted.
pub trait Cache {
    type K;
    type V;

    /// Returns the value cached for `key`, if any.
    fn get(&self, key: &Self::K) -> Option<&Self::V>;

    fn insert(&mut self, key: Self::K, value: Self::V);
    fn insert_many<I: IntoIterator<Item = (Self::K, Self::V)>>(&mut self, key_vals: I);

    fn remove(&mut self, keys: &[Self::K]);
    fn flush(&mut self);
}

impl<K, V, S: BuildHasher> Cache for HashMap<K, V, S>
where
    K: Eq + Hash,
{
    type K = K;
    type V = V;

    fn get(&self, key: &Self::K) -> Option<&Self::V> {
        HashMap::get(self, key)
    }

    fn insert(&mut self, key: Self::K, value: Self::V) {
        HashMap::insert(self, key, value);
    }

    fn insert_many<I: IntoIterator<Item = (Self::K, Self::V)>>(&mut self, key_vals: I) {
        for (key, value) in key_vals.into_iter() {
            HashMap::insert(self, key, value);
        }
    }

    fn remove(&mut self, keys: &[Self::K]) {
        for key in keys.iter() {
            HashMap::remove(self, key);
        }
    }

    fn flush(&mut self) {
        self.clear();
    }
}

/// Cache that stores nothing: every round fetches its keys again.
#[derive(Debug)]
pub struct NoCache<K, V>(PhantomData<fn() -> (K, V)>);

impl<K, V> Default for NoCache<K, V> {
    fn default() -> Self {
        NoCache(PhantomData)
    }
}

impl<K, V> Cache for NoCache<K, V> {
    type K = K;
    type V = V;

    fn get(&self, _key: &Self::K) -> Option<&Self::V> {
        None
    }

    fn insert(&mut self, _key: Self::K, _value: Self::V) {}

    fn insert_many<I: IntoIterator<Item = (Self::K, Self::V)>>(&mut self, _key_vals: I) {}

    fn remove(&mut self, _keys: &[Self::K]) {}

    fn flush(&mut self) {}
}
