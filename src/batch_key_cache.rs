use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::slot::Slot;

/// Registry of the keys requested from one loader during the current round.
///
/// Each distinct key owns exactly one [`Slot`] until the round is drained, so repeated requests
/// for a key share one fetch and one result. Iteration order is first-request order.
pub(crate) struct BatchKeyCache<K, V> {
    slots: IndexMap<K, Rc<Slot<V>>>,
}

impl<K, V> Default for BatchKeyCache<K, V> {
    fn default() -> Self {
        Self { slots: IndexMap::new() }
    }
}

impl<K, V> BatchKeyCache<K, V>
where
    K: Eq + Hash + Debug,
{
    /// Returns the slot registered for `key`, creating it when this is the key's first request
    /// in the round. The flag is `true` only for newly created slots.
    pub fn get_or_create_slot(&mut self, key: K) -> (Rc<Slot<V>>, bool) {
        match self.slots.entry(key) {
            indexmap::map::Entry::Occupied(entry) => (Rc::clone(entry.get()), false),
            indexmap::map::Entry::Vacant(entry) => {
                let slot = Rc::new(Slot::new(format!("{:?}", entry.key())));
                entry.insert(Rc::clone(&slot));
                (slot, true)
            }
        }
    }

    /// Removes every slot, in first-request order, leaving the registry empty for the next round.
    pub fn drain(&mut self) -> Vec<(K, Rc<Slot<V>>)> {
        self.slots.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
