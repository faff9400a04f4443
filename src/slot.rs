use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

use crate::error::LoadError;
use crate::execution_context::Scheduler;

/// Result cell shared by every request for one key during one round.
///
/// Wakers are kept in registration order and woken in that order once the slot is fulfilled.
#[derive(Debug)]
pub(crate) struct Slot<V> {
    key: String,
    result: RefCell<Option<Result<V, LoadError>>>,
    waiters: RefCell<Vec<Waker>>,
}

impl<V> Slot<V> {
    /// `key` is the `Debug` rendering of the requested key, used in errors.
    pub(crate) fn new(key: String) -> Self {
        Self { key, result: RefCell::new(None), waiters: RefCell::new(Vec::new()) }
    }

    fn unresolved(&self) -> LoadError {
        LoadError::UnresolvedLoad { key: self.key.clone() }
    }
}

impl<V: Clone> Slot<V> {
    pub(crate) fn get(&self) -> Option<Result<V, LoadError>> {
        self.result.borrow().clone()
    }

    /// Stores the result and wakes every waiter, first registered first.
    ///
    /// A slot is fulfilled at most once; later results are ignored.
    pub(crate) fn fulfill(&self, result: Result<V, LoadError>) {
        {
            let mut slot = self.result.borrow_mut();
            if slot.is_some() {
                tracing::warn!("slot fulfilled twice, keeping the first result");
                return;
            }
            *slot = Some(result);
        }
        for waker in self.waiters.take() {
            waker.wake();
        }
    }

    fn register(&self, waker: &Waker) {
        let mut waiters = self.waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }
}

/// Future returned by [`Loader::load`](crate::Loader::load).
///
/// Resolves once the owning loader has been flushed by its execution context, or immediately
/// when the value was already cached. Polling a pending load while its execution context is not
/// being driven (from a task of another context, or before or after `execute`) resolves to
/// [`LoadError::UnresolvedLoad`]: nothing would ever flush it.
#[must_use = "futures do nothing unless polled"]
pub struct LoadFuture<V> {
    state: LoadState<V>,
}

enum LoadState<V> {
    Ready(Option<Result<V, LoadError>>),
    Waiting(Rc<Slot<V>>, Weak<Scheduler>),
}

impl<V> LoadFuture<V> {
    pub(crate) fn ready(result: Result<V, LoadError>) -> Self {
        Self { state: LoadState::Ready(Some(result)) }
    }

    pub(crate) fn waiting(slot: Rc<Slot<V>>, scheduler: Weak<Scheduler>) -> Self {
        Self { state: LoadState::Waiting(slot, scheduler) }
    }
}

impl<V: Debug> Debug for LoadFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            LoadState::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            LoadState::Waiting(slot, _) => f.debug_tuple("Waiting").field(slot).finish(),
        }
    }
}

// Never pin-projected.
impl<V> Unpin for LoadFuture<V> {}

impl<V: Clone> Future for LoadFuture<V> {
    type Output = Result<V, LoadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            LoadState::Ready(result) => match result.take() {
                Some(result) => Poll::Ready(result),
                None => panic!("LoadFuture polled after completion"),
            },
            LoadState::Waiting(slot, scheduler) => match slot.get() {
                Some(result) => {
                    this.state = LoadState::Ready(None);
                    Poll::Ready(result)
                }
                None if !scheduler.upgrade().is_some_and(|s| s.is_driving()) => {
                    tracing::warn!(key = %slot.key, "load awaited outside of its execution");
                    let error = slot.unresolved();
                    this.state = LoadState::Ready(None);
                    Poll::Ready(Err(error))
                }
                None => {
                    slot.register(cx.waker());
                    Poll::Pending
                }
            },
        }
    }
}
