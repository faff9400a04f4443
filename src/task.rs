use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use futures::future::{FutureExt, LocalBoxFuture};
use futures::task::{self, ArcWake};
use tokio::sync::mpsc;

pub(crate) type TaskId = usize;

/// Waker for one resolver task: waking posts the task id on the context's ready queue.
///
/// The queue is the only state a waker touches, which keeps wakers `Send + Sync` while the tasks
/// themselves stay on the driving thread.
struct TaskWaker {
    id: TaskId,
    ready_tx: mpsc::UnboundedSender<TaskId>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        // The receiver is gone once the execution returned; late wakeups are moot.
        let _ = arc_self.ready_tx.send(arc_self.id);
    }
}

/// Resolver futures owned by one execution, indexed by `TaskId`.
///
/// A task is taken out of its entry while it is polled, so resolvers may spawn further tasks
/// without the table being borrowed.
#[derive(Default)]
pub(crate) struct TaskTable {
    tasks: Vec<Option<LocalBoxFuture<'static, ()>>>,
    live: usize,
}

impl TaskTable {
    pub fn insert(&mut self, task: LocalBoxFuture<'static, ()>) -> TaskId {
        self.tasks.push(Some(task));
        self.live += 1;
        self.tasks.len() - 1
    }

    pub fn take(&mut self, id: TaskId) -> Option<LocalBoxFuture<'static, ()>> {
        self.tasks.get_mut(id).and_then(Option::take)
    }

    pub fn restore(&mut self, id: TaskId, task: LocalBoxFuture<'static, ()>) {
        if let Some(entry) = self.tasks.get_mut(id) {
            *entry = Some(task);
        }
    }

    pub fn complete(&mut self) {
        self.live -= 1;
    }

    pub fn live(&self) -> usize {
        self.live
    }
}

/// Polls one task once with a waker that reschedules it by id.
pub(crate) fn poll_task(
    task: &mut LocalBoxFuture<'static, ()>,
    id: TaskId,
    ready_tx: &mpsc::UnboundedSender<TaskId>,
) -> Poll<()> {
    let waker: Waker = task::waker(Arc::new(TaskWaker { id, ready_tx: ready_tx.clone() }));
    let mut cx = Context::from_waker(&waker);
    task.poll_unpin(&mut cx)
}
