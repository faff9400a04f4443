use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};
use std::task::Poll;

use async_trait::async_trait;
use futures::future::{FutureExt, RemoteHandle};
use tokio::sync::mpsc;
use tracing_futures::Instrument;

use crate::error::ExecutionError;
use crate::task::{poll_task, TaskId, TaskTable};

/// Lifecycle of one [`DeferredExecutionContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Resolver tasks are being polled.
    Running,
    /// Loaders are running their batch functions; no task is polled.
    Flushing,
    /// No live task and no pending key remain.
    Done,
    /// The root resolver returned an error.
    Failed,
}

/// A loader with keys waiting for the end of the current wave.
#[async_trait(?Send)]
pub(crate) trait Flush {
    /// Runs the batch function once for every pending key and fulfills their slots. Returns
    /// `false` when no key was pending.
    async fn flush(&self) -> bool;

    /// Fails every pending key without calling the batch function.
    fn abandon(&self);
}

pub(crate) struct Scheduler {
    state: Cell<ExecutionState>,
    driving: Cell<bool>,
    round: Cell<u64>,
    tasks: RefCell<TaskTable>,
    ready_tx: mpsc::UnboundedSender<TaskId>,
    flush_queue: RefCell<Vec<Rc<dyn Flush>>>,
}

impl Scheduler {
    pub(crate) fn state(&self) -> ExecutionState {
        self.state.get()
    }

    /// Whether `execute` is currently polling this scheduler's tasks or flushing its loaders.
    pub(crate) fn is_driving(&self) -> bool {
        self.driving.get()
    }

    /// Queues a loader for the end of the current wave. Loaders are flushed in the order they
    /// were first queued.
    pub(crate) fn enqueue_flush(&self, loader: Rc<dyn Flush>) {
        self.flush_queue.borrow_mut().push(loader);
    }

    fn has_pending_flushes(&self) -> bool {
        !self.flush_queue.borrow().is_empty()
    }

    fn spawn_task(&self, task: futures::future::LocalBoxFuture<'static, ()>) {
        let id = self.tasks.borrow_mut().insert(task);
        // The receiver outlives every `Scheduler` reachable from a spawner during execution.
        let _ = self.ready_tx.send(id);
    }

    fn run_task(&self, id: TaskId) {
        // Already completed, or woken more than once in a wave.
        let Some(mut task) = self.tasks.borrow_mut().take(id) else {
            return;
        };
        match poll_task(&mut task, id, &self.ready_tx) {
            Poll::Ready(()) => {
                self.tasks.borrow_mut().complete();
                tracing::trace!(task = id, "task completed");
            }
            Poll::Pending => self.tasks.borrow_mut().restore(id, task),
        }
    }

    async fn flush_round(&self) {
        let queued = self.flush_queue.take();
        if queued.is_empty() {
            return;
        }
        let round = self.round.get();
        tracing::debug!(round, loaders = queued.len(), "flushing round");
        self.state.set(ExecutionState::Flushing);
        let mut dispatched = false;
        for loader in queued {
            dispatched |= loader.flush().await;
        }
        // Loaders flushed by hand during the wave have nothing left to dispatch.
        if dispatched {
            self.round.set(round + 1);
        }
        self.state.set(ExecutionState::Running);
    }

    fn fail(&self) {
        self.state.set(ExecutionState::Failed);
    }

    fn teardown(&self) {
        if self.state.get() != ExecutionState::Failed {
            self.state.set(ExecutionState::Done);
        }
        let abandoned = self.flush_queue.take();
        if !abandoned.is_empty() {
            tracing::warn!(loaders = abandoned.len(), "execution ended with pending loads");
        }
        for loader in abandoned {
            loader.abandon();
        }
        // Dropped outside the borrow: a task's destructors may reach back into the scheduler.
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        drop(tasks);
    }
}

/// Cheap handle on a running (or finished) execution.
///
/// Loaders are bound to an execution through its handle, and resolvers use it to spawn
/// additional tasks.
#[derive(Clone)]
pub struct ExecutionHandle {
    scheduler: Rc<Scheduler>,
}

impl ExecutionHandle {
    /// Spawns a resolver task on the execution.
    ///
    /// The task is first polled during the current (or next) wave. Dropping the returned handle
    /// cancels the task; call [`RemoteHandle::forget`] to let it run detached.
    ///
    /// Tasks spawned once the execution is `Done` or `Failed` are never polled, and their handle
    /// never resolves.
    pub fn spawn<F>(&self, future: F) -> RemoteHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        if matches!(self.state(), ExecutionState::Done | ExecutionState::Failed) {
            tracing::warn!(state = ?self.state(), "task spawned after the execution ended");
        }
        let (remote, handle) = future.remote_handle();
        self.scheduler.spawn_task(remote.boxed_local());
        handle
    }

    pub fn state(&self) -> ExecutionState {
        self.scheduler.state()
    }

    /// Number of completed flush rounds.
    pub fn round(&self) -> u64 {
        self.scheduler.round.get()
    }

    /// Whether any loader bound to this execution holds keys that were not flushed yet.
    pub fn has_pending_flushes(&self) -> bool {
        self.scheduler.has_pending_flushes()
    }

    pub(crate) fn downgrade(&self) -> Weak<Scheduler> {
        Rc::downgrade(&self.scheduler)
    }
}

/// Marks a scheduler as driven for as long as it lives, including when `execute` is cancelled.
struct Driving(Rc<Scheduler>);

impl Driving {
    fn start(scheduler: Rc<Scheduler>) -> Self {
        scheduler.driving.set(true);
        Self(scheduler)
    }
}

impl Drop for Driving {
    fn drop(&mut self) {
        self.0.driving.set(false);
    }
}

/// Single-threaded driver that resolves a query in waves.
///
/// During a wave every ready task is polled until each has either completed or suspended on a
/// pending [`LoadFuture`](crate::LoadFuture). When the wave runs dry, every loader that received
/// keys is flushed, first-blocked first-flushed, and the tasks woken by those flushes form the
/// next wave. Execution finishes in [`ExecutionState::Done`] once no task and no pending key
/// remain, or in [`ExecutionState::Failed`] as soon as the root resolver returns an error.
///
/// A task that awaits something other than a loader (a foreign future, I/O) keeps the execution
/// idle until it is woken.
pub struct DeferredExecutionContext {
    scheduler: Rc<Scheduler>,
    ready_rx: mpsc::UnboundedReceiver<TaskId>,
}

impl Default for DeferredExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredExecutionContext {
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        Self {
            scheduler: Rc::new(Scheduler {
                state: Cell::new(ExecutionState::Running),
                driving: Cell::new(false),
                round: Cell::new(0),
                tasks: RefCell::new(TaskTable::default()),
                ready_tx,
                flush_queue: RefCell::new(Vec::new()),
            }),
            ready_rx,
        }
    }

    pub fn handle(&self) -> ExecutionHandle {
        ExecutionHandle { scheduler: Rc::clone(&self.scheduler) }
    }

    /// Drives `root` and every spawned task to completion.
    ///
    /// An `Err` from `root` moves the execution to `Failed`: unfinished tasks are dropped and
    /// their pending keys fail with [`LoadError::UnresolvedLoad`](crate::LoadError::UnresolvedLoad).
    pub async fn execute<F, T, E>(mut self, root: F) -> Result<T, ExecutionError<E>>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: 'static,
        E: 'static,
    {
        let output = Rc::new(RefCell::new(None));
        let root_output = Rc::clone(&output);
        let scheduler = Rc::downgrade(&self.scheduler);
        self.scheduler.spawn_task(
            async move {
                let result = root.await;
                if result.is_err() {
                    if let Some(scheduler) = scheduler.upgrade() {
                        scheduler.fail();
                    }
                }
                *root_output.borrow_mut() = Some(result);
            }
            .boxed_local(),
        );

        let span = tracing::debug_span!("execution");
        {
            let _driving = Driving::start(Rc::clone(&self.scheduler));
            self.drive().instrument(span).await;
        }
        self.scheduler.teardown();
        tracing::debug!(state = ?self.scheduler.state(), rounds = self.scheduler.round.get());

        match output.take() {
            Some(Ok(value)) => Ok(value),
            Some(Err(e)) => Err(ExecutionError::Resolver(e)),
            None => Err(ExecutionError::Incomplete),
        }
    }

    /// Blocking form of [`execute`](Self::execute) for callers outside any async runtime.
    pub fn execute_sync<F, T, E>(self, root: F) -> Result<T, ExecutionError<E>>
    where
        F: Future<Output = Result<T, E>> + 'static,
        T: 'static,
        E: 'static,
    {
        futures::executor::block_on(self.execute(root))
    }

    async fn drive(&mut self) {
        loop {
            // Idle until some task is ready; a flush or a foreign wakeup provides one.
            let Some(id) = self.ready_rx.recv().await else {
                return;
            };
            self.scheduler.run_task(id);
            // Drain the rest of the wave before looking at the loaders.
            while self.scheduler.state() != ExecutionState::Failed {
                match self.ready_rx.try_recv() {
                    Ok(id) => self.scheduler.run_task(id),
                    Err(_) => break,
                }
            }
            if self.scheduler.state() == ExecutionState::Failed {
                return;
            }
            self.scheduler.flush_round().await;
            if self.scheduler.tasks.borrow().live() == 0 && !self.scheduler.has_pending_flushes() {
                return;
            }
        }
    }
}
