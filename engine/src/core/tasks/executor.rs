use crossbeam::channel::{unbounded, Receiver, Sender};
use crossbeam::sync::WaitGroup;
use log::error;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed pool of map workers. Phases hand it chunks of slots, grid batches or
/// whole maps; any thread may submit.
///
/// ```text
///   map thread ──┬─▶ [ channel ] ──▶ worker 0
///                │                ─▶ worker 1
///                │                ─▶ worker N
///                └─ scope drop waits on the WaitGroup of every scoped task
/// ```
///
/// Scoped work must never be started from inside one of the pool's own workers: a worker
/// blocked on a scope barrier is a worker that can no longer drain the queue.
pub struct Executor {
    sender: Sender<Message>,
    workers: Vec<Worker>,
}

enum Message {
    Task(Task),
    Shutdown,
}

struct Worker {
    id: usize,
    handle: Option<thread::JoinHandle<()>>,
}

impl Executor {
    /// Pool of `size` workers named `map-worker-N`.
    pub fn new(size: usize) -> Self {
        Self::named(size, "map-worker")
    }

    /// Pool of `size` workers whose thread names start with `name`.
    pub fn named(size: usize, name: &str) -> Self {
        assert!(size > 0, "map worker pool needs at least one worker");

        let (sender, receiver) = unbounded();
        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            workers.push(Worker::new(id, name, receiver.clone()));
        }

        Executor { sender, workers }
    }

    /// One worker. Jobs run in submission order, never overlapping.
    pub fn single_threaded() -> Self {
        Self::named(1, "map-lane")
    }

    /// Fire and forget. Jobs are picked up in submission order; completion order is unspecified.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(f));
    }

    /// Queues `f` and hands back a handle to its result.
    pub fn spawn<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam::channel::bounded(1);

        self.submit(Box::new(move || {
            let result = f();
            let _ = tx.send(result);
        }));

        TaskFuture { receiver: rx }
    }

    /// Worker count.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Runs `f` with a [`Scope`] whose jobs may borrow from the caller's stack, e.g. disjoint
    /// chunks of the slot table during the entity phase. Returns only after every job queued
    /// through the scope has finished or panicked.
    ///
    /// ```ignore
    /// executor.scope(|s| {
    ///     for chunk in slots.chunks_mut(64) {
    ///         s.spawn(move || chunk.iter_mut().for_each(|slot| slot.tick(diff)));
    ///     }
    /// });
    /// ```
    pub fn scope<'env, F, R>(&'env self, f: F) -> R
    where
        F: FnOnce(&Scope<'env>) -> R,
    {
        let scope = Scope {
            executor: self,
            pending: Some(WaitGroup::new()),
            _phantom: PhantomData,
        };

        // Scope::drop holds the barrier, so an unwinding `f` still waits.
        let result = f(&scope);
        drop(scope);
        result
    }

    fn submit(&self, task: Task) {
        if self.sender.send(Message::Task(task)).is_err() {
            error!("no map worker left to run job, dropping it");
        }
    }
}

/// Borrowing job submitter handed out by [`Executor::scope`].
pub struct Scope<'env> {
    executor: &'env Executor,
    pending: Option<WaitGroup>,
    _phantom: PhantomData<std::cell::Cell<&'env ()>>,
}

impl<'env> Scope<'env> {
    /// Queues a job that may borrow anything outliving the scope.
    pub fn spawn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'env,
    {
        let guard = self.guard();
        let task: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
            // Released on return and on unwind.
            let _guard = guard;
            f();
        });

        self.executor.submit(Self::extend(task));
    }

    /// Like [`Scope::spawn`], with a handle to the job's result.
    pub fn spawn_with_result<F, T>(&self, f: F) -> TaskFuture<T>
    where
        F: FnOnce() -> T + Send + 'env,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let guard = self.guard();

        let task: Box<dyn FnOnce() + Send + 'env> = Box::new(move || {
            let _guard = guard;
            let result = f();
            let _ = tx.send(result);
        });

        self.executor.submit(Self::extend(task));

        TaskFuture { receiver: rx }
    }

    fn guard(&self) -> Option<WaitGroup> {
        self.pending.as_ref().map(WaitGroup::clone)
    }

    fn extend(task: Box<dyn FnOnce() + Send + 'env>) -> Task {
        // Safety: every job owns a WaitGroup clone and Scope::drop waits on all of them, so
        // borrows held by the job end before 'env does. A job dropped unrun releases its
        // clone too.
        unsafe { std::mem::transmute::<Box<dyn FnOnce() + Send + 'env>, Task>(task) }
    }
}

impl<'env> Drop for Scope<'env> {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.wait();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.sender.send(Message::Shutdown);
        }

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    error!("map worker {} exited abnormally", worker.id);
                }
            }
        }
    }
}

impl Worker {
    fn new(id: usize, name: &str, receiver: Receiver<Message>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || {
                loop {
                    match receiver.recv() {
                        Ok(Message::Task(task)) => {
                            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                                error!("job panicked on map worker {id}");
                            }
                        }
                        Ok(Message::Shutdown) | Err(_) => break,
                    }
                }
            })
            .expect("failed to spawn executor worker thread");

        Worker {
            id,
            handle: Some(handle),
        }
    }
}

/// Handle to the result of a queued job.
pub struct TaskFuture<T> {
    receiver: Receiver<T>,
}

impl<T> TaskFuture<T> {
    /// Blocks until the job has produced its value. A panicked job yields `TaskFailed`.
    pub fn wait(self) -> Result<T, TaskError> {
        self.receiver.recv().map_err(|_| TaskError::TaskFailed)
    }

    /// Non-blocking poll: `Ok(None)` while the job is still queued or running.
    pub fn try_wait(&self) -> Result<Option<T>, TaskError> {
        match self.receiver.try_recv() {
            Ok(result) => Ok(Some(result)),
            Err(crossbeam::channel::TryRecvError::Empty) => Ok(None),
            Err(crossbeam::channel::TryRecvError::Disconnected) => Err(TaskError::TaskFailed),
        }
    }
}

/// A job never produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// Panicked, or dropped unrun when the pool shut down.
    TaskFailed,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::TaskFailed => write!(f, "map job did not complete"),
        }
    }
}

impl std::error::Error for TaskError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct Slot {
        timer: u64,
        ticks: u32,
    }

    fn slots(count: usize) -> Vec<Slot> {
        (0..count).map(|_| Slot { timer: 0, ticks: 0 }).collect()
    }

    #[test]
    fn chunked_slot_update_touches_every_slot_once() {
        // Given
        let executor = Executor::new(4);
        let mut table = slots(1_000);

        // When
        executor.scope(|s| {
            for chunk in table.chunks_mut(64) {
                s.spawn(move || {
                    for slot in chunk {
                        slot.timer += 50;
                        slot.ticks += 1;
                    }
                });
            }
        });

        // Then
        assert!(table.iter().all(|slot| slot.timer == 50 && slot.ticks == 1));
    }

    #[test]
    fn per_chunk_results_are_joined_in_submission_order() {
        // Given
        let executor = Executor::new(3);
        let table = slots(10);

        // When
        let counts = executor.scope(|s| {
            let handles: Vec<_> = table
                .chunks(4)
                .map(|chunk| s.spawn_with_result(move || chunk.len()))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.wait().unwrap())
                .collect::<Vec<_>>()
        });

        // Then
        assert_eq!(counts, vec![4, 4, 2]);
    }

    #[test]
    fn detached_map_jobs_report_their_results() {
        // Given
        let executor = Executor::named(2, "map-test");
        let total = Arc::new(AtomicU64::new(0));

        // When
        let handles: Vec<_> = (1..=8u64)
            .map(|map_id| {
                let total = Arc::clone(&total);
                executor.spawn(move || {
                    total.fetch_add(map_id, Ordering::SeqCst);
                    map_id
                })
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.wait().unwrap()).collect();

        // Then
        assert_eq!(ids, (1..=8).collect::<Vec<_>>());
        assert_eq!(total.load(Ordering::SeqCst), 36);
        assert_eq!(executor.size(), 2);
    }

    #[test]
    fn poll_reports_pending_until_the_job_finishes() {
        // Given
        let executor = Executor::single_threaded();
        let handle = executor.spawn(|| {
            thread::sleep(Duration::from_millis(100));
            "saved"
        });

        // Then
        assert_eq!(handle.try_wait(), Ok(None));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(handle.try_wait(), Ok(Some("saved")));
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        // Given
        let executor = Executor::new(2);
        let flushed = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&flushed);
        executor.execute(move || {
            thread::sleep(Duration::from_millis(50));
            *flag.lock().unwrap() = true;
        });

        // When
        drop(executor);

        // Then
        assert!(*flushed.lock().unwrap());
    }

    #[test]
    fn scope_waits_for_uneven_jobs() {
        // Given
        let executor = Executor::new(4);
        let done = AtomicUsize::new(0);

        // When
        executor.scope(|s| {
            for i in 0..16u64 {
                let done = &done;
                s.spawn(move || {
                    thread::sleep(Duration::from_millis(5 * (i % 4)));
                    done.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        // Then
        assert_eq!(done.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn panicking_job_does_not_poison_the_pool() {
        // Given
        let executor = Executor::new(2);
        let done = AtomicUsize::new(0);

        // When
        let failed = executor.scope(|s| {
            let bad = s.spawn_with_result(|| -> usize { panic!("corrupt slot") });
            let done = &done;
            s.spawn(move || {
                done.fetch_add(1, Ordering::SeqCst);
            });
            bad.wait()
        });

        // Then
        assert_eq!(failed, Err(TaskError::TaskFailed));
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(executor.spawn(|| 7).wait(), Ok(7));
    }

    #[test]
    fn single_lane_preserves_submission_order() {
        // Given
        let lane = Executor::single_threaded();
        let order = Mutex::new(Vec::new());

        // When
        lane.scope(|s| {
            for i in 0..8 {
                let order = &order;
                s.spawn(move || order.lock().unwrap().push(i));
            }
        });

        // Then
        assert_eq!(order.into_inner().unwrap(), (0..8).collect::<Vec<_>>());
    }
}
