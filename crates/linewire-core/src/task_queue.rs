//! Single-lane FIFO scheduler with serial and parallel work.
//!
//! A [`SerialTaskQueue`] hands work to the [`DispatchPool`] in the order it
//! was enqueued. Each unit of work carries a [`TaskMode`]:
//!
//! - [`TaskMode::Serial`] work must complete before anything enqueued after
//!   it starts.
//! - [`TaskMode::Parallel`] work is started and the queue moves straight on
//!   to the next item.
//!
//! # Drain pass
//!
//! The queue runs a drain pass whenever nothing is executing: it starts every
//! leading parallel item, then at most one serial item, and stops. The pass
//! runs again when the running count falls back to zero, either from
//! [`enqueue`](SerialTaskQueue::enqueue) or from the completion of the last
//! running item. The running-count guard is what keeps two serial items from
//! ever overlapping.
//!
//! ```text
//! queue:  P1 P2 S3 S4 P5
//! pass 1: start P1, P2, S3          (P1, P2 may overlap S3)
//! pass 2: start S4                  (after P1, P2, S3 finished)
//! pass 3: start P5                  (after S4 finished)
//! ```

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::logging::{panic_message, targets};
use crate::threadpool::DispatchPool;

/// How a unit of work is ordered against the work queued after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskMode {
    /// Must finish before the next queued item starts.
    #[default]
    Serial,
    /// May overlap with the items queued after it.
    Parallel,
}

impl TaskMode {
    /// Build a mode from the boolean "parallel" flag.
    pub fn from_parallel(parallel: bool) -> Self {
        if parallel { Self::Parallel } else { Self::Serial }
    }

    /// Whether this is [`TaskMode::Parallel`].
    pub fn is_parallel(self) -> bool {
        self == Self::Parallel
    }
}

/// A boxed unit of work.
pub(crate) type BoxedWork = Box<dyn FnOnce() + Send + 'static>;

/// Called after a completion leaves the queue with nothing queued or running.
pub(crate) type IdleHook = Box<dyn Fn(&SerialTaskQueue) + Send + Sync + 'static>;

struct QueuedTask {
    mode: TaskMode,
    work: BoxedWork,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<QueuedTask>,
    running: usize,
}

struct QueueInner {
    state: Mutex<QueueState>,
    pool: Arc<DispatchPool>,
    on_idle: Option<IdleHook>,
}

/// A FIFO scheduler for one ordering domain.
///
/// Cloning a `SerialTaskQueue` yields another handle to the same queue.
///
/// # Example
///
/// ```
/// use linewire_core::{SerialTaskQueue, TaskMode};
///
/// let queue = SerialTaskQueue::new();
/// queue.enqueue(TaskMode::Serial, || println!("first"));
/// queue.enqueue(TaskMode::Serial, || println!("second, never before first"));
/// ```
#[derive(Clone)]
pub struct SerialTaskQueue {
    inner: Arc<QueueInner>,
}

impl Default for SerialTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTaskQueue {
    /// Create a queue that runs its work on the global [`DispatchPool`].
    pub fn new() -> Self {
        Self::with_pool(DispatchPool::global())
    }

    /// Create a queue that runs its work on `pool`.
    pub fn with_pool(pool: Arc<DispatchPool>) -> Self {
        Self::build(pool, None)
    }

    pub(crate) fn with_idle_hook(pool: Arc<DispatchPool>, on_idle: IdleHook) -> Self {
        Self::build(pool, Some(on_idle))
    }

    fn build(pool: Arc<DispatchPool>, on_idle: Option<IdleHook>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                pool,
                on_idle,
            }),
        }
    }

    /// Append `work` to the tail of the queue.
    ///
    /// Never blocks on the work itself: it runs on the dispatch pool once
    /// every serial item ahead of it has completed.
    pub fn enqueue<F>(&self, mode: TaskMode, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        state.tasks.push_back(QueuedTask {
            mode,
            work: Box::new(work),
        });
        drain_locked(&self.inner, &mut state);
    }

    /// Number of items queued plus items currently running.
    pub fn pending_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.tasks.len() + state.running
    }

    /// Number of items waiting for their turn.
    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    /// Number of items currently executing.
    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running
    }

    /// `true` when nothing is queued and nothing is running.
    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    /// Whether two handles refer to the same queue.
    pub fn same_queue(&self, other: &SerialTaskQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for SerialTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SerialTaskQueue")
            .field("queued", &state.tasks.len())
            .field("running", &state.running)
            .finish()
    }
}

/// One drain pass. Caller holds the state lock.
fn drain_locked(inner: &Arc<QueueInner>, state: &mut QueueState) {
    if state.running != 0 {
        return;
    }

    while state
        .tasks
        .front()
        .is_some_and(|task| task.mode.is_parallel())
    {
        if let Some(task) = state.tasks.pop_front() {
            dispatch(inner, state, task);
        }
    }

    if let Some(task) = state.tasks.pop_front() {
        dispatch(inner, state, task);
    }

    tracing::trace!(
        target: targets::QUEUE,
        running = state.running,
        queued = state.tasks.len(),
        "drain pass"
    );
}

fn dispatch(inner: &Arc<QueueInner>, state: &mut QueueState, task: QueuedTask) {
    state.running += 1;
    let queue = inner.clone();
    let QueuedTask { mode, work } = task;

    inner.pool.execute(move || {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(work)) {
            tracing::error!(
                target: targets::QUEUE,
                ?mode,
                panic = %panic_message(payload.as_ref()),
                "queued task panicked"
            );
        }
        complete(&queue);
    });
}

fn complete(inner: &Arc<QueueInner>) {
    let idle = {
        let mut state = inner.state.lock();
        state.running -= 1;
        if state.running == 0 {
            drain_locked(inner, &mut state);
        }
        state.running == 0 && state.tasks.is_empty()
    };

    if idle && let Some(on_idle) = &inner.on_idle {
        on_idle(&SerialTaskQueue {
            inner: inner.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threadpool::DispatchConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn pool(threads: usize) -> Arc<DispatchPool> {
        Arc::new(DispatchPool::new(DispatchConfig::with_threads(threads)).unwrap())
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_serial_items_never_overlap() {
        let queue = SerialTaskQueue::with_pool(pool(4));
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let log = log.clone();
            queue.enqueue(TaskMode::Serial, move || {
                log.lock().push(("start", i));
                std::thread::sleep(Duration::from_millis(1));
                log.lock().push(("end", i));
            });
        }

        assert!(wait_until(Duration::from_secs(5), || queue.is_idle()));

        let log = log.lock();
        assert_eq!(log.len(), 40);
        for (i, pair) in log.chunks(2).enumerate() {
            assert_eq!(pair[0], ("start", i));
            assert_eq!(pair[1], ("end", i));
        }
    }

    #[test]
    fn test_parallel_run_starts_together() {
        let queue = SerialTaskQueue::with_pool(pool(4));
        let started = Arc::new(AtomicUsize::new(0));
        let saw_all = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let started = started.clone();
            let saw_all = saw_all.clone();
            queue.enqueue(TaskMode::Parallel, move || {
                started.fetch_add(1, Ordering::SeqCst);
                let deadline = Instant::now() + Duration::from_secs(2);
                while started.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
                    std::thread::yield_now();
                }
                if started.load(Ordering::SeqCst) == 4 {
                    saw_all.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        assert!(wait_until(Duration::from_secs(5), || queue.is_idle()));
        assert_eq!(saw_all.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_serial_after_parallel_waits_for_next_pass() {
        let queue = SerialTaskQueue::with_pool(pool(4));
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        queue.enqueue(TaskMode::Parallel, move || {
            std::thread::sleep(Duration::from_millis(20));
            l.lock().push("parallel");
        });
        let l = log.clone();
        queue.enqueue(TaskMode::Serial, move || {
            std::thread::sleep(Duration::from_millis(40));
            l.lock().push("serial-1");
        });
        let l = log.clone();
        queue.enqueue(TaskMode::Serial, move || l.lock().push("serial-2"));

        assert!(wait_until(Duration::from_secs(5), || queue.is_idle()));

        // The second serial item waits for the whole first pass.
        let log = log.lock();
        assert_eq!(log.last(), Some(&"serial-2"));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_pending_count_tracks_queued_and_running() {
        let queue = SerialTaskQueue::with_pool(pool(2));
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);

        queue.enqueue(TaskMode::Serial, move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(2));
        });
        queue.enqueue(TaskMode::Serial, || {});
        queue.enqueue(TaskMode::Serial, || {});

        assert_eq!(queue.pending_count(), 3);
        assert!(wait_until(Duration::from_secs(1), || queue.running_count() == 1));
        assert_eq!(queue.queued_count(), 2);

        release_tx.send(()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || queue.pending_count() == 0));
    }

    #[test]
    fn test_panic_does_not_stall_queue() {
        let queue = SerialTaskQueue::with_pool(pool(1));
        let ran = Arc::new(AtomicUsize::new(0));

        queue.enqueue(TaskMode::Serial, || panic!("observer failure"));
        let ran_clone = ran.clone();
        queue.enqueue(TaskMode::Serial, move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(wait_until(Duration::from_secs(2), || ran.load(Ordering::SeqCst) == 1));
        assert!(wait_until(Duration::from_secs(1), || queue.is_idle()));
    }

    #[test]
    fn test_idle_hook_fires_once_drained() {
        let idle_calls = Arc::new(AtomicUsize::new(0));
        let idle_clone = idle_calls.clone();
        let queue = SerialTaskQueue::with_idle_hook(
            pool(2),
            Box::new(move |q| {
                assert!(q.is_idle());
                idle_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        queue.enqueue(TaskMode::Serial, || std::thread::sleep(Duration::from_millis(5)));
        assert!(wait_until(Duration::from_secs(2), || idle_calls
            .load(Ordering::SeqCst)
            >= 1));
    }

    #[test]
    fn test_task_mode_flag() {
        assert_eq!(TaskMode::from_parallel(true), TaskMode::Parallel);
        assert_eq!(TaskMode::from_parallel(false), TaskMode::Serial);
        assert!(TaskMode::Parallel.is_parallel());
        assert_eq!(TaskMode::default(), TaskMode::Serial);
    }
}
