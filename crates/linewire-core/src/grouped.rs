//! Registry of independent ordering domains.
//!
//! A [`GroupedTaskQueue`] owns one [`SerialTaskQueue`] per [`GroupId`].
//! Work in one group is ordered exactly as a single serial queue orders it;
//! work in different groups runs independently, so a slow "connection
//! state" observer never holds up "data received" delivery.
//!
//! Groups are created lazily on the first enqueue and removed as soon as
//! their queue drains (nothing queued, nothing running). The registry
//! therefore only ever holds groups with work in flight, and callers get an
//! unbounded namespace of groups without any explicit teardown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{DispatchError, Result};
use crate::logging::targets;
use crate::task_queue::{SerialTaskQueue, TaskMode};
use crate::threadpool::DispatchPool;

/// Counter for anonymous group identifiers.
static NEXT_ANONYMOUS_GROUP: AtomicU64 = AtomicU64::new(1);

/// Identifier of an ordering domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupId {
    /// A process-unique group with no name, typically an instance default.
    Anonymous(u64),
    /// A group addressed by name.
    Named(Arc<str>),
}

impl GroupId {
    /// A group addressed by `name`.
    pub fn named(name: impl AsRef<str>) -> Self {
        Self::Named(Arc::from(name.as_ref()))
    }

    /// A fresh group that no other caller can name.
    pub fn anonymous() -> Self {
        Self::Anonymous(NEXT_ANONYMOUS_GROUP.fetch_add(1, Ordering::Relaxed))
    }

    /// The group name, if it has one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Anonymous(_) => None,
        }
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous(id) => write!(f, "anonymous-{id}"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for GroupId {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for GroupId {
    fn from(name: String) -> Self {
        Self::Named(Arc::from(name))
    }
}

struct GroupedInner {
    registry: Mutex<HashMap<GroupId, SerialTaskQueue>>,
    drained: Condvar,
    pool: Arc<DispatchPool>,
    default_group: GroupId,
}

/// A dynamic set of [`SerialTaskQueue`]s keyed by [`GroupId`].
///
/// Cloning yields another handle to the same registry.
///
/// # Example
///
/// ```
/// use linewire_core::{GroupId, GroupedTaskQueue, TaskMode};
/// use std::time::Duration;
///
/// let queue = GroupedTaskQueue::new();
/// let state = GroupId::named("connection-state");
///
/// queue.enqueue_to(&state, TaskMode::Serial, || println!("connected"));
/// queue.enqueue(TaskMode::Serial, || println!("data on the default group"));
///
/// assert!(queue.wait_idle(Duration::from_secs(1)));
/// assert_eq!(queue.group_count(), 0);
/// ```
#[derive(Clone)]
pub struct GroupedTaskQueue {
    inner: Arc<GroupedInner>,
}

impl Default for GroupedTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupedTaskQueue {
    /// Create a grouped queue on the global [`DispatchPool`].
    pub fn new() -> Self {
        Self::with_pool(DispatchPool::global())
    }

    /// Create a grouped queue that runs its work on `pool`.
    pub fn with_pool(pool: Arc<DispatchPool>) -> Self {
        Self {
            inner: Arc::new(GroupedInner {
                registry: Mutex::new(HashMap::new()),
                drained: Condvar::new(),
                pool,
                default_group: GroupId::anonymous(),
            }),
        }
    }

    /// The anonymous group used by [`enqueue`](Self::enqueue).
    pub fn default_group(&self) -> &GroupId {
        &self.inner.default_group
    }

    /// The pool this queue runs its work on.
    pub fn pool(&self) -> &Arc<DispatchPool> {
        &self.inner.pool
    }

    /// Enqueue `work` on this instance's default group.
    pub fn enqueue<F>(&self, mode: TaskMode, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let group = self.inner.default_group.clone();
        self.enqueue_to(&group, mode, work);
    }

    /// Enqueue `work` on `group`, creating the group if it does not exist.
    pub fn enqueue_to<F>(&self, group: &GroupId, mode: TaskMode, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut registry = self.inner.registry.lock();
        let queue = registry.entry(group.clone()).or_insert_with(|| {
            tracing::trace!(target: targets::QUEUE, %group, "group created");
            SerialTaskQueue::with_idle_hook(
                self.inner.pool.clone(),
                idle_hook(Arc::downgrade(&self.inner), group.clone()),
            )
        });
        // Still under the registry lock: the idle hook cannot remove the
        // group between lookup and enqueue.
        queue.enqueue(mode, work);
    }

    /// Number of groups that currently have queued or running work.
    pub fn group_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    /// Whether `group` currently has queued or running work.
    pub fn contains_group(&self, group: &GroupId) -> bool {
        self.inner.registry.lock().contains_key(group)
    }

    /// Queued plus running items of `group` (zero for absent groups).
    pub fn pending_count(&self, group: &GroupId) -> usize {
        self.inner
            .registry
            .lock()
            .get(group)
            .map_or(0, SerialTaskQueue::pending_count)
    }

    /// Block until everything enqueued on `group` before this call has
    /// completed.
    pub fn barrier(&self, group: &GroupId, timeout: Duration) -> Result<()> {
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        // The no-op closes the current drain pass; the marker therefore runs
        // in a later pass, after every earlier item (parallel ones included)
        // has finished.
        self.enqueue_to(group, TaskMode::Serial, || {});
        self.enqueue_to(group, TaskMode::Serial, move || {
            let _ = done_tx.send(());
        });

        done_rx.recv_timeout(timeout).map_err(|err| match err {
            crossbeam_channel::RecvTimeoutError::Timeout => DispatchError::Timeout(timeout),
            crossbeam_channel::RecvTimeoutError::Disconnected => DispatchError::Disconnected,
        })
    }

    /// Block until no group has queued or running work.
    ///
    /// Returns `false` if work was still pending when `timeout` elapsed.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut registry = self.inner.registry.lock();
        while !registry.is_empty() {
            if self
                .inner
                .drained
                .wait_until(&mut registry, deadline)
                .timed_out()
            {
                return registry.is_empty();
            }
        }
        true
    }
}

impl std::fmt::Debug for GroupedTaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedTaskQueue")
            .field("default_group", &self.inner.default_group)
            .field("groups", &self.group_count())
            .finish()
    }
}

/// Removes `group` from the registry once its queue drains.
fn idle_hook(
    inner: Weak<GroupedInner>,
    group: GroupId,
) -> Box<dyn Fn(&SerialTaskQueue) + Send + Sync + 'static> {
    Box::new(move |queue| {
        let Some(inner) = inner.upgrade() else {
            return;
        };

        let mut registry = inner.registry.lock();
        // Work may have been enqueued between the completion and this
        // check; only a still-idle queue is removed.
        let removable = registry
            .get(&group)
            .is_some_and(|current| current.same_queue(queue) && current.is_idle());

        if removable {
            registry.remove(&group);
            tracing::trace!(target: targets::QUEUE, %group, "group drained");
            if registry.is_empty() {
                inner.drained.notify_all();
            }
        }
    })
}
