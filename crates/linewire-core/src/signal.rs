//! Observer lists delivered through the ordered dispatcher.
//!
//! A [`Signal<Args>`] is the set of callbacks (slots) registered for one
//! event category. Emitting a signal never calls a slot inline: the emission
//! becomes one unit of work on the signal's [`Route`], a group of a
//! [`GroupedTaskQueue`]. Two emissions on the same route are delivered in
//! emit order; emissions on different groups are independent.
//!
//! # Example
//!
//! ```
//! use linewire_core::{GroupId, GroupedTaskQueue, Route, Signal, TaskMode};
//! use std::time::Duration;
//!
//! let queue = GroupedTaskQueue::new();
//! let state_changed = Signal::<bool>::new(Route::new(
//!     queue.clone(),
//!     GroupId::named("connection-state"),
//!     TaskMode::Serial,
//! ));
//!
//! state_changed.connect(|connected| println!("connected: {connected}"));
//! state_changed.emit(true);
//!
//! queue.wait_idle(Duration::from_secs(1));
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::grouped::{GroupId, GroupedTaskQueue};
use crate::logging::{panic_message, targets};
use crate::task_queue::TaskMode;

new_key_type! {
    /// Handle to one observer registered on a [`Signal`]; pass it to
    /// [`Signal::disconnect`] to remove that observer.
    pub struct ConnectionId;
}

/// Where and how a signal's emissions are scheduled.
#[derive(Clone, Debug)]
pub struct Route {
    queue: GroupedTaskQueue,
    group: GroupId,
    mode: TaskMode,
}

impl Route {
    /// Deliver on `group` of `queue` with the given ordering mode.
    pub fn new(queue: GroupedTaskQueue, group: GroupId, mode: TaskMode) -> Self {
        Self { queue, group, mode }
    }

    /// Deliver serially on the queue's default group.
    pub fn default_group(queue: GroupedTaskQueue) -> Self {
        let group = queue.default_group().clone();
        Self::new(queue, group, TaskMode::Serial)
    }

    /// The queue emissions are scheduled on.
    pub fn queue(&self) -> &GroupedTaskQueue {
        &self.queue
    }

    /// The group emissions are scheduled on.
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// The ordering mode of each emission.
    pub fn mode(&self) -> TaskMode {
        self.mode
    }
}

type Slot<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

/// A type-safe observer list whose emissions go through the dispatcher.
///
/// # Type Parameter
///
/// - `Args`: The argument passed to connected slots. Use `()` for signals
///   with no arguments, or a tuple for several.
pub struct Signal<Args> {
    connections: Mutex<SlotMap<ConnectionId, Slot<Args>>>,
    blocked: AtomicBool,
    route: Route,
}

impl<Args: Send + 'static> Signal<Args> {
    /// Create a signal with no connections, delivering on `route`.
    pub fn new(route: Route) -> Self {
        Self {
            connections: Mutex::new(SlotMap::with_key()),
            blocked: AtomicBool::new(false),
            route,
        }
    }

    /// Register an observer. It sees every emission made after this call.
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.connections.lock().insert(Arc::new(slot))
    }

    /// Remove the observer registered as `id`.
    ///
    /// Returns `true` if the connection was found and removed. Emissions
    /// already scheduled still reach the slot.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(id).is_some()
    }

    /// Remove every observer.
    pub fn disconnect_all(&self) {
        self.connections.lock().clear();
    }

    /// Number of registered observers.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// While blocked, `emit` schedules nothing.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// The route this signal delivers on.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Schedule delivery of `args` to every slot connected right now.
    ///
    /// The slots are snapshotted at emit time. Returns the number of slots
    /// the emission was scheduled for; nothing is scheduled when the signal
    /// is blocked or has no connections.
    #[tracing::instrument(skip_all, target = "linewire_core::signal", level = "trace")]
    pub fn emit(&self, args: Args) -> usize {
        if self.is_blocked() {
            tracing::trace!(target: targets::SIGNAL, "signal blocked, skipping emit");
            return 0;
        }

        let slots: Vec<Slot<Args>> = self.connections.lock().values().cloned().collect();
        if slots.is_empty() {
            return 0;
        }

        let count = slots.len();
        tracing::trace!(
            target: targets::SIGNAL,
            connection_count = count,
            group = %self.route.group,
            "emitting signal"
        );

        self.route
            .queue
            .enqueue_to(&self.route.group, self.route.mode, move || {
                for slot in &slots {
                    // One failing observer must not starve the others.
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| slot(&args))) {
                        tracing::error!(
                            target: targets::SIGNAL,
                            panic = %panic_message(payload.as_ref()),
                            "slot panicked"
                        );
                    }
                }
            });

        count
    }
}

impl<Args> std::fmt::Debug for Signal<Args> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("connections", &self.connections.lock().len())
            .field("blocked", &self.blocked.load(Ordering::SeqCst))
            .field("group", &self.route.group)
            .finish()
    }
}
