//! Core dispatch engine for linewire.
//!
//! This crate provides the ordered event-dispatch machinery the networking
//! layer builds on:
//!
//! - **Dispatch pool**: a rayon-backed worker pool that runs all queued work
//! - **Serial task queue**: a FIFO lane with serial and parallel work items
//! - **Grouped task queue**: independent ordering domains, created on first
//!   use and removed once drained
//! - **Signals**: observer lists whose emissions are routed through a group
//!
//! # Ordering Guarantees
//!
//! Within one group, a serial item completes before anything enqueued after
//! it starts. Parallel items may overlap with whatever follows them. Across
//! groups nothing is promised, so a busy group never delays another.
//!
//! # Example
//!
//! ```
//! use linewire_core::{GroupId, GroupedTaskQueue, Route, Signal, TaskMode};
//! use std::time::Duration;
//!
//! let queue = GroupedTaskQueue::new();
//!
//! let data_received = Signal::<String>::new(Route::default_group(queue.clone()));
//! let state_changed = Signal::<bool>::new(Route::new(
//!     queue.clone(),
//!     GroupId::named("connection-state"),
//!     TaskMode::Serial,
//! ));
//!
//! data_received.connect(|text| println!("received {text:?}"));
//! state_changed.connect(|connected| println!("connected: {connected}"));
//!
//! state_changed.emit(true);
//! data_received.emit("hello\n".to_string());
//!
//! assert!(queue.wait_idle(Duration::from_secs(1)));
//! ```

mod error;
mod grouped;
pub mod logging;
pub mod signal;
mod task_queue;
pub mod threadpool;

pub use error::{DispatchError, Result};
pub use grouped::{GroupId, GroupedTaskQueue};
pub use signal::{ConnectionId, Route, Signal};
pub use task_queue::{SerialTaskQueue, TaskMode};
pub use threadpool::{DispatchConfig, DispatchPool};
