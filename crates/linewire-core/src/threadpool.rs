//! Worker pool that executes dispatched work.
//!
//! Every unit of work scheduled through a [`SerialTaskQueue`] or a
//! [`GroupedTaskQueue`] ends up here. The pool is built on rayon's
//! work-stealing scheduler; ordering is *not* its concern, the queues only
//! hand it work once that work is allowed to start.
//!
//! # Example
//!
//! ```
//! use linewire_core::threadpool::{DispatchConfig, DispatchPool};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let pool = DispatchPool::new(DispatchConfig::with_threads(2)).unwrap();
//! let hits = Arc::new(AtomicUsize::new(0));
//!
//! let hits_clone = hits.clone();
//! pool.execute(move || {
//!     hits_clone.fetch_add(1, Ordering::SeqCst);
//! });
//! ```
//!
//! [`SerialTaskQueue`]: crate::SerialTaskQueue
//! [`GroupedTaskQueue`]: crate::GroupedTaskQueue

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use rayon::{ThreadPool as RayonThreadPool, ThreadPoolBuilder};

use crate::error::{DispatchError, Result};
use crate::logging::{panic_message, targets};

/// Global dispatch pool instance.
static GLOBAL_POOL: OnceLock<Arc<DispatchPool>> = OnceLock::new();

/// Configuration for creating a dispatch pool.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker threads. `None` means use the number of CPU cores.
    pub num_threads: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name: String,
    /// Stack size for worker threads in bytes.
    pub stack_size: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            thread_name: "linewire-dispatch".to_string(),
            stack_size: None,
        }
    }
}

impl DispatchConfig {
    /// Create a new configuration with custom thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
            ..Default::default()
        }
    }

    /// Set the worker thread name prefix.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the worker thread stack size.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }
}

/// The pool that runs dispatched work.
pub struct DispatchPool {
    pool: RayonThreadPool,
    active_tasks: Arc<AtomicUsize>,
}

impl DispatchPool {
    /// Get the global dispatch pool.
    ///
    /// The global pool is lazily initialized with default settings
    /// (number of threads = number of CPU cores).
    pub fn global() -> Arc<DispatchPool> {
        GLOBAL_POOL
            .get_or_init(|| {
                Arc::new(
                    DispatchPool::new(DispatchConfig::default())
                        .expect("Failed to create global dispatch pool"),
                )
            })
            .clone()
    }

    /// Initialize the global dispatch pool with a custom configuration.
    ///
    /// Must be called before anything touches [`DispatchPool::global`].
    pub fn init_global(config: DispatchConfig) -> Result<Arc<DispatchPool>> {
        let pool = Arc::new(DispatchPool::new(config)?);
        GLOBAL_POOL
            .set(pool.clone())
            .map_err(|_| DispatchError::AlreadyInitialized)?;
        Ok(pool)
    }

    /// Create a new dispatch pool with the given configuration.
    pub fn new(config: DispatchConfig) -> Result<Self> {
        let thread_name = config.thread_name.clone();
        let mut builder =
            ThreadPoolBuilder::new().thread_name(move |index| format!("{thread_name}-{index}"));

        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads);
        }

        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let pool = builder
            .build()
            .map_err(|e| DispatchError::PoolCreation(e.to_string()))?;

        tracing::debug!(
            target: targets::POOL,
            threads = pool.current_num_threads(),
            name = %config.thread_name,
            "dispatch pool created"
        );

        Ok(Self {
            pool,
            active_tasks: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Get the number of threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Get the number of work items currently executing or waiting for a thread.
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Run `task` on a pool thread and return immediately.
    ///
    /// A panic inside `task` is caught and logged; it never takes a worker
    /// thread (or the process) down with it.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
        let active_tasks = self.active_tasks.clone();

        self.pool.spawn(move || {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                tracing::error!(
                    target: targets::POOL,
                    panic = %panic_message(payload.as_ref()),
                    "dispatched task panicked"
                );
            }
            active_tasks.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("num_threads", &self.num_threads())
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}
