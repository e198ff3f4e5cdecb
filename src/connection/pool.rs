//! Dedicated worker pool per broker connection.
//!
//! Each pool is its own multi-threaded tokio runtime with a fixed number of
//! named worker threads. Delivery handlers of the connection run here, so a
//! slow capability on one queue cannot starve I/O for another.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::{Result, RpcError};

/// A bounded pool of worker threads.
pub struct WorkerPool {
    name: String,
    size: usize,
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
}

impl WorkerPool {
    /// Start a pool with `size` worker threads named `{name}-{n}`.
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        let name = name.into();
        let size = size.max(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let thread_prefix = name.clone();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(size)
            .max_blocking_threads(size)
            .thread_name_fn(move || {
                let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                format!("{}-{}", thread_prefix, n)
            })
            .enable_all()
            .build()
            .map_err(|e| RpcError::Transport(format!("failed to start worker pool {name}: {e}")))?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            name,
            size,
        })
    }

    /// Pool name (thread name prefix).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runtime handle for spawning onto the pool.
    #[inline]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawn a task on the pool.
    ///
    /// Tasks spawned after [`shutdown`](Self::shutdown) are dropped without
    /// running.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Whether the pool has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Stop the pool. Running tasks are cancelled at their next await.
    ///
    /// Safe to call from async context and more than once.
    pub fn shutdown(&self) {
        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(runtime) = runtime {
            tracing::debug!("Shutting down worker pool {}", self.name);
            runtime.shutdown_background();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_runs_on_named_threads() {
        let pool = WorkerPool::new("billing", 2).unwrap();
        let name = futures::executor::block_on(pool.spawn(async {
            std::thread::current().name().map(str::to_string)
        }))
        .unwrap();
        assert!(name.unwrap().starts_with("billing-"));
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let pool = WorkerPool::new("tiny", 0).unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_from_async_context() {
        let pool = WorkerPool::new("async-drop", 1).unwrap();
        assert!(!pool.is_shut_down());
        pool.shutdown();
        pool.shutdown();
        assert!(pool.is_shut_down());
        drop(pool);
    }
}
