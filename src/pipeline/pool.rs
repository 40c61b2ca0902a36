//! Bounded worker pool for per-chunk counting.
//!
//! Chunks are independent, so assembly and pair counting run concurrently,
//! but never more than `max_workers` at once. Each worker holds a permit for
//! the whole time its blocking chunk task runs.
//!
//! ```ignore
//! let pool = ChunkWorkerPool::new(4);
//! let permit = pool.acquire().await;
//! // count one chunk while holding the permit...
//! drop(permit);
//! ```

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Semaphore-backed limit on concurrently processed chunks.
#[derive(Clone)]
pub struct ChunkWorkerPool {
    sem: Arc<Semaphore>,
}

impl ChunkWorkerPool {
    /// Creates a pool allowing `max_workers` concurrent chunk tasks.
    ///
    /// # Panics
    ///
    /// Panics if `max_workers` is 0. `PipelineConfig::validate` rejects that
    /// value before a pool is built.
    pub fn new(max_workers: usize) -> Self {
        assert!(max_workers > 0, "max_workers must be greater than 0");

        Self {
            sem: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Waits for a free worker slot. The slot is released when the permit drops.
    pub async fn acquire(&self) -> ChunkPermit {
        // The semaphore is never closed, so acquire_owned cannot fail
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .expect("worker pool semaphore closed");

        ChunkPermit { _permit: permit }
    }
}

/// A held worker slot.
pub struct ChunkPermit {
    _permit: OwnedSemaphorePermit,
}
