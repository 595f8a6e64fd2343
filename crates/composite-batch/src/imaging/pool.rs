//! Bounded pool for CPU-bound image work

use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Runs decode/resize/encode jobs on blocking threads, at most `size` at a time
///
/// Independent of the remote worker width: fitting a foreground never holds
/// a remote call slot.
#[derive(Clone)]
pub struct ResizePool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl ResizePool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        tracing::info!("Resize pool configured: {} workers", size);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run a blocking job once a pool slot is free
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Error::internal("resize pool closed"))?;

        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| Error::internal(format!("resize task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let pool = ResizePool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..8).map(|_| {
            let active = active.clone();
            let peak = peak.clone();
            let pool = pool.clone();
            async move {
                pool.run(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }
        });

        let results = futures::future::join_all(jobs).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_job_errors_propagate() {
        let pool = ResizePool::new(1);
        let result: Result<()> = pool.run(|| Err(Error::validation("bad input"))).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(ResizePool::new(0).size(), 1);
    }
}
