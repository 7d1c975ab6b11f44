//! Bounded worker pool used by heif-oxide to decode grid tiles in parallel.
//!
//! The pool is a thin wrapper over an optional Rayon thread pool. Without the `rayon` feature,
//! or when constructed with [`DecodePool::inline`], all work runs inline on the caller's
//! thread; the grid decoder does not need to care which variant it received.

#[derive(Debug, Clone)]
pub struct DecodePool(PoolImpl);

#[derive(Debug, Clone)]
enum PoolImpl {
    #[cfg(feature = "rayon")]
    Rayon(std::sync::Arc<rayon_core::ThreadPool>),
    Inline,
}

impl DecodePool {
    /// A pool that runs everything inline on the calling thread.
    pub const fn inline() -> Self {
        Self(PoolImpl::Inline)
    }

    /// A pool bounded to at most `max_threads` workers. `0` means inline execution.
    ///
    /// Falls back to inline execution when the pool cannot be constructed.
    pub fn with_max_threads(max_threads: usize) -> Self {
        if max_threads == 0 {
            return Self::inline();
        }

        #[cfg(feature = "rayon")]
        {
            let num_threads = std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(1)
                .min(max_threads);
            match rayon_core::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build()
            {
                Ok(pool) => {
                    tracing::debug!(num_threads, "Initialized tile decoding pool");
                    Self(PoolImpl::Rayon(std::sync::Arc::new(pool)))
                }
                Err(e) => {
                    tracing::warn!(%e, "Failed to initialize thread pool; decoding tiles inline");
                    Self::inline()
                }
            }
        }

        #[cfg(not(feature = "rayon"))]
        {
            tracing::debug!("Not built with multithread support; decoding tiles inline");
            Self::inline()
        }
    }

    #[cfg(feature = "rayon")]
    pub fn rayon(pool: std::sync::Arc<rayon_core::ThreadPool>) -> Self {
        Self(PoolImpl::Rayon(pool))
    }

    pub fn is_multithreaded(&self) -> bool {
        match self.0 {
            #[cfg(feature = "rayon")]
            PoolImpl::Rayon(_) => true,
            PoolImpl::Inline => false,
        }
    }

    /// Runs the closures of `jobs` to completion, possibly in parallel.
    ///
    /// Results are returned in submission order. Jobs must handle their own synchronization on
    /// shared state.
    pub fn scope_run<T: Send>(
        &self,
        jobs: Vec<Box<dyn FnOnce() -> T + Send + '_>>,
    ) -> Vec<T> {
        match &self.0 {
            #[cfg(feature = "rayon")]
            PoolImpl::Rayon(pool) => {
                let mut results: Vec<Option<T>> = jobs.iter().map(|_| None).collect();
                pool.scope(|scope| {
                    for (slot, job) in results.iter_mut().zip(jobs) {
                        scope.spawn(move |_| {
                            *slot = Some(job());
                        });
                    }
                });
                results
                    .into_iter()
                    .map(|r| r.expect("worker terminated without a result"))
                    .collect()
            }
            PoolImpl::Inline => jobs.into_iter().map(|job| job()).collect(),
        }
    }
}

impl Default for DecodePool {
    fn default() -> Self {
        Self::inline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_pool_runs_in_order() {
        let pool = DecodePool::inline();
        assert!(!pool.is_multithreaded());
        let jobs: Vec<Box<dyn FnOnce() -> usize + Send>> = (0..4usize)
            .map(|i| Box::new(move || i * 2) as Box<dyn FnOnce() -> usize + Send>)
            .collect();
        assert_eq!(pool.scope_run(jobs), vec![0, 2, 4, 6]);
    }

    #[test]
    fn zero_threads_means_inline() {
        let pool = DecodePool::with_max_threads(0);
        assert!(!pool.is_multithreaded());
    }
}
