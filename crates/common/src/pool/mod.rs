//! Connection-pool manager
//!
//! Each adapter checks out work permits from an `AdaptivePool`. A manager
//! task samples utilization every resize interval and grows or shrinks the
//! permit count between the configured bounds. Resizes are applied serially
//! per pool; checkout/return stays lock-free on the fast path.

use crate::config::{PoolConfig, PoolLimits};
use crate::metrics;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

const WAIT_SAMPLE_CAP: usize = 256;

/// Utilization snapshot of one pool
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub size: usize,
    pub in_use: usize,
    pub wait_ms_p95: u64,
}

/// A checked-out permit; returns to the pool on drop
pub struct PoolPermit {
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Semaphore-bounded adapter pool with live resizing
pub struct AdaptivePool {
    name: String,
    semaphore: Arc<Semaphore>,
    size: AtomicUsize,
    in_use: Arc<AtomicUsize>,
    waits: Mutex<VecDeque<u64>>,
}

impl AdaptivePool {
    pub fn new(name: impl Into<String>, initial_size: usize) -> Self {
        let initial_size = initial_size.max(1);
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(initial_size)),
            size: AtomicUsize::new(initial_size),
            in_use: Arc::new(AtomicUsize::new(0)),
            waits: Mutex::new(VecDeque::with_capacity(WAIT_SAMPLE_CAP)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire a permit, recording the wait time
    pub async fn checkout(&self) -> PoolPermit {
        let start = Instant::now();
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .expect("pool semaphore closed");
        let waited = start.elapsed().as_millis() as u64;

        {
            let mut waits = self.waits.lock().expect("pool wait samples poisoned");
            if waits.len() == WAIT_SAMPLE_CAP {
                waits.pop_front();
            }
            waits.push_back(waited);
        }

        self.in_use.fetch_add(1, Ordering::Relaxed);
        PoolPermit {
            _permit: permit,
            in_use: Arc::clone(&self.in_use),
        }
    }

    /// Current utilization snapshot
    pub fn stats(&self) -> PoolStats {
        let wait_ms_p95 = {
            let waits = self.waits.lock().expect("pool wait samples poisoned");
            if waits.is_empty() {
                0
            } else {
                let mut sorted: Vec<u64> = waits.iter().copied().collect();
                sorted.sort_unstable();
                let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
                sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
            }
        };
        PoolStats {
            size: self.size.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
            wait_ms_p95,
        }
    }

    /// Apply a new size; shrinking only reclaims currently idle permits
    fn resize(&self, new_size: usize) {
        let current = self.size.load(Ordering::Relaxed);
        if new_size > current {
            self.semaphore.add_permits(new_size - current);
            self.size.store(new_size, Ordering::Relaxed);
        } else if new_size < current {
            let forgotten = self.semaphore.forget_permits(current - new_size);
            self.size.store(current - forgotten, Ordering::Relaxed);
        }
    }
}

/// Evaluate one resize step for a pool
fn next_size(stats: &PoolStats, limits: &PoolLimits) -> usize {
    let size = stats.size.max(1);
    let utilization = stats.in_use as f64 / size as f64;

    let proposed = if utilization > limits.target_util {
        size + (size as f64 * 0.2).ceil() as usize
    } else if utilization < 0.4 {
        size.saturating_sub((size as f64 * 0.2).ceil() as usize)
    } else {
        size
    };

    proposed.clamp(limits.min.max(1), limits.max.max(1))
}

/// Periodic resize loop over the registered pools
pub struct PoolManager {
    pools: Vec<(Arc<AdaptivePool>, PoolLimits)>,
    interval: Duration,
}

impl PoolManager {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            pools: Vec::new(),
            interval: Duration::from_secs(config.resize_interval_secs.max(1)),
        }
    }

    pub fn register(&mut self, pool: Arc<AdaptivePool>, limits: PoolLimits) {
        self.pools.push((pool, limits));
    }

    /// Run the resize loop until the task is aborted
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                for (pool, limits) in &self.pools {
                    let stats = pool.stats();
                    let target = next_size(&stats, limits);
                    if target != stats.size {
                        info!(
                            pool = pool.name(),
                            from = stats.size,
                            to = target,
                            in_use = stats.in_use,
                            "Resizing pool"
                        );
                        pool.resize(target);
                    } else {
                        debug!(
                            pool = pool.name(),
                            size = stats.size,
                            in_use = stats.in_use,
                            wait_ms_p95 = stats.wait_ms_p95,
                            "Pool steady"
                        );
                    }
                    let after = pool.stats();
                    metrics::record_pool(pool.name(), after.size, after.in_use);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(min: usize, max: usize) -> PoolLimits {
        PoolLimits {
            min,
            max,
            target_util: 0.8,
        }
    }

    #[test]
    fn test_grow_above_target_utilization() {
        let stats = PoolStats {
            size: 10,
            in_use: 9,
            wait_ms_p95: 5,
        };
        assert_eq!(next_size(&stats, &limits(2, 16)), 12);
    }

    #[test]
    fn test_shrink_below_low_watermark() {
        let stats = PoolStats {
            size: 10,
            in_use: 2,
            wait_ms_p95: 0,
        };
        assert_eq!(next_size(&stats, &limits(2, 16)), 8);
    }

    #[test]
    fn test_clamped_to_bounds() {
        let busy = PoolStats {
            size: 16,
            in_use: 16,
            wait_ms_p95: 50,
        };
        assert_eq!(next_size(&busy, &limits(2, 16)), 16);

        let idle = PoolStats {
            size: 2,
            in_use: 0,
            wait_ms_p95: 0,
        };
        assert_eq!(next_size(&idle, &limits(2, 16)), 2);
    }

    #[tokio::test]
    async fn test_checkout_tracks_in_use() {
        let pool = AdaptivePool::new("test", 2);
        let a = pool.checkout().await;
        let b = pool.checkout().await;
        assert_eq!(pool.stats().in_use, 2);
        drop(a);
        drop(b);
        assert_eq!(pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_resize_grow_and_shrink() {
        let pool = AdaptivePool::new("test", 4);
        pool.resize(8);
        assert_eq!(pool.stats().size, 8);
        pool.resize(4);
        assert_eq!(pool.stats().size, 4);
    }
}
