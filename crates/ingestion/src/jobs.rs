//! Job tracking
//!
//! Persists per-item status for batch enrichment requests. Rows live in
//! the SQL store when it is enabled; otherwise they fall back to the cache
//! with a 24h TTL, and responses flag the job as ephemeral. The invariant
//! `pending + processing + completed + failed == total` holds at every
//! observation.

use chrono::{DateTime, Utc};
use matforge_common::cache::{keys, Cache};
use matforge_common::db::SqlBackend;
use matforge_common::errors::{AppError, Result};
use matforge_common::model::{ItemStatus, JobCounts, JobItem};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Cache representation of a whole job
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedJob {
    created_at: DateTime<Utc>,
    total: usize,
    items: Vec<JobItem>,
}

/// Exponential moving average of per-item processing throughput
pub struct ThroughputEstimator {
    /// Seconds per item
    ema_secs: std::sync::Mutex<f64>,
}

impl ThroughputEstimator {
    /// Assume one second per item until real samples arrive
    pub fn new() -> Self {
        Self {
            ema_secs: std::sync::Mutex::new(1.0),
        }
    }

    pub fn record(&self, item_duration: Duration) {
        const ALPHA: f64 = 0.2;
        let mut ema = self.ema_secs.lock().expect("throughput ema");
        *ema = ALPHA * item_duration.as_secs_f64() + (1.0 - ALPHA) * *ema;
    }

    /// Estimated completion for `remaining` items over `workers` workers
    pub fn estimate(&self, remaining: usize, workers: usize) -> DateTime<Utc> {
        let per_item = *self.ema_secs.lock().expect("throughput ema");
        let secs = per_item * remaining as f64 / workers.max(1) as f64;
        Utc::now() + chrono::Duration::milliseconds((secs * 1000.0) as i64)
    }
}

impl Default for ThroughputEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// Durable (SQL) or ephemeral (cache) job store
pub struct JobTracker {
    sql: Option<Arc<dyn SqlBackend>>,
    cache: Cache,
    job_ttl: Duration,
    /// Serializes cache-fallback updates per request id
    update_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JobTracker {
    pub fn new(sql: Option<Arc<dyn SqlBackend>>, cache: Cache, job_ttl: Duration) -> Self {
        Self {
            sql,
            cache,
            job_ttl,
            update_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether job state survives a process restart
    pub fn is_durable(&self) -> bool {
        self.sql.is_some()
    }

    async fn request_lock(&self, request_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.update_locks.lock().await;
        Arc::clone(
            locks
                .entry(request_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Persist a fresh job with every item pending
    pub async fn create(&self, request_id: &str, items: Vec<JobItem>) -> Result<()> {
        match &self.sql {
            Some(sql) => sql.create_job(request_id, &items).await,
            None => {
                let job = CachedJob {
                    created_at: Utc::now(),
                    total: items.len(),
                    items,
                };
                self.cache
                    .set(&keys::job(request_id), &job, self.job_ttl)
                    .await
            }
        }
    }

    /// Update one item's state
    pub async fn update_item(&self, request_id: &str, item: JobItem) -> Result<()> {
        match &self.sql {
            Some(sql) => sql.update_job_item(request_id, &item).await,
            None => {
                let lock = self.request_lock(request_id).await;
                let _guard = lock.lock().await;

                let key = keys::job(request_id);
                let mut job: CachedJob =
                    self.cache
                        .get(&key)
                        .await?
                        .ok_or_else(|| AppError::JobNotFound {
                            request_id: request_id.to_string(),
                        })?;
                match job
                    .items
                    .iter_mut()
                    .find(|existing| existing.material_id == item.material_id)
                {
                    Some(existing) => *existing = item,
                    None => {
                        return Err(AppError::JobNotFound {
                            request_id: request_id.to_string(),
                        })
                    }
                }
                self.cache.set(&key, &job, self.job_ttl).await
            }
        }
    }

    /// Aggregate counts; `None` for unknown request ids
    pub async fn counts(&self, request_id: &str) -> Result<Option<JobCounts>> {
        match &self.sql {
            Some(sql) => sql.job_counts(request_id).await,
            None => {
                let job: Option<CachedJob> = self.cache.get(&keys::job(request_id)).await?;
                Ok(job.map(|job| {
                    let mut counts = JobCounts {
                        total: job.total,
                        pending: 0,
                        processing: 0,
                        completed: 0,
                        failed: 0,
                    };
                    for item in &job.items {
                        match item.status {
                            ItemStatus::Pending => counts.pending += 1,
                            ItemStatus::Processing => counts.processing += 1,
                            ItemStatus::Completed => counts.completed += 1,
                            ItemStatus::Failed => counts.failed += 1,
                        }
                    }
                    counts
                }))
            }
        }
    }

    /// Per-item results
    pub async fn items(&self, request_id: &str) -> Result<Vec<JobItem>> {
        match &self.sql {
            Some(sql) => sql.job_items(request_id).await,
            None => {
                let job: Option<CachedJob> = self.cache.get(&keys::job(request_id)).await?;
                Ok(job.map(|job| job.items).unwrap_or_default())
            }
        }
    }
}

/// A fresh pending item
pub fn pending_item(material_id: &str) -> JobItem {
    JobItem {
        material_id: material_id.to_string(),
        status: ItemStatus::Pending,
        sku: None,
        similarity: None,
        error: None,
        attempts: 0,
        last_attempt_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matforge_common::cache::MemoryCache;

    fn tracker() -> JobTracker {
        JobTracker::new(
            None,
            Cache::new(Arc::new(MemoryCache::new())),
            Duration::from_secs(86_400),
        )
    }

    #[tokio::test]
    async fn test_counts_invariant_through_transitions() {
        let tracker = tracker();
        tracker
            .create("req-1", vec![pending_item("a"), pending_item("b")])
            .await
            .unwrap();

        let counts = tracker.counts("req-1").await.unwrap().unwrap();
        assert!(counts.is_consistent());
        assert_eq!(counts.pending, 2);

        let mut item = pending_item("a");
        item.status = ItemStatus::Processing;
        item.attempts = 1;
        tracker.update_item("req-1", item).await.unwrap();

        let counts = tracker.counts("req-1").await.unwrap().unwrap();
        assert!(counts.is_consistent());
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 1);

        let mut item = pending_item("a");
        item.status = ItemStatus::Completed;
        item.sku = Some("SKU-1".to_string());
        item.similarity = Some(0.92);
        item.attempts = 1;
        tracker.update_item("req-1", item).await.unwrap();

        let counts = tracker.counts("req-1").await.unwrap().unwrap();
        assert!(counts.is_consistent());
        assert_eq!(counts.completed, 1);
    }

    #[tokio::test]
    async fn test_unknown_request_is_none() {
        let tracker = tracker();
        assert!(tracker.counts("ghost").await.unwrap().is_none());
        assert!(tracker.items("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_items_round_trip() {
        let tracker = tracker();
        tracker
            .create("req-1", vec![pending_item("a")])
            .await
            .unwrap();

        let items = tracker.items("req-1").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].material_id, "a");
        assert_eq!(items[0].status, ItemStatus::Pending);
    }

    #[tokio::test]
    async fn test_cache_tracker_is_ephemeral() {
        assert!(!tracker().is_durable());
    }

    #[test]
    fn test_throughput_estimate_scales_with_backlog() {
        let estimator = ThroughputEstimator::new();
        estimator.record(Duration::from_secs(2));

        let soon = estimator.estimate(10, 5);
        let later = estimator.estimate(1000, 5);
        assert!(later > soon);
    }
}
