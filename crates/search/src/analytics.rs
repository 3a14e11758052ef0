//! Per-query analytics
//!
//! Every search records a small, append-only event into a bounded queue;
//! a background worker persists events to the SQL store when it is
//! enabled, or into daily cache buckets otherwise. Recording never blocks
//! and never surfaces an error to the caller — overflow drops the oldest
//! event and bumps a counter.

use chrono::{NaiveDate, Utc};
use matforge_common::cache::Cache;
use matforge_common::db::SqlBackend;
use matforge_common::errors::Result;
use matforge_common::metrics;
use matforge_common::model::AnalyticsRecord;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Queue capacity; beyond it the oldest record is dropped
const QUEUE_CAP: usize = 10_000;

/// Retention of cache-bucketed analytics
const CACHE_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

struct Queue {
    inner: Mutex<VecDeque<AnalyticsRecord>>,
    notify: Notify,
}

/// Fire-and-forget analytics recorder
#[derive(Clone)]
pub struct AnalyticsRecorder {
    queue: Arc<Queue>,
}

impl AnalyticsRecorder {
    /// Create the recorder and spawn its writer task
    pub fn start(
        sql: Option<Arc<dyn SqlBackend>>,
        cache: Cache,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let queue = Arc::new(Queue {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        });

        let worker_queue = Arc::clone(&queue);
        let handle = tokio::spawn(async move {
            loop {
                let record = loop {
                    let popped = {
                        let mut inner = worker_queue.inner.lock().expect("analytics queue");
                        inner.pop_front()
                    };
                    match popped {
                        Some(record) => break record,
                        None => worker_queue.notify.notified().await,
                    }
                };

                let result = match &sql {
                    Some(sql) => sql.insert_analytics(&record).await,
                    None => write_cache_bucket(&cache, &record).await,
                };
                if let Err(e) = result {
                    // Analytics failures must never affect responses
                    warn!(error = %e, "Failed to persist analytics record");
                }
            }
        });

        (Self { queue }, handle)
    }

    /// Enqueue one record; drops the oldest event when full
    pub fn record(&self, query_hash: String, mode: &str, duration_ms: u64, result_count: usize) {
        let ts = Utc::now();
        let record = AnalyticsRecord {
            day: ts.format("%Y-%m-%d").to_string(),
            query_hash,
            mode: mode.to_string(),
            duration_ms,
            result_count,
            ts,
        };

        {
            let mut inner = self.queue.inner.lock().expect("analytics queue");
            if inner.len() >= QUEUE_CAP {
                inner.pop_front();
                metrics::record_analytics_dropped();
            }
            inner.push_back(record);
        }
        self.queue.notify.notify_one();
        debug!(mode, duration_ms, result_count, "Analytics recorded");
    }
}

fn bucket_key(day: &str) -> String {
    format!("analytics:{}", day)
}

async fn write_cache_bucket(cache: &Cache, record: &AnalyticsRecord) -> Result<()> {
    let key = bucket_key(&record.day);
    let mut bucket: Vec<AnalyticsRecord> = cache.get(&key).await?.unwrap_or_default();
    bucket.push(record.clone());
    cache.set(&key, &bucket, CACHE_RETENTION).await
}

/// Aggregated view over a day range
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSummary {
    pub total_queries: usize,
    pub avg_duration_ms: f64,
    pub mode_counts: HashMap<String, usize>,
    /// (query_hash, occurrences), most frequent first
    pub top_queries: Vec<(String, usize)>,
    pub days: Vec<DailyBucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyBucket {
    pub day: String,
    pub queries: usize,
    pub avg_duration_ms: f64,
}

/// Fetch records for `[from_day, to_day)` from SQL or the cache buckets
pub async fn query_range(
    sql: Option<&Arc<dyn SqlBackend>>,
    cache: &Cache,
    from_day: &str,
    to_day: &str,
) -> Result<Vec<AnalyticsRecord>> {
    if let Some(sql) = sql {
        return sql.query_analytics(from_day, to_day).await;
    }

    let (Ok(from), Ok(to)) = (
        NaiveDate::parse_from_str(from_day, "%Y-%m-%d"),
        NaiveDate::parse_from_str(to_day, "%Y-%m-%d"),
    ) else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    let mut day = from;
    while day < to {
        let key = bucket_key(&day.format("%Y-%m-%d").to_string());
        if let Some(mut bucket) = cache.get::<Vec<AnalyticsRecord>>(&key).await? {
            records.append(&mut bucket);
        }
        day = day.succ_opt().unwrap_or(to);
    }
    Ok(records)
}

/// Aggregate raw records into the response shape
pub fn aggregate(records: &[AnalyticsRecord]) -> AnalyticsSummary {
    let total = records.len();
    let total_duration: u64 = records.iter().map(|r| r.duration_ms).sum();

    let mut mode_counts: HashMap<String, usize> = HashMap::new();
    let mut query_counts: HashMap<String, usize> = HashMap::new();
    let mut per_day: HashMap<String, (usize, u64)> = HashMap::new();
    for record in records {
        *mode_counts.entry(record.mode.clone()).or_default() += 1;
        *query_counts.entry(record.query_hash.clone()).or_default() += 1;
        let entry = per_day.entry(record.day.clone()).or_default();
        entry.0 += 1;
        entry.1 += record.duration_ms;
    }

    let mut top_queries: Vec<(String, usize)> = query_counts.into_iter().collect();
    top_queries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_queries.truncate(10);

    let mut days: Vec<DailyBucket> = per_day
        .into_iter()
        .map(|(day, (queries, duration))| DailyBucket {
            avg_duration_ms: duration as f64 / queries.max(1) as f64,
            day,
            queries,
        })
        .collect();
    days.sort_by(|a, b| a.day.cmp(&b.day));

    AnalyticsSummary {
        total_queries: total,
        avg_duration_ms: if total == 0 {
            0.0
        } else {
            total_duration as f64 / total as f64
        },
        mode_counts,
        top_queries,
        days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matforge_common::cache::MemoryCache;

    fn record(day: &str, hash: &str, mode: &str, duration: u64) -> AnalyticsRecord {
        AnalyticsRecord {
            day: day.to_string(),
            query_hash: hash.to_string(),
            mode: mode.to_string(),
            duration_ms: duration,
            result_count: 3,
            ts: Utc::now(),
        }
    }

    #[test]
    fn test_aggregate() {
        let records = vec![
            record("2026-07-01", "aaaa", "hybrid", 10),
            record("2026-07-01", "aaaa", "hybrid", 20),
            record("2026-07-02", "bbbb", "vector", 30),
        ];
        let summary = aggregate(&records);
        assert_eq!(summary.total_queries, 3);
        assert!((summary.avg_duration_ms - 20.0).abs() < 1e-9);
        assert_eq!(summary.mode_counts["hybrid"], 2);
        assert_eq!(summary.top_queries[0], ("aaaa".to_string(), 2));
        assert_eq!(summary.days.len(), 2);
    }

    #[tokio::test]
    async fn test_recorder_writes_cache_bucket() {
        let cache = Cache::new(Arc::new(MemoryCache::new()));
        let (recorder, _handle) = AnalyticsRecorder::start(None, cache.clone());

        recorder.record("abcd".to_string(), "sql", 12, 5);

        // Give the worker a moment to drain
        tokio::time::sleep(Duration::from_millis(50)).await;

        let day = Utc::now().format("%Y-%m-%d").to_string();
        let bucket: Option<Vec<AnalyticsRecord>> = cache.get(&bucket_key(&day)).await.unwrap();
        let bucket = bucket.expect("bucket written");
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].query_hash, "abcd");
    }

    #[tokio::test]
    async fn test_query_range_reads_cache_buckets() {
        let cache = Cache::new(Arc::new(MemoryCache::new()));
        write_cache_bucket(&cache, &record("2026-07-01", "aaaa", "hybrid", 5))
            .await
            .unwrap();
        write_cache_bucket(&cache, &record("2026-07-03", "bbbb", "sql", 5))
            .await
            .unwrap();

        // Half-open range excludes 2026-07-03
        let records = query_range(None, &cache, "2026-07-01", "2026-07-03")
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].query_hash, "aaaa");
    }
}
