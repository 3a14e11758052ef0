//! Batch enrichment worker pool
//!
//! Accept-then-process: requests are validated, persisted as pending job
//! items, and queued; a bounded pool of workers drains the queue in
//! chunks, runs the enrichment pipeline per item, and writes status
//! transitions back through the job tracker. Transient failures retry
//! with jittered exponential backoff.

use crate::jobs::{pending_item, JobTracker, ThroughputEstimator};
use chrono::{DateTime, Utc};
use matforge_common::config::BatchConfig;
use matforge_common::errors::{AppError, Result};
use matforge_common::metrics;
use matforge_common::model::{ItemStatus, JobItem};
use matforge_enrichment::EnrichmentPipeline;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Total attempts per item (one initial try plus retries)
const MAX_ATTEMPTS: u32 = 3;

/// Retry backoff base delays
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(4)];
const RETRY_DELAY_LAST: Duration = Duration::from_secs(16);

/// One raw item of a batch request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichInput {
    pub id: String,
    pub name: String,
    pub unit: String,
}

/// A batch enrichment request
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub materials: Vec<EnrichInput>,
}

/// Accept-phase response
#[derive(Debug, Clone, Serialize)]
pub struct AcceptResponse {
    pub request_id: String,
    pub total: usize,
    pub estimated_completion: DateTime<Utc>,
    /// True when job state lives only in the cache
    pub ephemeral: bool,
}

struct WorkItem {
    request_id: String,
    input: EnrichInput,
}

/// The batch processor facade
pub struct BatchProcessor {
    tracker: Arc<JobTracker>,
    estimator: Arc<ThroughputEstimator>,
    tx: mpsc::Sender<WorkItem>,
    config: BatchConfig,
}

impl BatchProcessor {
    /// Spawn the worker pool and return the processor handle
    pub fn start(
        pipeline: Arc<EnrichmentPipeline>,
        tracker: Arc<JobTracker>,
        config: BatchConfig,
    ) -> (Arc<Self>, Vec<tokio::task::JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel::<WorkItem>(config.max_items_per_request.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let estimator = Arc::new(ThroughputEstimator::new());

        let mut handles = Vec::with_capacity(config.worker_pool);
        for worker_id in 0..config.worker_pool {
            let pipeline = Arc::clone(&pipeline);
            let tracker = Arc::clone(&tracker);
            let estimator = Arc::clone(&estimator);
            let rx = Arc::clone(&rx);
            let config = config.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, pipeline, tracker, estimator, rx, config).await;
            }));
        }

        (
            Arc::new(Self {
                tracker,
                estimator,
                tx,
                config,
            }),
            handles,
        )
    }

    /// Validate and enqueue a batch; returns quickly with the request id
    pub async fn accept(&self, request: ProcessRequest) -> Result<AcceptResponse> {
        let materials = request.materials;
        if materials.is_empty() {
            return Err(AppError::Validation {
                message: "materials must not be empty".to_string(),
                field: Some("materials".to_string()),
            });
        }
        if materials.len() > self.config.max_items_per_request {
            return Err(AppError::Validation {
                message: format!(
                    "Batch of {} exceeds the limit of {}",
                    materials.len(),
                    self.config.max_items_per_request
                ),
                field: Some("materials".to_string()),
            });
        }

        let mut seen = HashSet::new();
        for item in &materials {
            if item.id.trim().is_empty() {
                return Err(AppError::MissingField {
                    field: "materials[].id".to_string(),
                });
            }
            if item.name.trim().is_empty() {
                return Err(AppError::MissingField {
                    field: "materials[].name".to_string(),
                });
            }
            if item.unit.trim().is_empty() {
                return Err(AppError::MissingField {
                    field: "materials[].unit".to_string(),
                });
            }
            if !seen.insert(item.id.clone()) {
                return Err(AppError::Conflict {
                    message: format!("Duplicate material_id in request: {}", item.id),
                });
            }
        }

        // Accept refuses when the worker queue cannot hold the batch
        if self.tx.capacity() < materials.len() {
            return Err(AppError::BackpressureRejected);
        }

        let request_id = request
            .request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let items: Vec<JobItem> = materials.iter().map(|m| pending_item(&m.id)).collect();
        self.tracker.create(&request_id, items).await?;

        let total = materials.len();
        for input in materials {
            let work = WorkItem {
                request_id: request_id.clone(),
                input,
            };
            if let Err(e) = self.tx.try_send(work) {
                // Lost the capacity race with a concurrent accept
                let mut item = pending_item(match &e {
                    mpsc::error::TrySendError::Full(w)
                    | mpsc::error::TrySendError::Closed(w) => &w.input.id,
                });
                item.status = ItemStatus::Failed;
                item.error = Some("queue overflow at accept".to_string());
                self.tracker.update_item(&request_id, item).await.ok();
            }
        }

        let backlog =
            self.config.max_items_per_request.saturating_sub(self.tx.capacity());
        metrics::record_pool("batch_queue", self.config.max_items_per_request, backlog);

        info!(request_id = %request_id, total, "Batch accepted");
        Ok(AcceptResponse {
            request_id,
            total,
            estimated_completion: self
                .estimator
                .estimate(backlog.max(total), self.config.worker_pool),
            ephemeral: !self.tracker.is_durable(),
        })
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    /// Completion estimate for a number of unfinished items
    pub fn estimate_for(&self, remaining: usize) -> DateTime<Utc> {
        self.estimator.estimate(remaining, self.config.worker_pool)
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let base = RETRY_DELAYS
        .get(attempt.saturating_sub(1) as usize)
        .copied()
        .unwrap_or(RETRY_DELAY_LAST);
    let jitter = rand::thread_rng().gen_range(0.75..1.25);
    Duration::from_millis((base.as_millis() as f64 * jitter) as u64)
}

async fn worker_loop(
    worker_id: usize,
    pipeline: Arc<EnrichmentPipeline>,
    tracker: Arc<JobTracker>,
    estimator: Arc<ThroughputEstimator>,
    rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    config: BatchConfig,
) {
    loop {
        // Pull up to one chunk; the lock is held only while receiving
        let chunk = {
            let mut rx = rx.lock().await;
            let mut buffer = Vec::with_capacity(config.chunk_size);
            let received = rx.recv_many(&mut buffer, config.chunk_size.max(1)).await;
            if received == 0 {
                // Channel closed; processor dropped
                return;
            }
            buffer
        };

        tracing::debug!(worker_id, items = chunk.len(), "Worker picked up chunk");
        for work in chunk {
            process_item(&pipeline, &tracker, &estimator, &config, work).await;
        }
    }
}

async fn process_item(
    pipeline: &EnrichmentPipeline,
    tracker: &JobTracker,
    estimator: &ThroughputEstimator,
    config: &BatchConfig,
    work: WorkItem,
) {
    let started = Instant::now();
    let item_timeout = Duration::from_secs(config.item_timeout_secs.max(1));
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        let mut processing = pending_item(&work.input.id);
        processing.status = ItemStatus::Processing;
        processing.attempts = attempts;
        processing.last_attempt_at = Some(Utc::now());
        if let Err(e) = tracker.update_item(&work.request_id, processing).await {
            warn!(error = %e, request_id = %work.request_id, "Failed to mark item processing");
        }

        let outcome = tokio::time::timeout(
            item_timeout,
            pipeline.enrich(&work.input.id, &work.input.name, &work.input.unit),
        )
        .await
        .map_err(|_| AppError::Timeout {
            timeout_ms: item_timeout.as_millis() as u64,
        })
        .and_then(|inner| inner);

        match outcome {
            Ok(result) => {
                let mut item = pending_item(&work.input.id);
                item.status = ItemStatus::Completed;
                item.sku = result.sku;
                item.similarity = result.similarity;
                item.attempts = attempts;
                item.last_attempt_at = Some(Utc::now());
                tracker.update_item(&work.request_id, item).await.ok();
                estimator.record(started.elapsed());
                metrics::record_job_item("completed");
                return;
            }
            Err(error) if error.is_transient() && attempts < MAX_ATTEMPTS => {
                warn!(
                    request_id = %work.request_id,
                    material_id = %work.input.id,
                    attempt = attempts,
                    error = %error,
                    "Transient enrichment failure, will retry"
                );
                // Back to pending until the retry fires
                let mut item = pending_item(&work.input.id);
                item.attempts = attempts;
                item.last_attempt_at = Some(Utc::now());
                tracker.update_item(&work.request_id, item).await.ok();

                tokio::time::sleep(retry_delay(attempts)).await;
            }
            Err(error) => {
                let mut item = pending_item(&work.input.id);
                item.status = ItemStatus::Failed;
                item.error = Some(error.to_string());
                item.attempts = attempts;
                item.last_attempt_at = Some(Utc::now());
                tracker.update_item(&work.request_id, item).await.ok();
                metrics::record_job_item("failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matforge_common::cache::{Cache, MemoryCache};
    use matforge_common::config::EnrichmentConfig;
    use matforge_common::embeddings::{Embedder, MockEmbedder};
    use matforge_common::vector::{MemoryVectorStore, VectorStore};
    use matforge_enrichment::{
        CombinedEmbeddingService, MaterialParser, RagNormalizer, ReferenceService, SkuSearch,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 64;

    /// Embedder that fails its first `failures` calls, then delegates
    struct FlakyEmbedder {
        inner: MockEmbedder,
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, text: &str) -> matforge_common::errors::Result<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(AppError::EmbeddingUnavailable {
                    message: "503".to_string(),
                });
            }
            self.inner.embed(text).await
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> matforge_common::errors::Result<Vec<Vec<f32>>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(AppError::EmbeddingUnavailable {
                    message: "503".to_string(),
                });
            }
            self.inner.embed_batch(texts).await
        }

        fn model_name(&self) -> &str {
            "flaky"
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    async fn pipeline_with(embedder: Arc<dyn Embedder>) -> Arc<EnrichmentPipeline> {
        let seeder = MockEmbedder::new(DIM);
        let reference = Arc::new(ReferenceService::seed(&seeder).await.unwrap());
        let store = Arc::new(MemoryVectorStore::new());
        store
            .ensure_collection("reference_materials", DIM)
            .await
            .unwrap();
        let cache = Cache::new(Arc::new(MemoryCache::new()));

        Arc::new(EnrichmentPipeline::new(
            MaterialParser::new(Arc::clone(&embedder), DIM),
            RagNormalizer::new(reference, EnrichmentConfig::default()),
            CombinedEmbeddingService::new(
                Arc::clone(&embedder),
                cache.clone(),
                Duration::from_secs(86_400),
                Duration::from_secs(5),
            ),
            SkuSearch::new(
                store,
                "reference_materials".to_string(),
                &EnrichmentConfig::default(),
            ),
            cache,
            Duration::from_secs(3600),
        ))
    }

    fn tracker() -> Arc<JobTracker> {
        Arc::new(JobTracker::new(
            None,
            Cache::new(Arc::new(MemoryCache::new())),
            Duration::from_secs(86_400),
        ))
    }

    fn config(workers: usize, max_items: usize) -> BatchConfig {
        BatchConfig {
            max_items_per_request: max_items,
            worker_pool: workers,
            chunk_size: 50,
            item_timeout_secs: 60,
        }
    }

    fn request(ids: &[&str]) -> ProcessRequest {
        ProcessRequest {
            request_id: None,
            materials: ids
                .iter()
                .map(|id| EnrichInput {
                    id: id.to_string(),
                    name: format!("Цемент М500 {id}"),
                    unit: "кг".to_string(),
                })
                .collect(),
        }
    }

    async fn wait_done(tracker: &JobTracker, request_id: &str) {
        for _ in 0..200 {
            if let Some(counts) = tracker.counts(request_id).await.unwrap() {
                assert!(counts.is_consistent());
                if counts.is_done() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job never finished");
    }

    #[tokio::test]
    async fn test_accept_rejects_missing_unit() {
        let pipeline = pipeline_with(Arc::new(MockEmbedder::new(DIM))).await;
        let (processor, _handles) = BatchProcessor::start(pipeline, tracker(), config(1, 100));

        let mut bad = request(&["a"]);
        bad.materials[0].unit = String::new();
        let err = processor.accept(bad).await.unwrap_err();
        assert!(matches!(err, AppError::MissingField { .. }));
    }

    #[tokio::test]
    async fn test_accept_rejects_duplicate_ids() {
        let pipeline = pipeline_with(Arc::new(MockEmbedder::new(DIM))).await;
        let (processor, _handles) = BatchProcessor::start(pipeline, tracker(), config(1, 100));

        let err = processor.accept(request(&["a", "a"])).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_accept_rejects_oversized_batch() {
        let pipeline = pipeline_with(Arc::new(MockEmbedder::new(DIM))).await;
        let (processor, _handles) = BatchProcessor::start(pipeline, tracker(), config(1, 2));

        let err = processor
            .accept(request(&["a", "b", "c"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_backpressure_when_queue_full() {
        let pipeline = pipeline_with(Arc::new(MockEmbedder::new(DIM))).await;
        // Zero workers: nothing drains the queue
        let (processor, _handles) = BatchProcessor::start(pipeline, tracker(), config(0, 2));

        processor.accept(request(&["a", "b"])).await.unwrap();
        let err = processor.accept(request(&["c"])).await.unwrap_err();
        assert!(matches!(err, AppError::BackpressureRejected));
    }

    #[tokio::test]
    async fn test_batch_completes_and_counts_stay_consistent() {
        let pipeline = pipeline_with(Arc::new(MockEmbedder::new(DIM))).await;
        let tracker = tracker();
        let (processor, _handles) =
            BatchProcessor::start(pipeline, Arc::clone(&tracker), config(2, 100));

        let accepted = processor.accept(request(&["a", "b", "c"])).await.unwrap();
        assert_eq!(accepted.total, 3);
        assert!(accepted.ephemeral);

        wait_done(&tracker, &accepted.request_id).await;
        let counts = tracker.counts(&accepted.request_id).await.unwrap().unwrap();
        assert_eq!(counts.completed, 3);
        assert_eq!(counts.failed, 0);

        let items = tracker.items(&accepted.request_id).await.unwrap();
        assert!(items.iter().all(|item| item.status == ItemStatus::Completed));
        // No SKU catalog entries exist, so sku stays null per item
        assert!(items.iter().all(|item| item.sku.is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_to_completion() {
        // First two embed calls fail with 503, then the provider recovers
        let flaky = Arc::new(FlakyEmbedder {
            inner: MockEmbedder::new(DIM),
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let pipeline = pipeline_with(flaky).await;
        let tracker = tracker();
        let (processor, _handles) =
            BatchProcessor::start(pipeline, Arc::clone(&tracker), config(1, 100));

        let accepted = processor.accept(request(&["a"])).await.unwrap();
        wait_done(&tracker, &accepted.request_id).await;

        let items = tracker.items(&accepted.request_id).await.unwrap();
        assert_eq!(items[0].status, ItemStatus::Completed);
        assert!(items[0].attempts > 1);
    }

    #[tokio::test]
    async fn test_unknown_unit_fails_without_retry() {
        let pipeline = pipeline_with(Arc::new(MockEmbedder::new(DIM))).await;
        let tracker = tracker();
        let (processor, _handles) =
            BatchProcessor::start(pipeline, Arc::clone(&tracker), config(1, 100));

        let mut bad_unit = request(&["a"]);
        bad_unit.materials[0].unit = "сорок бочек".to_string();
        let accepted = processor.accept(bad_unit).await.unwrap();
        wait_done(&tracker, &accepted.request_id).await;

        let items = tracker.items(&accepted.request_id).await.unwrap();
        assert_eq!(items[0].status, ItemStatus::Failed);
        assert_eq!(items[0].attempts, 1);
        assert!(items[0].error.as_deref().unwrap_or_default().contains("normalized"));
    }
}
