//! Service wiring
//!
//! Builds every adapter and service once at startup from configuration.
//! Backend selection is static: vector-only, vector+sql, or
//! vector+sql+cache comes out of config, never dynamic dispatch at
//! request time.

use matforge_common::cache::{Cache, CacheStore, MemoryCache, PooledCacheStore, RedisCache};
use matforge_common::config::AppConfig;
use matforge_common::db::{PooledSqlBackend, SqlBackend, SqlStore};
use matforge_common::embeddings::create_embedder;
use matforge_common::errors::{AppError, Result};
use matforge_common::pool::{AdaptivePool, PoolManager};
use matforge_common::tunnel::{TunnelState, TunnelSupervisor};
use matforge_common::vector::{
    MemoryVectorStore, PooledVectorStore, QdrantVectorStore, VectorStore,
};
use matforge_enrichment::{
    CombinedEmbeddingService, EnrichmentPipeline, MaterialParser, RagNormalizer,
    ReferenceService, SkuSearch,
};
use matforge_ingestion::{BatchProcessor, JobTracker, PriceListService};
use matforge_search::{AnalyticsRecorder, MaterialsRepository, SearchEngine, SuggestService};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Cache,
    pub vector: Arc<dyn VectorStore>,
    pub sql: Option<Arc<dyn SqlBackend>>,
    pub repository: Arc<MaterialsRepository>,
    pub engine: Arc<SearchEngine>,
    pub processor: Arc<BatchProcessor>,
    pub tracker: Arc<JobTracker>,
    pub prices: Arc<PriceListService>,
    pub tunnel: Option<Arc<TunnelSupervisor>>,
    pub tunnel_state: Option<watch::Receiver<TunnelState>>,
}

/// The built state plus its background tasks
pub struct Runtime {
    pub state: AppState,
    pub background: Vec<tokio::task::JoinHandle<()>>,
}

/// Wire all adapters and services from configuration
pub async fn build_state(mut config: AppConfig) -> Result<Runtime> {
    let mut background = Vec::new();

    // Tunnel first: the SQL adapter dials its local endpoint
    let mut tunnel = None;
    let mut tunnel_state = None;
    if config.tunnel.enable && config.database.is_some() {
        let (supervisor, state_rx) = TunnelSupervisor::new(config.tunnel.clone());
        background.push(Arc::clone(&supervisor).start());

        if !supervisor.wait_active(Duration::from_secs(30)).await {
            if config.enable_fallback_databases {
                warn!("Tunnel did not become active; running without the SQL backend");
                config.database = None;
            } else {
                return Err(AppError::Tunnel {
                    message: "Tunnel failed to become active at startup".to_string(),
                });
            }
        }
        tunnel = Some(supervisor);
        tunnel_state = Some(state_rx);
    }

    // Adapter pools, resized by the manager task
    let vector_pool = Arc::new(AdaptivePool::new("vector", config.pool.vector.min));
    let sql_pool = Arc::new(AdaptivePool::new("sql", config.pool.sql.min));
    let cache_pool = Arc::new(AdaptivePool::new("cache", config.pool.cache.min));
    let mut pool_manager = PoolManager::new(&config.pool);
    pool_manager.register(Arc::clone(&vector_pool), config.pool.vector.clone());
    pool_manager.register(Arc::clone(&sql_pool), config.pool.sql.clone());
    pool_manager.register(Arc::clone(&cache_pool), config.pool.cache.clone());
    background.push(pool_manager.spawn());

    // Cache
    let raw_cache: Arc<dyn CacheStore> = match config.redis.provider.as_str() {
        "memory" => Arc::new(MemoryCache::new()),
        _ => Arc::new(RedisCache::new(&config.redis).await?),
    };
    let cache = Cache::new(Arc::new(PooledCacheStore::new(raw_cache, cache_pool)));

    // Vector store (primary backend)
    let raw_vector: Arc<dyn VectorStore> = match config.vector_store.provider.as_str() {
        "memory" => Arc::new(MemoryVectorStore::new()),
        _ => Arc::new(QdrantVectorStore::new(&config.vector_store)?),
    };
    let vector: Arc<dyn VectorStore> =
        Arc::new(PooledVectorStore::new(raw_vector, vector_pool));

    // SQL store (optional fallback backend)
    let sql: Option<Arc<dyn SqlBackend>> = match &config.database {
        Some(db_config) => match SqlStore::connect(db_config).await {
            Ok(store) => {
                info!("SQL backend connected");
                Some(Arc::new(PooledSqlBackend::new(Arc::new(store), sql_pool)))
            }
            Err(e) if config.enable_fallback_databases => {
                warn!(error = %e, "SQL backend unreachable; continuing vector-only");
                None
            }
            Err(e) => return Err(e),
        },
        None => None,
    };

    // Embedding client
    let embedder = create_embedder(&config.embedding)?;
    let dimension = config.embedding.dimension;

    // Collections exist before any request; a dimension mismatch here is
    // a startup failure
    let materials_collection = config.vector_store.materials_collection.clone();
    let reference_collection = config.vector_store.reference_collection.clone();
    vector
        .ensure_collection(&materials_collection, dimension)
        .await?;
    vector
        .ensure_collection(&reference_collection, dimension)
        .await?;

    // Reference collections and the enrichment pipeline
    let reference = Arc::new(ReferenceService::seed(embedder.as_ref()).await?);
    let pipeline = Arc::new(EnrichmentPipeline::new(
        MaterialParser::new(Arc::clone(&embedder), dimension),
        RagNormalizer::new(reference, config.enrichment.clone()),
        CombinedEmbeddingService::new(
            Arc::clone(&embedder),
            cache.clone(),
            Duration::from_secs(config.cache.combined_secs),
            Duration::from_secs(config.embedding.timeout_secs),
        ),
        SkuSearch::new(
            Arc::clone(&vector),
            reference_collection,
            &config.enrichment,
        ),
        cache.clone(),
        Duration::from_secs(config.cache.material_secs),
    ));

    // Search stack
    let (analytics, analytics_handle) = AnalyticsRecorder::start(sql.clone(), cache.clone());
    background.push(analytics_handle);
    let suggest = Arc::new(SuggestService::new(
        cache.clone(),
        sql.clone(),
        Arc::clone(&vector),
        materials_collection.clone(),
        Duration::from_secs(config.cache.suggest_secs),
    ));
    let engine = Arc::new(SearchEngine::new(
        Arc::clone(&vector),
        sql.clone(),
        Arc::clone(&embedder),
        materials_collection.clone(),
        config.search.clone(),
        analytics,
        suggest,
    ));
    let repository = Arc::new(MaterialsRepository::new(
        Arc::clone(&vector),
        sql.clone(),
        cache.clone(),
        Arc::clone(&embedder),
        Arc::clone(&engine),
        materials_collection,
        config.cache.clone(),
        config.batch.chunk_size,
    ));

    // Batch ingestion
    let tracker = Arc::new(JobTracker::new(
        sql.clone(),
        cache.clone(),
        Duration::from_secs(config.cache.job_secs),
    ));
    let (processor, worker_handles) =
        BatchProcessor::start(Arc::clone(&pipeline), Arc::clone(&tracker), config.batch.clone());
    background.extend(worker_handles);

    // Price lists
    let prices = Arc::new(PriceListService::new(
        Arc::clone(&vector),
        sql.clone(),
        Arc::clone(&embedder),
        dimension,
        config.server.max_body_bytes,
    ));

    info!(
        sql_available = sql.is_some(),
        vector_provider = %config.vector_store.provider,
        "Services wired"
    );

    Ok(Runtime {
        state: AppState {
            config: Arc::new(config),
            cache,
            vector,
            sql,
            repository,
            engine,
            processor,
            tracker,
            prices,
            tunnel,
            tunnel_state,
        },
        background,
    })
}
