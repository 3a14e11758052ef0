//! Configuration management for MatForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{env}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Vector store configuration (primary backend)
    pub vector_store: VectorStoreConfig,

    /// SQL database configuration (optional fallback backend)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Redis configuration
    pub redis: RedisConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Search behavior configuration
    #[serde(default)]
    pub search: SearchConfig,

    /// Enrichment / normalization configuration
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Cache TTL configuration
    #[serde(default)]
    pub cache: CacheTtlConfig,

    /// Batch ingestion configuration
    #[serde(default)]
    pub batch: BatchConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Connection pool tuning
    #[serde(default)]
    pub pool: PoolConfig,

    /// SSH tunnel supervisor configuration
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Allow running with the SQL backend disabled when it is unreachable
    #[serde(default = "default_true")]
    pub enable_fallback_databases: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Environment name (production enables strict security headers)
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorStoreConfig {
    /// Backend: qdrant (production) or memory (tests, single node)
    #[serde(default = "default_vector_provider")]
    pub provider: String,

    /// Qdrant URL (http://host:6334)
    #[serde(default = "default_qdrant_url")]
    pub url: String,

    /// Optional API key
    pub api_key: Option<String>,

    /// Materials collection name
    #[serde(default = "default_materials_collection")]
    pub materials_collection: String,

    /// Reference materials (SKU catalog) collection name
    #[serde(default = "default_reference_collection")]
    pub reference_collection: String,

    /// Connect/request timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres URL; when the tunnel is enabled this should point at the
    /// local forwarded endpoint
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Backend: redis (production) or memory (tests, single node)
    #[serde(default = "default_cache_provider")]
    pub provider: String,

    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: u32,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension D; every stored vector must match
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Requests per second against the provider
    #[serde(default = "default_embedding_rps")]
    pub requests_per_second: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    /// Default vector-mode similarity threshold
    #[serde(default = "default_vector_threshold")]
    pub vector_similarity_threshold: f32,

    /// Default fuzzy-mode similarity threshold
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_similarity_threshold: f32,

    /// Hybrid fusion weight for the vector side
    #[serde(default = "default_hybrid_vector_weight")]
    pub hybrid_vector_weight: f32,

    /// Hybrid fusion weight for the SQL side
    #[serde(default = "default_hybrid_sql_weight")]
    pub hybrid_sql_weight: f32,

    /// Maximum results a single query may request
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Highlight markers wrapped around matched terms
    #[serde(default = "default_highlight_pre")]
    pub highlight_pre: String,

    #[serde(default = "default_highlight_post")]
    pub highlight_post: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_similarity_threshold: default_vector_threshold(),
            fuzzy_similarity_threshold: default_fuzzy_threshold(),
            hybrid_vector_weight: default_hybrid_vector_weight(),
            hybrid_sql_weight: default_hybrid_sql_weight(),
            max_results: default_max_results(),
            highlight_pre: default_highlight_pre(),
            highlight_post: default_highlight_post(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnrichmentConfig {
    /// Unit normalization thresholds
    #[serde(default = "default_unit_vector_threshold")]
    pub unit_vector_threshold: f32,

    #[serde(default = "default_normalize_fuzzy_threshold")]
    pub unit_fuzzy_threshold: f32,

    /// Color normalization thresholds
    #[serde(default = "default_color_vector_threshold")]
    pub color_vector_threshold: f32,

    #[serde(default = "default_normalize_fuzzy_threshold")]
    pub color_fuzzy_threshold: f32,

    /// SKU search recall depth
    #[serde(default = "default_sku_recall_k")]
    pub sku_recall_k: usize,

    /// SKU search minimum cosine similarity
    #[serde(default = "default_sku_min_cosine")]
    pub sku_min_cosine: f32,

    /// Require exact color equality even for null input colors
    #[serde(default)]
    pub symmetric_color: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            unit_vector_threshold: default_unit_vector_threshold(),
            unit_fuzzy_threshold: default_normalize_fuzzy_threshold(),
            color_vector_threshold: default_color_vector_threshold(),
            color_fuzzy_threshold: default_normalize_fuzzy_threshold(),
            sku_recall_k: default_sku_recall_k(),
            sku_min_cosine: default_sku_min_cosine(),
            symmetric_color: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheTtlConfig {
    /// Material record TTL in seconds
    #[serde(default = "default_material_ttl")]
    pub material_secs: u64,

    /// Search result TTL in seconds
    #[serde(default = "default_search_ttl")]
    pub search_secs: u64,

    /// Suggestion TTL in seconds
    #[serde(default = "default_suggest_ttl")]
    pub suggest_secs: u64,

    /// Combined embedding TTL in seconds
    #[serde(default = "default_combined_ttl")]
    pub combined_secs: u64,

    /// Ephemeral job-state TTL when SQL is unavailable
    #[serde(default = "default_job_ttl")]
    pub job_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            material_secs: default_material_ttl(),
            search_secs: default_search_ttl(),
            suggest_secs: default_suggest_ttl(),
            combined_secs: default_combined_ttl(),
            job_secs: default_job_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Maximum items accepted in a single request
    #[serde(default = "default_max_items")]
    pub max_items_per_request: usize,

    /// Worker pool size
    #[serde(default = "default_worker_pool")]
    pub worker_pool: usize,

    /// Items per processing chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Per-item processing deadline in seconds
    #[serde(default = "default_item_timeout")]
    pub item_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items_per_request: default_max_items(),
            worker_pool: default_worker_pool(),
            chunk_size: default_chunk_size(),
            item_timeout_secs: default_item_timeout(),
        }
    }
}

/// Per-endpoint-class sliding window limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointLimits {
    pub per_minute: u32,
    pub per_hour: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Limits per endpoint class; unknown classes use `default`
    #[serde(default = "default_endpoint_limits")]
    pub limits: HashMap<String, EndpointLimits>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limits: default_endpoint_limits(),
        }
    }
}

impl RateLimitConfig {
    /// Limits for an endpoint class, falling back to the `default` entry
    pub fn for_class(&self, class: &str) -> EndpointLimits {
        self.limits
            .get(class)
            .or_else(|| self.limits.get("default"))
            .cloned()
            .unwrap_or(EndpointLimits {
                per_minute: 60,
                per_hour: 1000,
                burst: 10,
            })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolLimits {
    pub min: usize,
    pub max: usize,
    #[serde(default = "default_target_util")]
    pub target_util: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_vector_pool")]
    pub vector: PoolLimits,

    #[serde(default = "default_sql_pool")]
    pub sql: PoolLimits,

    #[serde(default = "default_cache_pool")]
    pub cache: PoolLimits,

    /// Resize evaluation interval in seconds
    #[serde(default = "default_resize_interval")]
    pub resize_interval_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            vector: default_vector_pool(),
            sql: default_sql_pool(),
            cache: default_cache_pool(),
            resize_interval_secs: default_resize_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Enable the SSH tunnel to the SQL backend
    #[serde(default)]
    pub enable: bool,

    /// Remote SSH host
    #[serde(default)]
    pub host: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// SSH user
    #[serde(default)]
    pub user: String,

    /// Path to the private key
    #[serde(default)]
    pub key_path: String,

    /// Local port to bind the forwarded endpoint on
    #[serde(default = "default_local_port")]
    pub local_port: u16,

    /// Remote host:port to forward to
    #[serde(default = "default_remote_bind")]
    pub remote_bind: String,

    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Restart automatically after heartbeat failures
    #[serde(default = "default_true")]
    pub auto_restart: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enable: false,
            host: String::new(),
            ssh_port: default_ssh_port(),
            user: String::new(),
            key_path: String::new(),
            local_port: default_local_port(),
            remote_bind: default_remote_bind(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            auto_restart: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_true")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Log request/response bodies (only bodies <= 64 KiB are ever logged)
    #[serde(default)]
    pub log_bodies: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: true,
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
            log_bodies: false,
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_body_bytes() -> usize { 50 * 1024 * 1024 }
fn default_environment() -> String { "development".to_string() }
fn default_vector_provider() -> String { "qdrant".to_string() }
fn default_cache_provider() -> String { "redis".to_string() }
fn default_qdrant_url() -> String { "http://localhost:6334".to_string() }
fn default_materials_collection() -> String { "materials".to_string() }
fn default_reference_collection() -> String { "reference_materials".to_string() }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_redis_pool_size() -> u32 { 20 }
fn default_key_prefix() -> String { "matforge".to_string() }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_embedding_rps() -> u32 { 10 }
fn default_embedding_batch_size() -> usize { 100 }
fn default_vector_threshold() -> f32 { 0.0 }
fn default_fuzzy_threshold() -> f32 { 0.6 }
fn default_hybrid_vector_weight() -> f32 { 0.6 }
fn default_hybrid_sql_weight() -> f32 { 0.4 }
fn default_max_results() -> usize { 500 }
fn default_highlight_pre() -> String { "‹mark›".to_string() }
fn default_highlight_post() -> String { "‹/mark›".to_string() }
fn default_unit_vector_threshold() -> f32 { 0.85 }
fn default_color_vector_threshold() -> f32 { 0.82 }
fn default_normalize_fuzzy_threshold() -> f32 { 0.75 }
fn default_sku_recall_k() -> usize { 20 }
fn default_sku_min_cosine() -> f32 { 0.70 }
fn default_material_ttl() -> u64 { 3600 }
fn default_search_ttl() -> u64 { 300 }
fn default_suggest_ttl() -> u64 { 3600 }
fn default_combined_ttl() -> u64 { 86400 }
fn default_job_ttl() -> u64 { 86400 }
fn default_max_items() -> usize { 10_000 }
fn default_worker_pool() -> usize { 5 }
fn default_chunk_size() -> usize { 50 }
fn default_item_timeout() -> u64 { 60 }
fn default_target_util() -> f64 { 0.8 }
fn default_resize_interval() -> u64 { 30 }
fn default_ssh_port() -> u16 { 22 }
fn default_local_port() -> u16 { 15432 }
fn default_remote_bind() -> String { "127.0.0.1:5432".to_string() }
fn default_heartbeat_interval() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "matforge".to_string() }
fn default_true() -> bool { true }

fn default_endpoint_limits() -> HashMap<String, EndpointLimits> {
    let mut limits = HashMap::new();
    limits.insert(
        "search".to_string(),
        EndpointLimits { per_minute: 120, per_hour: 3000, burst: 20 },
    );
    limits.insert(
        "materials".to_string(),
        EndpointLimits { per_minute: 60, per_hour: 1500, burst: 10 },
    );
    limits.insert(
        "enrichment".to_string(),
        EndpointLimits { per_minute: 20, per_hour: 200, burst: 5 },
    );
    limits.insert(
        "prices".to_string(),
        EndpointLimits { per_minute: 10, per_hour: 100, burst: 3 },
    );
    limits.insert(
        "default".to_string(),
        EndpointLimits { per_minute: 60, per_hour: 1000, burst: 10 },
    );
    limits
}

fn default_vector_pool() -> PoolLimits {
    PoolLimits { min: 2, max: 16, target_util: 0.8 }
}

fn default_sql_pool() -> PoolLimits {
    PoolLimits { min: 5, max: 50, target_util: 0.8 }
}

fn default_cache_pool() -> PoolLimits {
    PoolLimits { min: 2, max: 20, target_util: 0.8 }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Whether the SQL backend is configured at all
    pub fn sql_enabled(&self) -> bool {
        self.database.is_some()
    }

    /// True when running in production mode
    pub fn is_production(&self) -> bool {
        self.server.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
                max_body_bytes: default_max_body_bytes(),
                environment: default_environment(),
            },
            vector_store: VectorStoreConfig {
                provider: default_vector_provider(),
                url: default_qdrant_url(),
                api_key: None,
                materials_collection: default_materials_collection(),
                reference_collection: default_reference_collection(),
                timeout_secs: default_connect_timeout(),
            },
            database: None,
            redis: RedisConfig {
                provider: default_cache_provider(),
                url: default_redis_url(),
                pool_size: default_redis_pool_size(),
                key_prefix: default_key_prefix(),
            },
            embedding: EmbeddingConfig {
                provider: default_embedding_provider(),
                api_key: None,
                api_base: None,
                model: default_embedding_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_embedding_timeout(),
                max_retries: default_embedding_retries(),
                requests_per_second: default_embedding_rps(),
                batch_size: default_embedding_batch_size(),
            },
            search: SearchConfig::default(),
            enrichment: EnrichmentConfig::default(),
            cache: CacheTtlConfig::default(),
            batch: BatchConfig::default(),
            rate_limit: RateLimitConfig::default(),
            pool: PoolConfig::default(),
            tunnel: TunnelConfig::default(),
            observability: ObservabilityConfig::default(),
            enable_fallback_databases: true,
        }
    }
}
