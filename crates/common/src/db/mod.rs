//! SQL store adapter (optional fallback backend)
//!
//! Provides exact/LIKE/trigram search over materials, transactional job
//! tracking, price-list rows, and daily analytics. Reached through the
//! tunnel supervisor's local endpoint when the tunnel is enabled.

pub mod models;
mod pooled;

pub use pooled::PooledSqlBackend;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::model::{
    AnalyticsRecord, ItemStatus, JobCounts, JobItem, Material, PriceList, PriceRow, SourceFormat,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::*;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbBackend, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
    TransactionTrait,
};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Parameters for a SQL-mode material search
#[derive(Debug, Clone, Default)]
pub struct SqlSearchRequest {
    pub text: Option<String>,
    pub categories: Vec<String>,
    pub units: Vec<String>,
    /// Glob pattern with `*` and `?`
    pub sku_pattern: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub updated_from: Option<DateTime<Utc>>,
    pub updated_to: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// One scored SQL search hit
#[derive(Debug, Clone)]
pub struct SqlHit {
    pub material: Material,
    pub score: f32,
}

/// Capability set of the relational backend
#[async_trait]
pub trait SqlBackend: Send + Sync {
    async fn ping(&self) -> Result<()>;

    // Materials
    async fn upsert_material(&self, material: &Material, has_embedding: bool) -> Result<()>;
    async fn get_material(&self, id: &str) -> Result<Option<Material>>;
    async fn get_materials(&self, ids: &[String]) -> Result<Vec<Material>>;
    async fn delete_material(&self, id: &str) -> Result<bool>;
    async fn search_materials(&self, request: &SqlSearchRequest) -> Result<Vec<SqlHit>>;
    async fn material_names_matching(&self, needle: &str, limit: usize) -> Result<Vec<String>>;
    async fn categories_matching(&self, needle: &str, limit: usize) -> Result<Vec<String>>;

    // Job tracking
    async fn create_job(&self, request_id: &str, items: &[JobItem]) -> Result<()>;
    async fn update_job_item(&self, request_id: &str, item: &JobItem) -> Result<()>;
    async fn job_counts(&self, request_id: &str) -> Result<Option<JobCounts>>;
    async fn job_items(&self, request_id: &str) -> Result<Vec<JobItem>>;

    // Price lists
    async fn insert_price_list(&self, list: &PriceList) -> Result<()>;
    async fn latest_price_list(&self, supplier_id: &str) -> Result<Option<PriceList>>;
    async fn delete_supplier_prices(&self, supplier_id: &str) -> Result<u64>;

    // Analytics
    async fn insert_analytics(&self, record: &AnalyticsRecord) -> Result<()>;
    async fn query_analytics(&self, from_day: &str, to_day: &str) -> Result<Vec<AnalyticsRecord>>;
}

/// Positional parameter collector for dynamic statements
#[derive(Default)]
struct Params {
    values: Vec<sea_orm::Value>,
}

impl Params {
    fn add(&mut self, value: impl Into<sea_orm::Value>) -> String {
        self.values.push(value.into());
        format!("${}", self.values.len())
    }
}

/// Escape LIKE metacharacters in user text
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Convert a `*`/`?` glob into a SQL LIKE pattern
pub fn glob_to_like(pattern: &str) -> String {
    escape_like(pattern).replace('*', "%").replace('?', "_")
}

/// SeaORM-backed Postgres store
pub struct SqlStore {
    conn: DatabaseConnection,
    trigram_available: bool,
}

impl SqlStore {
    /// Connect and probe for pg_trgm
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut options = ConnectOptions::new(config.url.clone());
        options
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(options).await?;

        let trigram_available = conn
            .query_one(Statement::from_string(
                DbBackend::Postgres,
                "SELECT 1 AS one FROM pg_extension WHERE extname = 'pg_trgm'",
            ))
            .await
            .map(|row| row.is_some())
            .unwrap_or(false);

        if trigram_available {
            info!("pg_trgm available, trigram search enabled");
        } else {
            warn!("pg_trgm not installed, SQL search limited to exact/LIKE");
        }

        Ok(Self {
            conn,
            trigram_available,
        })
    }

    /// For tests against an already opened connection
    pub fn with_connection(conn: DatabaseConnection, trigram_available: bool) -> Self {
        Self {
            conn,
            trigram_available,
        }
    }

    pub fn trigram_available(&self) -> bool {
        self.trigram_available
    }

    fn row_to_material(row: MaterialRow) -> Material {
        Material {
            id: row.id,
            name: row.name,
            description: row.description,
            use_category: row.use_category,
            unit: row.unit,
            sku: row.sku,
            created_at: row.created_at,
            updated_at: row.updated_at,
            embedding: None,
        }
    }

    fn item_to_active(request_id: &str, item: &JobItem) -> JobItemActiveModel {
        JobItemActiveModel {
            request_id: Set(request_id.to_string()),
            material_id: Set(item.material_id.clone()),
            status: Set(item.status.as_str().to_string()),
            sku: Set(item.sku.clone()),
            similarity: Set(item.similarity),
            error_message: Set(item.error.clone()),
            attempts: Set(item.attempts as i32),
            last_attempt_at: Set(item.last_attempt_at),
        }
    }

    fn row_to_item(row: JobItemRow) -> JobItem {
        JobItem {
            material_id: row.material_id,
            status: ItemStatus::from(row.status.as_str()),
            sku: row.sku,
            similarity: row.similarity,
            error: row.error_message,
            attempts: row.attempts as u32,
            last_attempt_at: row.last_attempt_at,
        }
    }
}

#[async_trait]
impl SqlBackend for SqlStore {
    async fn ping(&self) -> Result<()> {
        self.conn
            .execute(Statement::from_string(DbBackend::Postgres, "SELECT 1"))
            .await?;
        Ok(())
    }

    async fn upsert_material(&self, material: &Material, has_embedding: bool) -> Result<()> {
        let model = MaterialActiveModel {
            id: Set(material.id.clone()),
            name: Set(material.name.clone()),
            description: Set(material.description.clone()),
            use_category: Set(material.use_category.clone()),
            unit: Set(material.unit.clone()),
            sku: Set(material.sku.clone()),
            created_at: Set(material.created_at),
            updated_at: Set(material.updated_at),
            has_embedding: Set(has_embedding),
        };

        MaterialEntity::insert(model)
            .on_conflict(
                OnConflict::column(MaterialColumn::Id)
                    .update_columns([
                        MaterialColumn::Name,
                        MaterialColumn::Description,
                        MaterialColumn::UseCategory,
                        MaterialColumn::Unit,
                        MaterialColumn::Sku,
                        MaterialColumn::UpdatedAt,
                        MaterialColumn::HasEmbedding,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;
        Ok(())
    }

    async fn get_material(&self, id: &str) -> Result<Option<Material>> {
        let row = MaterialEntity::find_by_id(id).one(&self.conn).await?;
        Ok(row.map(Self::row_to_material))
    }

    async fn get_materials(&self, ids: &[String]) -> Result<Vec<Material>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = MaterialEntity::find()
            .filter(MaterialColumn::Id.is_in(ids.to_vec()))
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(Self::row_to_material).collect())
    }

    async fn delete_material(&self, id: &str) -> Result<bool> {
        let result = MaterialEntity::delete_by_id(id).exec(&self.conn).await?;
        Ok(result.rows_affected > 0)
    }

    async fn search_materials(&self, request: &SqlSearchRequest) -> Result<Vec<SqlHit>> {
        let mut params = Params::default();
        let mut where_clauses: Vec<String> = Vec::new();

        let text = request
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let score_expr = match text {
            Some(text) => {
                let q = params.add(text.to_string());
                let like = params.add(format!("%{}%", escape_like(text)));

                let field_score = |field: &str, weight: &str| {
                    let fallback = if self.trigram_available {
                        format!("COALESCE(similarity({field}, {q}), 0)")
                    } else {
                        "0".to_string()
                    };
                    format!(
                        "{weight} * (CASE WHEN {field} IS NULL THEN 0 \
                         WHEN {field} ILIKE {like} THEN 1.0 \
                         ELSE {fallback} END)"
                    )
                };

                let mut match_terms = vec![
                    format!("name ILIKE {like}"),
                    format!("description ILIKE {like}"),
                    format!("sku ILIKE {like}"),
                ];
                if self.trigram_available {
                    match_terms.push(format!("similarity(name, {q}) >= 0.3"));
                    match_terms.push(format!("similarity(description, {q}) >= 0.3"));
                }
                where_clauses.push(format!("({})", match_terms.join(" OR ")));

                format!(
                    "GREATEST({}, {}, {}, {})",
                    field_score("name", "0.4"),
                    field_score("description", "0.3"),
                    field_score("use_category", "0.2"),
                    field_score("sku", "0.1"),
                )
            }
            None => "0.0".to_string(),
        };

        if !request.categories.is_empty() {
            let placeholders: Vec<String> = request
                .categories
                .iter()
                .map(|c| params.add(c.clone()))
                .collect();
            where_clauses.push(format!("use_category IN ({})", placeholders.join(", ")));
        }

        if !request.units.is_empty() {
            let placeholders: Vec<String> =
                request.units.iter().map(|u| params.add(u.clone())).collect();
            where_clauses.push(format!("unit IN ({})", placeholders.join(", ")));
        }

        if let Some(pattern) = &request.sku_pattern {
            let like = params.add(glob_to_like(pattern));
            where_clauses.push(format!("sku LIKE {like}"));
        }

        if let Some(from) = request.created_from {
            let p = params.add(from);
            where_clauses.push(format!("created_at >= {p}"));
        }
        if let Some(to) = request.created_to {
            let p = params.add(to);
            where_clauses.push(format!("created_at < {p}"));
        }
        if let Some(from) = request.updated_from {
            let p = params.add(from);
            where_clauses.push(format!("updated_at >= {p}"));
        }
        if let Some(to) = request.updated_to {
            let p = params.add(to);
            where_clauses.push(format!("updated_at < {p}"));
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let limit = request.limit.clamp(1, 1000);
        let sql = format!(
            "SELECT id, name, description, use_category, unit, sku, created_at, updated_at, \
             CAST({score_expr} AS DOUBLE PRECISION) AS score \
             FROM materials {where_sql} \
             ORDER BY score DESC, updated_at DESC, id ASC \
             LIMIT {limit}"
        );

        let rows = self
            .conn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                params.values,
            ))
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let material = Material {
                id: row.try_get("", "id")?,
                name: row.try_get("", "name")?,
                description: row.try_get("", "description")?,
                use_category: row.try_get("", "use_category")?,
                unit: row.try_get("", "unit")?,
                sku: row.try_get("", "sku")?,
                created_at: row.try_get("", "created_at")?,
                updated_at: row.try_get("", "updated_at")?,
                embedding: None,
            };
            let score: f64 = row.try_get("", "score")?;
            hits.push(SqlHit {
                material,
                score: score as f32,
            });
        }
        Ok(hits)
    }

    async fn material_names_matching(&self, needle: &str, limit: usize) -> Result<Vec<String>> {
        let rows = MaterialEntity::find()
            .filter(MaterialColumn::Name.contains(needle))
            .order_by_asc(MaterialColumn::Name)
            .limit(limit as u64)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(|r| r.name).collect())
    }

    async fn categories_matching(&self, needle: &str, limit: usize) -> Result<Vec<String>> {
        let like = format!("%{}%", escape_like(needle));
        let rows = self
            .conn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                format!(
                    "SELECT DISTINCT use_category FROM materials \
                     WHERE use_category ILIKE $1 ORDER BY use_category LIMIT {}",
                    limit.clamp(1, 100)
                ),
                [like.into()],
            ))
            .await?;

        let mut categories = Vec::with_capacity(rows.len());
        for row in rows {
            let category: Option<String> = row.try_get("", "use_category")?;
            if let Some(c) = category {
                categories.push(c);
            }
        }
        Ok(categories)
    }

    async fn create_job(&self, request_id: &str, items: &[JobItem]) -> Result<()> {
        let txn = self.conn.begin().await?;

        ProcessingJobActiveModel {
            request_id: Set(request_id.to_string()),
            created_at: Set(Utc::now()),
            total: Set(items.len() as i32),
        }
        .insert(&txn)
        .await?;

        // insert_many is bounded by the bind-parameter limit
        for chunk in items.chunks(500) {
            let models: Vec<JobItemActiveModel> = chunk
                .iter()
                .map(|item| Self::item_to_active(request_id, item))
                .collect();
            JobItemEntity::insert_many(models).exec(&txn).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn update_job_item(&self, request_id: &str, item: &JobItem) -> Result<()> {
        let txn = self.conn.begin().await?;

        let existing = JobItemEntity::find_by_id((
            request_id.to_string(),
            item.material_id.clone(),
        ))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::JobNotFound {
            request_id: request_id.to_string(),
        })?;

        let mut model: JobItemActiveModel = existing.into();
        model.status = Set(item.status.as_str().to_string());
        model.sku = Set(item.sku.clone());
        model.similarity = Set(item.similarity);
        model.error_message = Set(item.error.clone());
        model.attempts = Set(item.attempts as i32);
        model.last_attempt_at = Set(item.last_attempt_at);
        model.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    async fn job_counts(&self, request_id: &str) -> Result<Option<JobCounts>> {
        let job = ProcessingJobEntity::find_by_id(request_id)
            .one(&self.conn)
            .await?;
        let Some(job) = job else {
            return Ok(None);
        };

        let rows = self
            .conn
            .query_all(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT status, COUNT(*) AS n FROM job_items WHERE request_id = $1 GROUP BY status",
                [request_id.into()],
            ))
            .await?;

        let mut counts = JobCounts {
            total: job.total as usize,
            pending: 0,
            processing: 0,
            completed: 0,
            failed: 0,
        };
        for row in rows {
            let status: String = row.try_get("", "status")?;
            let n: i64 = row.try_get("", "n")?;
            match ItemStatus::from(status.as_str()) {
                ItemStatus::Pending => counts.pending = n as usize,
                ItemStatus::Processing => counts.processing = n as usize,
                ItemStatus::Completed => counts.completed = n as usize,
                ItemStatus::Failed => counts.failed = n as usize,
            }
        }
        Ok(Some(counts))
    }

    async fn job_items(&self, request_id: &str) -> Result<Vec<JobItem>> {
        let rows = JobItemEntity::find()
            .filter(JobItemColumn::RequestId.eq(request_id))
            .order_by_asc(JobItemColumn::MaterialId)
            .all(&self.conn)
            .await?;
        Ok(rows.into_iter().map(Self::row_to_item).collect())
    }

    async fn insert_price_list(&self, list: &PriceList) -> Result<()> {
        let txn = self.conn.begin().await?;

        for chunk in list.rows.chunks(500) {
            let models: Vec<PriceRowActiveModel> = chunk
                .iter()
                .map(|row| PriceRowActiveModel {
                    id: Set(Uuid::new_v4().to_string()),
                    supplier_id: Set(list.supplier_id.clone()),
                    pricelist_id: Set(list.pricelist_id.clone()),
                    material_ref: Set(row.material_ref.clone()),
                    raw_name: Set(row.raw_name.clone()),
                    unit: Set(row.unit.clone()),
                    price: Set(row.price),
                    description: Set(row.description.clone()),
                    sku: Set(row.sku.clone()),
                    uploaded_at: Set(list.uploaded_at),
                    source_format: Set(match list.source_format {
                        SourceFormat::Csv => "csv".to_string(),
                        SourceFormat::Xlsx => "xlsx".to_string(),
                    }),
                })
                .collect();
            PriceRowEntity::insert_many(models).exec(&txn).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn latest_price_list(&self, supplier_id: &str) -> Result<Option<PriceList>> {
        let newest = PriceRowEntity::find()
            .filter(PriceRowColumn::SupplierId.eq(supplier_id))
            .order_by_desc(PriceRowColumn::UploadedAt)
            .one(&self.conn)
            .await?;
        let Some(newest) = newest else {
            return Ok(None);
        };

        let rows = PriceRowEntity::find()
            .filter(PriceRowColumn::PricelistId.eq(newest.pricelist_id.clone()))
            .order_by_asc(PriceRowColumn::RawName)
            .all(&self.conn)
            .await?;

        Ok(Some(PriceList {
            supplier_id: supplier_id.to_string(),
            pricelist_id: newest.pricelist_id,
            uploaded_at: newest.uploaded_at,
            source_format: if newest.source_format == "xlsx" {
                SourceFormat::Xlsx
            } else {
                SourceFormat::Csv
            },
            rows: rows
                .into_iter()
                .map(|row| PriceRow {
                    material_ref: row.material_ref,
                    raw_name: row.raw_name,
                    unit: row.unit,
                    price: row.price,
                    description: row.description,
                    sku: row.sku,
                })
                .collect(),
        }))
    }

    async fn delete_supplier_prices(&self, supplier_id: &str) -> Result<u64> {
        let result = PriceRowEntity::delete_many()
            .filter(PriceRowColumn::SupplierId.eq(supplier_id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    async fn insert_analytics(&self, record: &AnalyticsRecord) -> Result<()> {
        AnalyticsActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            day: Set(record.day.clone()),
            query_hash: Set(record.query_hash.clone()),
            mode: Set(record.mode.clone()),
            duration_ms: Set(record.duration_ms as i64),
            result_count: Set(record.result_count as i32),
            ts: Set(record.ts),
        }
        .insert(&self.conn)
        .await?;
        Ok(())
    }

    async fn query_analytics(&self, from_day: &str, to_day: &str) -> Result<Vec<AnalyticsRecord>> {
        // YYYY-MM-DD compares correctly as text
        let rows = AnalyticsEntity::find()
            .filter(AnalyticsColumn::Day.gte(from_day))
            .filter(AnalyticsColumn::Day.lt(to_day))
            .order_by_asc(AnalyticsColumn::Ts)
            .all(&self.conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| AnalyticsRecord {
                day: row.day,
                query_hash: row.query_hash,
                mode: row.mode,
                duration_ms: row.duration_ms as u64,
                result_count: row.result_count as usize,
                ts: row.ts,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_like() {
        assert_eq!(glob_to_like("SKU-*"), "SKU-%");
        assert_eq!(glob_to_like("A?B"), "A_B");
        assert_eq!(glob_to_like("100%"), "100\\%");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a_b%c"), "a\\_b\\%c");
    }

    #[test]
    fn test_params_numbering() {
        let mut params = Params::default();
        assert_eq!(params.add("a"), "$1");
        assert_eq!(params.add("b"), "$2");
        assert_eq!(params.values.len(), 2);
    }
}
