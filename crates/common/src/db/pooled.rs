//! Pool-governed SQL backend decorator

use super::{SqlBackend, SqlHit, SqlSearchRequest};
use crate::errors::Result;
use crate::model::{AnalyticsRecord, JobCounts, JobItem, Material, PriceList};
use crate::pool::AdaptivePool;
use async_trait::async_trait;
use std::sync::Arc;

pub struct PooledSqlBackend {
    inner: Arc<dyn SqlBackend>,
    pool: Arc<AdaptivePool>,
}

impl PooledSqlBackend {
    pub fn new(inner: Arc<dyn SqlBackend>, pool: Arc<AdaptivePool>) -> Self {
        Self { inner, pool }
    }
}

#[async_trait]
impl SqlBackend for PooledSqlBackend {
    async fn ping(&self) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.ping().await
    }

    async fn upsert_material(&self, material: &Material, has_embedding: bool) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.upsert_material(material, has_embedding).await
    }

    async fn get_material(&self, id: &str) -> Result<Option<Material>> {
        let _permit = self.pool.checkout().await;
        self.inner.get_material(id).await
    }

    async fn get_materials(&self, ids: &[String]) -> Result<Vec<Material>> {
        let _permit = self.pool.checkout().await;
        self.inner.get_materials(ids).await
    }

    async fn delete_material(&self, id: &str) -> Result<bool> {
        let _permit = self.pool.checkout().await;
        self.inner.delete_material(id).await
    }

    async fn search_materials(&self, request: &SqlSearchRequest) -> Result<Vec<SqlHit>> {
        let _permit = self.pool.checkout().await;
        self.inner.search_materials(request).await
    }

    async fn material_names_matching(&self, needle: &str, limit: usize) -> Result<Vec<String>> {
        let _permit = self.pool.checkout().await;
        self.inner.material_names_matching(needle, limit).await
    }

    async fn categories_matching(&self, needle: &str, limit: usize) -> Result<Vec<String>> {
        let _permit = self.pool.checkout().await;
        self.inner.categories_matching(needle, limit).await
    }

    async fn create_job(&self, request_id: &str, items: &[JobItem]) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.create_job(request_id, items).await
    }

    async fn update_job_item(&self, request_id: &str, item: &JobItem) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.update_job_item(request_id, item).await
    }

    async fn job_counts(&self, request_id: &str) -> Result<Option<JobCounts>> {
        let _permit = self.pool.checkout().await;
        self.inner.job_counts(request_id).await
    }

    async fn job_items(&self, request_id: &str) -> Result<Vec<JobItem>> {
        let _permit = self.pool.checkout().await;
        self.inner.job_items(request_id).await
    }

    async fn insert_price_list(&self, list: &PriceList) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.insert_price_list(list).await
    }

    async fn latest_price_list(&self, supplier_id: &str) -> Result<Option<PriceList>> {
        let _permit = self.pool.checkout().await;
        self.inner.latest_price_list(supplier_id).await
    }

    async fn delete_supplier_prices(&self, supplier_id: &str) -> Result<u64> {
        let _permit = self.pool.checkout().await;
        self.inner.delete_supplier_prices(supplier_id).await
    }

    async fn insert_analytics(&self, record: &AnalyticsRecord) -> Result<()> {
        let _permit = self.pool.checkout().await;
        self.inner.insert_analytics(record).await
    }

    async fn query_analytics(&self, from_day: &str, to_day: &str) -> Result<Vec<AnalyticsRecord>> {
        let _permit = self.pool.checkout().await;
        self.inner.query_analytics(from_day, to_day).await
    }
}
