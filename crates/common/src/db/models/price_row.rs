//! Price-list row entity
//!
//! Rows are immutable after ingest; deletion happens by supplier scope.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "price_rows")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub supplier_id: String,

    pub pricelist_id: String,

    pub material_ref: Option<String>,

    pub raw_name: String,

    pub unit: String,

    pub price: f64,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub sku: Option<String>,

    pub uploaded_at: DateTimeUtc,

    /// csv | xlsx
    pub source_format: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
