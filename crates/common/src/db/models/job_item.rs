//! Per-item state of a processing job
//!
//! Status transitions are monotonic except processing -> pending on retry.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "job_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub request_id: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub material_id: String,

    /// pending | processing | completed | failed
    pub status: String,

    pub sku: Option<String>,

    pub similarity: Option<f32>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub attempts: i32,

    pub last_attempt_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::processing_job::Entity",
        from = "Column::RequestId",
        to = "super::processing_job::Column::RequestId"
    )]
    Job,
}

impl Related<super::processing_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
