//! SeaORM entities for the relational fallback store

pub mod analytics_daily;
pub mod job_item;
pub mod material;
pub mod price_row;
pub mod processing_job;

pub use analytics_daily::{
    ActiveModel as AnalyticsActiveModel, Column as AnalyticsColumn, Entity as AnalyticsEntity,
    Model as AnalyticsRow,
};
pub use job_item::{
    ActiveModel as JobItemActiveModel, Column as JobItemColumn, Entity as JobItemEntity,
    Model as JobItemRow,
};
pub use material::{
    ActiveModel as MaterialActiveModel, Column as MaterialColumn, Entity as MaterialEntity,
    Model as MaterialRow,
};
pub use price_row::{
    ActiveModel as PriceRowActiveModel, Column as PriceRowColumn, Entity as PriceRowEntity,
    Model as PriceRowRow,
};
pub use processing_job::{
    ActiveModel as ProcessingJobActiveModel, Column as ProcessingJobColumn,
    Entity as ProcessingJobEntity, Model as ProcessingJobRow,
};
