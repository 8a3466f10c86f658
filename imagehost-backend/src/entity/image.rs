use chrono::Utc;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One stored image. Column names follow the `images` table, field names say what they hold.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "images")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(column_name = "filename", unique)]
    pub stored_name: String,
    pub original_name: String,
    #[sea_orm(column_name = "size")]
    pub size_bytes: i64,
    #[sea_orm(column_name = "upload_time")]
    pub uploaded_at: chrono::DateTime<Utc>,
    #[sea_orm(column_name = "file_type")]
    pub mime_type: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
