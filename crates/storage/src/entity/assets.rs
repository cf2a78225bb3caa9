//! hivemoji_assets entity
//! Composite (author, name) key; the author column arrived by migration from
//! the old name-only schema.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "hivemoji_assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub author: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub name: String,
    pub version: i32,
    pub upload_id: Option<String>,
    pub mime: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    #[sea_orm(column_type = "Blob")]
    pub data: Vec<u8>,
    pub animated: Option<bool>,
    #[sea_orm(column_name = "loop")]
    pub loop_count: Option<i32>,
    pub fallback_mime: Option<String>,
    #[sea_orm(column_type = "Blob", nullable)]
    pub fallback_data: Option<Vec<u8>>,
    pub checksum: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
