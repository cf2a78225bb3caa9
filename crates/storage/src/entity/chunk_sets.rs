//! hivemoji_chunk_sets entity
//! Per-(upload_id, kind) metadata for an in-progress upload; `data` is only
//! populated once `completed` flips to true.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "hivemoji_chunk_sets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub upload_id: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub kind: String,
    pub name: String,
    pub author: Option<String>,
    pub version: i32,
    pub mime: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub animated: Option<bool>,
    #[sea_orm(column_name = "loop")]
    pub loop_count: Option<i32>,
    pub checksum: Option<String>,
    pub total: i32,
    pub completed: bool,
    #[sea_orm(column_type = "Blob", nullable)]
    pub data: Option<Vec<u8>>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
