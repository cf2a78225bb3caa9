//! Store operations for hivemoji assets, chunks and the sync cursor.
//!
//! Upserts and DDL go through raw statements; reads go through the entities.
//! Chunk insertion and completion detection share one serializable
//! transaction so exactly one caller ever observes a set closing.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, DbErr,
    EntityTrait, FromQueryResult, IsolationLevel, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Statement, TransactionTrait, Value,
};
use std::time::Duration;
use tracing::debug;

use crate::assemble::{self, AssembleError, ChunkPart};
use crate::entity::{assets, chunk_sets, chunks, sync_state};
use crate::error::{Result, StoreError};

const LAST_BLOCK_KEY: &str = "last_block";

/// A protocol v1 register payload after decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterV1 {
    pub name: String,
    pub author: String,
    pub mime: String,
    pub width: i32,
    pub height: i32,
    pub data: Vec<u8>,
    pub animated: bool,
    pub loop_count: Option<i32>,
    pub fallback_mime: String,
    pub fallback_data: Vec<u8>,
}

/// A v2 chunk message after decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPayload {
    pub upload_id: String,
    pub author: String,
    pub name: String,
    pub version: i32,
    pub mime: String,
    pub width: i32,
    pub height: i32,
    pub animated: bool,
    pub loop_count: Option<i32>,
    pub checksum: String,
    /// `main` or `fallback`.
    pub kind: String,
    pub seq: i32,
    pub total: i32,
    pub data: Vec<u8>,
}

/// A completed set of chunks for one (upload_id, kind).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledSet {
    pub upload_id: String,
    pub kind: String,
    pub name: String,
    pub author: String,
    pub version: i32,
    pub mime: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub animated: bool,
    pub loop_count: Option<i32>,
    pub checksum: String,
    pub data: Vec<u8>,
}

/// A stored emoji asset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub version: i32,
    pub author: String,
    pub upload_id: Option<String>,
    pub mime: String,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub animated: bool,
    pub loop_count: Option<i32>,
    pub checksum: Option<String>,
    pub fallback_mime: Option<String>,
    pub data: Vec<u8>,
    pub fallback_data: Vec<u8>,
}

impl From<assets::Model> for Asset {
    fn from(row: assets::Model) -> Self {
        Asset {
            name: row.name,
            version: row.version,
            author: row.author,
            upload_id: row.upload_id,
            mime: row.mime,
            width: row.width,
            height: row.height,
            animated: row.animated.unwrap_or(false),
            loop_count: row.loop_count,
            checksum: row.checksum,
            fallback_mime: row.fallback_mime,
            data: row.data,
            fallback_data: row.fallback_data.unwrap_or_default(),
        }
    }
}

impl From<chunk_sets::Model> for AssembledSet {
    fn from(row: chunk_sets::Model) -> Self {
        AssembledSet {
            upload_id: row.upload_id,
            kind: row.kind,
            name: row.name,
            author: row.author.unwrap_or_default(),
            version: row.version,
            mime: row.mime,
            width: row.width,
            height: row.height,
            animated: row.animated.unwrap_or(false),
            loop_count: row.loop_count,
            checksum: row.checksum.unwrap_or_default(),
            data: row.data.unwrap_or_default(),
        }
    }
}

/// Metadata-only asset row for listings that skip binary payloads.
#[derive(Debug, FromQueryResult)]
struct AssetMetaRow {
    name: String,
    version: i32,
    author: String,
    upload_id: Option<String>,
    mime: String,
    width: Option<i32>,
    height: Option<i32>,
    animated: Option<bool>,
    loop_count: Option<i32>,
    checksum: Option<String>,
    fallback_mime: Option<String>,
}

impl From<AssetMetaRow> for Asset {
    fn from(row: AssetMetaRow) -> Self {
        Asset {
            name: row.name,
            version: row.version,
            author: row.author,
            upload_id: row.upload_id,
            mime: row.mime,
            width: row.width,
            height: row.height,
            animated: row.animated.unwrap_or(false),
            loop_count: row.loop_count,
            checksum: row.checksum,
            fallback_mime: row.fallback_mime,
            data: Vec::new(),
            fallback_data: Vec::new(),
        }
    }
}

/// Wraps database access for hivemoji data.
#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Creates the tables used by the service, then migrates databases
    /// written by the old deployment whose asset key was `name` alone.
    pub async fn ensure_schema(&self) -> Result<()> {
        let creates = [
            r#"CREATE TABLE IF NOT EXISTS sync_state (
                key text PRIMARY KEY,
                value text NOT NULL,
                updated_at timestamptz NOT NULL DEFAULT now()
            )"#,
            r#"CREATE TABLE IF NOT EXISTS hivemoji_assets (
                name text PRIMARY KEY,
                version int NOT NULL,
                author text,
                upload_id text,
                mime text NOT NULL,
                width int,
                height int,
                data bytea NOT NULL,
                animated boolean DEFAULT false,
                "loop" int,
                fallback_mime text,
                fallback_data bytea,
                checksum text,
                created_at timestamptz NOT NULL DEFAULT now(),
                updated_at timestamptz NOT NULL DEFAULT now()
            )"#,
            r#"CREATE TABLE IF NOT EXISTS hivemoji_chunks (
                upload_id text NOT NULL,
                kind text NOT NULL,
                seq int NOT NULL,
                total int NOT NULL,
                data bytea NOT NULL,
                created_at timestamptz NOT NULL DEFAULT now(),
                PRIMARY KEY (upload_id, kind, seq)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS hivemoji_chunk_sets (
                upload_id text NOT NULL,
                kind text NOT NULL,
                name text NOT NULL,
                author text,
                version int NOT NULL,
                mime text NOT NULL,
                width int,
                height int,
                animated boolean,
                "loop" int,
                checksum text,
                total int NOT NULL,
                completed boolean NOT NULL DEFAULT false,
                data bytea,
                created_at timestamptz NOT NULL DEFAULT now(),
                updated_at timestamptz NOT NULL DEFAULT now(),
                PRIMARY KEY (upload_id, kind)
            )"#,
        ];

        for stmt in creates {
            self.db.execute_unprepared(stmt).await?;
        }

        // Back-fill author and move the asset key to (author, name).
        let alters = [
            "ALTER TABLE hivemoji_assets ADD COLUMN IF NOT EXISTS author text",
            "ALTER TABLE hivemoji_chunk_sets ADD COLUMN IF NOT EXISTS author text",
            "UPDATE hivemoji_assets SET author = COALESCE(author, '')",
            "UPDATE hivemoji_chunk_sets SET author = COALESCE(author, '')",
            "ALTER TABLE hivemoji_assets DROP CONSTRAINT IF EXISTS hivemoji_assets_pkey",
            "ALTER TABLE hivemoji_assets ADD CONSTRAINT hivemoji_assets_pkey PRIMARY KEY (author, name)",
        ];

        for stmt in alters {
            self.db.execute_unprepared(stmt).await?;
        }

        Ok(())
    }

    /// Stores or replaces an emoji registered via protocol v1.
    pub async fn upsert_v1(&self, payload: RegisterV1) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"INSERT INTO hivemoji_assets (name, version, author, upload_id, mime, width, height, data, animated, "loop", fallback_mime, fallback_data, checksum, updated_at)
               VALUES ($1, 1, $2, NULL, $3, $4, $5, $6, $7, $8, $9, $10, NULL, now())
               ON CONFLICT (author, name) DO UPDATE SET
                   version = EXCLUDED.version,
                   author = EXCLUDED.author,
                   upload_id = EXCLUDED.upload_id,
                   mime = EXCLUDED.mime,
                   width = EXCLUDED.width,
                   height = EXCLUDED.height,
                   data = EXCLUDED.data,
                   animated = EXCLUDED.animated,
                   "loop" = EXCLUDED."loop",
                   fallback_mime = EXCLUDED.fallback_mime,
                   fallback_data = EXCLUDED.fallback_data,
                   checksum = EXCLUDED.checksum,
                   updated_at = now()"#,
            [
                payload.name.into(),
                payload.author.into(),
                payload.mime.into(),
                payload.width.into(),
                payload.height.into(),
                payload.data.into(),
                payload.animated.into(),
                payload.loop_count.into(),
                null_if_empty(payload.fallback_mime),
                null_bytes(payload.fallback_data),
            ],
        );

        self.db.execute(stmt).await?;
        Ok(())
    }

    /// Deletes a stored emoji by (author, name).
    pub async fn delete_emoji(&self, author: &str, name: &str) -> Result<()> {
        if author.trim().is_empty() {
            return Err(StoreError::MissingAuthor);
        }

        assets::Entity::delete_many()
            .filter(assets::Column::Author.eq(author))
            .filter(assets::Column::Name.eq(name))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Records a chunk and assembles the set when the final piece lands.
    ///
    /// Returns the completed set only from the call that closed it; duplicate
    /// chunk deliveries are dropped by the (upload_id, kind, seq) key.
    pub async fn save_chunk(&self, chunk: ChunkPayload) -> Result<Option<AssembledSet>> {
        let txn = self
            .db
            .begin_with_config(Some(IsolationLevel::Serializable), None)
            .await?;

        // Chunk set metadata is last-writer-wins; completed and data stay
        // untouched until assembly.
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"INSERT INTO hivemoji_chunk_sets (upload_id, kind, name, author, version, mime, width, height, animated, "loop", checksum, total, completed)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, false)
               ON CONFLICT (upload_id, kind) DO UPDATE SET
                   name = EXCLUDED.name,
                   author = EXCLUDED.author,
                   version = EXCLUDED.version,
                   mime = EXCLUDED.mime,
                   width = EXCLUDED.width,
                   height = EXCLUDED.height,
                   animated = EXCLUDED.animated,
                   "loop" = EXCLUDED."loop",
                   checksum = EXCLUDED.checksum,
                   total = EXCLUDED.total,
                   updated_at = now()"#,
            [
                chunk.upload_id.clone().into(),
                chunk.kind.clone().into(),
                chunk.name.into(),
                chunk.author.into(),
                chunk.version.into(),
                chunk.mime.into(),
                chunk.width.into(),
                chunk.height.into(),
                chunk.animated.into(),
                chunk.loop_count.into(),
                chunk.checksum.into(),
                chunk.total.into(),
            ],
        );
        txn.execute(stmt).await?;

        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"INSERT INTO hivemoji_chunks (upload_id, kind, seq, total, data)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (upload_id, kind, seq) DO NOTHING"#,
            [
                chunk.upload_id.clone().into(),
                chunk.kind.clone().into(),
                chunk.seq.into(),
                chunk.total.into(),
                chunk.data.into(),
            ],
        );
        txn.execute(stmt).await?;

        let count = chunks::Entity::find()
            .filter(chunks::Column::UploadId.eq(chunk.upload_id.as_str()))
            .filter(chunks::Column::Kind.eq(chunk.kind.as_str()))
            .count(&txn)
            .await?;

        if count < chunk.total.max(0) as u64 {
            txn.commit().await?;
            return Ok(None);
        }

        let assembled = assemble_chunks(&txn, &chunk.upload_id, &chunk.kind).await?;
        txn.commit().await?;

        debug!(
            "assembled upload {} kind {} ({} bytes)",
            assembled.upload_id,
            assembled.kind,
            assembled.data.len()
        );

        Ok(Some(assembled))
    }

    /// Returns a completed chunk set, or `None` when absent or still open.
    pub async fn get_chunk_set(&self, upload_id: &str, kind: &str) -> Result<Option<AssembledSet>> {
        let row = chunk_sets::Entity::find()
            .filter(chunk_sets::Column::UploadId.eq(upload_id))
            .filter(chunk_sets::Column::Kind.eq(kind))
            .filter(chunk_sets::Column::Completed.eq(true))
            .one(&self.db)
            .await?;

        Ok(row.map(AssembledSet::from))
    }

    /// Saves an assembled set (and optional fallback) into the assets table.
    pub async fn upsert_from_chunks(
        &self,
        main: &AssembledSet,
        fallback: Option<&AssembledSet>,
    ) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"INSERT INTO hivemoji_assets (name, version, author, upload_id, mime, width, height, data, animated, "loop", fallback_mime, fallback_data, checksum, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, now())
               ON CONFLICT (author, name) DO UPDATE SET
                   version = EXCLUDED.version,
                   author = EXCLUDED.author,
                   upload_id = EXCLUDED.upload_id,
                   mime = EXCLUDED.mime,
                   width = EXCLUDED.width,
                   height = EXCLUDED.height,
                   data = EXCLUDED.data,
                   animated = EXCLUDED.animated,
                   "loop" = EXCLUDED."loop",
                   fallback_mime = EXCLUDED.fallback_mime,
                   fallback_data = EXCLUDED.fallback_data,
                   checksum = EXCLUDED.checksum,
                   updated_at = now()"#,
            [
                main.name.clone().into(),
                main.version.into(),
                main.author.clone().into(),
                main.upload_id.clone().into(),
                main.mime.clone().into(),
                main.width.into(),
                main.height.into(),
                main.data.clone().into(),
                main.animated.into(),
                main.loop_count.into(),
                match fallback {
                    Some(set) => Value::from(set.mime.clone()),
                    None => Value::String(None),
                },
                match fallback {
                    Some(set) => Value::from(set.data.clone()),
                    None => Value::Bytes(None),
                },
                main.checksum.clone().into(),
            ],
        );

        self.db.execute(stmt).await?;
        Ok(())
    }

    /// Stores the last fully-processed block number.
    pub async fn set_last_block(&self, number: i64) -> Result<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"INSERT INTO sync_state (key, value, updated_at)
               VALUES ($1, $2, now())
               ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()"#,
            [LAST_BLOCK_KEY.into(), number.to_string().into()],
        );

        self.db.execute(stmt).await?;
        Ok(())
    }

    /// Returns the last processed block number, or 0 when the cursor has
    /// never been written.
    pub async fn last_block(&self) -> Result<i64> {
        let row = sync_state::Entity::find_by_id(LAST_BLOCK_KEY.to_string())
            .one(&self.db)
            .await?;

        match row {
            None => Ok(0),
            Some(row) => row
                .value
                .parse::<i64>()
                .map_err(|_| StoreError::BadCursor(row.value)),
        }
    }

    /// Retrieves an emoji by author and name.
    pub async fn get_asset(&self, author: &str, name: &str) -> Result<Option<Asset>> {
        let row = assets::Entity::find_by_id((author.to_string(), name.to_string()))
            .one(&self.db)
            .await?;

        Ok(row.map(Asset::from))
    }

    /// Fetches all stored emoji, with binary payloads only when requested.
    pub async fn list_assets(&self, include_data: bool) -> Result<Vec<Asset>> {
        if include_data {
            let rows = assets::Entity::find()
                .order_by_asc(assets::Column::Name)
                .all(&self.db)
                .await?;
            return Ok(rows.into_iter().map(Asset::from).collect());
        }

        let rows = asset_meta_query()
            .order_by_asc(assets::Column::Name)
            .into_model::<AssetMetaRow>()
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Asset::from).collect())
    }

    /// Fetches emoji for a specific author.
    pub async fn list_assets_by_author(
        &self,
        author: &str,
        include_data: bool,
    ) -> Result<Vec<Asset>> {
        if author.trim().is_empty() {
            return Err(StoreError::MissingAuthor);
        }

        if include_data {
            let rows = assets::Entity::find()
                .filter(assets::Column::Author.eq(author))
                .order_by_asc(assets::Column::Name)
                .all(&self.db)
                .await?;
            return Ok(rows.into_iter().map(Asset::from).collect());
        }

        let rows = asset_meta_query()
            .filter(assets::Column::Author.eq(author))
            .order_by_asc(assets::Column::Name)
            .into_model::<AssetMetaRow>()
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Asset::from).collect())
    }

    /// Deletes chunks and chunk-set rows of incomplete uploads that have not
    /// been touched within `ttl`. Returns (chunks, sets) deleted.
    pub async fn cleanup_incomplete(&self, ttl: Duration) -> Result<(u64, u64)> {
        let cutoff: DateTime<Utc> = Utc::now() - chrono::Duration::seconds(ttl.as_secs() as i64);

        let txn = self.db.begin().await?;

        let chunks_deleted = txn
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"DELETE FROM hivemoji_chunks c
                   USING hivemoji_chunk_sets s
                   WHERE s.upload_id = c.upload_id
                     AND s.kind = c.kind
                     AND s.completed = false
                     AND s.updated_at < $1"#,
                [cutoff.into()],
            ))
            .await?
            .rows_affected();

        let sets_deleted = txn
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"DELETE FROM hivemoji_chunk_sets
                   WHERE completed = false AND updated_at < $1"#,
                [cutoff.into()],
            ))
            .await?
            .rows_affected();

        txn.commit().await?;
        Ok((chunks_deleted, sets_deleted))
    }
}

/// Concatenates ordered chunks, verifies the set and marks it complete.
/// Runs inside the save_chunk transaction; any error rolls the whole call
/// back.
async fn assemble_chunks(
    txn: &DatabaseTransaction,
    upload_id: &str,
    kind: &str,
) -> Result<AssembledSet> {
    let rows = chunks::Entity::find()
        .filter(chunks::Column::UploadId.eq(upload_id))
        .filter(chunks::Column::Kind.eq(kind))
        .order_by_asc(chunks::Column::Seq)
        .all(txn)
        .await?;

    let parts: Vec<ChunkPart> = rows
        .into_iter()
        .map(|row| ChunkPart {
            seq: row.seq,
            data: row.data,
        })
        .collect();

    let set_row = chunk_sets::Entity::find_by_id((upload_id.to_string(), kind.to_string()))
        .one(txn)
        .await?
        .ok_or_else(|| {
            StoreError::Db(DbErr::RecordNotFound(format!(
                "chunk set {}/{}",
                upload_id, kind
            )))
        })?;

    let checksum = set_row.checksum.clone().unwrap_or_default();
    let data = assemble::assemble(&parts, set_row.total, &checksum).map_err(|e| match e {
        AssembleError::Empty => StoreError::EmptySet {
            upload_id: upload_id.to_string(),
            kind: kind.to_string(),
        },
        AssembleError::CountMismatch { have, want } => StoreError::CountMismatch {
            upload_id: upload_id.to_string(),
            kind: kind.to_string(),
            have,
            want,
        },
        AssembleError::SeqGap { expected, found } => StoreError::SeqGap {
            upload_id: upload_id.to_string(),
            kind: kind.to_string(),
            expected,
            found,
        },
        AssembleError::ChecksumMismatch => StoreError::ChecksumMismatch {
            upload_id: upload_id.to_string(),
            kind: kind.to_string(),
        },
    })?;

    let stmt = Statement::from_sql_and_values(
        DbBackend::Postgres,
        r#"UPDATE hivemoji_chunk_sets
           SET data = $3, completed = true, updated_at = now()
           WHERE upload_id = $1 AND kind = $2"#,
        [upload_id.into(), kind.into(), data.clone().into()],
    );
    txn.execute(stmt).await?;

    let mut set = AssembledSet::from(set_row);
    set.data = data;
    Ok(set)
}

fn asset_meta_query() -> sea_orm::Select<assets::Entity> {
    assets::Entity::find()
        .select_only()
        .column(assets::Column::Name)
        .column(assets::Column::Version)
        .column(assets::Column::Author)
        .column(assets::Column::UploadId)
        .column(assets::Column::Mime)
        .column(assets::Column::Width)
        .column(assets::Column::Height)
        .column(assets::Column::Animated)
        .column_as(assets::Column::LoopCount, "loop_count")
        .column(assets::Column::Checksum)
        .column(assets::Column::FallbackMime)
}

fn null_if_empty(value: String) -> Value {
    if value.trim().is_empty() {
        Value::String(None)
    } else {
        Value::from(value)
    }
}

fn null_bytes(value: Vec<u8>) -> Value {
    if value.is_empty() {
        Value::Bytes(None)
    } else {
        Value::from(value)
    }
}
