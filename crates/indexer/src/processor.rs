//! Versioned hivemoji payload dispatch.
//!
//! Ops flow in from the block follower, get decoded per protocol version and
//! land in the store. Malformed ops were already filtered out by the caller;
//! everything that errors here aborts the block so it can be retried.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use hive::{Block, CustomJsonOp};
use storage::{AssembledSet, ChunkPayload, RegisterV1, Store, StoreError};

use crate::error::{ProcessError, Result};
use crate::shutdown::Shutdown;

const HIVEMOJI_ID: &str = "hivemoji";

/// Store surface the dispatcher, follower and sweeper need.
#[async_trait]
pub trait EmojiStore: Send + Sync {
    async fn upsert_v1(&self, payload: RegisterV1) -> std::result::Result<(), StoreError>;
    async fn delete_emoji(&self, author: &str, name: &str) -> std::result::Result<(), StoreError>;
    async fn save_chunk(
        &self,
        chunk: ChunkPayload,
    ) -> std::result::Result<Option<AssembledSet>, StoreError>;
    async fn get_chunk_set(
        &self,
        upload_id: &str,
        kind: &str,
    ) -> std::result::Result<Option<AssembledSet>, StoreError>;
    async fn upsert_from_chunks(
        &self,
        main: &AssembledSet,
        fallback: Option<&AssembledSet>,
    ) -> std::result::Result<(), StoreError>;
    async fn set_last_block(&self, number: i64) -> std::result::Result<(), StoreError>;
    async fn last_block(&self) -> std::result::Result<i64, StoreError>;
    async fn cleanup_incomplete(
        &self,
        ttl: Duration,
    ) -> std::result::Result<(u64, u64), StoreError>;
}

#[async_trait]
impl EmojiStore for Store {
    async fn upsert_v1(&self, payload: RegisterV1) -> std::result::Result<(), StoreError> {
        Store::upsert_v1(self, payload).await
    }

    async fn delete_emoji(&self, author: &str, name: &str) -> std::result::Result<(), StoreError> {
        Store::delete_emoji(self, author, name).await
    }

    async fn save_chunk(
        &self,
        chunk: ChunkPayload,
    ) -> std::result::Result<Option<AssembledSet>, StoreError> {
        Store::save_chunk(self, chunk).await
    }

    async fn get_chunk_set(
        &self,
        upload_id: &str,
        kind: &str,
    ) -> std::result::Result<Option<AssembledSet>, StoreError> {
        Store::get_chunk_set(self, upload_id, kind).await
    }

    async fn upsert_from_chunks(
        &self,
        main: &AssembledSet,
        fallback: Option<&AssembledSet>,
    ) -> std::result::Result<(), StoreError> {
        Store::upsert_from_chunks(self, main, fallback).await
    }

    async fn set_last_block(&self, number: i64) -> std::result::Result<(), StoreError> {
        Store::set_last_block(self, number).await
    }

    async fn last_block(&self) -> std::result::Result<i64, StoreError> {
        Store::last_block(self).await
    }

    async fn cleanup_incomplete(
        &self,
        ttl: Duration,
    ) -> std::result::Result<(u64, u64), StoreError> {
        Store::cleanup_incomplete(self, ttl).await
    }
}

#[async_trait]
impl<T: EmojiStore + ?Sized> EmojiStore for Arc<T> {
    async fn upsert_v1(&self, payload: RegisterV1) -> std::result::Result<(), StoreError> {
        (**self).upsert_v1(payload).await
    }

    async fn delete_emoji(&self, author: &str, name: &str) -> std::result::Result<(), StoreError> {
        (**self).delete_emoji(author, name).await
    }

    async fn save_chunk(
        &self,
        chunk: ChunkPayload,
    ) -> std::result::Result<Option<AssembledSet>, StoreError> {
        (**self).save_chunk(chunk).await
    }

    async fn get_chunk_set(
        &self,
        upload_id: &str,
        kind: &str,
    ) -> std::result::Result<Option<AssembledSet>, StoreError> {
        (**self).get_chunk_set(upload_id, kind).await
    }

    async fn upsert_from_chunks(
        &self,
        main: &AssembledSet,
        fallback: Option<&AssembledSet>,
    ) -> std::result::Result<(), StoreError> {
        (**self).upsert_from_chunks(main, fallback).await
    }

    async fn set_last_block(&self, number: i64) -> std::result::Result<(), StoreError> {
        (**self).set_last_block(number).await
    }

    async fn last_block(&self) -> std::result::Result<i64, StoreError> {
        (**self).last_block().await
    }

    async fn cleanup_incomplete(
        &self,
        ttl: Duration,
    ) -> std::result::Result<(u64, u64), StoreError> {
        (**self).cleanup_incomplete(ttl).await
    }
}

/// Dispatches hivemoji ops from chain blocks into the store.
pub struct Processor<S> {
    store: S,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    version: i64,
    #[serde(default)]
    op: String,
}

/// Producers emit `loop` as either a boolean or an integer.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum LoopField {
    Flag(bool),
    Count(i32),
}

fn loop_value(field: Option<LoopField>) -> Option<i32> {
    match field {
        None | Some(LoopField::Flag(false)) => None,
        Some(LoopField::Flag(true)) => Some(0),
        Some(LoopField::Count(count)) => Some(count),
    }
}

#[derive(Debug, Deserialize)]
struct V1Fallback {
    #[serde(default)]
    mime: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct V1Message {
    #[serde(default)]
    op: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime: String,
    #[serde(default)]
    width: i32,
    #[serde(default)]
    height: i32,
    #[serde(default)]
    data: String,
    #[serde(default)]
    animated: bool,
    #[serde(default, rename = "loop")]
    loop_field: Option<LoopField>,
    #[serde(default)]
    fallback: Option<V1Fallback>,
}

#[derive(Debug, Deserialize)]
struct V2Message {
    #[serde(default)]
    version: i32,
    #[serde(default)]
    op: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    mime: String,
    #[serde(default)]
    width: i32,
    #[serde(default)]
    height: i32,
    #[serde(default)]
    animated: bool,
    #[serde(default, rename = "loop")]
    loop_field: Option<LoopField>,
    #[serde(default)]
    checksum: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    seq: i32,
    #[serde(default)]
    total: i32,
    #[serde(default)]
    data: String,
}

impl<S: EmojiStore> Processor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Scans a block for hivemoji custom_json entries and applies them in
    /// on-chain order, then advances the persisted cursor.
    pub async fn process_block(&self, block: &Block, shutdown: &Shutdown) -> Result<()> {
        for tx in &block.transactions {
            for op in &tx.operations {
                if shutdown.is_triggered() {
                    return Err(ProcessError::Cancelled);
                }
                if op.kind != "custom_json" {
                    continue;
                }

                let custom: CustomJsonOp = match serde_json::from_str(op.value.get()) {
                    Ok(custom) => custom,
                    Err(e) => {
                        warn!("skip custom_json decode error: {}", e);
                        continue;
                    }
                };
                if custom.id != HIVEMOJI_ID {
                    continue;
                }

                let payload = match custom.extract_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("invalid hivemoji payload: {}", e);
                        continue;
                    }
                };

                let author = custom.author();

                match self.handle_payload(block.number, &payload, &author).await {
                    Ok(()) => {}
                    // An unparseable envelope is a malformed op, not a
                    // processing failure; skip it and keep the block moving.
                    Err(e @ ProcessError::Envelope(_)) => {
                        warn!("skip malformed hivemoji payload: {}", e);
                    }
                    Err(e) => {
                        return Err(ProcessError::Block {
                            number: block.number,
                            source: Box::new(e),
                        });
                    }
                }
            }
        }

        self.store.set_last_block(block.number).await?;
        Ok(())
    }

    async fn handle_payload(&self, block_num: i64, payload: &[u8], author: &str) -> Result<()> {
        let env: Envelope = serde_json::from_slice(payload).map_err(ProcessError::Envelope)?;

        info!(
            "block {}: hivemoji v{} op={} author={}",
            block_num,
            env.version,
            env.op,
            safe_author(author)
        );

        match env.version {
            1 => self.handle_v1(block_num, payload, author).await,
            2 => self.handle_v2(block_num, payload, author).await,
            other => Err(ProcessError::UnsupportedVersion(other)),
        }
    }

    async fn handle_v1(&self, block_num: i64, payload: &[u8], author: &str) -> Result<()> {
        let msg: V1Message = serde_json::from_slice(payload).map_err(|e| ProcessError::Decode {
            version: 1,
            source: e,
        })?;

        match msg.op.as_str() {
            "register" => {
                let loop_count = loop_value(msg.loop_field);
                let raw = general_purpose::STANDARD
                    .decode(&msg.data)
                    .map_err(|e| ProcessError::DecodeData {
                        what: "v1",
                        source: e,
                    })?;

                let (fallback_mime, fallback_data) = match &msg.fallback {
                    Some(fallback) => {
                        let data = general_purpose::STANDARD.decode(&fallback.data).map_err(
                            |e| ProcessError::DecodeData {
                                what: "fallback",
                                source: e,
                            },
                        )?;
                        (fallback.mime.clone(), data)
                    }
                    None => (String::new(), Vec::new()),
                };

                info!(
                    "block {}: v1 register name={} author={} animated={} loop={:?} bytes={} fallback_bytes={}",
                    block_num,
                    msg.name,
                    safe_author(author),
                    msg.animated,
                    loop_count,
                    raw.len(),
                    fallback_data.len()
                );

                self.store
                    .upsert_v1(RegisterV1 {
                        name: msg.name,
                        author: author.to_string(),
                        mime: msg.mime,
                        width: msg.width,
                        height: msg.height,
                        data: raw,
                        animated: msg.animated,
                        loop_count,
                        fallback_mime,
                        fallback_data,
                    })
                    .await?;
                Ok(())
            }
            "delete" => {
                self.store.delete_emoji(author, &msg.name).await?;
                Ok(())
            }
            other => Err(ProcessError::UnknownV1Op(other.to_string())),
        }
    }

    async fn handle_v2(&self, block_num: i64, payload: &[u8], author: &str) -> Result<()> {
        let msg: V2Message = serde_json::from_slice(payload).map_err(|e| ProcessError::Decode {
            version: 2,
            source: e,
        })?;

        if msg.op != "chunk" && msg.op != "register" && !msg.op.is_empty() {
            return Err(ProcessError::UnsupportedV2Op(msg.op));
        }

        if msg.op == "register" && msg.data.is_empty() {
            // Manifest-only entry for discovery; nothing to persist.
            info!(
                "block {}: v2 register manifest name={} author={} upload={} animated={}",
                block_num,
                msg.name,
                safe_author(author),
                msg.id,
                msg.animated
            );
            return Ok(());
        }

        if msg.total <= 0 {
            return Err(ProcessError::InvalidTotal);
        }

        if msg.seq <= 0 {
            // Some producers emit sentinel chunks; tolerate them.
            info!(
                "block {}: skip v2 chunk upload={} kind={} name={} seq={} (must be > 0)",
                block_num, msg.id, msg.kind, msg.name, msg.seq
            );
            return Ok(());
        }

        let loop_count = loop_value(msg.loop_field);

        let data = general_purpose::STANDARD
            .decode(&msg.data)
            .map_err(|e| ProcessError::DecodeData {
                what: "v2 chunk",
                source: e,
            })?;

        let kind = if msg.kind.is_empty() {
            "main".to_string()
        } else {
            msg.kind
        };

        let assembled = self
            .store
            .save_chunk(ChunkPayload {
                upload_id: msg.id,
                author: author.to_string(),
                name: msg.name,
                version: msg.version,
                mime: msg.mime,
                width: msg.width,
                height: msg.height,
                animated: msg.animated,
                loop_count,
                checksum: msg.checksum,
                kind,
                seq: msg.seq,
                total: msg.total,
                data,
            })
            .await?;

        let Some(assembled) = assembled else {
            return Ok(());
        };

        info!(
            "block {}: v2 assembled upload={} kind={} name={} author={} animated={} loop={:?} bytes={}",
            block_num,
            assembled.upload_id,
            assembled.kind,
            assembled.name,
            safe_author(&assembled.author),
            assembled.animated,
            assembled.loop_count,
            assembled.data.len()
        );

        self.handle_completed_set(&assembled).await
    }

    /// Joins a freshly-completed set with its sibling and writes the asset.
    ///
    /// A completed fallback waits for its main; a completed main writes
    /// immediately, picking up whatever fallback already finished.
    async fn handle_completed_set(&self, set: &AssembledSet) -> Result<()> {
        match set.kind.as_str() {
            "main" => {
                let fallback = self.store.get_chunk_set(&set.upload_id, "fallback").await?;
                self.store.upsert_from_chunks(set, fallback.as_ref()).await?;
                Ok(())
            }
            "fallback" => match self.store.get_chunk_set(&set.upload_id, "main").await? {
                None => Ok(()),
                Some(main_set) => {
                    self.store.upsert_from_chunks(&main_set, Some(set)).await?;
                    Ok(())
                }
            },
            other => Err(ProcessError::UnknownKind(other.to_string())),
        }
    }
}

fn safe_author(author: &str) -> &str {
    if author.trim().is_empty() {
        "<unknown>"
    } else {
        author
    }
}
