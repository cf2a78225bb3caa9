//! Hive chain access: JSON-RPC block fetching and custom_json wire types.

mod client;
mod types;

pub use client::HiveClient;
pub use types::{Block, CustomJsonOp, Operation, Transaction};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// Source of chain blocks for the ingestion loop.
///
/// `get_block` returns `None` when the node has not produced the requested
/// block yet; callers are expected to wait and ask again.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    async fn get_block(&self, number: i64) -> Result<Option<Block>>;
    async fn head_block_number(&self) -> Result<i64>;
}

#[async_trait]
impl<T: BlockFetcher + ?Sized> BlockFetcher for Arc<T> {
    async fn get_block(&self, number: i64) -> Result<Option<Block>> {
        (**self).get_block(number).await
    }

    async fn head_block_number(&self) -> Result<i64> {
        (**self).head_block_number().await
    }
}
