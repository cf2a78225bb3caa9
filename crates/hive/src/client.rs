//! JSON-RPC client for a Hive node.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Block, BlockFetcher, Transaction};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the condenser API of a Hive node.
#[derive(Debug, Clone)]
pub struct HiveClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default)]
    block_id: String,
    #[serde(default)]
    transactions: Vec<Transaction>,
}

impl HiveClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build hive http client")?;

        Ok(Self {
            http,
            url: base_url.into(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("post {}", method))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} failed with status {}: {}", method, status, text));
        }

        let decoded: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("decode {} response", method))?;

        if let Some(error) = decoded.error {
            return Err(anyhow!("{} rpc error: {}", method, error));
        }

        Ok(decoded.result)
    }
}

#[async_trait]
impl BlockFetcher for HiveClient {
    async fn get_block(&self, number: i64) -> Result<Option<Block>> {
        let raw: Option<RawBlock> = self
            .call("condenser_api.get_block", json!([number]))
            .await
            .with_context(|| format!("get block {}", number))?;

        // A null result or an empty block_id means the block is not produced yet.
        let raw = match raw {
            Some(raw) if !raw.block_id.is_empty() => raw,
            _ => return Ok(None),
        };

        debug!(
            "fetched block {} with {} transactions",
            number,
            raw.transactions.len()
        );

        // Condenser block bodies do not carry their own height; stamp the
        // requested one.
        Ok(Some(Block {
            number,
            transactions: raw.transactions,
        }))
    }

    async fn head_block_number(&self) -> Result<i64> {
        let props: Option<Value> = self
            .call("condenser_api.get_dynamic_global_properties", json!([]))
            .await
            .context("head block props")?;

        let props = props.ok_or_else(|| anyhow!("empty global props response"))?;
        let head = props
            .get("head_block_number")
            .ok_or_else(|| anyhow!("head_block_number missing in global props"))?;

        parse_head(head)
    }
}

/// Nodes report the head height as either a JSON number or a decimal string.
fn parse_head(value: &Value) -> Result<i64> {
    if let Some(number) = value.as_i64() {
        return Ok(number);
    }
    if let Some(text) = value.as_str() {
        if let Ok(number) = text.parse::<i64>() {
            return Ok(number);
        }
    }
    Err(anyhow!("unable to parse head_block_number: {}", value))
}
