//! HTTP JSON-RPC chain client.
//!
//! Implements [`ChainClient`] over `reqwest`. Batch lookups are sent as true
//! JSON-RPC batches (one HTTP call per `batch_size` requests, chunks in
//! flight concurrently); entries the node omits or answers with `null` come
//! back as `None` so the reconciliation engine can retry them one by one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use safeindex_core::client::ChainClient;
use safeindex_core::config::IndexServiceConfig;
use safeindex_core::error::IndexingError;
use safeindex_core::types::{RawBlock, RawLog, RawTrace, RawTransaction, TransactionReceipt};

use crate::rpc::{BatchReplies, Lookup, RpcCall, RpcReply};

/// JSON-RPC client for an Ethereum-compatible node.
pub struct HttpChainClient {
    url: String,
    http: reqwest::Client,
    batch_size: usize,
    next_id: AtomicU64,
}

impl HttpChainClient {
    /// Create a client for `url`. `batch_size` caps the requests per HTTP call.
    pub fn new(
        url: impl Into<String>,
        request_timeout: Duration,
        batch_size: usize,
    ) -> Result<Self, IndexingError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexingError::Rpc(format!("build http client: {e}")))?;

        Ok(Self {
            url: url.into(),
            http,
            batch_size: batch_size.max(1),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &IndexServiceConfig) -> Result<Self, IndexingError> {
        Self::new(
            config.node_url.clone(),
            Duration::from_millis(config.request_timeout_ms),
            config.rpc_batch_size,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self, method: &'static str, params: Vec<Value>) -> RpcCall {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        RpcCall::new(id, method, params)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        body: &impl serde::Serialize,
    ) -> Result<T, IndexingError> {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| IndexingError::Rpc(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexingError::Rpc(format!("HTTP {status}: {body}")));
        }

        resp.json::<T>()
            .await
            .map_err(|e| IndexingError::Rpc(e.to_string()))
    }

    async fn call(&self, method: &'static str, params: Vec<Value>) -> Result<Lookup, IndexingError> {
        let reply: RpcReply = self.post(&self.request(method, params)).await?;
        Ok(reply.into_lookup())
    }

    /// Batched call of one method. Returns one entry per `params` item, in order.
    async fn call_batch(
        &self,
        method: &'static str,
        params: Vec<Vec<Value>>,
    ) -> Result<Vec<Option<Value>>, IndexingError> {
        if params.is_empty() {
            return Ok(vec![]);
        }

        let requests: Vec<RpcCall> = params
            .into_iter()
            .map(|p| self.request(method, p))
            .collect();

        let chunks = requests
            .chunks(self.batch_size)
            .map(|chunk| self.send_chunk(chunk));
        let results = futures::future::try_join_all(chunks).await?;

        Ok(results.into_iter().flatten().collect())
    }

    async fn send_chunk(&self, chunk: &[RpcCall]) -> Result<Vec<Option<Value>>, IndexingError> {
        let mut replies = BatchReplies::new(self.post::<Vec<RpcReply>>(&chunk).await?);

        // A failed item is left for the engine's per-item retry.
        let out = chunk
            .iter()
            .map(|call| match replies.take(call.id) {
                Lookup::Found(value) => Some(value),
                Lookup::Absent => None,
                Lookup::Failed(fault) => {
                    debug!(method = call.method, id = call.id, %fault, "batch item failed");
                    None
                }
            })
            .collect();
        Ok(out)
    }

    /// Parse each batch entry, treating malformed objects as protocol errors.
    fn parse_all<T>(
        values: Vec<Option<Value>>,
        what: &str,
        parse: fn(&Value) -> Option<T>,
    ) -> Result<Vec<Option<T>>, IndexingError> {
        values
            .into_iter()
            .map(|v| Self::parse_one(v, what, parse))
            .collect()
    }

    fn parse_one<T>(
        value: Option<Value>,
        what: &str,
        parse: fn(&Value) -> Option<T>,
    ) -> Result<Option<T>, IndexingError> {
        match value {
            None => Ok(None),
            Some(v) => parse(&v)
                .map(Some)
                .ok_or_else(|| IndexingError::Rpc(format!("malformed {what}: {v}"))),
        }
    }
}

fn hash_params(hashes: &[String]) -> Vec<Vec<Value>> {
    hashes.iter().map(|h| vec![Value::from(h.as_str())]).collect()
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn current_block_number(&self) -> Result<u64, IndexingError> {
        let value = self
            .call("eth_blockNumber", vec![])
            .await?
            .into_value("eth_blockNumber")?;
        value
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| IndexingError::Rpc(format!("malformed block number: {value}")))
    }

    async fn get_block(&self, block_hash: &str) -> Result<Option<RawBlock>, IndexingError> {
        let value = self
            .call("eth_getBlockByHash", vec![json!(block_hash), json!(false)])
            .await?
            .into_option("eth_getBlockByHash")?;
        Self::parse_one(value, "block", block_from_json)
    }

    async fn get_transaction(&self, tx_hash: &str) -> Result<Option<RawTransaction>, IndexingError> {
        let value = self
            .call("eth_getTransactionByHash", vec![json!(tx_hash)])
            .await?
            .into_option("eth_getTransactionByHash")?;
        Self::parse_one(value, "transaction", transaction_from_json)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, IndexingError> {
        let value = self
            .call("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await?
            .into_option("eth_getTransactionReceipt")?;
        Self::parse_one(value, "receipt", receipt_from_json)
    }

    async fn get_logs(
        &self,
        addresses: &[String],
        topic0s: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>, IndexingError> {
        let mut filter = json!({
            "fromBlock": format!("{from_block:#x}"),
            "toBlock": format!("{to_block:#x}"),
        });
        if !addresses.is_empty() {
            filter["address"] = json!(addresses);
        }
        if !topic0s.is_empty() {
            filter["topics"] = json!([topic0s]);
        }

        let value = self
            .call("eth_getLogs", vec![filter])
            .await?
            .into_value("eth_getLogs")?;
        let items = value
            .as_array()
            .ok_or_else(|| IndexingError::Rpc(format!("malformed logs response: {value}")))?;
        items
            .iter()
            .map(|v| log_from_json(v).ok_or_else(|| IndexingError::Rpc(format!("malformed log: {v}"))))
            .collect()
    }

    async fn trace_filter(
        &self,
        to_addresses: &[String],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawTrace>, IndexingError> {
        let filter = json!({
            "fromBlock": format!("{from_block:#x}"),
            "toBlock": format!("{to_block:#x}"),
            "toAddress": to_addresses,
        });

        let value = self
            .call("trace_filter", vec![filter])
            .await?
            .into_value("trace_filter")?;
        let items = value
            .as_array()
            .ok_or_else(|| IndexingError::Rpc(format!("malformed traces response: {value}")))?;
        // Block rewards and other frames without a transaction are skipped.
        Ok(items.iter().filter_map(trace_from_json).collect())
    }

    async fn get_blocks(
        &self,
        block_hashes: &[String],
    ) -> Result<Vec<Option<RawBlock>>, IndexingError> {
        let params = block_hashes
            .iter()
            .map(|h| vec![Value::from(h.as_str()), Value::Bool(false)])
            .collect();
        let values = self.call_batch("eth_getBlockByHash", params).await?;
        Self::parse_all(values, "block", block_from_json)
    }

    async fn get_transactions(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<Option<RawTransaction>>, IndexingError> {
        let values = self
            .call_batch("eth_getTransactionByHash", hash_params(tx_hashes))
            .await?;
        Self::parse_all(values, "transaction", transaction_from_json)
    }

    async fn get_transaction_receipts(
        &self,
        tx_hashes: &[String],
    ) -> Result<Vec<Option<TransactionReceipt>>, IndexingError> {
        let values = self
            .call_batch("eth_getTransactionReceipt", hash_params(tx_hashes))
            .await?;
        Self::parse_all(values, "receipt", receipt_from_json)
    }
}

// ─── JSON decoding ───────────────────────────────────────────────────────────

/// Parse a hex quantity (with or without `0x`). `None` when malformed.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Hex quantity to a decimal string. Values beyond `u128` are kept as given.
pub fn hex_to_decimal(s: &str) -> String {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return "0".into();
    }
    match u128::from_str_radix(digits, 16) {
        Ok(n) => n.to_string(),
        Err(_) => s.to_string(),
    }
}

fn opt_string(v: &Value) -> Option<String> {
    v.as_str().map(str::to_string)
}

/// Nullable quantity: `Some(None)` when null or absent, `None` when malformed.
fn opt_hex_u64(v: &Value) -> Option<Option<u64>> {
    match v {
        Value::Null => Some(None),
        Value::String(s) => parse_hex_u64(s).map(Some),
        _ => None,
    }
}

pub fn block_from_json(v: &Value) -> Option<RawBlock> {
    Some(RawBlock {
        number: parse_hex_u64(v["number"].as_str()?)?,
        hash: v["hash"].as_str()?.to_string(),
        parent_hash: v["parentHash"].as_str()?.to_string(),
        timestamp: parse_hex_u64(v["timestamp"].as_str()?)? as i64,
    })
}

pub fn transaction_from_json(v: &Value) -> Option<RawTransaction> {
    Some(RawTransaction {
        hash: v["hash"].as_str()?.to_string(),
        block_hash: opt_string(&v["blockHash"]),
        block_number: opt_hex_u64(&v["blockNumber"])?,
        transaction_index: opt_hex_u64(&v["transactionIndex"])?.map(|n| n as u32),
        from: v["from"].as_str()?.to_string(),
        to: opt_string(&v["to"]),
        value: hex_to_decimal(v["value"].as_str().unwrap_or("0x0")),
        gas: opt_hex_u64(&v["gas"])?.unwrap_or(0),
        gas_price: v["gasPrice"].as_str().map(hex_to_decimal),
        nonce: opt_hex_u64(&v["nonce"])?.unwrap_or(0),
        input: v["input"].as_str().unwrap_or("0x").to_string(),
    })
}

pub fn log_from_json(v: &Value) -> Option<RawLog> {
    Some(RawLog {
        address: v["address"].as_str()?.to_string(),
        topics: v["topics"]
            .as_array()?
            .iter()
            .filter_map(opt_string)
            .collect(),
        data: v["data"].as_str().unwrap_or("0x").to_string(),
        block_number: parse_hex_u64(v["blockNumber"].as_str()?)?,
        block_hash: v["blockHash"].as_str()?.to_string(),
        tx_hash: v["transactionHash"].as_str()?.to_string(),
        log_index: opt_hex_u64(&v["logIndex"])?.unwrap_or(0) as u32,
        removed: v["removed"].as_bool().unwrap_or(false),
    })
}

pub fn receipt_from_json(v: &Value) -> Option<TransactionReceipt> {
    let logs = match v["logs"].as_array() {
        Some(items) => items.iter().map(log_from_json).collect::<Option<Vec<_>>>()?,
        None => vec![],
    };
    Some(TransactionReceipt {
        transaction_hash: v["transactionHash"].as_str()?.to_string(),
        block_hash: opt_string(&v["blockHash"]),
        block_number: opt_hex_u64(&v["blockNumber"])?,
        gas_used: opt_hex_u64(&v["gasUsed"])?.unwrap_or(0),
        effective_gas_price: v["effectiveGasPrice"].as_str().map(hex_to_decimal),
        status: opt_hex_u64(&v["status"])?,
        logs,
    })
}

/// Parse a `trace_filter` frame. Returns `None` for frames without a transaction.
pub fn trace_from_json(v: &Value) -> Option<RawTrace> {
    let action = &v["action"];
    let kind = v["type"].as_str().unwrap_or("call");
    let call_type = match kind {
        "call" => opt_string(&action["callType"]),
        other => Some(other.to_string()),
    };
    let to = opt_string(&action["to"]).or_else(|| opt_string(&v["result"]["address"]));
    let input = action["input"]
        .as_str()
        .or_else(|| action["init"].as_str())
        .unwrap_or("0x")
        .to_string();
    let trace_address = v["traceAddress"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_u64)
                .map(|n| n.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    Some(RawTrace {
        tx_hash: v["transactionHash"].as_str()?.to_string(),
        block_number: v["blockNumber"].as_u64()?,
        trace_address,
        call_type,
        from: action["from"]
            .as_str()
            .or_else(|| action["address"].as_str())?
            .to_string(),
        to,
        value: hex_to_decimal(
            action["value"]
                .as_str()
                .or_else(|| action["balance"].as_str())
                .unwrap_or("0x0"),
        ),
        input,
        error: opt_string(&v["error"]),
    })
}
