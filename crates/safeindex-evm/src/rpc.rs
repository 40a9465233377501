//! JSON-RPC 2.0 envelopes as the chain client uses them.
//!
//! Requests always carry numeric ids so batch replies can be matched back.
//! A reply is reduced to a [`Lookup`]: the engine only cares whether the node
//! returned an object, returned nothing (null result or a reply missing from
//! the batch), or refused the call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use safeindex_core::error::IndexingError;

/// Outgoing call.
#[derive(Debug, Clone, Serialize)]
pub struct RpcCall {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: Vec<Value>,
}

impl RpcCall {
    pub fn new(id: u64, method: &'static str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// Error object returned by the node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcFault {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

/// Incoming reply. Unknown members are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcReply {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcFault>,
}

impl RpcReply {
    /// Numeric id. Some proxies echo ids back as decimal strings.
    pub fn id(&self) -> Option<u64> {
        match &self.id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn into_lookup(self) -> Lookup {
        match (self.error, self.result) {
            (Some(fault), _) => Lookup::Failed(fault),
            (None, Value::Null) => Lookup::Absent,
            (None, value) => Lookup::Found(value),
        }
    }
}

/// What one call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Value),
    /// `null` result, or no reply at all for this id.
    Absent,
    Failed(RpcFault),
}

impl Lookup {
    /// Single-call view: a fault is an error, absence is `None`.
    pub fn into_option(self, method: &str) -> Result<Option<Value>, IndexingError> {
        match self {
            Self::Found(value) => Ok(Some(value)),
            Self::Absent => Ok(None),
            Self::Failed(fault) => Err(IndexingError::Rpc(format!("{method}: {fault}"))),
        }
    }

    /// Single-call view for methods that never legitimately return null.
    pub fn into_value(self, method: &str) -> Result<Value, IndexingError> {
        self.into_option(method)?
            .ok_or_else(|| IndexingError::Rpc(format!("{method}: empty result")))
    }
}

/// Replies of one batch, keyed by request id.
#[derive(Debug, Default)]
pub struct BatchReplies {
    by_id: HashMap<u64, RpcReply>,
}

impl BatchReplies {
    pub fn new(replies: Vec<RpcReply>) -> Self {
        Self {
            by_id: replies
                .into_iter()
                .filter_map(|r| r.id().map(|id| (id, r)))
                .collect(),
        }
    }

    /// Take the reply for `id`. A reply the node dropped reads as absent.
    pub fn take(&mut self, id: u64) -> Lookup {
        self.by_id
            .remove(&id)
            .map_or(Lookup::Absent, RpcReply::into_lookup)
    }
}
