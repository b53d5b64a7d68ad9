//! Wire types for the RPC node and the DEX aggregator price API.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

/// One entry from `getSignaturesForAddress`, newest-first.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureEntry {
    pub signature: String,
    #[serde(default)]
    pub slot: u64,
    /// Unix block time; absent until the transaction is finalized
    #[serde(default)]
    pub block_time: Option<i64>,
    /// Error object for failed transactions
    #[serde(default)]
    pub err: Option<Value>,
}

impl SignatureEntry {
    /// True once the entry carries a finalized block time.
    pub fn is_finalized(&self) -> bool {
        self.block_time.is_some()
    }

    /// True if the transaction failed on chain.
    pub fn is_failed(&self) -> bool {
        self.err.is_some()
    }
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    #[serde(default)]
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Price API response: `{"data": {"<mint>": {"price": ...}}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceApiResponse {
    #[serde(default)]
    pub data: std::collections::HashMap<String, PriceEntry>,
}

/// Quoted price for one token.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceEntry {
    pub price: Decimal,
}
